//! One logical image series spread over one or more files.
//!
//! A file set owns the page writers for one position (or for the whole
//! acquisition when positions are not split). It decides when to roll over
//! to a new file, stamps each image with the file it lands in, and feeds the
//! metadata accumulator.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::acquisition::{
    AcquisitionCoordinate, ImageRecord, ImageTags, PixelBuffer, RasterOrder, SummaryMetadata,
};
use crate::config::StorageConfig;
use crate::error::StorageError;

use super::metadata_file::MetadataFile;
use super::ome::OmeMetadata;
use super::page::{PageSource, PageWriter};

/// Extension of every image file.
pub const IMAGE_FILE_EXTENSION: &str = ".ome.tif";

// =============================================================================
// Image Order Tracking
// =============================================================================

/// Checks that images arrive in the raster order the store was configured
/// with. Once an image breaks the order the series is no longer considered
/// well formed, and stays that way.
#[derive(Debug, Clone)]
struct SequenceTracker {
    order: RasterOrder,
    num_channels: u32,
    num_slices: u32,
    next: (u32, u32, u32),
    well_formed: bool,
}

impl SequenceTracker {
    fn new(order: RasterOrder, num_channels: u32, num_slices: u32) -> Self {
        Self {
            order,
            num_channels: num_channels.max(1),
            num_slices: num_slices.max(1),
            next: (0, 0, 0),
            well_formed: true,
        }
    }

    fn observe(&mut self, channel: u32, slice: u32, frame: u32) {
        if (channel, slice, frame) != self.next {
            if self.well_formed {
                debug!(
                    expected = ?self.next,
                    got = ?(channel, slice, frame),
                    "Images arriving out of order"
                );
            }
            self.well_formed = false;
        }

        let (mut c, mut z, mut t) = (channel, slice, frame);
        match self.order {
            RasterOrder::SliceMajor => {
                z += 1;
                if z >= self.num_slices {
                    z = 0;
                    c += 1;
                    if c >= self.num_channels {
                        c = 0;
                        t += 1;
                    }
                }
            }
            RasterOrder::ChannelMajor => {
                c += 1;
                if c >= self.num_channels {
                    c = 0;
                    z += 1;
                    if z >= self.num_slices {
                        z = 0;
                        t += 1;
                    }
                }
            }
        }
        self.next = (c, z, t);
    }

    fn invalidate(&mut self) {
        self.well_formed = false;
    }
}

// =============================================================================
// FileSet
// =============================================================================

/// What a file set embeds in its files when it is finished.
#[derive(Debug, Clone, Copy)]
pub enum FinalMetadata<'a> {
    /// Full document in the current file; earlier files point at it.
    Full(&'a str),
    /// Every file points at the file holding the full document.
    PointerTo { file_name: &'a str, uuid: &'a str },
}

/// Result of writing one image into a file set.
pub struct WriteOutcome<R> {
    /// Coordinate label returned by the page writer.
    pub label: String,
    /// File the image landed in.
    pub file_name: String,
    /// Live reader over that file.
    pub reader: Arc<R>,
    /// Problems that did not prevent the image from being stored.
    pub soft_errors: Vec<StorageError>,
}

/// The files holding one position's images, or every image when the store
/// does not split by position.
pub struct FileSet<W: PageWriter> {
    directory: PathBuf,
    base_name: String,
    position: u32,

    split_by_position: bool,
    time_major: bool,
    num_channels: u32,
    num_slices: u32,
    planned_frames: u32,
    reserved: u64,
    max_file_size: u64,
    summary: SummaryMetadata,

    writers: Vec<W>,
    next_ifd: u32,
    current_frame: u32,
    geometry: Option<(u32, u32, u32)>,
    tracker: SequenceTracker,
    metadata_file: Option<MetadataFile>,
    finished: bool,
}

impl<W: PageWriter> FileSet<W> {
    /// Create a file set for `position`, named after `first_image`.
    ///
    /// No image file is created until the first write.
    pub fn new(
        position: u32,
        first_image: &ImageRecord,
        config: &StorageConfig,
        summary: &SummaryMetadata,
    ) -> Result<Self, StorageError> {
        let base_name = Self::base_name_for(
            &summary.prefix,
            config.split_by_position,
            position,
            first_image.position_name(),
        );
        let metadata_file = if config.separate_metadata_file {
            Some(MetadataFile::create(&config.directory, &base_name, summary)?)
        } else {
            None
        };

        debug!(base_name = %base_name, position, "Created file set");

        Ok(Self {
            directory: config.directory.clone(),
            base_name,
            position,
            split_by_position: config.split_by_position,
            time_major: config.time_major,
            num_channels: summary.channels.max(1),
            num_slices: summary.slices.max(1),
            planned_frames: summary.frames,
            reserved: config.metadata_reservation,
            max_file_size: config.max_file_size,
            summary: summary.clone(),
            writers: Vec::new(),
            next_ifd: 0,
            current_frame: 0,
            geometry: None,
            tracker: SequenceTracker::new(config.raster_order, summary.channels, summary.slices),
            metadata_file,
            finished: false,
        })
    }

    /// `MMStack`, prefixed with the acquisition prefix and, when split by
    /// position, suffixed with the position name.
    pub fn base_name_for(
        prefix: &str,
        split_by_position: bool,
        position: u32,
        position_name: Option<&str>,
    ) -> String {
        let mut name = if prefix.is_empty() {
            "MMStack".to_string()
        } else {
            format!("{}_MMStack", prefix)
        };
        if split_by_position {
            match position_name {
                Some(label) if !label.is_empty() => {
                    name.push('_');
                    name.push_str(label);
                }
                _ => name.push_str(&format!("_Pos{}", position)),
            }
        }
        name
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    /// Frame index of the most recent image with usable tags.
    pub fn last_frame(&self) -> u32 {
        self.current_frame
    }

    /// Whether every image so far arrived in raster order with usable tags.
    pub fn is_well_formed(&self) -> bool {
        self.tracker.well_formed
    }

    pub fn num_files(&self) -> usize {
        self.writers.len()
    }

    pub fn current_file_name(&self) -> Option<&str> {
        self.writers.last().map(|w| w.file_name())
    }

    pub fn current_uuid(&self) -> Option<&str> {
        self.writers.last().map(|w| w.uuid())
    }

    /// Whether the current file can still take a metadata blob of `len` bytes.
    pub fn has_space_for_full_metadata(&self, len: usize) -> bool {
        self.writers
            .last()
            .is_some_and(|w| w.has_space_for_full_metadata(len))
    }

    /// Live reader over the current file.
    pub fn current_reader(&self) -> Option<Arc<W::Reader>> {
        self.writers.last().map(|w| w.reader())
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Write one image, rolling over to a new file first if needed.
    ///
    /// The image's tags gain a `FileName` entry naming the file it lands in.
    /// Once the page is written the image stays readable through the
    /// returned reader, and later problems go to
    /// [`WriteOutcome::soft_errors`]. Tags without usable indices keep the
    /// image out of the metadata document. A failed sidecar append loses
    /// only the sidecar entry.
    pub fn write_image<S>(
        &mut self,
        mut record: ImageRecord,
        source: &S,
        metadata: &mut OmeMetadata,
    ) -> Result<WriteOutcome<W::Reader>, StorageError>
    where
        S: PageSource<Writer = W>,
    {
        if self.finished {
            return Err(StorageError::ReadOnly);
        }

        self.ensure_capacity(&mut record, source)?;
        if self.geometry.is_none() {
            self.geometry = Some((
                record.pixels.width(),
                record.pixels.height(),
                record.pixels.bytes_per_pixel(),
            ));
        }
        let writer = self.writers.last_mut().ok_or(StorageError::WriterShutdown)?;
        let file_name = writer.file_name().to_string();
        let uuid = writer.uuid().to_string();

        let ifd = self.next_ifd;
        let label = writer.write_image(&record)?;
        let reader = writer.reader();
        self.next_ifd += 1;

        let mut soft_errors = Vec::new();
        match record.tag_indices() {
            Ok(indices) => {
                self.tracker
                    .observe(indices.channel, indices.slice, indices.frame);
                if indices.frame > self.current_frame {
                    metadata.fill_in_missing_tiff_datas(self.current_frame, indices.position);
                    self.current_frame = indices.frame;
                }
                if let Err(e) =
                    metadata.add_image_tags(&record, ifd, &self.base_name, &file_name, &uuid)
                {
                    warn!(file = %file_name, label = %label, error = %e, "Image left out of OME metadata");
                    soft_errors.push(e);
                }
            }
            Err(e) => {
                warn!(
                    file = %file_name,
                    label = %label,
                    error = %e,
                    "Image stored without usable indices; left out of OME metadata"
                );
                self.tracker.invalidate();
                soft_errors.push(e);
            }
        }

        if let Some(metadata_file) = &mut self.metadata_file {
            if let Err(e) = metadata_file.append(&record.coords, &record.tags) {
                warn!(
                    path = %metadata_file.path().display(),
                    label = %label,
                    error = %e,
                    "Failed to append image tags to metadata file"
                );
                soft_errors.push(e);
            }
        }

        Ok(WriteOutcome {
            label,
            file_name,
            reader,
            soft_errors,
        })
    }

    /// Make sure the last writer can take `record`, rolling over if not.
    ///
    /// Stamps `record` with the name of the file it will land in before
    /// measuring it. An image too large for even an empty file is rejected
    /// without touching the current file.
    fn ensure_capacity<S>(
        &mut self,
        record: &mut ImageRecord,
        source: &S,
    ) -> Result<(), StorageError>
    where
        S: PageSource<Writer = W>,
    {
        if let Some(current) = self.writers.last() {
            record.set_file_name(current.file_name());
            if current.has_space_to_write(record, self.reserved) {
                return Ok(());
            }
        }

        let file_name = if self.writers.is_empty() {
            format!("{}{}", self.base_name, IMAGE_FILE_EXTENSION)
        } else {
            format!(
                "{}_{}{}",
                self.base_name,
                self.writers.len(),
                IMAGE_FILE_EXTENSION
            )
        };
        record.set_file_name(&file_name);

        let too_large = StorageError::ImageTooLarge {
            bytes: record.pixels.byte_len(),
            max_file_size: self.max_file_size,
        };
        if !source.fits_in_new_file(&self.summary, record, self.reserved) {
            return Err(too_large);
        }

        if let Some(current) = self.writers.last_mut() {
            current.finish()?;
            info!(
                from = %current.file_name(),
                to = %file_name,
                "Rolling over to a new file"
            );
        }

        let uuid = format!("urn:uuid:{}", Uuid::new_v4());
        let writer =
            source.create_writer(&self.directory, &file_name, &uuid, &self.summary, record)?;
        let fits = writer.has_space_to_write(record, self.reserved);
        self.writers.push(writer);
        self.next_ifd = 0;

        if !fits {
            return Err(too_large);
        }
        Ok(())
    }

    // =========================================================================
    // Finishing
    // =========================================================================

    /// Complete the last frame with blank pages if the acquisition stopped
    /// before its planned frame count.
    ///
    /// Only applies to well-formed, position-split, non time-major series.
    /// Returns the coordinates of the blank pages and the readers holding
    /// them.
    pub fn finish_aborted_acq_if_needed<S>(
        &mut self,
        source: &S,
        metadata: &mut OmeMetadata,
    ) -> Result<Vec<(AcquisitionCoordinate, Arc<W::Reader>)>, StorageError>
    where
        S: PageSource<Writer = W>,
    {
        if self.finished || self.writers.is_empty() {
            return Ok(Vec::new());
        }
        if !(self.tracker.well_formed && self.split_by_position && !self.time_major) {
            return Ok(Vec::new());
        }
        if self.planned_frames <= self.current_frame + 1 {
            return Ok(Vec::new());
        }
        self.complete_frame_with_blank_images(self.current_frame, source, metadata)
    }

    fn complete_frame_with_blank_images<S>(
        &mut self,
        frame: u32,
        source: &S,
        metadata: &mut OmeMetadata,
    ) -> Result<Vec<(AcquisitionCoordinate, Arc<W::Reader>)>, StorageError>
    where
        S: PageSource<Writer = W>,
    {
        let (width, height, bytes_per_pixel) =
            self.geometry.ok_or(StorageError::WriterShutdown)?;
        let written: HashSet<AcquisitionCoordinate> = self
            .writers
            .iter()
            .flat_map(|w| w.written_coords())
            .collect();

        let mut added = Vec::new();
        for channel in 0..self.num_channels {
            for slice in 0..self.num_slices {
                let coords = AcquisitionCoordinate::new(channel, slice, frame, self.position);
                if written.contains(&coords) {
                    continue;
                }

                let mut blank = ImageRecord::new(
                    coords,
                    ImageTags::new(),
                    PixelBuffer::blank(width, height, bytes_per_pixel),
                );
                self.ensure_capacity(&mut blank, source)?;
                let writer = self.writers.last_mut().ok_or(StorageError::WriterShutdown)?;
                writer.write_blank_image(coords)?;
                metadata.add_tiff_data(
                    coords,
                    self.next_ifd,
                    &self.base_name,
                    writer.file_name(),
                    writer.uuid(),
                );
                self.next_ifd += 1;
                added.push((coords, writer.reader()));
            }
        }

        metadata.finalize_num_frames(self.position, frame + 1);
        info!(
            base_name = %self.base_name,
            frame,
            blank_pages = added.len(),
            "Completed last frame of a stopped acquisition"
        );
        Ok(added)
    }

    /// Close every file, embedding the document or a pointer to it.
    ///
    /// With [`FinalMetadata::Full`] only the current file gets the full
    /// document and earlier files point at it. Calling this more than once
    /// has no further effect. Every file is attempted; the first failure is
    /// returned.
    pub fn finished(&mut self, metadata: FinalMetadata<'_>) -> Result<(), StorageError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut first_error = None;
        if let Some(metadata_file) = &mut self.metadata_file {
            if let Err(e) = metadata_file.finish() {
                first_error.get_or_insert(e);
            }
        }
        if let Some(last) = self.writers.last_mut() {
            if let Err(e) = last.finish() {
                first_error.get_or_insert(e);
            }
        }

        let (master_file, master_uuid, document) = match metadata {
            FinalMetadata::Full(document) => match self.writers.last() {
                Some(last) => (
                    last.file_name().to_string(),
                    last.uuid().to_string(),
                    Some(document),
                ),
                None => (String::new(), String::new(), Some(document)),
            },
            FinalMetadata::PointerTo { file_name, uuid } => {
                (file_name.to_string(), uuid.to_string(), None)
            }
        };

        let last_index = self.writers.len().saturating_sub(1);
        for (index, writer) in self.writers.iter_mut().enumerate() {
            let blob = match document {
                Some(document) if index == last_index => document.to_string(),
                _ => OmeMetadata::pointer_to_master_file(&master_file, &master_uuid, writer.uuid()),
            };
            if let Err(e) = writer.close(&blob) {
                warn!(file = %writer.file_name(), error = %e, "Failed to close file");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
