//! Test utilities for integration tests.
//!
//! This module provides image builders, an acquisition driver, helpers for
//! picking apart OME-XML documents, and an in-memory page source.

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use mmstack::{
    AcquisitionCoordinate, ContainerStore, ImageRecord, ImageTags, PageReader, PageSource,
    PageWriter, PixelBuffer, RasterOrder, StorageConfig, StorageError, SummaryMetadata,
};

// =============================================================================
// Images
// =============================================================================

pub const WIDTH: u32 = 16;
pub const HEIGHT: u32 = 8;

/// An 8-bit image whose pixels encode its coordinate.
pub fn image(c: u32, z: u32, t: u32, p: u32) -> ImageRecord {
    let coords = AcquisitionCoordinate::new(c, z, t, p);
    let value = (1 + c * 40 + z * 10 + t * 3 + p) as u8;
    let pixels = PixelBuffer::gray8(WIDTH, HEIGHT, vec![value; (WIDTH * HEIGHT) as usize])
        .expect("valid pixel buffer");
    ImageRecord::new(coords, ImageTags::new(), pixels)
}

/// A 16-bit image with a gradient.
pub fn image16(c: u32, z: u32, t: u32, p: u32) -> ImageRecord {
    let coords = AcquisitionCoordinate::new(c, z, t, p);
    let data: Vec<u16> = (0..WIDTH * HEIGHT).map(|i| (i * 257 + c) as u16).collect();
    let pixels = PixelBuffer::gray16(WIDTH, HEIGHT, data).expect("valid pixel buffer");
    ImageRecord::new(coords, ImageTags::new(), pixels)
}

/// Whether every pixel of an image is zero.
pub fn is_blank(record: &ImageRecord) -> bool {
    record.pixels.to_le_bytes().iter().all(|&b| b == 0)
}

// =============================================================================
// Acquisition Driver
// =============================================================================

/// Planned extent of a test acquisition.
#[derive(Debug, Clone, Copy)]
pub struct Extent {
    pub channels: u32,
    pub slices: u32,
    pub frames: u32,
    pub positions: u32,
}

impl Extent {
    pub fn new(channels: u32, slices: u32, frames: u32, positions: u32) -> Self {
        Self {
            channels,
            slices,
            frames,
            positions,
        }
    }

    pub fn summary(&self) -> SummaryMetadata {
        SummaryMetadata::with_dimensions(self.channels, self.slices, self.frames, self.positions)
    }

    /// Every coordinate in acquisition order: frame, then position, then the
    /// raster order within the frame.
    pub fn coords(&self, order: RasterOrder) -> Vec<AcquisitionCoordinate> {
        let mut all = Vec::new();
        for t in 0..self.frames {
            for p in 0..self.positions {
                match order {
                    RasterOrder::SliceMajor => {
                        for c in 0..self.channels {
                            for z in 0..self.slices {
                                all.push(AcquisitionCoordinate::new(c, z, t, p));
                            }
                        }
                    }
                    RasterOrder::ChannelMajor => {
                        for z in 0..self.slices {
                            for c in 0..self.channels {
                                all.push(AcquisitionCoordinate::new(c, z, t, p));
                            }
                        }
                    }
                }
            }
        }
        all
    }
}

/// Create a store in `dir` with its summary set.
pub fn create_store(config: StorageConfig, extent: Extent) -> ContainerStore {
    let store = ContainerStore::new(config).expect("valid config");
    store
        .set_summary_metadata(extent.summary())
        .expect("writable store");
    store
}

/// Default test config: small padding so tiny files stay tiny.
pub fn test_config(dir: &Path) -> StorageConfig {
    StorageConfig::new(dir).with_file_padding(0)
}

/// Queue the given coordinates as images.
pub fn put_all<S: PageSource>(
    store: &ContainerStore<S>,
    coords: impl IntoIterator<Item = AcquisitionCoordinate>,
) {
    for c in coords {
        store
            .put_image(image(c.channel, c.slice, c.frame, c.position))
            .expect("put_image");
    }
}

// =============================================================================
// OME-XML Helpers
// =============================================================================

/// Number of `<TiffData>` elements in a document.
pub fn tiff_data_count(document: &str) -> usize {
    document.matches("<TiffData ").count()
}

/// Whether the document has a `<TiffData>` for the plane.
pub fn has_tiff_data(document: &str, c: u32, z: u32, t: u32) -> bool {
    document.contains(&format!(
        "FirstC=\"{}\" FirstZ=\"{}\" FirstT=\"{}\"",
        c, z, t
    ))
}

/// The `SizeT` values of every `<Pixels>` element, in order.
pub fn size_t_values(document: &str) -> Vec<u32> {
    document
        .split("SizeT=\"")
        .skip(1)
        .filter_map(|rest| rest.split('"').next()?.parse().ok())
        .collect()
}

pub fn is_pointer_document(document: &str) -> bool {
    document.contains("<BinaryOnly") && !document.contains("<Image ")
}

// =============================================================================
// In-Memory Page Source
// =============================================================================

/// One in-memory "file".
pub struct MemoryFile {
    file_name: String,
    summary: SummaryMetadata,
    images: RwLock<Vec<ImageRecord>>,
    description: RwLock<Option<String>>,
}

impl MemoryFile {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn description(&self) -> Option<String> {
        self.description.read().unwrap().clone()
    }

    pub fn image_count(&self) -> usize {
        self.images.read().unwrap().len()
    }
}

impl PageReader for MemoryFile {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn image_coords(&self) -> Vec<AcquisitionCoordinate> {
        let mut coords: Vec<_> = self.images.read().unwrap().iter().map(|r| r.coords).collect();
        coords.sort();
        coords
    }

    fn read_image(
        &self,
        coords: &AcquisitionCoordinate,
    ) -> Result<Option<ImageRecord>, StorageError> {
        Ok(self
            .images
            .read()
            .unwrap()
            .iter()
            .find(|r| r.coords == *coords)
            .cloned())
    }

    fn read_tags(&self, coords: &AcquisitionCoordinate) -> Result<Option<ImageTags>, StorageError> {
        Ok(self.read_image(coords)?.map(|r| r.tags))
    }

    fn summary_metadata(&self) -> Option<SummaryMetadata> {
        Some(self.summary.clone())
    }

    fn image_description(&self) -> Result<Option<String>, StorageError> {
        Ok(self.description())
    }
}

/// Writer over a [`MemoryFile`] with a fixed image capacity.
pub struct MemoryPageWriter {
    file: Arc<MemoryFile>,
    uuid: String,
    capacity: usize,
    room_for_metadata: bool,
    geometry: (u32, u32, u32),
    finished: bool,
}

impl PageWriter for MemoryPageWriter {
    type Reader = MemoryFile;

    fn file_name(&self) -> &str {
        &self.file.file_name
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn has_space_to_write(&self, _image: &ImageRecord, _reserved: u64) -> bool {
        !self.finished && self.file.image_count() < self.capacity
    }

    fn has_space_for_full_metadata(&self, _len: usize) -> bool {
        self.room_for_metadata
    }

    fn write_image(&mut self, image: &ImageRecord) -> Result<String, StorageError> {
        if self.finished {
            return Err(StorageError::ReadOnly);
        }
        self.file.images.write().unwrap().push(image.clone());
        Ok(image.coords.label())
    }

    fn write_blank_image(
        &mut self,
        coords: AcquisitionCoordinate,
    ) -> Result<String, StorageError> {
        let (width, height, bytes_per_pixel) = self.geometry;
        let blank = ImageRecord::new(
            coords,
            ImageTags::new(),
            PixelBuffer::blank(width, height, bytes_per_pixel),
        );
        self.write_image(&blank)
    }

    fn finish(&mut self) -> Result<(), StorageError> {
        self.finished = true;
        Ok(())
    }

    fn close(&mut self, metadata: &str) -> Result<(), StorageError> {
        self.finished = true;
        *self.file.description.write().unwrap() = Some(metadata.to_string());
        Ok(())
    }

    fn reader(&self) -> Arc<MemoryFile> {
        Arc::clone(&self.file)
    }

    fn written_coords(&self) -> Vec<AcquisitionCoordinate> {
        self.file.images.read().unwrap().iter().map(|r| r.coords).collect()
    }
}

/// Page source keeping every file in memory, for inspecting what the store
/// hands to its writers.
#[derive(Clone)]
pub struct MemoryPageSource {
    capacity: usize,
    room_for_metadata: bool,
    files: Arc<Mutex<Vec<Arc<MemoryFile>>>>,
}

impl MemoryPageSource {
    pub fn new(capacity: usize, room_for_metadata: bool) -> Self {
        Self {
            capacity,
            room_for_metadata,
            files: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every file created so far, in creation order.
    pub fn files(&self) -> Vec<Arc<MemoryFile>> {
        self.files.lock().unwrap().clone()
    }
}

impl PageSource for MemoryPageSource {
    type Writer = MemoryPageWriter;

    fn create_writer(
        &self,
        _directory: &Path,
        file_name: &str,
        uuid: &str,
        summary: &SummaryMetadata,
        first_image: &ImageRecord,
    ) -> Result<MemoryPageWriter, StorageError> {
        let file = Arc::new(MemoryFile {
            file_name: file_name.to_string(),
            summary: summary.clone(),
            images: RwLock::new(Vec::new()),
            description: RwLock::new(None),
        });
        self.files.lock().unwrap().push(Arc::clone(&file));
        Ok(MemoryPageWriter {
            file,
            uuid: uuid.to_string(),
            capacity: self.capacity,
            room_for_metadata: self.room_for_metadata,
            geometry: (
                first_image.pixels.width(),
                first_image.pixels.height(),
                first_image.pixels.bytes_per_pixel(),
            ),
            finished: false,
        })
    }

    fn fits_in_new_file(&self, _: &SummaryMetadata, _: &ImageRecord, _: u64) -> bool {
        self.capacity > 0
    }
}
