use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::layout::{
    align2, ifd_size, IndexEntry, WriterLimits, COMMENTS_OFFSET_HEADER,
    DISPLAY_SETTINGS_OFFSET_HEADER, ENTRIES_PER_IFD, FIXED_HEADER_SIZE, INDEX_ENTRY_SIZE,
    INDEX_MAP_HEADER, INDEX_MAP_OFFSET_HEADER, RESOLUTION_BYTES, SUMMARY_MD_HEADER,
};
use super::reader::TiffPageReader;
use crate::acquisition::{
    keys, AcquisitionCoordinate, ImageRecord, ImageTags, PixelBuffer, SummaryMetadata,
};
use crate::error::StorageError;
use crate::format::tiff::{
    ByteOrder, FieldType, TiffHeader, TiffTag, PHOTOMETRIC_BLACK_IS_ZERO,
    RESOLUTION_UNIT_CENTIMETER,
};
use crate::storage::PageWriter;

/// Offset of the ImageDescription entry within the first IFD.
///
/// Entries are sorted by tag; ImageDescription (270) follows
/// ImageWidth, ImageLength, BitsPerSample, Compression and Photometric.
const DESCRIPTION_ENTRY_INDEX: u64 = 5;

/// Offsets of the fixed header, index map and first IFD of a new file.
struct HeaderLayout {
    index_capacity: u32,
    index_map_offset: u64,
    index_entries_offset: u64,
    first_ifd_offset: u64,
}

impl HeaderLayout {
    fn new(summary_len: u64, template: &PixelBuffer, limits: WriterLimits) -> Self {
        let footprint = template.byte_len() + ifd_size(ENTRIES_PER_IFD) + RESOLUTION_BYTES;
        let index_capacity = limits.index_capacity(footprint);
        let index_map_offset = FIXED_HEADER_SIZE + summary_len;
        let index_entries_offset = index_map_offset + 8;
        let first_ifd_offset =
            align2(index_entries_offset + index_capacity as u64 * INDEX_ENTRY_SIZE);
        Self {
            index_capacity,
            index_map_offset,
            index_entries_offset,
            first_ifd_offset,
        }
    }
}

/// Bytes taken by the first page, which also carries ImageDescription.
fn first_page_size(image: &ImageRecord, tags_len: u64) -> u64 {
    ifd_size(ENTRIES_PER_IFD + 1) + image.pixels.byte_len() + RESOLUTION_BYTES + tags_len + 2
}

/// Writes one multipage OME-TIFF file.
///
/// Each page is assembled in memory and written with a single call. The
/// previous page's next-IFD pointer and the index map entry are patched only
/// after the page is on disk, so both the IFD chain and the index always
/// describe complete pages.
pub struct TiffPageWriter {
    file: File,
    path: PathBuf,
    file_name: String,
    uuid: String,
    limits: WriterLimits,

    /// Offset of the first index map entry.
    index_entries_offset: u64,
    index_capacity: u32,
    index: Arc<RwLock<HashMap<AcquisitionCoordinate, u64>>>,
    written: Vec<AcquisitionCoordinate>,

    file_position: u64,
    last_next_ifd_pointer: Option<u64>,
    description_entry: Option<u64>,
    geometry: (u32, u32, u32),

    reader: Arc<TiffPageReader>,
    finished: bool,
    closed: bool,
}

impl TiffPageWriter {
    /// Create the file and write its fixed header, summary and empty index.
    ///
    /// `template` fixes the geometry used to size the index map and to
    /// synthesize blank pages.
    pub fn create(
        directory: &Path,
        file_name: &str,
        uuid: &str,
        summary: &SummaryMetadata,
        template: &PixelBuffer,
        limits: WriterLimits,
    ) -> Result<Self, StorageError> {
        let path = directory.join(file_name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let summary_json = serde_json::to_vec(summary)?;
        let HeaderLayout {
            index_capacity,
            index_map_offset,
            index_entries_offset,
            first_ifd_offset,
        } = HeaderLayout::new(summary_json.len() as u64, template, limits);

        let mut header = Vec::with_capacity(index_entries_offset as usize);
        header.extend_from_slice(b"II");
        header.extend_from_slice(&42u16.to_le_bytes());
        header.extend_from_slice(&(first_ifd_offset as u32).to_le_bytes());
        header.extend_from_slice(&INDEX_MAP_OFFSET_HEADER.to_le_bytes());
        header.extend_from_slice(&(index_map_offset as u32).to_le_bytes());
        header.extend_from_slice(&DISPLAY_SETTINGS_OFFSET_HEADER.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&COMMENTS_OFFSET_HEADER.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&SUMMARY_MD_HEADER.to_le_bytes());
        header.extend_from_slice(&(summary_json.len() as u32).to_le_bytes());
        header.extend_from_slice(&summary_json);
        header.extend_from_slice(&INDEX_MAP_HEADER.to_le_bytes());
        header.extend_from_slice(&index_capacity.to_le_bytes());
        file.write_all(&header)?;
        // Reserve the zeroed index map so readers of a partial file see empty slots.
        file.set_len(first_ifd_offset)?;

        let index = Arc::new(RwLock::new(HashMap::new()));
        let tiff_header = TiffHeader {
            byte_order: ByteOrder::LittleEndian,
            first_ifd_offset,
        };
        let reader = Arc::new(TiffPageReader::live(
            &path,
            tiff_header,
            Some(summary.clone()),
            Arc::clone(&index),
        )?);

        debug!(
            file = %file_name,
            index_capacity,
            first_ifd_offset,
            "Created page file"
        );

        Ok(Self {
            file,
            path,
            file_name: file_name.to_string(),
            uuid: uuid.to_string(),
            limits,
            index_entries_offset,
            index_capacity,
            index,
            written: Vec::new(),
            file_position: first_ifd_offset,
            last_next_ifd_pointer: None,
            description_entry: None,
            geometry: (
                template.width(),
                template.height(),
                template.bytes_per_pixel(),
            ),
            reader,
            finished: false,
            closed: false,
        })
    }

    /// Whether `image` would fit as the first page of a new file.
    ///
    /// Uses the same arithmetic as [`create`](Self::create) followed by
    /// `has_space_to_write`, without touching the disk.
    pub fn fits_in_empty_file(
        summary: &SummaryMetadata,
        image: &ImageRecord,
        reserved: u64,
        limits: WriterLimits,
    ) -> bool {
        let summary_len = serde_json::to_vec(summary).map_or(0, |v| v.len() as u64);
        let layout = HeaderLayout::new(summary_len, &image.pixels, limits);
        if layout.index_capacity == 0 {
            return false;
        }
        let tags_len = serde_json::to_vec(&image.tags).map_or(0, |v| v.len() as u64);
        let end = layout.first_ifd_offset
            + first_page_size(image, tags_len)
            + limits.padding
            + reserved;
        end < limits.max_file_size
    }

    /// Full path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maximum number of images this file can index.
    pub fn index_capacity(&self) -> u32 {
        self.index_capacity
    }

    /// Bytes written so far.
    pub fn file_position(&self) -> u64 {
        self.file_position
    }

    fn entries_for_next_page(&self) -> u16 {
        if self.written.is_empty() {
            ENTRIES_PER_IFD + 1
        } else {
            ENTRIES_PER_IFD
        }
    }

    fn page_size(&self, image: &ImageRecord, tags_len: u64) -> u64 {
        ifd_size(self.entries_for_next_page())
            + image.pixels.byte_len()
            + RESOLUTION_BYTES
            + tags_len
            + 2
    }

    fn pwrite(&mut self, offset: u64, bytes: &[u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn write_page(&mut self, image: &ImageRecord) -> Result<String, StorageError> {
        if self.finished {
            return Err(StorageError::ReadOnly);
        }

        let tags_json = serde_json::to_vec(&image.tags)?;
        let ifd_offset = align2(self.file_position);
        let page = build_page(
            image,
            &tags_json,
            ifd_offset,
            self.entries_for_next_page() > ENTRIES_PER_IFD,
        );
        let is_first = self.written.is_empty();

        self.pwrite(ifd_offset, &page)?;

        if let Some(pointer) = self.last_next_ifd_pointer {
            self.pwrite(pointer, &(ifd_offset as u32).to_le_bytes())?;
        }
        let entry_count = self.entries_for_next_page() as u64;
        self.last_next_ifd_pointer = Some(ifd_offset + 2 + 12 * entry_count);
        if is_first {
            self.description_entry = Some(ifd_offset + 2 + 12 * DESCRIPTION_ENTRY_INDEX);
        }

        let slot = self.written.len() as u64;
        let entry = IndexEntry {
            coords: image.coords,
            ifd_offset: ifd_offset as u32,
        };
        self.pwrite(
            self.index_entries_offset + slot * INDEX_ENTRY_SIZE,
            &entry.encode(),
        )?;

        self.file_position = ifd_offset + page.len() as u64;
        self.written.push(image.coords);
        self.index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(image.coords, ifd_offset);

        Ok(image.coords.label())
    }
}

impl PageWriter for TiffPageWriter {
    type Reader = TiffPageReader;

    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn has_space_to_write(&self, image: &ImageRecord, reserved: u64) -> bool {
        if self.finished || self.written.len() as u64 >= self.index_capacity as u64 {
            return false;
        }
        let tags_len = serde_json::to_vec(&image.tags).map_or(0, |v| v.len() as u64);
        let end = align2(self.file_position)
            + self.page_size(image, tags_len)
            + self.limits.padding
            + reserved;
        end < self.limits.max_file_size
    }

    fn has_space_for_full_metadata(&self, len: usize) -> bool {
        align2(self.file_position) + len as u64 + 1 + self.limits.padding
            < self.limits.max_file_size
    }

    fn write_image(&mut self, image: &ImageRecord) -> Result<String, StorageError> {
        self.write_page(image)
    }

    fn write_blank_image(
        &mut self,
        coords: AcquisitionCoordinate,
    ) -> Result<String, StorageError> {
        let (width, height, bytes_per_pixel) = self.geometry;
        let mut tags = ImageTags::new();
        tags.insert(keys::FILE_NAME.into(), self.file_name.clone().into());
        let blank = ImageRecord::new(
            coords,
            tags,
            PixelBuffer::blank(width, height, bytes_per_pixel),
        );
        self.write_page(&blank)
    }

    fn finish(&mut self) -> Result<(), StorageError> {
        if self.finished {
            return Ok(());
        }
        let count = self.written.len() as u32;
        self.pwrite(self.index_entries_offset - 4, &count.to_le_bytes())?;
        self.file.flush()?;
        self.finished = true;
        debug!(file = %self.file_name, images = count, "Finished page file");
        Ok(())
    }

    fn close(&mut self, metadata: &str) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        self.finish()?;

        if let Some(entry_offset) = self.description_entry {
            let mut blob = metadata.as_bytes().to_vec();
            blob.push(0);
            let count = blob.len() as u32;

            let value = if FieldType::Ascii.fits_inline(count) {
                let mut inline = [0u8; 4];
                inline[..blob.len()].copy_from_slice(&blob);
                inline
            } else {
                let offset = align2(self.file_position);
                self.pwrite(offset, &blob)?;
                self.file_position = offset + blob.len() as u64;
                (offset as u32).to_le_bytes()
            };

            let mut entry = Vec::with_capacity(12);
            entry.extend_from_slice(&TiffTag::ImageDescription.as_u16().to_le_bytes());
            entry.extend_from_slice(&FieldType::Ascii.as_u16().to_le_bytes());
            entry.extend_from_slice(&count.to_le_bytes());
            entry.extend_from_slice(&value);
            self.pwrite(entry_offset, &entry)?;
        }

        self.file.set_len(self.file_position)?;
        self.file.sync_all()?;
        self.closed = true;
        Ok(())
    }

    fn reader(&self) -> Arc<TiffPageReader> {
        Arc::clone(&self.reader)
    }

    fn written_coords(&self) -> Vec<AcquisitionCoordinate> {
        self.written.clone()
    }
}

// =============================================================================
// Page Encoding
// =============================================================================

fn push_entry(buf: &mut Vec<u8>, tag: TiffTag, field_type: FieldType, count: u32, value: [u8; 4]) {
    buf.extend_from_slice(&tag.as_u16().to_le_bytes());
    buf.extend_from_slice(&field_type.as_u16().to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    buf.extend_from_slice(&value);
}

fn short(v: u16) -> [u8; 4] {
    let b = v.to_le_bytes();
    [b[0], b[1], 0, 0]
}

fn long(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

/// Pixels per centimeter as a rational, from the `PixelSizeUm` tag.
fn resolution(tags: &ImageTags) -> (u32, u32) {
    match tags.get("PixelSizeUm").and_then(|v| v.as_f64()) {
        Some(um) if um > 0.0 => {
            let denominator = (um * 100.0).round().max(1.0) as u32;
            (1_000_000, denominator)
        }
        _ => (1, 1),
    }
}

/// Encode one page: IFD, pixel strip, resolution rationals and tag JSON.
fn build_page(
    image: &ImageRecord,
    tags_json: &[u8],
    ifd_offset: u64,
    with_description: bool,
) -> Vec<u8> {
    let entries = if with_description {
        ENTRIES_PER_IFD + 1
    } else {
        ENTRIES_PER_IFD
    };
    let pixels = image.pixels.to_le_bytes();
    let pixel_offset = ifd_offset + ifd_size(entries);
    let resolution_offset = pixel_offset + pixels.len() as u64;
    let tags_offset = resolution_offset + RESOLUTION_BYTES;
    let tags_count = tags_json.len() as u32 + 1;

    let mut page = Vec::with_capacity(
        (ifd_size(entries) + pixels.len() as u64 + RESOLUTION_BYTES) as usize + tags_json.len() + 2,
    );
    page.extend_from_slice(&entries.to_le_bytes());

    let width = image.pixels.width();
    let height = image.pixels.height();
    push_entry(&mut page, TiffTag::ImageWidth, FieldType::Long, 1, long(width));
    push_entry(&mut page, TiffTag::ImageLength, FieldType::Long, 1, long(height));
    push_entry(
        &mut page,
        TiffTag::BitsPerSample,
        FieldType::Short,
        1,
        short(image.pixels.bits_per_sample()),
    );
    push_entry(&mut page, TiffTag::Compression, FieldType::Short, 1, short(1));
    push_entry(
        &mut page,
        TiffTag::PhotometricInterpretation,
        FieldType::Short,
        1,
        short(PHOTOMETRIC_BLACK_IS_ZERO),
    );
    if with_description {
        // Filled in by close().
        push_entry(&mut page, TiffTag::ImageDescription, FieldType::Ascii, 0, [0; 4]);
    }
    push_entry(
        &mut page,
        TiffTag::StripOffsets,
        FieldType::Long,
        1,
        long(pixel_offset as u32),
    );
    push_entry(&mut page, TiffTag::SamplesPerPixel, FieldType::Short, 1, short(1));
    push_entry(&mut page, TiffTag::RowsPerStrip, FieldType::Long, 1, long(height));
    push_entry(
        &mut page,
        TiffTag::StripByteCounts,
        FieldType::Long,
        1,
        long(pixels.len() as u32),
    );
    push_entry(
        &mut page,
        TiffTag::XResolution,
        FieldType::Rational,
        1,
        long(resolution_offset as u32),
    );
    push_entry(
        &mut page,
        TiffTag::YResolution,
        FieldType::Rational,
        1,
        long(resolution_offset as u32 + 8),
    );
    push_entry(
        &mut page,
        TiffTag::ResolutionUnit,
        FieldType::Short,
        1,
        short(RESOLUTION_UNIT_CENTIMETER),
    );
    let tags_value = if FieldType::Ascii.fits_inline(tags_count) {
        let mut inline = [0u8; 4];
        inline[..tags_json.len()].copy_from_slice(tags_json);
        inline
    } else {
        long(tags_offset as u32)
    };
    push_entry(
        &mut page,
        TiffTag::MicroManagerMetadata,
        FieldType::Ascii,
        tags_count,
        tags_value,
    );
    page.extend_from_slice(&0u32.to_le_bytes());

    page.extend_from_slice(&pixels);

    let (num, den) = resolution(&image.tags);
    for _ in 0..2 {
        page.extend_from_slice(&num.to_le_bytes());
        page.extend_from_slice(&den.to_le_bytes());
    }

    page.extend_from_slice(tags_json);
    page.push(0);
    if page.len() % 2 == 1 {
        page.push(0);
    }
    page
}
