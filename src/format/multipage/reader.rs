use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::warn;

use super::layout::{
    IndexEntry, FIXED_HEADER_SIZE, INDEX_ENTRY_SIZE, INDEX_MAP_HEADER, INDEX_MAP_OFFSET_HEADER,
    SUMMARY_MD_HEADER,
};
use crate::acquisition::{AcquisitionCoordinate, ImageRecord, ImageTags, PixelBuffer, SummaryMetadata};
use crate::error::{StorageError, TiffError};
use crate::format::tiff::{
    Ifd, TiffHeader, TiffTag, ValueReader, COMPRESSION_NONE, TIFF_HEADER_SIZE,
};
use crate::io::{FileRangeReader, RangeReader};
use crate::storage::PageReader;

/// Sanity bound on entries per IFD when reading.
const MAX_IFD_ENTRIES: u16 = 4096;

/// Sanity bound when walking the IFD chain.
const MAX_IFDS: usize = 1 << 20;

/// Reads pages from a multipage OME-TIFF file.
///
/// A reader is either opened on an existing file, in which case the index
/// map is loaded from disk, or handed out by a live writer, in which case it
/// shares the writer's in-memory index and sees each page once its write has
/// completed.
pub struct TiffPageReader {
    reader: FileRangeReader,
    file_name: String,
    header: TiffHeader,
    summary: Option<SummaryMetadata>,
    index: Arc<RwLock<HashMap<AcquisitionCoordinate, u64>>>,
}

impl TiffPageReader {
    /// Open an existing file and load its index map.
    ///
    /// # Errors
    /// - `Tiff` if the TIFF header is invalid (BigTIFF included)
    /// - `Tiff(InvalidIndexMap)` if the file lacks the index map headers
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let reader = FileRangeReader::open(path)?;
        let size = reader.size();
        if size < FIXED_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: FIXED_HEADER_SIZE,
                actual: size,
            }
            .into());
        }

        let fixed = reader.read_exact_at(0, FIXED_HEADER_SIZE as usize)?;
        let header = TiffHeader::parse(&fixed[..TIFF_HEADER_SIZE], size)?;
        let bo = header.byte_order;

        if bo.read_u32(&fixed[8..12]) != INDEX_MAP_OFFSET_HEADER {
            return Err(TiffError::InvalidIndexMap("missing index map offset header".into()).into());
        }
        let index_map_offset = bo.read_u32(&fixed[12..16]) as u64;

        let summary = if bo.read_u32(&fixed[32..36]) == SUMMARY_MD_HEADER {
            let len = bo.read_u32(&fixed[36..40]) as usize;
            let json = reader.read_exact_at(FIXED_HEADER_SIZE, len)?;
            match serde_json::from_slice::<SummaryMetadata>(&json) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Unreadable summary metadata");
                    None
                }
            }
        } else {
            None
        };

        let map_header = reader.read_exact_at(index_map_offset, 8)?;
        if bo.read_u32(&map_header[0..4]) != INDEX_MAP_HEADER {
            return Err(TiffError::InvalidIndexMap(format!(
                "no index map at offset {}",
                index_map_offset
            ))
            .into());
        }
        let count = bo.read_u32(&map_header[4..8]) as u64;
        let entries = reader.read_exact_at(index_map_offset + 8, (count * INDEX_ENTRY_SIZE) as usize)?;

        let mut index = HashMap::with_capacity(count as usize);
        for chunk in entries.chunks_exact(INDEX_ENTRY_SIZE as usize) {
            let entry = IndexEntry::decode(chunk, bo);
            if !entry.is_empty() {
                index.insert(entry.coords, entry.ifd_offset as u64);
            }
        }

        Ok(Self {
            reader,
            file_name: file_name_of(path),
            header,
            summary,
            index: Arc::new(RwLock::new(index)),
        })
    }

    /// Reader over a file that is still being written.
    pub(crate) fn live(
        path: &Path,
        header: TiffHeader,
        summary: Option<SummaryMetadata>,
        index: Arc<RwLock<HashMap<AcquisitionCoordinate, u64>>>,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            reader: FileRangeReader::open(path)?,
            file_name: file_name_of(path),
            header,
            summary,
            index,
        })
    }

    pub fn header(&self) -> &TiffHeader {
        &self.header
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    fn ifd_offset(&self, coords: &AcquisitionCoordinate) -> Option<u64> {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(coords)
            .copied()
    }

    /// Read and parse the IFD at `offset`.
    pub fn read_ifd(&self, offset: u64) -> Result<Ifd, TiffError> {
        let count_bytes = self.reader.read_exact_at(offset, 2)?;
        let entry_count = self.header.byte_order.read_u16(&count_bytes);
        if entry_count > MAX_IFD_ENTRIES {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let ifd_bytes = self.reader.read_exact_at(offset, Ifd::byte_size(entry_count))?;
        Ifd::parse(&ifd_bytes, self.header.byte_order)
    }

    /// Offsets of every IFD reachable from the header, in chain order.
    pub fn ifd_chain(&self) -> Result<Vec<u64>, TiffError> {
        let mut offsets = Vec::new();
        let mut offset = self.header.first_ifd_offset;
        while offset != 0 && offsets.len() < MAX_IFDS {
            let ifd = self.read_ifd(offset)?;
            offsets.push(offset);
            offset = ifd.next_ifd_offset;
        }
        Ok(offsets)
    }

    fn tags_from_ifd(&self, ifd: &Ifd) -> Result<ImageTags, StorageError> {
        let values = ValueReader::new(&self.reader, self.header.byte_order);
        let entry = ifd
            .get_entry_by_tag(TiffTag::MicroManagerMetadata)
            .ok_or(TiffError::MissingTag("MicroManagerMetadata"))?;
        let json = values.read_string(entry)?;
        match serde_json::from_str::<serde_json::Value>(&json)? {
            serde_json::Value::Object(tags) => Ok(tags),
            _ => Err(StorageError::Metadata(
                "image tags are not a JSON object".to_string(),
            )),
        }
    }

    fn pixels_from_ifd(&self, ifd: &Ifd) -> Result<PixelBuffer, StorageError> {
        let bo = self.header.byte_order;
        let compression = ifd.compression(bo) as u16;
        if compression != COMPRESSION_NONE {
            return Err(TiffError::UnsupportedCompression(compression).into());
        }

        let width = ifd
            .image_width(bo)
            .ok_or(TiffError::MissingTag("ImageWidth"))?;
        let height = ifd
            .image_height(bo)
            .ok_or(TiffError::MissingTag("ImageLength"))?;

        let values = ValueReader::new(&self.reader, self.header.byte_order);
        let offset_entry = ifd
            .get_entry_by_tag(TiffTag::StripOffsets)
            .ok_or(TiffError::MissingTag("StripOffsets"))?;
        let count_entry = ifd
            .get_entry_by_tag(TiffTag::StripByteCounts)
            .ok_or(TiffError::MissingTag("StripByteCounts"))?;
        let strip_offset = values.read_u32(offset_entry)? as u64;
        let strip_len = values.read_u32(count_entry)?;

        let bytes = self.reader.read_exact_at(strip_offset, strip_len as usize)?;
        PixelBuffer::from_raw(width, height, ifd.bits_per_sample(bo), bytes, bo)
    }
}

impl PageReader for TiffPageReader {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn image_coords(&self) -> Vec<AcquisitionCoordinate> {
        let mut coords: Vec<_> = self
            .index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        coords.sort();
        coords
    }

    fn read_image(
        &self,
        coords: &AcquisitionCoordinate,
    ) -> Result<Option<ImageRecord>, StorageError> {
        let Some(offset) = self.ifd_offset(coords) else {
            return Ok(None);
        };
        let ifd = self.read_ifd(offset)?;
        let pixels = self.pixels_from_ifd(&ifd)?;
        let tags = self.tags_from_ifd(&ifd)?;
        Ok(Some(ImageRecord::from_parts(*coords, tags, pixels)))
    }

    fn read_tags(&self, coords: &AcquisitionCoordinate) -> Result<Option<ImageTags>, StorageError> {
        let Some(offset) = self.ifd_offset(coords) else {
            return Ok(None);
        };
        let ifd = self.read_ifd(offset)?;
        self.tags_from_ifd(&ifd).map(Some)
    }

    fn summary_metadata(&self) -> Option<SummaryMetadata> {
        self.summary.clone()
    }

    fn image_description(&self) -> Result<Option<String>, StorageError> {
        if self.reader.size() <= self.header.first_ifd_offset {
            return Ok(None);
        }
        let ifd = self.read_ifd(self.header.first_ifd_offset)?;
        let Some(entry) = ifd.get_entry_by_tag(TiffTag::ImageDescription) else {
            return Ok(None);
        };
        if entry.count == 0 {
            return Ok(None);
        }
        let values = ValueReader::new(&self.reader, self.header.byte_order);
        Ok(Some(values.read_string(entry)?))
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
