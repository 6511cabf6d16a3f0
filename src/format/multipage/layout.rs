use crate::acquisition::AcquisitionCoordinate;
use crate::format::tiff::{ByteOrder, Ifd};

// =============================================================================
// Header Constants
// =============================================================================

/// Marks the index map offset slot at byte 8.
pub const INDEX_MAP_OFFSET_HEADER: u32 = 54_773_648;

/// Marks the start of the index map.
pub const INDEX_MAP_HEADER: u32 = 3_453_623;

/// Marks the summary metadata slot at byte 32.
pub const SUMMARY_MD_HEADER: u32 = 2_355_492;

/// Marks the display settings slot at byte 16.
pub const DISPLAY_SETTINGS_OFFSET_HEADER: u32 = 483_765_892;

/// Marks the comments slot at byte 24.
pub const COMMENTS_OFFSET_HEADER: u32 = 99_384_722;

/// Bytes before the summary JSON.
pub const FIXED_HEADER_SIZE: u64 = 40;

/// Bytes per index map entry.
pub const INDEX_ENTRY_SIZE: u64 = 20;

/// Upper bound on reserved index map entries per file.
pub const MAX_INDEX_ENTRIES: u32 = 65_536;

/// IFD entries on every page.
pub const ENTRIES_PER_IFD: u16 = 13;

/// Bytes of X and Y resolution rationals following the pixels.
pub const RESOLUTION_BYTES: u64 = 16;

/// Size of a classic TIFF IFD with `entries` entries.
pub const fn ifd_size(entries: u16) -> u64 {
    Ifd::byte_size(entries) as u64
}

/// Round up to the TIFF word boundary.
pub const fn align2(pos: u64) -> u64 {
    pos + (pos & 1)
}

// =============================================================================
// Limits
// =============================================================================

/// Capacity limits applied to every file a writer creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterLimits {
    /// Hard ceiling on file size; classic TIFF offsets are 32-bit.
    pub max_file_size: u64,

    /// Optional cap on images per file.
    pub max_images_per_file: Option<u32>,

    /// Bytes kept free at the end of every file.
    pub padding: u64,
}

impl WriterLimits {
    /// Number of index entries to reserve for images of `footprint` bytes.
    pub fn index_capacity(&self, footprint: u64) -> u32 {
        let by_size = self.max_file_size / footprint.max(1);
        let by_size = u32::try_from(by_size).unwrap_or(u32::MAX);
        let capacity = self
            .max_images_per_file
            .map_or(by_size, |cap| cap.min(by_size));
        capacity.clamp(1, MAX_INDEX_ENTRIES)
    }
}

// =============================================================================
// Index Map Entries
// =============================================================================

/// One index map entry: where the page for a coordinate starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub coords: AcquisitionCoordinate,
    pub ifd_offset: u32,
}

impl IndexEntry {
    pub fn encode(&self) -> [u8; INDEX_ENTRY_SIZE as usize] {
        let mut out = [0u8; INDEX_ENTRY_SIZE as usize];
        let c = &self.coords;
        for (i, v) in [c.channel, c.slice, c.frame, c.position, self.ifd_offset]
            .iter()
            .enumerate()
        {
            out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Decode an entry; `bytes` must hold at least 20 bytes.
    pub fn decode(bytes: &[u8], byte_order: ByteOrder) -> Self {
        let field = |i: usize| byte_order.read_u32(&bytes[i * 4..i * 4 + 4]);
        Self {
            coords: AcquisitionCoordinate::new(field(0), field(1), field(2), field(3)),
            ifd_offset: field(4),
        }
    }

    /// Unused slots are all zeros; no page can start at offset 0.
    pub fn is_empty(&self) -> bool {
        self.ifd_offset == 0
    }
}
