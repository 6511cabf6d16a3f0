//! TIFF header and IFD parsing.
//!
//! Container files are classic TIFF, so only the 8-byte header with 32-bit
//! offsets is understood.
//!
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (42 = 0x002A)
//! Bytes 4-7: Offset to first IFD
//! ```
//!
//! An IFD is a u16 entry count, that many 12-byte entries, then the u32
//! offset of the next IFD (0 for the last one).

use crate::error::TiffError;

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes indicating little-endian byte order ("II" for Intel)
const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;

/// Magic bytes indicating big-endian byte order ("MM" for Motorola)
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

/// Version number for classic TIFF
const VERSION_TIFF: u16 = 42;

/// Size of the TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of one IFD entry: tag, type, count and value/offset.
pub const IFD_ENTRY_SIZE: usize = 12;

const IFD_COUNT_SIZE: usize = 2;
const IFD_NEXT_OFFSET_SIZE: usize = 4;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

impl ByteOrder {
    /// Read a u16 from the first two bytes of `bytes`.
    ///
    /// # Panics
    /// Panics if the slice is shorter than 2 bytes.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    /// Read a u32 from the first four bytes of `bytes`.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse the 8-byte header at the start of a file of `file_size` bytes.
    ///
    /// # Errors
    /// - `FileTooSmall` if fewer than 8 bytes are given
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `InvalidVersion` if the version is not 42 (BigTIFF included)
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        // Both markers are palindromes, so either byte order reads them the same
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        if version != VERSION_TIFF {
            return Err(TiffError::InvalidVersion(version));
        }

        let first_ifd_offset = byte_order.read_u32(&bytes[4..8]) as u64;
        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            first_ifd_offset,
        })
    }
}

// =============================================================================
// IFD
// =============================================================================

/// A single entry of an Image File Directory.
///
/// The value/offset field is kept raw; whether it holds the value itself or
/// an offset to it depends on the field type and count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    /// Numeric tag ID
    pub tag_id: u16,

    /// Decoded field type, `None` if the type is unknown
    pub field_type: Option<FieldType>,

    /// Raw field type value as stored in the file
    pub field_type_raw: u16,

    /// Number of values
    pub count: u32,

    /// Raw bytes of the value/offset field
    pub value_offset_bytes: [u8; 4],

    /// Whether the value is stored inline in `value_offset_bytes`
    pub is_inline: bool,
}

impl IfdEntry {
    /// Total size of the entry's value in bytes, if the field type is known.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .map(|t| t.size_in_bytes() as u64 * self.count as u64)
    }

    /// Interpret the value/offset field as an offset.
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        byte_order.read_u32(&self.value_offset_bytes) as u64
    }

    /// Read a single inline Short or Long value.
    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset_bytes) as u32),
            FieldType::Long => Some(byte_order.read_u32(&self.value_offset_bytes)),
            _ => None,
        }
    }
}

/// A parsed Image File Directory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ifd {
    /// Entries in file order
    pub entries: Vec<IfdEntry>,

    /// Offset of the next IFD, 0 if this is the last one
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Size in bytes of an IFD with `entry_count` entries, including the
    /// count field and the next-IFD offset.
    pub const fn byte_size(entry_count: u16) -> usize {
        IFD_COUNT_SIZE + entry_count as usize * IFD_ENTRY_SIZE + IFD_NEXT_OFFSET_SIZE
    }

    /// Parse an IFD from bytes starting at the entry count field.
    ///
    /// # Errors
    /// - `FileTooSmall` if `bytes` does not hold every declared entry
    pub fn parse(bytes: &[u8], byte_order: ByteOrder) -> Result<Self, TiffError> {
        if bytes.len() < IFD_COUNT_SIZE {
            return Err(TiffError::FileTooSmall {
                required: IFD_COUNT_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_count = byte_order.read_u16(bytes);
        let required = Self::byte_size(entry_count);
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let entries = bytes[IFD_COUNT_SIZE..]
            .chunks_exact(IFD_ENTRY_SIZE)
            .take(entry_count as usize)
            .map(|raw| {
                let field_type_raw = byte_order.read_u16(&raw[2..4]);
                let field_type = FieldType::from_u16(field_type_raw);
                let count = byte_order.read_u32(&raw[4..8]);
                IfdEntry {
                    tag_id: byte_order.read_u16(&raw[0..2]),
                    field_type,
                    field_type_raw,
                    count,
                    value_offset_bytes: [raw[8], raw[9], raw[10], raw[11]],
                    is_inline: field_type.is_some_and(|t| t.fits_inline(count)),
                }
            })
            .collect();

        let next_start = required - IFD_NEXT_OFFSET_SIZE;
        let next_ifd_offset = byte_order.read_u32(&bytes[next_start..]) as u64;

        Ok(Ifd {
            entries,
            next_ifd_offset,
        })
    }

    /// Find the entry for a tag.
    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag_id == tag.as_u16())
    }

    /// Read a single inline numeric tag.
    pub fn get_u32(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(tag)?.inline_u32(byte_order)
    }

    /// Image width in pixels.
    pub fn image_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::ImageWidth, byte_order)
    }

    /// Image height in pixels.
    pub fn image_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::ImageLength, byte_order)
    }

    /// Bits per sample, defaulting to 1 as TIFF does.
    pub fn bits_per_sample(&self, byte_order: ByteOrder) -> u32 {
        self.get_u32(TiffTag::BitsPerSample, byte_order)
            .unwrap_or(1)
    }

    /// Compression scheme, defaulting to uncompressed.
    pub fn compression(&self, byte_order: ByteOrder) -> u32 {
        self.get_u32(TiffTag::Compression, byte_order).unwrap_or(1)
    }
}

// =============================================================================
// Tests
// =============================================================================
