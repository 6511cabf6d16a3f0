//! TIFF tag and field type definitions.
//!
//! The vocabulary shared by the page writer and reader: the field types a
//! container page uses and the tag IDs it carries, including the private
//! Micro-Manager tag that holds per-image JSON.

// =============================================================================
// Field Types
// =============================================================================

/// Field types found in container pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    /// Unsigned 8-bit integer
    Byte = 1,

    /// NUL-terminated 8-bit text
    Ascii = 2,

    /// Unsigned 16-bit integer
    Short = 3,

    /// Unsigned 32-bit integer
    Long = 4,

    /// Two Longs: numerator and denominator
    Rational = 5,

    /// Opaque bytes
    Undefined = 7,
}

impl FieldType {
    /// Bytes in the value/offset field of an IFD entry.
    pub const INLINE_CAPACITY: u64 = 4;

    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::Undefined => 1,
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Rational => 8,
        }
    }

    /// Returns `None` for types container pages never use.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            7 => Some(FieldType::Undefined),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether `count` values of this type fit in the entry itself.
    #[inline]
    pub fn fits_inline(self, count: u32) -> bool {
        self.size_in_bytes() as u64 * count as u64 <= Self::INLINE_CAPACITY
    }
}

// =============================================================================
// TIFF Tags
// =============================================================================

/// TIFF tag IDs written to and read from container pages.
///
/// Pages are single-strip, uncompressed grayscale images. Tags not listed
/// here are ignored during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    // -------------------------------------------------------------------------
    // Basic Image Structure
    // -------------------------------------------------------------------------
    /// Image width in pixels
    ImageWidth = 256,

    /// Image height (length) in pixels
    ImageLength = 257,

    /// Bits per sample (8 or 16)
    BitsPerSample = 258,

    /// Compression scheme used (always 1 when written)
    Compression = 259,

    /// Photometric interpretation (always BlackIsZero when written)
    PhotometricInterpretation = 262,

    /// Description string (carries the metadata document on the first page)
    ImageDescription = 270,

    /// Number of components per pixel
    SamplesPerPixel = 277,

    // -------------------------------------------------------------------------
    // Strip Organization
    // -------------------------------------------------------------------------
    /// Byte offsets of strips
    StripOffsets = 273,

    /// Row count per strip
    RowsPerStrip = 278,

    /// Byte counts of strips
    StripByteCounts = 279,

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------
    /// Pixels per unit in X direction
    XResolution = 282,

    /// Pixels per unit in Y direction
    YResolution = 283,

    /// Unit of resolution (1=none, 2=inch, 3=centimeter)
    ResolutionUnit = 296,

    // -------------------------------------------------------------------------
    // Private
    // -------------------------------------------------------------------------
    /// Per-image JSON tags written by Micro-Manager
    MicroManagerMetadata = 51123,
}

impl TiffTag {
    /// Create a TiffTag from its numeric value.
    ///
    /// Returns `None` for unrecognized tags. Unknown tags are not an error;
    /// they are simply ignored during parsing.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            256 => Some(TiffTag::ImageWidth),
            257 => Some(TiffTag::ImageLength),
            258 => Some(TiffTag::BitsPerSample),
            259 => Some(TiffTag::Compression),
            262 => Some(TiffTag::PhotometricInterpretation),
            270 => Some(TiffTag::ImageDescription),
            273 => Some(TiffTag::StripOffsets),
            277 => Some(TiffTag::SamplesPerPixel),
            278 => Some(TiffTag::RowsPerStrip),
            279 => Some(TiffTag::StripByteCounts),
            282 => Some(TiffTag::XResolution),
            283 => Some(TiffTag::YResolution),
            296 => Some(TiffTag::ResolutionUnit),
            51123 => Some(TiffTag::MicroManagerMetadata),
            _ => None,
        }
    }

    /// Get the numeric tag ID.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// Fixed Values
// =============================================================================

/// Compression value for uncompressed strips, the only kind pages use.
pub const COMPRESSION_NONE: u16 = 1;

/// Photometric interpretation for grayscale pages where zero is black.
pub const PHOTOMETRIC_BLACK_IS_ZERO: u16 = 1;

/// Resolution unit value for centimeters.
pub const RESOLUTION_UNIT_CENTIMETER: u16 = 3;

// =============================================================================
// Tests
// =============================================================================
