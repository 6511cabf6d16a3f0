//! TIFF primitives.
//!
//! # Key Concepts
//!
//! - **Byte order**: TIFF files declare their endianness (II = little-endian, MM = big-endian)
//!   in the header. All multi-byte values must be read respecting this order.
//!
//! - **Classic TIFF only**: offsets are 32 bits wide, which caps a container
//!   file at 4 GiB. BigTIFF headers are rejected.
//!
//! - **IFD (Image File Directory)**: Contains metadata and pointers to image data.
//!   Container files hold one IFD per image.
//!
//! - **Inline vs offset values**: Small values are stored inline in the IFD entry,
//!   larger values are stored at an offset pointed to by the entry.

mod parser;
mod tags;
mod values;

pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, IFD_ENTRY_SIZE, TIFF_HEADER_SIZE};
pub use tags::{
    FieldType, TiffTag, COMPRESSION_NONE, PHOTOMETRIC_BLACK_IS_ZERO, RESOLUTION_UNIT_CENTIMETER,
};
pub use values::ValueReader;
