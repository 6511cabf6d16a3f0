//! Multipage OME-TIFF container files.
//!
//! Files follow the layout written by Micro-Manager:
//!
//! ```text
//! 0   TIFF header ("II", 42, first IFD offset)
//! 8   index map offset header (54773648) + offset
//! 16  display settings header + offset (unused, 0)
//! 24  comments header + offset (unused, 0)
//! 32  summary metadata header (2355492) + length
//! 40  summary metadata JSON
//!     index map: header (3453623), entry count, entries
//!     IFD, pixels, resolution, image tags JSON   (repeated per image)
//!     metadata document (pointed to by the first IFD's ImageDescription)
//! ```
//!
//! The index map is reserved up front for the file's image capacity. Each
//! 20-byte entry holds `channel, slice, frame, position, ifd offset` and is
//! written only once the page it points to is complete.

mod layout;
mod reader;
mod writer;

pub use layout::{
    IndexEntry, WriterLimits, COMMENTS_OFFSET_HEADER, DISPLAY_SETTINGS_OFFSET_HEADER,
    INDEX_MAP_HEADER, INDEX_MAP_OFFSET_HEADER, SUMMARY_MD_HEADER,
};
pub use reader::TiffPageReader;
pub use writer::TiffPageWriter;
