//! Acquisition data model.
//!
//! Types describing what the acquisition engine hands to the store:
//!
//! - [`AcquisitionCoordinate`] - the (channel, slice, frame, position) key of an image
//! - [`PixelBuffer`] - 8-bit or 16-bit grayscale pixels, resolved once at ingestion
//! - [`ImageRecord`] - pixels plus their free-form JSON tags
//! - [`SummaryMetadata`] - acquisition-wide settings shared by every file

mod coords;
mod pixels;
mod record;
mod summary;

pub use coords::{AcquisitionCoordinate, RasterOrder};
pub use pixels::{PixelBuffer, PixelData};
pub use record::{keys, ImageRecord, ImageTags};
pub use summary::SummaryMetadata;
