//! File formats.
//!
//! - [`tiff`] - generic TIFF header, IFD and tag value parsing
//! - [`multipage`] - the multipage OME-TIFF container layout built on top of it

pub mod multipage;
pub mod tiff;

pub use multipage::{TiffPageReader, TiffPageWriter, WriterLimits};
