//! # mmstack
//!
//! Multipage OME-TIFF storage for microscopy acquisitions.
//!
//! This library stores the images of a multi-dimensional acquisition
//! (channel, slice, frame, position) as they arrive, spreading them over as
//! many files as the 4 GiB TIFF limit requires, and embeds one OME-XML
//! document describing the whole dataset when the acquisition finishes.
//!
//! ## Features
//!
//! - **Non-blocking writes**: images are queued and written by one background worker
//! - **Immediate read-back**: queued and written images are readable at once
//! - **Automatic rollover**: new files when size or image-count limits are reached
//! - **Stopped acquisitions**: the last frame is completed with blank pages and
//!   the metadata only declares frames that exist
//! - **Re-open**: finished or interrupted datasets can be opened read-only
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`acquisition`] - Coordinates, pixel buffers, image records and summary metadata
//! - [`storage`] - Container store, file sets, OME metadata and the write queue
//! - [`mod@format`] - The multipage TIFF writer/reader and TIFF structure parsing
//! - [`io`] - Positional file reads
//! - [`config`] - Storage settings and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use mmstack::{
//!     AcquisitionCoordinate, ContainerStore, ImageRecord, ImageTags, PixelBuffer,
//!     StorageConfig, SummaryMetadata,
//! };
//!
//! fn main() -> Result<(), mmstack::StorageError> {
//!     let store = ContainerStore::new(StorageConfig::new("/data/acq_1"))?;
//!     store.set_summary_metadata(SummaryMetadata::with_dimensions(1, 1, 10, 1))?;
//!
//!     for frame in 0..10 {
//!         let pixels = PixelBuffer::gray8(512, 512, vec![0u8; 512 * 512])?;
//!         let coords = AcquisitionCoordinate::new(0, 0, frame, 0);
//!         store.put_image(ImageRecord::new(coords, ImageTags::new(), pixels))?;
//!     }
//!
//!     store.finished()?;
//!     Ok(())
//! }
//! ```

pub mod acquisition;
pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod storage;

// Re-export commonly used types
pub use acquisition::{
    keys, AcquisitionCoordinate, ImageRecord, ImageTags, PixelBuffer, PixelData, RasterOrder,
    SummaryMetadata,
};
pub use config::{Cli, Command, InspectConfig, StorageConfig, SynthConfig};
pub use error::{IoError, StorageError, TiffError};
pub use format::{TiffPageReader, TiffPageWriter, WriterLimits};
pub use io::{FileRangeReader, RangeReader};
pub use storage::{
    ContainerStore, FileSet, FinalMetadata, OmeMetadata, PageReader, PageSource, PageWriter,
    TiffPageSource, WriteExecutor,
};
