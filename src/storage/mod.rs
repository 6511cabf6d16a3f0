//! Dataset storage.
//!
//! This module ties the page writers to the acquisition model:
//!
//! - [`ContainerStore`]: public entry point; queues writes and serves reads
//! - [`FileSet`]: the files of one position, with rollover and repair of
//!   stopped acquisitions
//! - [`OmeMetadata`]: the OME-XML document accumulated while writing
//! - [`WriteExecutor`]: the single background worker every write runs on
//! - [`PageSource`] / [`PageWriter`] / [`PageReader`]: the seam between the
//!   store and a file format
//!
//! # Threading
//!
//! Producers call [`ContainerStore::put_image`] from any thread. Writes and
//! all metadata bookkeeping happen on one worker thread in submission order,
//! so the accumulator and file sets need no locking of their own.

mod executor;
mod file_set;
mod metadata_file;
mod ome;
mod page;
mod store;
mod tiff_source;

pub use executor::WriteExecutor;
pub use file_set::{FileSet, FinalMetadata, WriteOutcome, IMAGE_FILE_EXTENSION};
pub use metadata_file::{MetadataFile, METADATA_FILE_SUFFIX};
pub use ome::{OmeMetadata, PlaneKey, TiffDataEntry, OME_NAMESPACE};
pub use page::{PageReader, PageSource, PageWriter};
pub use store::{ContainerStore, OME_SIDE_FILE_NAME};
pub use tiff_source::TiffPageSource;
