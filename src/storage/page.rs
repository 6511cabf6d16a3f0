//! Page writer seam.
//!
//! The store never touches file bytes itself. It asks a [`PageSource`] for a
//! [`PageWriter`] per file, and reads images back through the writer's
//! [`PageReader`]. The crate ships one implementation,
//! [`crate::storage::TiffPageSource`], producing multipage OME-TIFF files.

use std::path::Path;
use std::sync::Arc;

use crate::acquisition::{AcquisitionCoordinate, ImageRecord, ImageTags, SummaryMetadata};
use crate::error::StorageError;

// =============================================================================
// PageReader Trait
// =============================================================================

/// Read access to the images stored in one file.
///
/// A reader obtained from a live writer sees every image whose write has
/// completed, and never a partially written one.
pub trait PageReader: Send + Sync {
    /// File name (without directory) of the underlying file.
    fn file_name(&self) -> &str;

    /// Coordinates of every completed image in this file.
    fn image_coords(&self) -> Vec<AcquisitionCoordinate>;

    /// Read an image, or `None` if this file does not hold it.
    fn read_image(
        &self,
        coords: &AcquisitionCoordinate,
    ) -> Result<Option<ImageRecord>, StorageError>;

    /// Read only an image's tags.
    fn read_tags(&self, coords: &AcquisitionCoordinate) -> Result<Option<ImageTags>, StorageError>;

    /// Summary metadata embedded in the file, if any.
    fn summary_metadata(&self) -> Option<SummaryMetadata>;

    /// Metadata blob stored when the file was closed, if any.
    fn image_description(&self) -> Result<Option<String>, StorageError>;
}

// =============================================================================
// PageWriter Trait
// =============================================================================

/// Append-only writer for one file.
///
/// Callers must check [`has_space_to_write`](PageWriter::has_space_to_write)
/// before each write, and [`finish`](PageWriter::finish) before
/// [`close`](PageWriter::close).
pub trait PageWriter: Send {
    /// The reader type handed out by [`reader`](PageWriter::reader).
    type Reader: PageReader + 'static;

    /// File name (without directory) of the file being written.
    fn file_name(&self) -> &str;

    /// `urn:uuid:` identifier assigned to this file.
    fn uuid(&self) -> &str;

    /// Whether `image` fits while leaving `reserved` bytes for metadata.
    fn has_space_to_write(&self, image: &ImageRecord, reserved: u64) -> bool;

    /// Whether a metadata blob of `len` bytes still fits in this file.
    fn has_space_for_full_metadata(&self, len: usize) -> bool;

    /// Append an image, returning its coordinate label.
    fn write_image(&mut self, image: &ImageRecord) -> Result<String, StorageError>;

    /// Append an all-zero image with this file's geometry.
    fn write_blank_image(&mut self, coords: AcquisitionCoordinate)
        -> Result<String, StorageError>;

    /// Stop accepting images and finalize the file's image index.
    fn finish(&mut self) -> Result<(), StorageError>;

    /// Embed the metadata blob and release the file.
    fn close(&mut self, metadata: &str) -> Result<(), StorageError>;

    /// Shared reader over this file.
    fn reader(&self) -> Arc<Self::Reader>;

    /// Coordinates of every image written so far, in write order.
    fn written_coords(&self) -> Vec<AcquisitionCoordinate>;
}

// =============================================================================
// PageSource Trait
// =============================================================================

/// Factory for page writers.
///
/// This abstraction lets the store run against something other than the
/// bundled TIFF format, e.g. an in-memory writer in tests.
pub trait PageSource: Send + 'static {
    /// The writer type this source creates.
    type Writer: PageWriter;

    /// Create a new file `file_name` in `directory`.
    ///
    /// `first_image` is the image about to be written; writers may size
    /// their internal structures from it.
    fn create_writer(
        &self,
        directory: &Path,
        file_name: &str,
        uuid: &str,
        summary: &SummaryMetadata,
        first_image: &ImageRecord,
    ) -> Result<Self::Writer, StorageError>;

    /// Whether `image` would fit in a freshly created, empty file while
    /// leaving `reserved` bytes for metadata.
    ///
    /// Checked before the current file is finished, so an image that can
    /// never be stored does not end a file early.
    fn fits_in_new_file(
        &self,
        summary: &SummaryMetadata,
        image: &ImageRecord,
        reserved: u64,
    ) -> bool;
}
