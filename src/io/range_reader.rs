use bytes::Bytes;

use crate::error::IoError;

/// Trait for reading byte ranges from a container file.
///
/// This abstraction allows the TIFF parser and the page reader to work
/// without loading whole files. Implementations must be thread-safe, since
/// readers are shared between the write worker and callers.
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the current size of the resource in bytes.
    ///
    /// Files that are still being written may grow between calls.
    fn size(&self) -> u64;

    /// Get a unique identifier for this resource (for logging).
    fn identifier(&self) -> &str;
}
