use thiserror::Error;

/// I/O errors that can occur when reading or writing container files
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error reported by the operating system
    #[error("I/O error: {0}")]
    Io(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File or directory not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::Io(err.to_string()),
        }
    }
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (classic TIFF), got {0}")]
    InvalidVersion(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only uncompressed pages are supported)")]
    UnsupportedCompression(u16),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// The file does not carry a valid image index map
    #[error("Invalid index map: {0}")]
    InvalidIndexMap(String),
}

/// Errors reported by the container store and its page writers
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// I/O error while reading or writing a container file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF structure error while reading a container file
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// The store has been finished (or was opened read-only) and accepts no more images
    #[error("Attempted to modify read-only storage")]
    ReadOnly,

    /// Image tags lack or mistype a field needed for bookkeeping
    #[error("Malformed image tags: missing or invalid \"{field}\"")]
    MalformedTags { field: &'static str },

    /// Pixel buffer does not match its declared dimensions
    #[error("Invalid pixel buffer: expected {expected} samples for {width}x{height}, got {actual}")]
    InvalidPixels {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    /// Image does not fit even in a freshly created file
    #[error("Image of {bytes} bytes does not fit in an empty file of at most {max_file_size} bytes")]
    ImageTooLarge { bytes: u64, max_file_size: u64 },

    /// Metadata document could not be produced or parsed
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Storage configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The background writer has already shut down
    #[error("Write queue has shut down")]
    WriterShutdown,

    /// The background writer thread panicked
    #[error("Write worker panicked")]
    WorkerPanicked,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(IoError::from(err))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Metadata(err.to_string())
    }
}
