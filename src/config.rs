//! Configuration for mmstack.
//!
//! This module provides:
//! - [`StorageConfig`]: how a [`ContainerStore`](crate::ContainerStore) lays
//!   out its files, built with `with_*` methods
//! - [`Cli`]: command-line arguments for the `mmstack` binary via clap
//!
//! # Example
//!
//! ```rust,no_run
//! use mmstack::config::StorageConfig;
//!
//! let config = StorageConfig::new("/data/acq_1")
//!     .with_split_by_position(true)
//!     .with_max_images_per_file(Some(500));
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Environment Variables
//!
//! CLI options can also be set with the `MMSTACK_` prefix:
//!
//! - `MMSTACK_MAX_IMAGES_PER_FILE` - Cap on images per file
//! - `MMSTACK_MAX_FILE_SIZE` - File size ceiling in bytes (default: 4 GiB)
//! - `MMSTACK_METADATA_FILE` - Also write a `_metadata.txt` sidecar
//! - `MMSTACK_NO_SPLIT` - Keep all positions in one file set

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::acquisition::RasterOrder;

// =============================================================================
// Default Values
// =============================================================================

/// Largest file a classic TIFF can address (32-bit offsets).
pub const MAX_TIFF_FILE_SIZE: u64 = 1 << 32;

/// Default ceiling on file size.
pub const DEFAULT_MAX_FILE_SIZE: u64 = MAX_TIFF_FILE_SIZE;

/// Default free space kept at the end of every file (5 MB).
pub const DEFAULT_FILE_PADDING: u64 = 5_000_000;

/// Default headroom kept per image for partial metadata.
pub const DEFAULT_METADATA_RESERVATION: u64 = 2000;

/// Default number of queued writes above which a warning is logged.
pub const DEFAULT_QUEUE_WARNING_THRESHOLD: usize = 20;

// =============================================================================
// Storage Configuration
// =============================================================================

/// How a store lays out its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Directory all files are written into.
    pub directory: PathBuf,

    /// One file set per position instead of one for the whole acquisition.
    pub split_by_position: bool,

    /// Also write a `<base>_metadata.txt` sidecar per file set.
    pub separate_metadata_file: bool,

    /// Order images arrive in within a frame.
    pub raster_order: RasterOrder,

    /// Frames vary before positions. Disables repair of stopped acquisitions.
    pub time_major: bool,

    /// Ceiling on each file's size, at most [`MAX_TIFF_FILE_SIZE`].
    pub max_file_size: u64,

    /// Optional cap on images per file.
    pub max_images_per_file: Option<u32>,

    /// Bytes kept free at the end of every file.
    pub file_padding: u64,

    /// Headroom kept per image for partial metadata.
    pub metadata_reservation: u64,

    /// Queued writes above which a backlog warning is logged.
    pub queue_warning_threshold: usize,
}

impl StorageConfig {
    /// Default settings writing into `directory`.
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            split_by_position: true,
            separate_metadata_file: false,
            raster_order: RasterOrder::SliceMajor,
            time_major: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_images_per_file: None,
            file_padding: DEFAULT_FILE_PADDING,
            metadata_reservation: DEFAULT_METADATA_RESERVATION,
            queue_warning_threshold: DEFAULT_QUEUE_WARNING_THRESHOLD,
        }
    }

    pub fn with_split_by_position(mut self, split: bool) -> Self {
        self.split_by_position = split;
        self
    }

    pub fn with_separate_metadata_file(mut self, enabled: bool) -> Self {
        self.separate_metadata_file = enabled;
        self
    }

    pub fn with_raster_order(mut self, order: RasterOrder) -> Self {
        self.raster_order = order;
        self
    }

    pub fn with_time_major(mut self, time_major: bool) -> Self {
        self.time_major = time_major;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_max_images_per_file(mut self, cap: Option<u32>) -> Self {
        self.max_images_per_file = cap;
        self
    }

    pub fn with_file_padding(mut self, bytes: u64) -> Self {
        self.file_padding = bytes;
        self
    }

    pub fn with_metadata_reservation(mut self, bytes: u64) -> Self {
        self.metadata_reservation = bytes;
        self
    }

    pub fn with_queue_warning_threshold(mut self, tasks: usize) -> Self {
        self.queue_warning_threshold = tasks;
        self
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.directory.as_os_str().is_empty() {
            return Err("directory must not be empty".to_string());
        }

        if self.max_file_size == 0 {
            return Err("max_file_size must be greater than 0".to_string());
        }
        if self.max_file_size > MAX_TIFF_FILE_SIZE {
            return Err(format!(
                "max_file_size must be at most {} bytes (32-bit TIFF offsets)",
                MAX_TIFF_FILE_SIZE
            ));
        }

        if self.file_padding + self.metadata_reservation >= self.max_file_size {
            return Err("file_padding and metadata_reservation leave no room for images".to_string());
        }

        if self.max_images_per_file == Some(0) {
            return Err("max_images_per_file must be greater than 0".to_string());
        }

        if self.queue_warning_threshold == 0 {
            return Err("queue_warning_threshold must be greater than 0".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// mmstack - multipage OME-TIFF storage for microscopy acquisitions.
#[derive(Parser, Debug, Clone)]
#[command(name = "mmstack")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Open a dataset read-only and describe it.
    Inspect(InspectConfig),

    /// Write a synthetic acquisition into a new dataset.
    Synth(SynthConfig),
}

#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// Dataset directory.
    pub directory: PathBuf,

    /// Print the report as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SynthConfig {
    /// Directory to create the dataset in.
    pub directory: PathBuf,

    // =========================================================================
    // Acquisition Extent
    // =========================================================================
    #[arg(long, default_value_t = 2)]
    pub channels: u32,

    #[arg(long, default_value_t = 3)]
    pub slices: u32,

    #[arg(long, default_value_t = 4)]
    pub frames: u32,

    #[arg(long, default_value_t = 1)]
    pub positions: u32,

    #[arg(long, default_value_t = 256)]
    pub width: u32,

    #[arg(long, default_value_t = 256)]
    pub height: u32,

    /// Write 16-bit pixels instead of 8-bit.
    #[arg(long, default_value_t = false)]
    pub sixteen_bit: bool,

    /// Stop after this many images, simulating an aborted acquisition.
    #[arg(long)]
    pub abort_after: Option<u32>,

    /// Emit channels before slices within a frame.
    #[arg(long, default_value_t = false)]
    pub channels_first: bool,

    /// Acquisition prefix used in file names.
    #[arg(long, default_value = "")]
    pub prefix: String,

    // =========================================================================
    // Storage Layout
    // =========================================================================
    /// Cap on images per file.
    #[arg(long, env = "MMSTACK_MAX_IMAGES_PER_FILE")]
    pub max_images_per_file: Option<u32>,

    /// Ceiling on file size in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE, env = "MMSTACK_MAX_FILE_SIZE")]
    pub max_file_size: u64,

    /// Also write a `_metadata.txt` sidecar per file set.
    #[arg(long, default_value_t = false, env = "MMSTACK_METADATA_FILE")]
    pub metadata_file: bool,

    /// Keep all positions in one file set.
    #[arg(long, default_value_t = false, env = "MMSTACK_NO_SPLIT")]
    pub no_split: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl SynthConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.channels == 0 || self.slices == 0 || self.frames == 0 || self.positions == 0 {
            return Err("channels, slices, frames and positions must be at least 1".to_string());
        }
        if self.width == 0 || self.height == 0 {
            return Err("width and height must be at least 1".to_string());
        }
        self.storage_config().validate()
    }

    pub fn raster_order(&self) -> RasterOrder {
        if self.channels_first {
            RasterOrder::ChannelMajor
        } else {
            RasterOrder::SliceMajor
        }
    }

    /// Store settings for this run.
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::new(&self.directory)
            .with_split_by_position(!self.no_split)
            .with_separate_metadata_file(self.metadata_file)
            .with_raster_order(self.raster_order())
            .with_max_file_size(self.max_file_size)
            .with_max_images_per_file(self.max_images_per_file)
    }

    /// Total images the run would write if not aborted.
    pub fn planned_images(&self) -> u64 {
        self.channels as u64 * self.slices as u64 * self.frames as u64 * self.positions as u64
    }
}

// =============================================================================
// Tests
// =============================================================================
