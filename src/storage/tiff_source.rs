//! The bundled page source: multipage OME-TIFF files on local disk.

use std::path::Path;

use crate::acquisition::{ImageRecord, SummaryMetadata};
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::format::{TiffPageWriter, WriterLimits};

use super::page::PageSource;

/// Creates [`TiffPageWriter`]s sharing one set of capacity limits.
#[derive(Debug, Clone, Copy)]
pub struct TiffPageSource {
    limits: WriterLimits,
}

impl TiffPageSource {
    pub fn new(limits: WriterLimits) -> Self {
        Self { limits }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(WriterLimits {
            max_file_size: config.max_file_size,
            max_images_per_file: config.max_images_per_file,
            padding: config.file_padding,
        })
    }

    pub fn limits(&self) -> WriterLimits {
        self.limits
    }
}

impl PageSource for TiffPageSource {
    type Writer = TiffPageWriter;

    fn create_writer(
        &self,
        directory: &Path,
        file_name: &str,
        uuid: &str,
        summary: &SummaryMetadata,
        first_image: &ImageRecord,
    ) -> Result<TiffPageWriter, StorageError> {
        TiffPageWriter::create(
            directory,
            file_name,
            uuid,
            summary,
            &first_image.pixels,
            self.limits,
        )
    }

    fn fits_in_new_file(
        &self,
        summary: &SummaryMetadata,
        image: &ImageRecord,
        reserved: u64,
    ) -> bool {
        TiffPageWriter::fits_in_empty_file(summary, image, reserved, self.limits)
    }
}
