use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::acquisition::{AcquisitionCoordinate, ImageTags, SummaryMetadata};
use crate::error::StorageError;

/// Suffix appended to a file set's base name for its sidecar file.
pub const METADATA_FILE_SUFFIX: &str = "_metadata.txt";

/// Sidecar JSON document holding the summary and every image's tags.
///
/// Written incrementally as one JSON object:
/// `{"Summary": {...}, "FrameKey-<t>-<c>-<z>": {...}, ...}`.
pub struct MetadataFile {
    writer: BufWriter<File>,
    path: PathBuf,
    finished: bool,
}

impl MetadataFile {
    pub fn create(
        directory: &Path,
        base_name: &str,
        summary: &SummaryMetadata,
    ) -> Result<Self, StorageError> {
        let path = directory.join(format!("{}{}", base_name, METADATA_FILE_SUFFIX));
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(b"{\n\"Summary\": ")?;
        serde_json::to_writer_pretty(&mut writer, summary)?;

        Ok(Self {
            writer,
            path,
            finished: false,
        })
    }

    /// Key under which an image's tags are stored.
    pub fn frame_key(coords: &AcquisitionCoordinate) -> String {
        format!(
            "FrameKey-{}-{}-{}",
            coords.frame, coords.channel, coords.slice
        )
    }

    pub fn append(
        &mut self,
        coords: &AcquisitionCoordinate,
        tags: &ImageTags,
    ) -> Result<(), StorageError> {
        if self.finished {
            return Err(StorageError::ReadOnly);
        }
        write!(self.writer, ",\n\"{}\": ", Self::frame_key(coords))?;
        serde_json::to_writer_pretty(&mut self.writer, tags)?;
        Ok(())
    }

    /// Close the JSON object and flush; later calls are no-ops.
    pub fn finish(&mut self) -> Result<(), StorageError> {
        if self.finished {
            return Ok(());
        }
        self.writer.write_all(b"\n}\n")?;
        self.writer.flush()?;
        self.finished = true;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
