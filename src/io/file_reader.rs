use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;

use super::RangeReader;
use crate::error::IoError;

/// Local-file implementation of RangeReader.
///
/// Holds its own handle on the file, independent of any writer handle, so a
/// file can be read while it is still growing. The size is queried on every
/// read rather than cached.
pub struct FileRangeReader {
    file: Mutex<File>,
    path: PathBuf,
    identifier: String,
}

impl FileRangeReader {
    /// Open a file for range reads.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(path.display().to_string()),
            _ => IoError::from(e),
        })?;
        let identifier = format!("file://{}", path.display());

        Ok(Self {
            file: Mutex::new(file),
            path,
            identifier,
        })
    }

    /// Get the path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RangeReader for FileRangeReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let size = file.metadata()?.len();
        if offset.saturating_add(len as u64) > size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }

        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        let file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
