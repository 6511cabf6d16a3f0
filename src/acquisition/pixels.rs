use std::sync::Arc;

use bytes::Bytes;

use crate::error::StorageError;
use crate::format::tiff::ByteOrder;

/// Grayscale pixel samples, either one or two bytes wide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelData {
    Gray8(Bytes),
    Gray16(Arc<[u16]>),
}

/// A single-plane grayscale image.
///
/// The sample width is fixed when the buffer is built; writers and readers
/// dispatch on [`PixelData`] rather than inspecting raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: PixelData,
}

impl PixelBuffer {
    /// Build an 8-bit buffer; `data.len()` must equal `width * height`.
    pub fn gray8(width: u32, height: u32, data: impl Into<Bytes>) -> Result<Self, StorageError> {
        let data = data.into();
        check_len(width, height, data.len())?;
        Ok(Self {
            width,
            height,
            data: PixelData::Gray8(data),
        })
    }

    /// Build a 16-bit buffer; `data.len()` must equal `width * height`.
    pub fn gray16(
        width: u32,
        height: u32,
        data: impl Into<Arc<[u16]>>,
    ) -> Result<Self, StorageError> {
        let data = data.into();
        check_len(width, height, data.len())?;
        Ok(Self {
            width,
            height,
            data: PixelData::Gray16(data),
        })
    }

    /// An all-zero buffer with the given sample width (1 or 2 bytes).
    pub fn blank(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        let n = width as usize * height as usize;
        let data = if bytes_per_pixel >= 2 {
            PixelData::Gray16(vec![0u16; n].into())
        } else {
            PixelData::Gray8(Bytes::from(vec![0u8; n]))
        };
        Self {
            width,
            height,
            data,
        }
    }

    /// Decode a raw strip read from a file.
    pub fn from_raw(
        width: u32,
        height: u32,
        bits_per_sample: u32,
        bytes: Bytes,
        byte_order: ByteOrder,
    ) -> Result<Self, StorageError> {
        match bits_per_sample {
            8 => Self::gray8(width, height, bytes),
            16 => {
                let samples: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| byte_order.read_u16(pair))
                    .collect();
                Self::gray16(width, height, samples)
            }
            other => Err(StorageError::Metadata(format!(
                "unsupported bits per sample: {}",
                other
            ))),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &PixelData {
        &self.data
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self.data {
            PixelData::Gray8(_) => 1,
            PixelData::Gray16(_) => 2,
        }
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bytes_per_pixel() as u16 * 8
    }

    /// Size of the encoded pixel strip in bytes.
    pub fn byte_len(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.bytes_per_pixel() as u64
    }

    /// Micro-Manager pixel type name.
    pub fn pixel_type(&self) -> &'static str {
        match self.data {
            PixelData::Gray8(_) => "GRAY8",
            PixelData::Gray16(_) => "GRAY16",
        }
    }

    /// OME pixel type name.
    pub fn ome_type(&self) -> &'static str {
        match self.data {
            PixelData::Gray8(_) => "uint8",
            PixelData::Gray16(_) => "uint16",
        }
    }

    /// Encode the samples as a little-endian strip.
    pub fn to_le_bytes(&self) -> Bytes {
        match &self.data {
            PixelData::Gray8(bytes) => bytes.clone(),
            PixelData::Gray16(samples) => {
                let mut out = Vec::with_capacity(samples.len() * 2);
                for s in samples.iter() {
                    out.extend_from_slice(&s.to_le_bytes());
                }
                Bytes::from(out)
            }
        }
    }
}

fn check_len(width: u32, height: u32, actual: usize) -> Result<(), StorageError> {
    let expected = width as usize * height as usize;
    if actual != expected {
        return Err(StorageError::InvalidPixels {
            width,
            height,
            expected,
            actual,
        });
    }
    Ok(())
}
