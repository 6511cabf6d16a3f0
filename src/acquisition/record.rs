use serde_json::{Map, Value};

use super::coords::AcquisitionCoordinate;
use super::pixels::PixelBuffer;
use crate::error::StorageError;

/// Free-form JSON tags attached to an image.
pub type ImageTags = Map<String, Value>;

/// Tag keys understood by the store.
pub mod keys {
    pub const CHANNEL_INDEX: &str = "ChannelIndex";
    pub const SLICE_INDEX: &str = "SliceIndex";
    pub const FRAME_INDEX: &str = "FrameIndex";
    pub const POSITION_INDEX: &str = "PositionIndex";
    pub const POSITION_NAME: &str = "PositionName";
    pub const FILE_NAME: &str = "FileName";
    pub const WIDTH: &str = "Width";
    pub const HEIGHT: &str = "Height";
    pub const PIXEL_TYPE: &str = "PixelType";
    pub const CHANNEL: &str = "Channel";
    pub const X_POSITION_UM: &str = "XPositionUm";
    pub const Y_POSITION_UM: &str = "YPositionUm";
    pub const Z_POSITION_UM: &str = "ZPositionUm";
    pub const EXPOSURE_MS: &str = "Exposure-ms";
    pub const ELAPSED_TIME_MS: &str = "ElapsedTime-ms";
}

/// One image as handed to the store: its coordinate, tags and pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub coords: AcquisitionCoordinate,
    pub tags: ImageTags,
    pub pixels: PixelBuffer,
}

impl ImageRecord {
    /// Build a record whose tags carry its coordinate and image geometry.
    pub fn new(coords: AcquisitionCoordinate, mut tags: ImageTags, pixels: PixelBuffer) -> Self {
        coords.write_to_tags(&mut tags);
        tags.insert(keys::WIDTH.into(), pixels.width().into());
        tags.insert(keys::HEIGHT.into(), pixels.height().into());
        tags.insert(keys::PIXEL_TYPE.into(), pixels.pixel_type().into());
        Self {
            coords,
            tags,
            pixels,
        }
    }

    /// Build a record from its parts without touching the tags.
    pub fn from_parts(coords: AcquisitionCoordinate, tags: ImageTags, pixels: PixelBuffer) -> Self {
        Self {
            coords,
            tags,
            pixels,
        }
    }

    /// Indices as recorded in the tags, which may disagree with `coords`
    /// or be missing altogether.
    pub fn tag_indices(&self) -> Result<AcquisitionCoordinate, StorageError> {
        AcquisitionCoordinate::from_tags(&self.tags)
    }

    pub fn position_name(&self) -> Option<&str> {
        self.tags.get(keys::POSITION_NAME).and_then(Value::as_str)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.tags.get(keys::FILE_NAME).and_then(Value::as_str)
    }

    pub fn set_file_name(&mut self, file_name: &str) {
        self.tags
            .insert(keys::FILE_NAME.into(), Value::String(file_name.to_string()));
    }

    pub fn tag_f64(&self, key: &str) -> Option<f64> {
        self.tags.get(key).and_then(Value::as_f64)
    }
}
