use std::fmt;

use serde::{Deserialize, Serialize};

use super::record::{keys, ImageTags};
use crate::error::StorageError;

/// The (channel, slice, frame, position) key identifying one image.
///
/// Its canonical label is `"c_z_t_p"`, e.g. `"1_0_3_2"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct AcquisitionCoordinate {
    pub channel: u32,
    pub slice: u32,
    pub frame: u32,
    pub position: u32,
}

impl AcquisitionCoordinate {
    pub const fn new(channel: u32, slice: u32, frame: u32, position: u32) -> Self {
        Self {
            channel,
            slice,
            frame,
            position,
        }
    }

    /// Canonical `"c_z_t_p"` label.
    pub fn label(&self) -> String {
        self.to_string()
    }

    /// Parse a `"c_z_t_p"` label.
    pub fn parse_label(label: &str) -> Option<Self> {
        let mut parts = label.split('_').map(|p| p.parse::<u32>().ok());
        let coords = Self::new(
            parts.next()??,
            parts.next()??,
            parts.next()??,
            parts.next()??,
        );
        if parts.next().is_some() {
            return None;
        }
        Some(coords)
    }

    /// Extract the four indices from an image's tags.
    ///
    /// # Errors
    /// `MalformedTags` naming the first index that is missing or is not a
    /// non-negative 32-bit integer.
    pub fn from_tags(tags: &ImageTags) -> Result<Self, StorageError> {
        Ok(Self {
            channel: index_from_tags(tags, keys::CHANNEL_INDEX)?,
            slice: index_from_tags(tags, keys::SLICE_INDEX)?,
            frame: index_from_tags(tags, keys::FRAME_INDEX)?,
            position: index_from_tags(tags, keys::POSITION_INDEX)?,
        })
    }

    /// Write the four indices into an image's tags.
    pub fn write_to_tags(&self, tags: &mut ImageTags) {
        tags.insert(keys::CHANNEL_INDEX.into(), self.channel.into());
        tags.insert(keys::SLICE_INDEX.into(), self.slice.into());
        tags.insert(keys::FRAME_INDEX.into(), self.frame.into());
        tags.insert(keys::POSITION_INDEX.into(), self.position.into());
    }
}

impl fmt::Display for AcquisitionCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.channel, self.slice, self.frame, self.position
        )
    }
}

fn index_from_tags(tags: &ImageTags, field: &'static str) -> Result<u32, StorageError> {
    tags.get(field)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(StorageError::MalformedTags { field })
}

/// Order in which the acquisition engine emits images within one frame.
///
/// Fixed for a whole store and read once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RasterOrder {
    /// Slice varies fastest, then channel ("slices first").
    #[default]
    SliceMajor,
    /// Channel varies fastest, then slice.
    ChannelMajor,
}

impl RasterOrder {
    /// OME `DimensionOrder` for this raster order.
    pub const fn dimension_order(self) -> &'static str {
        match self {
            RasterOrder::SliceMajor => "XYZCT",
            RasterOrder::ChannelMajor => "XYCZT",
        }
    }
}
