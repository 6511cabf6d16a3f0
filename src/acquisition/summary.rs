use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Acquisition-wide settings, serialized with Micro-Manager key names.
///
/// Keys the store does not interpret are kept in `extra` and written back
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SummaryMetadata {
    #[serde(default)]
    pub prefix: String,

    #[serde(default = "one")]
    pub channels: u32,

    #[serde(default = "one")]
    pub slices: u32,

    #[serde(default = "one")]
    pub frames: u32,

    #[serde(default = "one")]
    pub positions: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ch_names: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn one() -> u32 {
    1
}

impl Default for SummaryMetadata {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            channels: 1,
            slices: 1,
            frames: 1,
            positions: 1,
            ch_names: Vec::new(),
            width: None,
            height: None,
            extra: Map::new(),
        }
    }
}

impl SummaryMetadata {
    /// Summary for an acquisition of the given extent.
    pub fn with_dimensions(channels: u32, slices: u32, frames: u32, positions: u32) -> Self {
        Self {
            channels: channels.max(1),
            slices: slices.max(1),
            frames: frames.max(1),
            positions: positions.max(1),
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Name of a channel, falling back to its index.
    pub fn channel_name(&self, channel: u32) -> String {
        self.ch_names
            .get(channel as usize)
            .cloned()
            .unwrap_or_else(|| channel.to_string())
    }
}
