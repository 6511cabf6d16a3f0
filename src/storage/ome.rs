//! OME-XML metadata accumulator.
//!
//! Collects, per position, which file and page holds every
//! (frame, channel, slice) plane, and serializes the result as an OME-XML
//! document. Positions whose acquisition skipped planes can be backfilled
//! with placeholder entries so the document covers every plane it declares.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use crate::acquisition::{keys, AcquisitionCoordinate, ImageRecord, RasterOrder, SummaryMetadata};
use crate::error::StorageError;

/// OME schema namespace written into every document.
pub const OME_NAMESPACE: &str = "http://www.openmicroscopy.org/Schemas/OME/2016-06";

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

const CREATOR: &str = concat!("mmstack ", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Entries
// =============================================================================

/// Key of one plane within a position, ordered frame first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaneKey {
    pub frame: u32,
    pub channel: u32,
    pub slice: u32,
}

impl From<AcquisitionCoordinate> for PlaneKey {
    fn from(c: AcquisitionCoordinate) -> Self {
        Self {
            frame: c.frame,
            channel: c.channel,
            slice: c.slice,
        }
    }
}

/// Where a plane's pixels live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiffDataEntry {
    /// Page index within the file
    pub ifd: u32,
    pub file_name: String,
    pub uuid: String,
    /// Synthesized by backfill rather than registered from a written image
    pub placeholder: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct PlaneInfo {
    delta_t_ms: Option<f64>,
    exposure_ms: Option<f64>,
    position_x: Option<f64>,
    position_y: Option<f64>,
    position_z: Option<f64>,
}

impl PlaneInfo {
    fn from_record(record: &ImageRecord) -> Self {
        Self {
            delta_t_ms: record.tag_f64(keys::ELAPSED_TIME_MS),
            exposure_ms: record.tag_f64(keys::EXPOSURE_MS),
            position_x: record.tag_f64(keys::X_POSITION_UM),
            position_y: record.tag_f64(keys::Y_POSITION_UM),
            position_z: record.tag_f64(keys::Z_POSITION_UM),
        }
    }
}

#[derive(Debug, Clone)]
struct PositionMetadata {
    name: String,
    num_frames: u32,
    size_x: u32,
    size_y: u32,
    pixel_type: &'static str,
    tiff_data: BTreeMap<PlaneKey, TiffDataEntry>,
    planes: BTreeMap<PlaneKey, PlaneInfo>,
    last_entry: Option<TiffDataEntry>,
}

impl PositionMetadata {
    fn new(name: String) -> Self {
        Self {
            name,
            num_frames: 0,
            size_x: 0,
            size_y: 0,
            pixel_type: "uint16",
            tiff_data: BTreeMap::new(),
            planes: BTreeMap::new(),
            last_entry: None,
        }
    }
}

// =============================================================================
// OmeMetadata
// =============================================================================

/// The metadata document under construction.
///
/// Owned by the write worker; file sets receive it by `&mut` for each call.
#[derive(Debug, Clone)]
pub struct OmeMetadata {
    order: RasterOrder,
    num_channels: u32,
    num_slices: u32,
    channel_names: Vec<String>,
    positions: BTreeMap<u32, PositionMetadata>,
}

impl OmeMetadata {
    pub fn new(summary: &SummaryMetadata, order: RasterOrder) -> Self {
        let mut metadata = Self {
            order,
            num_channels: 1,
            num_slices: 1,
            channel_names: Vec::new(),
            positions: BTreeMap::new(),
        };
        metadata.set_summary(summary);
        metadata
    }

    /// Refresh the acquisition extent used for backfill and serialization.
    pub fn set_summary(&mut self, summary: &SummaryMetadata) {
        self.num_channels = summary.channels.max(1);
        self.num_slices = summary.slices.max(1);
        self.channel_names = (0..self.num_channels)
            .map(|c| summary.channel_name(c))
            .collect();
    }

    fn position_mut(&mut self, position: u32, name: &str) -> &mut PositionMetadata {
        self.positions
            .entry(position)
            .or_insert_with(|| PositionMetadata::new(name.to_string()))
    }

    /// Register a written image and its per-plane metadata.
    ///
    /// # Errors
    /// `MalformedTags` if the tags do not carry all four indices; nothing is
    /// registered in that case.
    pub fn add_image_tags(
        &mut self,
        record: &ImageRecord,
        ifd: u32,
        base_name: &str,
        file_name: &str,
        uuid: &str,
    ) -> Result<(), StorageError> {
        let coords = record.tag_indices()?;
        let key = PlaneKey::from(coords);

        let width = record.pixels.width();
        let height = record.pixels.height();
        let pixel_type = record.pixels.ome_type();
        let pos = self.position_mut(coords.position, base_name);
        if pos.tiff_data.is_empty() {
            pos.size_x = width;
            pos.size_y = height;
            pos.pixel_type = pixel_type;
        }
        pos.planes.insert(key, PlaneInfo::from_record(record));

        self.add_tiff_data(coords, ifd, base_name, file_name, uuid);
        Ok(())
    }

    /// Register a page that carries no plane metadata, such as a blank page.
    pub fn add_tiff_data(
        &mut self,
        coords: AcquisitionCoordinate,
        ifd: u32,
        base_name: &str,
        file_name: &str,
        uuid: &str,
    ) {
        let entry = TiffDataEntry {
            ifd,
            file_name: file_name.to_string(),
            uuid: uuid.to_string(),
            placeholder: false,
        };
        let pos = self.position_mut(coords.position, base_name);
        pos.tiff_data.insert(PlaneKey::from(coords), entry.clone());
        pos.last_entry = Some(entry);
        pos.num_frames = pos.num_frames.max(coords.frame + 1);
    }

    /// Add a placeholder for every (frame, channel, slice) with
    /// `frame <= last_frame` that has no entry yet.
    ///
    /// Placeholders copy the position's most recently registered entry.
    /// Existing entries are never touched, so calling this twice is the same
    /// as calling it once. Positions without any entry are left alone.
    pub fn fill_in_missing_tiff_datas(&mut self, last_frame: u32, position: u32) {
        let (num_channels, num_slices) = (self.num_channels, self.num_slices);
        let Some(pos) = self.positions.get_mut(&position) else {
            return;
        };
        let Some(template) = pos.last_entry.clone() else {
            return;
        };

        let mut added = 0usize;
        for frame in 0..=last_frame {
            for channel in 0..num_channels {
                for slice in 0..num_slices {
                    let key = PlaneKey {
                        frame,
                        channel,
                        slice,
                    };
                    pos.tiff_data.entry(key).or_insert_with(|| {
                        added += 1;
                        TiffDataEntry {
                            placeholder: true,
                            ..template.clone()
                        }
                    });
                }
            }
        }
        if added > 0 {
            tracing::debug!(position, last_frame, added, "Backfilled missing planes");
        }
    }

    /// Raise the declared frame count of a position; never lowers it.
    pub fn set_num_frames(&mut self, position: u32, num_frames: u32) {
        if let Some(pos) = self.positions.get_mut(&position) {
            pos.num_frames = pos.num_frames.max(num_frames);
        }
    }

    /// Set the declared frame count of a position exactly.
    ///
    /// Used when an acquisition stopped early and the position was completed
    /// up to its last frame.
    pub fn finalize_num_frames(&mut self, position: u32, num_frames: u32) {
        if let Some(pos) = self.positions.get_mut(&position) {
            pos.num_frames = num_frames;
        }
    }

    /// Declared frame count of a position.
    pub fn num_frames(&self, position: u32) -> Option<u32> {
        self.positions.get(&position).map(|p| p.num_frames)
    }

    /// Entry for one plane.
    pub fn tiff_data(&self, coords: AcquisitionCoordinate) -> Option<&TiffDataEntry> {
        self.positions
            .get(&coords.position)?
            .tiff_data
            .get(&PlaneKey::from(coords))
    }

    /// Number of plane entries, placeholders included, for a position.
    pub fn tiff_data_count(&self, position: u32) -> usize {
        self.positions
            .get(&position)
            .map_or(0, |p| p.tiff_data.len())
    }

    /// Positions that have at least one entry.
    pub fn positions(&self) -> impl Iterator<Item = u32> + '_ {
        self.positions.keys().copied()
    }

    /// Serialize the full document.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        let _ = write!(
            xml,
            "<OME xmlns=\"{ns}\" xmlns:xsi=\"{xsi}\" xsi:schemaLocation=\"{ns} {ns}/ome.xsd\" Creator=\"{creator}\">",
            ns = OME_NAMESPACE,
            xsi = XSI_NAMESPACE,
            creator = CREATOR,
        );

        for (index, pos) in &self.positions {
            self.write_image(&mut xml, *index, pos);
        }

        xml.push_str("</OME>");
        xml
    }

    fn write_image(&self, xml: &mut String, index: u32, pos: &PositionMetadata) {
        let _ = write!(
            xml,
            "<Image ID=\"Image:{index}\" Name=\"{name}\"><Pixels ID=\"Pixels:{index}\" DimensionOrder=\"{order}\" Type=\"{ty}\" SizeX=\"{x}\" SizeY=\"{y}\" SizeC=\"{c}\" SizeZ=\"{z}\" SizeT=\"{t}\" BigEndian=\"false\">",
            name = escape(&pos.name),
            order = self.order.dimension_order(),
            ty = pos.pixel_type,
            x = pos.size_x,
            y = pos.size_y,
            c = self.num_channels,
            z = self.num_slices,
            t = pos.num_frames.max(1),
        );

        for (c, name) in self.channel_names.iter().enumerate() {
            let _ = write!(
                xml,
                "<Channel ID=\"Channel:{index}:{c}\" SamplesPerPixel=\"1\" Name=\"{}\"/>",
                escape(name)
            );
        }

        for (key, entry) in pos.tiff_data.iter().filter(|(k, _)| k.frame < pos.num_frames) {
            let _ = write!(
                xml,
                "<TiffData IFD=\"{}\" FirstC=\"{}\" FirstZ=\"{}\" FirstT=\"{}\" PlaneCount=\"1\"><UUID FileName=\"{}\">{}</UUID></TiffData>",
                entry.ifd,
                key.channel,
                key.slice,
                key.frame,
                escape(&entry.file_name),
                escape(&entry.uuid),
            );
        }

        for (key, plane) in pos.planes.iter().filter(|(k, _)| k.frame < pos.num_frames) {
            let _ = write!(
                xml,
                "<Plane TheC=\"{}\" TheZ=\"{}\" TheT=\"{}\"",
                key.channel, key.slice, key.frame
            );
            let attrs = [
                ("DeltaT", plane.delta_t_ms),
                ("ExposureTime", plane.exposure_ms),
                ("PositionX", plane.position_x),
                ("PositionY", plane.position_y),
                ("PositionZ", plane.position_z),
            ];
            for (attr, value) in attrs {
                if let Some(v) = value {
                    let _ = write!(xml, " {attr}=\"{v}\"");
                }
            }
            xml.push_str("/>");
        }

        xml.push_str("</Pixels></Image>");
    }

    /// A minimal document naming the file that holds the full metadata.
    ///
    /// `own_uuid` identifies the file this pointer is embedded in.
    pub fn pointer_to_master_file(master_file: &str, master_uuid: &str, own_uuid: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><OME xmlns=\"{ns}\" xmlns:xsi=\"{xsi}\" xsi:schemaLocation=\"{ns} {ns}/ome.xsd\" UUID=\"{own}\" Creator=\"{creator}\"><BinaryOnly MetadataFile=\"{file}\" UUID=\"{uuid}\"/></OME>",
            ns = OME_NAMESPACE,
            xsi = XSI_NAMESPACE,
            own = escape(own_uuid),
            creator = CREATOR,
            file = escape(master_file),
            uuid = escape(master_uuid),
        )
    }
}

impl fmt::Display for OmeMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

/// Escape text for use in XML attributes and content.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
