//! Container store integration tests.
//!
//! Tests verify:
//! - Images round-trip through the files and the pending queue
//! - Positions are split into file sets named after the position
//! - The metadata document lands in one master file, pointers everywhere else
//! - A side file is written when no image file can hold the document
//! - Malformed tags are stored but reported

use std::sync::Arc;
use std::thread;

use serde_json::Value;
use tempfile::TempDir;

use mmstack::{
    keys, AcquisitionCoordinate, ContainerStore, ImageRecord, ImageTags, PageReader,
    PixelBuffer, RasterOrder, StorageError, TiffPageReader,
};

use super::test_utils::{
    create_store, has_tiff_data, image, image16, is_pointer_document, put_all, size_t_values,
    test_config, tiff_data_count, Extent, MemoryPageSource,
};

fn description(path: &std::path::Path) -> String {
    TiffPageReader::open(path)
        .unwrap()
        .image_description()
        .unwrap()
        .expect("file has a description")
}

// =============================================================================
// Round Trip
// =============================================================================

#[test]
fn test_single_position_round_trip() {
    let dir = TempDir::new().unwrap();
    let extent = Extent::new(2, 2, 2, 1);
    let store = create_store(test_config(dir.path()), extent);

    put_all(&store, extent.coords(RasterOrder::SliceMajor));
    store.finished().unwrap();

    assert_eq!(store.num_images(), 8);
    assert_eq!(store.file_names(), vec!["MMStack_Pos0.ome.tif"]);
    assert!(store.take_errors().is_empty());

    for coords in extent.coords(RasterOrder::SliceMajor) {
        let expected = image(coords.channel, coords.slice, coords.frame, coords.position);
        let stored = store.get_image(&coords).unwrap().expect("image stored");
        assert_eq!(stored.pixels, expected.pixels);
        assert_eq!(stored.tags[keys::FILE_NAME], "MMStack_Pos0.ome.tif");
    }

    let document = description(&dir.path().join("MMStack_Pos0.ome.tif"));
    assert_eq!(Some(document.clone()), store.metadata_document());
    assert_eq!(tiff_data_count(&document), 8);
    assert_eq!(size_t_values(&document), vec![2]);
    assert!(document.contains("DimensionOrder=\"XYZCT\""));
}

#[test]
fn test_sixteen_bit_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = create_store(test_config(dir.path()), Extent::new(1, 1, 1, 1));

    let record = image16(0, 0, 0, 0);
    store.put_image_and_wait(record.clone()).unwrap();
    store.finished().unwrap();

    let stored = store.get_image(&record.coords).unwrap().unwrap();
    assert_eq!(stored.pixels, record.pixels);
    assert!(store.metadata_document().unwrap().contains("Type=\"uint16\""));
}

#[test]
fn test_put_image_and_wait_returns_label() {
    let dir = TempDir::new().unwrap();
    let store = create_store(test_config(dir.path()), Extent::new(1, 1, 1, 1));

    let label = store.put_image_and_wait(image(0, 0, 0, 0)).unwrap();
    assert_eq!(label, "0_0_0_0");
    assert!(dir.path().join("MMStack_Pos0.ome.tif").exists());
    store.finished().unwrap();
}

// =============================================================================
// File Sets and Master Selection
// =============================================================================

#[test]
fn test_positions_split_into_file_sets() {
    let dir = TempDir::new().unwrap();
    let extent = Extent::new(1, 2, 2, 2);
    let store = create_store(test_config(dir.path()), extent);

    put_all(&store, extent.coords(RasterOrder::SliceMajor));
    store.finished().unwrap();

    assert_eq!(
        store.file_names(),
        vec!["MMStack_Pos0.ome.tif", "MMStack_Pos1.ome.tif"]
    );

    let master = description(&dir.path().join("MMStack_Pos0.ome.tif"));
    assert!(master.contains("<Image ID=\"Image:0\""));
    assert!(master.contains("<Image ID=\"Image:1\""));
    assert_eq!(size_t_values(&master), vec![2, 2]);

    let pointer = description(&dir.path().join("MMStack_Pos1.ome.tif"));
    assert!(is_pointer_document(&pointer));
    assert!(pointer.contains("MetadataFile=\"MMStack_Pos0.ome.tif\""));
}

#[test]
fn test_unsplit_positions_share_one_file_set() {
    let dir = TempDir::new().unwrap();
    let extent = Extent::new(1, 1, 2, 3);
    let store = create_store(
        test_config(dir.path()).with_split_by_position(false),
        extent,
    );

    put_all(&store, extent.coords(RasterOrder::SliceMajor));
    store.finished().unwrap();

    assert_eq!(store.file_names(), vec!["MMStack.ome.tif"]);
    let document = store.metadata_document().unwrap();
    assert_eq!(size_t_values(&document), vec![2, 2, 2]);
    assert_eq!(tiff_data_count(&document), 6);
}

#[test]
fn test_prefix_and_position_name_in_file_name() {
    let dir = TempDir::new().unwrap();
    let store = ContainerStore::new(test_config(dir.path())).unwrap();
    store
        .set_summary_metadata(Extent::new(1, 1, 1, 1).summary().with_prefix("exp"))
        .unwrap();

    let mut tags = ImageTags::new();
    tags.insert(keys::POSITION_NAME.into(), "A1-Site_0".into());
    let record = ImageRecord::new(
        AcquisitionCoordinate::new(0, 0, 0, 0),
        tags,
        PixelBuffer::gray8(2, 2, vec![1u8, 2, 3, 4]).unwrap(),
    );
    store.put_image(record).unwrap();
    store.finished().unwrap();

    assert!(dir.path().join("exp_MMStack_A1-Site_0.ome.tif").exists());
    assert!(store
        .metadata_document()
        .unwrap()
        .contains("Name=\"exp_MMStack_A1-Site_0\""));
}

#[test]
fn test_plane_metadata_from_tags() {
    let dir = TempDir::new().unwrap();
    let store = create_store(test_config(dir.path()), Extent::new(1, 1, 1, 1));

    let mut record = image(0, 0, 0, 0);
    record.tags.insert(keys::EXPOSURE_MS.into(), 25.5.into());
    record.tags.insert(keys::X_POSITION_UM.into(), 100.0.into());
    store.put_image(record).unwrap();
    store.finished().unwrap();

    let document = store.metadata_document().unwrap();
    assert!(document.contains("<Plane TheC=\"0\" TheZ=\"0\" TheT=\"0\""));
    assert!(document.contains("ExposureTime=\"25.5\""));
    assert!(document.contains("PositionX=\"100\""));
}

// =============================================================================
// Custom Page Source
// =============================================================================

#[test]
fn test_side_file_when_no_file_has_room() {
    let dir = TempDir::new().unwrap();
    let extent = Extent::new(1, 1, 1, 2);
    let source = MemoryPageSource::new(100, false);
    let store = ContainerStore::with_source(test_config(dir.path()), source.clone()).unwrap();
    store.set_summary_metadata(extent.summary()).unwrap();

    put_all(&store, extent.coords(RasterOrder::SliceMajor));
    store.finished().unwrap();

    let side = std::fs::read_to_string(dir.path().join("OMEXMLMetadata.ome")).unwrap();
    assert_eq!(Some(side), store.metadata_document());

    let files = source.files();
    assert_eq!(files.len(), 2);
    for file in files {
        let blob = file.description().unwrap();
        assert!(is_pointer_document(&blob));
        assert!(blob.contains("MetadataFile=\"OMEXMLMetadata.ome\""));
    }
}

#[test]
fn test_custom_source_sees_file_name_tag() {
    let dir = TempDir::new().unwrap();
    let source = MemoryPageSource::new(2, true);
    let store = ContainerStore::with_source(test_config(dir.path()), source.clone()).unwrap();
    store
        .set_summary_metadata(Extent::new(1, 1, 3, 1).summary())
        .unwrap();

    put_all(
        &store,
        (0..3).map(|t| AcquisitionCoordinate::new(0, 0, t, 0)),
    );
    store.finished().unwrap();

    let files = source.files();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].file_name(), "MMStack_Pos0.ome.tif");
    assert_eq!(files[1].file_name(), "MMStack_Pos0_1.ome.tif");

    let last = files[1]
        .read_tags(&AcquisitionCoordinate::new(0, 0, 2, 0))
        .unwrap()
        .unwrap();
    assert_eq!(last[keys::FILE_NAME], "MMStack_Pos0_1.ome.tif");

    // Only the current file of the master file set carries the full document
    let earlier = files[0].description().unwrap();
    assert!(is_pointer_document(&earlier));
    assert!(earlier.contains("MetadataFile=\"MMStack_Pos0_1.ome.tif\""));
    assert!(files[1].description().unwrap().contains("<Image "));
}

// =============================================================================
// Errors and Concurrency
// =============================================================================

#[test]
fn test_malformed_tags_stored_and_reported() {
    let dir = TempDir::new().unwrap();
    let store = create_store(test_config(dir.path()), Extent::new(1, 1, 1, 1));

    let coords = AcquisitionCoordinate::new(0, 0, 0, 0);
    let mut tags = ImageTags::new();
    tags.insert(keys::CHANNEL_INDEX.into(), Value::from("zero"));
    let record = ImageRecord::from_parts(
        coords,
        tags,
        PixelBuffer::gray8(2, 2, vec![5u8; 4]).unwrap(),
    );
    store.put_image(record).unwrap();
    store.finished().unwrap();

    let errors = store.take_errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        StorageError::MalformedTags {
            field: "ChannelIndex"
        }
    ));
    assert!(store.take_errors().is_empty());

    assert!(store.get_image(&coords).unwrap().is_some());
    assert_eq!(tiff_data_count(&store.metadata_document().unwrap()), 0);
}

#[test]
fn test_concurrent_producers() {
    let dir = TempDir::new().unwrap();
    let extent = Extent::new(2, 1, 5, 4);
    let store = Arc::new(create_store(test_config(dir.path()), extent));

    let handles: Vec<_> = (0..extent.positions)
        .map(|p| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for t in 0..extent.frames {
                    for c in 0..extent.channels {
                        store.put_image(image(c, 0, t, p)).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    store.finished().unwrap();
    assert_eq!(store.num_images(), 40);
    assert_eq!(store.file_names().len(), 4);
    assert_eq!(store.last_acquired_frame(), 4);
    assert_eq!(store.last_acquired_position(), 3);
    assert_eq!(
        store.max_indices(),
        Some(AcquisitionCoordinate::new(1, 0, 4, 3))
    );

    let document = store.metadata_document().unwrap();
    assert_eq!(size_t_values(&document), vec![5, 5, 5, 5]);
    for t in 0..5 {
        assert!(has_tiff_data(&document, 1, 0, t));
    }
}

#[test]
fn test_sidecar_metadata_file() {
    let dir = TempDir::new().unwrap();
    let extent = Extent::new(1, 1, 2, 1);
    let store = create_store(
        test_config(dir.path()).with_separate_metadata_file(true),
        extent,
    );

    put_all(&store, extent.coords(RasterOrder::SliceMajor));
    store.finished().unwrap();

    let text = std::fs::read_to_string(dir.path().join("MMStack_Pos0_metadata.txt")).unwrap();
    let json: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["Summary"]["Frames"], 2);
    assert_eq!(json["FrameKey-1-0-0"]["FrameIndex"], 1);
    assert_eq!(json["FrameKey-0-0-0"]["FileName"], "MMStack_Pos0.ome.tif");
}

#[test]
fn test_data_set_size_counts_files() {
    let dir = TempDir::new().unwrap();
    let store = create_store(test_config(dir.path()), Extent::new(1, 1, 1, 1));
    store.put_image(image(0, 0, 0, 0)).unwrap();
    store.finished().unwrap();

    let on_disk = std::fs::metadata(dir.path().join("MMStack_Pos0.ome.tif"))
        .unwrap()
        .len();
    assert_eq!(store.data_set_size().unwrap(), on_disk);
}
