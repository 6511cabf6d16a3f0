//! File rollover integration tests.
//!
//! Tests verify:
//! - A new file is started when the image-count cap is reached
//! - A new file is started before the size ceiling is crossed
//! - Each file gets its own UUID and restarts IFD numbering
//! - Rolled-over files stay readable and chained
//! - Embedded metadata keeps every file under the size ceiling

use tempfile::TempDir;

use mmstack::{keys, AcquisitionCoordinate, PageReader, TiffPageReader};

use super::test_utils::{create_store, is_pointer_document, put_all, test_config, Extent};

fn frames(n: u32) -> impl Iterator<Item = AcquisitionCoordinate> {
    (0..n).map(|t| AcquisitionCoordinate::new(0, 0, t, 0))
}

// =============================================================================
// Image Count Cap
// =============================================================================

#[test]
fn test_rollover_by_image_count() {
    let dir = TempDir::new().unwrap();
    let store = create_store(
        test_config(dir.path()).with_max_images_per_file(Some(3)),
        Extent::new(1, 1, 4, 1),
    );

    put_all(&store, frames(4));
    store.finished().unwrap();

    assert_eq!(
        store.file_names(),
        vec!["MMStack_Pos0.ome.tif", "MMStack_Pos0_1.ome.tif"]
    );

    let first = TiffPageReader::open(dir.path().join("MMStack_Pos0.ome.tif")).unwrap();
    let second = TiffPageReader::open(dir.path().join("MMStack_Pos0_1.ome.tif")).unwrap();
    assert_eq!(first.image_coords().len(), 3);
    assert_eq!(second.image_coords(), vec![AcquisitionCoordinate::new(0, 0, 3, 0)]);
    assert_eq!(first.ifd_chain().unwrap().len(), 3);
    assert_eq!(second.ifd_chain().unwrap().len(), 1);

    let tags = second
        .read_tags(&AcquisitionCoordinate::new(0, 0, 3, 0))
        .unwrap()
        .unwrap();
    assert_eq!(tags[keys::FILE_NAME], "MMStack_Pos0_1.ome.tif");

    let document = store.metadata_document().unwrap();
    assert!(document.contains(
        "<TiffData IFD=\"0\" FirstC=\"0\" FirstZ=\"0\" FirstT=\"3\" PlaneCount=\"1\"><UUID FileName=\"MMStack_Pos0_1.ome.tif\">"
    ));
    assert!(document.contains(
        "<TiffData IFD=\"2\" FirstC=\"0\" FirstZ=\"0\" FirstT=\"2\" PlaneCount=\"1\"><UUID FileName=\"MMStack_Pos0.ome.tif\">"
    ));

    // Only the last file of the master file set carries the full document
    let earlier = first.image_description().unwrap().unwrap();
    assert!(is_pointer_document(&earlier));
    assert!(earlier.contains("MetadataFile=\"MMStack_Pos0_1.ome.tif\""));
    assert!(second.image_description().unwrap().unwrap().contains("<Image "));
}

#[test]
fn test_rolled_files_have_distinct_uuids() {
    let dir = TempDir::new().unwrap();
    let store = create_store(
        test_config(dir.path()).with_max_images_per_file(Some(1)),
        Extent::new(1, 1, 2, 1),
    );

    put_all(&store, frames(2));
    store.finished().unwrap();

    let document = store.metadata_document().unwrap();
    let uuids: Vec<&str> = document
        .split("\">urn:uuid:")
        .skip(1)
        .filter_map(|rest| rest.split('<').next())
        .collect();
    assert_eq!(uuids.len(), 2);
    assert_ne!(uuids[0], uuids[1]);
}

// =============================================================================
// Size Ceiling
// =============================================================================

#[test]
fn test_rollover_by_file_size() {
    let dir = TempDir::new().unwrap();
    let max_file_size = 4096;
    let store = create_store(
        test_config(dir.path()).with_max_file_size(max_file_size),
        Extent::new(1, 1, 10, 1),
    );

    put_all(&store, frames(10));
    store.wait_for_writes().unwrap();

    // Before metadata is embedded every file respects the ceiling
    let mut files = store.file_names();
    assert!(files.len() > 1, "expected a rollover, got {:?}", files);
    for file in &files {
        let size = std::fs::metadata(dir.path().join(file)).unwrap().len();
        assert!(size < max_file_size, "{} is {} bytes", file, size);
    }

    store.finished().unwrap();
    assert!(store.metadata_document().is_some());
    assert_eq!(store.num_images(), 10);
    for coords in frames(10) {
        assert!(store.get_image(&coords).unwrap().is_some());
    }

    files.sort();
    assert_eq!(files[0], "MMStack_Pos0.ome.tif");
    assert_eq!(files[1], "MMStack_Pos0_1.ome.tif");
}

#[test]
fn test_size_ceiling_holds_after_finish() {
    let dir = TempDir::new().unwrap();
    let max_file_size = 4096;
    let store = create_store(
        test_config(dir.path()).with_max_file_size(max_file_size),
        Extent::new(1, 1, 10, 1),
    );

    put_all(&store, frames(10));
    store.finished().unwrap();

    let files = store.file_names();
    assert!(files.len() > 1, "expected a rollover, got {:?}", files);
    for file in &files {
        let size = std::fs::metadata(dir.path().join(file)).unwrap().len();
        assert!(size < max_file_size, "{} is {} bytes after finish", file, size);
    }

    // Files before the last one only point at the metadata
    for file in &files[..files.len() - 1] {
        let reader = TiffPageReader::open(dir.path().join(file)).unwrap();
        let description = reader.image_description().unwrap().unwrap();
        assert!(is_pointer_document(&description), "{} embeds the document", file);
    }
}

#[test]
fn test_reads_span_rolled_files_while_writing() {
    let dir = TempDir::new().unwrap();
    let store = create_store(
        test_config(dir.path()).with_max_images_per_file(Some(2)),
        Extent::new(1, 1, 5, 1),
    );

    put_all(&store, frames(5));
    store.wait_for_writes().unwrap();

    assert_eq!(store.file_names().len(), 3);
    for coords in frames(5) {
        let record = store.get_image(&coords).unwrap().unwrap();
        assert_eq!(record.coords, coords);
    }
    store.finished().unwrap();
}
