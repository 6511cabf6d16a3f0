//! Read-only re-open integration tests.
//!
//! Tests verify:
//! - A finished dataset re-opens with its images, summary and metadata
//! - A dataset whose writer never finished is still readable
//! - Unreadable files are skipped, and an empty directory is rejected

use tempfile::TempDir;

use mmstack::{ContainerStore, IoError, RasterOrder, StorageError};

use super::test_utils::{create_store, image, put_all, test_config, Extent};

// =============================================================================
// Finished Datasets
// =============================================================================

#[test]
fn test_reopen_finished_dataset() {
    let dir = TempDir::new().unwrap();
    let extent = Extent::new(2, 1, 3, 2);
    let document = {
        let store = create_store(
            test_config(dir.path()).with_max_images_per_file(Some(4)),
            extent,
        );
        put_all(&store, extent.coords(RasterOrder::SliceMajor));
        store.finished().unwrap();
        store.metadata_document().unwrap()
    };

    let store = ContainerStore::open(dir.path()).unwrap();
    assert!(store.is_finished());
    assert!(!store.is_writable());
    assert_eq!(store.num_images(), 12);
    assert_eq!(store.file_names().len(), 4);
    assert_eq!(store.summary_metadata().frames, 3);
    assert_eq!(store.last_acquired_frame(), 2);
    assert_eq!(store.last_acquired_position(), 1);
    assert_eq!(store.metadata_document(), Some(document));

    for coords in extent.coords(RasterOrder::SliceMajor) {
        let expected = image(coords.channel, coords.slice, coords.frame, coords.position);
        let stored = store.get_image(&coords).unwrap().unwrap();
        assert_eq!(stored.pixels, expected.pixels);
    }

    assert!(matches!(
        store.put_image(image(0, 0, 3, 0)),
        Err(StorageError::ReadOnly)
    ));
    store.close().unwrap();
}

// =============================================================================
// Interrupted Datasets
// =============================================================================

#[test]
fn test_reopen_unfinished_dataset() {
    let dir = TempDir::new().unwrap();
    {
        let store = create_store(test_config(dir.path()), Extent::new(1, 1, 5, 1));
        for t in 0..3 {
            store.put_image_and_wait(image(0, 0, t, 0)).unwrap();
        }
        // Dropped without finished()
    }

    let store = ContainerStore::open(dir.path()).unwrap();
    assert_eq!(store.num_images(), 3);
    assert_eq!(store.last_acquired_frame(), 2);
    assert!(store.metadata_document().is_none());
    let stored = store
        .get_image(&mmstack::AcquisitionCoordinate::new(0, 0, 1, 0))
        .unwrap()
        .unwrap();
    assert_eq!(stored.pixels, image(0, 0, 1, 0).pixels);
}

// =============================================================================
// Error Handling
// =============================================================================

#[test]
fn test_open_skips_unreadable_files() {
    let dir = TempDir::new().unwrap();
    {
        let store = create_store(test_config(dir.path()), Extent::new(1, 1, 1, 1));
        store.put_image(image(0, 0, 0, 0)).unwrap();
        store.finished().unwrap();
    }
    std::fs::write(dir.path().join("junk.tif"), b"not a tiff").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

    let store = ContainerStore::open(dir.path()).unwrap();
    assert_eq!(store.num_images(), 1);
    assert_eq!(store.file_names(), vec!["MMStack_Pos0.ome.tif"]);
}

#[test]
fn test_open_empty_directory_fails() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        ContainerStore::open(dir.path()),
        Err(StorageError::Io(IoError::NotFound(_)))
    ));
}

#[test]
fn test_open_missing_directory_fails() {
    let dir = TempDir::new().unwrap();
    assert!(ContainerStore::open(dir.path().join("absent")).is_err());
}
