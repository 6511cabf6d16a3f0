//! Stopped-acquisition integration tests.
//!
//! Tests verify:
//! - Planes missing from the last frame get placeholder metadata entries
//! - A well-formed, position-split acquisition stopped early gets blank pages
//! - Acquisitions that are not split, out of order, or time-major are left
//!   without blank pages
//! - Each position is completed on its own

use tempfile::TempDir;

use mmstack::{AcquisitionCoordinate, PageReader, RasterOrder, TiffPageReader};

use super::test_utils::{
    create_store, has_tiff_data, is_blank, put_all, size_t_values, test_config,
    tiff_data_count, Extent,
};

fn coords(c: u32, z: u32, t: u32, p: u32) -> AcquisitionCoordinate {
    AcquisitionCoordinate::new(c, z, t, p)
}

fn page_count(dir: &std::path::Path, file: &str) -> usize {
    TiffPageReader::open(dir.join(file))
        .unwrap()
        .image_coords()
        .len()
}

// =============================================================================
// Placeholder Entries
// =============================================================================

#[test]
fn test_missing_plane_gets_placeholder_entry() {
    let dir = TempDir::new().unwrap();
    let store = create_store(
        test_config(dir.path()).with_raster_order(RasterOrder::ChannelMajor),
        Extent::new(2, 1, 2, 1),
    );

    put_all(&store, [coords(0, 0, 0, 0), coords(1, 0, 0, 0), coords(0, 0, 1, 0)]);
    store.finished().unwrap();

    let document = store.metadata_document().unwrap();
    assert!(document.contains("DimensionOrder=\"XYCZT\""));
    assert_eq!(size_t_values(&document), vec![2]);
    assert_eq!(tiff_data_count(&document), 4);
    assert!(has_tiff_data(&document, 1, 0, 1));

    // Ran to its planned frame count, so no page is synthesized
    assert!(store.get_image(&coords(1, 0, 1, 0)).unwrap().is_none());
    assert_eq!(page_count(dir.path(), "MMStack_Pos0.ome.tif"), 3);
}

// =============================================================================
// Blank Page Completion
// =============================================================================

#[test]
fn test_stopped_acquisition_completed_with_blank_page() {
    let dir = TempDir::new().unwrap();
    let store = create_store(
        test_config(dir.path()).with_raster_order(RasterOrder::ChannelMajor),
        Extent::new(2, 1, 5, 1),
    );

    put_all(&store, [coords(0, 0, 0, 0), coords(1, 0, 0, 0), coords(0, 0, 1, 0)]);
    store.finished().unwrap();

    let blank = store
        .get_image(&coords(1, 0, 1, 0))
        .unwrap()
        .expect("blank page written");
    assert!(is_blank(&blank));
    assert_eq!(page_count(dir.path(), "MMStack_Pos0.ome.tif"), 4);

    let document = store.metadata_document().unwrap();
    assert_eq!(size_t_values(&document), vec![2]);
    assert_eq!(tiff_data_count(&document), 4);
    assert!(document.contains("<TiffData IFD=\"3\" FirstC=\"1\" FirstZ=\"0\" FirstT=\"1\""));
}

#[test]
fn test_unsplit_stopped_acquisition_not_completed() {
    let dir = TempDir::new().unwrap();
    let store = create_store(
        test_config(dir.path()).with_split_by_position(false),
        Extent::new(2, 1, 5, 1),
    );

    put_all(&store, [coords(0, 0, 0, 0), coords(1, 0, 0, 0), coords(0, 0, 1, 0)]);
    store.finished().unwrap();

    assert!(store.get_image(&coords(1, 0, 1, 0)).unwrap().is_none());
    assert_eq!(page_count(dir.path(), "MMStack.ome.tif"), 3);

    // Metadata still covers every declared plane
    let document = store.metadata_document().unwrap();
    assert_eq!(size_t_values(&document), vec![2]);
    assert!(has_tiff_data(&document, 1, 0, 1));
}

#[test]
fn test_out_of_order_acquisition_not_completed() {
    let dir = TempDir::new().unwrap();
    let store = create_store(test_config(dir.path()), Extent::new(2, 1, 5, 1));

    put_all(&store, [coords(1, 0, 0, 0), coords(0, 0, 0, 0), coords(0, 0, 1, 0)]);
    store.finished().unwrap();

    assert!(store.get_image(&coords(1, 0, 1, 0)).unwrap().is_none());
    let document = store.metadata_document().unwrap();
    assert_eq!(size_t_values(&document), vec![2]);
    assert!(has_tiff_data(&document, 1, 0, 1));
}

#[test]
fn test_time_major_acquisition_not_completed() {
    let dir = TempDir::new().unwrap();
    let store = create_store(
        test_config(dir.path()).with_time_major(true),
        Extent::new(2, 1, 5, 1),
    );

    put_all(&store, [coords(0, 0, 0, 0), coords(1, 0, 0, 0), coords(0, 0, 1, 0)]);
    store.finished().unwrap();

    assert!(store.get_image(&coords(1, 0, 1, 0)).unwrap().is_none());
}

#[test]
fn test_positions_completed_independently() {
    let dir = TempDir::new().unwrap();
    let extent = Extent::new(2, 1, 5, 2);
    let store = create_store(test_config(dir.path()), extent);

    put_all(
        &store,
        [
            coords(0, 0, 0, 0),
            coords(1, 0, 0, 0),
            coords(0, 0, 0, 1),
            coords(1, 0, 0, 1),
            coords(0, 0, 1, 0),
            coords(1, 0, 1, 0),
            coords(0, 0, 1, 1),
        ],
    );
    store.finished().unwrap();

    assert_eq!(page_count(dir.path(), "MMStack_Pos0.ome.tif"), 4);
    assert_eq!(page_count(dir.path(), "MMStack_Pos1.ome.tif"), 4);

    let blank = store.get_image(&coords(1, 0, 1, 1)).unwrap().unwrap();
    assert!(is_blank(&blank));
    let real = store.get_image(&coords(1, 0, 1, 0)).unwrap().unwrap();
    assert!(!is_blank(&real));

    let document = store.metadata_document().unwrap();
    assert_eq!(size_t_values(&document), vec![2, 2]);
    assert_eq!(tiff_data_count(&document), 8);
}

#[test]
fn test_complete_acquisition_untouched() {
    let dir = TempDir::new().unwrap();
    let extent = Extent::new(2, 2, 2, 1);
    let store = create_store(test_config(dir.path()), extent);

    put_all(&store, extent.coords(RasterOrder::SliceMajor));
    store.finished().unwrap();

    assert_eq!(page_count(dir.path(), "MMStack_Pos0.ome.tif"), 8);
    let document = store.metadata_document().unwrap();
    assert_eq!(tiff_data_count(&document), 8);
    assert_eq!(size_t_values(&document), vec![2]);
}
