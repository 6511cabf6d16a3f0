//! mmstack - multipage OME-TIFF storage for microscopy acquisitions.
//!
//! This binary inspects datasets and writes synthetic acquisitions.

use clap::Parser;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mmstack::{
    config::{Cli, Command, InspectConfig, SynthConfig},
    keys, AcquisitionCoordinate, ContainerStore, ImageRecord, ImageTags, PixelBuffer,
    RasterOrder, StorageError, SummaryMetadata,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Inspect(config) => run_inspect(config),
        Command::Synth(config) => run_synth(config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose { "mmstack=debug" } else { "mmstack=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Inspect Command
// =============================================================================

fn run_inspect(config: InspectConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    let store = match ContainerStore::open(&config.directory) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let summary = store.summary_metadata();
    let files = store.file_names();
    let max = store.max_indices();
    let size = store.data_set_size().unwrap_or(0);
    let document_bytes = store.metadata_document().map(|d| d.len());

    if config.json {
        let report = serde_json::json!({
            "directory": config.directory.display().to_string(),
            "summary": summary,
            "files": files,
            "images": store.num_images(),
            "max_indices": max,
            "data_set_size": size,
            "metadata_bytes": document_bytes,
        });
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    println!("Dataset: {}", config.directory.display());
    println!("═════════════════════════════════");
    if !summary.prefix.is_empty() {
        println!("Prefix:     {}", summary.prefix);
    }
    println!(
        "Planned:    {} channel(s), {} slice(s), {} frame(s), {} position(s)",
        summary.channels, summary.slices, summary.frames, summary.positions
    );
    println!("Images:     {}", store.num_images());
    if let Some(max) = max {
        println!(
            "Max index:  c={} z={} t={} p={}",
            max.channel, max.slice, max.frame, max.position
        );
    }
    println!("Size:       {:.2} MB", size as f64 / (1024.0 * 1024.0));
    match document_bytes {
        Some(bytes) => println!("Metadata:   {} bytes of OME-XML", bytes),
        None => println!("Metadata:   (none found)"),
    }
    println!();
    println!("Files:");
    println!("─────────────────");
    for file in &files {
        println!("  {}", file);
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Synth Command
// =============================================================================

fn run_synth(config: SynthConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  Directory: {}", config.directory.display());
    info!(
        "  Extent: {} channel(s), {} slice(s), {} frame(s), {} position(s)",
        config.channels, config.slices, config.frames, config.positions
    );
    info!(
        "  Images: {}x{} {}-bit",
        config.width,
        config.height,
        if config.sixteen_bit { 16 } else { 8 }
    );
    if let Some(limit) = config.abort_after {
        warn!("  Stopping after {} image(s)", limit);
    }

    let started = Instant::now();
    let store = match ContainerStore::new(config.storage_config()) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to create storage: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let written = match write_acquisition(&store, &config) {
        Ok(written) => written,
        Err(e) => {
            error!("Acquisition failed: {}", e);
            let _ = store.finished();
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = store.finished() {
        error!("Failed to finish dataset: {}", e);
        return ExitCode::FAILURE;
    }

    let errors = store.take_errors();
    for e in &errors {
        warn!("Write error: {}", e);
    }

    info!("");
    info!(
        "Wrote {} image(s) into {} file(s) in {:.2?}",
        written,
        store.file_names().len(),
        started.elapsed()
    );
    for file in store.file_names() {
        info!("  {}", file);
    }

    if errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Queue every image of the synthetic acquisition, returning how many.
fn write_acquisition(store: &ContainerStore, config: &SynthConfig) -> Result<u64, StorageError> {
    let mut summary = SummaryMetadata::with_dimensions(
        config.channels,
        config.slices,
        config.frames,
        config.positions,
    )
    .with_prefix(config.prefix.clone());
    summary.width = Some(config.width);
    summary.height = Some(config.height);
    summary
        .extra
        .insert("SlicesFirst".into(), (!config.channels_first).into());
    summary.extra.insert("TimeFirst".into(), false.into());
    store.set_summary_metadata(summary)?;

    let limit = config.abort_after.map_or(u64::MAX, u64::from);
    let mut written = 0u64;

    for frame in 0..config.frames {
        for position in 0..config.positions {
            for (channel, slice) in raster(config) {
                if written >= limit {
                    return Ok(written);
                }
                let coords = AcquisitionCoordinate::new(channel, slice, frame, position);
                store.put_image(synthetic_image(config, coords, written)?)?;
                written += 1;
            }
        }
    }

    Ok(written)
}

/// (channel, slice) pairs of one frame in acquisition order.
fn raster(config: &SynthConfig) -> Vec<(u32, u32)> {
    let mut order = Vec::with_capacity((config.channels * config.slices) as usize);
    match config.raster_order() {
        RasterOrder::SliceMajor => {
            for channel in 0..config.channels {
                for slice in 0..config.slices {
                    order.push((channel, slice));
                }
            }
        }
        RasterOrder::ChannelMajor => {
            for slice in 0..config.slices {
                for channel in 0..config.channels {
                    order.push((channel, slice));
                }
            }
        }
    }
    order
}

fn synthetic_image(
    config: &SynthConfig,
    coords: AcquisitionCoordinate,
    sequence: u64,
) -> Result<ImageRecord, StorageError> {
    let (width, height) = (config.width, config.height);
    let seed = coords.channel * 31 + coords.slice * 7 + coords.frame * 3;

    let pixels = if config.sixteen_bit {
        let data: Vec<u16> = (0..height)
            .flat_map(|y| (0..width).map(move |x| ((x + y) * 16 + seed) as u16))
            .collect();
        PixelBuffer::gray16(width, height, data)?
    } else {
        let data: Vec<u8> = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x ^ y).wrapping_add(seed) as u8))
            .collect();
        PixelBuffer::gray8(width, height, data)?
    };

    let mut tags = ImageTags::new();
    tags.insert(
        keys::POSITION_NAME.into(),
        format!("Pos{}", coords.position).into(),
    );
    tags.insert(keys::CHANNEL.into(), format!("Ch{}", coords.channel).into());
    tags.insert(keys::EXPOSURE_MS.into(), 10.0.into());
    tags.insert(
        keys::ELAPSED_TIME_MS.into(),
        (sequence as f64 * 12.5).into(),
    );
    tags.insert(keys::X_POSITION_UM.into(), (coords.position as f64 * 500.0).into());
    tags.insert(keys::Y_POSITION_UM.into(), 0.0.into());
    tags.insert(keys::Z_POSITION_UM.into(), (coords.slice as f64 * 0.5).into());

    Ok(ImageRecord::new(coords, tags, pixels))
}
