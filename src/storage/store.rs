//! The container store: public entry point for writing and reading a dataset.
//!
//! Producers hand images to [`ContainerStore::put_image`], which returns as
//! soon as the image is queued. A single background worker performs every
//! write in submission order. Images are readable immediately: queued images
//! are served from memory and written ones from the files being written.
//!
//! [`ContainerStore::finished`] drains the queue, completes the metadata
//! document, embeds it in one master file and points every other file at it.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::acquisition::{AcquisitionCoordinate, ImageRecord, ImageTags, SummaryMetadata};
use crate::config::StorageConfig;
use crate::error::{IoError, StorageError};
use crate::format::TiffPageReader;

use super::executor::WriteExecutor;
use super::file_set::{FileSet, FinalMetadata};
use super::ome::OmeMetadata;
use super::page::{PageReader, PageSource};
use super::tiff_source::TiffPageSource;

/// Side file holding the metadata document when no image file can take it.
pub const OME_SIDE_FILE_NAME: &str = "OMEXMLMetadata.ome";

const WORKER_NAME: &str = "mmstack-writer";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// State Shared With the Worker
// =============================================================================

struct Shared {
    /// Reader holding each written image.
    readers: RwLock<HashMap<AcquisitionCoordinate, Arc<dyn PageReader>>>,

    /// Images queued but not yet written.
    pending: Mutex<HashMap<AcquisitionCoordinate, ImageRecord>>,

    /// Failures of queued writes, kept until taken.
    errors: Mutex<Vec<StorageError>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            readers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            errors: Mutex::new(Vec::new()),
        }
    }

    fn register(&self, coords: AcquisitionCoordinate, reader: Arc<dyn PageReader>) {
        write(&self.readers).insert(coords, reader);
    }

    fn clear_pending(&self, coords: &AcquisitionCoordinate) {
        lock(&self.pending).remove(coords);
    }

    fn record_error(&self, error: StorageError) {
        lock(&self.errors).push(error);
    }
}

// =============================================================================
// Worker State
// =============================================================================

/// Everything the write worker owns.
struct WriterState<S: PageSource> {
    source: S,
    config: Arc<StorageConfig>,
    summary: SummaryMetadata,
    metadata: OmeMetadata,
    file_sets: BTreeMap<u32, FileSet<S::Writer>>,
    directory_ready: bool,
    shared: Arc<Shared>,
}

/// Result of finalizing the dataset.
struct Finalized {
    document: String,
    error: Option<StorageError>,
}

impl<S: PageSource> WriterState<S> {
    fn new(
        source: S,
        config: Arc<StorageConfig>,
        summary: SummaryMetadata,
        shared: Arc<Shared>,
    ) -> Self {
        let metadata = OmeMetadata::new(&summary, config.raster_order);
        Self {
            source,
            config,
            summary,
            metadata,
            file_sets: BTreeMap::new(),
            directory_ready: false,
            shared,
        }
    }

    fn set_summary(&mut self, summary: SummaryMetadata) {
        self.metadata.set_summary(&summary);
        self.summary = summary;
    }

    fn write(&mut self, record: ImageRecord) -> Result<String, StorageError> {
        let coords = record.coords;
        let result = self.write_to_file_set(record);
        self.shared.clear_pending(&coords);
        result
    }

    fn write_to_file_set(&mut self, record: ImageRecord) -> Result<String, StorageError> {
        if !self.directory_ready {
            fs::create_dir_all(&self.config.directory)?;
            self.directory_ready = true;
        }

        let key = if self.config.split_by_position {
            record.coords.position
        } else {
            0
        };
        let file_set = match self.file_sets.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                entry.insert(FileSet::new(key, &record, &self.config, &self.summary)?)
            }
        };

        let coords = record.coords;
        let outcome = file_set.write_image(record, &self.source, &mut self.metadata)?;
        self.shared.register(coords, outcome.reader);
        for e in outcome.soft_errors {
            self.shared.record_error(e);
        }
        Ok(outcome.label)
    }

    fn finish(&mut self, last_position: u32) -> Finalized {
        for file_set in self.file_sets.values_mut() {
            match file_set.finish_aborted_acq_if_needed(&self.source, &mut self.metadata) {
                Ok(added) => {
                    for (coords, reader) in added {
                        self.shared.register(coords, reader);
                    }
                }
                Err(e) => {
                    error!(
                        base_name = %file_set.base_name(),
                        error = %e,
                        "Failed to complete stopped acquisition"
                    );
                    self.shared.record_error(e);
                }
            }
        }

        for position in 0..=last_position {
            let key = if self.config.split_by_position {
                position
            } else {
                0
            };
            let Some(file_set) = self.file_sets.get(&key) else {
                warn!(position, "No file set for position; skipping frame count");
                continue;
            };
            self.metadata
                .set_num_frames(position, file_set.last_frame() + 1);
            if let Some(declared) = self.metadata.num_frames(position) {
                self.metadata
                    .fill_in_missing_tiff_datas(declared.saturating_sub(1), position);
            }
        }

        let document = self.metadata.to_xml();
        let mut first_error = None;

        let master = self.file_sets.iter().find_map(|(key, file_set)| {
            if !file_set.has_space_for_full_metadata(document.len()) {
                return None;
            }
            Some((
                *key,
                file_set.current_file_name()?.to_string(),
                file_set.current_uuid()?.to_string(),
            ))
        });
        let (master_key, master_file, master_uuid) = match master {
            Some((key, file, uuid)) => (Some(key), file, uuid),
            None => {
                let uuid = format!("urn:uuid:{}", Uuid::new_v4());
                let path = self.config.directory.join(OME_SIDE_FILE_NAME);
                if let Err(e) = fs::write(&path, &document) {
                    error!(path = %path.display(), error = %e, "Failed to write metadata side file");
                    first_error = Some(StorageError::from(e));
                } else {
                    info!(
                        path = %path.display(),
                        bytes = document.len(),
                        "Metadata does not fit in any image file; wrote side file"
                    );
                }
                (None, OME_SIDE_FILE_NAME.to_string(), uuid)
            }
        };

        for (key, file_set) in self.file_sets.iter_mut() {
            let metadata = if master_key == Some(*key) {
                FinalMetadata::Full(&document)
            } else {
                FinalMetadata::PointerTo {
                    file_name: &master_file,
                    uuid: &master_uuid,
                }
            };
            if let Err(e) = file_set.finished(metadata) {
                error!(base_name = %file_set.base_name(), error = %e, "Failed to finish file set");
                first_error.get_or_insert(e);
            }
        }

        info!(
            master = %master_file,
            file_sets = self.file_sets.len(),
            "Finished writing dataset"
        );

        Finalized {
            document,
            error: first_error,
        }
    }
}

// =============================================================================
// ContainerStore
// =============================================================================

/// A dataset of images on disk, being written or read back.
///
/// All methods take `&self`; share the store between producer and reader
/// threads with an `Arc`. Methods that wait on the write worker block the
/// calling thread, so call them through `spawn_blocking` from async code.
pub struct ContainerStore<S: PageSource = TiffPageSource> {
    config: Arc<StorageConfig>,
    source: Mutex<Option<S>>,
    executor: Mutex<Option<WriteExecutor<WriterState<S>>>>,
    shared: Arc<Shared>,
    summary: RwLock<SummaryMetadata>,

    writable: AtomicBool,
    finished: AtomicBool,
    last_frame: AtomicU32,
    last_position: AtomicU32,

    document: Mutex<Option<String>>,
    metadata: Mutex<Option<OmeMetadata>>,
}

impl ContainerStore<TiffPageSource> {
    /// Create a store writing OME-TIFF files into `config.directory`.
    ///
    /// The directory is created when the first image is written.
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        let source = TiffPageSource::from_config(&config);
        Self::with_source(config, source)
    }

    /// Open a finished (or interrupted) dataset read-only.
    ///
    /// Every `.tif` file in `directory` is indexed; files that cannot be
    /// parsed are skipped with a warning.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, StorageError> {
        let directory = directory.as_ref();
        let mut paths: Vec<PathBuf> = fs::read_dir(directory)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "tif"))
            .collect();
        paths.sort();

        let shared = Arc::new(Shared::new());
        let mut summary = None;
        let mut document = None;
        let mut last_frame = 0;
        let mut last_position = 0;
        let mut files = 0usize;

        for path in &paths {
            let reader = match TiffPageReader::open(path) {
                Ok(reader) => Arc::new(reader),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                    continue;
                }
            };
            files += 1;

            if summary.is_none() {
                summary = reader.summary_metadata();
            }
            if document.is_none() {
                if let Ok(Some(description)) = reader.image_description() {
                    if !description.contains("<BinaryOnly") {
                        document = Some(description);
                    }
                }
            }
            for coords in reader.image_coords() {
                last_frame = last_frame.max(coords.frame);
                last_position = last_position.max(coords.position);
                shared.register(coords, Arc::clone(&reader) as Arc<dyn PageReader>);
            }
        }

        if files == 0 {
            return Err(StorageError::Io(IoError::NotFound(format!(
                "no image files in {}",
                directory.display()
            ))));
        }
        if document.is_none() {
            document = fs::read_to_string(directory.join(OME_SIDE_FILE_NAME)).ok();
        }

        info!(
            directory = %directory.display(),
            files,
            images = read(&shared.readers).len(),
            "Opened dataset"
        );

        let store = Self {
            config: Arc::new(StorageConfig::new(directory)),
            source: Mutex::new(None),
            executor: Mutex::new(None),
            shared,
            summary: RwLock::new(summary.unwrap_or_default()),
            writable: AtomicBool::new(false),
            finished: AtomicBool::new(true),
            last_frame: AtomicU32::new(last_frame),
            last_position: AtomicU32::new(last_position),
            document: Mutex::new(document),
            metadata: Mutex::new(None),
        };
        Ok(store)
    }
}

impl<S: PageSource> ContainerStore<S> {
    /// Create a store writing through a custom page source.
    pub fn with_source(config: StorageConfig, source: S) -> Result<Self, StorageError> {
        config.validate().map_err(StorageError::InvalidConfig)?;
        debug!(directory = %config.directory.display(), "Created storage");

        Ok(Self {
            config: Arc::new(config),
            source: Mutex::new(Some(source)),
            executor: Mutex::new(None),
            shared: Arc::new(Shared::new()),
            summary: RwLock::new(SummaryMetadata::default()),
            writable: AtomicBool::new(true),
            finished: AtomicBool::new(false),
            last_frame: AtomicU32::new(0),
            last_position: AtomicU32::new(0),
            document: Mutex::new(None),
            metadata: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Set the acquisition summary used for file headers and metadata.
    ///
    /// Call before the first image; files already created keep the summary
    /// they were created with.
    pub fn set_summary_metadata(&self, summary: SummaryMetadata) -> Result<(), StorageError> {
        let guard = lock(&self.executor);
        if !self.writable.load(Ordering::SeqCst) {
            return Err(StorageError::ReadOnly);
        }
        *write(&self.summary) = summary.clone();
        if let Some(executor) = guard.as_ref() {
            executor.submit(move |state| state.set_summary(summary))?;
        }
        Ok(())
    }

    /// Queue an image for writing and return immediately.
    ///
    /// The image is readable through [`get_image`](Self::get_image) from
    /// this point on. Failures of the write itself are logged and can be
    /// collected with [`take_errors`](Self::take_errors).
    pub fn put_image(&self, record: ImageRecord) -> Result<(), StorageError> {
        if !self.writable.load(Ordering::SeqCst) {
            return Err(StorageError::ReadOnly);
        }
        let coords = record.coords;
        lock(&self.shared.pending).insert(coords, record.clone());

        let result = self.with_executor(|executor| {
            self.note_acquired(&coords);
            executor.submit(move |state| {
                if let Err(e) = state.write(record) {
                    error!(image = %coords, error = %e, "Failed to write image");
                    state.shared.record_error(e);
                }
            })
        });
        if result.is_err() {
            self.shared.clear_pending(&coords);
        }
        result
    }

    /// Write an image and wait until it is on disk, returning its label.
    pub fn put_image_and_wait(&self, record: ImageRecord) -> Result<String, StorageError> {
        if !self.writable.load(Ordering::SeqCst) {
            return Err(StorageError::ReadOnly);
        }
        let coords = record.coords;
        lock(&self.shared.pending).insert(coords, record.clone());

        let result = self
            .with_executor(|executor| {
                self.note_acquired(&coords);
                executor.call(move |state| state.write(record))
            })
            .and_then(|written| written);
        if result.is_err() {
            self.shared.clear_pending(&coords);
        }
        result
    }

    /// Block until every queued image has been written.
    pub fn wait_for_writes(&self) -> Result<(), StorageError> {
        let guard = lock(&self.executor);
        match guard.as_ref() {
            Some(executor) => executor.drain(),
            None => Ok(()),
        }
    }

    /// Number of images queued but not yet written.
    pub fn queued_writes(&self) -> usize {
        lock(&self.executor)
            .as_ref()
            .map_or(0, |executor| executor.queued())
    }

    /// Run `f` against the write worker, starting it on first use.
    ///
    /// Counters are bumped under the same lock that `finished` takes, so a
    /// finish never misses an image queued before it.
    fn with_executor<R>(
        &self,
        f: impl FnOnce(&WriteExecutor<WriterState<S>>) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let mut guard = lock(&self.executor);
        if !self.writable.load(Ordering::SeqCst) {
            return Err(StorageError::ReadOnly);
        }
        if guard.is_none() {
            let source = lock(&self.source)
                .take()
                .ok_or(StorageError::WriterShutdown)?;
            let state = WriterState::new(
                source,
                Arc::clone(&self.config),
                read(&self.summary).clone(),
                Arc::clone(&self.shared),
            );
            *guard = Some(WriteExecutor::spawn(
                WORKER_NAME,
                state,
                self.config.queue_warning_threshold,
            )?);
        }
        let executor = guard.as_ref().ok_or(StorageError::WriterShutdown)?;
        f(executor)
    }

    fn note_acquired(&self, coords: &AcquisitionCoordinate) {
        self.last_frame.fetch_max(coords.frame, Ordering::SeqCst);
        self.last_position
            .fetch_max(coords.position, Ordering::SeqCst);
    }

    // =========================================================================
    // Finishing
    // =========================================================================

    /// Write every queued image, complete the metadata and close all files.
    ///
    /// Afterwards the store is read-only. Calling this again does nothing.
    /// Finalization is best effort: every file is attempted and the first
    /// failure is returned.
    pub fn finished(&self) -> Result<(), StorageError> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.writable.store(false, Ordering::SeqCst);

        let Some(mut executor) = lock(&self.executor).take() else {
            info!("Finished storage with no images written");
            return Ok(());
        };

        let last_position = self.last_position.load(Ordering::SeqCst);
        let finalized = executor.call(move |state| state.finish(last_position));

        match executor.shutdown() {
            Ok(Some(state)) => *lock(&self.metadata) = Some(state.metadata),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Write worker did not stop cleanly"),
        }

        let finalized = finalized?;
        *lock(&self.document) = Some(finalized.document);
        match finalized.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Finish if needed, then release every file handle.
    ///
    /// Images are no longer readable through this store afterwards.
    pub fn close(&self) -> Result<(), StorageError> {
        let result = self.finished();
        write(&self.shared.readers).clear();
        lock(&self.shared.pending).clear();
        result
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Read an image, whether still queued or already written.
    pub fn get_image(
        &self,
        coords: &AcquisitionCoordinate,
    ) -> Result<Option<ImageRecord>, StorageError> {
        if let Some(record) = lock(&self.shared.pending).get(coords) {
            return Ok(Some(record.clone()));
        }
        let reader = read(&self.shared.readers).get(coords).cloned();
        match reader {
            Some(reader) => reader.read_image(coords),
            None => Ok(None),
        }
    }

    /// Read only an image's tags.
    pub fn get_image_tags(
        &self,
        coords: &AcquisitionCoordinate,
    ) -> Result<Option<ImageTags>, StorageError> {
        if let Some(record) = lock(&self.shared.pending).get(coords) {
            return Ok(Some(record.tags.clone()));
        }
        let reader = read(&self.shared.readers).get(coords).cloned();
        match reader {
            Some(reader) => reader.read_tags(coords),
            None => Ok(None),
        }
    }

    pub fn has_image(&self, coords: &AcquisitionCoordinate) -> bool {
        lock(&self.shared.pending).contains_key(coords)
            || read(&self.shared.readers).contains_key(coords)
    }

    /// Every stored or queued coordinate, sorted.
    pub fn image_keys(&self) -> Vec<AcquisitionCoordinate> {
        let mut keys: Vec<AcquisitionCoordinate> =
            read(&self.shared.readers).keys().copied().collect();
        keys.extend(lock(&self.shared.pending).keys().copied());
        keys.sort();
        keys.dedup();
        keys
    }

    /// Names of the files holding written images, sorted.
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.shared.readers)
            .values()
            .map(|reader| reader.file_name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn num_images(&self) -> usize {
        self.image_keys().len()
    }

    /// Largest index seen along each axis, or `None` for an empty store.
    pub fn max_indices(&self) -> Option<AcquisitionCoordinate> {
        self.image_keys()
            .into_iter()
            .reduce(|max, c| AcquisitionCoordinate {
                channel: max.channel.max(c.channel),
                slice: max.slice.max(c.slice),
                frame: max.frame.max(c.frame),
                position: max.position.max(c.position),
            })
    }

    /// Highest frame index handed to the store; never decreases.
    pub fn last_acquired_frame(&self) -> u32 {
        self.last_frame.load(Ordering::SeqCst)
    }

    /// Highest position index handed to the store; never decreases.
    pub fn last_acquired_position(&self) -> u32 {
        self.last_position.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    pub fn disk_location(&self) -> &Path {
        &self.config.directory
    }

    /// Total size in bytes of the files in the dataset directory.
    pub fn data_set_size(&self) -> Result<u64, StorageError> {
        let mut total = 0;
        for entry in fs::read_dir(&self.config.directory)? {
            let metadata = entry?.metadata()?;
            if metadata.is_file() {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    pub fn summary_metadata(&self) -> SummaryMetadata {
        read(&self.summary).clone()
    }

    /// Drain the errors of failed background writes.
    pub fn take_errors(&self) -> Vec<StorageError> {
        std::mem::take(&mut *lock(&self.shared.errors))
    }

    /// The full metadata document, once finished (or as found on open).
    pub fn metadata_document(&self) -> Option<String> {
        lock(&self.document).clone()
    }

    /// The metadata accumulator as it stood when writing finished.
    pub fn metadata(&self) -> Option<OmeMetadata> {
        lock(&self.metadata).clone()
    }
}

impl<S: PageSource> Drop for ContainerStore<S> {
    fn drop(&mut self) {
        let executor = self
            .executor
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if executor.is_some() {
            warn!(
                directory = %self.config.directory.display(),
                "Storage dropped before finished(); files are left without metadata"
            );
        }
    }
}
