// Retrieval store
// Chunked ingestion, exact search and index rebuilds for one namespace directory

pub mod index;
pub mod metadata;
pub mod rebuild;


use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigError};
use crate::embeddings::{Embedder, TextSplitter, embed_normalized};
use crate::{Result, StoreError};

pub use index::FlatIndex;
pub use metadata::{ChunkRecord, FileRecord, FileSummary, MetadataStore};
pub use rebuild::{RebuildOutcome, RebuildState};

use rebuild::{RebuildCoordinator, RebuildRun, build_index};

pub const INDEX_FILE_NAME: &str = "vectors.fsvi";
pub const METADATA_FILE_NAME: &str = "metadata.json";
/// Returned by `ingest` when the text produced no chunks
pub const EMPTY_FILE_ID: &str = "local:empty";
pub const DEFAULT_TOP_K: usize = 5;

/// Content area served by its own store directory
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    #[default]
    Documents,
    Web,
    Wiki,
    Tracker,
}

impl Namespace {
    pub const ALL: [Self; 4] = [Self::Documents, Self::Web, Self::Wiki, Self::Tracker];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Web => "web",
            Self::Wiki => "wiki",
            Self::Tracker => "tracker",
        }
    }

    /// Store directory for this namespace under `stores_dir`
    #[inline]
    pub fn dir(self, stores_dir: &Path) -> PathBuf {
        stores_dir.join(self.as_str())
    }
}

impl fmt::Display for Namespace {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files making up one store on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub dir: PathBuf,
    pub index: PathBuf,
    pub metadata: PathBuf,
}

impl StorePaths {
    #[inline]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            index: dir.join(INDEX_FILE_NAME),
            metadata: dir.join(METADATA_FILE_NAME),
            dir,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub splitter: TextSplitter,
    /// Chunk texts per provider call during rebuilds
    pub rebuild_batch_size: usize,
    pub recent_files_limit: usize,
}

impl Default for StoreOptions {
    #[inline]
    fn default() -> Self {
        let store = crate::config::StoreConfig::default();
        Self {
            splitter: TextSplitter::default(),
            rebuild_batch_size: store.rebuild_batch_size,
            recent_files_limit: store.recent_files_limit,
        }
    }
}

impl StoreOptions {
    #[inline]
    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        config.store.validate()?;
        Ok(Self {
            splitter: TextSplitter::from_config(&config.chunking)?,
            rebuild_batch_size: config.store.rebuild_batch_size,
            recent_files_limit: config.store.recent_files_limit,
        })
    }
}

/// A search hit with the chunk it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkHit {
    pub chunk_id: u64,
    pub file_name: String,
    pub file_id: String,
    pub text: String,
    pub score: f32,
}

/// What `remove_file` did to the vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexAction {
    Rebuilt,
    Discarded,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveReport {
    pub file_id: String,
    pub file_found: bool,
    pub removed_chunks: usize,
    pub index_action: IndexAction,
    /// Set when re-embedding the remaining chunks failed and the index was
    /// discarded instead
    pub rebuild_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub initialized: bool,
    pub index_exists: bool,
    pub meta_exists: bool,
    pub index_ready: bool,
    pub chunks_count: usize,
    pub files_count: usize,
    pub dim: Option<usize>,
    pub model: Option<String>,
    pub rebuild: RebuildState,
    pub recent_files: Vec<FileSummary>,
}

#[derive(Debug, Default)]
struct StoreState {
    index: Option<FlatIndex>,
    meta: MetadataStore,
    /// Bumped by every mutation; background rebuilds commit only if it is
    /// unchanged since their snapshot
    generation: u64,
}

impl StoreState {
    fn is_aligned(&self) -> bool {
        self.index
            .as_ref()
            .is_none_or(|index| index.len() == self.meta.chunk_count())
    }

    fn consistency_error(&self) -> StoreError {
        StoreError::Consistency {
            index_len: self.index.as_ref().map_or(0, FlatIndex::len),
            chunk_count: self.meta.chunk_count(),
        }
    }
}

#[derive(Debug)]
struct StoreInner {
    paths: StorePaths,
    options: StoreOptions,
    embedder: RwLock<Option<Arc<dyn Embedder>>>,
    state: RwLock<StoreState>,
    rebuild: RebuildCoordinator,
    loaded: AtomicBool,
}

/// Vector retrieval store for one namespace directory.
///
/// Cheap to clone; clones share the same state. Operations that call the
/// embedder block for as long as the provider takes.
#[derive(Debug, Clone)]
pub struct RetrievalStore {
    inner: Arc<StoreInner>,
}

impl RetrievalStore {
    /// Create a store over `dir` without touching the filesystem
    #[inline]
    pub fn new(dir: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                paths: StorePaths::new(dir),
                options,
                embedder: RwLock::new(None),
                state: RwLock::new(StoreState::default()),
                rebuild: RebuildCoordinator::default(),
                loaded: AtomicBool::new(false),
            }),
        }
    }

    /// `new` followed by `init`
    #[inline]
    pub fn open(
        dir: impl Into<PathBuf>,
        options: StoreOptions,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let store = Self::new(dir, options);
        store.init(embedder)?;
        Ok(store)
    }

    /// Bind `embedder` and load persisted state if that has not happened yet.
    ///
    /// Calling it again only rebinds the embedder.
    #[inline]
    pub fn init(&self, embedder: Option<Arc<dyn Embedder>>) -> Result<()> {
        self.bind_embedder(embedder);
        self.inner.ensure_loaded()
    }

    /// Swap the embedding provider without reloading anything
    #[inline]
    pub fn bind_embedder(&self, embedder: Option<Arc<dyn Embedder>>) {
        if let Some(embedder) = &embedder {
            debug!(
                "Binding embedder {} to {}",
                embedder.model_name(),
                self.inner.paths.dir.display()
            );
        }
        *self
            .inner
            .embedder
            .write()
            .unwrap_or_else(PoisonError::into_inner) = embedder;
    }

    #[inline]
    pub fn paths(&self) -> &StorePaths {
        &self.inner.paths
    }

    #[inline]
    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    #[inline]
    pub fn model_name(&self) -> Option<String> {
        self.inner
            .current_embedder()
            .map(|embedder| embedder.model_name().to_string())
    }

    /// Split, embed and append `text` under a freshly generated file id.
    ///
    /// Returns [`EMPTY_FILE_ID`] without writing anything when the text
    /// produces no chunks.
    #[inline]
    pub fn ingest(&self, name: &str, text: &str) -> Result<String> {
        self.inner.ingest(None, name, text)
    }

    /// Like `ingest`, but under a caller-chosen `file_id` (a page URL, a
    /// wiki page id). An existing file record with that id is reused.
    ///
    /// Text that produces no chunks returns `file_id` without writing.
    #[inline]
    pub fn ingest_keyed(&self, file_id: &str, name: &str, text: &str) -> Result<String> {
        self.inner.ingest(Some(file_id), name, text)
    }

    /// Top-`k` chunk texts with their scores
    #[inline]
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>> {
        Ok(self
            .search_with_meta(query, k)?
            .into_iter()
            .map(|hit| (hit.text, hit.score))
            .collect())
    }

    /// Top-`k` hits with full chunk metadata for source attribution
    #[inline]
    pub fn search_with_meta(&self, query: &str, k: usize) -> Result<Vec<ChunkHit>> {
        self.inner.search_with_meta(query, k)
    }

    #[inline]
    pub fn get_status(&self) -> StoreStatus {
        self.inner.status()
    }

    /// Every file record with its live chunk count, newest first
    #[inline]
    pub fn get_files(&self) -> Vec<FileSummary> {
        self.inner.read_state().meta.file_summaries()
    }

    #[inline]
    pub fn remove_file(&self, file_id: &str) -> Result<RemoveReport> {
        self.inner.remove_file(file_id)
    }

    /// Discard the vector index, keeping metadata for a later rebuild
    #[inline]
    pub fn clear_index(&self) -> Result<()> {
        self.inner.ensure_loaded()?;
        let mut state = self.inner.write_state();
        state.generation += 1;
        self.inner.discard_index(&mut state)?;
        info!("Cleared vector index in {}", self.inner.paths.dir.display());
        Ok(())
    }

    /// Discard the index and all metadata
    #[inline]
    pub fn clear_all(&self) -> Result<()> {
        self.inner.ensure_loaded()?;
        let mut state = self.inner.write_state();
        state.generation += 1;
        state.index = None;
        state.meta.clear();
        remove_if_exists(&self.inner.paths.index)?;
        remove_if_exists(&self.inner.paths.metadata)?;
        info!("Cleared store {}", self.inner.paths.dir.display());
        Ok(())
    }

    /// Re-embed every chunk on the calling thread and commit the new index.
    ///
    /// Fails with [`StoreError::RebuildInProgress`] while a background
    /// rebuild runs.
    #[inline]
    pub fn rebuild_sync(&self) -> Result<RebuildState> {
        self.inner.rebuild_sync()
    }

    /// Start a background rebuild. While one is running this returns its
    /// current state instead of starting another.
    #[inline]
    pub fn rebuild_async(&self) -> Result<RebuildState> {
        StoreInner::rebuild_async(&self.inner)
    }

    /// Request cancellation of a running rebuild; a no-op otherwise
    #[inline]
    pub fn cancel_rebuild(&self) -> RebuildState {
        if self.inner.rebuild.request_cancel() {
            info!("Rebuild cancellation requested");
        }
        self.inner.rebuild.snapshot()
    }

    #[inline]
    pub fn rebuild_state(&self) -> RebuildState {
        self.inner.rebuild.snapshot()
    }

    /// Block until the background rebuild worker, if any, has exited
    #[inline]
    pub fn join_rebuild(&self) {
        self.inner.rebuild.join();
    }

    /// Cancel any running rebuild and wait for it to stop
    #[inline]
    pub fn close(&self) {
        self.inner.rebuild.request_cancel();
        self.inner.rebuild.join();
    }
}

impl StoreInner {
    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_embedder(&self) -> Option<Arc<dyn Embedder>> {
        self.embedder
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn require_embedder(&self) -> Result<Arc<dyn Embedder>> {
        self.current_embedder().ok_or(StoreError::NotConfigured)
    }

    /// Load persisted metadata and index once.
    ///
    /// An index that disagrees with the metadata (length, dimension or a
    /// damaged file) is dropped so the store comes up with metadata only.
    fn ensure_loaded(&self) -> Result<()> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut state = self.write_state();
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }

        fs::create_dir_all(&self.paths.dir)?;
        let mut meta = MetadataStore::load(&self.paths.metadata)?;

        let index = if self.paths.index.exists() {
            match FlatIndex::load(&self.paths.index, meta.dim()) {
                Ok(index) if index.len() == meta.chunk_count() => Some(index),
                Ok(index) => {
                    warn!(
                        "Vector index has {} vectors for {} chunks, discarding it; rebuild to restore search",
                        index.len(),
                        meta.chunk_count()
                    );
                    None
                }
                Err(err @ (StoreError::IndexFormat(_) | StoreError::DimensionMismatch { .. })) => {
                    warn!("Ignoring unusable vector index: {}", err);
                    None
                }
                Err(err) => return Err(err),
            }
        } else {
            None
        };
        meta.set_dim(index.as_ref().map(FlatIndex::dim));

        info!(
            "Opened store {} ({} chunks, {} files, index {})",
            self.paths.dir.display(),
            meta.chunk_count(),
            meta.files().len(),
            if index.is_some() { "ready" } else { "absent" }
        );

        *state = StoreState {
            index,
            meta,
            generation: 0,
        };
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    fn ingest(&self, file_id: Option<&str>, name: &str, text: &str) -> Result<String> {
        let embedder = self.require_embedder()?;
        self.ensure_loaded()?;

        let chunks = self.options.splitter.split(text);
        if chunks.is_empty() {
            debug!("Nothing to index in {}", name);
            return Ok(file_id.unwrap_or(EMPTY_FILE_ID).to_string());
        }

        let (vectors, dim) = embed_normalized(embedder.as_ref(), &chunks)?;

        let mut guard = self.write_state();
        let state = &mut *guard;

        if let Some(expected) = state.index.as_ref().map(FlatIndex::dim) {
            if expected != dim {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: dim,
                });
            }
            if !state.is_aligned() {
                let err = state.consistency_error();
                error!("{}", err);
                self.discard_index(state)?;
                return Err(err);
            }
        } else if state.meta.chunk_count() > 0 {
            // Appending now would pair these vectors with the wrong chunks
            return Err(state.consistency_error());
        }

        let file_id = file_id.map_or_else(|| state.meta.generate_file_id(name), str::to_string);
        let checkpoint = state.meta.checkpoint();
        let previous_len = state.index.as_ref().map(FlatIndex::len);

        let mut index = match state.index.take() {
            Some(index) => index,
            None => FlatIndex::create(dim)?,
        };
        index.add(&vectors)?;
        state.index = Some(index);

        let chunk_count = chunks.len();
        let records = state.meta.build_chunks(&file_id, name, chunks);
        state.meta.append_chunks(records);
        if !state.meta.has_file(&file_id) {
            state.meta.append_file(FileRecord::new(file_id.clone(), name));
        }
        state.meta.set_dim(Some(dim));
        state.generation += 1;

        if let Err(err) = self.persist(state) {
            error!("Failed to persist ingest of {}: {}", name, err);
            state.meta.rollback(checkpoint);
            match previous_len {
                Some(len) => {
                    if let Some(index) = state.index.as_mut() {
                        index.truncate(len);
                    }
                }
                None => state.index = None,
            }
            return Err(err);
        }

        info!("Ingested {} ({} chunks) as {}", name, chunk_count, file_id);
        Ok(file_id)
    }

    fn search_with_meta(&self, query: &str, k: usize) -> Result<Vec<ChunkHit>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let embedder = self.require_embedder()?;
        self.ensure_loaded()?;

        if self.read_state().index.as_ref().is_none_or(FlatIndex::is_empty) {
            return Ok(Vec::new());
        }

        let (mut vectors, _) = embed_normalized(embedder.as_ref(), &[query.to_string()])?;
        let query_vector = vectors.pop().unwrap_or_default();

        let misaligned = {
            let state = self.read_state();
            match &state.index {
                None => return Ok(Vec::new()),
                Some(index) if index.len() == state.meta.chunk_count() => {
                    let hits = index.search(&query_vector, k)?;
                    return Ok(hits
                        .into_iter()
                        .filter_map(|(position, score)| {
                            state.meta.chunk(position).map(|chunk| ChunkHit {
                                chunk_id: chunk.id,
                                file_name: chunk.file_name.clone(),
                                file_id: chunk.file_id.clone(),
                                text: chunk.text.clone(),
                                score,
                            })
                        })
                        .collect());
                }
                Some(_) => state.consistency_error(),
            }
        };

        error!("{}", misaligned);
        let mut state = self.write_state();
        if !state.is_aligned() {
            self.discard_index(&mut state)?;
        }
        Err(misaligned)
    }

    fn status(&self) -> StoreStatus {
        let state = self.read_state();
        let recent_files = state
            .meta
            .file_summaries()
            .into_iter()
            .take(self.options.recent_files_limit)
            .collect();

        StoreStatus {
            initialized: self.loaded.load(Ordering::Acquire),
            index_exists: self.paths.index.exists(),
            meta_exists: self.paths.metadata.exists(),
            index_ready: state.index.is_some() && state.is_aligned(),
            chunks_count: state.meta.chunk_count(),
            files_count: state.meta.distinct_file_count(),
            dim: state
                .index
                .as_ref()
                .map(FlatIndex::dim)
                .or_else(|| state.meta.dim()),
            model: self
                .current_embedder()
                .map(|embedder| embedder.model_name().to_string()),
            rebuild: self.rebuild.snapshot(),
            recent_files,
        }
    }

    fn remove_file(&self, file_id: &str) -> Result<RemoveReport> {
        self.ensure_loaded()?;
        let embedder = self.current_embedder();

        let mut guard = self.write_state();
        let state = &mut *guard;

        let file_found = state.meta.has_file(file_id);
        let previous_meta = state.meta.clone();
        let removed_chunks = state.meta.remove_file(file_id);

        if !file_found && removed_chunks == 0 {
            debug!("No file {} to remove", file_id);
            return Ok(RemoveReport {
                file_id: file_id.to_string(),
                file_found,
                removed_chunks,
                index_action: IndexAction::Unchanged,
                rebuild_error: None,
            });
        }

        state.generation += 1;

        if removed_chunks == 0 {
            // A file without chunks leaves the index aligned
            if let Err(err) = state.meta.save(&self.paths.metadata) {
                state.meta = previous_meta;
                return Err(err);
            }
            info!("Removed empty file {}", file_id);
            return Ok(RemoveReport {
                file_id: file_id.to_string(),
                file_found,
                removed_chunks,
                index_action: IndexAction::Unchanged,
                rebuild_error: None,
            });
        }

        let previous_index = state.index.clone();
        let mut rebuild_error = None;

        let outcome = match embedder {
            Some(embedder) if state.meta.chunk_count() > 0 => {
                let texts = state.meta.texts();
                match build_index(
                    embedder.as_ref(),
                    &texts,
                    self.options.rebuild_batch_size,
                    None,
                ) {
                    Ok(RebuildRun::Built(index)) => {
                        self.commit_index(state, index).map(|()| IndexAction::Rebuilt)
                    }
                    Ok(RebuildRun::Cancelled) => {
                        self.discard_index(state).map(|()| IndexAction::Discarded)
                    }
                    Err(err) => {
                        error!("Re-embedding after removing {} failed: {}", file_id, err);
                        rebuild_error = Some(err.to_string());
                        self.discard_index(state).map(|()| IndexAction::Discarded)
                    }
                }
            }
            _ => self.discard_index(state).map(|()| IndexAction::Discarded),
        };

        let index_action = match outcome {
            Ok(action) => action,
            Err(err) => {
                state.meta = previous_meta;
                state.index = previous_index;
                return Err(err);
            }
        };

        info!(
            "Removed {} ({} chunks), index {:?}",
            file_id, removed_chunks, index_action
        );
        Ok(RemoveReport {
            file_id: file_id.to_string(),
            file_found,
            removed_chunks,
            index_action,
            rebuild_error,
        })
    }

    fn rebuild_sync(&self) -> Result<RebuildState> {
        let embedder = self.require_embedder()?;
        self.ensure_loaded()?;

        if !self.rebuild.try_begin() {
            return Err(StoreError::RebuildInProgress);
        }

        let result = {
            let mut guard = self.write_state();
            let state = &mut *guard;
            let texts = state.meta.texts();
            self.rebuild.set_total(texts.len());
            info!("Rebuilding vector index from {} chunks", texts.len());

            build_index(
                embedder.as_ref(),
                &texts,
                self.options.rebuild_batch_size,
                Some(&self.rebuild),
            )
            .and_then(|run| match run {
                RebuildRun::Built(index) => {
                    state.generation += 1;
                    self.commit_index(state, index).map(|()| true)
                }
                RebuildRun::Cancelled => Ok(false),
            })
        };

        match result {
            Ok(true) => {
                info!("Rebuild committed");
                self.rebuild.finish(RebuildOutcome::Committed, None);
                Ok(self.rebuild.snapshot())
            }
            Ok(false) => {
                info!("Rebuild cancelled; previous index kept");
                self.rebuild.finish(RebuildOutcome::Cancelled, None);
                Ok(self.rebuild.snapshot())
            }
            Err(err) => {
                error!("Rebuild failed: {}", err);
                self.rebuild
                    .finish(RebuildOutcome::Failed, Some(err.to_string()));
                Err(err)
            }
        }
    }

    fn rebuild_async(this: &Arc<Self>) -> Result<RebuildState> {
        let embedder = this.require_embedder()?;
        this.ensure_loaded()?;

        if !this.rebuild.try_begin() {
            debug!("Rebuild already running");
            return Ok(this.rebuild.snapshot());
        }

        let (texts, generation) = {
            let state = this.read_state();
            (state.meta.texts(), state.generation)
        };
        this.rebuild.set_total(texts.len());
        info!(
            "Starting background rebuild of {} chunks in {}",
            texts.len(),
            this.paths.dir.display()
        );

        this.rebuild.reap_finished();
        let inner = Arc::clone(this);
        let spawned = thread::Builder::new()
            .name("rag-store-rebuild".to_string())
            .spawn(move || inner.run_rebuild_job(embedder.as_ref(), &texts, generation));

        match spawned {
            Ok(handle) => {
                this.rebuild.set_worker(handle);
                Ok(this.rebuild.snapshot())
            }
            Err(err) => {
                this.rebuild
                    .finish(RebuildOutcome::Failed, Some(err.to_string()));
                Err(err.into())
            }
        }
    }

    fn run_rebuild_job(&self, embedder: &dyn Embedder, texts: &[String], generation: u64) {
        let run = build_index(
            embedder,
            texts,
            self.options.rebuild_batch_size,
            Some(&self.rebuild),
        );

        let index = match run {
            Ok(RebuildRun::Built(index)) => index,
            Ok(RebuildRun::Cancelled) => {
                info!("Background rebuild cancelled; previous index kept");
                self.rebuild.finish(RebuildOutcome::Cancelled, None);
                return;
            }
            Err(err) => {
                error!("Background rebuild failed: {}", err);
                self.rebuild
                    .finish(RebuildOutcome::Failed, Some(err.to_string()));
                return;
            }
        };

        let mut guard = self.write_state();
        let state = &mut *guard;

        if self.rebuild.cancel_requested() {
            info!("Background rebuild cancelled before commit; previous index kept");
            self.rebuild.finish(RebuildOutcome::Cancelled, None);
            return;
        }

        if state.generation != generation {
            let message = "Store was modified during rebuild; result discarded".to_string();
            warn!("{}", message);
            self.rebuild.finish(RebuildOutcome::Failed, Some(message));
            return;
        }

        state.generation += 1;
        match self.commit_index(state, index) {
            Ok(()) => {
                info!("Background rebuild committed");
                self.rebuild.finish(RebuildOutcome::Committed, None);
            }
            Err(err) => {
                error!("Failed to commit rebuilt index: {}", err);
                self.rebuild
                    .finish(RebuildOutcome::Failed, Some(err.to_string()));
            }
        }
    }

    /// Persist `index` and swap it in together with its dimension.
    ///
    /// The in-memory state changes only after both files are written.
    fn commit_index(&self, state: &mut StoreState, index: Option<FlatIndex>) -> Result<()> {
        let Some(index) = index else {
            return self.discard_index(state);
        };

        index.save(&self.paths.index)?;
        let mut meta = state.meta.clone();
        meta.set_dim(Some(index.dim()));
        meta.save(&self.paths.metadata)?;

        state.meta = meta;
        state.index = Some(index);
        Ok(())
    }

    /// Drop the index in memory and on disk and persist the unset dimension
    fn discard_index(&self, state: &mut StoreState) -> Result<()> {
        state.index = None;
        state.meta.set_dim(None);
        remove_if_exists(&self.paths.index)?;
        state.meta.save(&self.paths.metadata)?;
        if state.meta.chunk_count() > 0 {
            warn!(
                "Vector index discarded for {}; {} chunks await a rebuild",
                self.paths.dir.display(),
                state.meta.chunk_count()
            );
        } else {
            debug!("Vector index discarded for {}", self.paths.dir.display());
        }
        Ok(())
    }

    fn persist(&self, state: &StoreState) -> Result<()> {
        if let Some(index) = &state.index {
            index.save(&self.paths.index)?;
        }
        state.meta.save(&self.paths.metadata)
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Write `bytes` to a sibling temp file and rename it over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a file path: {}", path.display()),
        )
    })?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)
}
