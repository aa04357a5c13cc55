#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

use std::fs;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rag_store::StoreError;
use rag_store::embeddings::{Embedder, HashingEmbedder, TextSplitter};
use rag_store::store::{
    EMPTY_FILE_ID, IndexAction, RebuildOutcome, RetrievalStore, StoreOptions,
};
use tempfile::TempDir;

const CORPUS: &[(&str, &str)] = &[
    (
        "rust.txt",
        "Rust is a systems programming language focused on ownership, borrowing and fearless concurrency.",
    ),
    (
        "ocean.txt",
        "Coral reefs host thousands of marine species and protect coastlines from storm surges.",
    ),
    (
        "bread.txt",
        "Sourdough bread rises slowly because wild yeast ferments the dough over many hours.",
    ),
];

fn hashing(dim: usize) -> Arc<dyn Embedder> {
    Arc::new(HashingEmbedder::new(dim).expect("valid dimension"))
}

fn options(batch_size: usize) -> StoreOptions {
    StoreOptions {
        splitter: TextSplitter::new(120, 20).expect("valid splitter"),
        rebuild_batch_size: batch_size,
        recent_files_limit: 10,
    }
}

fn open(temp: &TempDir, embedder: Arc<dyn Embedder>) -> RetrievalStore {
    RetrievalStore::open(temp.path().join("documents"), options(10), Some(embedder))
        .expect("store opens")
}

fn assert_aligned(store: &RetrievalStore) {
    let status = store.get_status();
    if status.chunks_count > 0 {
        assert!(status.index_ready, "index should be ready: {status:?}");
    }
}

/// Hashing embedder that blocks on every call until the test releases it
#[derive(Debug)]
struct GatedEmbedder {
    inner: HashingEmbedder,
    entered: Mutex<Sender<()>>,
    permits: Mutex<Receiver<()>>,
}

impl GatedEmbedder {
    fn new(dim: usize) -> (Arc<Self>, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (permit_tx, permit_rx) = mpsc::channel();
        let embedder = Arc::new(Self {
            inner: HashingEmbedder::new(dim).expect("valid dimension"),
            entered: Mutex::new(entered_tx),
            permits: Mutex::new(permit_rx),
        });
        (embedder, entered_rx, permit_tx)
    }
}

impl Embedder for GatedEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        // The test may have stopped listening; that is fine
        let _ = self.entered.lock().expect("entered lock").send(());
        self.permits
            .lock()
            .expect("permit lock")
            .recv()
            .map_err(|_| anyhow::anyhow!("gate closed"))?;
        self.inner.embed(texts)
    }
}

fn wait_until_idle(store: &RetrievalStore) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while store.rebuild_state().in_progress {
        assert!(Instant::now() < deadline, "rebuild did not finish");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn ingest_fifty_chunks(store: &RetrievalStore) {
    for i in 0..50 {
        store
            .ingest(&format!("note-{i}.txt"), &format!("note {i} about topic{i}"))
            .expect("ingest succeeds");
    }
    assert_eq!(store.get_status().chunks_count, 50);
}

#[test]
fn ingest_then_search_finds_the_text() {
    let temp = TempDir::new().expect("temp dir");
    let store = open(&temp, hashing(256));

    for (name, text) in CORPUS {
        store.ingest(name, text).expect("ingest succeeds");
    }

    let hits = store
        .search("wild yeast ferments sourdough", 1)
        .expect("search succeeds");
    assert_eq!(hits.len(), 1);
    assert!(hits[0].0.contains("Sourdough"));

    let hits = store
        .search_with_meta("ownership and borrowing", 3)
        .expect("search succeeds");
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].file_name, "rust.txt");
    assert_eq!(hits[0].file_id, "local:rust.txt:1");
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn k_larger_than_population_is_clamped() {
    let temp = TempDir::new().expect("temp dir");
    let store = open(&temp, hashing(64));
    store.ingest("one.txt", "single chunk").expect("ingest succeeds");

    assert_eq!(store.search("chunk", 50).expect("search succeeds").len(), 1);
}

#[test]
fn empty_input_returns_sentinel_without_writes() {
    let temp = TempDir::new().expect("temp dir");
    let store = open(&temp, hashing(64));

    assert_eq!(
        store.ingest("empty.txt", "   ").expect("ingest succeeds"),
        EMPTY_FILE_ID
    );
    let status = store.get_status();
    assert_eq!(status.chunks_count, 0);
    assert!(!status.meta_exists);
    assert!(store.search("anything", 5).expect("search succeeds").is_empty());
}

#[test]
fn same_name_files_are_independent() {
    let temp = TempDir::new().expect("temp dir");
    let store = open(&temp, hashing(128));

    let first = store
        .ingest("a.txt", "apples grow on trees in orchards")
        .expect("ingest succeeds");
    let second = store
        .ingest("a.txt", "submarines dive below the waves")
        .expect("ingest succeeds");
    assert_ne!(first, second);

    let report = store.remove_file(&first).expect("remove succeeds");
    assert!(report.file_found);
    assert_eq!(report.removed_chunks, 1);
    assert_eq!(report.index_action, IndexAction::Rebuilt);
    assert_aligned(&store);

    let hits = store.search_with_meta("submarines", 5).expect("search succeeds");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file_id, second);
}

#[test]
fn removing_the_only_file_empties_the_store() {
    let temp = TempDir::new().expect("temp dir");
    let store = open(&temp, hashing(64));
    let file_id = store
        .ingest("only.txt", "the one and only document")
        .expect("ingest succeeds");

    let report = store.remove_file(&file_id).expect("remove succeeds");
    assert_eq!(report.index_action, IndexAction::Discarded);

    let status = store.get_status();
    assert_eq!(status.chunks_count, 0);
    assert_eq!(status.dim, None);
    assert!(store.search("document", 5).expect("search succeeds").is_empty());
}

#[test]
fn alignment_holds_across_ingest_and_remove() {
    let temp = TempDir::new().expect("temp dir");
    let store = open(&temp, hashing(64));

    let long_text = "lorem ipsum dolor sit amet ".repeat(30);
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(
            store
                .ingest(&format!("doc{i}.txt"), &long_text)
                .expect("ingest succeeds"),
        );
        assert_aligned(&store);
    }
    for id in ids.iter().step_by(2) {
        store.remove_file(id).expect("remove succeeds");
        assert_aligned(&store);
    }

    // Every hit maps back to a surviving file
    let hits = store.search_with_meta("lorem ipsum", 100).expect("search succeeds");
    assert_eq!(hits.len(), store.get_status().chunks_count);
    assert!(hits.iter().all(|hit| !ids.iter().step_by(2).any(|id| *id == hit.file_id)));
}

#[test]
fn dimension_mismatch_keeps_existing_content() {
    let temp = TempDir::new().expect("temp dir");
    let store = open(&temp, hashing(8));
    store
        .ingest("first.txt", "eight dimensional content")
        .expect("ingest succeeds");

    store.bind_embedder(Some(hashing(16)));
    let err = store
        .ingest("second.txt", "sixteen dimensional content")
        .expect_err("dimension change must fail");
    assert!(matches!(
        err,
        StoreError::DimensionMismatch {
            expected: 8,
            actual: 16
        }
    ));

    let status = store.get_status();
    assert_eq!(status.chunks_count, 1);
    assert_eq!(status.dim, Some(8));

    store.bind_embedder(Some(hashing(8)));
    let hits = store.search("eight dimensional", 1).expect("search succeeds");
    assert_eq!(hits.len(), 1);
    assert!(hits[0].0.contains("eight"));
}

#[test]
fn state_survives_reopen() {
    let temp = TempDir::new().expect("temp dir");
    {
        let store = open(&temp, hashing(128));
        for (name, text) in CORPUS {
            store.ingest(name, text).expect("ingest succeeds");
        }
    }

    let store = open(&temp, hashing(128));
    let status = store.get_status();
    assert_eq!(status.chunks_count, 3);
    assert!(status.index_ready);

    let hits = store.search("coral reefs", 1).expect("search succeeds");
    assert!(hits[0].0.contains("Coral"));

    // Same-name ids continue past the persisted ones
    assert_eq!(
        store.ingest("rust.txt", "more rust").expect("ingest succeeds"),
        "local:rust.txt:2"
    );
}

#[test]
fn cancelled_rebuild_leaves_index_untouched() {
    let temp = TempDir::new().expect("temp dir");
    let store = open(&temp, hashing(32));
    ingest_fifty_chunks(&store);

    let index_path = store.paths().index.clone();
    let before = fs::read(&index_path).expect("index exists");

    let (gated, entered, permits) = GatedEmbedder::new(32);
    store.bind_embedder(Some(gated));

    let started = store.rebuild_async().expect("rebuild starts");
    assert!(started.in_progress);
    assert_eq!(started.total, 50);

    // First batch is inside the provider; cancel before letting it return
    entered.recv().expect("worker reached the provider");
    let state = store.cancel_rebuild();
    assert!(state.in_progress);
    permits.send(()).expect("release first batch");
    store.join_rebuild();

    let status = store.get_status();
    assert!(status.rebuild.cancelled);
    assert!(!status.rebuild.in_progress);
    assert_eq!(status.rebuild.last_outcome, Some(RebuildOutcome::Cancelled));
    assert!(status.rebuild.current < 50);
    assert!(status.index_ready);
    assert_eq!(fs::read(&index_path).expect("index exists"), before);
}

#[test]
fn rebuild_is_single_flight() {
    let temp = TempDir::new().expect("temp dir");
    let store = open(&temp, hashing(32));
    ingest_fifty_chunks(&store);

    let (gated, entered, permits) = GatedEmbedder::new(32);
    store.bind_embedder(Some(gated));
    store.rebuild_async().expect("rebuild starts");
    entered.recv().expect("worker reached the provider");

    // A second request reports the running job instead of starting another
    let again = store.rebuild_async().expect("second request is a no-op");
    assert!(again.in_progress);
    assert!(matches!(
        store.rebuild_sync(),
        Err(StoreError::RebuildInProgress)
    ));

    for _ in 0..5 {
        permits.send(()).expect("release batch");
    }
    store.join_rebuild();

    let state = store.rebuild_state();
    assert_eq!(state.last_outcome, Some(RebuildOutcome::Committed));
    assert_eq!(state.current, 50);
    assert_eq!(state.total, 50);
    assert!(store.get_status().index_ready);
}

#[test]
fn rebuild_result_is_discarded_if_store_changes() {
    let temp = TempDir::new().expect("temp dir");
    let store = open(&temp, hashing(32));
    ingest_fifty_chunks(&store);

    let (gated, entered, permits) = GatedEmbedder::new(32);
    store.bind_embedder(Some(gated));
    store.rebuild_async().expect("rebuild starts");
    entered.recv().expect("worker reached the provider");

    // The worker holds its own provider handle; ingest through a fresh one
    store.bind_embedder(Some(hashing(32)));
    store
        .ingest("late.txt", "arrived during the rebuild")
        .expect("ingest succeeds");

    for _ in 0..5 {
        permits.send(()).expect("release batch");
    }
    store.join_rebuild();

    let status = store.get_status();
    assert_eq!(status.rebuild.last_outcome, Some(RebuildOutcome::Failed));
    assert!(
        status
            .rebuild
            .error
            .as_deref()
            .is_some_and(|e| e.contains("modified"))
    );
    assert_eq!(status.chunks_count, 51);
    assert!(status.index_ready);

    let hits = store.search_with_meta("arrived during", 1).expect("search succeeds");
    assert_eq!(hits[0].file_name, "late.txt");
}

#[test]
fn async_rebuild_failure_is_recorded() {
    let temp = TempDir::new().expect("temp dir");
    let store = open(&temp, hashing(32));
    ingest_fifty_chunks(&store);
    let before = fs::read(&store.paths().index).expect("index exists");

    let (gated, entered, permits) = GatedEmbedder::new(32);
    store.bind_embedder(Some(gated));
    store.rebuild_async().expect("rebuild starts");
    entered.recv().expect("worker reached the provider");

    // Closing the gate makes the provider fail mid-rebuild
    drop(permits);
    wait_until_idle(&store);
    store.join_rebuild();

    let state = store.rebuild_state();
    assert_eq!(state.last_outcome, Some(RebuildOutcome::Failed));
    assert!(state.error.as_deref().is_some_and(|e| e.contains("gate closed")));
    assert_eq!(fs::read(&store.paths().index).expect("index exists"), before);
}

#[test]
fn close_stops_a_running_rebuild() {
    let temp = TempDir::new().expect("temp dir");
    let store = open(&temp, hashing(32));
    ingest_fifty_chunks(&store);

    let (gated, entered, permits) = GatedEmbedder::new(32);
    store.bind_embedder(Some(gated));
    store.rebuild_async().expect("rebuild starts");
    entered.recv().expect("worker reached the provider");

    let closer = {
        let store = store.clone();
        std::thread::spawn(move || store.close())
    };
    let deadline = Instant::now() + Duration::from_secs(10);
    while !store.rebuild_state().cancel_requested {
        assert!(Instant::now() < deadline, "cancellation was never requested");
        std::thread::sleep(Duration::from_millis(5));
    }
    // Cancellation is observed once the current batch returns
    permits.send(()).expect("release first batch");
    closer.join().expect("close returns");

    assert_eq!(
        store.rebuild_state().last_outcome,
        Some(RebuildOutcome::Cancelled)
    );
}
