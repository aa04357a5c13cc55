// Single-flight rebuild bookkeeping and the batched re-embedding loop


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use serde::Serialize;
use tracing::{debug, warn};

use super::index::FlatIndex;
use crate::Result;
use crate::embeddings::{Embedder, embed_normalized};

/// How the most recent rebuild attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildOutcome {
    Committed,
    Cancelled,
    Failed,
}

/// Progress of the current (or last) rebuild, reset when a new one starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildState {
    pub in_progress: bool,
    pub total: usize,
    pub current: usize,
    pub error: Option<String>,
    /// Terminal: set once a cancelled attempt has actually stopped. Right
    /// after `cancel_rebuild` this is still `false`; see `cancel_requested`.
    pub cancelled: bool,
    /// Cancellation was requested and the worker has not stopped yet
    pub cancel_requested: bool,
    pub last_outcome: Option<RebuildOutcome>,
}

/// Result of re-embedding every chunk text
#[derive(Debug)]
pub(crate) enum RebuildRun {
    /// `None` when there was nothing to embed
    Built(Option<FlatIndex>),
    Cancelled,
}

#[derive(Debug, Default)]
pub(crate) struct RebuildCoordinator {
    state: Mutex<RebuildState>,
    cancel: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RebuildCoordinator {
    fn state(&self) -> MutexGuard<'_, RebuildState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> RebuildState {
        self.state().clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state().in_progress
    }

    /// Claim the single rebuild slot. Returns `false` if a rebuild is
    /// already running.
    pub(crate) fn try_begin(&self) -> bool {
        let mut state = self.state();
        if state.in_progress {
            return false;
        }
        let last_outcome = state.last_outcome;
        *state = RebuildState {
            in_progress: true,
            last_outcome,
            ..RebuildState::default()
        };
        self.cancel.store(false, Ordering::SeqCst);
        true
    }

    pub(crate) fn set_total(&self, total: usize) {
        self.state().total = total;
    }

    pub(crate) fn set_progress(&self, current: usize) {
        self.state().current = current;
    }

    /// Release the slot and record how the attempt ended
    pub(crate) fn finish(&self, outcome: RebuildOutcome, error: Option<String>) {
        let mut state = self.state();
        state.in_progress = false;
        state.cancel_requested = false;
        state.cancelled = outcome == RebuildOutcome::Cancelled;
        state.error = error;
        state.last_outcome = Some(outcome);
    }

    /// Ask a running rebuild to stop at its next batch boundary
    pub(crate) fn request_cancel(&self) -> bool {
        let mut state = self.state();
        if state.in_progress {
            state.cancel_requested = true;
            self.cancel.store(true, Ordering::SeqCst);
        }
        state.in_progress
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join workers that have already exited. Called before spawning a new
    /// one so a live worker is never waited on here.
    pub(crate) fn reap_finished(&self) {
        let finished = {
            let mut workers = self.workers();
            let (finished, running): (Vec<_>, Vec<_>) =
                workers.drain(..).partition(JoinHandle::is_finished);
            *workers = running;
            finished
        };
        for handle in finished {
            join_worker(handle);
        }
    }

    pub(crate) fn set_worker(&self, handle: JoinHandle<()>) {
        self.workers().push(handle);
    }

    #[cfg(test)]
    fn worker_count(&self) -> usize {
        self.workers().len()
    }

    /// Wait for every background worker to exit
    pub(crate) fn join(&self) {
        let handles = std::mem::take(&mut *self.workers());
        for handle in handles {
            join_worker(handle);
        }
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!("Rebuild worker panicked");
    }
}

/// Re-embed `texts` in batches of `batch_size`, in order, into a new index.
///
/// With a `control`, progress is published after each batch and the
/// cancellation flag is checked before each batch and once more at the end.
/// Nothing is committed here; the caller decides what to do with the index.
pub(crate) fn build_index(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    control: Option<&RebuildCoordinator>,
) -> Result<RebuildRun> {
    let cancelled = || control.is_some_and(RebuildCoordinator::cancel_requested);
    let mut index: Option<FlatIndex> = None;
    let mut done = 0;

    for batch in texts.chunks(batch_size.max(1)) {
        if cancelled() {
            debug!("Rebuild cancelled after {}/{} chunks", done, texts.len());
            return Ok(RebuildRun::Cancelled);
        }

        let (vectors, dim) = embed_normalized(embedder, batch)?;
        let mut target = match index.take() {
            Some(existing) => existing,
            None => FlatIndex::create(dim)?,
        };
        target.add(&vectors)?;
        index = Some(target);

        done += batch.len();
        if let Some(control) = control {
            control.set_progress(done);
        }
        debug!("Rebuild embedded {}/{} chunks", done, texts.len());
    }

    if cancelled() {
        return Ok(RebuildRun::Cancelled);
    }
    Ok(RebuildRun::Built(index))
}
