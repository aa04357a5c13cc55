// Command implementations behind the CLI
// Every store call blocks, so each command hops onto the blocking pool


use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embeddings::build_embedder;
use crate::extract::extract_text;
use crate::store::{
    ChunkHit, EMPTY_FILE_ID, FileSummary, IndexAction, Namespace, RebuildOutcome, RebuildState,
    RemoveReport, RetrievalStore, StoreOptions, StoreStatus,
};

const SNIPPET_CHARS: usize = 240;
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Which store a command operates on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTarget {
    pub base_dir: PathBuf,
    pub namespace: Namespace,
}

impl StoreTarget {
    #[inline]
    pub fn new(base_dir: impl Into<PathBuf>, namespace: Namespace) -> Self {
        Self {
            base_dir: base_dir.into(),
            namespace,
        }
    }
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("Blocking store task panicked")?
}

/// Load the config under the target's base directory and open its store.
///
/// Commands that never embed text still get an embedder when one can be
/// built, so `status` can report the model.
fn open_store(target: &StoreTarget, require_embedder: bool) -> Result<RetrievalStore> {
    let config = Config::load(&target.base_dir).context("Failed to load configuration")?;
    let options = StoreOptions::from_config(&config).context("Invalid store settings")?;

    let embedder = match build_embedder(&config) {
        Ok(embedder) => Some(embedder),
        Err(e) if require_embedder => return Err(e),
        Err(e) => {
            warn!("Embedding provider unavailable: {:#}", e);
            None
        }
    };

    let dir = target.namespace.dir(&config.stores_dir());
    debug!("Opening {} store at {}", target.namespace, dir.display());
    RetrievalStore::open(&dir, options, embedder)
        .with_context(|| format!("Failed to open store at {}", dir.display()))
}

/// Extract and ingest each path, printing the file id assigned to it.
///
/// `name` overrides the display name and is only accepted with a single path.
#[inline]
pub async fn ingest_paths(
    target: StoreTarget,
    paths: Vec<PathBuf>,
    name: Option<String>,
) -> Result<Vec<String>> {
    if name.is_some() && paths.len() > 1 {
        bail!("--name can only be used when ingesting a single file");
    }

    blocking(move || {
        let store = open_store(&target, true)?;
        let mut file_ids = Vec::with_capacity(paths.len());
        let mut failures = 0;

        for path in &paths {
            let display_name = display_name(path, name.as_deref());
            match ingest_one(&store, path, &display_name) {
                Ok(file_id) if file_id == EMPTY_FILE_ID => {
                    println!("{} {} (no text to index)", style("-").dim(), display_name);
                    file_ids.push(file_id);
                }
                Ok(file_id) => {
                    println!("{} {} -> {}", style("✓").green(), display_name, file_id);
                    file_ids.push(file_id);
                }
                Err(e) => {
                    failures += 1;
                    eprintln!("{} {}: {:#}", style("✗").red(), display_name, e);
                }
            }
        }

        if failures > 0 {
            bail!("{} of {} files could not be ingested", failures, paths.len());
        }
        Ok(file_ids)
    })
    .await
}

fn ingest_one(store: &RetrievalStore, path: &Path, display_name: &str) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = extract_text(display_name, &bytes)?;
    let file_id = store.ingest(display_name, &text)?;
    info!("Ingested {} as {}", path.display(), file_id);
    Ok(file_id)
}

fn display_name(path: &Path, name: Option<&str>) -> String {
    name.map(str::to_string)
        .or_else(|| {
            path.file_name()
                .map(|file_name| file_name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| path.display().to_string())
}

#[inline]
pub async fn search(
    target: StoreTarget,
    query: String,
    k: usize,
    json: bool,
) -> Result<Vec<ChunkHit>> {
    let hits = blocking(move || {
        let store = open_store(&target, true)?;
        let status = store.get_status();
        if status.chunks_count > 0 && !status.index_ready {
            eprintln!(
                "{}",
                style("⚠ The vector index needs a rebuild; run `rag-store rebuild`.").yellow()
            );
        }
        Ok(store.search_with_meta(&query, k)?)
    })
    .await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&hits).context("Failed to serialize results")?
        );
    } else if hits.is_empty() {
        println!("No results.");
    } else {
        for (rank, hit) in hits.iter().enumerate() {
            println!("{}", format_hit(rank + 1, hit));
        }
    }

    Ok(hits)
}

fn format_hit(rank: usize, hit: &ChunkHit) -> String {
    format!(
        "{}. [{:.3}] {} ({})\n   {}",
        rank,
        hit.score,
        hit.file_name,
        hit.file_id,
        snippet(&hit.text, SNIPPET_CHARS)
    )
}

/// Collapse whitespace and cut `text` to at most `max_chars` characters
fn snippet(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[inline]
pub async fn show_status(target: StoreTarget, json: bool) -> Result<StoreStatus> {
    let namespace = target.namespace;
    let status = blocking(move || Ok(open_store(&target, false)?.get_status())).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialize status")?
        );
        return Ok(status);
    }

    println!("📊 Store status: {}", style(namespace).bold());
    println!("{}", "=".repeat(40));
    println!("   Chunks: {}", status.chunks_count);
    println!("   Files: {}", status.files_count);
    match status.dim {
        Some(dim) => println!("   Dimension: {}", dim),
        None => println!("   Dimension: -"),
    }
    println!(
        "   Model: {}",
        status.model.as_deref().unwrap_or("not configured")
    );
    if status.index_ready {
        println!("   Index: {}", style("ready").green());
    } else if status.chunks_count > 0 {
        println!(
            "   Index: {} (run `rag-store rebuild`)",
            style("needs rebuild").yellow()
        );
    } else {
        println!("   Index: empty");
    }
    if let Some(outcome) = status.rebuild.last_outcome {
        println!("   Last rebuild: {}", describe_outcome(outcome, &status.rebuild));
    }

    if !status.recent_files.is_empty() {
        println!();
        println!("Recent files:");
        for file in &status.recent_files {
            println!("   {}", format_file(file));
        }
    }

    Ok(status)
}

fn describe_outcome(outcome: RebuildOutcome, state: &RebuildState) -> String {
    match outcome {
        RebuildOutcome::Committed => format!("committed ({} chunks)", state.current),
        RebuildOutcome::Cancelled => "cancelled".to_string(),
        RebuildOutcome::Failed => format!(
            "failed: {}",
            state.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

#[inline]
pub async fn list_files(target: StoreTarget) -> Result<Vec<FileSummary>> {
    let files = blocking(move || Ok(open_store(&target, false)?.get_files())).await?;

    if files.is_empty() {
        println!("No files have been ingested yet.");
        println!("Use 'rag-store ingest <path>' to add one.");
        return Ok(files);
    }

    println!("Files ({} total):", files.len());
    for file in &files {
        println!("   {}", format_file(file));
    }
    Ok(files)
}

fn format_file(file: &FileSummary) -> String {
    format!(
        "{}  {}  {} chunks  {}",
        file.file_id,
        file.name,
        file.chunks,
        file.created_at.format("%Y-%m-%d %H:%M:%S")
    )
}

#[inline]
pub async fn remove_file(target: StoreTarget, file_id: String) -> Result<RemoveReport> {
    let report = blocking(move || Ok(open_store(&target, false)?.remove_file(&file_id)?)).await?;

    if !report.file_found && report.removed_chunks == 0 {
        println!("File not found: {}", report.file_id);
        return Ok(report);
    }

    println!(
        "Removed {} ({} chunks)",
        report.file_id, report.removed_chunks
    );
    match report.index_action {
        IndexAction::Rebuilt => println!("✓ Vector index rebuilt"),
        IndexAction::Unchanged => {}
        IndexAction::Discarded => {
            match &report.rebuild_error {
                Some(e) => eprintln!(
                    "{}",
                    style(format!("⚠ Re-embedding failed: {}", e)).yellow()
                ),
                None => eprintln!("{}", style("⚠ No embedding provider available").yellow()),
            }
            eprintln!("The vector index was discarded; run `rag-store rebuild` to restore search.");
        }
    }
    Ok(report)
}

/// Clear the index (or, with `all`, the whole store) after confirmation
#[inline]
pub async fn clear(target: StoreTarget, all: bool, yes: bool) -> Result<bool> {
    if !yes {
        if !console::user_attended() {
            bail!("Refusing to clear without --yes in a non-interactive session");
        }
        let prompt = if all {
            format!(
                "Delete every chunk, file record and the vector index of the {} store?",
                target.namespace
            )
        } else {
            format!(
                "Discard the vector index of the {} store? Metadata is kept for a rebuild.",
                target.namespace
            )
        };
        let confirmed = Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Nothing cleared.");
            return Ok(false);
        }
    }

    blocking(move || {
        let store = open_store(&target, false)?;
        if all {
            store.clear_all()?;
        } else {
            store.clear_index()?;
        }
        Ok(())
    })
    .await?;

    if all {
        println!("✓ Store cleared");
    } else {
        println!("✓ Vector index cleared");
    }
    Ok(true)
}

/// Re-embed every chunk.
///
/// Without `sync` the rebuild runs on the store's worker thread while this
/// task polls its progress; Ctrl-C requests cancellation.
#[inline]
pub async fn rebuild(target: StoreTarget, sync: bool) -> Result<RebuildState> {
    let state = if sync {
        blocking(move || Ok(open_store(&target, true)?.rebuild_sync()?)).await?
    } else {
        let store = blocking(move || {
            let store = open_store(&target, true)?;
            store.rebuild_async()?;
            Ok(store)
        })
        .await?;
        watch_rebuild(&store).await?;

        let worker = store.clone();
        blocking(move || {
            worker.join_rebuild();
            Ok(())
        })
        .await?;
        store.rebuild_state()
    };

    match state.last_outcome {
        Some(RebuildOutcome::Committed) => {
            println!("✓ Rebuilt index over {} chunks", state.current);
            Ok(state)
        }
        Some(RebuildOutcome::Cancelled) => {
            println!("Rebuild cancelled; the previous index is unchanged.");
            Ok(state)
        }
        Some(RebuildOutcome::Failed) | None => bail!(
            "Rebuild failed: {}",
            state.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

async fn watch_rebuild(store: &RetrievalStore) -> Result<()> {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new(0).with_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} chunks {msg}")
                .context("Invalid progress template")?
                .progress_chars("=> "),
        )
    } else {
        ProgressBar::hidden()
    };

    let mut ticker = tokio::time::interval(PROGRESS_POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_sent = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            signal = &mut ctrl_c, if !cancel_sent => {
                signal.context("Failed to listen for Ctrl-C")?;
                store.cancel_rebuild();
                cancel_sent = true;
                bar.set_message("cancelling");
            }
        }

        let state = store.rebuild_state();
        bar.set_length(state.total as u64);
        bar.set_position(state.current as u64);
        if !state.in_progress {
            break;
        }
    }

    bar.finish_and_clear();
    Ok(())
}
