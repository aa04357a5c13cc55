
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::write_atomic;
use crate::Result;

/// One embedded window of an ingested file. Its position in
/// [`MetadataStore::chunks`] is the position of its vector in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: u64,
    pub file_id: String,
    pub file_name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// A record stamped with the current time, truncated to whole seconds
    /// to match the persisted precision
    #[inline]
    pub fn new(file_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            display_name: display_name.into(),
            created_at: Utc::now().trunc_subsecs(0),
        }
    }
}

/// A file record joined with the number of chunks it currently owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub file_id: String,
    pub name: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    pub chunks: usize,
}

/// Lengths captured before a mutation so it can be undone in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    chunks: usize,
    files: usize,
    next_id: u64,
    dim: Option<usize>,
}

/// Ordered chunk registry plus file records, persisted as one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataStore {
    #[serde(default)]
    chunks: Vec<ChunkRecord>,
    #[serde(default)]
    files: Vec<FileRecord>,
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    dim: Option<usize>,
}

impl MetadataStore {
    /// Load the document at `path`, or start empty if it does not exist.
    ///
    /// Chunks whose file has no record get one synthesized so every chunk
    /// references a known file.
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No metadata at {}, starting empty", path.display());
            return Ok(Self::default());
        }

        let bytes = fs::read(path)?;
        let mut store: Self = serde_json::from_slice(&bytes)?;
        store.repair_orphans();

        if let Some(max_id) = store.chunks.iter().map(|c| c.id).max() {
            store.next_id = store.next_id.max(max_id + 1);
        }

        debug!(
            "Loaded metadata {} ({} chunks, {} files)",
            path.display(),
            store.chunks.len(),
            store.files.len()
        );
        Ok(store)
    }

    #[inline]
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(self)?;
        write_atomic(path, &bytes)?;
        Ok(())
    }

    #[inline]
    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    #[inline]
    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    #[inline]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    #[inline]
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    #[inline]
    pub fn set_dim(&mut self, dim: Option<usize>) {
        self.dim = dim;
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn chunk(&self, position: usize) -> Option<&ChunkRecord> {
        self.chunks.get(position)
    }

    /// Chunk texts in index order
    #[inline]
    pub fn texts(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.text.clone()).collect()
    }

    #[inline]
    pub fn has_file(&self, file_id: &str) -> bool {
        self.files.iter().any(|f| f.file_id == file_id)
    }

    /// Number of distinct file ids referenced by chunks
    #[inline]
    pub fn distinct_file_count(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| c.file_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Allocate a `local:<name>:<n>` id not used by any file or chunk.
    ///
    /// `n` starts one past the number of files already carrying `name`.
    #[inline]
    pub fn generate_file_id(&self, name: &str) -> String {
        let prior = self
            .files
            .iter()
            .filter(|f| f.display_name == name)
            .count();
        let mut n = prior + 1;
        loop {
            let candidate = format!("local:{}:{}", name, n);
            let taken = self.has_file(&candidate)
                || self.chunks.iter().any(|c| c.file_id == candidate);
            if !taken {
                return candidate;
            }
            n += 1;
        }
    }

    /// Build records for `texts` with ids continuing from `next_id`
    #[inline]
    pub fn build_chunks(
        &self,
        file_id: &str,
        file_name: &str,
        texts: Vec<String>,
    ) -> Vec<ChunkRecord> {
        texts
            .into_iter()
            .zip(self.next_id..)
            .map(|(text, id)| ChunkRecord {
                id,
                file_id: file_id.to_string(),
                file_name: file_name.to_string(),
                text,
            })
            .collect()
    }

    #[inline]
    pub fn append_chunks(&mut self, chunks: Vec<ChunkRecord>) {
        if let Some(max_id) = chunks.iter().map(|c| c.id).max() {
            self.next_id = self.next_id.max(max_id + 1);
        }
        self.chunks.extend(chunks);
    }

    #[inline]
    pub fn append_file(&mut self, file: FileRecord) {
        self.files.push(file);
    }

    /// Remove the file record and every chunk it owns, returning the number
    /// of chunks removed
    #[inline]
    pub fn remove_file(&mut self, file_id: &str) -> usize {
        self.files.retain(|f| f.file_id != file_id);
        let before = self.chunks.len();
        self.chunks.retain(|c| c.file_id != file_id);
        before - self.chunks.len()
    }

    /// Empty both lists and reset `next_id` and `dim`
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// File records with live chunk counts, newest first
    #[inline]
    pub fn file_summaries(&self) -> Vec<FileSummary> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for chunk in &self.chunks {
            *counts.entry(chunk.file_id.as_str()).or_default() += 1;
        }

        let mut summaries: Vec<FileSummary> = self
            .files
            .iter()
            .rev()
            .map(|f| FileSummary {
                file_id: f.file_id.clone(),
                name: f.display_name.clone(),
                created_at: f.created_at,
                chunks: counts.get(f.file_id.as_str()).copied().unwrap_or(0),
            })
            .collect();
        // Stable, so same-second files keep most-recently-added first
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            chunks: self.chunks.len(),
            files: self.files.len(),
            next_id: self.next_id,
            dim: self.dim,
        }
    }

    /// Undo appends made since `checkpoint`
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        self.chunks.truncate(checkpoint.chunks);
        self.files.truncate(checkpoint.files);
        self.next_id = checkpoint.next_id;
        self.dim = checkpoint.dim;
    }

    fn repair_orphans(&mut self) {
        let known: HashSet<String> = self.files.iter().map(|f| f.file_id.clone()).collect();
        let mut added = HashSet::new();
        for chunk in &self.chunks {
            if !known.contains(&chunk.file_id) && added.insert(chunk.file_id.clone()) {
                self.files.push(FileRecord {
                    file_id: chunk.file_id.clone(),
                    display_name: chunk.file_name.clone(),
                    created_at: DateTime::<Utc>::UNIX_EPOCH,
                });
            }
        }
        if !added.is_empty() {
            warn!("Registered {} files referenced only by chunks", added.len());
        }
    }
}
