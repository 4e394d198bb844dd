//! State Journal (C5): tracks per-file content hashes and the chunk ids
//! that belong to each file, so the indexer can tell unchanged, modified,
//! new, and deleted files apart, and can delete a file's old chunks by
//! their canonical ids rather than by a path-based store query.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const JOURNAL_VERSION: &str = "1.0.0";

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Per-file record: content hash, last-modified time, and the chunk ids
/// minted for it. `chunk_ids` must equal the set of chunk ids the vector
/// store holds for this file at quiescent state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub hash: String,
    #[serde(rename = "lastModified")]
    pub last_modified: i64,
    #[serde(rename = "chunkIds")]
    pub chunk_ids: Vec<String>,
    #[serde(rename = "chunkCount")]
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexState {
    version: String,
    #[serde(rename = "lastSync")]
    last_sync: i64,
    files: HashMap<String, FileEntry>,
}

impl Default for IndexState {
    fn default() -> Self {
        Self {
            version: JOURNAL_VERSION.to_string(),
            last_sync: 0,
            files: HashMap::new(),
        }
    }
}

/// Result of comparing a file's current hash against the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Unchanged,
    Changed,
    New,
}

/// In-memory `IndexState`, lazily persisted to disk. A dirty flag avoids
/// rewriting the journal file on every reconcile when nothing actually
/// changed — the only state transitions into "dirty" are through the
/// mutating methods below (`record`, `forget`, `clear`).
pub struct Journal {
    path: PathBuf,
    state: IndexState,
    dirty: bool,
}

impl Journal {
    /// Load the journal from `data_dir/state.json`. A missing or corrupt
    /// file degrades to an empty journal rather than a hard failure — the
    /// next full index will simply treat every file as new.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join("state.json");
        let state = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<IndexState>(&text).ok())
            .unwrap_or_default();
        Self { path, state, dirty: false }
    }

    /// Compare `content_hash` for `filepath` against the recorded
    /// hash, without mutating the journal.
    pub fn check(&self, filepath: &str, content_hash: &str) -> FileState {
        match self.state.files.get(filepath) {
            Some(entry) if entry.hash == content_hash => FileState::Unchanged,
            Some(_) => FileState::Changed,
            None => FileState::New,
        }
    }

    /// The chunk ids currently recorded for a file, if any. Used to
    /// delete a file's old chunks by id before re-inserting new ones.
    pub fn chunk_ids(&self, filepath: &str) -> Option<&[String]> {
        self.state.files.get(filepath).map(|e| e.chunk_ids.as_slice())
    }

    pub fn entry(&self, filepath: &str) -> Option<&FileEntry> {
        self.state.files.get(filepath)
    }

    /// Record the result of a successful reconcile: the new hash and the
    /// fresh set of chunk ids minted for this file.
    pub fn record(&mut self, filepath: &str, content_hash: &str, chunk_ids: Vec<String>) {
        let chunk_count = chunk_ids.len();
        self.state.files.insert(
            filepath.to_string(),
            FileEntry {
                hash: content_hash.to_string(),
                last_modified: now_ms(),
                chunk_ids,
                chunk_count,
            },
        );
        self.dirty = true;
    }

    /// Forget a file, e.g. after its chunks have been deleted from the
    /// vector store because the file was removed.
    pub fn forget(&mut self, filepath: &str) {
        if self.state.files.remove(filepath).is_some() {
            self.dirty = true;
        }
    }

    /// Every filepath currently tracked by the journal.
    pub fn known_paths(&self) -> impl Iterator<Item = &str> {
        self.state.files.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.state.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.files.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.state.files.is_empty() {
            self.state.files.clear();
            self.dirty = true;
        }
    }

    /// Write the journal to disk if it changed since the last save, via a
    /// tmp-file-then-rename so a crash mid-write never leaves a
    /// half-written journal behind. Bumps `lastSync` on every save.
    pub fn save(&mut self) -> std::io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.state.last_sync = now_ms();
        let json = serde_json::to_string_pretty(&self.state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_file_is_new_until_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::load(dir.path());
        assert_eq!(journal.check("a.rs", "h1"), FileState::New);
        journal.record("a.rs", "h1", vec!["id-1".to_string()]);
        assert_eq!(journal.check("a.rs", "h1"), FileState::Unchanged);
        assert_eq!(journal.check("a.rs", "h2"), FileState::Changed);
    }

    #[test]
    fn chunk_ids_are_recalled_for_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::load(dir.path());
        journal.record("a.rs", "h1", vec!["id-1".to_string(), "id-2".to_string()]);
        assert_eq!(journal.chunk_ids("a.rs"), Some(&["id-1".to_string(), "id-2".to_string()][..]));
        assert_eq!(journal.entry("a.rs").unwrap().chunk_count, 2);
    }

    #[test]
    fn save_and_reload_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut journal = Journal::load(dir.path());
            journal.record("a.rs", "h1", vec!["id-1".to_string()]);
            journal.record("b.rs", "h2", vec!["id-2".to_string(), "id-3".to_string()]);
            journal.save().unwrap();
        }
        let reloaded = Journal::load(dir.path());
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.check("a.rs", "h1"), FileState::Unchanged);
        assert_eq!(reloaded.entry("b.rs").unwrap().chunk_count, 2);
    }

    #[test]
    fn forget_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::load(dir.path());
        journal.record("a.rs", "h1", vec!["id-1".to_string()]);
        journal.forget("a.rs");
        assert_eq!(journal.check("a.rs", "h1"), FileState::New);
        assert!(journal.chunk_ids("a.rs").is_none());
    }

    #[test]
    fn missing_journal_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::load(dir.path());
        assert!(journal.is_empty());
    }

    #[test]
    fn unchanged_record_does_not_mark_dirty_on_noop_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::load(dir.path());
        assert!(!journal.dirty);
        journal.save().unwrap();
        assert!(!dir.path().join("state.json").exists());
    }
}
