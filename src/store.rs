//! Vector Store (C4): a disk-backed HNSW index (usearch) plus a sidecar
//! metadata map, keyed by a 128-bit random chunk id rather than a
//! monotonic counter so ids never alias across clear-and-rebuild cycles.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use usearch::ffi::{IndexOptions, MetricKind, ScalarKind};

use crate::embedder::EMBEDDING_DIM;
use crate::error::{IndexerError, IndexerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub id: String,
    /// Absolute path of the file this chunk came from; the identity key
    /// used for filepath-scoped deletes and for prefix-filtered search.
    pub filepath: String,
    pub line_start: usize,
    pub line_end: usize,
    pub content: String,
    pub language: String,
    pub content_hash: String,
    /// Wall-clock insertion time, ms since the epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: ChunkMeta,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub file_count: usize,
}

/// Oversampling factor applied before path-prefix filtering, since usearch
/// has no native predicate filter: we ask for more neighbors than needed
/// and discard the ones outside the prefix.
const PREFIX_FILTER_OVERSAMPLE: usize = 10;

/// Sanitize a user-supplied path prefix before it is used as a filter
/// value: strip bytes with code points `< 32` or `== 127`. The prefix
/// here is compared as a plain Rust string (`starts_with`), never
/// interpolated into a query language, so quote-escaping would change the
/// literal value being matched rather than protect against injection;
/// only control-character stripping applies.
pub fn sanitize_path_prefix(prefix: &str) -> String {
    prefix.chars().filter(|&c| (c as u32) >= 32 && c as u32 != 127).collect()
}

pub struct VectorStore {
    index: usearch::Index,
    metadata: HashMap<u64, ChunkMeta>,
    id_to_key: HashMap<String, u64>,
    next_key: u64,
    index_path: PathBuf,
    meta_path: PathBuf,
    dirty: bool,
}

fn index_options() -> IndexOptions {
    IndexOptions {
        dimensions: EMBEDDING_DIM,
        metric: MetricKind::Cos,
        quantization: ScalarKind::F16,
        connectivity: 16,
        expansion_add: 128,
        expansion_search: 64,
        multi: false,
    }
}

impl VectorStore {
    /// Open (or create) the store rooted at `data_dir`, loading any
    /// existing `index.usearch` + `metadata.json` pair from disk.
    pub fn open(data_dir: &Path) -> IndexerResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let index_path = data_dir.join("index.usearch");
        let meta_path = data_dir.join("metadata.json");

        let options = index_options();
        let index = usearch::Index::new(&options).map_err(|e| IndexerError::Store(e.to_string()))?;

        let metadata: HashMap<u64, ChunkMeta> = if index_path.exists() && meta_path.exists() {
            match index.load(index_path.to_string_lossy().as_ref()) {
                Ok(()) => std::fs::read_to_string(&meta_path)
                    .ok()
                    .and_then(|json| serde_json::from_str(&json).ok())
                    .unwrap_or_default(),
                Err(_) => {
                    index.reserve(4096).map_err(|e| IndexerError::Store(e.to_string()))?;
                    HashMap::new()
                }
            }
        } else {
            index.reserve(4096).map_err(|e| IndexerError::Store(e.to_string()))?;
            HashMap::new()
        };

        let next_key = metadata.keys().copied().max().map(|k| k + 1).unwrap_or(0);
        let id_to_key = metadata.iter().map(|(k, v)| (v.id.clone(), *k)).collect();

        Ok(Self {
            index,
            metadata,
            id_to_key,
            next_key,
            index_path,
            meta_path,
            dirty: false,
        })
    }

    /// Insert (or replace, if the id already exists) chunks with their
    /// embeddings. Marks the store dirty; call `save` to persist.
    pub fn insert(&mut self, items: &[(ChunkMeta, Vec<f32>)]) -> IndexerResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let needed = self.metadata.len() + items.len();
        self.index
            .reserve(needed.next_power_of_two().max(4096))
            .map_err(|e| IndexerError::Store(e.to_string()))?;
        for (meta, vector) in items {
            if let Some(&existing_key) = self.id_to_key.get(&meta.id) {
                let _ = self.index.remove(existing_key);
                self.metadata.remove(&existing_key);
            }
            let key = self.next_key;
            self.next_key += 1;
            self.index
                .add(key, vector)
                .map_err(|e| IndexerError::Store(e.to_string()))?;
            self.id_to_key.insert(meta.id.clone(), key);
            self.metadata.insert(key, meta.clone());
        }
        self.dirty = true;
        Ok(())
    }

    /// Remove chunks by chunk id.
    pub fn delete_by_ids(&mut self, ids: &[String]) -> IndexerResult<usize> {
        let mut removed = 0;
        for id in ids {
            if let Some(key) = self.id_to_key.remove(id) {
                let _ = self.index.remove(key);
                self.metadata.remove(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            self.dirty = true;
        }
        Ok(removed)
    }

    /// Remove every chunk belonging to `filepath`. Used when a file is
    /// deleted or about to be fully re-chunked.
    pub fn delete_by_filepath(&mut self, filepath: &str) -> IndexerResult<usize> {
        let keys: Vec<u64> = self
            .metadata
            .iter()
            .filter(|(_, meta)| meta.filepath == filepath)
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            let _ = self.index.remove(*key);
            if let Some(meta) = self.metadata.remove(key) {
                self.id_to_key.remove(&meta.id);
            }
        }
        if !keys.is_empty() {
            self.dirty = true;
        }
        Ok(keys.len())
    }

    /// k-nearest-neighbor search, optionally restricted to chunks whose
    /// absolute `filepath` starts with `path_prefix`. The prefix is
    /// compared as a literal string, never interpreted as a glob or
    /// regex, so arbitrary query text cannot escape the filter.
    pub fn search(&self, query: &[f32], k: usize, path_prefix: Option<&str>) -> IndexerResult<Vec<SearchResult>> {
        if self.index.size() == 0 || k == 0 {
            return Ok(Vec::new());
        }
        let fetch = match path_prefix {
            Some(_) => (k * PREFIX_FILTER_OVERSAMPLE).min(self.index.size()),
            None => k,
        };
        let result = self.index.search(query, fetch).map_err(|e| IndexerError::Store(e.to_string()))?;

        let mut hits = Vec::with_capacity(k);
        for (key, distance) in result.keys.iter().zip(result.distances.iter()) {
            let Some(meta) = self.metadata.get(key) else { continue };
            if let Some(prefix) = path_prefix {
                if !meta.filepath.starts_with(prefix) {
                    continue;
                }
            }
            hits.push(SearchResult {
                chunk: meta.clone(),
                score: 1.0 / (1.0 + distance),
            });
            if hits.len() == k {
                break;
            }
        }
        Ok(hits)
    }

    pub fn count(&self) -> usize {
        self.metadata.len()
    }

    pub fn stats(&self) -> StoreStats {
        let file_count = self
            .metadata
            .values()
            .map(|m| m.filepath.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        StoreStats {
            chunk_count: self.metadata.len(),
            file_count,
        }
    }

    /// Drop every chunk and reset the index to empty, without touching
    /// configuration or the on-disk journal.
    pub fn clear(&mut self) -> IndexerResult<()> {
        let options = index_options();
        self.index = usearch::Index::new(&options).map_err(|e| IndexerError::Store(e.to_string()))?;
        self.index.reserve(4096).map_err(|e| IndexerError::Store(e.to_string()))?;
        self.metadata.clear();
        self.id_to_key.clear();
        self.next_key = 0;
        self.dirty = true;
        Ok(())
    }

    /// Persist the index and metadata to disk if anything changed since
    /// the last save. Metadata is written via a tmp-file-then-rename so a
    /// crash mid-write never leaves a half-written JSON file behind.
    pub fn save(&mut self) -> IndexerResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.index
            .save(self.index_path.to_string_lossy().as_ref())
            .map_err(|e| IndexerError::Store(e.to_string()))?;

        let tmp_path = self.meta_path.with_extension("json.tmp");
        let json = serde_json::to_string(&self.metadata)?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.meta_path)?;

        self.dirty = false;
        Ok(())
    }

    /// Flush pending writes and release the store. Consumes the value so
    /// it can't be used again afterward; safe to call with nothing dirty.
    pub fn close(mut self) -> IndexerResult<()> {
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, filepath: &str) -> ChunkMeta {
        ChunkMeta {
            id: id.to_string(),
            filepath: filepath.to_string(),
            line_start: 1,
            line_end: 10,
            content: "fn f() {}".to_string(),
            language: "rust".to_string(),
            content_hash: "abc".to_string(),
            timestamp: 0,
        }
    }

    fn vec_of(seed: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = seed;
        v
    }

    #[test]
    fn insert_count_and_clear_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open(dir.path()).unwrap();
        store
            .insert(&[(meta("a", "/r/a.rs"), vec_of(1.0)), (meta("b", "/r/b.rs"), vec_of(2.0))])
            .unwrap();
        assert_eq!(store.count(), 2);
        store.clear().unwrap();
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn delete_by_filepath_removes_only_matching_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open(dir.path()).unwrap();
        store
            .insert(&[(meta("a", "/r/a.rs"), vec_of(1.0)), (meta("b", "/r/b.rs"), vec_of(2.0))])
            .unwrap();
        let removed = store.delete_by_filepath("/r/a.rs").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn save_and_reopen_preserves_chunks() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = VectorStore::open(dir.path()).unwrap();
            store.insert(&[(meta("a", "/r/a.rs"), vec_of(1.0))]).unwrap();
            store.save().unwrap();
        }
        let reopened = VectorStore::open(dir.path()).unwrap();
        assert_eq!(reopened.count(), 1);
    }

    #[test]
    fn close_flushes_pending_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open(dir.path()).unwrap();
        store.insert(&[(meta("a", "/r/a.rs"), vec_of(1.0))]).unwrap();
        store.close().unwrap();
        let reopened = VectorStore::open(dir.path()).unwrap();
        assert_eq!(reopened.count(), 1);
    }

    #[test]
    fn search_respects_path_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open(dir.path()).unwrap();
        store
            .insert(&[
                (meta("a", "/r/src/a.rs"), vec_of(1.0)),
                (meta("b", "/r/tests/b.rs"), vec_of(1.0)),
            ])
            .unwrap();
        let hits = store.search(&vec_of(1.0), 10, Some("/r/src/")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.filepath, "/r/src/a.rs");
    }

    #[test]
    fn sanitize_path_prefix_strips_control_bytes() {
        let dirty = "src/\u{0}auth\u{7f}.py";
        assert_eq!(sanitize_path_prefix(dirty), "src/auth.py");
    }
}
