//! Indexer (C6): the orchestrator tying the walker, chunker, embedding
//! client, vector store, and journal together into full-tree and
//! per-file reconcile operations.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunker;
use crate::config::Config;
use crate::embedder::EmbeddingClient;
use crate::error::{IndexerError, IndexerResult};
use crate::journal::{FileState, Journal};
use crate::lang::detect_language;
use crate::store::{sanitize_path_prefix, ChunkMeta, SearchResult, StoreStats, VectorStore};
use crate::walker;

/// First `BINARY_SAMPLE_SIZE` characters of a file are scanned for NUL
/// code points as a binary-content guard.
const BINARY_SAMPLE_SIZE: usize = 8000;

/// Outcome of reconciling a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// File was (re-)chunked, embedded, and inserted; carries chunk count.
    Indexed(usize),
    /// File had no work to do (unchanged hash, empty, oversized, binary,
    /// or zero chunks produced).
    Skipped,
    /// Reconcile failed; the journal was left untouched for this file.
    Failed(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deleted: usize,
    pub total_chunks: usize,
}

/// Callback invoked before each file is reconciled during a full-tree pass:
/// `(done_so_far, total, path)`.
pub type ProgressFn<'a> = dyn Fn(usize, usize, &Path) + 'a;

pub struct Indexer {
    root: PathBuf,
    config: Config,
    client: EmbeddingClient,
    store: Mutex<VectorStore>,
    journal: Mutex<Journal>,
}

impl Indexer {
    pub fn open(root: PathBuf, config: Config) -> IndexerResult<Self> {
        // The vector store lives under `<data_dir>/vectors/`, the journal
        // directly under `<data_dir>/state.json`.
        let store = VectorStore::open(&config.data_dir.join("vectors"))?;
        let journal = Journal::load(&config.data_dir);
        let client = EmbeddingClient::new(&config.ollama)?;
        Ok(Self {
            root,
            config,
            client,
            store: Mutex::new(store),
            journal: Mutex::new(journal),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// The journal and `ChunkMeta.filepath` are keyed by this absolute
    /// form; `relative_path` above is a separate, root-relative form used
    /// to pick a chunking boundary-regex family by extension.
    fn absolute_path(&self, path: &Path) -> String {
        path.to_string_lossy().replace('\\', "/")
    }

    /// Full-tree index: optionally clear the store and journal first, walk
    /// the repo, reconcile every file found, then delete chunks for files
    /// the journal still remembers but the walk no longer finds. Saves
    /// every `indexing.batch_size` files and once more at the end.
    pub async fn index_all(&self, force: bool, clear: bool, progress: Option<&ProgressFn<'_>>) -> IndexerResult<IndexStats> {
        if clear {
            self.clear()?;
        }

        let files = walker::walk(&self.root, &self.config);
        let total = files.len();
        let mut stats = IndexStats::default();
        let seen: HashSet<String> = files.iter().map(|p| self.absolute_path(p)).collect();

        for (i, path) in files.iter().enumerate() {
            if let Some(cb) = progress {
                cb(i + 1, total, path);
            }
            match self.reconcile_file(path, force).await {
                Ok(ReconcileOutcome::Indexed(n)) => {
                    stats.indexed += 1;
                    stats.total_chunks += n;
                }
                Ok(ReconcileOutcome::Skipped) => stats.skipped += 1,
                Ok(ReconcileOutcome::Failed(msg)) => {
                    warn!(path = %path.display(), error = %msg, "failed to index file");
                    stats.failed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to index file");
                    stats.failed += 1;
                }
            }

            if (i + 1) % self.config.indexing.batch_size.max(1) == 0 {
                self.save_unthrottled()?;
            }
        }

        let known: Vec<String> = {
            let journal = self.journal.lock();
            journal.known_paths().map(|s| s.to_string()).collect()
        };
        for absolute_path in known {
            if !seen.contains(&absolute_path) {
                stats.deleted += self.delete_file(&absolute_path)?;
            }
        }

        self.save_unthrottled()?;
        info!(?stats, "full index complete");
        Ok(stats)
    }

    /// Reconcile a single file against its last-known journal state.
    /// Never propagates file-level I/O or embedding failures to the
    /// caller as an `Err` for expected conditions — those
    /// come back as `ReconcileOutcome::Skipped`/`Failed` so a full-tree
    /// pass can keep going past one bad file. Returns `Err` only for
    /// conditions that should abort the whole pass (none at present; kept
    /// `Result`-shaped so store/journal I/O failures can still surface).
    pub async fn reconcile_file(&self, path: &Path, force: bool) -> IndexerResult<ReconcileOutcome> {
        // Step 1: stat; skip empty or oversized files.
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => return Ok(ReconcileOutcome::Skipped), // vanished between walk and reconcile
        };
        if !metadata.is_file() {
            return Ok(ReconcileOutcome::Skipped);
        }
        if metadata.len() == 0 || metadata.len() > self.config.indexing.max_file_size_bytes {
            return Ok(ReconcileOutcome::Skipped);
        }

        // Step 2: read as UTF-8. A read/decode failure means non-UTF-8
        // (effectively binary) content; treat as skipped, not failed.
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Ok(ReconcileOutcome::Skipped),
        };

        // Step 3: binary guard — more than one NUL among the first
        // BINARY_SAMPLE_SIZE characters.
        let nul_count = content.chars().take(BINARY_SAMPLE_SIZE).filter(|&c| c == '\0').count();
        if nul_count > 1 {
            return Ok(ReconcileOutcome::Skipped);
        }

        // Step 4: hash.
        let absolute_path = self.absolute_path(path);
        let relative_path = self.relative_path(path);
        let content_hash = chunker::hash_content(&content);

        // Step 5: unchanged-hash fast path.
        if !force {
            let state = self.journal.lock().check(&absolute_path, &content_hash);
            if state == FileState::Unchanged {
                return Ok(ReconcileOutcome::Skipped);
            }
        }

        // Step 6: delete the file's previous chunks by their canonical
        // ids, preserving the chunk-id -> file mapping rather than
        // leaning on a path-based query. A delete-by-filepath sweep
        // follows as a backstop: it heals orphan vectors left behind by a
        // prior reconcile that inserted new chunks but crashed before the
        // matching journal update, and is a no-op when nothing is orphaned.
        let old_ids = self.journal.lock().chunk_ids(&absolute_path).map(|ids| ids.to_vec());
        if let Some(ids) = &old_ids {
            self.store.lock().delete_by_ids(ids)?;
        }
        self.store.lock().delete_by_filepath(&absolute_path)?;

        // Step 7: chunk. Zero chunks is a skip, but the old chunks are
        // already gone, so the journal entry is recorded empty rather than
        // left stale — otherwise its chunk_ids would point at nothing.
        let raw_chunks = chunker::chunk(&content, &relative_path);
        if raw_chunks.is_empty() {
            self.journal.lock().record(&absolute_path, &content_hash, Vec::new());
            return Ok(ReconcileOutcome::Skipped);
        }

        // Step 8: embed with bounded concurrency. Leaving the journal
        // untouched on failure is what makes the next reconcile retry.
        let texts: Vec<String> = raw_chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = match self.client.embed_batch(&texts, self.config.indexing.concurrency).await {
            Ok(v) => v,
            Err(e) => return Ok(ReconcileOutcome::Failed(e.to_string())),
        };

        let ext = path.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default();
        let language = detect_language(&ext).to_string();
        let now = now_ms();

        // Step 9: mint fresh unique ids and insert.
        let chunk_ids: Vec<String> = (0..raw_chunks.len()).map(|_| Uuid::new_v4().to_string()).collect();
        let items: Vec<(ChunkMeta, Vec<f32>)> = raw_chunks
            .into_iter()
            .zip(vectors)
            .zip(chunk_ids.iter())
            .map(|((chunk, vector), id)| {
                let meta = ChunkMeta {
                    id: id.clone(),
                    filepath: absolute_path.clone(),
                    line_start: chunk.line_start,
                    line_end: chunk.line_end,
                    content: chunk.content,
                    language: language.clone(),
                    content_hash: content_hash.clone(),
                    timestamp: now,
                };
                (meta, vector)
            })
            .collect();

        let chunk_count = items.len();
        self.store.lock().insert(&items)?;

        // Step 10: update the journal.
        self.journal.lock().record(&absolute_path, &content_hash, chunk_ids);

        Ok(ReconcileOutcome::Indexed(chunk_count))
    }

    /// Remove every chunk for a file that no longer exists, and forget it
    /// in the journal. `absolute_path` must match the key the journal and
    /// vector store use. Deletes by the journal's recorded ids first, then
    /// sweeps by filepath to catch any orphans.
    pub fn delete_file(&self, absolute_path: &str) -> IndexerResult<usize> {
        let ids = self.journal.lock().chunk_ids(absolute_path).map(|ids| ids.to_vec());
        let mut removed = 0;
        if let Some(ids) = &ids {
            removed += self.store.lock().delete_by_ids(ids)?;
        }
        removed += self.store.lock().delete_by_filepath(absolute_path)?;
        self.journal.lock().forget(absolute_path);
        self.save_unthrottled()?;
        Ok(removed)
    }

    /// Embed `text` and return its nearest neighbors, optionally
    /// restricted to a path prefix.
    pub async fn query(&self, text: &str, k: usize, path_prefix: Option<&str>) -> IndexerResult<Vec<SearchResult>> {
        if text.trim().is_empty() {
            return Err(IndexerError::BadInput("query text must not be empty".to_string()));
        }
        let vector = self.client.embed(text).await?;
        let resolved_prefix = path_prefix.map(|p| sanitize_path_prefix(self.resolve_path_filter(p).as_str()));
        let store = self.store.lock();
        store.search(&vector, k.max(1), resolved_prefix.as_deref())
    }

    /// Resolve a user-supplied path filter to an absolute prefix matching
    /// the form `ChunkMeta.filepath` is stored in. Relative input is
    /// joined onto the repo root; already-absolute input is used as-is.
    fn resolve_path_filter(&self, filter: &str) -> String {
        let candidate = Path::new(filter);
        let absolute = if candidate.is_absolute() { candidate.to_path_buf() } else { self.root.join(candidate) };
        absolute.to_string_lossy().replace('\\', "/")
    }

    pub fn stats(&self) -> StoreStats {
        self.store.lock().stats()
    }

    /// Confirm the embedding backend is reachable and serving a model
    /// matching the configured name before doing any real work, so a
    /// misconfigured backend fails fast with an actionable message rather
    /// than one embed call at a time.
    pub async fn preflight(&self) -> IndexerResult<()> {
        if !self.client.ping().await {
            return Err(IndexerError::TransientBackend {
                attempts: 1,
                source: format!("no response from embedding backend at {}", self.config.ollama.base_url),
            });
        }
        if !self.client.has_model().await? {
            return Err(IndexerError::BackendProtocol(format!(
                "embedding backend at {} has no model matching '{}'",
                self.config.ollama.base_url, self.config.ollama.model
            )));
        }
        Ok(())
    }

    /// Flush pending writes and release both the store and the journal.
    /// Consumes the value so it can't be used again afterward.
    pub fn close(self) -> IndexerResult<()> {
        self.journal.into_inner().save().map_err(|e| IndexerError::Journal(e.to_string()))?;
        self.store.into_inner().close()
    }

    /// Unthrottled save of both stores, used at full-pass batch
    /// boundaries, the end of a full pass, after a watcher debounce
    /// flush, and on shutdown.
    pub fn flush(&self) -> IndexerResult<()> {
        self.save_unthrottled()
    }

    pub fn clear(&self) -> IndexerResult<()> {
        self.store.lock().clear()?;
        self.journal.lock().clear();
        self.save_unthrottled()
    }

    fn save_unthrottled(&self) -> IndexerResult<()> {
        self.store.lock().save()?;
        self.journal.lock().save().map_err(|e| IndexerError::Journal(e.to_string()))?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_config(data_dir: PathBuf) -> Config {
        let mut config = Config::default();
        config.data_dir = data_dir;
        config
    }

    #[test]
    fn relative_path_normalizes_separators() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join(".wb-grep"));
        let indexer = Indexer::open(dir.path().to_path_buf(), config).unwrap();
        let rel = indexer.relative_path(&dir.path().join("src").join("main.rs"));
        assert_eq!(rel, "src/main.rs");
    }

    #[test]
    fn delete_file_on_empty_store_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join(".wb-grep"));
        let indexer = Indexer::open(dir.path().to_path_buf(), config).unwrap();
        let removed = indexer.delete_file("missing.rs").unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn reconcile_skips_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path().join(".wb-grep"));
        config.indexing.max_file_size_bytes = 4;
        let indexer = Indexer::open(dir.path().to_path_buf(), config).unwrap();
        let file_path = dir.path().join("big.rs");
        fs::write(&file_path, "fn main() {}\n").unwrap();
        let result = indexer.reconcile_file(&file_path, false).await.unwrap();
        assert_eq!(result, ReconcileOutcome::Skipped);
    }

    #[tokio::test]
    async fn reconcile_skips_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join(".wb-grep"));
        let indexer = Indexer::open(dir.path().to_path_buf(), config).unwrap();
        let file_path = dir.path().join("empty.rs");
        fs::write(&file_path, "").unwrap();
        let result = indexer.reconcile_file(&file_path, false).await.unwrap();
        assert_eq!(result, ReconcileOutcome::Skipped);
    }

    #[tokio::test]
    async fn reconcile_skips_binary_content() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join(".wb-grep"));
        let indexer = Indexer::open(dir.path().to_path_buf(), config).unwrap();
        let file_path = dir.path().join("bin.txt");
        // Two NULs embedded in otherwise-valid UTF-8 text.
        fs::write(&file_path, "abc\0def\0ghi").unwrap();
        let result = indexer.reconcile_file(&file_path, false).await.unwrap();
        assert_eq!(result, ReconcileOutcome::Skipped);
    }

    #[tokio::test]
    async fn query_rejects_empty_text() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join(".wb-grep"));
        let indexer = Indexer::open(dir.path().to_path_buf(), config).unwrap();
        let result = indexer.query("   ", 5, None).await;
        assert!(result.is_err());
    }

    #[test]
    fn resolve_path_filter_produces_absolute_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join(".wb-grep"));
        let indexer = Indexer::open(dir.path().to_path_buf(), config).unwrap();
        let abs = dir.path().join("src").join("auth.py");
        let expected = abs.to_string_lossy().replace('\\', "/");
        assert_eq!(indexer.resolve_path_filter(&abs.to_string_lossy()), expected);
        assert_eq!(indexer.resolve_path_filter("src/auth"), expected.trim_end_matches(".py"));
    }

    #[tokio::test]
    async fn close_consumes_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join(".wb-grep"));
        let indexer = Indexer::open(dir.path().to_path_buf(), config).unwrap();
        let file_path = dir.path().join("a.rs");
        fs::write(&file_path, "fn main() {}\n").unwrap();
        indexer.reconcile_file(&file_path, false).await.unwrap();
        indexer.close().unwrap();
        assert!(dir.path().join(".wb-grep").join("state.json").exists());
    }

    proptest::proptest! {
        #[test]
        fn minted_chunk_ids_are_unique(n in 1usize..50) {
            let ids: Vec<String> = (0..n).map(|_| Uuid::new_v4().to_string()).collect();
            let unique: HashSet<&String> = ids.iter().collect();
            proptest::prop_assert_eq!(unique.len(), ids.len());
        }
    }
}
