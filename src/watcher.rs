//! Watcher (C7): debounced filesystem watch loop that feeds file add,
//! change, and remove events into the indexer.

use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{IndexerError, IndexerResult};
use crate::indexer::Indexer;
use crate::walker::IgnoreMatcher;

/// Debounce window: events for the same path within this window are
/// coalesced into a single reconcile.
pub const WATCH_DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
    Upsert,
    Remove,
    Ignore,
}

fn classify(event: &DebouncedEvent) -> ChangeKind {
    use notify::EventKind;
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => ChangeKind::Upsert,
        EventKind::Remove(_) => ChangeKind::Remove,
        _ => ChangeKind::Ignore,
    }
}

/// Run the watch loop until `shutdown` fires, reconciling changed files
/// as they're debounced in and deleting removed ones synchronously.
pub async fn run(indexer: Arc<Indexer>, config: &Config, mut shutdown: tokio::sync::watch::Receiver<bool>) -> IndexerResult<()> {
    let matcher = Arc::new(IgnoreMatcher::build(indexer.root(), config));
    let root = indexer.root().to_path_buf();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<DebounceEventResult>();
    let mut debouncer = new_debouncer(Duration::from_millis(WATCH_DEBOUNCE_MS), None, move |result: DebounceEventResult| {
        let _ = tx.send(result);
    })
    .map_err(|e| IndexerError::Internal(anyhow::anyhow!("failed to start watcher: {e}")))?;

    debouncer
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| IndexerError::Internal(anyhow::anyhow!("failed to watch {}: {e}", root.display())))?;

    info!(root = %root.display(), debounce_ms = WATCH_DEBOUNCE_MS, "watching for changes");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("watch shutdown requested");
                break;
            }
            maybe_result = rx.recv() => {
                match maybe_result {
                    Some(Ok(events)) => {
                        process_batch(&indexer, &matcher, &root, events).await;
                        if let Err(e) = indexer.flush() {
                            warn!(error = %e, "failed to save journal after debounce flush");
                        }
                    }
                    Some(Err(errors)) => {
                        for e in errors {
                            warn!(error = %e, "watcher error");
                        }
                    }
                    None => break,
                }
            }
        }
    }

    indexer.flush()
}

async fn process_batch(indexer: &Arc<Indexer>, matcher: &IgnoreMatcher, root: &std::path::Path, events: Vec<DebouncedEvent>) {
    // Last event wins per path within a debounced batch.
    let mut changes: HashMap<PathBuf, ChangeKind> = HashMap::new();
    for event in &events {
        let kind = classify(event);
        if kind == ChangeKind::Ignore {
            continue;
        }
        for path in &event.paths {
            changes.insert(path.clone(), kind);
        }
    }

    for (path, kind) in changes {
        if !matcher.is_indexable(&path) {
            continue;
        }
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
        let absolute_path = path.to_string_lossy().replace('\\', "/");

        match kind {
            ChangeKind::Upsert => {
                if !path.is_file() {
                    continue;
                }
                use crate::indexer::ReconcileOutcome;
                match indexer.reconcile_file(&path, false).await {
                    Ok(ReconcileOutcome::Indexed(n)) => info!(path = %relative_path, chunks = n, "reindexed"),
                    Ok(ReconcileOutcome::Skipped) => {}
                    Ok(ReconcileOutcome::Failed(msg)) => warn!(path = %relative_path, error = %msg, "failed to reindex"),
                    Err(e) => warn!(path = %relative_path, error = %e, "failed to reindex"),
                }
            }
            ChangeKind::Remove => match indexer.delete_file(&absolute_path) {
                Ok(n) => {
                    if n > 0 {
                        info!(path = %relative_path, chunks_removed = n, "removed from index");
                    }
                }
                Err(e) => warn!(path = %relative_path, error = %e, "failed to remove from index"),
            },
            ChangeKind::Ignore => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_event_kinds() {
        use notify::event::{CreateKind, Event, EventKind, ModifyKind, RemoveKind};
        let mk = |kind: EventKind| DebouncedEvent {
            event: Event::new(kind),
            time: std::time::Instant::now(),
        };
        assert_eq!(classify(&mk(EventKind::Create(CreateKind::File))), ChangeKind::Upsert);
        assert_eq!(classify(&mk(EventKind::Modify(ModifyKind::Any))), ChangeKind::Upsert);
        assert_eq!(classify(&mk(EventKind::Remove(RemoveKind::File))), ChangeKind::Remove);
        assert_eq!(classify(&mk(EventKind::Access(notify::event::AccessKind::Any))), ChangeKind::Ignore);
    }
}
