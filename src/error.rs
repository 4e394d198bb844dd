use thiserror::Error;

/// Error taxonomy for the indexing/retrieval engine.
///
/// Transient-backend and backend-protocol failures from the embedding
/// client, file/walker/store/journal I/O, and bad CLI/query input each
/// get their own variant so callers can decide what to retry.
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("embedding backend unreachable or timed out after {attempts} attempt(s): {source}")]
    TransientBackend { attempts: u32, source: String },

    #[error("embedding backend returned an error: {0}")]
    BackendProtocol(String),

    #[error("file I/O error: {0}")]
    FileIo(#[from] std::io::Error),

    #[error("walker error: {0}")]
    WalkerIo(String),

    #[error("vector store error: {0}")]
    Store(String),

    #[error("journal error: {0}")]
    Journal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type IndexerResult<T> = Result<T, IndexerError>;
