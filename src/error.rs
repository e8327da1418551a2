use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error(
        "Unsupported file type: {0}. Only PDF and DOCX are supported."
    )]
    UnsupportedFile(String),

    #[error("No documents loaded. Please upload documents first.")]
    NotReady,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to load {path}: {reason}")]
    Loader { path: PathBuf, reason: String },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("completion error: {0}")]
    Completion(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Whether the failure was caused by the caller rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFile(_)
                | Error::NotReady
                | Error::InvalidRequest(_)
                | Error::NotFound { .. }
        )
    }
}
