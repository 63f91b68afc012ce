use thiserror::Error;

/// Failure taxonomy for the backup lifecycle.
///
/// Step-local failures are classified into a `RunResult` by the pipeline and
/// never crash the daemon; `InvalidSchedule` is the one fatal startup error.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("invalid schedule expression {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("database dump failed: {cause}")]
    DumpFailed { cause: String },

    #[error("failed to write {name} to store {store}: {cause}")]
    StoreWrite {
        store: String,
        name: String,
        cause: String,
    },

    #[error("failed to delete {name} at store {store}: {cause}")]
    StoreDelete {
        store: String,
        name: String,
        cause: String,
    },

    #[error("store {store} is unavailable: {cause}")]
    StoreUnavailable { store: String, cause: String },

    #[error("digest mismatch for {name}: expected {expected}, computed {actual}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;
