use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading or writing the audit trail.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A shard or the log directory could not be accessed.
    #[error("audit log I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded.
    #[error("failed to encode audit record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuditError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AuditError::Io {
            path: path.into(),
            source,
        }
    }
}
