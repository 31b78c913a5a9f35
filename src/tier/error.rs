//! Error types for the storage tiers.

use thiserror::Error;

/// Errors raised by a durable key-value tier.
#[derive(Error, Debug)]
pub enum KvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "kv")]
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("quota exceeded writing '{key}': {size} bytes exceeds limit of {limit}")]
    QuotaExceeded {
        key: String,
        size: usize,
        limit: usize,
    },

    #[error("value under '{0}' is not valid UTF-8")]
    InvalidUtf8(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl KvError {
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// Errors raised by the native file tier.
#[derive(Error, Debug)]
pub enum FileStoreError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid native path: {0}")]
    InvalidPath(String),

    #[error("native file storage is not available on this platform")]
    Unavailable,

    #[error("no async runtime available for native storage")]
    NoRuntime,
}

impl FileStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_string())
        } else {
            Self::Io {
                path: path.to_string(),
                source,
            }
        }
    }
}
