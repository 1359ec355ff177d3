//! Error types for the loaders
//!
//! Separates dataset problems (fatal: a corrupt dataset cannot produce
//! trustworthy training data) from expected pipeline conditions such as an
//! empty buffer, and from API misuse.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for all loader operations
#[derive(Debug, Error)]
pub enum LoaderError {
    // ========== Dataset Errors ==========
    /// Dataset directory missing, or no entries matched the naming conventions
    #[error("no samples found at {}: {reason}", path.display())]
    NotFound { path: PathBuf, reason: String },

    /// A required file of a sample is missing or malformed. The worker stops
    /// after sending it; callers must treat it as unrecoverable (`is_fatal()`).
    #[error("failed to decode {id}: {source:#}")]
    Decode {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Filesystem error outside of sample decoding
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ========== Pipeline Errors ==========
    /// Nothing has been decoded yet; poll `has_data()` and retry
    #[error("buffer is empty")]
    EmptyBuffer,

    /// The dequeued sample does not carry the requested view
    #[error("sample has no {view}")]
    MissingView { view: &'static str },

    // ========== API Misuse ==========
    /// `start()` called while the prefetch worker is running
    #[error("the loader thread is already running; check that autostart is not set or don't call start()")]
    AlreadyRunning,

    /// Operation needs an index, but `start()` was never called
    #[error("loader has not been started")]
    NotStarted,

    /// Random access beyond the dataset index
    #[error("index {index} out of range for {len} entries")]
    IndexOutOfRange { index: usize, len: usize },

    /// The source cannot answer this query (e.g. no per-view poses)
    #[error("{source_name} does not support {operation}")]
    Unsupported {
        source_name: String,
        operation: &'static str,
    },

    /// Rejected configuration value
    #[error("invalid loader config: {reason}")]
    InvalidConfig { reason: String },

    /// Configuration document could not be parsed
    #[error("failed to parse loader config: {0}")]
    Config(#[from] serde_json::Error),

    // ========== Runtime Errors ==========
    /// The prefetch thread could not be spawned
    #[error("failed to spawn prefetch thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The prefetch thread panicked before it could be joined
    #[error("prefetch worker panicked")]
    WorkerPanicked,
}

impl LoaderError {
    /// Wraps a decode failure for the sample rendered as `id`.
    pub fn decode(id: impl Into<String>, source: anyhow::Error) -> Self {
        LoaderError::Decode {
            id: id.into(),
            source,
        }
    }

    /// Builds a `NotFound` for `path`.
    pub fn not_found(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        LoaderError::NotFound {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the dataset itself is unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LoaderError::NotFound { .. } | LoaderError::Decode { .. } | LoaderError::Io { .. }
        )
    }

    /// Returns true if polling again later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoaderError::EmptyBuffer)
    }
}

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_error_classes() {
        let decode = LoaderError::decode("frame-000000", anyhow!("pose file missing"));
        assert!(decode.is_fatal());
        assert!(!decode.is_retryable());
        assert!(decode.to_string().contains("pose file missing"));

        assert!(LoaderError::EmptyBuffer.is_retryable());
        assert!(!LoaderError::EmptyBuffer.is_fatal());
        assert!(!LoaderError::AlreadyRunning.is_fatal());

        let unsupported = LoaderError::Unsupported {
            source_name: "vol_ref".into(),
            operation: "closest view lookup",
        };
        assert!(!unsupported.is_fatal());
        assert_eq!(unsupported.to_string(), "vol_ref does not support closest view lookup");
    }

    #[test]
    fn test_decode_keeps_context_chain() {
        let inner = anyhow!("unexpected token 'x'").context("line 2 of pose.txt");
        let err = LoaderError::decode("scan24/000001", inner);
        let msg = err.to_string();
        assert!(msg.contains("line 2 of pose.txt"));
        assert!(msg.contains("unexpected token"));
    }
}
