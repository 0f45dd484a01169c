use std::path::PathBuf;

use thiserror::Error;

/// Central error type for the remix-core crate.
///
/// Cache reads never produce an error: a corrupt or partial cache entry is
/// reported as "no cache" by [`crate::cache::CacheStore`] instead.
#[derive(Debug, Error)]
pub enum RemixError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("I/O error on {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Format conversion failed: {0}")]
    Conversion(String),

    #[error("Separation engine failed ({status})")]
    SeparationFailed {
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("Could not parse separation manifest: {reason}")]
    ManifestParse { reason: String, raw: String },

    #[error("Separation produced no usable stems")]
    NoStemsProduced,

    #[error("Separation cancelled")]
    Cancelled,

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Mixdown failed: {0}")]
    Mixdown(String),

    #[error("No file loaded")]
    NoSession,

    #[error("Cache dir not available")]
    CacheDirUnavailable,
}

impl RemixError {
    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RemixError::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Raw diagnostic text captured from the separation engine, if any.
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            RemixError::SeparationFailed { stdout, stderr, .. } => {
                Some(format!("--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}"))
            }
            RemixError::ManifestParse { raw, .. } => Some(raw.clone()),
            _ => None,
        }
    }

    /// Whether the failed operation may simply be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RemixError::AudioDevice(_) | RemixError::CacheDirUnavailable
        )
    }
}

// --- Implement From conversions for common errors ---
impl From<std::io::Error> for RemixError {
    fn from(e: std::io::Error) -> Self {
        RemixError::Io(e)
    }
}

impl From<serde_json::Error> for RemixError {
    fn from(e: serde_json::Error) -> Self {
        RemixError::Anyhow(e.into())
    }
}

impl From<hound::Error> for RemixError {
    fn from(e: hound::Error) -> Self {
        RemixError::Anyhow(e.into())
    }
}

impl From<symphonia::core::errors::Error> for RemixError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        RemixError::Anyhow(e.into())
    }
}

pub type Result<T> = std::result::Result<T, RemixError>;
