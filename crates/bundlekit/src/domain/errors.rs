//! Domain-specific errors.

use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by bundle discovery, loading, and unloading.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("invalid bundle directory {}: {reason}", path.display())]
    InvalidDirectory { path: PathBuf, reason: String },

    #[error("skipping script because it is unreadable: {}", path.display())]
    UnreadableScript { path: PathBuf },

    #[error("script {} failed to execute", path.display())]
    ScriptExecution {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("unsupported unload target: {}", path.display())]
    UnsupportedUnloadTarget { path: PathBuf },

    #[error("engine error: {0}")]
    Engine(String),
}

impl BundleError {
    /// Wrap an engine failure for the script at `path`.
    pub fn execution(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        Self::ScriptExecution {
            path: path.into(),
            source: source.into(),
        }
    }
}
