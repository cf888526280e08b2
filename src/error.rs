use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort an ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("worker {worker_id} failed on {}: {cause:#}", path.display())]
    Worker {
        worker_id: usize,
        path: PathBuf,
        cause: anyhow::Error,
    },

    #[error("no `{suffix}` artifacts found under {}", dir.display())]
    NoArtifacts { dir: PathBuf, suffix: String },

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    /// Path of the artifact or directory the failure is attributed to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            IngestError::Worker { path, .. } => path,
            IngestError::NoArtifacts { dir, .. } => dir,
            IngestError::Io { path, .. } => path,
        }
    }
}
