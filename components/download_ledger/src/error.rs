//! Ledger error types

use release_primitives::ReleaseId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("io error during {operation} on {path}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no ledger entry for {0}")]
    UnknownRelease(ReleaseId),

    #[error("artifact name {0:?} cannot be stored in the ledger")]
    InvalidArtifactName(String),

    #[error("failed to encode failure record")]
    Encode(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LedgerError::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
