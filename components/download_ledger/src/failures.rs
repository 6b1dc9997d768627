// components/download_ledger/src/failures.rs
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A release that could not be obtained after all attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub url: String,
    pub attempts: u32,
    pub error: String,
}

impl FailureRecord {
    pub fn now(url: impl Into<String>, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            url: url.into(),
            attempts,
            error: error.into(),
        }
    }
}

/// Append-only JSON-lines record of failed releases
pub struct FailureLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FailureLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| LedgerError::io("create failure log directory", parent, e))?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &FailureRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LedgerError::io("open failure log", &self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| LedgerError::io("append failure record", &self.path, e))
    }

    /// All readable records, oldest first
    pub fn records(&self) -> Result<Vec<FailureRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerError::io("read failure log", &self.path, e)),
        };

        Ok(contents
            .lines()
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(error = %e, "skipping malformed failure record");
                    None
                }
            })
            .collect())
    }
}
