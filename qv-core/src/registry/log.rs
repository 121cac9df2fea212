//! Append-only registration log.
//!
//! One line per accepted registration:
//!
//! ```text
//! 03-05-2024 07:08:09 > desk-42 connected.
//! ```

use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::RelayError;

/// First line written to a fresh log.
pub const LOG_HEADER: &str = "Starting desktop connection log.\n";

/// Format a single log line, newline included.
pub fn format_entry<Tz>(at: &DateTime<Tz>, id: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("{} > {} connected.\n", at.format("%m-%d-%Y %H:%M:%S"), id)
}

/// The open log file. Owned by the registry loop.
#[derive(Debug)]
pub struct RegistrationLog {
    path: PathBuf,
    file: File,
}

impl RegistrationLog {
    /// Create (or truncate) the log and write its header.
    ///
    /// Failing here is meant to abort startup.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path)
            .await
            .map_err(|e| log_error(&path, e))?;
        file.write_all(LOG_HEADER.as_bytes())
            .await
            .map_err(|e| log_error(&path, e))?;
        file.sync_data().await.map_err(|e| log_error(&path, e))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a timestamped line for `id` and sync it to disk.
    pub async fn record(&mut self, id: &str) -> Result<(), RelayError> {
        let line = format_entry(&Local::now(), id);
        self.file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| log_error(&self.path, e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| log_error(&self.path, e))
    }
}

fn log_error(path: &Path, source: std::io::Error) -> RelayError {
    RelayError::RegistrationLog {
        path: path.display().to_string(),
        source,
    }
}
