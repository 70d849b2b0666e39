//! Append-only reading log.
//!
//! Records are stored one per line as JSON text. The file is never
//! rewritten, rotated or truncated; entries are only ever added at the end.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Default file name of the reading log.
pub const DEFAULT_LOG_FILE_NAME: &str = "sensorData.txt";

/// Newline-delimited log of persisted readings.
#[derive(Debug, Clone)]
pub struct LogFile {
    /// Location of the log.
    path: PathBuf,
    /// Whether to flush file data to the device after each append.
    sync_writes: bool,
}

impl LogFile {
    /// Create a log handle for `path`. Nothing is touched on disk until the
    /// first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_writes: true,
        }
    }

    /// Set whether each append is followed by `fsync` of the file data.
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Get the log path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry followed by a newline.
    ///
    /// Creates the file (and its parent directory) if it does not exist yet.
    /// The line is handed to the OS in a single append-mode write so a
    /// concurrent reader never sees a line without its terminator from a
    /// successful call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if the entry contains a line break
    /// and [`Error::Storage`] if the file cannot be opened or written.
    pub fn append(&self, entry: &str) -> Result<()> {
        if entry.contains('\n') || entry.contains('\r') {
            return Err(Error::InvalidPayload {
                context: "entry contains a line break".to_string(),
            });
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                debug!("Creating log directory {}", parent.display());
                fs::create_dir_all(parent).map_err(|e| Error::storage(parent, e))?;
            }
        }

        let mut line = String::with_capacity(entry.len() + 1);
        line.push_str(entry);
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::storage(&self.path, e))?;

        file.write_all(line.as_bytes())
            .map_err(|e| Error::storage(&self.path, e))?;

        if self.sync_writes {
            file.sync_data().map_err(|e| Error::storage(&self.path, e))?;
        }

        trace!("Appended {} bytes to {}", line.len(), self.path.display());

        Ok(())
    }

    /// Read back every entry, oldest first.
    ///
    /// A missing file is an empty log.
    pub fn entries(&self) -> Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents.lines().map(str::to_owned).collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::storage(&self.path, e)),
        }
    }

    /// Number of entries currently in the log.
    pub fn len(&self) -> Result<usize> {
        self.entries().map(|entries| entries.len())
    }

    /// Check if the log has no entries (or does not exist).
    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }
}
