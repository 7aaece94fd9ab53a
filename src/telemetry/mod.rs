//! # Telemetry Module
//!
//! Keeps a local record of every validated sentence.
//!
//! Sentences are appended to a plain text log, one per line, and flushed as
//! they arrive so the file stays useful if the relay is killed.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::{HorusError, Result};
use crate::ingest::PacketSink;

/// Append-only log of validated sentences
#[derive(Debug)]
pub struct TelemetryLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl TelemetryLog {
    /// Open (or create) the log at `path` for appending
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened for writing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Logging telemetry to {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one sentence, adding a newline if it lacks one
    pub fn append(&self, sentence: &str) -> Result<()> {
        let line = sentence.trim_end_matches(['\r', '\n']);
        let mut file = self
            .file
            .lock()
            .map_err(|_| HorusError::Io(std::io::Error::new(std::io::ErrorKind::Other, "telemetry log lock poisoned")))?;

        writeln!(file, "{}", line)?;
        file.flush()?;
        debug!("Logged sentence to {}", self.path.display());
        Ok(())
    }
}

impl PacketSink for TelemetryLog {
    fn on_valid_packet(&self, sentence: &str) -> Result<()> {
        self.append(sentence)
    }
}
