//! Append-only audit trail shared by all stages.
//!
//! Every event becomes one line `[YYYY-MM-DD HH:MM:SS] message` in the log
//! file and is mirrored to `tracing` at the matching level. The dashboard
//! reads this file, so the line format is part of the external contract.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{error, info, warn};

use crate::error::Result;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Create the parent directory and make sure the file is writable.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);
        self.append(message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = format!("WARNING: {}", message.as_ref());
        warn!("{}", message);
        self.append(&message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!("{}", message);
        self.append(message);
    }

    /// All lines written so far, oldest first.
    pub fn read_lines(&self) -> Result<Vec<String>> {
        let content = fs::read_to_string(&self.path)?;
        Ok(content.lines().map(str::to_string).collect())
    }

    fn append(&self, message: &str) {
        let line = format_line(&Local::now().format(TIMESTAMP_FORMAT).to_string(), message);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = written {
            // The trail is best effort once the run is under way.
            error!(path = %self.path.display(), "audit log write failed: {}", e);
        }
    }
}

fn format_line(timestamp: &str, message: &str) -> String {
    // One event per line, even if the message carries a multi-line error.
    let flat = message.replace(['\r', '\n'], " ");
    format!("[{}] {}\n", timestamp, flat)
}

/// Strip the `[timestamp] ` prefix from an audit line.
pub fn message_of(line: &str) -> &str {
    match line.find("] ") {
        Some(idx) if line.starts_with('[') => &line[idx + 2..],
        _ => line,
    }
}
