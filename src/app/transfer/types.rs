//! Transfer jobs and strategy selection

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::app::remote::RemoteFile;

/// One remote file and the local path it is copied to
#[derive(Debug, Clone)]
pub struct TransferTask {
    /// Remote handle with loaded attributes
    pub remote: Arc<RemoteFile>,
    /// Destination on the local filesystem
    pub local: PathBuf,
}

impl TransferTask {
    pub fn new(remote: Arc<RemoteFile>, local: PathBuf) -> Self {
        Self { remote, local }
    }

    /// Remote size as known from the listing
    pub fn size(&self) -> u64 {
        self.remote.size()
    }

    /// Remote modification time in epoch milliseconds
    pub fn modified_millis(&self) -> i64 {
        self.remote.modified_millis()
    }
}

/// Wire strategy used by every pooled connection of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Structured SFTP subsystem
    #[default]
    Sftp,
    /// `scp -f` sender driven over a raw shell session
    Sink,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Sftp => f.write_str("sftp"),
            Strategy::Sink => f.write_str("sink"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sftp" => Ok(Strategy::Sftp),
            "sink" | "scp" => Ok(Strategy::Sink),
            other => Err(format!("unknown protocol '{}', expected sftp or sink", other)),
        }
    }
}

/// A file that could not be transferred
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    /// Remote path
    pub remote: String,
    /// Intended local path
    pub local: PathBuf,
    /// Error description
    pub error: String,
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.remote, self.local.display(), self.error)
    }
}
