//! Error type for the update pipeline.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use crate::signal::Termination;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("invalid schema name {name:?}: {reason}")]
    InvalidSchema { name: String, reason: &'static str },

    #[error("cannot read config file {}: {source}", path.display())]
    Config { path: PathBuf, source: io::Error },

    #[error("invalid config file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        source: serde_yaml_ng::Error,
    },

    #[error("cannot open dump file {}: {source}", path.display())]
    DumpFile { path: PathBuf, source: io::Error },

    #[error("cannot read after-update script {}: {source}", path.display())]
    AfterScript { path: PathBuf, source: io::Error },

    #[error("failed to start restore tool `{program}`: {source}")]
    RestoreSpawn { program: String, source: io::Error },

    #[error("restore tool `{program}` failed: {status}")]
    RestoreFailed { program: String, status: ExitStatus },

    #[error("failed to decompress {}: {source}", path.display())]
    Decompress { path: PathBuf, source: io::Error },

    #[error("interrupted by {0}")]
    Terminated(Termination),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl UpdateError {
    /// True when the failure happened upstream of the rewriter, after output
    /// was already started.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            UpdateError::RestoreFailed { .. }
                | UpdateError::Decompress { .. }
                | UpdateError::Terminated(_)
        )
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            UpdateError::Terminated(received) => received.exit_code(),
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
