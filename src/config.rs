//! YAML configuration for the update pipeline.
//!
//! Every key is optional; command-line flags take precedence over the file,
//! and the file over built-in defaults.

use crate::after_script;
use crate::compression::Compression;
use crate::error::{Result, UpdateError};
use crate::restore::RestoreCommand;
use crate::rewriter::DEFAULT_SCHEMA;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Restore tool settings as written in the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestoreSection {
    /// Executable to run (default: pg_restore)
    pub program: Option<String>,
    /// Arguments passed before the dump is piped in (default: -O -a)
    pub args: Option<Vec<String>>,
}

/// Root of the YAML config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub schema: Option<String>,
    pub after_script: Option<PathBuf>,
    pub compression: Option<Compression>,
    pub restore: RestoreSection,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| UpdateError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| UpdateError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml_ng::Error> {
        // An empty file deserializes to unit, not to a mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(content)
    }
}

/// Fully resolved settings for one run
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Compressed dump file
    pub dump_file: PathBuf,
    /// Destination schema
    pub schema: String,
    /// Compression override (detected from the extension or magic bytes if None)
    pub compression: Option<Compression>,
    /// Restore tool invocation
    pub restore: RestoreCommand,
    /// Script appended after COMMIT
    pub after_script: PathBuf,
    /// Show a progress bar on stderr
    pub progress: bool,
}

impl UpdateConfig {
    /// Build a config with defaults for everything but the dump file.
    pub fn new(dump_file: PathBuf) -> Result<Self> {
        Ok(Self {
            dump_file,
            schema: DEFAULT_SCHEMA.to_string(),
            compression: None,
            restore: RestoreCommand::default(),
            after_script: after_script::default_path()?,
            progress: false,
        })
    }

    /// Layer file settings over the defaults.
    pub fn with_file_config(mut self, file: FileConfig) -> Self {
        if let Some(schema) = file.schema {
            self.schema = schema;
        }
        if let Some(path) = file.after_script {
            self.after_script = path;
        }
        if file.compression.is_some() {
            self.compression = file.compression;
        }
        if let Some(program) = file.restore.program {
            self.restore.program = program;
        }
        if let Some(args) = file.restore.args {
            self.restore.args = args;
        }
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_after_script(mut self, path: PathBuf) -> Self {
        self.after_script = path;
        self
    }

    pub fn with_restore(mut self, restore: RestoreCommand) -> Self {
        self.restore = restore;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

/// Reject schema names that would break out of `SET search_path TO ...;`.
pub fn validate_schema(name: &str) -> Result<()> {
    let reason = if name.trim().is_empty() {
        "must not be empty"
    } else if name.contains(';') {
        "must not contain ';'"
    } else if name.contains(['\n', '\r', '\0']) {
        "must not contain line breaks or NUL"
    } else {
        return Ok(());
    };

    Err(UpdateError::InvalidSchema {
        name: name.to_string(),
        reason,
    })
}
