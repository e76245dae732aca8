//! The post-load script appended after `COMMIT`.
//!
//! It lives next to the executable by default. Its contents are opaque and
//! copied byte for byte.

use crate::error::{Result, UpdateError};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

pub const AFTER_SCRIPT_NAME: &str = "002-afterupdate.sql";

/// `002-afterupdate.sql` in the directory holding the running executable.
pub fn default_path() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(AFTER_SCRIPT_NAME))
}

/// An after-update script that has been opened but not yet copied.
///
/// Opening happens before any output is produced so a missing script fails
/// the run cleanly.
pub struct AfterScript {
    path: PathBuf,
    file: File,
}

impl AfterScript {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| UpdateError::AfterScript {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the script into `writer` verbatim, returning bytes copied.
    pub fn append_to<W: Write>(self, writer: &mut W) -> Result<u64> {
        let Self { path, file } = self;
        let mut reader = io::BufReader::new(file);
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(UpdateError::AfterScript { path, source });
                }
            };
            writer.write_all(&buf[..n])?;
            total += n as u64;
        }

        log::info!("appended {} ({} bytes)", path.display(), total);
        Ok(total)
    }
}
