//! The restore stage: decompression thread feeding the restore tool.
//!
//! ```text
//! dump file -> [decompress thread] -> pg_restore stdin
//!                                     pg_restore stdout -> rewriter
//! ```
//!
//! Both stages are checked once the restore tool's stdout reaches EOF.

use crate::error::{Result, UpdateError};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub const DEFAULT_RESTORE_PROGRAM: &str = "pg_restore";

/// `-O`: no ownership statements, `-a`: data only
pub const DEFAULT_RESTORE_ARGS: &[&str] = &["-O", "-a"];

/// How to invoke the restore tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for RestoreCommand {
    fn default() -> Self {
        Self {
            program: DEFAULT_RESTORE_PROGRAM.to_string(),
            args: DEFAULT_RESTORE_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RestoreCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl std::fmt::Display for RestoreCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Shared handle to the restore child, used by the termination handler.
pub type SharedChild = Arc<Mutex<Child>>;

pub(crate) fn lock_child(child: &SharedChild) -> MutexGuard<'_, Child> {
    // A poisoned lock still holds a usable Child handle.
    child.lock().unwrap_or_else(|e| e.into_inner())
}

/// A running restore tool plus the thread feeding it.
pub struct RestoreProcess {
    command: RestoreCommand,
    dump_file: PathBuf,
    child: SharedChild,
    stdout: Option<ChildStdout>,
    feeder: Option<JoinHandle<io::Result<u64>>>,
}

impl RestoreProcess {
    /// Start the restore tool and a thread copying `input` into its stdin.
    ///
    /// `dump_file` is only used for error reporting.
    pub fn spawn(
        command: &RestoreCommand,
        dump_file: &Path,
        mut input: Box<dyn Read + Send>,
    ) -> Result<Self> {
        log::info!("starting restore tool: {}", command);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| {
                if source.kind() == io::ErrorKind::NotFound {
                    log::error!(
                        "`{}` not found; install the PostgreSQL client tools or set restore.program",
                        command.program
                    );
                }
                UpdateError::RestoreSpawn {
                    program: command.program.clone(),
                    source,
                }
            })?;

        let stdout = child.stdout.take();
        let mut stdin = child.stdin.take();

        let feeder = thread::Builder::new()
            .name("decompress".to_string())
            .spawn(move || -> io::Result<u64> {
                let copied = match stdin.as_mut() {
                    Some(stdin) => io::copy(&mut input, stdin),
                    None => Ok(0),
                };
                // Dropping stdin closes the pipe so the restore tool sees EOF.
                drop(stdin);
                copied
            });

        let feeder = match feeder {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        };

        log::debug!("restore tool running as pid {}", child.id());

        Ok(Self {
            command: command.clone(),
            dump_file: dump_file.to_path_buf(),
            child: Arc::new(Mutex::new(child)),
            stdout,
            feeder: Some(feeder),
        })
    }

    /// Handle used to kill the child from another thread.
    pub fn shared_child(&self) -> SharedChild {
        Arc::clone(&self.child)
    }

    /// The restore tool's stdout. Can only be taken once.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Kill the restore tool after a downstream failure.
    pub fn abort(mut self) {
        let mut child = lock_child(&self.child);
        if let Err(e) = child.kill() {
            log::debug!("kill restore tool: {}", e);
        }
        let _ = child.wait();
        drop(child);
        // The feeder stops on the broken pipe once the child is gone.
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.join();
        }
    }

    /// Poll the child, releasing the lock between polls so the terminator
    /// can kill it while we wait.
    fn wait_child(&self) -> io::Result<ExitStatus> {
        loop {
            let polled = lock_child(&self.child).try_wait()?;
            if let Some(status) = polled {
                return Ok(status);
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Wait for both stages and report the first upstream failure.
    ///
    /// A non-zero exit of the restore tool wins over a feeder error, since a
    /// dying restore tool also breaks the feeder's pipe.
    pub fn finish(mut self) -> Result<u64> {
        // Drop our end of stdout if the caller never took it.
        drop(self.stdout.take());

        let status = self.wait_child()?;

        let fed = match self.feeder.take().map(|h| h.join()) {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(io::Error::other("decompression thread panicked")),
            None => Ok(0),
        };

        if !status.success() {
            return Err(UpdateError::RestoreFailed {
                program: self.command.program.clone(),
                status,
            });
        }

        let fed = fed.map_err(|source| UpdateError::Decompress {
            path: self.dump_file.clone(),
            source,
        })?;

        log::info!(
            "restore tool exited cleanly after reading {} decompressed bytes",
            fed
        );
        Ok(fed)
    }
}
