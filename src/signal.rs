//! Termination handling.
//!
//! A background thread waits for SIGINT/SIGTERM on a small tokio runtime. On
//! receipt it records the signal and kills the restore tool; the pipeline then
//! ends the output with `ROLLBACK;` instead of `COMMIT;` and exits with the
//! signal's exit code.

use crate::restore::{lock_child, SharedChild};
use std::io;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupt,
    Terminate,
}

impl Termination {
    /// Conventional shell exit code for death by this signal.
    pub fn exit_code(self) -> i32 {
        match self {
            Termination::Interrupt => 128 + 2,
            Termination::Terminate => 128 + 15,
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Interrupt => write!(f, "SIGINT"),
            Termination::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Records which termination signal arrived, shared between the terminator
/// thread and the pipeline.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<OnceLock<Termination>>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, received: Termination) {
        let _ = self.0.set(received);
    }

    pub fn received(&self) -> Option<Termination> {
        self.0.get().copied()
    }
}

/// How long the pipeline gets to write `ROLLBACK;` and exit on its own
/// before the terminator exits the process itself.
const GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Install the handlers and start the watcher thread.
///
/// Handlers are registered before this returns, so no signal is missed
/// between spawning the child and the thread getting scheduled. On a signal
/// the watcher marks `cancel`, kills the child, and exits the process if the
/// pipeline has not finished within the grace period.
pub fn spawn_terminator(child: SharedChild, cancel: Cancellation) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    #[cfg(unix)]
    let (mut interrupt, mut terminate) = {
        use tokio::signal::unix::{signal, SignalKind};
        let _guard = runtime.enter();
        (
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        )
    };

    thread::Builder::new()
        .name("terminator".to_string())
        .spawn(move || {
            #[cfg(unix)]
            let received = runtime.block_on(async {
                tokio::select! {
                    _ = interrupt.recv() => Termination::Interrupt,
                    _ = terminate.recv() => Termination::Terminate,
                }
            });

            #[cfg(not(unix))]
            let received = {
                if let Err(e) = runtime.block_on(tokio::signal::ctrl_c()) {
                    log::warn!("cannot listen for Ctrl-C: {}", e);
                    return;
                }
                Termination::Interrupt
            };

            log::warn!("received {}, stopping restore tool", received);
            cancel.cancel(received);

            // The lock is never held across a blocking wait, so this is prompt.
            if let Err(e) = lock_child(&child).kill() {
                log::debug!("kill restore tool: {}", e);
            }

            thread::sleep(GRACE_PERIOD);
            std::process::exit(received.exit_code());
        })?;

    Ok(())
}
