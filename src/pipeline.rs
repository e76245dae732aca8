//! End-to-end update run: dump file in, replayable SQL out.

use crate::after_script::AfterScript;
use crate::compression::Compression;
use crate::config::{validate_schema, UpdateConfig};
use crate::error::{Result, UpdateError};
use crate::progress::{dump_progress_bar, ProgressReader};
use crate::restore::RestoreProcess;
use crate::rewriter::{RewriteStats, StreamRewriter};
use crate::signal::{self, Cancellation};
use indicatif::ProgressBar;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

const READ_BUFFER_SIZE: usize = 256 * 1024;
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Runs the full update pipeline for one dump
pub struct Updater {
    config: UpdateConfig,
    handle_signals: bool,
}

impl Updater {
    pub fn new(config: UpdateConfig) -> Self {
        Self {
            config,
            handle_signals: false,
        }
    }

    /// Kill the restore tool and exit on SIGINT/SIGTERM.
    ///
    /// Meant for the binary; the handler exits the whole process if the run
    /// does not wind down on its own.
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Run every check that can fail without producing output (schema,
    /// script, dump file, compression, spawning the restore tool).
    ///
    /// Callers that create their output lazily should call this first and
    /// only then open the destination.
    pub fn start(&self) -> Result<StartedUpdate<'_>> {
        let config = &self.config;
        validate_schema(&config.schema)?;

        let script = AfterScript::open(&config.after_script)?;

        let open_err = |source| UpdateError::DumpFile {
            path: config.dump_file.clone(),
            source,
        };
        let file = File::open(&config.dump_file).map_err(open_err)?;
        let dump_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut dump = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let compression = match config.compression {
            Some(c) => c,
            None => Compression::detect(&config.dump_file, &mut dump).map_err(open_err)?,
        };
        log::info!(
            "reading {} ({}, {} bytes)",
            config.dump_file.display(),
            compression,
            dump_size
        );

        let progress_bar = config.progress.then(|| dump_progress_bar(dump_size));

        let raw: Box<dyn Read + Send> = match progress_bar {
            Some(ref pb) => {
                let pb = pb.clone();
                Box::new(ProgressReader::new(dump, move |bytes| pb.set_position(bytes)))
            }
            None => Box::new(dump),
        };

        let decoded = compression
            .wrap_reader(raw)
            .map_err(|source| UpdateError::Decompress {
                path: config.dump_file.clone(),
                source,
            })?;

        let process = RestoreProcess::spawn(&config.restore, &config.dump_file, decoded)?;

        let cancellation = Cancellation::new();
        if self.handle_signals {
            if let Err(e) = signal::spawn_terminator(process.shared_child(), cancellation.clone()) {
                process.abort();
                return Err(e.into());
            }
        }

        Ok(StartedUpdate {
            config,
            script,
            process,
            cancellation,
            progress_bar,
        })
    }

    /// Write the rewritten SQL stream to `output`.
    pub fn run<W: Write>(&self, output: W) -> Result<RewriteStats> {
        self.start()?.write_to(output)
    }
}

/// An update whose inputs are open and whose restore tool is running.
pub struct StartedUpdate<'a> {
    config: &'a UpdateConfig,
    script: AfterScript,
    process: RestoreProcess,
    cancellation: Cancellation,
    progress_bar: Option<ProgressBar>,
}

impl StartedUpdate<'_> {
    /// Handle for cancelling the run as a termination signal would.
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    /// Stop the restore tool without writing anything.
    pub fn abort(self) {
        self.process.abort();
    }

    /// Stream the rewritten SQL into `output`.
    ///
    /// The output ends with `COMMIT;`, `VACUUM FULL;` and the after-update
    /// script only if both upstream stages succeeded and no termination
    /// signal arrived; otherwise it ends with `ROLLBACK;`.
    pub fn write_to<W: Write>(self, output: W) -> Result<RewriteStats> {
        let Self {
            config,
            script,
            mut process,
            cancellation,
            progress_bar,
        } = self;

        let stdout = match process.take_stdout() {
            Some(stdout) => stdout,
            None => {
                process.abort();
                return Err(std::io::Error::other("restore tool has no stdout").into());
            }
        };

        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, output);
        let mut rewriter = StreamRewriter::new(config.schema.as_str());

        let body = rewriter.write_prologue(&mut writer).and_then(|_| {
            rewriter.rewrite_body(
                BufReader::with_capacity(READ_BUFFER_SIZE, stdout),
                &mut writer,
            )
        });
        if let Err(e) = body {
            process.abort();
            if let Some(received) = cancellation.received() {
                return Err(UpdateError::Terminated(received));
            }
            log::error!("writing output failed, stopping restore tool: {}", e);
            return Err(e.into());
        }

        let upstream = process.finish();
        // A signal outranks whatever status the killed restore tool reported.
        let upstream = match cancellation.received() {
            Some(received) => Err(UpdateError::Terminated(received)),
            None => upstream,
        };

        if let Some(pb) = progress_bar {
            match upstream {
                Ok(_) => pb.finish_with_message("Restore complete"),
                Err(_) => pb.abandon_with_message("Restore failed"),
            }
        }

        if let Err(e) = upstream {
            if e.is_upstream() {
                log::error!("{}; emitting ROLLBACK", e);
            }
            rewriter.write_rollback(&mut writer)?;
            writer.flush()?;
            return Err(e);
        }

        rewriter.write_epilogue(&mut writer)?;
        log::info!("appending after-update script {}", script.path().display());
        script.append_to(&mut writer)?;
        writer.flush()?;

        log::info!(
            "rewrote {} lines, truncated {} tables into schema {}",
            rewriter.stats().lines_read,
            rewriter.stats().tables_truncated.len(),
            rewriter.schema()
        );
        Ok(rewriter.into_stats())
    }
}
