//! Update command CLI handler.

use sde_updater::compression::Compression;
use sde_updater::config::{FileConfig, UpdateConfig};
use sde_updater::pipeline::Updater;
use sde_updater::rewriter::RewriteStats;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

pub struct UpdateArgs {
    pub dumpfile: PathBuf,
    pub schema: Option<String>,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub restore_program: Option<String>,
    pub after_script: Option<PathBuf>,
    pub compression: Option<String>,
    pub progress: bool,
    pub json: bool,
}

/// JSON summary printed with --json
#[derive(serde::Serialize)]
struct UpdateJsonOutput<'a> {
    dump_file: String,
    schema: &'a str,
    restore_command: String,
    after_script: String,
    elapsed_secs: f64,
    statistics: &'a RewriteStats,
}

pub fn run(args: UpdateArgs) -> anyhow::Result<()> {
    let mut config = UpdateConfig::new(args.dumpfile)?;

    if let Some(ref path) = args.config {
        log::info!("loading config from {}", path.display());
        config = config.with_file_config(FileConfig::load(path)?);
    }
    if let Some(schema) = args.schema {
        config = config.with_schema(schema);
    }
    if let Some(program) = args.restore_program {
        config.restore.program = program;
    }
    if let Some(path) = args.after_script {
        config = config.with_after_script(path);
    }
    if let Some(c) = args.compression {
        let compression = c
            .parse::<Compression>()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        config = config.with_compression(compression);
    }
    config = config.with_progress(args.progress);

    let updater = Updater::new(config).with_signal_handling(true);
    let start = Instant::now();

    // Inputs are checked before the output file is created or truncated.
    let started = updater.start()?;

    let stats = match &args.output {
        Some(path) => {
            let created = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or(Ok(()), std::fs::create_dir_all)
                .and_then(|_| File::create(path));
            match created {
                Ok(file) => started.write_to(file)?,
                Err(e) => {
                    started.abort();
                    return Err(e.into());
                }
            }
        }
        None => started.write_to(io::stdout().lock())?,
    };

    let elapsed = start.elapsed();

    if args.json {
        let config = updater.config();
        let output = UpdateJsonOutput {
            dump_file: config.dump_file.display().to_string(),
            schema: &config.schema,
            restore_command: config.restore.to_string(),
            after_script: config.after_script.display().to_string(),
            elapsed_secs: elapsed.as_secs_f64(),
            statistics: &stats,
        };
        let mut stderr = io::stderr().lock();
        serde_json::to_writer_pretty(&mut stderr, &output)?;
        writeln!(stderr)?;
    } else if args.progress {
        print_stats(&stats, elapsed.as_secs_f64());
    }

    Ok(())
}

fn print_stats(stats: &RewriteStats, elapsed_secs: f64) {
    eprintln!();
    eprintln!("Update Statistics:");
    eprintln!("  Lines read: {}", stats.lines_read);
    eprintln!("  Lines written: {}", stats.lines_written);
    eprintln!(
        "  Restore output: {:.2} MB",
        stats.bytes_read as f64 / (1024.0 * 1024.0)
    );
    eprintln!("  Tables emptied: {}", stats.tables_truncated.len());
    eprintln!(
        "  Restore search_path dropped: {}",
        if stats.search_path_suppressed { "yes" } else { "no" }
    );
    eprintln!("  Elapsed: {:.2}s", elapsed_secs);
}
