mod update;

use clap::{ArgAction, CommandFactory, Parser};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "update-sde")]
#[command(version)]
#[command(about = "Update the SDE schema with a new dump", long_about = None)]
#[command(after_help = "\
Pipe the output of this program to psql, specifying the database to connect to
and any other required options, e.g.:

    update-sde /tmp/latest.dmp.bz2 myschema | psql mydatabase")]
pub struct Cli {
    /// The compressed, PostgreSQL custom-format SDE dump file
    /// Supports .gz, .bz2, .xz, .zst compression
    #[arg(required_unless_present = "completions")]
    pub dumpfile: Option<PathBuf>,

    /// The database schema that the SDE is loaded in [default: sde]
    pub schema: Option<String>,

    /// Output SQL file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// YAML config file with restore tool and script settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Restore tool executable (default: pg_restore)
    #[arg(long)]
    pub restore_program: Option<String>,

    /// Script appended after COMMIT (default: 002-afterupdate.sql next to the executable)
    #[arg(long)]
    pub after_script: Option<PathBuf>,

    /// Compression: none, gzip, bzip2, xz, zstd (detected from the extension if not specified)
    #[arg(long)]
    pub compression: Option<String>,

    /// Show progress while restoring
    #[arg(short, long)]
    pub progress: bool,

    /// Print run statistics as JSON on stderr
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Generate shell completions and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(shell) = cli.completions {
        generate(shell, &mut Cli::command(), "update-sde", &mut io::stdout());
        return Ok(());
    }

    let Some(dumpfile) = cli.dumpfile else {
        anyhow::bail!("missing dump file argument");
    };

    update::run(update::UpdateArgs {
        dumpfile,
        schema: cli.schema,
        output: cli.output,
        config: cli.config,
        restore_program: cli.restore_program,
        after_script: cli.after_script,
        compression: cli.compression,
        progress: cli.progress,
        json: cli.json,
    })
}
