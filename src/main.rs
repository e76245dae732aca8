mod cmd;

use clap::Parser;
use cmd::Cli;
use sde_updater::UpdateError;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cmd::run(cli) {
        eprintln!("error: {e:#}");
        let code = match e.downcast_ref::<UpdateError>() {
            Some(update) => {
                if update.is_upstream() {
                    eprintln!("note: output ends with ROLLBACK; do not apply it as a full update");
                }
                update.exit_code()
            }
            None => 1,
        };
        std::process::exit(code);
    }
}

/// Logs go to stderr; stdout carries the SQL stream. RUST_LOG overrides -v.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}
