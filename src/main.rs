mod cli;
mod domain;
mod infra;

use crate::cli::CliInvocation;
use crate::infra::{
    Config, LoadConfigError, ResolveStateDirError, load_config, load_config_or_default,
    resolve_state_dir,
};
use std::io::{self, IsTerminal, Write};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "PROMPTLOG_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    StateDir(#[from] ResolveStateDirError),

    #[error(transparent)]
    Config(#[from] LoadConfigError),

    #[error(transparent)]
    Cli(#[from] crate::cli::CliRunError),
}

fn main() {
    if let Err(error) = run_main() {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{error}");
        std::process::exit(1);
    }
}

fn run_main() -> Result<(), MainError> {
    let args = std::env::args().collect::<Vec<_>>();
    let invocation = match crate::cli::parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            let _ = writeln!(err);
            print_help();
            std::process::exit(2);
        }
    };

    match invocation {
        CliInvocation::PrintHelp => {
            print_help();
            Ok(())
        }
        CliInvocation::PrintVersion => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliInvocation::Command(command) => {
            let state_dir = resolve_state_dir()?;
            let config = if command.rewrites_config() {
                let (config, error) = load_config_or_default(&state_dir);
                if let Some(error) = error {
                    let mut err = io::stderr().lock();
                    let _ = writeln!(err, "ignoring unreadable config, using defaults: {error}");
                }
                config
            } else {
                load_config(&state_dir)?
            };
            init_logging(&config);
            tracing::debug!(state_dir = %state_dir.display(), "loaded config");
            crate::cli::run(command, &state_dir, &config)?;
            Ok(())
        }
    }
}

fn init_logging(config: &Config) {
    let configured = config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn print_help() {
    let text = format!(
        "{name} - recover conversations from loosely formatted chat-history prompts\n\nUSAGE:\n  {name} parse [file|-] [--json] [--explain]   Parse one raw prompt (default: stdin)\n  {name} list <history> [--limit N] [--offset N] [--width N]  List records with previews\n  {name} show <history> <index> [--json]      Print a record's conversation\n  {name} resume <history> <index> [--new-thread]  Print the continue/new-thread plan as JSON\n  {name} copy <history> <index>               Copy a record's transcript to the clipboard\n  {name} config [--preview-chars N] [--log-filter FILTER]  Show or update settings\n  {name} --help | --version\n\nHISTORY:\n  A JSON array of records, an object with a data/history/items/results array,\n  or JSON lines. Use - to read stdin. Records carry `prompt` plus optional\n  userId, agentId, createdAt, threadId.\n\nPARSE FLAGS:\n  --json         Output messages as JSON\n  --explain      Print the strategy that recognized the prompt to stderr\n\nLIST FLAGS:\n  --limit N      Max records to print (default: 20)\n  --offset N     Skip first N records (default: 0)\n  --width N      Preview width in columns (default: config preview_chars)\n\nOUTPUT:\n  parse: role<TAB>content  (newlines in content shown as \\n)\n  list:  index<TAB>created_at<TAB>thread_id<TAB>message_count<TAB>preview\n\nENV:\n  PROMPTLOG_HOME   Override state dir holding config.json (default: ~/.promptlog)\n  PROMPTLOG_LOG    Log filter, e.g. debug or promptlog=trace (default: config log_filter, then warn)\n",
        name = env!("CARGO_PKG_NAME")
    );
    let mut out = io::stdout().lock();
    let _ = write!(out, "{text}");
}
