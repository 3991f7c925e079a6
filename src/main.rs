use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chronicle_vault::config::Config;

mod cli;

use cli::commands;

/// The main CLI command line interface.
#[derive(Parser)]
#[command(name = "chronicle")]
#[command(version)]
#[command(about = "Collect historical event timelines into an Obsidian vault")]
#[command(long_about = "Chronicle asks a chat-completion model for historical events,\n\
    one time window at a time, and saves every answer as a Markdown note\n\
    in an Obsidian vault. It can then expand each listed event into its\n\
    own detail note and link it back from the list.")]
#[command(after_help = "EXAMPLES:\n    \
    chronicle                                   Start an interactive collection session\n    \
    chronicle collect --event 洋务运动 --years 1861-1894\n    \
    chronicle details                           Write detail notes for collected events\n    \
    chronicle env                               Show the resolved configuration\n\n\
    For more information about a command, run 'chronicle <command> --help'.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Collect an event timeline window by window (default)
    #[command(long_about = "Prompts for an event, a year range and a segment count, then\n\
        collects each window from the model and saves it to the event folder\n\
        as soon as it arrives. Enter 'exit', 'quit', 'q' or '退出' to stop.")]
    Collect(commands::collect::Args),

    /// Write linked detail notes for events in collected notes
    #[command(long_about = "Extracts events from every note in the event folder, writes a\n\
        structured detail note for each one to the detail folder and appends\n\
        a [[link|详情]] after the event in the source note.")]
    Details(commands::details::Args),

    /// Show the resolved configuration
    #[command(long_about = "Prints the settings merged from ~/.chronicle/config.yaml and\n\
        the environment. The API key is masked.")]
    Env(commands::env::Args),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load();
    let log_file = config
        .as_ref()
        .map(|c| c.log_file.clone())
        .unwrap_or_else(|_| Config::default().log_file);
    let _guard = init_logging(cli.verbose, &log_file);
    let config = config?;
    if config.vault_path_defaulted {
        tracing::warn!(
            "OBSIDIAN_VAULT_PATH not set, using {}",
            config.vault_path.display()
        );
    }

    match cli.command {
        Some(Commands::Collect(args)) => commands::collect::run(args, &config),
        Some(Commands::Details(args)) => commands::details::run(args, &config),
        Some(Commands::Env(args)) => commands::env::run(args, &config),
        None => commands::collect::run(commands::collect::Args::default(), &config),
    }
}

/// Logs to stderr and appends to `log_file`.
///
/// The returned guard flushes the file writer on drop. If the log file
/// cannot be opened, only console logging is set up.
fn init_logging(verbose: bool, log_file: &Path) -> Option<WorkerGuard> {
    let filter = if verbose {
        "chronicle_vault=debug,chronicle=debug"
    } else {
        "chronicle_vault=info,chronicle=info"
    };
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into())
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .without_time()
        .with_writer(std::io::stderr);

    let dir = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = log_file.file_name().unwrap_or_default();
    let appender = std::fs::create_dir_all(dir).ok().and_then(|()| {
        tracing_appender::rolling::RollingFileAppender::builder()
            .filename_prefix(file_name.to_string_lossy().into_owned())
            .build(dir)
            .ok()
    });

    match appender {
        Some(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(env_filter())
                .with(console_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(console_layer)
                .init();
            None
        }
    }
}
