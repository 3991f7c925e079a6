//! Details command - write detail notes for collected events.
//!
//! Scans the event folder for event-list notes, asks the model for a
//! structured description of every event found and links each detail note
//! back from the line it came from.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use colored::Colorize;

use chronicle_vault::config::Config;
use chronicle_vault::model::ModelClient;
use chronicle_vault::pipeline::{DetailGenerator, DetailStatus, Progress};
use chronicle_vault::vault::Vault;

/// Arguments for the details command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    chronicle details                        Process every note in the event folder\n    \
    chronicle details --file 清末_1840-1911.md  Process a single note\n    \
    chronicle details --no-stream            Wait for complete answers")]
pub struct Args {
    /// Process only this event-list note
    #[arg(long, value_name = "PATH")]
    #[arg(long_help = "Process a single note instead of every Markdown file in the\n\
        event folder. Relative paths are tried against the event folder\n\
        first, then the current directory. The note must live inside the\n\
        vault so detail notes can link back to it.")]
    pub file: Option<PathBuf>,

    /// Wait for complete answers instead of streaming them
    #[arg(long)]
    pub no_stream: bool,
}

/// Executes the details command.
pub fn run(args: Args, config: &Config) -> Result<()> {
    let streaming = !args.no_stream;
    let mut client = ModelClient::from_config(config, streaming)?;
    let vault = Vault::from_config(config).context("Failed to open vault")?;

    let files = match args.file {
        Some(file) => {
            let in_vault = vault.event_dir().join(&file);
            let path = if in_vault.is_file() { in_vault } else { file };
            if !path.is_file() {
                bail!("Event list note not found: {}", path.display());
            }
            let Some(inside) = vault.resolve_inside(&path) else {
                bail!(
                    "{} is outside the vault at {}; move it into the vault so detail notes can link back to it",
                    path.display(),
                    vault.root().display()
                );
            };
            vec![inside]
        }
        None => vault
            .event_list_files()
            .context("Failed to scan the event folder")?,
    };

    if files.is_empty() {
        println!(
            "{}",
            format!("No event list notes found in {}", vault.event_dir().display()).yellow()
        );
        println!();
        println!("Notes are expected to mark events in one of two ways:");
        println!("  {}      braced markers", "{甲午战争（1894年）}".cyan());
        println!("  {}  list items", "- 洋务运动 (1861-1894)".cyan());
        println!();
        println!(
            "{}",
            "Run 'chronicle collect' to gather event lists first.".dimmed()
        );
        return Ok(());
    }

    println!("{}", "Generating event details".bold().cyan());
    println!("{}", format!("Writing to {}", vault.detail_dir().display()).dimmed());

    let report = DetailGenerator::new(&mut client, &vault)
        .with_pause(config.pause())
        .with_streaming(streaming)
        .process_all(&files, print_progress);

    let state = client.state();
    println!();
    println!("{}", "Summary:".bold());
    println!("  Files processed:   {}", report.files);
    if report.unreadable > 0 {
        println!("  Unreadable files:  {}", report.unreadable.to_string().red());
    }
    println!("  Events found:      {}", report.events);
    println!("  Details written:   {}", report.generated.to_string().green());
    if report.link_failures > 0 {
        println!("  Links not written: {}", report.link_failures.to_string().yellow());
    }
    if report.failures > 0 {
        println!("  Failed events:     {}", report.failures.to_string().red());
    }
    println!("  Model calls:       {}", state.call_count);
    println!("  Tokens used:       {}", state.total_tokens);

    if report.budget_exhausted {
        println!();
        println!(
            "{}",
            "Token budget exhausted. Remaining events were not processed.".yellow()
        );
    }
    Ok(())
}

fn print_progress(progress: Progress<'_>) {
    match progress {
        Progress::FileStarted {
            index,
            total,
            path,
            events,
        } => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            println!();
            println!(
                "{} {} {}",
                format!("[{}/{}]", index + 1, total).dimmed(),
                name.bold(),
                format!("({events} events)").dimmed()
            );
        }
        Progress::EventFinished {
            index,
            total,
            event,
            status,
        } => {
            let position = format!("({}/{})", index + 1, total);
            let outcome = match status {
                DetailStatus::Linked(record) => record.link_path.green().to_string(),
                DetailStatus::Unlinked(record, e) => {
                    format!("{} ({})", record.link_path.green(), e.to_string().yellow())
                }
                DetailStatus::Failed(e) => e.to_string().red().to_string(),
            };
            println!("\n  {} {} {}", position.dimmed(), event.name.cyan(), outcome);
        }
    }
}
