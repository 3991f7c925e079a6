//! Collect command - gather event timelines window by window.
//!
//! Prompts for an event name, a year range and a segment count, then asks
//! the model for each window and saves every answer to the vault as soon
//! as it arrives. Loops until an exit word or end of input.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use colored::Colorize;

use chronicle_vault::config::Config;
use chronicle_vault::model::ModelClient;
use chronicle_vault::pipeline::{CollectReport, Collector, SegmentResult};
use chronicle_vault::timeline::{EventRequest, YearRange};
use chronicle_vault::vault::Vault;

/// Inputs that end the interactive session.
const EXIT_WORDS: [&str; 4] = ["退出", "exit", "quit", "q"];

/// Segment count used when none is given.
pub const DEFAULT_SEGMENTS: usize = 3;

/// Arguments for the collect command.
#[derive(clap::Args, Default)]
#[command(after_help = "EXAMPLES:\n    \
    chronicle collect                                      Start an interactive session\n    \
    chronicle collect --event 洋务运动 --years 1861-1894    Collect one event and exit\n    \
    chronicle collect --event 冷战 --years 1947-1991 -s 5  Use five windows")]
pub struct Args {
    /// Event name to collect without prompting
    #[arg(long, value_name = "NAME")]
    #[arg(long_help = "Collect a single event and exit instead of starting the\n\
        interactive prompt loop. Requires --years.")]
    #[arg(requires = "years")]
    pub event: Option<String>,

    /// Year range for --event, such as 1840-1911
    #[arg(long, value_name = "RANGE", requires = "event")]
    pub years: Option<String>,

    /// Number of windows to split the range into
    #[arg(short, long, value_name = "N")]
    pub segments: Option<usize>,

    /// Wait for complete answers instead of streaming them
    #[arg(long)]
    pub no_stream: bool,
}

/// Executes the collect command.
pub fn run(args: Args, config: &Config) -> Result<()> {
    let streaming = !args.no_stream;
    let mut client = ModelClient::from_config(config, streaming)?;
    let vault = Vault::from_config(config).context("Failed to open vault")?;

    println!("{}", "Chronicle".bold().cyan());
    println!("{}", format!("Saving to {}", vault.event_dir().display()).dimmed());
    println!();

    if let Some(event) = args.event {
        let years = args.years.unwrap_or_default();
        let segments = args.segments.unwrap_or(DEFAULT_SEGMENTS);
        let request = EventRequest::new(event, YearRange::parse(&years));
        collect_one(&mut client, &vault, config, &request, segments, streaming);
        return Ok(());
    }

    let stdin = io::stdin();
    let mut input = stdin.lock();
    while let Some((request, segments)) = prompt_request(&mut input, args.segments)? {
        let report = collect_one(&mut client, &vault, config, &request, segments, streaming);
        if report.budget_exhausted {
            println!(
                "{}",
                "Token budget exhausted. Start a new session to continue.".yellow()
            );
            break;
        }
        println!();
    }

    let state = client.state();
    println!(
        "{}",
        format!(
            "Session finished: {} model calls, about {} tokens",
            state.call_count, state.total_tokens
        )
        .dimmed()
    );
    Ok(())
}

/// Runs the collector for one request and prints its progress.
fn collect_one(
    client: &mut ModelClient,
    vault: &Vault,
    config: &Config,
    request: &EventRequest,
    segments: usize,
    streaming: bool,
) -> CollectReport {
    let labels = request.plan(segments).labels();
    if labels.is_empty() {
        println!(
            "{}",
            format!("Nothing to collect for {}: start year is after end year", request.name).yellow()
        );
        return CollectReport::default();
    }
    println!(
        "{} {} ({} windows: {})",
        "Collecting".bold(),
        request.name.cyan(),
        labels.len(),
        labels.join(", ")
    );

    let report = Collector::new(client, vault)
        .with_pause(config.pause())
        .with_streaming(streaming)
        .run(request, segments, print_segment);

    println!();
    println!("{}", "Summary:".bold());
    println!("  Saved:   {}", report.saved.len().to_string().green());
    if !report.failed.is_empty() {
        println!("  Failed:  {}", report.failed.len().to_string().red());
    }
    if report.skipped > 0 {
        println!("  Skipped: {}", report.skipped.to_string().yellow());
    }
    report
}

fn print_segment(result: &SegmentResult) {
    let position = format!("[{}/{}]", result.index + 1, result.total);
    match &result.outcome {
        Ok(record) => println!(
            "\n  {} {} {}",
            position.dimmed(),
            result.label.cyan(),
            record.file_path.display().to_string().green()
        ),
        Err(e) => println!(
            "\n  {} {} {}",
            position.dimmed(),
            result.label.cyan(),
            e.to_string().red()
        ),
    }
}

/// Reads one request from `input`.
///
/// Returns `None` on an exit word or end of input. Empty event names are
/// asked for again.
fn prompt_request<R: BufRead>(
    input: &mut R,
    segments_override: Option<usize>,
) -> Result<Option<(EventRequest, usize)>> {
    let name = loop {
        let Some(line) = prompt_line(input, "Event name ('exit' to quit)")? else {
            return Ok(None);
        };
        if is_exit_word(&line) {
            return Ok(None);
        }
        if !line.is_empty() {
            break line;
        }
        println!("{}", "Please enter an event name.".yellow());
    };

    let Some(years) = prompt_line(input, "Year range (e.g. 1840-1911)")? else {
        return Ok(None);
    };

    let segments = match segments_override {
        Some(n) => n,
        None => {
            let prompt = format!("Segments [{DEFAULT_SEGMENTS}]");
            let Some(line) = prompt_line(input, &prompt)? else {
                return Ok(None);
            };
            parse_segments(&line)
        }
    };

    Ok(Some((EventRequest::new(name, YearRange::parse(&years)), segments)))
}

/// Prints `label` and reads a trimmed line; `None` at end of input.
fn prompt_line<R: BufRead>(input: &mut R, label: &str) -> Result<Option<String>> {
    print!("{label}: ");
    io::stdout().flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn is_exit_word(input: &str) -> bool {
    EXIT_WORDS.iter().any(|w| input.eq_ignore_ascii_case(w))
}

/// Parses the segment count, falling back to the default on bad input.
fn parse_segments(input: &str) -> usize {
    if input.is_empty() {
        return DEFAULT_SEGMENTS;
    }
    match input.parse() {
        Ok(n) => n,
        Err(_) => {
            println!(
                "{}",
                format!("Invalid segment count '{input}', using {DEFAULT_SEGMENTS}").yellow()
            );
            DEFAULT_SEGMENTS
        }
    }
}
