//! Env command - show the resolved configuration.
//!
//! Prints every setting after merging the config file, the `.env` file
//! and the environment. The API key is masked.

use anyhow::Result;
use colored::Colorize;

use chronicle_vault::config::{Config, DOTENV_FILE};

/// Arguments for the env command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    chronicle env                        Show resolved settings\n    \
    R1_API_KEY=sk-... chronicle env      Check that a key is picked up")]
pub struct Args {}

/// Executes the env command.
pub fn run(_args: Args, config: &Config) -> Result<()> {
    println!("{}", "Configuration".bold());

    match Config::config_path() {
        Some(path) if path.exists() => println!("  Config file:       {}", path.display()),
        Some(path) => println!(
            "  Config file:       {}",
            format!("{} (not found)", path.display()).dimmed()
        ),
        None => println!("  Config file:       {}", "<no home directory>".dimmed()),
    }
    match &config.env_file {
        Some(path) => println!("  Dotenv file:       {} {}", path.display(), "(loaded)".dimmed()),
        None => println!(
            "  Dotenv file:       {}",
            format!("{DOTENV_FILE} (not found)").dimmed()
        ),
    }

    let key = if config.api_key.is_empty() {
        config.masked_api_key().red().to_string()
    } else {
        config.masked_api_key().green().to_string()
    };
    println!("  API key:           {key}");
    println!("  API endpoint:      {}", config.api_endpoint);
    println!("  Model:             {}", config.model);

    let vault = config.vault_path.display().to_string();
    if config.vault_path_defaulted {
        println!("  Vault:             {} {}", vault, "(default)".dimmed());
    } else {
        println!("  Vault:             {vault}");
    }
    println!("  Event folder:      {}", config.event_dir().display());
    println!("  Detail folder:     {}", config.detail_dir().display());

    println!();
    println!("{}", "Limits".bold());
    println!("  Tokens per request: {}", config.max_tokens_per_request);
    println!("  Tokens per session: {}", config.max_tokens_total);
    println!("  Request timeout:    {}s", config.request_timeout_secs);
    println!("  Retry attempts:     {}", config.retry_attempts);
    println!("  Pause:              {}s", config.pause_secs);
    println!("  Log file:           {}", config.log_file.display());

    if config.api_key.is_empty() {
        println!();
        println!(
            "{}",
            "Hint: set R1_API_KEY (environment or .env) or api_key in the config file before collecting.".yellow()
        );
    }
    Ok(())
}
