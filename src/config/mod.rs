//! Configuration management
//!
//! Settings come from four layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. `~/.chronicle/config.yaml` (optional)
//! 3. A `.env` file in the working directory (optional)
//! 4. Environment variables (`R1_API_KEY`, `OBSIDIAN_VAULT_PATH`, ...)
//!
//! Resolution is driven by an injectable lookup function so tests can
//! supply variables without touching the process environment.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default chat-completions endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://api.siliconflow.cn/v1/chat/completions";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-R1";

/// Dotenv file read from the working directory.
pub const DOTENV_FILE: &str = ".env";

/// Errors raised while resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No API key is available from the config file or environment.
    #[error("API key not configured. Set R1_API_KEY or api_key in ~/.chronicle/config.yaml.")]
    MissingApiKey,

    /// A value could not be parsed into the expected type.
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    /// The config file exists but could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML for this schema.
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The dotenv file exists but could not be read or parsed.
    #[error("Failed to load {path}: {message}")]
    Dotenv { path: PathBuf, message: String },
}

/// Optional overrides read from `config.yaml`.
///
/// Every field is optional; anything left out falls back to the default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub api_key: Option<String>,
    pub api_endpoint: Option<String>,
    pub model: Option<String>,
    pub vault_path: Option<PathBuf>,
    pub event_folder: Option<String>,
    pub detail_folder: Option<String>,
    pub max_tokens_per_request: Option<u32>,
    pub max_tokens_total: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub pause_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
}

impl FileConfig {
    /// Parses a YAML document into file overrides.
    pub fn from_yaml(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_saphyr::from_str(contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Loads overrides from `path`, returning defaults when the file is absent.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(path, &contents)
    }
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token for the model API. May be empty until [`Config::require_api_key`].
    pub api_key: String,
    pub api_endpoint: String,
    pub model: String,
    /// Root of the Obsidian vault.
    pub vault_path: PathBuf,
    /// True when no vault path was configured and the fallback is in use.
    pub vault_path_defaulted: bool,
    /// Folder (relative to the vault) holding event-list notes.
    pub event_folder: String,
    /// Folder (relative to the vault) receiving detail notes.
    pub detail_folder: String,
    pub max_tokens_per_request: u32,
    /// Session-wide cap on generated tokens.
    pub max_tokens_total: u64,
    pub request_timeout_secs: u64,
    /// Attempts per model request, always at least 1.
    pub retry_attempts: u32,
    /// Pause between consecutive model calls and processed files.
    pub pause_secs: u64,
    pub log_file: PathBuf,
    /// Dotenv file that contributed values, if one was found.
    pub env_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            vault_path: PathBuf::from("obsidian"),
            vault_path_defaulted: true,
            event_folder: "Events".to_string(),
            detail_folder: "AIdetails".to_string(),
            max_tokens_per_request: 1000,
            max_tokens_total: 5000,
            request_timeout_secs: 60,
            retry_attempts: 3,
            pause_secs: 1,
            log_file: PathBuf::from("chronicle.log"),
            env_file: None,
        }
    }
}

impl Config {
    /// Loads configuration from `~/.chronicle/config.yaml`, `./.env` and the
    /// process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match Self::config_path() {
            Some(path) => FileConfig::load_from_path(&path)?,
            None => FileConfig::default(),
        };

        let env_file = PathBuf::from(DOTENV_FILE);
        let dotenv = read_dotenv(&env_file)?;
        let found = !dotenv.is_empty() || env_file.is_file();

        let mut config = Self::resolve(file, layered_lookup(|key| std::env::var(key).ok(), dotenv))?;
        if found {
            tracing::debug!("Loaded settings from {}", env_file.display());
            config.env_file = Some(env_file);
        }
        Ok(config)
    }

    /// Path of the optional YAML config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".chronicle").join("config.yaml"))
    }

    /// Merges defaults, file overrides and environment lookups.
    ///
    /// Empty environment values are treated as unset.
    pub fn resolve<F>(file: FileConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let api_key = env("R1_API_KEY")
            .or(file.api_key)
            .unwrap_or_default();
        let api_endpoint = env("R1_API_ENDPOINT")
            .or(file.api_endpoint)
            .unwrap_or(defaults.api_endpoint);
        let model = env("R1_MODEL").or(file.model).unwrap_or(defaults.model);

        let configured_vault = env("OBSIDIAN_VAULT_PATH")
            .map(PathBuf::from)
            .or(file.vault_path);
        let vault_path_defaulted = configured_vault.is_none();
        let vault_path = match configured_vault {
            Some(path) => path,
            None => std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(defaults.vault_path),
        };

        let event_folder = env("EVENT_FOLDER")
            .or(file.event_folder)
            .unwrap_or(defaults.event_folder);
        let detail_folder = env("DETAIL_FOLDER")
            .or(file.detail_folder)
            .unwrap_or(defaults.detail_folder);

        let max_tokens_per_request = parse_env(&env, "MAX_TOKENS_PER_REQUEST")?
            .or(file.max_tokens_per_request)
            .unwrap_or(defaults.max_tokens_per_request);
        let max_tokens_total = parse_env(&env, "MAX_TOKENS_TOTAL")?
            .or(file.max_tokens_total)
            .unwrap_or(defaults.max_tokens_total);
        let request_timeout_secs = parse_env(&env, "REQUEST_TIMEOUT")?
            .or(file.request_timeout_secs)
            .unwrap_or(defaults.request_timeout_secs);
        let retry_attempts = parse_env(&env, "RETRY_ATTEMPTS")?
            .or(file.retry_attempts)
            .unwrap_or(defaults.retry_attempts)
            .max(1);
        let pause_secs = parse_env(&env, "CHRONICLE_PAUSE_SECS")?
            .or(file.pause_secs)
            .unwrap_or(defaults.pause_secs);
        let log_file = env("CHRONICLE_LOG_FILE")
            .map(PathBuf::from)
            .or(file.log_file)
            .unwrap_or(defaults.log_file);

        Ok(Self {
            api_key,
            api_endpoint,
            model,
            vault_path,
            vault_path_defaulted,
            event_folder,
            detail_folder,
            max_tokens_per_request,
            max_tokens_total,
            request_timeout_secs,
            retry_attempts,
            pause_secs,
            log_file,
            env_file: None,
        })
    }

    /// Fails fast when no API key is configured.
    ///
    /// Every entry point that talks to the model calls this before doing work.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(&self.api_key)
    }

    /// Directory holding event-list notes.
    pub fn event_dir(&self) -> PathBuf {
        self.vault_path.join(&self.event_folder)
    }

    /// Directory receiving detail notes.
    pub fn detail_dir(&self) -> PathBuf {
        self.vault_path.join(&self.detail_folder)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }

    /// API key reduced to its first five characters for display.
    pub fn masked_api_key(&self) -> String {
        if self.api_key.is_empty() {
            return "<unset>".to_string();
        }
        let prefix: String = self.api_key.chars().take(5).collect();
        format!("{prefix}...")
    }
}

/// Reads `KEY=value` pairs from a dotenv file.
///
/// A missing file yields an empty map.
pub fn read_dotenv(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let to_error = |e: dotenvy::Error| ConfigError::Dotenv {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) if e.not_found() => return Ok(HashMap::new()),
        Err(e) => return Err(to_error(e)),
    };
    entries.map(|entry| entry.map_err(to_error)).collect()
}

/// Puts dotenv values underneath `lookup`.
///
/// The process environment wins; a blank process value does not hide a
/// dotenv entry.
pub fn layered_lookup<F>(lookup: F, dotenv: HashMap<String, String>) -> impl Fn(&str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    move |key| {
        lookup(key)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| dotenv.get(key).cloned())
    }
}

fn parse_env<T, F>(env: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}
