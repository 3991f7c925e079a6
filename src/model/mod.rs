//! Model client with retry, backoff and a session token budget.
//!
//! [`ModelClient`] wraps a [`Transport`] and owns the per-session
//! counters. Every logical request goes through [`ModelClient::call`],
//! which checks the budget, retries transport failures with exponential
//! backoff and reports the outcome as a [`Result`].

pub mod prompt;
pub mod transport;

use std::time::Duration;

use anyhow::Context;

use crate::config::Config;

pub use transport::{ChatReply, ChatRequest, HttpTransport, Transport, TransportError};

/// Message shown to users when every attempt failed.
pub const UNAVAILABLE_MESSAGE: &str =
    "Could not reach the model service. Check the network connection or API configuration.";

/// Text and usage from a successful model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCallResult {
    pub content: String,
    /// Tokens reported by the endpoint; 0 when not reported.
    pub tokens_used: u64,
}

/// Counters for one client instance. They only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Attempts that received an HTTP response, successful or not.
    pub call_count: u64,
    /// Sum of reported token usage over successful calls.
    pub total_tokens: u64,
}

/// Errors that can occur during a model call.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The session token budget is already spent; nothing was sent.
    #[error("Total token limit reached ({used}/{limit}), no further content will be generated")]
    BudgetExhausted { used: u64, limit: u64 },

    /// Every attempt failed at the transport level.
    #[error("{}", UNAVAILABLE_MESSAGE)]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: TransportError,
    },

    /// The endpoint answered with something that is not a completion.
    #[error("Failed to parse model response: {0}")]
    Parse(String),
}

/// Blocks the current thread. Abstracted so tests can observe waits.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Limits and defaults applied to every call.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub model: String,
    pub max_tokens_per_request: u32,
    pub max_tokens_total: u64,
    pub retry_attempts: u32,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens_per_request: config.max_tokens_per_request,
            max_tokens_total: config.max_tokens_total,
            retry_attempts: config.retry_attempts,
        }
    }
}

/// Retrying chat-completion client that tracks session usage.
pub struct ModelClient {
    transport: Box<dyn Transport>,
    sleeper: Box<dyn Sleeper>,
    settings: ClientSettings,
    state: SessionState,
}

impl ModelClient {
    /// Creates a client that sleeps on the real clock between retries.
    pub fn new(transport: Box<dyn Transport>, settings: ClientSettings) -> Self {
        Self {
            transport,
            sleeper: Box::new(ThreadSleeper),
            settings,
            state: SessionState::default(),
        }
    }

    /// Builds an HTTP-backed client. Fails if no API key is configured.
    pub fn from_config(config: &Config, echo: bool) -> anyhow::Result<Self> {
        let api_key = config.require_api_key()?;
        let transport = HttpTransport::new(&config.api_endpoint, api_key, config.request_timeout())
            .context("Failed to build HTTP client")?
            .with_echo(echo);

        Ok(Self::new(
            Box::new(transport),
            ClientSettings::from_config(config),
        ))
    }

    /// Replaces the sleeper used for backoff.
    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Snapshot of the session counters.
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// True once the session token budget has been reached.
    pub fn budget_exhausted(&self) -> bool {
        self.state.total_tokens >= self.settings.max_tokens_total
    }

    /// Sends one logical request.
    ///
    /// `system_prompt` and `max_tokens` fall back to the historian prompt
    /// and the per-request cap. Transport failures are retried up to
    /// `retry_attempts` times, waiting `2^attempt` seconds in between.
    pub fn call(
        &mut self,
        prompt: &str,
        system_prompt: Option<&str>,
        max_tokens: Option<u32>,
        streaming: bool,
    ) -> Result<ModelCallResult, ModelError> {
        if self.budget_exhausted() {
            tracing::warn!(
                "Token budget reached ({}/{}), skipping request",
                self.state.total_tokens,
                self.settings.max_tokens_total
            );
            return Err(ModelError::BudgetExhausted {
                used: self.state.total_tokens,
                limit: self.settings.max_tokens_total,
            });
        }

        let request = ChatRequest {
            model: self.settings.model.clone(),
            system_prompt: system_prompt
                .unwrap_or(prompt::DEFAULT_SYSTEM_PROMPT)
                .to_string(),
            user_prompt: prompt.to_string(),
            max_tokens: max_tokens.unwrap_or(self.settings.max_tokens_per_request),
            stream: streaming,
        };

        let attempts = self.settings.retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            tracing::info!("Calling model (attempt {}/{})", attempt + 1, attempts);

            let err = match self.transport.send(&request) {
                Ok(reply) => {
                    self.state.call_count += 1;
                    self.state.total_tokens += reply.tokens_used;
                    tracing::info!("Model call succeeded, used about {} tokens", reply.tokens_used);
                    return Ok(ModelCallResult {
                        content: reply.content,
                        tokens_used: reply.tokens_used,
                    });
                }
                Err(err) => err,
            };

            if err.received_response() {
                self.state.call_count += 1;
            }
            tracing::error!("Model call failed: {err}");

            if !err.is_retryable() {
                return Err(ModelError::Parse(err.to_string()));
            }

            attempt += 1;
            if attempt >= attempts {
                tracing::error!("Giving up after {attempts} attempts");
                return Err(ModelError::RetriesExhausted {
                    attempts,
                    last: err,
                });
            }

            let wait = backoff(attempt - 1);
            tracing::info!("Retrying in {} seconds", wait.as_secs());
            self.sleeper.sleep(wait);
        }
    }
}

/// Wait before the retry following zero-indexed `attempt`.
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}
