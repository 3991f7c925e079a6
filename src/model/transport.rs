//! Wire-level access to the chat-completions API.
//!
//! [`Transport`] is the seam between the retrying [`ModelClient`] and the
//! network. [`HttpTransport`] speaks the OpenAI-compatible protocol over a
//! blocking `reqwest` client, in either one-shot or streamed mode.
//!
//! [`ModelClient`]: super::ModelClient

use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;

/// Timeout for establishing a connection (30 seconds).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sampling temperature sent with every request.
pub const TEMPERATURE: f64 = 0.4;

/// Prefix of a server-sent event carrying data.
const DATA_PREFIX: &str = "data:";

/// Payload marking the end of a stream.
const DONE_MARKER: &str = "[DONE]";

/// Printed after partially echoed text when a stream breaks.
pub const STREAM_INTERRUPTED: &str = "[stream interrupted, partial answer discarded]";

// ==================== Types ====================

/// One message in the two-message exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// A fully specified chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub stream: bool,
}

impl ChatRequest {
    /// System message followed by the user message.
    pub fn messages(&self) -> [ChatMessage; 2] {
        [
            ChatMessage {
                role: "system",
                content: self.system_prompt.clone(),
            },
            ChatMessage {
                role: "user",
                content: self.user_prompt.clone(),
            },
        ]
    }

    /// Builds the JSON request body.
    pub fn to_body(&self) -> Value {
        let messages: Vec<Value> = self
            .messages()
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect();

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": TEMPERATURE,
            "stream": self.stream,
        })
    }
}

/// Text and usage returned by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub content: String,
    /// Reported `usage.total_tokens`, or 0 when unavailable.
    pub tokens_used: u64,
}

/// Failures while talking to the model endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request timed out before a response arrived.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Network or connection error; no response was received.
    #[error("Request failed: {0}")]
    Connection(String),

    /// The endpoint returned a non-success HTTP status code.
    #[error("HTTP error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The response started but its body could not be read.
    #[error("Response stream broken: {0}")]
    Stream(String),

    /// The response body was not the expected JSON envelope.
    #[error("Failed to parse response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether an HTTP response (of any status) came back.
    pub fn received_response(&self) -> bool {
        matches!(
            self,
            TransportError::Status { .. } | TransportError::Stream(_) | TransportError::Decode(_)
        )
    }

    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Decode(_))
    }

    fn from_send(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else {
            TransportError::Connection(err.to_string())
        }
    }
}

// ==================== Trait ====================

/// Sends one chat request and returns the assembled reply.
pub trait Transport {
    fn send(&self, request: &ChatRequest) -> Result<ChatReply, TransportError>;
}

// ==================== HTTP ====================

/// OpenAI-compatible chat-completions transport over blocking HTTP.
pub struct HttpTransport {
    /// HTTP client instance.
    client: Client,
    endpoint: String,
    api_key: String,
    /// Print streamed fragments to stdout as they arrive.
    echo: bool,
}

impl HttpTransport {
    /// Creates a transport with the given whole-request timeout.
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            echo: false,
        })
    }

    /// Enables live printing of streamed text.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &ChatRequest) -> Result<ChatReply, TransportError> {
        let body = request.to_body();

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .map_err(|e| TransportError::from_send(&e))?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body_text = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::Status {
                status: status_code,
                body: body_text,
            });
        }

        if request.stream {
            let mut stdout = std::io::stdout();
            let content =
                echo_event_stream(BufReader::new(response), self.echo.then_some(&mut stdout))?;
            // Usage is not reported reliably on streams.
            return Ok(ChatReply {
                content,
                tokens_used: 0,
            });
        }

        let text = response
            .text()
            .map_err(|e| TransportError::Stream(e.to_string()))?;
        let json: Value =
            serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))?;

        parse_completion(&json)
    }
}

// ==================== Parsing ====================

/// Parses a non-streamed completion envelope.
///
/// Content comes from `choices[0].message.content`; usage from
/// `usage.total_tokens`, defaulting to 0.
pub fn parse_completion(json: &Value) -> Result<ChatReply, TransportError> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            TransportError::Decode("Missing choices[0].message.content in response".to_string())
        })?;

    let tokens_used = json
        .get("usage")
        .and_then(|u| u.get("total_tokens"))
        .and_then(|t| t.as_u64())
        .unwrap_or(0);

    Ok(ChatReply {
        content: content.to_string(),
        tokens_used,
    })
}

/// Assembles streamed text from `data: {...}` lines.
///
/// Each delta fragment is handed to `on_fragment` and appended to the
/// result. Lines that are not data events or do not decode are skipped.
/// Reading stops at `data: [DONE]` or end of input.
pub fn read_event_stream<R, F>(reader: R, mut on_fragment: F) -> Result<String, TransportError>
where
    R: BufRead,
    F: FnMut(&str),
{
    let mut content = String::new();

    for line in reader.lines() {
        let line = line.map_err(|e| TransportError::Stream(e.to_string()))?;
        let Some(payload) = line.trim_end().strip_prefix(DATA_PREFIX) else {
            continue;
        };
        let payload = payload.trim_start();
        if payload == DONE_MARKER {
            break;
        }

        let Ok(event) = serde_json::from_str::<Value>(payload) else {
            continue;
        };
        let fragment = event
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.get("delta"))
            .and_then(|delta| delta.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default();

        if !fragment.is_empty() {
            on_fragment(fragment);
            content.push_str(fragment);
        }
    }

    Ok(content)
}

/// Reads a stream like [`read_event_stream`], copying fragments to `echo`.
///
/// When the stream breaks after text was echoed, the partial line is closed
/// with [`STREAM_INTERRUPTED`] so a retried answer starts on a fresh line.
pub fn echo_event_stream<R, W>(reader: R, mut echo: Option<&mut W>) -> Result<String, TransportError>
where
    R: BufRead,
    W: Write,
{
    let mut echoed = false;
    let result = read_event_stream(reader, |fragment| {
        if let Some(out) = echo.as_mut() {
            let _ = write!(out, "{fragment}");
            let _ = out.flush();
            echoed = true;
        }
    });

    if let Some(out) = echo {
        match &result {
            Ok(_) => {
                let _ = writeln!(out);
            }
            Err(e) if echoed => {
                tracing::warn!("Stream broke after partial output: {e}");
                let _ = writeln!(out, "\n{STREAM_INTERRUPTED}");
            }
            Err(_) => {}
        }
    }
    result
}
