//! Chat-completion wire types and the model client.
//!
//! The model boundary is a single synchronous operation: send the full
//! message sequence plus the tool schema, get one assistant message back.
//! `ChatClient` is the seam; `HttpChatClient` talks to any
//! OpenAI-compatible `/chat/completions` endpoint.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// The single capability exposed to the model.
pub const BASH_TOOL_NAME: &str = "bash";

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One conversation message, used both on the wire and in the transcript.
///
/// Optional fields are omitted when absent so transcript lines and request
/// bodies stay minimal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Providers send `null` content on tool-call-only messages; normalize
    /// that to an empty string.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    /// Provider extension carrying chain-of-thought style text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

fn null_as_empty<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Tool result correlated to a specific request id.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Tool requests, in the order the model issued them.
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, exactly as the provider sent it.
    pub arguments: String,
}

/// Decoded arguments for the `bash` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct BashArgs {
    pub command: String,
    /// Seconds; zero or negative means no deadline.
    #[serde(default)]
    pub timeout: i64,
}

impl BashArgs {
    pub fn timeout_duration(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout as u64))
    }
}

/// Schema for the one registered tool.
pub fn bash_tool_schema() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": BASH_TOOL_NAME,
            "description": "Execute a bash command and get the output.",
            "parameters": {
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The command to run."
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "The timeout in seconds. Default is no timeout."
                    }
                },
                "required": ["command"]
            }
        }
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// One synchronous model turn.
///
/// Implementations other than HTTP (scripted sequences in tests, local
/// models) plug in here without touching the loop.
pub trait ChatClient {
    fn complete(&self, messages: &[Message], tools: &[Value]) -> Result<Message>;
}

/// Production client for OpenAI-compatible chat-completion services.
pub struct HttpChatClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpChatClient {
    pub fn new(api_url: &str, api_key: &str, model: &str) -> Result<Self> {
        // A model turn can legitimately take minutes; only the connect
        // phase gets a deadline.
        let http = reqwest::blocking::Client::builder()
            .timeout(None)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("build HTTP client")?;
        Ok(HttpChatClient {
            http,
            endpoint: format!("{}/chat/completions", api_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

impl ChatClient for HttpChatClient {
    fn complete(&self, messages: &[Message], tools: &[Value]) -> Result<Message> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice: (!tools.is_empty()).then_some("auto"),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .with_context(|| format!("request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("model service returned {}: {}", status, body.trim());
        }

        let mut parsed: ChatResponse = response
            .json()
            .context("model service returned malformed JSON")?;
        if parsed.choices.is_empty() {
            bail!("model service returned no choices");
        }
        Ok(parsed.choices.remove(0).message)
    }
}
