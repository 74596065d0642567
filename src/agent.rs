//! The turn loop.
//!
//! One run: append the user prompt, then alternate model calls and tool
//! execution until the model answers without requesting the tool. Every
//! message is durably appended to the session before the loop acts on it,
//! so a crash never loses more than the in-flight network call.

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::bash::{self, CommandResult};
use crate::config::{Config, Settings};
use crate::llm::{bash_tool_schema, BashArgs, ChatClient, HttpChatClient, Message, ToolCall, BASH_TOOL_NAME};
use crate::overflow::{self, StreamKind};
use crate::session::Session;

/// Console echo flags, resolved once at construction. Verbose implies all
/// three. These only affect what is printed, never what is persisted.
#[derive(Debug, Clone, Copy)]
pub struct DisplayOptions {
    pub show_tool_call: bool,
    pub show_tool_result: bool,
    pub show_reasoning: bool,
}

impl DisplayOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let verbose = settings.verbose.unwrap_or(false);
        DisplayOptions {
            show_tool_call: verbose || settings.show_tool_call.unwrap_or(false),
            show_tool_result: verbose || settings.show_tool_result.unwrap_or(false),
            show_reasoning: verbose || settings.show_reasoning.unwrap_or(false),
        }
    }

    fn any(&self) -> bool {
        self.show_tool_call || self.show_tool_result || self.show_reasoning
    }
}

/// Drives one conversation against a loaded session.
pub struct Agent {
    config: Config,
    session: Session,
    client: Box<dyn ChatClient>,
    display: DisplayOptions,
}

impl Agent {
    pub fn new(config: Config, session: Session) -> Result<Self> {
        let client = HttpChatClient::new(
            config.settings.api_url.as_deref().unwrap_or_default(),
            config.settings.api_key.as_deref().unwrap_or_default(),
            config.settings.model.as_deref().unwrap_or_default(),
        )?;
        Ok(Self::with_client(config, session, Box::new(client)))
    }

    /// Construct with an explicit client. Anything satisfying
    /// [`ChatClient`] can stand in for the HTTP service.
    pub fn with_client(config: Config, session: Session, client: Box<dyn ChatClient>) -> Self {
        let display = DisplayOptions::from_settings(&config.settings);
        Agent {
            config,
            session,
            client,
            display,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run the loop to completion for one user prompt.
    pub fn run(&mut self, prompt: &str) -> Result<()> {
        self.session.append(Message::user(prompt))?;
        let tools = [bash_tool_schema()];

        loop {
            let msg = self.client.complete(self.session.messages(), &tools)?;
            // Durability first: the response is on disk before anything
            // acts on it.
            self.session.append(msg.clone())?;
            self.echo_assistant(&msg);

            if msg.tool_calls().is_empty() {
                return Ok(());
            }

            // Process every request in order, then consult the model once.
            for call in msg.tool_calls() {
                let result = self.run_tool_call(call)?;
                if self.display.show_tool_result {
                    println!("[RESULT]\n{result}");
                }
                self.session.append(Message::tool(call.id.clone(), result))?;
            }
        }
    }

    /// Execute one tool request and produce the result text fed back to
    /// the model. A request violating the tool protocol is fatal; a
    /// command that could not start is reported in place of its result.
    fn run_tool_call(&self, call: &ToolCall) -> Result<String> {
        if call.function.name != BASH_TOOL_NAME {
            bail!(
                "model requested unknown tool '{}' (only '{}' is available)",
                call.function.name,
                BASH_TOOL_NAME
            );
        }
        let args: BashArgs = serde_json::from_str(&call.function.arguments)
            .with_context(|| format!("malformed arguments for tool call {}", call.id))?;

        if self.display.show_tool_call {
            println!("[TOOL] {}", args.command);
        }

        match bash::execute(
            &args.command,
            &self.config.project_root,
            args.timeout_duration(),
        ) {
            Ok(result) => Ok(self.format_result(&result)),
            Err(err) => Ok(format!("Error executing bash: {err:#}")),
        }
    }

    fn format_result(&self, result: &CommandResult) -> String {
        let stdout = self.bounded(&result.stdout, self.config.max_stdout(), StreamKind::Stdout);
        let stderr = self.bounded(&result.stderr, self.config.max_stderr(), StreamKind::Stderr);
        format!(
            "Exit Code: {}\nSTDOUT:\n{}\nSTDERR:\n{}",
            result.exit_code, stdout, stderr
        )
    }

    fn bounded(&self, content: &str, limit: i64, stream: StreamKind) -> String {
        match overflow::handle(content, limit, stream, self.session.session_dir()) {
            Ok(text) => text,
            // Spill failures degrade to inlining the full text.
            Err(err) => {
                warn!(stream = stream.as_str(), error = %err, "failed to spill output, inlining untruncated");
                content.to_string()
            }
        }
    }

    fn echo_assistant(&self, msg: &Message) {
        if self.display.show_reasoning {
            if let Some(reasoning) = msg.reasoning_content.as_deref() {
                if !reasoning.is_empty() {
                    println!("[REASONING]\n{reasoning}");
                }
            }
        }
        if !msg.content.is_empty() {
            if self.display.any() {
                println!("[MESSAGE]");
            }
            if msg.content.ends_with('\n') {
                print!("{}", msg.content);
            } else {
                println!("{}", msg.content);
            }
        }
    }
}
