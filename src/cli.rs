//! Command-line surface.
//!
//! Connection flags are global and double as `SOLO_*` environment
//! variables; display toggles take an optional boolean (`--verbose`,
//! `--verbose=off`). Flag values override the layered config files.

use anyhow::{bail, Context, Result};
use clap::builder::BoolishValueParser;
use clap::parser::ValueSource;
use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;

use crate::agent::Agent;
use crate::config::{self, Config, Settings, SOLO_DIR};
use crate::overflow::StreamKind;
use crate::session::Session;

#[derive(Debug, Parser)]
#[command(name = "solo", version, about = "Solo: a single-action agent")]
pub struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

/// Settings that may arrive via flag or environment and override the
/// config files.
#[derive(Debug, Clone, Args)]
struct Overrides {
    /// API key for the model service
    #[arg(long, global = true, env = "SOLO_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the chat-completion service
    #[arg(long, global = true, env = "SOLO_API_URL")]
    api_url: Option<String>,

    /// Model name
    #[arg(long, global = true, env = "SOLO_MODEL")]
    model: Option<String>,

    /// Session directory (defaults to .solo/session under the project root)
    #[arg(long, global = true, env = "SOLO_SESSION_DIR")]
    session_dir: Option<String>,

    /// Show the agent's tool calls (bash commands)
    #[arg(
        long,
        global = true,
        env = "SOLO_SHOW_TOOL_CALL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    show_tool_call: Option<bool>,

    /// Show results of tool calls
    #[arg(
        long,
        global = true,
        env = "SOLO_SHOW_TOOL_RESULT",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    show_tool_result: Option<bool>,

    /// Show the agent's reasoning content
    #[arg(
        long,
        global = true,
        env = "SOLO_SHOW_REASONING",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    show_reasoning: Option<bool>,

    /// Show all (tool calls, results, reasoning)
    #[arg(
        short = 'v',
        long,
        global = true,
        env = "SOLO_VERBOSE",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    verbose: Option<bool>,
}

impl Overrides {
    fn apply(&self, settings: &mut Settings) {
        settings.merge(Settings {
            api_key: self.api_key.clone(),
            api_url: self.api_url.clone(),
            model: self.model.clone(),
            session_dir: self.session_dir.clone(),
            show_tool_call: self.show_tool_call,
            show_tool_result: self.show_tool_result,
            show_reasoning: self.show_reasoning,
            verbose: self.verbose,
            ..Default::default()
        });
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialize a .solo directory
    Init {
        /// Directory to initialize (defaults to the working directory)
        directory: Option<PathBuf>,
    },
    /// Show or persist settings
    Config,
    /// Execute a task
    #[command(alias = "x")]
    Exec {
        /// Maximum bytes of stdout before truncation. Use -1 for no limit.
        #[arg(long, env = "SOLO_MAX_STDOUT", allow_negative_numbers = true)]
        max_stdout: Option<i64>,

        /// Maximum bytes of stderr before truncation. Use -1 for no limit.
        #[arg(long, env = "SOLO_MAX_STDERR", allow_negative_numbers = true)]
        max_stderr: Option<i64>,

        /// File containing the system prompt
        #[arg(long = "system-prompt", env = "SOLO_SYSTEM_PROMPT_FILE")]
        system_prompt: Option<String>,

        /// The task prompt (also read from piped stdin)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Start a new session
    #[command(alias = "n")]
    New,
    /// Manage sessions
    #[command(subcommand)]
    Session(SessionCommand),
    /// Show the absolute path of the project root
    Where,
}

#[derive(Debug, Subcommand)]
enum SessionCommand {
    /// List all session transcripts
    List,
    /// Show the current transcript name
    Current,
    /// Delete all session files
    Clear,
    /// Make an existing transcript the current one
    Switch {
        /// Transcript file name from `solo session list`
        file: String,
    },
    /// Show the spilled stdout log for a command
    Stdout {
        /// Identifier embedded in the truncation notice
        id: String,
    },
    /// Show the spilled stderr log for a command
    Stderr {
        /// Identifier embedded in the truncation notice
        id: String,
    },
}

/// Parse arguments and dispatch.
pub fn run() -> Result<()> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).context("parse arguments")?;

    match cli.command {
        Command::Init { directory } => cmd_init(&cli.overrides, directory),
        Command::Config => cmd_config(&cli.overrides, &matches),
        Command::Exec {
            max_stdout,
            max_stderr,
            system_prompt,
            prompt,
        } => cmd_exec(&cli.overrides, max_stdout, max_stderr, system_prompt, &prompt),
        Command::New => cmd_new(&cli.overrides),
        Command::Session(command) => cmd_session(&cli.overrides, command),
        Command::Where => cmd_where(),
    }
}

fn load_config(overrides: &Overrides) -> Result<Config> {
    let mut config = Config::load()?;
    overrides.apply(&mut config.settings);
    Ok(config)
}

fn cmd_init(overrides: &Overrides, directory: Option<PathBuf>) -> Result<()> {
    let target = match directory {
        Some(dir) => std::path::absolute(&dir)
            .with_context(|| format!("resolve {}", dir.display()))?,
        None => std::env::current_dir().context("determine working directory")?,
    };

    let solo_dir = target.join(SOLO_DIR);
    if solo_dir.exists() {
        bail!("{SOLO_DIR} directory already exists at {}", solo_dir.display());
    }
    std::fs::create_dir_all(&target)
        .with_context(|| format!("create {}", target.display()))?;

    let mut config = Config::load_at(target)?;
    overrides.apply(&mut config.settings);
    config.ensure_solo_dir()?;

    let system_prompt = config.resolve_system_prompt()?;
    let mut session = Session::new(config.session_dir());
    session.new_session(&system_prompt)
}

fn cmd_config(overrides: &Overrides, matches: &ArgMatches) -> Result<()> {
    let config = load_config(overrides)?;

    if !any_flag_on_command_line(matches) {
        println!(
            "{}",
            serde_json::to_string_pretty(&config.settings).context("serialize settings")?
        );
        return Ok(());
    }

    if !config.solo_dir.is_dir() {
        bail!("{SOLO_DIR} directory not found. Run 'solo init' first");
    }
    config.save()
}

fn cmd_exec(
    overrides: &Overrides,
    max_stdout: Option<i64>,
    max_stderr: Option<i64>,
    system_prompt: Option<String>,
    prompt_args: &[String],
) -> Result<()> {
    let mut config = load_config(overrides)?;
    config.settings.merge(Settings {
        max_stdout,
        max_stderr,
        system_prompt_file: system_prompt,
        ..Default::default()
    });
    config.validate()?;

    let mut session = Session::new(config.session_dir());
    // Resolved only when no session can be resumed.
    session.load(|| config.resolve_system_prompt())?;

    let prompt = gather_prompt(prompt_args)?;
    let mut agent = Agent::new(config, session)?;
    agent.run(&prompt)
}

fn cmd_new(overrides: &Overrides) -> Result<()> {
    let config = load_config(overrides)?;
    let system_prompt = config.resolve_system_prompt()?;
    let mut session = Session::new(config.session_dir());
    session.new_session(&system_prompt)
}

fn cmd_session(overrides: &Overrides, command: SessionCommand) -> Result<()> {
    let config = load_config(overrides)?;
    let session_dir = config.session_dir();
    if !session_dir.is_dir() {
        bail!("session directory not found: {}", session_dir.display());
    }
    let session = Session::new(session_dir);

    match command {
        SessionCommand::List => {
            for name in session.list()? {
                println!("{name}");
            }
            Ok(())
        }
        SessionCommand::Current => {
            // No pointer just means no session has been created yet.
            if let Ok(name) = session.current_log_file() {
                println!("{name}");
            }
            Ok(())
        }
        SessionCommand::Clear => session.clear(),
        SessionCommand::Switch { file } => {
            session.switch(&file)?;
            println!("Switched to session: {file}");
            Ok(())
        }
        SessionCommand::Stdout { id } => {
            print!("{}", session.read_spill(&id, StreamKind::Stdout)?);
            Ok(())
        }
        SessionCommand::Stderr { id } => {
            print!("{}", session.read_spill(&id, StreamKind::Stderr)?);
            Ok(())
        }
    }
}

fn cmd_where() -> Result<()> {
    if let Some(root) = config::discover_project_root()? {
        println!("{}", root.display());
    }
    Ok(())
}

/// Join piped stdin (when present) and the positional words into the
/// prompt, stdin first.
fn gather_prompt(args: &[String]) -> Result<String> {
    let mut parts = Vec::new();

    let mut stdin = std::io::stdin();
    if !stdin.is_terminal() {
        let mut piped = String::new();
        stdin
            .read_to_string(&mut piped)
            .context("read piped stdin")?;
        let trimmed = piped.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
    }

    if !args.is_empty() {
        parts.push(args.join(" "));
    }

    let prompt = parts.join(" ");
    if prompt.is_empty() {
        bail!("no prompt provided");
    }
    Ok(prompt)
}

/// Whether any settings flag was given on the command line itself.
/// Environment-sourced values do not count: bare `solo config` prints the
/// effective settings instead of persisting them.
fn any_flag_on_command_line(matches: &ArgMatches) -> bool {
    const SETTING_FLAGS: [&str; 8] = [
        "api_key",
        "api_url",
        "model",
        "session_dir",
        "show_tool_call",
        "show_tool_result",
        "show_reasoning",
        "verbose",
    ];

    let mut deepest = matches;
    while let Some((_, sub)) = deepest.subcommand() {
        deepest = sub;
    }
    SETTING_FLAGS
        .iter()
        .any(|id| deepest.value_source(id) == Some(ValueSource::CommandLine))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_exec_with_prompt_words() {
        let cli = Cli::parse_from(["solo", "exec", "list", "the", "files"]);
        match cli.command {
            Command::Exec { prompt, .. } => assert_eq!(prompt, vec!["list", "the", "files"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_exec_alias() {
        let cli = Cli::parse_from(["solo", "x", "do", "it"]);
        assert!(matches!(cli.command, Command::Exec { .. }));
    }

    #[test]
    fn test_parse_exec_local_flags() {
        let cli = Cli::parse_from([
            "solo",
            "exec",
            "--max-stdout",
            "500",
            "--max-stderr",
            "-1",
            "--system-prompt",
            "prompt.md",
            "task",
        ]);
        match cli.command {
            Command::Exec {
                max_stdout,
                max_stderr,
                system_prompt,
                prompt,
            } => {
                assert_eq!(max_stdout, Some(500));
                assert_eq!(max_stderr, Some(-1));
                assert_eq!(system_prompt.as_deref(), Some("prompt.md"));
                assert_eq!(prompt, vec!["task"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_flags_after_prompt_belong_to_prompt() {
        let cli = Cli::parse_from(["solo", "exec", "describe", "--verbose"]);
        match cli.command {
            Command::Exec { prompt, .. } => assert_eq!(prompt, vec!["describe", "--verbose"]),
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.overrides.verbose, None);
    }

    #[test]
    fn test_parse_toggle_forms() {
        let cli = Cli::parse_from(["solo", "--show-tool-call", "exec", "t"]);
        assert_eq!(cli.overrides.show_tool_call, Some(true));

        let cli = Cli::parse_from(["solo", "--show-tool-call=off", "exec", "t"]);
        assert_eq!(cli.overrides.show_tool_call, Some(false));

        let cli = Cli::parse_from(["solo", "-v", "exec", "t"]);
        assert_eq!(cli.overrides.verbose, Some(true));

        let cli = Cli::parse_from(["solo", "exec", "t"]);
        assert_eq!(cli.overrides.verbose, None);
    }

    #[test]
    fn test_parse_new_alias() {
        let cli = Cli::parse_from(["solo", "n"]);
        assert!(matches!(cli.command, Command::New));
    }

    #[test]
    fn test_parse_session_subcommands() {
        let cli = Cli::parse_from(["solo", "session", "switch", "20240101-000000_ab12cd34.jsonl"]);
        match cli.command {
            Command::Session(SessionCommand::Switch { file }) => {
                assert_eq!(file, "20240101-000000_ab12cd34.jsonl");
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::parse_from(["solo", "session", "stdout", "20240101-000000-ab12cd34"]);
        assert!(matches!(
            cli.command,
            Command::Session(SessionCommand::Stdout { .. })
        ));
    }

    #[test]
    fn test_parse_connection_overrides() {
        let cli = Cli::parse_from(["solo", "--api-url", "http://localhost:1234/v1", "--model", "m", "exec", "t"]);
        assert_eq!(cli.overrides.api_url.as_deref(), Some("http://localhost:1234/v1"));
        assert_eq!(cli.overrides.model.as_deref(), Some("m"));
    }

    #[test]
    fn test_config_print_vs_persist_detection() {
        let matches = Cli::command().get_matches_from(["solo", "config"]);
        assert!(!any_flag_on_command_line(&matches));

        let matches = Cli::command().get_matches_from(["solo", "config", "--show-reasoning"]);
        assert!(any_flag_on_command_line(&matches));

        let matches = Cli::command().get_matches_from(["solo", "--model", "m", "config"]);
        assert!(any_flag_on_command_line(&matches));
    }

    #[test]
    fn test_overrides_apply_wins_over_file_settings() {
        let overrides = Overrides {
            api_key: None,
            api_url: Some("https://cli.example".to_string()),
            model: None,
            session_dir: None,
            show_tool_call: Some(true),
            show_tool_result: None,
            show_reasoning: None,
            verbose: None,
        };
        let mut settings = Settings {
            api_url: Some("https://file.example".to_string()),
            model: Some("file-model".to_string()),
            ..Default::default()
        };

        overrides.apply(&mut settings);
        assert_eq!(settings.api_url.as_deref(), Some("https://cli.example"));
        assert_eq!(settings.model.as_deref(), Some("file-model"));
        assert_eq!(settings.show_tool_call, Some(true));
    }
}
