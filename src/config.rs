//! Layered configuration and project-root discovery.
//!
//! Settings merge lowest-to-highest: defaults, user config
//! (`$XDG_CONFIG_HOME/solo/config.json`), project config
//! (`<root>/.solo/config.json`), then environment variables and CLI flags
//! (applied by the CLI layer). Every field is optional so each layer only
//! overrides what it actually sets.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::overflow::DEFAULT_MAX_OUTPUT;

/// Project marker directory.
pub const SOLO_DIR: &str = ".solo";

/// Built-in system prompt used when no prompt file is configured.
pub const SYSTEM_PROMPT: &str = "You are Solo, a single-action agent.
You perform tasks autonomously by utilizing bash commands to fulfill user instructions.

Available Tools:

1. bash(command): Executes a bash command. Standard output, standard error, and exit code will be returned.

Constraints:

- You can only execute one tool at a time.
- Consider the next step after reviewing the results of the command.
- If a command fails, investigate the error, correct it, and retry.
- When the task is complete or if you need to ask the user a question, respond with a regular message without calling any tools.
";

/// Persisted settings. Unset fields are omitted from the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stdout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stderr: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_tool_call: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_tool_result: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_reasoning: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
}

impl Settings {
    /// Merge another settings layer into this one (other takes priority;
    /// unset fields leave the current value alone).
    pub fn merge(&mut self, other: Settings) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(api_key);
        take!(api_url);
        take!(model);
        take!(session_dir);
        take!(max_stdout);
        take!(max_stderr);
        take!(system_prompt_file);
        take!(show_tool_call);
        take!(show_tool_result);
        take!(show_reasoning);
        take!(verbose);
    }
}

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: PathBuf,
    pub solo_dir: PathBuf,
    pub config_file: PathBuf,
    pub settings: Settings,
}

impl Config {
    /// Load configuration relative to the discovered project root (the
    /// working directory when no `.solo` ancestor exists).
    pub fn load() -> Result<Self> {
        let root = find_project_root()?;
        Self::load_at(root)
    }

    /// Load configuration for an explicit project root.
    pub fn load_at(project_root: PathBuf) -> Result<Self> {
        let solo_dir = project_root.join(SOLO_DIR);
        let config_file = solo_dir.join("config.json");

        let mut layers = Vec::new();
        if let Some(user_config) = user_config_path() {
            layers.push(user_config);
        }
        layers.push(config_file.clone());
        let settings = load_settings_layers(&layers)?;

        Ok(Config {
            project_root,
            solo_dir,
            config_file,
            settings,
        })
    }

    /// The session directory: configured explicitly or `.solo/session`.
    pub fn session_dir(&self) -> PathBuf {
        match &self.settings.session_dir {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => self.solo_dir.join("session"),
        }
    }

    pub fn max_stdout(&self) -> i64 {
        self.settings.max_stdout.unwrap_or(DEFAULT_MAX_OUTPUT)
    }

    pub fn max_stderr(&self) -> i64 {
        self.settings.max_stderr.unwrap_or(DEFAULT_MAX_OUTPUT)
    }

    pub fn ensure_solo_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.solo_dir)
            .with_context(|| format!("create {}", self.solo_dir.display()))
    }

    /// Persist the settings to the project config file.
    pub fn save(&self) -> Result<()> {
        self.ensure_solo_dir()?;
        let data = serde_json::to_string_pretty(&self.settings).context("serialize settings")?;
        fs::write(&self.config_file, data)
            .with_context(|| format!("write {}", self.config_file.display()))
    }

    /// The model connection must be configured before a run.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.settings.api_url.as_deref().unwrap_or_default().is_empty() {
            missing.push("api_url");
        }
        if self.settings.model.as_deref().unwrap_or_default().is_empty() {
            missing.push("model");
        }
        if !missing.is_empty() {
            bail!(
                "missing configuration: {}. Use 'solo config' or environment variables \
                 (SOLO_API_KEY, SOLO_API_URL, SOLO_MODEL) to set them",
                missing.join(", ")
            );
        }
        Ok(())
    }

    /// Resolve the system prompt text.
    ///
    /// A configured prompt file is tried relative to the config file's
    /// directory, then the project root, then as given. No file configured
    /// means the built-in prompt.
    pub fn resolve_system_prompt(&self) -> Result<String> {
        let file = match self.settings.system_prompt_file.as_deref() {
            None | Some("") => return Ok(SYSTEM_PROMPT.to_string()),
            Some(file) => file,
        };

        for candidate in [
            self.config_file.parent().map(|dir| dir.join(file)),
            Some(self.project_root.join(file)),
        ]
        .into_iter()
        .flatten()
        {
            if candidate.is_file() {
                return fs::read_to_string(&candidate)
                    .with_context(|| format!("read system prompt {}", candidate.display()));
            }
        }

        if let Ok(content) = fs::read_to_string(file) {
            return Ok(content);
        }
        bail!("system prompt file not found: {file}")
    }
}

/// User-level config file, honoring `XDG_CONFIG_HOME`.
fn user_config_path() -> Option<PathBuf> {
    let base = match env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()?.join(".config"),
    };
    Some(base.join("solo").join("config.json"))
}

/// Merge the settings files that exist, in the given order.
fn load_settings_layers(paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    for path in paths {
        if !path.is_file() {
            continue;
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let layer: Settings = serde_json::from_str(&content)
            .with_context(|| format!("parse config {}", path.display()))?;
        settings.merge(layer);
    }
    Ok(settings)
}

/// Locate the project root: the `SOLO_PROJECT_ROOT` override, else the
/// nearest ancestor containing `.solo`. `Ok(None)` when neither applies.
pub fn discover_project_root() -> Result<Option<PathBuf>> {
    if let Some(value) = env::var_os("SOLO_PROJECT_ROOT") {
        if !value.is_empty() {
            let root = std::path::absolute(PathBuf::from(&value))
                .with_context(|| format!("resolve SOLO_PROJECT_ROOT {:?}", value))?;
            return Ok(Some(root));
        }
    }

    let cwd = env::current_dir().context("determine working directory")?;
    Ok(walk_up_for_root(&cwd))
}

/// Root discovery for commands that merely need *a* root: falls back to
/// the working directory.
pub fn find_project_root() -> Result<PathBuf> {
    if let Some(root) = discover_project_root()? {
        return Ok(root);
    }
    env::current_dir().context("determine working directory")
}

fn walk_up_for_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(SOLO_DIR).exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}
