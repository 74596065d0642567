//! Durable conversation transcripts.
//!
//! A session directory holds append-only JSONL transcripts plus one
//! pointer file naming the current transcript. The in-memory message
//! sequence never runs ahead of disk: every append persists its record
//! before memory advances, so a crash at any point leaves the transcript
//! a clean prefix of what the process saw.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::llm::Message;
use crate::overflow::StreamKind;

/// Name of the pointer file inside the session directory.
pub const POINTER_FILE: &str = "current.json";

#[derive(Serialize, Deserialize)]
struct Pointer {
    log_file: String,
}

/// One conversation's durable state plus its in-memory mirror.
pub struct Session {
    session_dir: PathBuf,
    pointer_path: PathBuf,
    log_path: Option<PathBuf>,
    messages: Vec<Message>,
}

impl Session {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        let session_dir = session_dir.into();
        let pointer_path = session_dir.join(POINTER_FILE);
        Session {
            session_dir,
            pointer_path,
            log_path: None,
            messages: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// File name of the loaded transcript, if a session is active.
    pub fn log_file_name(&self) -> Option<String> {
        self.log_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    fn init_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.session_dir).with_context(|| {
            format!("create session directory {}", self.session_dir.display())
        })
    }

    /// Resume the transcript the pointer names, or start fresh when the
    /// pointer is absent, unreadable, or dangling. The system prompt is
    /// resolved only on the start-fresh path.
    pub fn load<F>(&mut self, system_prompt: F) -> Result<()>
    where
        F: FnOnce() -> Result<String>,
    {
        self.init_dir()?;

        if let Ok(name) = self.current_log_file() {
            let path = self.session_dir.join(&name);
            if path.is_file() {
                self.log_path = Some(path);
                return self.replay();
            }
        }

        self.new_session(&system_prompt()?)
    }

    /// Start a fresh transcript seeded with the system prompt and make it
    /// current.
    ///
    /// The transcript is written before the pointer, so a crash in between
    /// leaves the old session current rather than a pointer naming a file
    /// that does not exist.
    pub fn new_session(&mut self, system_prompt: &str) -> Result<()> {
        self.init_dir()?;

        let filename = self.allocate_log_name();
        let log_path = self.session_dir.join(&filename);
        let seed = Message::system(system_prompt);
        let line = serde_json::to_string(&seed).context("serialize system message")?;
        fs::write(&log_path, format!("{line}\n"))
            .with_context(|| format!("write transcript {}", log_path.display()))?;
        self.write_pointer(&filename)?;

        self.log_path = Some(log_path);
        self.messages = vec![seed];
        Ok(())
    }

    /// Durably append one message. The record hits disk before the
    /// in-memory sequence advances.
    pub fn append(&mut self, message: Message) -> Result<()> {
        let log_path = self
            .log_path
            .as_ref()
            .ok_or_else(|| anyhow!("no active session"))?;

        let line = serde_json::to_string(&message).context("serialize message")?;
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(log_path)
            .with_context(|| format!("open transcript {}", log_path.display()))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .with_context(|| format!("append to transcript {}", log_path.display()))?;

        self.messages.push(message);
        Ok(())
    }

    /// Point the session at an existing transcript. Does not reload
    /// messages; callers load separately. A failed lookup leaves the
    /// pointer untouched.
    pub fn switch(&self, filename: &str) -> Result<()> {
        if !self.session_dir.join(filename).is_file() {
            bail!("session file not found: {filename}");
        }
        self.write_pointer(filename)
    }

    /// Transcript names, most recent first.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.session_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("read session directory {}", self.session_dir.display())
                })
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".jsonl"))
            .collect();
        // Timestamp-prefixed names sort newest-first in reverse order.
        names.sort_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Delete every transcript, spill file, and the pointer.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.session_dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("remove session directory {}", self.session_dir.display())
                })
            }
        }
        self.init_dir()
    }

    /// Transcript name the pointer currently holds.
    pub fn current_log_file(&self) -> Result<String> {
        let data = fs::read_to_string(&self.pointer_path)
            .with_context(|| format!("read pointer {}", self.pointer_path.display()))?;
        let pointer: Pointer = serde_json::from_str(&data)
            .with_context(|| format!("parse pointer {}", self.pointer_path.display()))?;
        Ok(pointer.log_file)
    }

    /// Read back a spilled stream by the id embedded in its file name.
    pub fn read_spill(&self, id: &str, stream: StreamKind) -> Result<String> {
        let path = self.session_dir.join(format!("{id}.{}.log", stream.as_str()));
        fs::read_to_string(&path).with_context(|| format!("read spill file {}", path.display()))
    }

    fn write_pointer(&self, filename: &str) -> Result<()> {
        let data = serde_json::to_string(&Pointer {
            log_file: filename.to_string(),
        })
        .context("serialize pointer")?;
        fs::write(&self.pointer_path, data)
            .with_context(|| format!("write pointer {}", self.pointer_path.display()))
    }

    fn allocate_log_name(&self) -> String {
        loop {
            let uuid = Uuid::new_v4().to_string();
            let name = format!("{}_{}.jsonl", Local::now().format("%Y%m%d-%H%M%S"), &uuid[..8]);
            if !self.session_dir.join(&name).exists() {
                return name;
            }
        }
    }

    fn replay(&mut self) -> Result<()> {
        let log_path = self
            .log_path
            .as_ref()
            .ok_or_else(|| anyhow!("no active session"))?;
        let content = fs::read_to_string(log_path)
            .with_context(|| format!("read transcript {}", log_path.display()))?;

        self.messages = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(msg) => self.messages.push(msg),
                // A torn final line after a crash is expected; anything
                // unparseable is dropped rather than blocking resume.
                Err(err) => warn!(error = %err, "skipping unparseable transcript line"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FunctionCall, Role, ToolCall};

    fn session_in(dir: &Path) -> Session {
        Session::new(dir.join("session"))
    }

    #[test]
    fn test_new_session_seeds_system_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.new_session("be helpful").unwrap();

        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].role, Role::System);
        assert_eq!(session.messages()[0].content, "be helpful");
        assert!(session.log_file_name().unwrap().ends_with(".jsonl"));
    }

    #[test]
    fn test_append_then_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.new_session("sys").unwrap();
        session.append(Message::user("first")).unwrap();
        session
            .append(Message {
                role: Role::Assistant,
                content: String::new(),
                reasoning_content: None,
                tool_calls: Some(vec![ToolCall {
                    id: "call_9".to_string(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: "bash".to_string(),
                        arguments: r#"{"command":"ls"}"#.to_string(),
                    },
                }]),
                tool_call_id: None,
            })
            .unwrap();
        session.append(Message::tool("call_9", "Exit Code: 0")).unwrap();

        let mut reloaded = session_in(dir.path());
        reloaded.load(|| Ok("unused".to_string())).unwrap();

        assert_eq!(reloaded.messages().len(), 4);
        assert_eq!(reloaded.messages()[1].content, "first");
        assert_eq!(reloaded.messages()[2].tool_calls()[0].id, "call_9");
        assert_eq!(
            reloaded.messages()[3].tool_call_id.as_deref(),
            Some("call_9")
        );
        assert_eq!(reloaded.log_file_name(), session.log_file_name());
    }

    #[test]
    fn test_load_without_pointer_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.load(|| Ok("fresh prompt".to_string())).unwrap();

        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].content, "fresh prompt");
    }

    #[test]
    fn test_load_resume_never_resolves_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.new_session("sys").unwrap();

        let mut reloaded = session_in(dir.path());
        reloaded
            .load(|| Err(anyhow!("prompt file missing")))
            .unwrap();
        assert_eq!(reloaded.messages().len(), 1);
    }

    #[test]
    fn test_load_with_dangling_pointer_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.new_session("sys").unwrap();
        let stale = session.log_file_name().unwrap();
        fs::remove_file(session.session_dir().join(&stale)).unwrap();

        let mut reloaded = session_in(dir.path());
        reloaded.load(|| Ok("sys".to_string())).unwrap();
        assert_ne!(reloaded.log_file_name().unwrap(), stale);
    }

    #[test]
    fn test_replay_skips_torn_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.new_session("sys").unwrap();
        session.append(Message::user("ok")).unwrap();

        // Simulate a crash mid-append: a half-written record on the end.
        let log = session.session_dir().join(session.log_file_name().unwrap());
        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        file.write_all(b"{\"role\":\"user\",\"cont").unwrap();
        drop(file);

        let mut reloaded = session_in(dir.path());
        reloaded.load(|| Ok("sys".to_string())).unwrap();
        assert_eq!(reloaded.messages().len(), 2);
        assert_eq!(reloaded.messages()[1].content, "ok");
    }

    #[test]
    fn test_rotation_produces_distinct_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.new_session("sys").unwrap();
        let first = session.log_file_name().unwrap();

        session.new_session("sys").unwrap();
        let second = session.log_file_name().unwrap();

        assert_ne!(first, second);
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.current_log_file().unwrap(), second);
    }

    #[test]
    fn test_switch_to_missing_file_leaves_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.new_session("sys").unwrap();
        let current = session.current_log_file().unwrap();

        let err = session.switch("20990101-000000_deadbeef.jsonl");
        assert!(err.is_err());
        assert!(err.unwrap_err().to_string().contains("session file not found"));
        assert_eq!(session.current_log_file().unwrap(), current);
    }

    #[test]
    fn test_switch_rewrites_pointer_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.new_session("sys").unwrap();
        let first = session.log_file_name().unwrap();
        session.new_session("sys").unwrap();
        let second = session.log_file_name().unwrap();

        session.switch(&first).unwrap();
        assert_eq!(session.current_log_file().unwrap(), first);
        // The in-memory view is unchanged until the caller reloads.
        assert_eq!(session.log_file_name().unwrap(), second);
    }

    #[test]
    fn test_list_is_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path());
        session.clear().unwrap();
        for name in [
            "20240101-000000_aaaaaaaa.jsonl",
            "20240301-000000_cccccccc.jsonl",
            "20240201-000000_bbbbbbbb.jsonl",
        ] {
            fs::write(session.session_dir().join(name), "").unwrap();
        }

        let listed = session.list().unwrap();
        assert_eq!(
            listed,
            vec![
                "20240301-000000_cccccccc.jsonl",
                "20240201-000000_bbbbbbbb.jsonl",
                "20240101-000000_aaaaaaaa.jsonl",
            ]
        );
    }

    #[test]
    fn test_list_ignores_non_transcript_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.new_session("sys").unwrap();
        fs::write(
            session.session_dir().join("20240101-000000-abcd1234.stdout.log"),
            "spill",
        )
        .unwrap();

        let listed = session.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].ends_with(".jsonl"));
    }

    #[test]
    fn test_list_on_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path());
        assert!(session.list().unwrap().is_empty());
    }

    #[test]
    fn test_clear_empties_directory_and_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        for _ in 0..3 {
            session.new_session("sys").unwrap();
        }
        assert_eq!(session.list().unwrap().len(), 3);

        session.clear().unwrap();
        assert!(session.list().unwrap().is_empty());
        assert!(session.current_log_file().is_err());
    }

    #[test]
    fn test_read_spill_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.new_session("sys").unwrap();

        let body = "full output body";
        fs::write(
            session.session_dir().join("20240101-120000-cafe0123.stdout.log"),
            body,
        )
        .unwrap();

        let read = session
            .read_spill("20240101-120000-cafe0123", StreamKind::Stdout)
            .unwrap();
        assert_eq!(read, body);
        assert!(session
            .read_spill("20240101-120000-cafe0123", StreamKind::Stderr)
            .is_err());
    }

    #[test]
    fn test_append_without_session_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        assert!(session.append(Message::user("orphan")).is_err());
    }

    #[test]
    fn test_transcript_exists_before_pointer_names_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        session.new_session("sys").unwrap();

        let named = session.current_log_file().unwrap();
        assert!(session.session_dir().join(named).is_file());
    }
}
