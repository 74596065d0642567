//! Spill handling for oversized command output.
//!
//! Captured streams beyond the configured byte budget are written whole to
//! a side file in the session directory; the model sees a truncated inline
//! copy plus a retrieval hint carrying the side file's identifier.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Budget applied when the configured limit is zero/unset.
pub const DEFAULT_MAX_OUTPUT: i64 = 1000;

/// Which captured stream a piece of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// Apply the per-stream byte budget to `content`.
///
/// A negative limit means unlimited; zero means [`DEFAULT_MAX_OUTPUT`].
/// Within budget the text passes through unchanged. Over budget the full
/// text is spilled to `<timestamp>-<rand8>.<stream>.log` under
/// `session_dir` and the truncated text comes back with a hint naming the
/// spill id. A spill write failure is `Err`; the caller falls back to
/// inlining the untruncated text.
pub fn handle(content: &str, limit: i64, stream: StreamKind, session_dir: &Path) -> Result<String> {
    let limit = if limit == 0 { DEFAULT_MAX_OUTPUT } else { limit };
    if limit < 0 || content.len() as i64 <= limit {
        return Ok(content.to_string());
    }

    let id = spill_id();
    let filename = format!("{id}.{}.log", stream.as_str());
    let path = session_dir.join(&filename);
    fs::write(&path, content).with_context(|| format!("write spill file {}", path.display()))?;

    // Cut on a char boundary so truncation never splits a UTF-8 sequence.
    let mut cut = limit as usize;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }

    Ok(format!(
        "{}\n... (truncated. Use `solo session {} {}` to view full log.)",
        &content[..cut],
        stream.as_str(),
        id
    ))
}

fn spill_id() -> String {
    let uuid = Uuid::new_v4().to_string();
    format!("{}-{}", Local::now().format("%Y%m%d-%H%M%S"), &uuid[..8])
}
