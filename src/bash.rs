//! Shell command execution with deadline enforcement.
//!
//! Commands run under `/bin/bash` with strict-mode semantics in their own
//! process group. When a deadline expires the whole group is killed, so no
//! descendant survives the call.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;
use tracing::warn;
use wait_timeout::ChildExt;

/// Exit code reported when the deadline killed the command. Real processes
/// exit in 0..=255 (signal deaths map to 128+signal), so this value is
/// unambiguous.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Outcome of one command invocation.
///
/// Non-zero exits and timeouts are results, not errors; only failure to
/// start the shell at all surfaces as `Err` from [`execute`].
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Run `command` under bash in `workdir`, optionally bounded by `timeout`.
///
/// The script runs with `set -euo pipefail`: first failing statement,
/// unset variable, or failing pipeline stage aborts it. A zero timeout
/// means no deadline. On deadline the process group is SIGKILLed and the
/// result carries [`TIMEOUT_EXIT_CODE`] with a notice on stderr.
pub fn execute(command: &str, workdir: &Path, timeout: Option<Duration>) -> Result<CommandResult> {
    let workdir = std::path::absolute(workdir)
        .with_context(|| format!("resolve working directory {}", workdir.display()))?;
    let script = format!("set -euo pipefail\n{command}");

    let mut cmd = Command::new("/bin/bash");
    cmd.arg("-c")
        .arg(script)
        .current_dir(&workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = GroupChild::spawn(cmd)?;

    let stdout = child
        .inner
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .inner
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    // Drain concurrently so a chatty child cannot deadlock on a full pipe.
    let stdout_handle = thread::spawn(move || read_all(stdout));
    let stderr_handle = thread::spawn(move || read_all(stderr));

    let timeout = timeout.filter(|t| !t.is_zero());
    let status = match timeout {
        Some(deadline) => match child.inner.wait_timeout(deadline).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = deadline.as_secs(), "command deadline expired, killing process group");
                child.kill_group();
                child.inner.wait().context("reap command after kill")?;
                // Pipes close once the group dies; release the drain threads.
                let _ = join_reader(stdout_handle);
                let _ = join_reader(stderr_handle);
                return Ok(CommandResult {
                    stdout: String::new(),
                    stderr: format!("Error: Command timed out after {deadline:?}."),
                    exit_code: TIMEOUT_EXIT_CODE,
                });
            }
        },
        None => child.inner.wait().context("wait for command")?,
    };

    let stdout = join_reader(stdout_handle).context("collect stdout")?;
    let stderr = join_reader(stderr_handle).context("collect stderr")?;

    Ok(CommandResult {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: exit_code_of(status),
    })
}

/// Child whose process group is killed and reaped on every exit path,
/// including early error returns.
struct GroupChild {
    inner: Child,
}

impl GroupChild {
    fn spawn(mut cmd: Command) -> Result<Self> {
        let inner = cmd.spawn().context("spawn bash")?;
        Ok(GroupChild { inner })
    }

    #[cfg(unix)]
    fn kill_group(&mut self) {
        let pid = self.inner.id() as libc::pid_t;
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&mut self) {
        let _ = self.inner.kill();
    }
}

impl Drop for GroupChild {
    fn drop(&mut self) {
        // Only act while un-reaped; after a wait() the pid may be reused.
        if matches!(self.inner.try_wait(), Ok(None)) {
            self.kill_group();
            let _ = self.inner.wait();
        }
    }
}

fn read_all<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).context("read output")?;
    Ok(buf)
}

fn join_reader(handle: thread::JoinHandle<Result<Vec<u8>>>) -> Result<Vec<u8>> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
