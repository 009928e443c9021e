//! Child process execution with a deadline and bounded output capture.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        lossy_with_notice(&self.stdout, self.stdout_truncated, "stdout")
    }

    pub fn stderr_lossy(&self) -> String {
        lossy_with_notice(&self.stderr, self.stderr_truncated, "stderr")
    }
}

fn lossy_with_notice(bytes: &[u8], truncated: usize, label: &str) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[{label} truncated {truncated} bytes]\n"));
    }
    text
}

type Reader = JoinHandle<Result<(Vec<u8>, usize)>>;

/// Run `cmd` to completion or until `timeout` elapses, killing it on timeout.
///
/// stdout/stderr are drained on background threads while the child runs so a
/// chatty child cannot deadlock on a full pipe. At most `output_limit_bytes`
/// of each stream are kept; the rest is counted and discarded.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;
    let (stdout_reader, stderr_reader) = spawn_readers(&mut child, output_limit_bytes)?;

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        // Written off-thread so a child that never reads stdin cannot outlive the deadline.
        thread::spawn(move || {
            if let Err(err) = pipe.write_all(&input) {
                warn!(err = %err, "child closed stdin early");
            }
        });
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_reader).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_reader).context("join stderr")?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn spawn_readers(child: &mut Child, limit: usize) -> Result<(Reader, Reader)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    Ok((
        thread::spawn(move || read_limited(stdout, limit)),
        thread::spawn(move || read_limited(stderr, limit)),
    ))
}

fn join_reader(handle: Reader) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
    Ok((kept, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_output_and_exit_code() {
        let out = run_command_with_timeout(
            sh("cat; echo oops >&2; exit 3"),
            Some(b"hello"),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stdout, b"hello");
        assert_eq!(out.stderr_lossy().trim(), "oops");
        assert!(!out.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let out = run_command_with_timeout(
            sh("printf 0123456789"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(out.stdout, b"0123");
        assert_eq!(out.stdout_truncated, 6);
        assert!(out.stdout_lossy().contains("truncated 6 bytes"));
    }

    #[test]
    fn kills_on_timeout() {
        let out = run_command_with_timeout(sh("exec sleep 5"), None, Duration::from_millis(100), 1024)
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.status.success());
    }
}
