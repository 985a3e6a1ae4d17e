//! Helpers for running child processes with timeouts and bounded output.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

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

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// The child is killed if the returned future is dropped before it finishes.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub async fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = tokio::spawn(read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = tokio::spawn(read_stream_limited(stderr, output_limit_bytes));

    // The write runs alongside the timed wait, never ahead of it.
    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(tokio::spawn(async move {
                child_stdin.write_all(&input).await?;
                // Closing stdin signals end of input.
                drop(child_stdin);
                Ok::<(), std::io::Error>(())
            }))
        }
        None => None,
    };

    let mut timed_out = false;
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.context("wait for command")?,
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().await.context("kill command")?;
            child.wait().await.context("wait command after kill")?
        }
    };

    if let Some(handle) = stdin_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if timed_out => debug!(err = %err, "stdin write cut short by timeout"),
            Ok(Err(err)) => warn!(err = %err, "child did not read all of stdin"),
            Err(_) => return Err(anyhow!("stdin writer task panicked")),
        }
    }

    let (stdout, stdout_truncated) = join_output(stdout_handle).await.context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).await.context("join stderr")?;

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

async fn join_output(handle: JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader task panicked")),
    }
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await.context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn truncates_stdout_beyond_limit() {
        let output = run_command_with_timeout(
            shell("printf 0123456789"),
            None,
            Duration::from_secs(5),
            4,
        )
        .await
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[tokio::test]
    async fn timeout_covers_a_child_that_never_reads_stdin() {
        let input = vec![b'x'; 1 << 20];
        let started = std::time::Instant::now();
        let output = run_command_with_timeout(
            shell("sleep 5"),
            Some(&input),
            Duration::from_millis(200),
            100,
        )
        .await
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn pipes_stdin_to_the_child() {
        let output = run_command_with_timeout(
            shell("cat"),
            Some(b"prompt text"),
            Duration::from_secs(5),
            100,
        )
        .await
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout, b"prompt text");
    }

    #[tokio::test]
    async fn kills_command_after_timeout() {
        let output = run_command_with_timeout(
            shell("sleep 5"),
            None,
            Duration::from_millis(100),
            100,
        )
        .await
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }
}
