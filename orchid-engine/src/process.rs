//! Step process management
//!
//! Handles the process side of a step:
//! - Probing remote machines before connecting
//! - Spawning the step's program
//! - Streaming stdout and stderr, line by line, into the execution output
//! - Translating the exit status into a step result

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::Result;
use crate::pipeline::{RemoteEndpoint, StepInvocation, StepTarget};
use crate::repository::OutputWriter;

/// Quotes a value for a POSIX shell command line
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Checks that a remote machine accepts TCP connections on its ssh port
pub async fn check_reachable(endpoint: &RemoteEndpoint, timeout: Duration) -> std::io::Result<()> {
    let address = (endpoint.address.as_str(), endpoint.port);
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("no answer within {:?}", timeout),
        )),
    }
}

/// Runs one step to completion, appending its output line by line
///
/// The child is killed if the returned future is dropped before it exits.
pub async fn run_step(
    step: &StepInvocation,
    output: &mut OutputWriter,
    connect_timeout: Duration,
) -> Result<()> {
    if let StepTarget::Remote(endpoint) = &step.target {
        check_reachable(endpoint, connect_timeout)
            .await
            .map_err(|e| step.failed(format!("machine {} is unreachable: {}", endpoint, e)))?;
    }

    let mut command = Command::new(&step.program);
    command
        .args(&step.args)
        .envs(step.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &step.working_dir {
        command.current_dir(dir);
    }

    match &step.stdin {
        Some(path) => {
            let file = std::fs::File::open(path)
                .map_err(|e| step.failed(format!("cannot read {}: {}", path.display(), e)))?;
            command.stdin(Stdio::from(file));
        }
        None => {
            command.stdin(Stdio::null());
        }
    }

    let mut child = command
        .spawn()
        .map_err(|e| step.failed(format!("cannot start {}: {}", step.program, e)))?;

    debug!("Spawned {} as pid {:?}", step, child.id());

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| step.failed("stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| step.failed("stderr was not captured"))?;

    forward_lines(stdout, stderr, output).await?;

    let status = child
        .wait()
        .await
        .map_err(|e| step.failed(format!("cannot wait for process: {}", e)))?;

    if status.success() {
        Ok(())
    } else {
        warn!("{} {}", step, describe_exit(status));
        Err(step.failed(describe_exit(status)))
    }
}

/// Appends lines from both pipes as they arrive until both are closed
async fn forward_lines<O, E>(stdout: O, stderr: E, output: &mut OutputWriter) -> Result<()>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut stdout = BufReader::new(stdout).split(b'\n');
    let mut stderr = BufReader::new(stderr).split(b'\n');
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        let segment = tokio::select! {
            segment = stdout.next_segment(), if stdout_open => {
                let segment = segment?;
                stdout_open = segment.is_some();
                segment
            }
            segment = stderr.next_segment(), if stderr_open => {
                let segment = segment?;
                stderr_open = segment.is_some();
                segment
            }
        };

        if let Some(bytes) = segment {
            output.append(&String::from_utf8_lossy(&bytes)).await?;
        }
    }

    Ok(())
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with status {}", code),
        None => "was terminated by a signal".to_string(),
    }
}
