//! A single tool call, from spawn to reaping.
//!
//! ```text
//! Created -> Spawning -> AwaitingResponse -> Resolved
//! ```
//!
//! While awaiting, one `select!` races the deadline, the request write,
//! both output streams, and process exit. The deadline branch is polled
//! first so a helper that floods stdout cannot starve it. Whatever the
//! resolution, the helper's process group is killed and reaped before
//! [`Invocation::run`] returns.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;

use crate::codec::{LineBuffer, LineWriter};
use crate::error::BridgeError;
use crate::process::{self, ChildGuard, KillOutcome};
use crate::protocol::{self, Reply, Request};
use crate::types::BridgeConfig;

const READ_CHUNK_BYTES: usize = 8 * 1024;
/// How long output may keep flowing after the helper itself has exited.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Spawning,
    AwaitingResponse,
    Resolved,
}

/// How the race ended.
enum Resolution {
    Reply(Reply),
    Exited(ExitStatus),
    TimedOut,
    /// `wait()` itself failed; exit status unknown.
    Lost(std::io::Error),
}

struct Spawned {
    guard: ChildGuard,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

pub(crate) struct Invocation<'a> {
    config: &'a BridgeConfig,
    request_id: u64,
    tool: &'a str,
    arguments: serde_json::Value,
    timeout: Duration,
    deadline: Instant,
    phase: Phase,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        config: &'a BridgeConfig,
        request_id: u64,
        tool: &'a str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> Self {
        Self {
            config,
            request_id,
            tool,
            arguments,
            timeout,
            deadline: Instant::now() + timeout,
            phase: Phase::Created,
        }
    }

    fn advance(&mut self, next: Phase) {
        tracing::debug!(
            request_id = self.request_id,
            tool = self.tool,
            from = ?self.phase,
            to = ?next,
            "Invocation phase change"
        );
        self.phase = next;
    }

    pub(crate) async fn run(mut self) -> Result<serde_json::Value, BridgeError> {
        let arguments = std::mem::take(&mut self.arguments);
        let request = protocol::tool_call(self.request_id, self.tool, &arguments);

        self.advance(Phase::Spawning);
        let Spawned {
            mut guard,
            stdin,
            stdout,
            stderr,
        } = self.spawn()?;

        self.advance(Phase::AwaitingResponse);
        let (resolution, stderr_text) = self
            .await_resolution(&mut guard, &request, stdin, stdout, stderr)
            .await;

        let killed = guard.terminate().await;
        self.advance(Phase::Resolved);
        self.finish(resolution, stderr_text, killed)
    }

    fn spawn(&self) -> Result<Spawned, BridgeError> {
        let helper = &self.config.helper;
        let spawn_error = |source: std::io::Error| BridgeError::Spawn {
            program: helper.command.clone(),
            source,
        };

        let mut cmd = Command::new(&helper.command);
        cmd.args(&helper.args)
            .envs(&helper.env)
            .current_dir(&self.config.app_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process::set_new_session(&mut cmd);

        let mut child = cmd.spawn().map_err(spawn_error)?;
        let missing =
            |stream: &str| spawn_error(std::io::Error::other(format!("no {stream} from child")));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let guard = ChildGuard::new(child, cfg!(unix));
        tracing::debug!(
            request_id = self.request_id,
            tool = self.tool,
            pid = ?guard.pid(),
            "Spawned helper"
        );
        Ok(Spawned {
            guard,
            stdin,
            stdout,
            stderr,
        })
    }

    /// Race until a terminal condition. The streams are dropped on return.
    async fn await_resolution(
        &self,
        guard: &mut ChildGuard,
        request: &Request<'_>,
        stdin: ChildStdin,
        mut stdout: ChildStdout,
        mut stderr: ChildStderr,
    ) -> (Resolution, String) {
        // Closing stdin right after the line matters: some helpers wait for EOF.
        let write = async move {
            let mut writer = LineWriter::new(stdin);
            let result = writer.write_line(request).await;
            drop(writer.into_inner());
            result
        };
        tokio::pin!(write);

        let sleep = tokio::time::sleep_until(self.deadline);
        tokio::pin!(sleep);
        // Armed once the helper exits; bounds the wait for EOF on its pipes.
        let drain = tokio::time::sleep_until(self.deadline);
        tokio::pin!(drain);

        let mut lines = LineBuffer::new();
        let mut captured = Vec::new();
        let mut out_chunk = vec![0u8; READ_CHUNK_BYTES];
        let mut err_chunk = vec![0u8; READ_CHUNK_BYTES];
        let mut exit_status: Option<ExitStatus> = None;
        let mut request_sent = false;
        let mut stdout_open = true;
        let mut stderr_open = true;

        let resolution = loop {
            // Exit only counts once both streams are drained, so a reply
            // written just before exit is still seen.
            if !stdout_open
                && !stderr_open
                && let Some(status) = exit_status
            {
                break Resolution::Exited(status);
            }

            tokio::select! {
                biased;

                () = &mut sleep => break match exit_status {
                    Some(status) => Resolution::Exited(status),
                    None => Resolution::TimedOut,
                },

                () = &mut drain, if exit_status.is_some() => {
                    if let Some(status) = exit_status {
                        tracing::debug!(
                            request_id = self.request_id,
                            "Helper output still open after exit; giving up on it"
                        );
                        break Resolution::Exited(status);
                    }
                }

                written = &mut write, if !request_sent => {
                    request_sent = true;
                    if let Err(e) = written {
                        // Usually EPIPE from a helper that already quit; exit handling reports it.
                        tracing::debug!(
                            request_id = self.request_id,
                            "Writing request failed: {e}"
                        );
                    }
                }

                read = stdout.read(&mut out_chunk), if stdout_open => match read {
                    Ok(0) => {
                        stdout_open = false;
                        if let Some(tail) = lines.take_remainder()
                            && let Some(reply) = self.check_line(&tail)
                        {
                            break Resolution::Reply(reply);
                        }
                    }
                    Ok(n) => {
                        lines.extend(&out_chunk[..n]);
                        if let Some(reply) = self.scan(&mut lines) {
                            break Resolution::Reply(reply);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            request_id = self.request_id,
                            "Reading helper stdout failed: {e}"
                        );
                        stdout_open = false;
                    }
                },

                read = stderr.read(&mut err_chunk), if stderr_open => match read {
                    Ok(0) => stderr_open = false,
                    Ok(n) => capture(&mut captured, &err_chunk[..n], self.config.max_stderr_bytes),
                    Err(e) => {
                        tracing::debug!(
                            request_id = self.request_id,
                            "Reading helper stderr failed: {e}"
                        );
                        stderr_open = false;
                    }
                },

                waited = guard.wait(), if exit_status.is_none() => match waited {
                    Ok(status) => {
                        tracing::debug!(request_id = self.request_id, %status, "Helper exited");
                        exit_status = Some(status);
                        // Descendants may still hold the pipes open; take them down
                        // so EOF arrives, then read whatever is already buffered.
                        let outcome = guard.kill_group();
                        tracing::trace!(
                            request_id = self.request_id,
                            ?outcome,
                            "Signaled helper group"
                        );
                        drain
                            .as_mut()
                            .reset(self.deadline.min(Instant::now() + EXIT_DRAIN_GRACE));
                    }
                    Err(e) => break Resolution::Lost(e),
                },
            }
        };

        (resolution, String::from_utf8_lossy(&captured).into_owned())
    }

    /// Check every newly completed line; the first correlated one wins.
    fn scan(&self, lines: &mut LineBuffer) -> Option<Reply> {
        while let Some(line) = lines.next_line() {
            if let Some(reply) = self.check_line(&line) {
                return Some(reply);
            }
        }
        None
    }

    fn check_line(&self, line: &[u8]) -> Option<Reply> {
        let reply = protocol::match_reply(line, self.request_id);
        if reply.is_none() {
            tracing::trace!(
                request_id = self.request_id,
                bytes = line.len(),
                "Ignoring uncorrelated helper output"
            );
        }
        reply
    }

    fn finish(
        &self,
        resolution: Resolution,
        stderr: String,
        killed: KillOutcome,
    ) -> Result<serde_json::Value, BridgeError> {
        match resolution {
            Resolution::Reply(Reply::Result(value)) => Ok(value),
            Resolution::Reply(Reply::Error(err)) => {
                tracing::warn!(
                    request_id = self.request_id,
                    tool = self.tool,
                    code = err.code,
                    "Tool returned an error: {}",
                    err.message
                );
                Err(BridgeError::Tool {
                    code: err.code,
                    message: err.message,
                    data: err.data,
                })
            }
            Resolution::Exited(status) if status.success() => {
                tracing::warn!(
                    request_id = self.request_id,
                    tool = self.tool,
                    "Helper exited cleanly without a correlated response"
                );
                Err(BridgeError::Protocol {
                    message: format!(
                        "helper closed its output without a response to request {}",
                        self.request_id
                    ),
                    stderr,
                })
            }
            Resolution::Exited(status) => {
                tracing::warn!(
                    request_id = self.request_id,
                    tool = self.tool,
                    %status,
                    "Helper exited before responding"
                );
                Err(BridgeError::ProcessExit {
                    code: status.code(),
                    stderr,
                })
            }
            Resolution::TimedOut => {
                tracing::warn!(
                    request_id = self.request_id,
                    tool = self.tool,
                    timeout_ms = self.timeout.as_millis() as u64,
                    ?killed,
                    "Helper timed out"
                );
                Err(BridgeError::Timeout {
                    timeout: self.timeout,
                })
            }
            Resolution::Lost(e) => Err(BridgeError::Protocol {
                message: format!("lost track of helper process: {e}"),
                stderr,
            }),
        }
    }
}

/// Append to the stderr capture, dropping whatever exceeds `max`.
fn capture(buf: &mut Vec<u8>, chunk: &[u8], max: usize) {
    let room = max.saturating_sub(buf.len());
    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
}
