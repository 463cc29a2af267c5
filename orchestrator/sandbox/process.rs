use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::sandbox::error::ProviderError;
use crate::sandbox::provider::ExecStream;
use crate::sandbox::types::{ExecEvent, ExecutionResult};

/// Events buffered between the pipe drains and the stream consumer.
const STREAM_BUFFER_CHUNKS: usize = 64;
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// A host process invocation: program, argv, working directory, extra env.
#[derive(Debug, Clone)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        for (k, v) in env {
            self.env.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Wraps `tokio::process::Command` with env filtering, output limits,
/// timeout, and kill. Shared by every backend that shells out.
pub struct ProcessSupervisor {
    /// Environment variables to inherit from host (allowlist).
    pub env_allowlist: Vec<String>,
    /// Maximum bytes kept per output stream; the rest is drained and dropped.
    pub max_output_bytes: usize,
}

impl ProcessSupervisor {
    pub fn new(env_allowlist: Vec<String>, max_output_bytes: usize) -> Self {
        Self {
            env_allowlist,
            max_output_bytes,
        }
    }

    /// Build a filtered env map: only allowlisted host vars + request vars.
    fn build_env(&self, extra: &BTreeMap<String, String>) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = Vec::new();
        for key in &self.env_allowlist {
            if let Ok(val) = std::env::var(key) {
                env.push((key.clone(), val));
            }
        }
        for (k, v) in extra {
            env.push((k.clone(), v.clone()));
        }
        env
    }

    fn spawn(&self, cmd: &HostCommand) -> Result<Child, ProviderError> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }
        command.env_clear();
        command.envs(self.build_env(&cmd.env));
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        command.spawn().map_err(|source| ProviderError::Spawn {
            program: cmd.program.clone(),
            source,
        })
    }

    /// Run a command to completion, capturing output.
    ///
    /// `cmd.timeout` bounds the whole call, including draining the pipes:
    /// a background process that keeps them open counts against it.
    /// Exceeding it kills the process and yields `ProviderError::Timeout`.
    pub async fn run(&self, cmd: &HostCommand) -> Result<ExecutionResult, ProviderError> {
        tracing::debug!(program = %cmd.program, args = ?cmd.args, "running host command");

        let mut child = self.spawn(cmd)?;
        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Backend("stdout was not captured".into()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| ProviderError::Backend("stderr was not captured".into()))?;

        let max_bytes = self.max_output_bytes;
        let collect = async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                read_capped(stdout_pipe, max_bytes),
                read_capped(stderr_pipe, max_bytes),
            );
            status.map(|status| (status, stdout, stderr))
        };
        let collected = match cmd.timeout {
            Some(limit) => tokio::time::timeout(limit, collect).await.ok(),
            None => Some(collect.await),
        };

        let Some(collected) = collected else {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "kill after timeout failed");
            }
            return Err(ProviderError::Timeout(cmd.timeout.unwrap_or_default()));
        };
        let (status, stdout, stderr) = collected?;

        Ok(ExecutionResult {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    /// Start a streaming exec session.
    pub fn stream(&self, cmd: &HostCommand) -> Result<ProcessExecStream, ProviderError> {
        tracing::debug!(program = %cmd.program, args = ?cmd.args, "streaming host command");

        let mut child = self.spawn(cmd)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Backend("stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProviderError::Backend("stderr was not captured".into()))?;

        // Multiplex stdout and stderr into a single event channel. Only the
        // drains hold senders, so the channel closes once both pipes hit EOF.
        let (tx, rx) = mpsc::channel(STREAM_BUFFER_CHUNKS);
        let mut drains = JoinSet::new();
        spawn_drain(&mut drains, stdout, tx.clone(), ExecEvent::Stdout);
        spawn_drain(&mut drains, stderr, tx, ExecEvent::Stderr);

        Ok(ProcessExecStream {
            child,
            events: ReceiverStream::new(rx),
            drains,
            finished: false,
        })
    }
}

async fn read_capped<R>(reader: R, max_bytes: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut limited = reader.take(max_bytes as u64);
    if limited.read_to_end(&mut buf).await.is_err() {
        return buf;
    }
    // Keep the pipe drained so the child never blocks on a full buffer.
    let mut rest = limited.into_inner();
    let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;
    buf
}

/// Forward raw chunks as they arrive. A full channel blocks the drain,
/// which in turn stops reading the pipe and lets the child feel it.
fn spawn_drain<R>(
    drains: &mut JoinSet<()>,
    mut reader: R,
    tx: mpsc::Sender<ExecEvent>,
    wrap: fn(Vec<u8>) -> ExecEvent,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    drains.spawn(async move {
        let mut buf = Vec::with_capacity(READ_CHUNK_BYTES);
        loop {
            buf.clear();
            match reader.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(wrap(buf.clone())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "output pipe read failed");
                    break;
                }
            }
        }
    });
}

/// ExecStream implementation backed by a host child process.
///
/// Drain tasks live in a `JoinSet` owned by the stream and the child is
/// `kill_on_drop`, so dropping the stream leaves nothing running.
pub struct ProcessExecStream {
    child: Child,
    events: ReceiverStream<ExecEvent>,
    drains: JoinSet<()>,
    finished: bool,
}

#[async_trait::async_trait]
impl ExecStream for ProcessExecStream {
    async fn next_event(&mut self) -> Result<Option<ExecEvent>, ProviderError> {
        if self.finished {
            return Ok(None);
        }
        if let Some(event) = self.events.next().await {
            return Ok(Some(event));
        }

        // Both pipes closed: join the drains, then report the exit status.
        while self.drains.join_next().await.is_some() {}
        let status = self.child.wait().await?;
        self.finished = true;
        Ok(Some(ExecEvent::Exit {
            code: status.code().unwrap_or(-1),
        }))
    }

    async fn terminate(&mut self) -> Result<(), ProviderError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "kill on terminate failed (process may have exited)");
        }
        self.drains.shutdown().await;
        Ok(())
    }
}
