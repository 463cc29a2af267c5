use std::io::Write;
use std::time::Duration;

use tokio::time::Instant;

use super::error::RunError;
use crate::sandbox::{ExecEvent, ExecRequest, ExecutionResult, SandboxHandle, SandboxProvider};

/// Receives workflow output as it arrives.
pub trait OutputSink: Send {
    fn stdout(&mut self, chunk: &[u8]);
    fn stderr(&mut self, chunk: &[u8]);
}

/// Forwards both workflow streams to this process's stdout, keeping them
/// apart from the log output on stderr.
pub struct ConsoleSink<W = std::io::Stdout> {
    out: W,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    fn forward(&mut self, chunk: &[u8]) {
        let _ = self.out.write_all(chunk);
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> OutputSink for ConsoleSink<W> {
    fn stdout(&mut self, chunk: &[u8]) {
        self.forward(chunk);
    }

    fn stderr(&mut self, chunk: &[u8]) {
        self.forward(chunk);
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowSpec {
    pub command: String,
    pub cwd: Option<String>,
    pub timeout: Duration,
    /// Bytes of each stream kept in the returned result. The sink still
    /// sees everything.
    pub max_captured_bytes: usize,
}

impl Default for WorkflowSpec {
    fn default() -> Self {
        Self {
            command: "python3 scripts/qa-smoke-test.py".into(),
            cwd: None,
            timeout: Duration::from_secs(15 * 60),
            max_captured_bytes: 1024 * 1024,
        }
    }
}

/// Exit-code convention of the smoke-test workload. The orchestrator
/// records the code as-is; this is only a reading of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowExit {
    Pass,
    Fail,
    InfraError,
    Unrecognized(i32),
}

impl WorkflowExit {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Pass,
            1 => Self::Fail,
            2 => Self::InfraError,
            other => Self::Unrecognized(other),
        }
    }
}

/// Launch the workflow and stream its output into `sink` until it exits.
///
/// On timeout the remote process is terminated before returning
/// `WorkflowTimeout`. A transport failure is `Execution`; any exit code,
/// including non-zero ones, is a successful execution.
pub async fn run_workflow(
    provider: &dyn SandboxProvider,
    handle: &SandboxHandle,
    spec: &WorkflowSpec,
    sink: &mut dyn OutputSink,
) -> Result<ExecutionResult, RunError> {
    tracing::info!(sandbox = %handle, command = %spec.command, "▶ running workflow");

    let req = ExecRequest::shell(spec.command.clone()).with_cwd(spec.cwd.clone());
    let mut stream = provider
        .exec_stream(handle, req)
        .await
        .map_err(|e| RunError::Execution(e.to_string()))?;

    let deadline = Instant::now() + spec.timeout;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    loop {
        let next = tokio::time::timeout_at(deadline, stream.next_event()).await;
        let event = match next {
            Ok(event) => event,
            Err(_) => {
                tracing::warn!(sandbox = %handle, timeout_secs = spec.timeout.as_secs(), "workflow timed out, terminating");
                if let Err(e) = stream.terminate().await {
                    tracing::warn!(error = %e, "failed to terminate workflow");
                }
                return Err(RunError::WorkflowTimeout(spec.timeout));
            }
        };

        match event.map_err(|e| RunError::Execution(e.to_string()))? {
            Some(ExecEvent::Stdout(chunk)) => {
                sink.stdout(&chunk);
                capture(&mut stdout, &chunk, spec.max_captured_bytes);
            }
            Some(ExecEvent::Stderr(chunk)) => {
                sink.stderr(&chunk);
                capture(&mut stderr, &chunk, spec.max_captured_bytes);
            }
            Some(ExecEvent::Exit { code }) => {
                tracing::info!(sandbox = %handle, exit_code = code, exit = ?WorkflowExit::from_code(code), "workflow finished");
                return Ok(ExecutionResult {
                    exit_code: code,
                    stdout,
                    stderr,
                });
            }
            None => {
                return Err(RunError::Execution(
                    "output stream ended without an exit status".into(),
                ));
            }
        }
    }
}

fn capture(buf: &mut Vec<u8>, chunk: &[u8], max_bytes: usize) {
    let room = max_bytes.saturating_sub(buf.len());
    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
}

/// Collects output in memory.
#[cfg(test)]
#[derive(Default)]
pub struct BufferSink {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[cfg(test)]
impl OutputSink for BufferSink {
    fn stdout(&mut self, chunk: &[u8]) {
        self.stdout.extend_from_slice(chunk);
    }

    fn stderr(&mut self, chunk: &[u8]) {
        self.stderr.extend_from_slice(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::scripted::{Call, ScriptedProvider};

    fn handle() -> SandboxHandle {
        SandboxHandle::parse("sbx-0").unwrap()
    }

    fn spec(timeout: Duration) -> WorkflowSpec {
        WorkflowSpec {
            timeout,
            ..WorkflowSpec::default()
        }
    }

    #[test]
    fn classifies_exit_codes() {
        assert_eq!(WorkflowExit::from_code(0), WorkflowExit::Pass);
        assert_eq!(WorkflowExit::from_code(1), WorkflowExit::Fail);
        assert_eq!(WorkflowExit::from_code(2), WorkflowExit::InfraError);
        assert_eq!(WorkflowExit::from_code(137), WorkflowExit::Unrecognized(137));
    }

    #[tokio::test]
    async fn streams_output_and_accumulates_result() {
        let provider = ScriptedProvider::new().with_workflow(vec![
            ExecEvent::Stdout(b"step 1\n".to_vec()),
            ExecEvent::Stderr(b"warning\n".to_vec()),
            ExecEvent::Stdout(b"step 2\n".to_vec()),
            ExecEvent::Exit { code: 2 },
        ]);
        let mut sink = BufferSink::default();
        let result = run_workflow(&provider, &handle(), &spec(Duration::from_secs(5)), &mut sink)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.stdout_text(), "step 1\nstep 2\n");
        assert_eq!(sink.stdout, b"step 1\nstep 2\n");
        assert_eq!(sink.stderr, b"warning\n");
        assert_eq!(
            provider.calls(),
            vec![Call::ExecStream("sbx-0".into(), "python3 scripts/qa-smoke-test.py".into())]
        );
    }

    #[tokio::test]
    async fn captured_output_is_capped_but_sink_sees_all() {
        let provider = ScriptedProvider::new().with_workflow(vec![
            ExecEvent::Stdout(b"0123456789".to_vec()),
            ExecEvent::Stdout(b"abcdef".to_vec()),
            ExecEvent::Stderr(b"e".repeat(20)),
            ExecEvent::Exit { code: 0 },
        ]);
        let spec = WorkflowSpec {
            max_captured_bytes: 12,
            ..spec(Duration::from_secs(5))
        };
        let mut sink = BufferSink::default();
        let result = run_workflow(&provider, &handle(), &spec, &mut sink).await.unwrap();
        assert_eq!(result.stdout, b"0123456789ab");
        assert_eq!(result.stderr.len(), 12);
        assert_eq!(sink.stdout, b"0123456789abcdef");
        assert_eq!(sink.stderr.len(), 20);
    }

    #[test]
    fn console_sink_merges_streams_into_one_writer() {
        let mut sink = ConsoleSink { out: Vec::new() };
        sink.stdout(b"step 1\n");
        sink.stderr(b"warning\n");
        assert_eq!(sink.out, b"step 1\nwarning\n");
    }

    #[tokio::test]
    async fn timeout_terminates_remote_process() {
        let provider = ScriptedProvider::new()
            .with_hanging_workflow(vec![ExecEvent::Stdout(b"working\n".to_vec())]);
        let mut sink = BufferSink::default();
        let err = run_workflow(&provider, &handle(), &spec(Duration::from_millis(50)), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::WorkflowTimeout(_)));
        assert_eq!(sink.stdout, b"working\n");
        assert_eq!(provider.count(|c| matches!(c, Call::Terminate)), 1);
    }

    #[tokio::test]
    async fn stream_without_exit_is_execution_error() {
        let provider = ScriptedProvider::new().with_workflow(vec![ExecEvent::Stdout(b"x".to_vec())]);
        let mut sink = BufferSink::default();
        let err = run_workflow(&provider, &handle(), &spec(Duration::from_secs(5)), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Execution(_)));
    }

    #[tokio::test]
    async fn launch_failure_is_execution_error() {
        let provider = ScriptedProvider::new().with_workflow_error("ssh: handshake failed");
        let mut sink = BufferSink::default();
        let err = run_workflow(&provider, &handle(), &spec(Duration::from_secs(5)), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Execution(ref m) if m.contains("handshake")));
    }
}
