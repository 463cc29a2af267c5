//! In-memory provider with scripted replies and a call log, for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::sandbox::error::ProviderError;
use crate::sandbox::provider::{ExecStream, SandboxProvider};
use crate::sandbox::types::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create,
    Inspect(String),
    ExposePorts(String, Vec<u16>),
    Exec(String, String),
    ExecStream(String, String),
    Terminate,
    ReadFile(String, String),
    Delete(String),
}

type Reply<T> = Result<T, String>;

fn reply<T>(r: Reply<T>) -> Result<T, ProviderError> {
    r.map_err(ProviderError::Backend)
}

/// Pop the next scripted reply; the last one repeats forever.
fn next_reply<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

pub fn output(exit_code: i32, stdout: &str) -> ExecutionResult {
    ExecutionResult {
        exit_code,
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

struct Script {
    create: Option<Reply<ExecutionResult>>,
    states: VecDeque<Reply<String>>,
    health: VecDeque<Reply<ExecutionResult>>,
    workflow_events: Vec<ExecEvent>,
    workflow_hangs: bool,
    workflow_error: Option<String>,
    files: HashMap<String, Reply<Vec<u8>>>,
    expose_error: Option<String>,
    delete_error: Option<String>,
}

/// Happy path by default: creates `sbx-N`, reports Available, the health
/// probe prints `healthy`, the workflow exits 0, no artifacts exist.
pub struct ScriptedProvider {
    script: Mutex<Script>,
    calls: Arc<Mutex<Vec<Call>>>,
    counter: AtomicU64,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                create: None,
                states: VecDeque::from([Ok(r#"{"state":"Available"}"#.to_string())]),
                health: VecDeque::from([Ok(output(0, r#"{"status":"healthy"}"#))]),
                workflow_events: vec![ExecEvent::Exit { code: 0 }],
                workflow_hangs: false,
                workflow_error: None,
                files: HashMap::new(),
                expose_error: None,
                delete_error: None,
            }),
            calls: Arc::new(Mutex::new(Vec::new())),
            counter: AtomicU64::new(0),
        }
    }

    fn edit(self, f: impl FnOnce(&mut Script)) -> Self {
        f(&mut self.script.lock().unwrap());
        self
    }

    pub fn with_create(self, result: Reply<ExecutionResult>) -> Self {
        self.edit(|s| s.create = Some(result))
    }

    pub fn with_states(self, states: Vec<Reply<&str>>) -> Self {
        self.edit(|s| s.states = states.into_iter().map(|r| r.map(String::from)).collect())
    }

    pub fn with_health(self, replies: Vec<Reply<ExecutionResult>>) -> Self {
        self.edit(|s| s.health = replies.into())
    }

    pub fn with_workflow(self, events: Vec<ExecEvent>) -> Self {
        self.edit(|s| s.workflow_events = events)
    }

    /// Workflow emits its events and then never exits.
    pub fn with_hanging_workflow(self, events: Vec<ExecEvent>) -> Self {
        self.edit(|s| {
            s.workflow_events = events;
            s.workflow_hangs = true;
        })
    }

    pub fn with_workflow_error(self, message: &str) -> Self {
        self.edit(|s| s.workflow_error = Some(message.into()))
    }

    pub fn with_file(self, path: &str, contents: Reply<&str>) -> Self {
        self.edit(|s| {
            s.files
                .insert(path.into(), contents.map(|c| c.as_bytes().to_vec()));
        })
    }

    pub fn with_expose_error(self, message: &str) -> Self {
        self.edit(|s| s.expose_error = Some(message.into()))
    }

    pub fn with_delete_error(self, message: &str) -> Self {
        self.edit(|s| s.delete_error = Some(message.into()))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SandboxProvider for ScriptedProvider {
    fn info(&self) -> SandboxProviderInfo {
        SandboxProviderInfo {
            kind: SandboxBackendKind::Scripted,
            supports_port_exposure: true,
        }
    }

    async fn create(&self, _spec: &SandboxSpec) -> Result<ExecutionResult, ProviderError> {
        self.record(Call::Create);
        let scripted = self.script.lock().unwrap().create.clone();
        match scripted {
            Some(r) => reply(r),
            None => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                Ok(output(0, &format!("sbx-{n}\n")))
            }
        }
    }

    async fn inspect(&self, handle: &SandboxHandle) -> Result<String, ProviderError> {
        self.record(Call::Inspect(handle.to_string()));
        let r = next_reply(&mut self.script.lock().unwrap().states)
            .unwrap_or_else(|| Ok("Unknown".into()));
        reply(r)
    }

    async fn expose_ports(
        &self,
        handle: &SandboxHandle,
        ports: &[PortExposure],
    ) -> Result<(), ProviderError> {
        self.record(Call::ExposePorts(
            handle.to_string(),
            ports.iter().map(|p| p.port).collect(),
        ));
        match self.script.lock().unwrap().expose_error.clone() {
            Some(msg) => Err(ProviderError::Backend(msg)),
            None => Ok(()),
        }
    }

    async fn exec(
        &self,
        handle: &SandboxHandle,
        req: ExecRequest,
    ) -> Result<ExecutionResult, ProviderError> {
        self.record(Call::Exec(handle.to_string(), req.command));
        let r = next_reply(&mut self.script.lock().unwrap().health)
            .unwrap_or_else(|| Ok(output(0, "")));
        reply(r)
    }

    async fn exec_stream(
        &self,
        handle: &SandboxHandle,
        req: ExecRequest,
    ) -> Result<Box<dyn ExecStream>, ProviderError> {
        self.record(Call::ExecStream(handle.to_string(), req.command));
        let script = self.script.lock().unwrap();
        if let Some(msg) = &script.workflow_error {
            return Err(ProviderError::Backend(msg.clone()));
        }
        Ok(Box::new(ScriptedStream {
            events: script.workflow_events.clone().into(),
            hangs: script.workflow_hangs,
            calls: self.calls.clone(),
        }))
    }

    async fn read_file(
        &self,
        handle: &SandboxHandle,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        self.record(Call::ReadFile(handle.to_string(), path.to_string()));
        match self.script.lock().unwrap().files.get(path).cloned() {
            Some(r) => reply(r).map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        self.record(Call::Delete(handle.to_string()));
        match self.script.lock().unwrap().delete_error.clone() {
            Some(msg) => Err(ProviderError::Backend(msg)),
            None => Ok(()),
        }
    }
}

struct ScriptedStream {
    events: VecDeque<ExecEvent>,
    hangs: bool,
    calls: Arc<Mutex<Vec<Call>>>,
}

#[async_trait]
impl ExecStream for ScriptedStream {
    async fn next_event(&mut self) -> Result<Option<ExecEvent>, ProviderError> {
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }
        if self.hangs {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }

    async fn terminate(&mut self) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(Call::Terminate);
        self.hangs = false;
        self.events.clear();
        Ok(())
    }
}
