use async_trait::async_trait;

use super::error::ProviderError;
use super::types::*;

/// Capability interface over one provisioning backend.
///
/// Every call is keyed by the `SandboxHandle` the caller owns; providers
/// keep no record of a "current" sandbox, so one provider instance can
/// serve any number of concurrent runs.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Metadata about this provider (backend kind, capability flags).
    fn info(&self) -> SandboxProviderInfo;

    /// Issue the create call. The raw result is returned as-is; its
    /// stdout carries the new sandbox identifier.
    async fn create(&self, spec: &SandboxSpec) -> Result<ExecutionResult, ProviderError>;

    /// Raw state description (JSON or bare text), see `SandboxState::parse`.
    async fn inspect(&self, handle: &SandboxHandle) -> Result<String, ProviderError>;

    async fn expose_ports(
        &self,
        handle: &SandboxHandle,
        ports: &[PortExposure],
    ) -> Result<(), ProviderError>;

    /// Run a command inside the sandbox to completion, capturing output.
    async fn exec(
        &self,
        handle: &SandboxHandle,
        req: ExecRequest,
    ) -> Result<ExecutionResult, ProviderError>;

    /// Streaming exec for long-running commands.
    async fn exec_stream(
        &self,
        handle: &SandboxHandle,
        req: ExecRequest,
    ) -> Result<Box<dyn ExecStream>, ProviderError>;

    /// Read a file from the sandbox. `Ok(None)` means it does not exist.
    async fn read_file(
        &self,
        handle: &SandboxHandle,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError>;

    async fn delete(&self, handle: &SandboxHandle) -> Result<(), ProviderError>;
}

/// Stream of events from a running exec session.
///
/// The final event is `ExecEvent::Exit`; after it `next_event` returns
/// `Ok(None)`. Output drains are owned by the stream and end with it.
#[async_trait]
pub trait ExecStream: Send {
    async fn next_event(&mut self) -> Result<Option<ExecEvent>, ProviderError>;

    /// Ask the process to stop and wait for the output drains to finish.
    async fn terminate(&mut self) -> Result<(), ProviderError>;
}
