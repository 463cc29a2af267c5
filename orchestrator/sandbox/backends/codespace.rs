//! GitHub Codespaces backend.
//!
//! Every provider call is a `gh codespace ...` invocation run through the
//! process supervisor. Credentials are whatever `gh` finds in the
//! allowlisted environment (`GH_TOKEN`, `GH_CONFIG_DIR`, ...); this module
//! never looks at them.

use async_trait::async_trait;

use crate::sandbox::error::ProviderError;
use crate::sandbox::process::{HostCommand, ProcessSupervisor};
use crate::sandbox::provider::{ExecStream, SandboxProvider};
use crate::sandbox::types::*;

/// Exit code used by the remote read script when the file is absent
/// (`EX_NOINPUT` from sysexits.h).
const MISSING_FILE_EXIT: i32 = 66;

pub struct CodespaceProvider {
    config: CodespaceConfig,
    supervisor: ProcessSupervisor,
}

impl CodespaceProvider {
    pub fn new(config: CodespaceConfig) -> Self {
        let supervisor =
            ProcessSupervisor::new(config.env_allowlist.clone(), config.max_output_bytes);
        Self { config, supervisor }
    }

    fn gh(&self) -> HostCommand {
        HostCommand::new(&self.config.gh_bin).arg("codespace")
    }

    /// Run a short `gh` call and fail on non-zero exit.
    async fn gh_checked(&self, cmd: HostCommand) -> Result<ExecutionResult, ProviderError> {
        let cmd = cmd.timeout(Some(self.config.command_timeout));
        let result = self.supervisor.run(&cmd).await?;
        if !result.success() {
            return Err(ProviderError::command_failed(
                Some(result.exit_code),
                &result.stderr,
            ));
        }
        Ok(result)
    }

    /// ssh joins everything after `--` into one line for the remote login
    /// shell, so the script travels as a single pre-quoted word.
    fn ssh_command(&self, handle: &SandboxHandle, req: &ExecRequest) -> HostCommand {
        self.gh()
            .args(["ssh", "--codespace", handle.as_str(), "--"])
            .arg(format!("bash -lc {}", shell_quote(&remote_script(req))))
            .timeout(req.timeout)
    }
}

/// Build the script passed to `bash -lc` on the remote side.
fn remote_script(req: &ExecRequest) -> String {
    let mut script = String::new();
    for (k, v) in &req.env {
        script.push_str(&format!("export {k}={}; ", shell_quote(v)));
    }
    if let Some(cwd) = &req.cwd {
        script.push_str(&format!("cd {} && ", shell_quote(cwd)));
    }
    script.push_str(&req.command);
    script
}

/// Single-quote a value for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn create_args(spec: &SandboxSpec) -> Result<Vec<String>, ProviderError> {
    let repo = spec
        .repo
        .as_deref()
        .ok_or_else(|| ProviderError::Backend("codespace create needs a repository".into()))?;

    let mut args: Vec<String> = vec![
        "create".into(),
        "--repo".into(),
        repo.into(),
        "--machine".into(),
        spec.tier.clone(),
    ];
    if let Some(branch) = &spec.branch {
        args.extend(["--branch".into(), branch.clone()]);
    }
    if let Some(name) = &spec.display_name {
        args.extend(["--display-name".into(), name.clone()]);
    }
    if let Some(idle) = spec.idle_timeout {
        args.extend(["--idle-timeout".into(), format!("{}m", idle.as_secs().div_ceil(60))]);
    }
    if let Some(retention) = spec.retention {
        args.extend([
            "--retention-period".into(),
            format!("{}m", retention.as_secs().div_ceil(60)),
        ]);
    }
    Ok(args)
}

fn visibility_args(ports: &[PortExposure]) -> Vec<String> {
    ports
        .iter()
        .map(|p| format!("{}:{}", p.port, p.visibility.as_str()))
        .collect()
}

#[async_trait]
impl SandboxProvider for CodespaceProvider {
    fn info(&self) -> SandboxProviderInfo {
        SandboxProviderInfo {
            kind: SandboxBackendKind::Codespace,
            supports_port_exposure: true,
        }
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<ExecutionResult, ProviderError> {
        let args = create_args(spec)?;
        tracing::info!(
            repo = spec.repo.as_deref().unwrap_or_default(),
            machine = %spec.tier,
            "creating codespace"
        );
        let cmd = self
            .gh()
            .args(args)
            .timeout(Some(self.config.create_timeout));
        self.supervisor.run(&cmd).await
    }

    async fn inspect(&self, handle: &SandboxHandle) -> Result<String, ProviderError> {
        let cmd = self
            .gh()
            .args(["view", "--codespace", handle.as_str(), "--json", "state"]);
        let result = self.gh_checked(cmd).await?;
        Ok(result.stdout_text())
    }

    async fn expose_ports(
        &self,
        handle: &SandboxHandle,
        ports: &[PortExposure],
    ) -> Result<(), ProviderError> {
        if ports.is_empty() {
            return Ok(());
        }
        let cmd = self
            .gh()
            .args(["ports", "visibility"])
            .args(visibility_args(ports))
            .args(["--codespace", handle.as_str()]);
        self.gh_checked(cmd).await?;
        Ok(())
    }

    async fn exec(
        &self,
        handle: &SandboxHandle,
        req: ExecRequest,
    ) -> Result<ExecutionResult, ProviderError> {
        tracing::debug!(codespace = %handle, command = %req.command, "exec in codespace");
        self.supervisor.run(&self.ssh_command(handle, &req)).await
    }

    async fn exec_stream(
        &self,
        handle: &SandboxHandle,
        req: ExecRequest,
    ) -> Result<Box<dyn ExecStream>, ProviderError> {
        tracing::debug!(codespace = %handle, command = %req.command, "streaming exec in codespace");
        let stream = self.supervisor.stream(&self.ssh_command(handle, &req))?;
        Ok(Box::new(stream))
    }

    async fn read_file(
        &self,
        handle: &SandboxHandle,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        let quoted = shell_quote(path);
        let req = ExecRequest::shell(format!(
            "test -f {quoted} || exit {MISSING_FILE_EXIT}; cat -- {quoted}"
        ))
        .with_timeout(self.config.command_timeout);
        let result = self.exec(handle, req).await?;

        match result.exit_code {
            0 => Ok(Some(result.stdout)),
            MISSING_FILE_EXIT => Ok(None),
            code => Err(ProviderError::command_failed(Some(code), &result.stderr)),
        }
    }

    async fn delete(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        tracing::info!(codespace = %handle, "deleting codespace");
        let cmd = self
            .gh()
            .args(["delete", "--codespace", handle.as_str(), "--force"]);
        self.gh_checked(cmd).await?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
