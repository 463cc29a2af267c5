use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::sandbox::error::ProviderError;
use crate::sandbox::process::{HostCommand, ProcessSupervisor};
use crate::sandbox::provider::{ExecStream, SandboxProvider};
use crate::sandbox::types::*;

/// Best-effort host directory provider.
///
/// Each sandbox is a directory under `config.root_dir`, named after the
/// handle. Commands run as the current user with a filtered env.
/// Not a security boundary: trusted workloads only.
pub struct LocalHostProvider {
    config: LocalHostConfig,
    supervisor: ProcessSupervisor,
}

impl LocalHostProvider {
    pub fn new(config: LocalHostConfig) -> Result<Self, ProviderError> {
        std::fs::create_dir_all(&config.root_dir).map_err(|e| {
            ProviderError::Backend(format!(
                "failed to create sandboxes root {}: {e}",
                config.root_dir.display()
            ))
        })?;
        let supervisor = ProcessSupervisor::new(
            config.inherit_env_allowlist.clone(),
            config.max_output_bytes,
        );
        Ok(Self { config, supervisor })
    }

    fn workspace(&self, handle: &SandboxHandle) -> Result<PathBuf, ProviderError> {
        let dir = self.config.root_dir.join(handle.as_str());
        if !dir.is_dir() {
            return Err(ProviderError::NotFound(handle.to_string()));
        }
        Ok(dir)
    }

    fn bash(&self, workspace: &Path, req: &ExecRequest) -> Result<HostCommand, ProviderError> {
        let cwd = match &req.cwd {
            Some(cwd) => resolve(workspace, cwd)?,
            None => workspace.to_path_buf(),
        };
        Ok(HostCommand::new("bash")
            .args(["-lc", req.command.as_str()])
            .cwd(cwd)
            .envs(&req.env)
            .timeout(req.timeout))
    }
}

/// Resolve a sandbox path to a host path inside `root`. Absolute paths
/// are taken relative to the root; `..` may not climb above it.
fn resolve(root: &Path, guest_path: &str) -> Result<PathBuf, ProviderError> {
    let guest = Path::new(guest_path);
    let relative = guest.strip_prefix("/").unwrap_or(guest);

    let mut normalized = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(seg) => normalized.push(seg),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(ProviderError::Backend(format!(
                        "path escapes workspace: {guest_path}"
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(root.join(normalized))
}

#[async_trait]
impl SandboxProvider for LocalHostProvider {
    fn info(&self) -> SandboxProviderInfo {
        SandboxProviderInfo {
            kind: SandboxBackendKind::LocalHost,
            supports_port_exposure: false,
        }
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<ExecutionResult, ProviderError> {
        let short = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}", spec.name_prefix, &short[..8]);
        let dir = self.config.root_dir.join(&name);

        tracing::info!(
            sandbox_id = %name,
            workspace_dir = %dir.display(),
            "provisioning local sandbox"
        );

        tokio::fs::create_dir_all(&dir).await?;
        Ok(ExecutionResult {
            exit_code: 0,
            stdout: format!("{name}\n").into_bytes(),
            stderr: Vec::new(),
        })
    }

    async fn inspect(&self, handle: &SandboxHandle) -> Result<String, ProviderError> {
        let state = if self.config.root_dir.join(handle.as_str()).is_dir() {
            "Available"
        } else {
            "Deleted"
        };
        Ok(serde_json::json!({ "state": state }).to_string())
    }

    async fn expose_ports(
        &self,
        handle: &SandboxHandle,
        ports: &[PortExposure],
    ) -> Result<(), ProviderError> {
        // Local ports are already reachable from this host.
        tracing::debug!(sandbox_id = %handle, ports = ports.len(), "port exposure is a no-op locally");
        Ok(())
    }

    async fn exec(
        &self,
        handle: &SandboxHandle,
        req: ExecRequest,
    ) -> Result<ExecutionResult, ProviderError> {
        let workspace = self.workspace(handle)?;
        tracing::debug!(sandbox_id = %handle, command = %req.command, "exec in local sandbox");
        self.supervisor.run(&self.bash(&workspace, &req)?).await
    }

    async fn exec_stream(
        &self,
        handle: &SandboxHandle,
        req: ExecRequest,
    ) -> Result<Box<dyn ExecStream>, ProviderError> {
        let workspace = self.workspace(handle)?;
        let stream = self.supervisor.stream(&self.bash(&workspace, &req)?)?;
        Ok(Box::new(stream))
    }

    async fn read_file(
        &self,
        handle: &SandboxHandle,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        let workspace = self.workspace(handle)?;
        let host_path = resolve(&workspace, path)?;
        match tokio::fs::read(&host_path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        let workspace = self.workspace(handle)?;
        tracing::info!(sandbox_id = %handle, "destroying local sandbox");
        tokio::fs::remove_dir_all(&workspace).await?;
        Ok(())
    }
}
