use crate::sandbox::{SandboxHandle, SandboxProvider, SandboxSpec};

/// Create call failed. When the provider still printed an identifier the
/// sandbox may exist, so `orphan` hands it to the finalizer.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ProvisionError {
    pub message: String,
    pub orphan: Option<SandboxHandle>,
}

impl ProvisionError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            orphan: None,
        }
    }
}

/// The identifier is the last non-empty line of the create output;
/// `gh` prints progress text before it.
pub fn parse_handle(stdout: &[u8]) -> Option<SandboxHandle> {
    String::from_utf8_lossy(stdout)
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(SandboxHandle::parse)
}

pub async fn provision(
    provider: &dyn SandboxProvider,
    spec: &SandboxSpec,
) -> Result<SandboxHandle, ProvisionError> {
    tracing::info!(tier = %spec.tier, repo = ?spec.repo, "provisioning sandbox");

    let result = provider
        .create(spec)
        .await
        .map_err(|e| ProvisionError::new(e.to_string()))?;
    let handle = parse_handle(&result.stdout);

    if !result.success() {
        let stderr = result.stderr_text();
        return Err(ProvisionError {
            message: format!(
                "create exited with code {}: {}",
                result.exit_code,
                stderr.trim()
            ),
            orphan: handle,
        });
    }

    match handle {
        Some(handle) => {
            tracing::info!(sandbox = %handle, "✓ sandbox created");
            Ok(handle)
        }
        None => Err(ProvisionError::new(format!(
            "create returned no usable sandbox identifier (stdout: {:?})",
            result.stdout_text().trim()
        ))),
    }
}
