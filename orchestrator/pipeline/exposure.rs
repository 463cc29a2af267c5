use super::error::RunError;
use crate::sandbox::{PortExposure, SandboxHandle, SandboxProvider};

/// Make the workload's ports reachable from outside the sandbox.
///
/// Returns `Ok(false)` when there was nothing to do. Callers downgrade
/// an `Err` to a warning.
pub async fn expose_ports(
    provider: &dyn SandboxProvider,
    handle: &SandboxHandle,
    ports: &[PortExposure],
) -> Result<bool, RunError> {
    if ports.is_empty() {
        return Ok(false);
    }
    if !provider.info().supports_port_exposure {
        tracing::info!(backend = %provider.info().kind, "backend has no port exposure, skipping");
        return Ok(false);
    }

    provider
        .expose_ports(handle, ports)
        .await
        .map_err(|e| RunError::Exposure(e.to_string()))?;

    let list: Vec<u16> = ports.iter().map(|p| p.port).collect();
    tracing::info!(sandbox = %handle, ports = ?list, "ports exposed");
    Ok(true)
}
