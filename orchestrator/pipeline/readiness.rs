use std::time::Duration;

use super::error::RunError;
use crate::sandbox::{SandboxHandle, SandboxProvider, SandboxState};

#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_attempts: 30,
        }
    }
}

/// Poll the sandbox state at a fixed interval until it is `Available`.
///
/// Makes at most `max_attempts` inspections and does not sleep after the
/// last one. Inspection errors count as a non-Available observation.
/// `Failed` aborts immediately.
pub async fn await_ready(
    provider: &dyn SandboxProvider,
    handle: &SandboxHandle,
    policy: ReadinessPolicy,
) -> Result<(), RunError> {
    for attempt in 1..=policy.max_attempts {
        let state = match provider.inspect(handle).await {
            Ok(raw) => SandboxState::parse(&raw),
            Err(e) => {
                tracing::warn!(sandbox = %handle, attempt, error = %e, "inspection failed");
                SandboxState::Unknown
            }
        };

        match state {
            SandboxState::Available => {
                tracing::info!(sandbox = %handle, attempt, "✓ sandbox available");
                return Ok(());
            }
            SandboxState::Failed => {
                tracing::error!(sandbox = %handle, attempt, "sandbox failed to start");
                return Err(RunError::SandboxFailed);
            }
            state => {
                tracing::debug!(sandbox = %handle, attempt, ?state, "sandbox not ready");
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.poll_interval).await;
        }
    }

    Err(RunError::ReadinessTimeout {
        attempts: policy.max_attempts,
    })
}
