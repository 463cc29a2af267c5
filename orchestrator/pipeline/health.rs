use std::time::Duration;

use super::error::RunError;
use crate::sandbox::{ExecRequest, ExecutionResult, SandboxHandle, SandboxProvider};

/// Decides whether a probe result counts as healthy.
pub type HealthMatcher = fn(&ExecutionResult, &str) -> bool;

/// Default rule: the probe's stdout contains the marker text.
pub fn stdout_has_marker(result: &ExecutionResult, marker: &str) -> bool {
    result.stdout_text().contains(marker)
}

#[derive(Debug, Clone)]
pub struct HealthProbe {
    pub command: String,
    pub marker: String,
    pub attempts: u32,
    pub delay: Duration,
    /// Per-attempt bound on the remote command.
    pub timeout: Duration,
    pub matcher: HealthMatcher,
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self {
            command: "curl -s http://localhost:8000/api/health".into(),
            marker: "healthy".into(),
            attempts: 5,
            delay: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            matcher: stdout_has_marker,
        }
    }
}

/// Run the probe inside the sandbox until it reports healthy.
pub async fn verify_health(
    provider: &dyn SandboxProvider,
    handle: &SandboxHandle,
    probe: &HealthProbe,
) -> Result<ExecutionResult, RunError> {
    let mut last = String::from("no attempts made");

    for attempt in 1..=probe.attempts {
        let req = ExecRequest::shell(probe.command.clone()).with_timeout(probe.timeout);
        match provider.exec(handle, req).await {
            Ok(result) if (probe.matcher)(&result, &probe.marker) => {
                tracing::info!(sandbox = %handle, attempt, "✓ workload healthy");
                return Ok(result);
            }
            Ok(result) => {
                last = format!(
                    "exit {} without marker {:?}: {}",
                    result.exit_code,
                    probe.marker,
                    result.stdout_text().trim()
                );
                tracing::debug!(sandbox = %handle, attempt, exit_code = result.exit_code, "workload not healthy yet");
            }
            Err(e) => {
                last = e.to_string();
                tracing::warn!(sandbox = %handle, attempt, error = %e, "health probe failed");
            }
        }

        if attempt < probe.attempts {
            tokio::time::sleep(probe.delay).await;
        }
    }

    Err(RunError::HealthCheck {
        attempts: probe.attempts,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::scripted::{output, Call, ScriptedProvider};

    fn probe(attempts: u32) -> HealthProbe {
        HealthProbe {
            attempts,
            delay: Duration::from_millis(1),
            ..HealthProbe::default()
        }
    }

    fn handle() -> SandboxHandle {
        SandboxHandle::parse("sbx-0").unwrap()
    }

    #[test]
    fn default_matcher_scans_stdout() {
        assert!(stdout_has_marker(&output(0, r#"{"status":"healthy"}"#), "healthy"));
        assert!(!stdout_has_marker(&output(0, ""), "healthy"));
    }

    #[tokio::test]
    async fn retries_until_marker_appears() {
        let provider = ScriptedProvider::new().with_health(vec![
            Ok(output(7, "")),
            Err("ssh: connection refused".into()),
            Ok(output(0, r#"{"status":"healthy"}"#)),
        ]);
        let result = verify_health(&provider, &handle(), &probe(5)).await.unwrap();
        assert!(result.stdout_text().contains("healthy"));
        assert_eq!(provider.count(|c| matches!(c, Call::Exec(..))), 3);
    }

    #[tokio::test]
    async fn fails_after_all_attempts() {
        let provider = ScriptedProvider::new().with_health(vec![Ok(output(0, "starting"))]);
        let err = verify_health(&provider, &handle(), &probe(3)).await.unwrap_err();
        match err {
            RunError::HealthCheck { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("starting"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(provider.count(|c| matches!(c, Call::Exec(..))), 3);
    }

    #[tokio::test]
    async fn matcher_is_swappable() {
        fn exit_zero(result: &ExecutionResult, _marker: &str) -> bool {
            result.success()
        }
        let provider = ScriptedProvider::new().with_health(vec![Ok(output(0, "ok"))]);
        let probe = HealthProbe {
            matcher: exit_zero,
            ..probe(1)
        };
        verify_health(&provider, &handle(), &probe).await.unwrap();
    }
}
