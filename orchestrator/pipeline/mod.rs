//! One orchestration run: provision a sandbox, wait for it, check the
//! workload, expose its ports, run the workflow, collect its results,
//! and delete the sandbox whatever happened along the way.

pub mod cleanup;
pub mod error;
pub mod exposure;
pub mod health;
pub mod outcome;
pub mod provision;
pub mod readiness;
pub mod results;
pub mod workflow;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::Instrument;
use uuid::Uuid;

pub use error::{ErrorKind, RunError};
pub use health::HealthProbe;
pub use outcome::{RunOutcome, Verdict};
pub use readiness::ReadinessPolicy;
pub use workflow::{ConsoleSink, OutputSink, WorkflowSpec};

use crate::config::RunProfile;
use crate::sandbox::{PortExposure, SandboxHandle, SandboxProvider, SandboxSpec};

/// Everything one run needs to know, resolved from config and CLI flags.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub sandbox: SandboxSpec,
    pub readiness: ReadinessPolicy,
    pub health: HealthProbe,
    pub exposures: Vec<PortExposure>,
    pub workflow: WorkflowSpec,
    pub artifacts: Vec<String>,
    /// Leave the sandbox running for post-mortem debugging.
    pub skip_cleanup: bool,
    pub run_timeout: Option<Duration>,
}

impl From<&RunProfile> for RunPlan {
    fn from(profile: &RunProfile) -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        Self {
            sandbox: SandboxSpec {
                tier: profile
                    .sandbox
                    .machine
                    .clone()
                    .unwrap_or_else(|| SandboxSpec::default().tier),
                repo: profile.sandbox.repo.clone(),
                branch: profile.sandbox.branch.clone(),
                display_name: profile.sandbox.display_name.clone(),
                idle_timeout: profile.sandbox.idle_timeout_minutes.map(minutes),
                retention: profile.sandbox.retention_minutes.map(minutes),
                ..SandboxSpec::default()
            },
            readiness: ReadinessPolicy {
                poll_interval: Duration::from_secs(profile.readiness.poll_interval_secs),
                max_attempts: profile.readiness.max_attempts,
            },
            health: HealthProbe {
                command: profile.health.command.clone(),
                marker: profile.health.marker.clone(),
                attempts: profile.health.attempts,
                delay: Duration::from_secs(profile.health.delay_secs),
                timeout: Duration::from_secs(profile.health.timeout_secs),
                ..HealthProbe::default()
            },
            exposures: profile.exposure.exposures(),
            workflow: WorkflowSpec {
                command: profile.workflow.command.clone(),
                cwd: profile.workflow.cwd.clone(),
                timeout: Duration::from_secs(profile.workflow.timeout_secs),
                ..WorkflowSpec::default()
            },
            artifacts: profile.results.artifacts.clone(),
            skip_cleanup: false,
            run_timeout: profile.run_timeout(),
        }
    }
}

pub struct Orchestrator {
    provider: Arc<dyn SandboxProvider>,
    plan: RunPlan,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn SandboxProvider>, plan: RunPlan) -> Self {
        Self { provider, plan }
    }

    /// Execute one run. `cancel` resolving stops the pipeline at its next
    /// suspension point; cleanup still runs before this returns.
    pub async fn run<C>(&self, sink: &mut dyn OutputSink, cancel: C) -> RunOutcome
    where
        C: Future<Output = ()>,
    {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("run", run_id = %run_id);
        self.run_inner(run_id, sink, cancel).instrument(span).await
    }

    async fn run_inner<C>(&self, run_id: String, sink: &mut dyn OutputSink, cancel: C) -> RunOutcome
    where
        C: Future<Output = ()>,
    {
        let mut outcome = RunOutcome::new(run_id, self.provider.info().kind);
        let mut handle: Option<SandboxHandle> = None;
        let start = std::time::Instant::now();
        tracing::info!(backend = %outcome.backend, "▶ run started");

        let run_timeout = self.plan.run_timeout;
        let deadline = async move {
            match run_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let result = {
            let pipeline = self.pipeline(&mut handle, &mut outcome, sink);
            tokio::pin!(pipeline);
            tokio::select! {
                result = &mut pipeline => result,
                _ = cancel => {
                    tracing::warn!("cancellation requested");
                    Err(RunError::Cancelled)
                }
                _ = deadline => Err(RunError::RunTimeout(run_timeout.unwrap_or_default())),
            }
        };

        if let Err(err) = &result {
            tracing::error!(kind = ?err.kind(), error = %err, "run failed");
            outcome.fail(err);
        }

        self.finalize(handle, &mut outcome).await;

        outcome.finished_at = Some(Utc::now());
        tracing::info!(
            verdict = ?outcome.verdict(),
            exit_code = ?outcome.workflow_exit_code,
            cleaned_up = outcome.cleaned_up,
            elapsed = format_args!("{:.1}s", start.elapsed().as_secs_f64()),
            "run finished"
        );
        outcome
    }

    /// Stages in order; the first fatal error short-circuits the rest.
    /// The handle is parked in `handle_slot` as soon as it exists so the
    /// finalizer sees it even if this future is dropped.
    async fn pipeline(
        &self,
        handle_slot: &mut Option<SandboxHandle>,
        outcome: &mut RunOutcome,
        sink: &mut dyn OutputSink,
    ) -> Result<(), RunError> {
        let provider = self.provider.as_ref();
        let plan = &self.plan;

        let handle = match provision::provision(provider, &plan.sandbox).await {
            Ok(handle) => {
                outcome.sandbox_id = Some(handle.to_string());
                outcome.provisioned = true;
                &*handle_slot.insert(handle)
            }
            Err(e) => {
                if let Some(orphan) = e.orphan {
                    tracing::warn!(sandbox = %orphan, "create failed after issuing an identifier");
                    outcome.sandbox_id = Some(orphan.to_string());
                    *handle_slot = Some(orphan);
                }
                return Err(RunError::Provision(e.message));
            }
        };

        readiness::await_ready(provider, handle, plan.readiness).await?;
        outcome.ready = true;

        health::verify_health(provider, handle, &plan.health).await?;
        outcome.healthy = true;

        match exposure::expose_ports(provider, handle, &plan.exposures).await {
            Ok(exposed) => outcome.ports_exposed = exposed,
            Err(e) => {
                tracing::warn!(error = %e, "continuing without port exposure");
                outcome.warn(&e);
            }
        }

        // A timed-out workflow may still have written partial results.
        let timed_out = match workflow::run_workflow(provider, handle, &plan.workflow, sink).await {
            Ok(result) => {
                outcome.workflow_exit_code = Some(result.exit_code);
                None
            }
            Err(e @ RunError::WorkflowTimeout(_)) => Some(e),
            Err(e) => return Err(e),
        };

        match results::collect_results(provider, handle, &plan.artifacts).await {
            Ok(report) => outcome.report = report,
            Err(e) if timed_out.is_some() => outcome.warn(&e),
            Err(e) => return Err(e),
        }

        match timed_out {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn finalize(&self, handle: Option<SandboxHandle>, outcome: &mut RunOutcome) {
        let Some(handle) = handle else {
            tracing::debug!("no sandbox was created, nothing to clean up");
            return;
        };

        if self.plan.skip_cleanup {
            tracing::warn!(sandbox = %handle, "cleanup skipped, sandbox left running");
            outcome.retained = Some(handle);
            return;
        }

        match cleanup::cleanup(self.provider.as_ref(), handle).await {
            Ok(()) => outcome.cleaned_up = true,
            Err(e) => {
                outcome.warn(&RunError::Cleanup {
                    handle: e.handle.to_string(),
                    message: e.source.to_string(),
                });
                outcome.retained = Some(e.handle);
            }
        }
    }
}
