use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::{ErrorKind, RunError, RunFailure};
use crate::report::WorkflowReport;
use crate::sandbox::{SandboxBackendKind, SandboxHandle};

/// Process exit code for runs whose workflow never reported a code.
/// Workflow codes are only mirrored below it, so it never means
/// "the workflow exited 125".
pub const ORCHESTRATOR_FAILURE_EXIT: u8 = 125;

/// Process exit code for a workflow code outside `0..ORCHESTRATOR_FAILURE_EXIT`.
/// The exact code is still in `RunOutcome::workflow_exit_code`.
pub const UNMIRRORED_WORKFLOW_EXIT: u8 = 126;

/// Terminal record of one orchestration run, filled in stage by stage.
#[derive(Debug, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub backend: SandboxBackendKind,
    /// Identifier of the sandbox this run created, if any.
    pub sandbox_id: Option<String>,
    /// Set when the sandbox still exists after the run: cleanup was
    /// skipped on request or failed.
    pub retained: Option<SandboxHandle>,
    pub provisioned: bool,
    pub ready: bool,
    pub healthy: bool,
    pub ports_exposed: bool,
    pub workflow_exit_code: Option<i32>,
    pub report: Option<WorkflowReport>,
    pub cleaned_up: bool,
    pub error: Option<RunFailure>,
    pub warnings: Vec<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// How a caller should read a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    WorkflowFailed,
    WorkflowInfraError,
    UnrecognizedExit(i32),
    /// Workflow passed but its results file could not be parsed.
    ReportUnreadable,
    WorkflowTimedOut,
    /// Sandbox never got to the point of running the workflow.
    InfrastructureFailed,
    Interrupted,
}

impl RunOutcome {
    pub fn new(run_id: String, backend: SandboxBackendKind) -> Self {
        Self {
            run_id,
            backend,
            sandbox_id: None,
            retained: None,
            provisioned: false,
            ready: false,
            healthy: false,
            ports_exposed: false,
            workflow_exit_code: None,
            report: None,
            cleaned_up: false,
            error: None,
            warnings: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Record the run's primary failure. Later failures become warnings.
    pub fn fail(&mut self, err: &RunError) {
        if self.error.is_none() {
            self.error = Some(err.to_failure());
        } else {
            self.warn(err);
        }
    }

    pub fn warn(&mut self, err: &RunError) {
        self.warnings.push(err.to_failure());
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|f| f.kind)
    }

    pub fn verdict(&self) -> Verdict {
        match self.error_kind() {
            Some(ErrorKind::Cancelled | ErrorKind::RunTimeout) => return Verdict::Interrupted,
            Some(ErrorKind::WorkflowTimeout) => return Verdict::WorkflowTimedOut,
            _ => {}
        }
        match self.workflow_exit_code {
            Some(0) if self.error_kind() == Some(ErrorKind::ResultParse) => {
                Verdict::ReportUnreadable
            }
            Some(0) => Verdict::Passed,
            Some(1) => Verdict::WorkflowFailed,
            Some(2) => Verdict::WorkflowInfraError,
            Some(code) => Verdict::UnrecognizedExit(code),
            None => Verdict::InfrastructureFailed,
        }
    }

    /// Exit code for the CLI: the workflow's own code when it is below
    /// `ORCHESTRATOR_FAILURE_EXIT`, `UNMIRRORED_WORKFLOW_EXIT` for any other
    /// workflow code, `ORCHESTRATOR_FAILURE_EXIT` when there is none.
    pub fn process_exit_code(&self) -> u8 {
        match self.workflow_exit_code {
            Some(code) => u8::try_from(code)
                .ok()
                .filter(|&code| code < ORCHESTRATOR_FAILURE_EXIT)
                .unwrap_or(UNMIRRORED_WORKFLOW_EXIT),
            None => ORCHESTRATOR_FAILURE_EXIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> RunOutcome {
        RunOutcome::new("run-1".into(), SandboxBackendKind::Codespace)
    }

    #[test]
    fn verdict_follows_exit_code() {
        let mut o = outcome();
        for (code, verdict) in [
            (0, Verdict::Passed),
            (1, Verdict::WorkflowFailed),
            (2, Verdict::WorkflowInfraError),
            (7, Verdict::UnrecognizedExit(7)),
        ] {
            o.workflow_exit_code = Some(code);
            assert_eq!(o.verdict(), verdict);
        }
    }

    #[test]
    fn verdict_distinguishes_infra_from_unreadable_report() {
        let mut o = outcome();
        o.fail(&RunError::ReadinessTimeout { attempts: 30 });
        assert_eq!(o.verdict(), Verdict::InfrastructureFailed);

        let mut o = outcome();
        o.workflow_exit_code = Some(0);
        o.fail(&RunError::ResultParse {
            path: "r.json".into(),
            source: crate::report::parse_report(b"{").unwrap_err(),
        });
        assert_eq!(o.verdict(), Verdict::ReportUnreadable);
    }

    #[test]
    fn interruption_wins_over_exit_code() {
        let mut o = outcome();
        o.workflow_exit_code = Some(0);
        o.fail(&RunError::Cancelled);
        assert_eq!(o.verdict(), Verdict::Interrupted);
    }

    #[test]
    fn first_failure_is_primary() {
        let mut o = outcome();
        o.fail(&RunError::WorkflowTimeout(std::time::Duration::from_secs(1)));
        o.fail(&RunError::Cancelled);
        assert_eq!(o.error_kind(), Some(ErrorKind::WorkflowTimeout));
        assert_eq!(o.warnings.len(), 1);
        assert_eq!(o.verdict(), Verdict::WorkflowTimedOut);
    }

    #[test]
    fn exit_code_mirrors_workflow_when_representable() {
        let mut o = outcome();
        assert_eq!(o.process_exit_code(), ORCHESTRATOR_FAILURE_EXIT);
        o.workflow_exit_code = Some(2);
        assert_eq!(o.process_exit_code(), 2);
        o.workflow_exit_code = Some(3);
        assert_eq!(o.process_exit_code(), 3);
        o.workflow_exit_code = Some(124);
        assert_eq!(o.process_exit_code(), 124);
    }

    #[test]
    fn workflow_codes_never_collide_with_orchestrator_failure() {
        let mut o = outcome();
        for code in [-1, 125, 126, 137, 255, 300] {
            o.workflow_exit_code = Some(code);
            assert_eq!(o.process_exit_code(), UNMIRRORED_WORKFLOW_EXIT, "code {code}");
        }
        for code in 0..125 {
            o.workflow_exit_code = Some(code);
            assert_ne!(o.process_exit_code(), ORCHESTRATOR_FAILURE_EXIT);
        }
    }

    #[test]
    fn serializes_to_json() {
        let mut o = outcome();
        o.sandbox_id = Some("sbx-1".into());
        o.retained = SandboxHandle::parse("sbx-1");
        o.fail(&RunError::Cleanup {
            handle: "sbx-1".into(),
            message: "boom".into(),
        });
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["backend"], "codespace");
        assert_eq!(json["retained"], "sbx-1");
        assert_eq!(json["error"]["kind"], "cleanup");
        assert!(json["finished_at"].is_null());
    }
}
