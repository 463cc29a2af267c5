use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::report::ReportParseError;

/// Failure taxonomy of one orchestration run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("provisioning failed: {0}")]
    Provision(String),

    #[error("sandbox entered the Failed state")]
    SandboxFailed,

    #[error("sandbox not available after {attempts} inspections")]
    ReadinessTimeout { attempts: u32 },

    #[error("health check failed after {attempts} attempts: {last}")]
    HealthCheck { attempts: u32, last: String },

    #[error("port exposure failed: {0}")]
    Exposure(String),

    #[error("workflow timed out after {}s", .0.as_secs())]
    WorkflowTimeout(Duration),

    #[error("workflow execution failed: {0}")]
    Execution(String),

    #[error("result artifact {path} is unreadable: {source}")]
    ResultParse {
        path: String,
        #[source]
        source: ReportParseError,
    },

    #[error("cleanup of {handle} failed: {message}")]
    Cleanup { handle: String, message: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("run exceeded its {}s time limit", .0.as_secs())]
    RunTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Provision,
    SandboxFailed,
    ReadinessTimeout,
    HealthCheck,
    Exposure,
    WorkflowTimeout,
    Execution,
    ResultParse,
    Cleanup,
    Cancelled,
    RunTimeout,
}

/// Serializable record of a `RunError` as it lands on the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provision(_) => ErrorKind::Provision,
            Self::SandboxFailed => ErrorKind::SandboxFailed,
            Self::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
            Self::HealthCheck { .. } => ErrorKind::HealthCheck,
            Self::Exposure(_) => ErrorKind::Exposure,
            Self::WorkflowTimeout(_) => ErrorKind::WorkflowTimeout,
            Self::Execution(_) => ErrorKind::Execution,
            Self::ResultParse { .. } => ErrorKind::ResultParse,
            Self::Cleanup { .. } => ErrorKind::Cleanup,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::RunTimeout(_) => ErrorKind::RunTimeout,
        }
    }

    pub fn to_failure(&self) -> RunFailure {
        RunFailure {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ReadinessTimeout).unwrap();
        assert_eq!(json, "\"readiness_timeout\"");
        let json = serde_json::to_string(&ErrorKind::RunTimeout).unwrap();
        assert_eq!(json, "\"run_timeout\"");
    }

    #[test]
    fn failure_carries_kind_and_message() {
        let failure = RunError::ReadinessTimeout { attempts: 3 }.to_failure();
        assert_eq!(failure.kind, ErrorKind::ReadinessTimeout);
        assert_eq!(failure.message, "sandbox not available after 3 inspections");
    }

    #[test]
    fn timeouts_display_in_seconds() {
        let err = RunError::WorkflowTimeout(Duration::from_secs(900));
        assert_eq!(err.to_string(), "workflow timed out after 900s");
    }

    #[test]
    fn result_parse_keeps_source() {
        let source = crate::report::parse_report(b"not json").unwrap_err();
        let err = RunError::ResultParse {
            path: "qa-smoke-results.json".into(),
            source,
        };
        assert_eq!(err.kind(), ErrorKind::ResultParse);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("result artifact qa-smoke-results.json is unreadable"));
    }
}
