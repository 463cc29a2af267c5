use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::sandbox::{
    CodespaceConfig, LocalHostConfig, PortExposure, PortVisibility, SandboxBackendKind,
    SandboxRuntimeConfig,
};

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: SandboxBackendKind,
    pub codespace_repo: Option<String>,
    pub codespace_branch: Option<String>,
    pub codespace_machine: Option<String>,
    pub gh_bin: String,
    pub local_root: PathBuf,
    pub sentry_dsn: Option<String>,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_raw_values(RawValues {
            backend: std::env::var("SANDBOX_BACKEND").ok().as_deref(),
            codespace_repo: std::env::var("CODESPACE_REPO").ok().as_deref(),
            codespace_branch: std::env::var("CODESPACE_BRANCH").ok().as_deref(),
            codespace_machine: std::env::var("CODESPACE_MACHINE").ok().as_deref(),
            gh_bin: std::env::var("GH_BIN").ok().as_deref(),
            local_root: std::env::var("LOCAL_SANDBOX_ROOT").ok().as_deref(),
            sentry_dsn: std::env::var("SENTRY_DSN").ok().as_deref(),
            environment: std::env::var("ENVIRONMENT").ok().as_deref(),
        })
    }

    /// Build a Config from raw string values (as they would come from env vars).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_raw_values(raw: RawValues<'_>) -> Self {
        let non_empty = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(String::from);

        let backend = raw
            .backend
            .and_then(parse_backend)
            .unwrap_or(SandboxBackendKind::Codespace);

        let local_root = non_empty(raw.local_root)
            .map(PathBuf::from)
            .unwrap_or_else(default_local_root);

        Config {
            backend,
            codespace_repo: non_empty(raw.codespace_repo),
            codespace_branch: non_empty(raw.codespace_branch),
            codespace_machine: non_empty(raw.codespace_machine),
            gh_bin: non_empty(raw.gh_bin).unwrap_or_else(|| "gh".to_string()),
            local_root,
            sentry_dsn: non_empty(raw.sentry_dsn),
            environment: non_empty(raw.environment).unwrap_or_else(|| "local".to_string()),
        }
    }

    pub fn runtime_config(&self) -> SandboxRuntimeConfig {
        match self.backend {
            SandboxBackendKind::LocalHost => SandboxRuntimeConfig::LocalHost(LocalHostConfig {
                root_dir: self.local_root.clone(),
                ..LocalHostConfig::default()
            }),
            _ => SandboxRuntimeConfig::Codespace(CodespaceConfig {
                gh_bin: self.gh_bin.clone(),
                ..CodespaceConfig::default()
            }),
        }
    }
}

/// Unparsed environment values, one per variable.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawValues<'a> {
    pub backend: Option<&'a str>,
    pub codespace_repo: Option<&'a str>,
    pub codespace_branch: Option<&'a str>,
    pub codespace_machine: Option<&'a str>,
    pub gh_bin: Option<&'a str>,
    pub local_root: Option<&'a str>,
    pub sentry_dsn: Option<&'a str>,
    pub environment: Option<&'a str>,
}

pub fn parse_backend(value: &str) -> Option<SandboxBackendKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "codespace" | "codespaces" => Some(SandboxBackendKind::Codespace),
        "local" | "local-host" | "localhost" => Some(SandboxBackendKind::LocalHost),
        _ => None,
    }
}

/// Home-relative state directory: `~/.sandbox-smoke`.
pub fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sandbox-smoke")
}

fn default_local_root() -> PathBuf {
    state_dir().join("sandboxes")
}

// --- Run profile (YAML) ---

/// What one orchestration run does inside the sandbox. Every field has a
/// default matching the bundled QA smoke-test workload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunProfile {
    pub sandbox: SandboxSection,
    pub readiness: ReadinessSection,
    pub health: HealthSection,
    pub exposure: ExposureSection,
    pub workflow: WorkflowSection,
    pub results: ResultsSection,
    pub run_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxSection {
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub machine: Option<String>,
    pub display_name: Option<String>,
    pub idle_timeout_minutes: Option<u64>,
    pub retention_minutes: Option<u64>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            repo: None,
            branch: None,
            machine: None,
            display_name: None,
            idle_timeout_minutes: Some(30),
            retention_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessSection {
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for ReadinessSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            max_attempts: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthSection {
    pub command: String,
    pub marker: String,
    pub attempts: u32,
    pub delay_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            command: "curl -s http://localhost:8000/api/health".into(),
            marker: "healthy".into(),
            attempts: 5,
            delay_secs: 10,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExposureSection {
    pub ports: Vec<u16>,
    pub visibility: PortVisibility,
}

impl Default for ExposureSection {
    fn default() -> Self {
        Self {
            ports: vec![8000, 3000],
            visibility: PortVisibility::Public,
        }
    }
}

impl ExposureSection {
    pub fn exposures(&self) -> Vec<PortExposure> {
        self.ports
            .iter()
            .map(|&port| PortExposure {
                port,
                visibility: self.visibility,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowSection {
    pub command: String,
    pub cwd: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            command: "python3 scripts/qa-smoke-test.py".into(),
            cwd: None,
            timeout_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResultsSection {
    pub artifacts: Vec<String>,
}

impl Default for ResultsSection {
    fn default() -> Self {
        Self {
            artifacts: vec!["qa-smoke-results.json".into()],
        }
    }
}

impl RunProfile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read run profile: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        // An empty file means "all defaults".
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let profile: Self = serde_yaml::from_str(content)?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.readiness.max_attempts > 0,
            "readiness.max_attempts must be at least 1"
        );
        anyhow::ensure!(self.health.attempts > 0, "health.attempts must be at least 1");
        Ok(())
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}
