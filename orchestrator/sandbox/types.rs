use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Backend kind ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxBackendKind {
    Codespace,
    #[serde(rename = "local")]
    LocalHost,
    #[cfg(test)]
    Scripted,
}

impl SandboxBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Codespace => "codespace",
            Self::LocalHost => "local",
            #[cfg(test)]
            Self::Scripted => "scripted",
        }
    }
}

impl fmt::Display for SandboxBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Provider info ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SandboxProviderInfo {
    pub kind: SandboxBackendKind,
    pub supports_port_exposure: bool,
}

// ── Sandbox spec (input to create) ──────────────────────────────────

#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Prefix for locally generated sandbox names.
    pub name_prefix: String,
    /// Provisioning tier (codespace machine type).
    pub tier: String,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub display_name: Option<String>,
    pub idle_timeout: Option<Duration>,
    pub retention: Option<Duration>,
}

impl Default for SandboxSpec {
    fn default() -> Self {
        Self {
            name_prefix: "smoke".into(),
            tier: "basicLinux32gb".into(),
            repo: None,
            branch: None,
            display_name: None,
            idle_timeout: None,
            retention: None,
        }
    }
}

// ── Sandbox handle ──────────────────────────────────────────────────

/// Identifier of a live sandbox, owned by the run that created it.
///
/// Deliberately not `Clone`: the cleanup stage consumes the handle, so a
/// sandbox that was deleted successfully cannot be addressed again.
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SandboxHandle(String);

impl SandboxHandle {
    pub const MAX_LEN: usize = 128;

    /// Accept a provider-issued identifier: one token, no whitespace or
    /// control characters, at most `MAX_LEN` bytes.
    pub fn parse(raw: &str) -> Option<Self> {
        let id = raw.trim();
        if id.is_empty()
            || id.len() > Self::MAX_LEN
            || id.chars().any(|c| c.is_whitespace() || c.is_control())
        {
            return None;
        }
        Some(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Sandbox state ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Creating,
    Available,
    Failed,
    Unknown,
}

impl SandboxState {
    /// Interpret a raw inspection response.
    ///
    /// Accepts either a JSON object with a `state` field (what
    /// `gh codespace view --json state` prints) or the bare state name.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let name = match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(serde_json::Value::String(state)) => state,
            Ok(value) => match value.get("state").and_then(|v| v.as_str()) {
                Some(state) => state.to_string(),
                None => return SandboxState::Unknown,
            },
            Err(_) => trimmed.to_string(),
        };

        match name.to_ascii_lowercase().as_str() {
            "available" => SandboxState::Available,
            "failed" => SandboxState::Failed,
            "created" | "queued" | "provisioning" | "starting" | "awaiting" | "rebuilding"
            | "updating" => SandboxState::Creating,
            _ => SandboxState::Unknown,
        }
    }
}

// ── Exec model ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Shell command, run by `bash -lc` inside the sandbox.
    pub command: String,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl ExecRequest {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn with_cwd(mut self, cwd: Option<String>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Output of one remote-command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Process exit code; `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit { code: i32 },
}

// ── Port exposure ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortVisibility {
    Private,
    Org,
    Public,
}

impl PortVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Org => "org",
            Self::Public => "public",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortExposure {
    pub port: u16,
    pub visibility: PortVisibility,
}

// ── Backend configs ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CodespaceConfig {
    /// Path or name of the GitHub CLI binary.
    pub gh_bin: String,
    /// Host variables passed through to `gh` (credentials, config dirs).
    pub env_allowlist: Vec<String>,
    /// Upper bound for short provider calls (create excluded).
    pub command_timeout: Duration,
    /// Upper bound for `gh codespace create`.
    pub create_timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for CodespaceConfig {
    fn default() -> Self {
        Self {
            gh_bin: "gh".into(),
            env_allowlist: [
                "PATH",
                "HOME",
                "GH_TOKEN",
                "GITHUB_TOKEN",
                "GH_HOST",
                "GH_CONFIG_DIR",
                "XDG_CONFIG_HOME",
                "SSH_AUTH_SOCK",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            command_timeout: Duration::from_secs(60),
            create_timeout: Duration::from_secs(10 * 60),
            max_output_bytes: 10 * 1024 * 1024, // 10 MB
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalHostConfig {
    pub root_dir: PathBuf,
    pub inherit_env_allowlist: Vec<String>,
    pub max_output_bytes: usize,
}

impl Default for LocalHostConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(""), // must be set by caller
            inherit_env_allowlist: vec!["PATH".into(), "HOME".into(), "LANG".into(), "TERM".into()],
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

// ── Runtime config selector ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum SandboxRuntimeConfig {
    Codespace(CodespaceConfig),
    LocalHost(LocalHostConfig),
}

// ── Tests ───────────────────────────────────────────────────────────
