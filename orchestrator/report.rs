//! Typed view of the results file the smoke-test workflow leaves behind.
//!
//! Shape (every field optional):
//!
//! ```json
//! { "timestamp": "...",
//!   "auth": { "success": true, "email": "...", "error": "...", "token_verified": true },
//!   "browser_smoke_test": { "overall": "pass", "screenshotUrls": ["..."],
//!                           "tests": [{ "feature": "...", "status": "pass", "notes": "..." }],
//!                           "critical_issues": ["..."] },
//!   "exit_code": 0 }
//! ```

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthOutcome>,
    #[serde(default, rename = "browser_smoke_test")]
    pub browser: Option<BrowserOutcome>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthOutcome {
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub token_verified: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserOutcome {
    #[serde(default, deserialize_with = "null_as_default")]
    pub overall: BrowserVerdict,
    #[serde(default, rename = "screenshotUrls", deserialize_with = "null_as_default")]
    pub screenshot_urls: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tests: Vec<FeatureCheck>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub critical_issues: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub service_reachable: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCheck {
    #[serde(default, deserialize_with = "null_as_default")]
    pub feature: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Overall result of the in-sandbox browser verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserVerdict {
    Pass,
    Partial,
    Fail,
    Error,
    Skipped,
    NotApplicable,
    #[default]
    #[serde(other)]
    Unknown,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Why a present artifact could not be turned into a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// Parse a results document. Missing fields are tolerated; malformed JSON
/// or a document that is not an object is an error.
pub fn parse_report(bytes: &[u8]) -> Result<WorkflowReport, ReportParseError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let kind = match &value {
        serde_json::Value::Object(_) => None,
        serde_json::Value::Null => Some("null"),
        serde_json::Value::Bool(_) => Some("a boolean"),
        serde_json::Value::Number(_) => Some("a number"),
        serde_json::Value::String(_) => Some("a string"),
        serde_json::Value::Array(_) => Some("an array"),
    };
    if let Some(kind) = kind {
        return Err(ReportParseError::NotAnObject(kind));
    }
    Ok(serde_json::from_value(value)?)
}

impl WorkflowReport {
    pub fn auth_succeeded(&self) -> Option<bool> {
        self.auth.as_ref().map(|a| a.success)
    }

    pub fn browser_verdict(&self) -> Option<BrowserVerdict> {
        self.browser.as_ref().map(|b| b.overall)
    }

    /// One-line summary for logs: `auth=pass browser=partial screenshots=2`.
    pub fn summary(&self) -> String {
        let auth = match self.auth_succeeded() {
            Some(true) => "pass",
            Some(false) => "fail",
            None => "none",
        };
        let browser = self
            .browser_verdict()
            .map(|v| {
                serde_json::to_value(v)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default()
            })
            .unwrap_or_else(|| "none".to_string());
        let screenshots = self
            .browser
            .as_ref()
            .map(|b| b.screenshot_urls.len())
            .unwrap_or(0);
        format!("auth={auth} browser={browser} screenshots={screenshots}")
    }
}
