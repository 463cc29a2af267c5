use super::error::RunError;
use crate::report::{self, WorkflowReport};
use crate::sandbox::{SandboxHandle, SandboxProvider};

/// Fetch and parse the workflow's results file.
///
/// Paths are tried in order and the first one that exists is parsed; the
/// rest are fallbacks. No artifact at all is `Ok(None)`. A present but
/// unparsable artifact is an error, with no fallback to later paths.
pub async fn collect_results(
    provider: &dyn SandboxProvider,
    handle: &SandboxHandle,
    paths: &[String],
) -> Result<Option<WorkflowReport>, RunError> {
    for path in paths {
        let bytes = match provider.read_file(handle, path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(sandbox = %handle, path = %path, "result artifact not present");
                continue;
            }
            Err(e) => {
                tracing::warn!(sandbox = %handle, path = %path, error = %e, "could not read result artifact");
                continue;
            }
        };

        let report = report::parse_report(&bytes).map_err(|source| RunError::ResultParse {
            path: path.clone(),
            source,
        })?;
        tracing::info!(sandbox = %handle, path = %path, summary = %report.summary(), "results collected");
        return Ok(Some(report));
    }

    tracing::info!(sandbox = %handle, "no result artifact produced");
    Ok(None)
}
