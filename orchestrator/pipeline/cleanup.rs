use crate::sandbox::{ProviderError, SandboxHandle, SandboxProvider};

/// Delete failed; the handle comes back so the caller can retain it.
#[derive(Debug, thiserror::Error)]
#[error("failed to delete sandbox {handle}: {source}")]
pub struct CleanupError {
    pub handle: SandboxHandle,
    #[source]
    pub source: ProviderError,
}

/// Delete the sandbox. Consumes the handle: once this returns `Ok` the
/// sandbox can no longer be addressed.
pub async fn cleanup(
    provider: &dyn SandboxProvider,
    handle: SandboxHandle,
) -> Result<(), CleanupError> {
    tracing::info!(sandbox = %handle, "deleting sandbox");
    match provider.delete(&handle).await {
        Ok(()) => {
            tracing::info!(sandbox = %handle, "✓ sandbox deleted");
            Ok(())
        }
        Err(source) => {
            tracing::error!(sandbox = %handle, error = %source, "✗ sandbox delete failed, retaining handle");
            Err(CleanupError { handle, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::scripted::{Call, ScriptedProvider};

    #[tokio::test]
    async fn deletes_sandbox() {
        let provider = ScriptedProvider::new();
        cleanup(&provider, SandboxHandle::parse("sbx-0").unwrap())
            .await
            .unwrap();
        assert_eq!(provider.calls(), vec![Call::Delete("sbx-0".into())]);
    }

    #[tokio::test]
    async fn failure_returns_handle() {
        let provider = ScriptedProvider::new().with_delete_error("HTTP 502");
        let err = cleanup(&provider, SandboxHandle::parse("sbx-0").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.handle.as_str(), "sbx-0");
        assert!(err.to_string().contains("HTTP 502"));
    }
}
