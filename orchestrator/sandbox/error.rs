use std::io;

/// Errors from provider calls.
///
/// Backends map their internal failures into these variants; the
/// pipeline decides which of them are fatal.
#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("sandbox not found: {0}")]
    NotFound(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("command failed: code={code:?}, stderr={stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl ProviderError {
    /// Build a `CommandFailed` from raw process output, trimming stderr.
    pub fn command_failed(code: Option<i32>, stderr: &[u8]) -> Self {
        ProviderError::CommandFailed {
            code,
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_displays_id() {
        let err = ProviderError::NotFound("smoke-abc123".into());
        assert_eq!(err.to_string(), "sandbox not found: smoke-abc123");
    }

    #[test]
    fn command_failed_trims_stderr() {
        let err = ProviderError::command_failed(Some(1), b"  no such codespace\n");
        assert_eq!(
            err.to_string(),
            "command failed: code=Some(1), stderr=no such codespace"
        );
    }

    #[test]
    fn command_failed_with_no_code() {
        let err = ProviderError::command_failed(None, b"killed");
        assert!(err.to_string().contains("code=None"));
    }

    #[test]
    fn spawn_error_names_program() {
        let err = ProviderError::Spawn {
            program: "gh".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "not on PATH"),
        };
        assert_eq!(err.to_string(), "failed to spawn gh: not on PATH");
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: ProviderError = io_err.into();
        assert!(matches!(err, ProviderError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProviderError>();
    }
}
