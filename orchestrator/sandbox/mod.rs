pub mod backends;
pub mod error;
pub mod process;
pub mod provider;
pub mod types;

#[cfg(test)]
pub mod scripted;

pub use error::ProviderError;
pub use provider::SandboxProvider;
pub use types::*;

use backends::codespace::CodespaceProvider;
use backends::local_host::LocalHostProvider;

/// Build a sandbox provider from runtime config.
pub fn build_provider(
    config: SandboxRuntimeConfig,
) -> Result<Box<dyn SandboxProvider>, ProviderError> {
    match config {
        SandboxRuntimeConfig::Codespace(c) => {
            tracing::info!(gh = %c.gh_bin, "initializing Codespace sandbox provider");
            Ok(Box::new(CodespaceProvider::new(c)))
        }
        SandboxRuntimeConfig::LocalHost(c) => {
            tracing::info!(
                root_dir = %c.root_dir.display(),
                "initializing LocalHost sandbox provider"
            );
            Ok(Box::new(LocalHostProvider::new(c)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_local_provider() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = build_provider(SandboxRuntimeConfig::LocalHost(LocalHostConfig {
            root_dir: tmp.path().join("boxes"),
            ..LocalHostConfig::default()
        }))
        .unwrap();
        assert_eq!(provider.info().kind, SandboxBackendKind::LocalHost);
        assert!(tmp.path().join("boxes").is_dir());
    }

    #[test]
    fn builds_codespace_provider() {
        let provider =
            build_provider(SandboxRuntimeConfig::Codespace(CodespaceConfig::default())).unwrap();
        assert_eq!(provider.info().kind, SandboxBackendKind::Codespace);
        assert!(provider.info().supports_port_exposure);
    }
}
