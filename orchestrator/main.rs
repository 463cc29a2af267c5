mod config;
mod pipeline;
mod report;
mod sandbox;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, RunProfile};
use crate::pipeline::outcome::ORCHESTRATOR_FAILURE_EXIT;
use crate::pipeline::{ConsoleSink, Orchestrator, RunOutcome, RunPlan, Verdict};
use crate::sandbox::{SandboxBackendKind, SandboxHandle, SandboxProvider};

#[derive(Parser)]
#[command(name = "sandbox-smoke", about = "Run a smoke-test workflow in a disposable sandbox")]
enum Cli {
    /// Provision a sandbox, run the workflow in it, and tear it down
    Run {
        /// Run profile (YAML). Defaults apply to anything left out.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Sandbox backend: codespace or local
        #[arg(long, value_parser = parse_backend_arg)]
        backend: Option<SandboxBackendKind>,
        /// Machine type for the sandbox
        #[arg(long)]
        tier: Option<String>,
        /// Repository to create the sandbox from (OWNER/REPO)
        #[arg(long)]
        repo: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        /// Leave the sandbox running after the run
        #[arg(long)]
        skip_cleanup: bool,
        /// Where to write the run outcome JSON
        #[arg(long)]
        outcome_path: Option<PathBuf>,
    },
    /// Delete a sandbox left behind by an earlier run
    Destroy {
        sandbox_id: String,
        #[arg(long, value_parser = parse_backend_arg)]
        backend: Option<SandboxBackendKind>,
    },
}

fn parse_backend_arg(value: &str) -> Result<SandboxBackendKind, String> {
    config::parse_backend(value).ok_or_else(|| format!("unknown backend '{value}' (expected codespace or local)"))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();
    let mut config = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sandbox_smoke=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_writer(std::io::stderr)
                .with_targets(false)
                .with_bracketed_fields(true),
        )
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            enable_logs: true,
            ..Default::default()
        },
    ));

    let result = match cli {
        Cli::Run {
            config: profile_path,
            backend,
            tier,
            repo,
            branch,
            skip_cleanup,
            outcome_path,
        } => {
            if let Some(backend) = backend {
                config.backend = backend;
            }
            let overrides = RunOverrides {
                tier,
                repo,
                branch,
                skip_cleanup,
            };
            run(&config, profile_path.as_deref(), overrides, outcome_path).await
        }
        Cli::Destroy { sandbox_id, backend } => {
            if let Some(backend) = backend {
                config.backend = backend;
            }
            destroy(&config, &sandbox_id).await.map(|()| 0)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "sandbox-smoke failed");
            ExitCode::from(ORCHESTRATOR_FAILURE_EXIT)
        }
    }
}

/// CLI flags that win over both the run profile and the environment.
struct RunOverrides {
    tier: Option<String>,
    repo: Option<String>,
    branch: Option<String>,
    skip_cleanup: bool,
}

fn build_plan(config: &Config, profile: &RunProfile, overrides: RunOverrides) -> RunPlan {
    let mut plan = RunPlan::from(profile);
    let sandbox = &mut plan.sandbox;

    // Precedence: flag, then profile, then environment.
    sandbox.repo = overrides
        .repo
        .or(sandbox.repo.take())
        .or_else(|| config.codespace_repo.clone());
    sandbox.branch = overrides
        .branch
        .or(sandbox.branch.take())
        .or_else(|| config.codespace_branch.clone());
    if let Some(tier) = overrides
        .tier
        .or_else(|| profile.sandbox.machine.clone())
        .or_else(|| config.codespace_machine.clone())
    {
        sandbox.tier = tier;
    }
    plan.skip_cleanup = overrides.skip_cleanup;
    plan
}

async fn run(
    config: &Config,
    profile_path: Option<&Path>,
    overrides: RunOverrides,
    outcome_path: Option<PathBuf>,
) -> Result<u8> {
    let profile = match profile_path {
        Some(path) => RunProfile::load(path)?,
        None => RunProfile::default(),
    };
    let plan = build_plan(config, &profile, overrides);
    let provider: Arc<dyn SandboxProvider> = sandbox::build_provider(config.runtime_config())
        .context("failed to initialize sandbox provider")?
        .into();

    let orchestrator = Orchestrator::new(provider, plan);
    let mut sink = ConsoleSink::new();
    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available: never cancel.
            std::future::pending::<()>().await;
        }
    };
    let outcome = orchestrator.run(&mut sink, cancel).await;

    let path = outcome_path.unwrap_or_else(|| default_outcome_path(&outcome));
    write_outcome(&path, &outcome)?;
    report_outcome(&outcome, &path);

    Ok(outcome.process_exit_code())
}

async fn destroy(config: &Config, sandbox_id: &str) -> Result<()> {
    let handle = SandboxHandle::parse(sandbox_id)
        .with_context(|| format!("invalid sandbox id: {sandbox_id:?}"))?;
    let provider = sandbox::build_provider(config.runtime_config())
        .context("failed to initialize sandbox provider")?;
    pipeline::cleanup::cleanup(provider.as_ref(), handle)
        .await
        .context("destroy failed")?;
    Ok(())
}

fn default_outcome_path(outcome: &RunOutcome) -> PathBuf {
    config::state_dir()
        .join("runs")
        .join(format!("{}.json", outcome.run_id))
}

fn write_outcome(path: &Path, outcome: &RunOutcome) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(outcome).context("failed to serialize run outcome")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write run outcome to {}", path.display()))?;
    Ok(())
}

fn report_outcome(outcome: &RunOutcome, path: &Path) {
    let summary = outcome
        .report
        .as_ref()
        .map(|r| r.summary())
        .unwrap_or_else(|| "no report".to_string());

    match outcome.verdict() {
        Verdict::Passed => {
            tracing::info!(%summary, outcome = %path.display(), "✓ smoke test passed")
        }
        verdict => {
            let error = outcome.error.as_ref().map(|e| e.message.as_str()).unwrap_or("");
            tracing::error!(?verdict, %summary, error, outcome = %path.display(), "✗ smoke test did not pass")
        }
    }

    if let Some(handle) = &outcome.retained {
        tracing::warn!(
            sandbox = %handle,
            "sandbox still running; remove it with `sandbox-smoke destroy {handle}`"
        );
    }
}
