//! release-domains - environment-locked releases with sfp
//!
//! ## Commands
//!
//! - `run`: lock the environment, authenticate, deploy the release
//!   candidates and report the changelog
//! - `cleanup`: release the lock taken by an earlier `run` (post step)
//!
//! Every `run` option can also be supplied through the workflow host's
//! `INPUT_<NAME>` variables.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn, Level};

use release_core::inputs::{DEFAULT_CHANGELOG_DIR, DEFAULT_SFP_BINARY};
use release_core::{
    run_cleanup, ChangelogReporter, CleanupOutcome, HandoffStore, HostContext, HostOutputs,
    HostStateStore, JsonFileStore, LockSettings, Orchestrator, ProcessRunner, RawInputs,
    ReleaseInputs, ReleaseServices, RunReport,
};
use release_remote::{CommentPublisher, HttpTransport, ReqwestTransport, TokenFetcher};

#[derive(Parser)]
#[command(name = "release-domains")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deploy domain release candidates with environment locking", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Keep lock state in this JSON file instead of the host's step state
    #[arg(long, global = true, env = "RELEASE_DOMAINS_STATE_FILE")]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lock, authenticate, deploy and report
    Run(RunArgs),

    /// Release a lock left by `run`
    Cleanup(CleanupArgs),
}

#[derive(Args)]
struct RunArgs {
    /// SFP server URL
    #[arg(long, env = "INPUT_SFP-SERVER-URL")]
    sfp_server_url: String,

    /// SFP server application token
    #[arg(long, env = "INPUT_SFP-SERVER-TOKEN", hide_env_values = true)]
    sfp_server_token: String,

    /// Target environment
    #[arg(long, env = "INPUT_ENVIRONMENT")]
    environment: String,

    /// domain:releaseCandidate pairs, comma-separated
    #[arg(long, env = "INPUT_RELEASE-CANDIDATES")]
    release_candidates: String,

    /// owner/repo (defaults to GITHUB_REPOSITORY)
    #[arg(long, env = "INPUT_REPOSITORY")]
    repository: Option<String>,

    #[arg(long, env = "INPUT_DEVHUB-ALIAS", default_value = "devhub")]
    devhub_alias: Option<String>,

    /// Deployment wait time in minutes [default: 120]
    #[arg(long, env = "INPUT_WAIT-TIME")]
    wait_time: Option<String>,

    #[arg(long, env = "INPUT_TAG")]
    tag: Option<String>,

    /// Packages to drop from the release definition, comma-separated
    #[arg(long, env = "INPUT_EXCLUDE-PACKAGES")]
    exclude_packages: Option<String>,

    /// name=version pairs, comma-separated
    #[arg(long, env = "INPUT_OVERRIDE-PACKAGES")]
    override_packages: Option<String>,

    /// Lock the environment for the duration of the release [default: true]
    #[arg(long, env = "INPUT_LOCK")]
    lock: Option<String>,

    /// Minutes to wait for the lock; 0 or less waits indefinitely [default: 120]
    #[arg(long, env = "INPUT_LOCK-TIMEOUT", allow_hyphen_values = true)]
    lock_timeout: Option<String>,

    /// Minutes the lock is held [default: 120]
    #[arg(long, env = "INPUT_LOCK-DURATION")]
    lock_duration: Option<String>,

    /// Validate the release without deploying [default: false]
    #[arg(long, env = "INPUT_DRY-RUN")]
    dry_run: Option<String>,

    /// Ask sfp to write changelog output [default: true]
    #[arg(long, env = "INPUT_GENERATE-CHANGELOG")]
    generate_changelog: Option<String>,

    /// Post the changelog as an issue comment [default: true]
    #[arg(long, env = "INPUT_UPDATE-ISSUE")]
    update_issue: Option<String>,

    /// Issue or pull request to comment on (detected when omitted)
    #[arg(long, env = "INPUT_ISSUE-NUMBER")]
    issue_number: Option<String>,

    #[arg(long, env = "INPUT_CHANGELOG-DIR", default_value = DEFAULT_CHANGELOG_DIR)]
    changelog_dir: Option<String>,

    #[arg(long, env = "INPUT_SFP-BINARY", default_value = DEFAULT_SFP_BINARY)]
    sfp_binary: Option<String>,
}

#[derive(Args)]
struct CleanupArgs {
    #[arg(long, env = "INPUT_SFP-BINARY", default_value = DEFAULT_SFP_BINARY)]
    sfp_binary: Option<String>,
}

/// Host inputs are always set, possibly to an empty string meaning "unset".
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn text_or(value: Option<String>, default: &str) -> String {
    non_empty(value).unwrap_or_else(|| default.to_string())
}

fn bool_or(value: Option<String>, name: &str, default: bool) -> Result<bool> {
    match non_empty(value) {
        None => Ok(default),
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => anyhow::bail!("{name} must be 'true' or 'false', got '{other}'"),
        },
    }
}

fn number_or<T: FromStr>(value: Option<String>, name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty(value) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} must be a number, got '{v}'")),
    }
}

impl RunArgs {
    fn into_raw(self) -> Result<RawInputs> {
        let issue_number = non_empty(self.issue_number)
            .map(|n| n.trim().parse::<u64>())
            .transpose()
            .context("issue-number must be a positive integer")?;
        let defaults = LockSettings::default();

        Ok(RawInputs {
            sfp_server_url: self.sfp_server_url,
            sfp_server_token: self.sfp_server_token,
            environment: self.environment,
            release_candidates: self.release_candidates,
            repository: non_empty(self.repository),
            devhub_alias: text_or(self.devhub_alias, "devhub"),
            wait_time_minutes: number_or(self.wait_time, "wait-time", 120)?,
            tag: non_empty(self.tag),
            exclude_packages: non_empty(self.exclude_packages),
            override_packages: non_empty(self.override_packages),
            lock: LockSettings {
                enabled: bool_or(self.lock, "lock", defaults.enabled)?,
                wait_timeout_minutes: number_or(
                    self.lock_timeout,
                    "lock-timeout",
                    defaults.wait_timeout_minutes,
                )?,
                duration_minutes: number_or(
                    self.lock_duration,
                    "lock-duration",
                    defaults.duration_minutes,
                )?,
            },
            dry_run: bool_or(self.dry_run, "dry-run", false)?,
            generate_changelog: bool_or(self.generate_changelog, "generate-changelog", true)?,
            update_issue: bool_or(self.update_issue, "update-issue", true)?,
            issue_number,
            changelog_dir: PathBuf::from(text_or(self.changelog_dir, DEFAULT_CHANGELOG_DIR)),
            sfp_binary: text_or(self.sfp_binary, DEFAULT_SFP_BINARY),
        })
    }
}

fn handoff_store(state_file: Option<&Path>) -> Arc<dyn HandoffStore> {
    match state_file {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(HostStateStore::from_env()),
    }
}

/// Mark the step failed in the host's log.
fn report_failure(message: &str) {
    error!("{message}");
    println!("::error::{message}");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    release_core::init_tracing(cli.json, level);

    let store = handoff_store(cli.state_file.as_deref());

    match cli.command {
        Commands::Run(args) => match cmd_run(args, store).await {
            Ok(report) if report.is_failure() => {
                report_failure("Release deployment failed");
                ExitCode::FAILURE
            }
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                report_failure(&format!("{e:#}"));
                ExitCode::FAILURE
            }
        },
        Commands::Cleanup(args) => {
            // Cleanup never fails the job.
            cmd_cleanup(args, store.as_ref()).await;
            ExitCode::SUCCESS
        }
    }
}

async fn cmd_run(args: RunArgs, store: Arc<dyn HandoffStore>) -> Result<RunReport> {
    let raw = args.into_raw()?;
    let inputs = ReleaseInputs::resolve(raw, &HostContext::from_env()).context("Invalid inputs")?;

    let mut services = ReleaseServices::new(
        Arc::new(ProcessRunner::new()),
        store,
        Arc::new(HostOutputs::from_env()),
    );
    if inputs.update_issue {
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new().context("Failed to build HTTP client")?);
        services = services.with_reporter(ChangelogReporter {
            tokens: TokenFetcher::new(transport.clone()),
            comments: CommentPublisher::new(transport),
        });
    }

    let report = Orchestrator::new(inputs, services).run().await?;
    for advisory in &report.advisories {
        warn!("{advisory}");
    }
    info!(status = %report.status, "Release finished");
    Ok(report)
}

async fn cmd_cleanup(args: CleanupArgs, store: &dyn HandoffStore) -> CleanupOutcome {
    let sfp_binary = text_or(args.sfp_binary, DEFAULT_SFP_BINARY);
    let outcome = run_cleanup(&ProcessRunner::new(), store, &sfp_binary).await;
    info!(outcome = ?outcome, "Cleanup finished");
    outcome
}
