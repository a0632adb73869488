//! Main-phase release state machine.
//!
//! A run takes one of two branches:
//!
//! - **dry run**: authenticate, optionally edit the definition, deploy with
//!   `--dryrun`, report the changelog. Never marks the run failed on a
//!   deploy failure.
//! - **normal**: optionally lock the environment (persisting the handoff for
//!   cleanup), authenticate, optionally edit the definition, deploy, report
//!   the changelog. A failed deploy yields a report with status `failed`.
//!
//! Everything up to and including the deploy is on the required channel:
//! errors end the run. Changelog and comment work after the deploy is
//! advisory and lands in [`RunReport::advisories`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use release_remote::{mask_secret, CommentAction, CommentPublisher, MaskHook, TokenFetcher};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::changelog::{
    comment_marker, format_changelog_comment, locate, ChangelogArtifacts, ChangelogStatus,
};
use crate::error::{AdvisoryLog, ReleaseError, Result};
use crate::handoff::{HandoffStore, LockHandoff};
use crate::inputs::ReleaseInputs;
use crate::lock::{LockManager, LockRequest};
use crate::runner::{CommandRunner, RunOptions};
use crate::summary::{log_block, render_header, render_summary};
use crate::workflow::{
    OutputSink, OUTPUT_CHANGELOG_JSON_PATH, OUTPUT_CHANGELOG_PATH, OUTPUT_DEPLOYMENT_STATUS,
    OUTPUT_TICKET_ID,
};

/// Final status of a run, as reported in the `deployment-status` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatus {
    Success,
    Failed,
    DryRun,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::DryRun => "dry-run",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the deploy command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployResult {
    pub success: bool,
    pub changelog_dir: Option<PathBuf>,
    pub is_dry_run: bool,
}

/// What a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub status: DeploymentStatus,
    pub ticket_id: Option<String>,
    pub changelog: ChangelogArtifacts,
    pub comment: Option<CommentAction>,
    /// Failures of best-effort steps. Never affects `status`.
    pub advisories: Vec<ReleaseError>,
}

impl RunReport {
    /// Whether the host should mark the step failed.
    pub fn is_failure(&self) -> bool {
        self.status == DeploymentStatus::Failed
    }
}

/// Clients used to publish the changelog comment.
pub struct ChangelogReporter {
    pub tokens: TokenFetcher,
    pub comments: CommentPublisher,
}

/// Collaborators of an [`Orchestrator`].
pub struct ReleaseServices {
    pub runner: Arc<dyn CommandRunner>,
    pub handoff: Arc<dyn HandoffStore>,
    pub outputs: Arc<dyn OutputSink>,
    /// Without a reporter no comment is published.
    pub reporter: Option<ChangelogReporter>,
    pub mask: MaskHook,
}

impl ReleaseServices {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        handoff: Arc<dyn HandoffStore>,
        outputs: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            runner,
            handoff,
            outputs,
            reporter: None,
            mask: Arc::new(mask_secret),
        }
    }

    pub fn with_reporter(mut self, reporter: ChangelogReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_mask_hook(mut self, mask: MaskHook) -> Self {
        self.mask = mask;
        self
    }
}

/// Removes the fetched definition file when dropped.
struct DefinitionFile {
    path: PathBuf,
}

impl Drop for DefinitionFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Could not remove definition file");
        }
    }
}

pub struct Orchestrator {
    inputs: ReleaseInputs,
    services: ReleaseServices,
}

impl Orchestrator {
    pub fn new(inputs: ReleaseInputs, services: ReleaseServices) -> Self {
        Self { inputs, services }
    }

    pub fn inputs(&self) -> &ReleaseInputs {
        &self.inputs
    }

    pub async fn run(&self) -> Result<RunReport> {
        self.run_at(Utc::now()).await
    }

    /// Run with a fixed timestamp for the changelog comment.
    pub async fn run_at(&self, timestamp: DateTime<Utc>) -> Result<RunReport> {
        self.inputs.validate()?;
        (self.services.mask)(&self.inputs.server.token);
        log_block(&render_header(&self.inputs));

        if self.inputs.dry_run {
            self.run_dry(timestamp).await
        } else {
            self.run_release(timestamp).await
        }
    }

    async fn run_dry(&self, timestamp: DateTime<Utc>) -> Result<RunReport> {
        info!(environment = %self.inputs.environment, "Dry run: validating release without deploying");
        let mut advisories = AdvisoryLog::new();

        self.authenticate().await?;
        let deploy = self.deploy_with_edits(true).await?;
        if !deploy.success {
            warn!("Dry run reported failures; not marking the run failed");
        }

        let status = DeploymentStatus::DryRun;
        self.emit(OUTPUT_DEPLOYMENT_STATUS, status.as_str(), &mut advisories);

        let (changelog, comment) = self
            .report_changelog(&deploy, ChangelogStatus::DryRun, timestamp, &mut advisories)
            .await;

        log_block(&render_summary(&self.inputs, status.as_str()));
        Ok(RunReport {
            status,
            ticket_id: None,
            changelog,
            comment,
            advisories: advisories.into_entries(),
        })
    }

    async fn run_release(&self, timestamp: DateTime<Utc>) -> Result<RunReport> {
        let mut advisories = AdvisoryLog::new();

        let ticket_id = if self.inputs.lock.enabled {
            let ticket_id = self.lock_environment().await?;
            self.emit(OUTPUT_TICKET_ID, &ticket_id, &mut advisories);
            Some(ticket_id)
        } else {
            info!("Environment locking disabled");
            None
        };

        self.authenticate().await?;
        let deploy = self.deploy_with_edits(false).await?;

        let (status, changelog_status) = if deploy.success {
            (DeploymentStatus::Success, ChangelogStatus::Success)
        } else {
            (DeploymentStatus::Failed, ChangelogStatus::Partial)
        };
        self.emit(OUTPUT_DEPLOYMENT_STATUS, status.as_str(), &mut advisories);

        let (changelog, comment) = self
            .report_changelog(&deploy, changelog_status, timestamp, &mut advisories)
            .await;

        log_block(&render_summary(&self.inputs, status.as_str()));
        if status == DeploymentStatus::Failed {
            error!(environment = %self.inputs.environment, "Release deployment failed");
        }

        Ok(RunReport {
            status,
            ticket_id,
            changelog,
            comment,
            advisories: advisories.into_entries(),
        })
    }

    /// Acquire the lock and persist the handoff for cleanup.
    ///
    /// If the handoff cannot be written the lock is released again, since
    /// cleanup would have no way to find it.
    async fn lock_environment(&self) -> Result<String> {
        let inputs = &self.inputs;
        let mut lock = LockManager::new(self.services.runner.as_ref(), &inputs.sfp_binary);
        let ticket = lock
            .acquire(&LockRequest {
                environment: &inputs.environment,
                repository: &inputs.repository,
                server: &inputs.server,
                duration_minutes: inputs.lock.duration_minutes,
                wait_timeout_minutes: inputs.lock.wait_timeout_minutes,
            })
            .await?;

        let handoff = LockHandoff {
            ticket_id: ticket.ticket_id.clone(),
            environment: inputs.environment.clone(),
            repository: inputs.repository.clone(),
            server: inputs.server.clone(),
            auto_unlock: true,
        };
        if let Err(err) = handoff.persist(self.services.handoff.as_ref()) {
            error!(error = %err, "Could not persist lock state, releasing the lock");
            if let Err(release_err) = lock
                .release(
                    &ticket.ticket_id,
                    &inputs.environment,
                    &inputs.repository,
                    &inputs.server,
                )
                .await
            {
                warn!(error = %release_err, "The environment may need to be manually unlocked");
            }
            return Err(err);
        }

        Ok(ticket.ticket_id)
    }

    async fn authenticate(&self) -> Result<()> {
        let inputs = &self.inputs;

        info!("Authenticating to default DevHub via SFP Server");
        self.run_sfp(
            args([
                "org",
                "login",
                "--server",
                "--default-devhub",
                "--alias",
                &inputs.devhub_alias,
                "--sfp-server-url",
                &inputs.server.url,
                "-t",
                &inputs.server.token,
            ]),
            |detail| ReleaseError::Authentication {
                target: "DevHub".to_string(),
                detail,
            },
        )
        .await?;
        info!("DevHub authentication successful");

        info!(environment = %inputs.environment, "Authenticating to environment");
        self.run_sfp(
            args([
                "server",
                "environment",
                "login",
                "--name",
                &inputs.environment,
                "--repository",
                &inputs.repository,
                "--sfp-server-url",
                &inputs.server.url,
                "-t",
                &inputs.server.token,
            ]),
            |detail| ReleaseError::Authentication {
                target: "environment".to_string(),
                detail,
            },
        )
        .await?;
        info!("Environment authentication successful");
        Ok(())
    }

    /// Fetch and edit the definition when requested, then deploy.
    async fn deploy_with_edits(&self, dry_run: bool) -> Result<DeployResult> {
        let definition = self.prepare_definition().await?;
        let result = self
            .deploy(definition.as_ref().map(|d| d.path.as_path()), dry_run)
            .await;
        drop(definition);
        result
    }

    async fn prepare_definition(&self) -> Result<Option<DefinitionFile>> {
        let inputs = &self.inputs;
        if inputs.edit.is_empty() {
            return Ok(None);
        }
        if !inputs.is_single_domain() {
            warn!(
                release_candidates = %inputs.release_candidates_label(),
                "Package exclusions and overrides need a single release candidate, deploying unmodified"
            );
            return Ok(None);
        }
        let candidate = &inputs.release_candidates[0];

        info!(release_candidate = %candidate, "Fetching release candidate for modification");
        let file = DefinitionFile {
            path: std::env::temp_dir().join(format!("release-def-{}.yml", Uuid::new_v4())),
        };
        let output_path = file.path.display().to_string();
        self.run_sfp(
            args([
                "releasecandidate",
                "fetch",
                "-n",
                &candidate.name,
                "-c",
                &candidate.domain,
                "--repository",
                &inputs.repository,
                "--sfp-server-url",
                &inputs.server.url,
                "-t",
                &inputs.server.token,
                "-o",
                &output_path,
            ]),
            ReleaseError::DefinitionFetch,
        )
        .await?;

        let original = fs::read_to_string(&file.path).map_err(|e| {
            ReleaseError::DefinitionFetch(format!("cannot read {output_path}: {e}"))
        })?;
        debug!(definition = %original, "Original release definition");

        for name in &inputs.edit.excludes {
            info!(package = %name, "Excluding package");
        }
        for o in &inputs.edit.overrides {
            info!(package = %o.name, version = %o.version, "Overriding package version");
        }

        let edited = inputs.edit.apply(&original);
        debug!(definition = %edited, "Modified release definition");
        fs::write(&file.path, edited)?;

        Ok(Some(file))
    }

    async fn deploy(&self, definition: Option<&Path>, dry_run: bool) -> Result<DeployResult> {
        let inputs = &self.inputs;
        info!(
            release_candidates = %inputs.release_candidates_label(),
            environment = %inputs.environment,
            dry_run,
            "Deploying release"
        );

        let mut deploy_args = args(["release", "-o", &inputs.environment]);
        match definition {
            Some(path) => {
                deploy_args.push("-p".to_string());
                deploy_args.push(path.display().to_string());
            }
            None => {
                for rc in &inputs.release_candidates {
                    deploy_args.extend(args([
                        "--releasecandidate",
                        &rc.name,
                        "--releasecandidatedomain",
                        &rc.domain,
                    ]));
                }
            }
        }
        deploy_args.extend(args([
            "--repository",
            &inputs.repository,
            "--sfp-server-url",
            &inputs.server.url,
            "-t",
            &inputs.server.token,
            "-v",
            &inputs.devhub_alias,
            "--waittime",
            &inputs.wait_time_minutes.to_string(),
        ]));
        if let Some(tag) = &inputs.tag {
            deploy_args.extend(args(["--tag", tag]));
        }
        if dry_run {
            deploy_args.push("--dryrun".to_string());
        }
        let changelog_dir = inputs.generate_changelog.then(|| inputs.changelog_dir.clone());
        if let Some(dir) = &changelog_dir {
            deploy_args.push("--changelog-output".to_string());
            deploy_args.push(dir.display().to_string());
        }

        let output = self
            .services
            .runner
            .run(&inputs.sfp_binary, &deploy_args, &RunOptions::default())
            .await?;

        let success = output.success();
        if success {
            info!("Release deployment completed successfully");
        } else {
            let err = ReleaseError::Deployment(output.failure_detail());
            error!(exit_code = output.exit_code, "{err}");
        }

        Ok(DeployResult {
            success,
            changelog_dir,
            is_dry_run: dry_run,
        })
    }

    /// Locate changelog artifacts and publish the status comment.
    /// Every failure here is advisory.
    async fn report_changelog(
        &self,
        deploy: &DeployResult,
        status: ChangelogStatus,
        timestamp: DateTime<Utc>,
        advisories: &mut AdvisoryLog,
    ) -> (ChangelogArtifacts, Option<CommentAction>) {
        let Some(dir) = &deploy.changelog_dir else {
            return (ChangelogArtifacts::default(), None);
        };

        let artifacts = locate(dir);
        if artifacts.is_empty() {
            info!(dir = %dir.display(), "No changelog artifacts found");
        }
        for (name, path) in [
            (OUTPUT_CHANGELOG_PATH, &artifacts.markdown_path),
            (OUTPUT_CHANGELOG_JSON_PATH, &artifacts.json_path),
        ] {
            if let Some(path) = path {
                let outcome = self
                    .services
                    .outputs
                    .set_output(name, &path.display().to_string())
                    .map_err(|e| ReleaseError::ChangelogProcessing(e.to_string()));
                advisories.capture(name, outcome);
            }
        }

        if !self.inputs.update_issue {
            return (artifacts, None);
        }
        let Some(issue_number) = self.inputs.issue_number else {
            info!("No issue or pull request number available, skipping changelog comment");
            return (artifacts, None);
        };
        let Some(reporter) = &self.services.reporter else {
            debug!("No comment reporter configured");
            return (artifacts, None);
        };

        let body = format_changelog_comment(
            artifacts.content.as_deref(),
            status,
            &self.inputs.release_candidates_label(),
            &self.inputs.environment,
            timestamp,
        );
        let outcome = self.publish_comment(reporter, issue_number, &body).await;
        let comment = advisories.capture("changelog comment", outcome);
        (artifacts, comment)
    }

    async fn publish_comment(
        &self,
        reporter: &ChangelogReporter,
        issue_number: u64,
        body: &str,
    ) -> Result<CommentAction> {
        let inputs = &self.inputs;
        let token = reporter
            .tokens
            .fetch(&inputs.server.url, &inputs.server.token, &inputs.repository)
            .await?;

        let action = reporter
            .comments
            .upsert(
                token.expose(),
                &inputs.repository,
                issue_number,
                body,
                &comment_marker(&inputs.environment),
            )
            .await?;

        match &action {
            CommentAction::Created(id) => info!(issue = issue_number, comment_id = ?id, "Created changelog comment"),
            CommentAction::Updated(id) => info!(issue = issue_number, comment_id = id, "Updated changelog comment"),
        }
        Ok(action)
    }

    async fn run_sfp<F>(&self, args: Vec<String>, on_failure: F) -> Result<()>
    where
        F: FnOnce(String) -> ReleaseError,
    {
        let output = self
            .services
            .runner
            .run(&self.inputs.sfp_binary, &args, &RunOptions::default())
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(on_failure(output.failure_detail()))
        }
    }

    fn emit(&self, name: &str, value: &str, advisories: &mut AdvisoryLog) {
        advisories.capture(name, self.services.outputs.set_output(name, value));
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostContext;
    use crate::fakes::{MemoryHandoffStore, MemoryOutputs, ScriptedRunner};
    use crate::inputs::RawInputs;

    struct Harness {
        runner: Arc<ScriptedRunner>,
        outputs: Arc<MemoryOutputs>,
        handoff: Arc<MemoryHandoffStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                runner: Arc::new(ScriptedRunner::new()),
                outputs: Arc::new(MemoryOutputs::new()),
                handoff: Arc::new(MemoryHandoffStore::new()),
            }
        }

        fn orchestrator(&self, raw: RawInputs) -> Orchestrator {
            let inputs = ReleaseInputs::resolve(raw, &HostContext::default()).unwrap();
            let services = ReleaseServices::new(
                self.runner.clone(),
                self.handoff.clone(),
                self.outputs.clone(),
            )
            .with_mask_hook(Arc::new(|_: &str| {}));
            Orchestrator::new(inputs, services)
        }
    }

    fn raw() -> RawInputs {
        RawInputs {
            sfp_server_url: "https://sfp.example.com".to_string(),
            sfp_server_token: "srv-token".to_string(),
            environment: "uat".to_string(),
            release_candidates: "core:RC-1".to_string(),
            repository: Some("org/repo".to_string()),
            generate_changelog: false,
            ..RawInputs::default()
        }
    }

    #[test]
    fn test_deployment_status_strings() {
        assert_eq!(DeploymentStatus::Success.as_str(), "success");
        assert_eq!(DeploymentStatus::Failed.to_string(), "failed");
        assert_eq!(DeploymentStatus::DryRun.as_str(), "dry-run");
    }

    #[tokio::test]
    async fn test_deploy_args_without_definition() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(RawInputs {
            release_candidates: "core:RC-1,sales:RC-2".to_string(),
            tag: Some("v1".to_string()),
            wait_time_minutes: 45,
            ..raw()
        });

        let result = orchestrator.deploy(None, false).await.unwrap();
        assert!(result.success);
        assert!(result.changelog_dir.is_none());

        let call = &h.runner.calls_to("release -o")[0];
        assert_eq!(
            call.args,
            args([
                "release",
                "-o",
                "uat",
                "--releasecandidate",
                "RC-1",
                "--releasecandidatedomain",
                "core",
                "--releasecandidate",
                "RC-2",
                "--releasecandidatedomain",
                "sales",
                "--repository",
                "org/repo",
                "--sfp-server-url",
                "https://sfp.example.com",
                "-t",
                "srv-token",
                "-v",
                "devhub",
                "--waittime",
                "45",
                "--tag",
                "v1",
            ])
        );
    }

    #[tokio::test]
    async fn test_deploy_args_with_definition_dry_run_and_changelog() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(RawInputs {
            generate_changelog: true,
            ..raw()
        });

        let result = orchestrator
            .deploy(Some(Path::new("/tmp/def.yml")), true)
            .await
            .unwrap();
        assert!(result.is_dry_run);
        assert_eq!(
            result.changelog_dir,
            Some(PathBuf::from(crate::inputs::DEFAULT_CHANGELOG_DIR))
        );

        let call = &h.runner.calls_to("release -o")[0];
        assert_eq!(call.flag("-p"), Some("/tmp/def.yml"));
        assert!(!call.has_flag("--releasecandidate"));
        assert!(call.has_flag("--dryrun"));
        assert_eq!(
            call.flag("--changelog-output"),
            Some(crate::inputs::DEFAULT_CHANGELOG_DIR)
        );
    }

    #[tokio::test]
    async fn test_deploy_failure_is_not_an_error() {
        let h = Harness::new();
        h.runner.on("release -o", 1, "", "component failed");
        let result = h.orchestrator(raw()).deploy(None, false).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_hub_auth_failure_is_fatal() {
        let h = Harness::new();
        h.runner.on("org login", 1, "", "bad token");

        let err = h.orchestrator(raw()).authenticate().await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to authenticate to DevHub: bad token");
        assert!(h.runner.calls_to("server environment login").is_empty());
    }

    #[tokio::test]
    async fn test_environment_auth_failure_keeps_handoff() {
        let h = Harness::new();
        h.runner
            .on("server environment lock", 0, r#"{"ticketId":"T-7"}"#, "")
            .on("server environment login", 1, "", "no such environment");

        let err = h.orchestrator(raw()).run().await.unwrap_err();
        assert!(matches!(
            err,
            ReleaseError::Authentication { ref target, .. } if target == "environment"
        ));
        assert_eq!(h.handoff.get("TICKET_ID").as_deref(), Some("T-7"));
        assert_eq!(h.outputs.get(OUTPUT_TICKET_ID).as_deref(), Some("T-7"));
        assert!(h.runner.calls_to("release -o").is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_releases_lock() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("server environment lock", 0, r#"{"ticketId":"T-8"}"#, "");
        let inputs = ReleaseInputs::resolve(raw(), &HostContext::default()).unwrap();
        let services = ReleaseServices::new(
            runner.clone(),
            Arc::new(MemoryHandoffStore::failing()),
            Arc::new(MemoryOutputs::new()),
        )
        .with_mask_hook(Arc::new(|_: &str| {}));

        let err = Orchestrator::new(inputs, services).run().await.unwrap_err();
        assert!(matches!(err, ReleaseError::StateStore(_)));

        let unlocks = runner.calls_to("server environment unlock");
        assert_eq!(unlocks.len(), 1);
        assert_eq!(unlocks[0].flag("--ticket-id"), Some("T-8"));
        assert!(runner.calls_to("org login").is_empty());
    }

    #[tokio::test]
    async fn test_lock_disabled_skips_lock_and_handoff() {
        let h = Harness::new();
        let report = h
            .orchestrator(RawInputs {
                lock: crate::inputs::LockSettings {
                    enabled: false,
                    ..Default::default()
                },
                ..raw()
            })
            .run()
            .await
            .unwrap();

        assert_eq!(report.status, DeploymentStatus::Success);
        assert!(report.ticket_id.is_none());
        assert!(h.runner.calls_to("server environment lock").is_empty());
        assert!(h.handoff.is_empty());
        assert!(h.outputs.get(OUTPUT_TICKET_ID).is_none());
    }

    #[tokio::test]
    async fn test_mask_hook_sees_server_token() {
        let h = Harness::new();
        h.runner.on("server environment lock", 0, r#"{"ticketId":"T-1"}"#, "");
        let masked = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let sink = masked.clone();
        let inputs = ReleaseInputs::resolve(raw(), &HostContext::default()).unwrap();
        let services = ReleaseServices::new(h.runner.clone(), h.handoff.clone(), h.outputs.clone())
            .with_mask_hook(Arc::new(move |v: &str| sink.lock().unwrap().push(v.to_string())));

        Orchestrator::new(inputs, services).run().await.unwrap();
        assert_eq!(*masked.lock().unwrap(), vec!["srv-token".to_string()]);
    }
}
