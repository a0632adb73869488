//! Main-phase runs against a scripted deployment engine and comment API.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use release_core::fakes::{MemoryHandoffStore, MemoryOutputs, ScriptedRunner};
use release_core::handoff::{KEY_AUTO_UNLOCK, KEY_SFP_SERVER_TOKEN, KEY_TICKET_ID};
use release_core::workflow::{
    OUTPUT_CHANGELOG_JSON_PATH, OUTPUT_CHANGELOG_PATH, OUTPUT_DEPLOYMENT_STATUS, OUTPUT_TICKET_ID,
};
use release_core::{
    ChangelogReporter, DeploymentStatus, HostContext, Orchestrator, RawInputs, ReleaseError,
    ReleaseInputs, ReleaseServices,
};
use release_remote::fakes::ScriptedTransport;
use release_remote::{CommentAction, CommentPublisher, Method, TokenFetcher};
use serde_json::json;
use tempfile::TempDir;

const DEFINITION: &str = "\
release: RC-1
artifacts:
  pkgA: 1.0.0-1
  pkgB: 2.1.0-4
";

struct World {
    runner: Arc<ScriptedRunner>,
    handoff: Arc<MemoryHandoffStore>,
    outputs: Arc<MemoryOutputs>,
    transport: Arc<ScriptedTransport>,
    changelog_dir: TempDir,
}

impl World {
    fn new() -> Self {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("server environment lock", 0, r#"{"ticketId":"T-42","status":"locked"}"#, "")
            .on_writing("releasecandidate fetch", "-o", DEFINITION)
            .capture_file("release -o", "-p");

        Self {
            runner,
            handoff: Arc::new(MemoryHandoffStore::new()),
            outputs: Arc::new(MemoryOutputs::new()),
            transport: Arc::new(ScriptedTransport::new()),
            changelog_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn raw(&self) -> RawInputs {
        RawInputs {
            sfp_server_url: "https://sfp.example.com".to_string(),
            sfp_server_token: "srv-token".to_string(),
            environment: "uat".to_string(),
            release_candidates: "core:RC-1".to_string(),
            repository: Some("org/repo".to_string()),
            exclude_packages: Some("pkgA".to_string()),
            issue_number: Some(7),
            changelog_dir: self.changelog_dir.path().to_path_buf(),
            ..RawInputs::default()
        }
    }

    fn orchestrator(&self, raw: RawInputs) -> Orchestrator {
        let inputs = ReleaseInputs::resolve(raw, &HostContext::default()).unwrap();
        let quiet: release_remote::MaskHook = Arc::new(|_: &str| {});
        let reporter = ChangelogReporter {
            tokens: TokenFetcher::new(self.transport.clone())
                .with_retry_delay(Duration::ZERO)
                .with_mask_hook(quiet.clone()),
            comments: CommentPublisher::new(self.transport.clone())
                .with_api_base("https://api.test"),
        };
        let services = ReleaseServices::new(
            self.runner.clone(),
            self.handoff.clone(),
            self.outputs.clone(),
        )
        .with_reporter(reporter)
        .with_mask_hook(quiet);
        Orchestrator::new(inputs, services)
    }

    fn write_changelog(&self) {
        let domain = self.changelog_dir.path().join("core");
        fs::create_dir_all(&domain).unwrap();
        fs::write(domain.join("changelog.md"), "- pkgB 2.1.0-4\n").unwrap();
        fs::write(domain.join("changelog.json"), "{}").unwrap();
    }

    fn script_comment_api(&self) {
        self.transport
            .push_json(json!({ "token": "ghs_abc" }))
            .push_json(json!([]))
            .push_response(201, "Created", json!({ "id": 501 }).to_string());
    }
}

#[tokio::test]
async fn successful_release_locks_edits_deploys_and_comments() {
    let world = World::new();
    world.write_changelog();
    world.script_comment_api();

    let report = world.orchestrator(world.raw()).run().await.expect("run");

    assert_eq!(report.status, DeploymentStatus::Success);
    assert!(!report.is_failure());
    assert_eq!(report.ticket_id.as_deref(), Some("T-42"));
    assert_eq!(report.comment, Some(CommentAction::Created(Some(501))));
    assert!(report.advisories.is_empty());

    // Lock identity is handed to cleanup.
    assert_eq!(world.handoff.get(KEY_TICKET_ID).as_deref(), Some("T-42"));
    assert_eq!(world.handoff.get(KEY_AUTO_UNLOCK).as_deref(), Some("true"));
    assert_eq!(world.handoff.get(KEY_SFP_SERVER_TOKEN).as_deref(), Some("srv-token"));

    // Steps run in order.
    let order: Vec<String> = world
        .runner
        .calls()
        .iter()
        .map(|c| c.args[..2].join(" "))
        .collect();
    assert_eq!(
        order,
        [
            "server environment",
            "org login",
            "server environment",
            "releasecandidate fetch",
            "release -o",
        ]
    );

    // Deploy used the edited definition.
    let deploy = &world.runner.calls_to("release -o")[0];
    let definition_path = deploy.flag("-p").expect("deploy with -p").to_string();
    let deployed = deploy.file_content.as_deref().expect("definition captured");
    assert!(!deployed.contains("pkgA"));
    assert!(deployed.contains("  pkgB: 2.1.0-4\n"));
    assert!(!deploy.has_flag("--releasecandidate"));
    assert!(!std::path::Path::new(&definition_path).exists());

    // Outputs.
    assert_eq!(world.outputs.get(OUTPUT_DEPLOYMENT_STATUS).as_deref(), Some("success"));
    assert_eq!(world.outputs.get(OUTPUT_TICKET_ID).as_deref(), Some("T-42"));
    assert!(world
        .outputs
        .get(OUTPUT_CHANGELOG_PATH)
        .is_some_and(|p| p.ends_with("changelog.md")));
    assert!(world
        .outputs
        .get(OUTPUT_CHANGELOG_JSON_PATH)
        .is_some_and(|p| p.ends_with("changelog.json")));

    // Comment body carries the marker and the changelog.
    let posts = world.transport.requests_with(Method::Post);
    let body = posts[0].body.as_ref().unwrap()["body"].as_str().unwrap().to_string();
    assert!(body.starts_with("<!-- release-domains:uat -->\n"));
    assert!(body.contains("Completed Successfully"));
    assert!(body.contains("- pkgB 2.1.0-4"));
}

#[tokio::test]
async fn failed_deploy_marks_run_failed_and_keeps_handoff() {
    let world = World::new();
    world.runner.on("release -o", 1, "", "deployment failed: pkgB");
    world.write_changelog();
    world.script_comment_api();

    let report = world.orchestrator(world.raw()).run().await.expect("run");

    assert_eq!(report.status, DeploymentStatus::Failed);
    assert!(report.is_failure());
    assert_eq!(world.outputs.get(OUTPUT_DEPLOYMENT_STATUS).as_deref(), Some("failed"));
    assert_eq!(world.handoff.get(KEY_TICKET_ID).as_deref(), Some("T-42"));
    assert_eq!(world.handoff.get(KEY_AUTO_UNLOCK).as_deref(), Some("true"));

    let posts = world.transport.requests_with(Method::Post);
    let body = posts[0].body.as_ref().unwrap()["body"].as_str().unwrap().to_string();
    assert!(body.contains("Partially Completed"));
}

#[tokio::test]
async fn dry_run_never_fails_and_skips_lock() {
    let world = World::new();
    world.runner.on("release -o", 1, "", "validation errors");

    let report = world
        .orchestrator(RawInputs {
            dry_run: true,
            update_issue: false,
            ..world.raw()
        })
        .run()
        .await
        .expect("run");

    assert_eq!(report.status, DeploymentStatus::DryRun);
    assert!(!report.is_failure());
    assert!(report.ticket_id.is_none());
    assert!(world.runner.calls_to("server environment lock").is_empty());
    assert!(world.handoff.is_empty());
    assert_eq!(world.outputs.get(OUTPUT_DEPLOYMENT_STATUS).as_deref(), Some("dry-run"));

    let deploy = &world.runner.calls_to("release -o")[0];
    assert!(deploy.has_flag("--dryrun"));
    assert!(deploy.has_flag("--changelog-output"));
    assert!(world.transport.requests().is_empty());
}

#[tokio::test]
async fn dry_run_edits_definition_and_posts_preview_comment() {
    let world = World::new();
    world.write_changelog();
    world.script_comment_api();

    let report = world
        .orchestrator(RawInputs {
            dry_run: true,
            ..world.raw()
        })
        .run()
        .await
        .expect("run");

    assert_eq!(report.status, DeploymentStatus::DryRun);
    assert_eq!(report.comment, Some(CommentAction::Created(Some(501))));
    assert!(report.advisories.is_empty());
    assert!(world.runner.calls_to("server environment lock").is_empty());

    let deploy = &world.runner.calls_to("release -o")[0];
    assert!(deploy.has_flag("--dryrun"));
    assert!(deploy.flag("-p").is_some());
    let deployed = deploy.file_content.as_deref().expect("definition captured");
    assert!(!deployed.contains("pkgA"));
    assert!(deployed.contains("pkgB"));

    let posts = world.transport.requests_with(Method::Post);
    assert_eq!(posts.len(), 1);
    let body = posts[0].body.as_ref().unwrap()["body"].as_str().unwrap().to_string();
    assert!(body.contains("Dry Run Preview"));
    assert!(body.contains("- pkgB 2.1.0-4"));
}

#[tokio::test]
async fn multi_domain_release_skips_definition_edit() {
    let world = World::new();

    let report = world
        .orchestrator(RawInputs {
            release_candidates: "core:RC-1,sales:RC-9".to_string(),
            update_issue: false,
            ..world.raw()
        })
        .run()
        .await
        .expect("run");

    assert_eq!(report.status, DeploymentStatus::Success);
    assert!(world.runner.calls_to("releasecandidate fetch").is_empty());

    let deploy = &world.runner.calls_to("release -o")[0];
    assert!(!deploy.has_flag("-p"));
    let domains: Vec<&str> = deploy
        .args
        .windows(2)
        .filter(|w| w[0] == "--releasecandidatedomain")
        .map(|w| w[1].as_str())
        .collect();
    assert_eq!(domains, ["core", "sales"]);
}

#[tokio::test]
async fn failing_comment_api_is_advisory() {
    let world = World::new();
    world.write_changelog();
    world
        .transport
        .push_json(json!({ "token": "ghs_abc" }))
        .push_json(json!([]))
        .push_response(403, "Forbidden", json!({ "message": "Resource not accessible" }).to_string());

    let report = world.orchestrator(world.raw()).run().await.expect("run");

    assert_eq!(report.status, DeploymentStatus::Success);
    assert_eq!(world.outputs.get(OUTPUT_DEPLOYMENT_STATUS).as_deref(), Some("success"));
    assert!(report.comment.is_none());
    assert_eq!(report.advisories.len(), 1);
    assert!(matches!(report.advisories[0], ReleaseError::CommentPublish(_)));
    assert!(report.advisories[0].is_advisory());
}

#[tokio::test]
async fn token_failure_is_advisory() {
    let world = World::new();
    for _ in 0..3 {
        world.transport.push_response(502, "Bad Gateway", "");
    }

    let report = world.orchestrator(world.raw()).run().await.expect("run");

    assert_eq!(report.status, DeploymentStatus::Success);
    assert_eq!(report.advisories.len(), 1);
    assert!(report.advisories[0]
        .to_string()
        .contains("Failed to get token after 3 attempts"));
    assert!(world.transport.requests_with(Method::Post).is_empty());
}

#[tokio::test]
async fn lock_failure_aborts_before_auth() {
    let world = World::new();
    world.runner.on("server environment lock", 1, "", "environment busy");

    let err = world.orchestrator(world.raw()).run().await.unwrap_err();

    assert_eq!(err.to_string(), "Failed to lock environment: environment busy");
    assert_eq!(world.runner.calls().len(), 1);
    assert!(world.handoff.is_empty());
}

#[tokio::test]
async fn fetch_failure_is_fatal() {
    let world = World::new();
    world.runner.on("releasecandidate fetch", 1, "", "no such release candidate");

    let err = world.orchestrator(world.raw()).run().await.unwrap_err();

    assert!(matches!(err, ReleaseError::DefinitionFetch(_)));
    assert!(world.runner.calls_to("release -o").is_empty());
}

#[test]
fn invalid_release_candidates_fail_before_any_command() {
    let world = World::new();
    let err = ReleaseInputs::resolve(
        RawInputs {
            release_candidates: "RC-1".to_string(),
            ..world.raw()
        },
        &HostContext::default(),
    )
    .unwrap_err();

    assert!(matches!(err, ReleaseError::Validation(_)));
    assert!(world.runner.calls().is_empty());
}
