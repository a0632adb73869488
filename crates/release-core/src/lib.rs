//! release-core: release orchestration for release-domains
//!
//! Drives the deployment engine (`sfp`) through one release of one or more
//! domain release candidates into an environment.
//!
//! ## Phases
//!
//! - **main** ([`Orchestrator`]): lock, authenticate, optionally edit the
//!   release definition, deploy, report the changelog
//! - **cleanup** ([`run_cleanup`]): a separate process that releases the
//!   lock the main phase left behind, found through a [`HandoffStore`]
//!
//! ## Key Components
//!
//! - `CommandRunner`: subprocess seam with bounded output capture
//! - `LockManager`: environment lock state machine
//! - `DefinitionEdit`: two-pass line transformer for package edits
//! - `locate`: changelog artifact discovery
//! - `ReleaseError` / `AdvisoryLog`: fatal and advisory error channels

pub mod changelog;
pub mod cleanup;
pub mod context;
pub mod definition;
mod error;
pub mod fakes;
pub mod handoff;
pub mod inputs;
pub mod lock;
pub mod orchestrator;
pub mod runner;
pub mod summary;
mod telemetry;
pub mod workflow;

pub use changelog::{
    comment_marker, format_changelog_comment, locate, ChangelogArtifacts, ChangelogStatus,
};
pub use cleanup::{run_cleanup, CleanupOutcome};
pub use context::HostContext;
pub use definition::{mutate, DefinitionEdit, PackageOverride};
pub use error::{AdvisoryLog, ReleaseError, Result, Severity};
pub use handoff::{HandoffLookup, HandoffStore, HostStateStore, JsonFileStore, LockHandoff};
pub use inputs::{LockSettings, RawInputs, ReleaseCandidate, ReleaseInputs, ServerEndpoint};
pub use lock::{LockManager, LockPhase, LockRequest, LockTicket};
pub use orchestrator::{
    ChangelogReporter, DeployResult, DeploymentStatus, Orchestrator, ReleaseServices, RunReport,
};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner, RunOptions};
pub use telemetry::init_tracing;
pub use workflow::{HostOutputs, OutputSink};
