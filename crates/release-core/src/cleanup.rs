//! Post-phase cleanup: release a lock left behind by the main phase.
//!
//! Cleanup is best-effort. It never returns an error; every problem is
//! logged as a warning and reflected in the [`CleanupOutcome`].

use tracing::{debug, info, warn};

use crate::handoff::{HandoffLookup, HandoffStore, LockHandoff};
use crate::lock::LockManager;
use crate::runner::CommandRunner;
use crate::summary::{log_block, render_cleanup_header};
use crate::workflow::mask_secret;

const MANUAL_UNLOCK_HINT: &str = "The environment may need to be manually unlocked.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// No unlock was owed.
    Skipped,
    /// Unlock was owed but the handoff is incomplete.
    MissingState(Vec<&'static str>),
    Unlocked { ticket_id: String },
    Failed(String),
}

impl CleanupOutcome {
    pub fn needs_manual_unlock(&self) -> bool {
        matches!(self, CleanupOutcome::MissingState(_) | CleanupOutcome::Failed(_))
    }
}

/// Read the handoff and release the lock it names.
pub async fn run_cleanup(
    runner: &dyn CommandRunner,
    store: &dyn HandoffStore,
    sfp_binary: &str,
) -> CleanupOutcome {
    let handoff = match LockHandoff::restore(store) {
        Ok(HandoffLookup::NotOwed) => {
            info!("Auto-unlock is disabled or lock was not acquired, skipping cleanup");
            return CleanupOutcome::Skipped;
        }
        Ok(HandoffLookup::Incomplete { missing }) => {
            warn!("Missing required state for unlock. {MANUAL_UNLOCK_HINT}");
            for key in &missing {
                debug!(key, "missing");
            }
            return CleanupOutcome::MissingState(missing);
        }
        Ok(HandoffLookup::Owed(handoff)) => handoff,
        Err(err) => {
            warn!(error = %err, "Cleanup failed: cannot read lock state");
            warn!("{MANUAL_UNLOCK_HINT}");
            return CleanupOutcome::Failed(err.to_string());
        }
    };

    mask_secret(&handoff.server.token);
    log_block(&render_cleanup_header(&handoff.environment, &handoff.server.url));

    let mut lock = LockManager::holding(runner, sfp_binary);
    match lock
        .release(
            &handoff.ticket_id,
            &handoff.environment,
            &handoff.repository,
            &handoff.server,
        )
        .await
    {
        Ok(()) => {
            info!("Cleanup completed successfully");
            CleanupOutcome::Unlocked {
                ticket_id: handoff.ticket_id,
            }
        }
        Err(err) => {
            warn!("Cleanup failed: {err}");
            warn!("{MANUAL_UNLOCK_HINT}");
            CleanupOutcome::Failed(err.to_string())
        }
    }
}
