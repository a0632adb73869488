//! Environment lock acquisition and release.
//!
//! The locking service is reached only through the deployment engine's
//! `server environment lock|unlock` subcommands. A [`LockManager`] tracks
//! the lock through `Unlocked -> Locking -> Locked -> Unlocking -> Unlocked`;
//! a failed transition falls back to the phase it started from.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{ReleaseError, Result};
use crate::inputs::ServerEndpoint;
use crate::runner::{CommandRunner, RunOptions};

/// Where a [`LockManager`] is in the lock lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPhase {
    Unlocked,
    Locking,
    Locked,
    Unlocking,
}

/// Ticket returned by the locking service on success.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockTicket {
    pub ticket_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub environment_name: Option<String>,
}

/// Parameters of one lock acquisition.
#[derive(Debug, Clone)]
pub struct LockRequest<'a> {
    pub environment: &'a str,
    pub repository: &'a str,
    pub server: &'a ServerEndpoint,
    pub duration_minutes: u32,
    /// `<= 0` waits indefinitely.
    pub wait_timeout_minutes: i64,
}

/// Drives the lock subcommands and tracks the lock phase.
pub struct LockManager<'a> {
    runner: &'a dyn CommandRunner,
    sfp_binary: &'a str,
    phase: LockPhase,
}

impl<'a> LockManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner, sfp_binary: &'a str) -> Self {
        Self {
            runner,
            sfp_binary,
            phase: LockPhase::Unlocked,
        }
    }

    /// Manager for a lock some earlier process already holds.
    pub fn holding(runner: &'a dyn CommandRunner, sfp_binary: &'a str) -> Self {
        Self {
            phase: LockPhase::Locked,
            ..Self::new(runner, sfp_binary)
        }
    }

    pub fn phase(&self) -> LockPhase {
        self.phase
    }

    /// Acquire the environment lock, blocking server-side up to the wait
    /// timeout.
    pub async fn acquire(&mut self, request: &LockRequest<'_>) -> Result<LockTicket> {
        info!(
            environment = request.environment,
            wait_timeout_minutes = request.wait_timeout_minutes,
            "Locking environment"
        );
        self.phase = LockPhase::Locking;

        match self.try_acquire(request).await {
            Ok(ticket) => {
                self.phase = LockPhase::Locked;
                info!(ticket_id = %ticket.ticket_id, status = %ticket.status, "Environment locked");
                Ok(ticket)
            }
            Err(err) => {
                self.phase = LockPhase::Unlocked;
                Err(err)
            }
        }
    }

    async fn try_acquire(&self, request: &LockRequest<'_>) -> Result<LockTicket> {
        let args = lock_args(request);
        let output = self
            .runner
            .run(self.sfp_binary, &args, &RunOptions::silent())
            .await?;

        if !output.success() {
            return Err(ReleaseError::LockAcquisition(output.failure_detail()));
        }
        parse_ticket(&output.stdout)
    }

    /// Release the lock identified by `ticket_id`.
    pub async fn release(
        &mut self,
        ticket_id: &str,
        environment: &str,
        repository: &str,
        server: &ServerEndpoint,
    ) -> Result<()> {
        info!(environment, ticket_id, "Unlocking environment");
        let previous = self.phase;
        self.phase = LockPhase::Unlocking;

        let args = vec![
            "server".to_string(),
            "environment".to_string(),
            "unlock".to_string(),
            "--name".to_string(),
            environment.to_string(),
            "--repository".to_string(),
            repository.to_string(),
            "--ticket-id".to_string(),
            ticket_id.to_string(),
            "--sfp-server-url".to_string(),
            server.url.clone(),
            "-t".to_string(),
            server.token.clone(),
        ];

        let outcome = self
            .runner
            .run(self.sfp_binary, &args, &RunOptions::silent())
            .await
            .map_err(|e| ReleaseError::LockRelease(e.to_string()))
            .and_then(|output| {
                if output.success() {
                    Ok(())
                } else {
                    Err(ReleaseError::LockRelease(output.failure_detail()))
                }
            });

        match outcome {
            Ok(()) => {
                self.phase = LockPhase::Unlocked;
                info!(environment, "Environment unlocked");
                Ok(())
            }
            Err(err) => {
                warn!(environment, ticket_id, error = %err, "Unlock failed");
                self.phase = previous;
                Err(err)
            }
        }
    }
}

fn lock_args(request: &LockRequest<'_>) -> Vec<String> {
    let mut args = vec![
        "server".to_string(),
        "environment".to_string(),
        "lock".to_string(),
        "--name".to_string(),
        request.environment.to_string(),
        "--repository".to_string(),
        request.repository.to_string(),
        "--duration".to_string(),
        request.duration_minutes.to_string(),
        "--sfp-server-url".to_string(),
        request.server.url.clone(),
        "-t".to_string(),
        request.server.token.clone(),
        "--json".to_string(),
    ];
    if request.wait_timeout_minutes > 0 {
        args.push("--wait-timeout".to_string());
        args.push(request.wait_timeout_minutes.to_string());
    } else {
        args.push("--wait".to_string());
    }
    args
}

/// Parse the lock command's JSON stdout.
///
/// Output may carry log lines around the JSON object; in that case the
/// span from the first `{` to the last `}` is tried.
pub fn parse_ticket(stdout: &str) -> Result<LockTicket> {
    let parsed = serde_json::from_str::<LockTicket>(stdout.trim()).or_else(|first| {
        match (stdout.find('{'), stdout.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                serde_json::from_str::<LockTicket>(&stdout[start..=end])
            }
            _ => Err(first),
        }
    });

    match parsed {
        Ok(ticket) if !ticket.ticket_id.trim().is_empty() => Ok(ticket),
        Ok(_) => Err(ReleaseError::MalformedLockResponse(
            "No ticket ID in response".to_string(),
        )),
        Err(e) => {
            debug!(error = %e, "Lock response is not a ticket");
            Err(ReleaseError::MalformedLockResponse(format!(
                "No ticket ID in response: {e}"
            )))
        }
    }
}
