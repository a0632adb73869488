//! Read-only context supplied by the CI host.

use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use tracing::debug;

/// Ambient values the host exposes through its environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostContext {
    /// `owner/repo` of the repository running the workflow.
    pub repository: Option<String>,
    /// Full git ref, e.g. `refs/pull/42/merge`.
    pub ref_name: Option<String>,
    pub sha: Option<String>,
    pub event_name: Option<String>,
    /// Path to the JSON payload of the triggering event.
    pub event_path: Option<PathBuf>,
}

impl HostContext {
    /// Read `GITHUB_REPOSITORY`, `GITHUB_REF`, `GITHUB_SHA`,
    /// `GITHUB_EVENT_NAME` and `GITHUB_EVENT_PATH`.
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        Self {
            repository: var("GITHUB_REPOSITORY"),
            ref_name: var("GITHUB_REF"),
            sha: var("GITHUB_SHA"),
            event_name: var("GITHUB_EVENT_NAME"),
            event_path: var("GITHUB_EVENT_PATH").map(PathBuf::from),
        }
    }

    /// Issue or pull request number for this run, if one can be detected.
    ///
    /// A `refs/pull/<n>/...` ref wins; otherwise the event payload is
    /// consulted for `issue.number`, `pull_request.number` and `number`.
    pub fn issue_number(&self) -> Option<u64> {
        self.ref_name
            .as_deref()
            .and_then(pull_number_from_ref)
            .or_else(|| self.issue_number_from_event())
    }

    fn issue_number_from_event(&self) -> Option<u64> {
        let path = self.event_path.as_ref()?;
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Event payload not readable");
                return None;
            }
        };
        let payload: Value = serde_json::from_str(&raw).ok()?;

        let number = [
            payload.pointer("/issue/number"),
            payload.pointer("/pull_request/number"),
            payload.get("number"),
        ]
        .into_iter()
        .flatten()
        .find_map(Value::as_u64);
        number
    }
}

fn pull_number_from_ref(ref_name: &str) -> Option<u64> {
    ref_name
        .strip_prefix("refs/pull/")?
        .split('/')
        .next()?
        .parse()
        .ok()
}
