//! Invocation inputs.
//!
//! [`RawInputs`] holds values as the host supplies them (flags or `INPUT_*`
//! variables). [`ReleaseInputs::resolve`] validates them once, before any
//! side effect, and produces the immutable configuration the orchestrator
//! runs with.

use std::fmt;
use std::path::PathBuf;

use crate::context::HostContext;
use crate::definition::{DefinitionEdit, PackageOverride};
use crate::error::{ReleaseError, Result};

/// Default deployment engine executable.
pub const DEFAULT_SFP_BINARY: &str = "sfp";

/// Default directory the deployment engine writes changelogs into.
pub const DEFAULT_CHANGELOG_DIR: &str = ".sfpowerscripts/outputs";

/// SFP server URL and credential.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub url: String,
    pub token: String,
}

impl ServerEndpoint {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEndpoint")
            .field("url", &self.url)
            .field("token", &"***")
            .finish()
    }
}

/// A `domain:name` release candidate reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseCandidate {
    pub domain: String,
    pub name: String,
}

impl fmt::Display for ReleaseCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.name)
    }
}

/// Environment lock parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSettings {
    pub enabled: bool,
    /// Minutes to wait for the lock; `<= 0` waits indefinitely.
    pub wait_timeout_minutes: i64,
    /// Minutes the lock is held before the server expires it.
    pub duration_minutes: u32,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            wait_timeout_minutes: 120,
            duration_minutes: 120,
        }
    }
}

/// Inputs as supplied by the host, before validation.
#[derive(Debug, Clone)]
pub struct RawInputs {
    pub sfp_server_url: String,
    pub sfp_server_token: String,
    pub environment: String,
    /// `domain:name[,domain:name...]`
    pub release_candidates: String,
    pub repository: Option<String>,
    pub devhub_alias: String,
    pub wait_time_minutes: u32,
    pub tag: Option<String>,
    /// Comma-separated package names.
    pub exclude_packages: Option<String>,
    /// Comma-separated `name=version` pairs.
    pub override_packages: Option<String>,
    pub lock: LockSettings,
    pub dry_run: bool,
    pub generate_changelog: bool,
    pub update_issue: bool,
    pub issue_number: Option<u64>,
    pub changelog_dir: PathBuf,
    pub sfp_binary: String,
}

impl Default for RawInputs {
    fn default() -> Self {
        Self {
            sfp_server_url: String::new(),
            sfp_server_token: String::new(),
            environment: String::new(),
            release_candidates: String::new(),
            repository: None,
            devhub_alias: "devhub".to_string(),
            wait_time_minutes: 120,
            tag: None,
            exclude_packages: None,
            override_packages: None,
            lock: LockSettings::default(),
            dry_run: false,
            generate_changelog: true,
            update_issue: true,
            issue_number: None,
            changelog_dir: PathBuf::from(DEFAULT_CHANGELOG_DIR),
            sfp_binary: DEFAULT_SFP_BINARY.to_string(),
        }
    }
}

/// Validated, immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct ReleaseInputs {
    pub server: ServerEndpoint,
    pub environment: String,
    pub release_candidates: Vec<ReleaseCandidate>,
    pub repository: String,
    pub devhub_alias: String,
    pub wait_time_minutes: u32,
    pub tag: Option<String>,
    pub edit: DefinitionEdit,
    pub lock: LockSettings,
    pub dry_run: bool,
    pub generate_changelog: bool,
    pub update_issue: bool,
    pub issue_number: Option<u64>,
    pub changelog_dir: PathBuf,
    pub sfp_binary: String,
}

impl ReleaseInputs {
    /// Validate `raw`, filling the repository and issue number from the
    /// host context when they were not supplied explicitly.
    pub fn resolve(raw: RawInputs, context: &HostContext) -> Result<Self> {
        let repository = raw
            .repository
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .or_else(|| context.repository.clone().filter(|r| !r.is_empty()))
            .ok_or_else(|| {
                ReleaseError::Validation(
                    "Repository not specified and GITHUB_REPOSITORY not set".to_string(),
                )
            })?;

        let release_candidates = parse_release_candidates(&raw.release_candidates)?;
        let excludes = split_list(raw.exclude_packages.as_deref().unwrap_or_default());
        let overrides = parse_overrides(raw.override_packages.as_deref().unwrap_or_default())?;

        let issue_number = raw.issue_number.or_else(|| context.issue_number());

        let inputs = Self {
            server: ServerEndpoint::new(raw.sfp_server_url.trim(), raw.sfp_server_token.trim()),
            environment: raw.environment.trim().to_string(),
            release_candidates,
            repository,
            devhub_alias: raw.devhub_alias,
            wait_time_minutes: raw.wait_time_minutes,
            tag: raw.tag.filter(|t| !t.trim().is_empty()),
            edit: DefinitionEdit {
                excludes,
                overrides,
            },
            lock: raw.lock,
            dry_run: raw.dry_run,
            generate_changelog: raw.generate_changelog,
            update_issue: raw.update_issue,
            issue_number,
            changelog_dir: raw.changelog_dir,
            sfp_binary: raw.sfp_binary,
        };
        inputs.validate()?;
        Ok(inputs)
    }

    /// Check the invariants every run relies on.
    pub fn validate(&self) -> Result<()> {
        if self.repository.trim().is_empty() {
            return Err(ReleaseError::Validation(
                "Repository not specified and GITHUB_REPOSITORY not set".to_string(),
            ));
        }
        if self.release_candidates.is_empty() {
            return Err(ReleaseError::Validation(
                "At least one domain:releaseCandidate pair is required".to_string(),
            ));
        }
        if self.environment.is_empty() {
            return Err(ReleaseError::Validation("environment is required".to_string()));
        }
        if self.server.url.is_empty() || self.server.token.is_empty() {
            return Err(ReleaseError::Validation(
                "sfp-server-url and sfp-server-token are required".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether exactly one release candidate is targeted.
    pub fn is_single_domain(&self) -> bool {
        self.release_candidates.len() == 1
    }

    /// `core:RC-1,sales:RC-2`
    pub fn release_candidates_label(&self) -> String {
        self.release_candidates
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Comma-joined domains.
    pub fn domains_label(&self) -> String {
        self.release_candidates
            .iter()
            .map(|rc| rc.domain.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Parse `domain:name[,domain:name...]`.
pub fn parse_release_candidates(list: &str) -> Result<Vec<ReleaseCandidate>> {
    if !list.contains(':') {
        return Err(ReleaseError::Validation(format!(
            "release-candidates must use domain:releaseCandidate format, got '{list}'"
        )));
    }

    split_list(list)
        .into_iter()
        .map(|pair| match pair.split_once(':') {
            Some((domain, name)) if !domain.trim().is_empty() && !name.trim().is_empty() => {
                Ok(ReleaseCandidate {
                    domain: domain.trim().to_string(),
                    name: name.trim().to_string(),
                })
            }
            _ => Err(ReleaseError::Validation(format!(
                "invalid release candidate '{pair}', expected domain:releaseCandidate"
            ))),
        })
        .collect()
}

/// Parse `name=version[,name=version...]`.
pub fn parse_overrides(list: &str) -> Result<Vec<PackageOverride>> {
    split_list(list)
        .into_iter()
        .map(|pair| match pair.split_once('=') {
            Some((name, version)) if !name.trim().is_empty() && !version.trim().is_empty() => {
                Ok(PackageOverride::new(name.trim(), version.trim()))
            }
            _ => Err(ReleaseError::Validation(format!(
                "invalid package override '{pair}', expected name=version"
            ))),
        })
        .collect()
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
