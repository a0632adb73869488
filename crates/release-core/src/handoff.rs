//! Lock handoff between the main phase and the cleanup phase.
//!
//! The two phases run as separate processes, so the identity of an
//! acquired lock travels through a small key-value store. The main phase
//! writes it once, right after the lock is acquired; cleanup reads it once.
//! Missing or partial state always means "nothing to unlock".

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ReleaseError, Result};
use crate::inputs::ServerEndpoint;
use crate::workflow::append_file_command;

pub const KEY_TICKET_ID: &str = "TICKET_ID";
pub const KEY_ENVIRONMENT: &str = "ENVIRONMENT";
pub const KEY_REPOSITORY: &str = "REPOSITORY";
pub const KEY_SFP_SERVER_URL: &str = "SFP_SERVER_URL";
pub const KEY_SFP_SERVER_TOKEN: &str = "SFP_SERVER_TOKEN";
pub const KEY_AUTO_UNLOCK: &str = "AUTO_UNLOCK";
pub const KEY_HANDOFF_VERSION: &str = "HANDOFF_VERSION";

/// Current handoff layout version.
pub const HANDOFF_VERSION: u32 = 1;

/// Durable key-value storage scoped to one pipeline run.
pub trait HandoffStore: Send + Sync {
    fn save(&self, key: &str, value: &str) -> Result<()>;
    fn load(&self, key: &str) -> Result<Option<String>>;
}

/// What the main phase leaves behind for cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandoff {
    pub ticket_id: String,
    pub environment: String,
    pub repository: String,
    pub server: ServerEndpoint,
    pub auto_unlock: bool,
}

/// Result of reading the handoff back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffLookup {
    /// No lock was acquired, or auto-unlock was not requested.
    NotOwed,
    /// Auto-unlock was requested but required keys are missing.
    Incomplete { missing: Vec<&'static str> },
    Owed(LockHandoff),
}

impl LockHandoff {
    /// Write every key. `AUTO_UNLOCK` goes last so a partial write is
    /// never mistaken for an owed unlock.
    pub fn persist(&self, store: &dyn HandoffStore) -> Result<()> {
        store.save(KEY_HANDOFF_VERSION, &HANDOFF_VERSION.to_string())?;
        store.save(KEY_TICKET_ID, &self.ticket_id)?;
        store.save(KEY_ENVIRONMENT, &self.environment)?;
        store.save(KEY_REPOSITORY, &self.repository)?;
        store.save(KEY_SFP_SERVER_URL, &self.server.url)?;
        store.save(KEY_SFP_SERVER_TOKEN, &self.server.token)?;
        store.save(KEY_AUTO_UNLOCK, if self.auto_unlock { "true" } else { "false" })?;
        debug!(ticket_id = %self.ticket_id, "Lock handoff persisted");
        Ok(())
    }

    pub fn restore(store: &dyn HandoffStore) -> Result<HandoffLookup> {
        let auto_unlock = store.load(KEY_AUTO_UNLOCK)?;
        if auto_unlock.as_deref().map(str::trim) != Some("true") {
            return Ok(HandoffLookup::NotOwed);
        }

        if let Some(version) = store.load(KEY_HANDOFF_VERSION)? {
            if version.trim() != HANDOFF_VERSION.to_string() {
                warn!(version = %version, "Unknown handoff version, reading anyway");
            }
        }

        let mut missing = Vec::new();
        let mut field = |key: &'static str| -> Result<String> {
            let value = store
                .load(key)?
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_default();
            if value.is_empty() {
                missing.push(key);
            }
            Ok(value)
        };

        let ticket_id = field(KEY_TICKET_ID)?;
        let environment = field(KEY_ENVIRONMENT)?;
        let repository = field(KEY_REPOSITORY)?;
        let url = field(KEY_SFP_SERVER_URL)?;
        let token = field(KEY_SFP_SERVER_TOKEN)?;

        if !missing.is_empty() {
            return Ok(HandoffLookup::Incomplete { missing });
        }

        Ok(HandoffLookup::Owed(LockHandoff {
            ticket_id,
            environment,
            repository,
            server: ServerEndpoint::new(url, token),
            auto_unlock: true,
        }))
    }
}

/// The host's native step state.
///
/// Writes go to the `GITHUB_STATE` file; the host hands them back to the
/// post step as `STATE_<KEY>` variables, captured at construction.
#[derive(Debug, Clone, Default)]
pub struct HostStateStore {
    state_file: Option<PathBuf>,
    restored: HashMap<String, String>,
}

impl HostStateStore {
    pub fn from_env() -> Self {
        let restored = std::env::vars()
            .filter_map(|(k, v)| k.strip_prefix("STATE_").map(|key| (key.to_string(), v)))
            .collect();
        Self {
            state_file: std::env::var_os("GITHUB_STATE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            restored,
        }
    }

    pub fn new(state_file: Option<PathBuf>) -> Self {
        Self {
            state_file,
            restored: HashMap::new(),
        }
    }

    /// Values the host restored for this step, keyed without the
    /// `STATE_` prefix.
    pub fn with_restored<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.restored
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

impl HandoffStore for HostStateStore {
    fn save(&self, key: &str, value: &str) -> Result<()> {
        match &self.state_file {
            Some(path) => append_file_command(path, key, value),
            None => {
                // Hosts without state files still understand the command form.
                println!("::save-state name={key}::{value}");
                Ok(())
            }
        }
    }

    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.restored.get(key).cloned())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HandoffDocument {
    version: u32,
    entries: BTreeMap<String, String>,
}

impl Default for HandoffDocument {
    fn default() -> Self {
        Self {
            version: HANDOFF_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// Versioned JSON document on disk, for hosts without native step state.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn read(&self) -> Result<HandoffDocument> {
        if !self.path.exists() {
            return Ok(HandoffDocument::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        let doc: HandoffDocument = serde_json::from_str(&raw)?;
        if doc.version != HANDOFF_VERSION {
            return Err(ReleaseError::StateStore(format!(
                "unsupported handoff version {} in {}",
                doc.version,
                self.path.display()
            )));
        }
        Ok(doc)
    }
}

impl HandoffStore for JsonFileStore {
    fn save(&self, key: &str, value: &str) -> Result<()> {
        let mut doc = self.read()?;
        doc.entries.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&doc)?)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.entries.get(key).cloned())
    }
}
