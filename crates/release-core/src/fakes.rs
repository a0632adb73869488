//! In-memory fakes for the command, handoff and output seams (testing only)
//!
//! Provides `ScriptedRunner`, `MemoryHandoffStore` and `MemoryOutputs`,
//! which satisfy the trait contracts without processes or host files.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ReleaseError, Result};
use crate::handoff::HandoffStore;
use crate::runner::{CommandOutput, CommandRunner, RunOptions};
use crate::workflow::OutputSink;

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// One command seen by [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    pub silent: bool,
    /// Content of the file named by a captured flag, read at call time.
    pub file_content: Option<String>,
}

impl RecordedCall {
    /// Arguments joined by spaces.
    pub fn command_line(&self) -> String {
        self.args.join(" ")
    }

    /// Value following `flag`, if present.
    pub fn flag(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

#[derive(Debug, Clone)]
struct Script {
    prefix: String,
    output: CommandOutput,
    writes: Option<(String, String)>,
}

/// Command runner that answers from a script instead of spawning processes.
///
/// A call is matched against the scripts by subcommand prefix
/// (`"server environment lock"`); the most recently added match wins.
/// Unmatched calls succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<Vec<Script>>,
    captures: Mutex<Vec<(String, String)>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer calls starting with `prefix` with the given exit code and output.
    pub fn on(&self, prefix: &str, exit_code: i32, stdout: &str, stderr: &str) -> &Self {
        self.push(Script {
            prefix: prefix.to_string(),
            output: CommandOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            },
            writes: None,
        })
    }

    /// Like [`ScriptedRunner::on`] with exit code 0, additionally writing
    /// `content` to the path passed after `flag`.
    pub fn on_writing(&self, prefix: &str, flag: &str, content: &str) -> &Self {
        self.push(Script {
            prefix: prefix.to_string(),
            output: CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            },
            writes: Some((flag.to_string(), content.to_string())),
        })
    }

    /// Record the content of the file passed after `flag` on calls
    /// starting with `prefix`.
    pub fn capture_file(&self, prefix: &str, flag: &str) -> &Self {
        self.captures
            .lock()
            .unwrap()
            .push((prefix.to_string(), flag.to_string()));
        self
    }

    fn push(&self, script: Script) -> &Self {
        self.scripts.lock().unwrap().push(script);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose arguments start with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.command_line().starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &RunOptions,
    ) -> Result<CommandOutput> {
        let mut call = RecordedCall {
            program: program.to_string(),
            args: args.to_vec(),
            silent: options.silent,
            file_content: None,
        };
        let line = call.command_line();
        let capture_flag = self
            .captures
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, flag)| flag.clone());
        if let Some(flag) = capture_flag {
            let content = call
                .flag(&flag)
                .and_then(|path| std::fs::read_to_string(path).ok());
            call.file_content = content;
        }
        self.calls.lock().unwrap().push(call.clone());

        let script = self
            .scripts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| line.starts_with(s.prefix.as_str()))
            .cloned();

        let Some(script) = script else {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            });
        };

        if let Some((flag, content)) = &script.writes {
            let path = call.flag(flag).map(PathBuf::from).ok_or_else(|| {
                ReleaseError::Validation(format!("scripted call is missing {flag}"))
            })?;
            std::fs::write(path, content)?;
        }

        if !options.ignore_return_code && !script.output.success() {
            return Err(ReleaseError::CommandFailed {
                program: program.to_string(),
                exit_code: script.output.exit_code,
                detail: script.output.failure_detail(),
            });
        }
        Ok(script.output)
    }
}

// ---------------------------------------------------------------------------
// MemoryHandoffStore
// ---------------------------------------------------------------------------

/// Handoff store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryHandoffStore {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: bool,
}

impl MemoryHandoffStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose writes always fail.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl HandoffStore for MemoryHandoffStore {
    fn save(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes {
            return Err(ReleaseError::StateStore(format!("cannot write {key}")));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }
}

// ---------------------------------------------------------------------------
// MemoryOutputs
// ---------------------------------------------------------------------------

/// Output sink that keeps the last value per output name.
#[derive(Debug, Default)]
pub struct MemoryOutputs {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values.lock().unwrap().get(name).cloned()
    }

    pub fn all(&self) -> BTreeMap<String, String> {
        self.values.lock().unwrap().clone()
    }
}

impl OutputSink for MemoryOutputs {
    fn set_output(&self, name: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_runner_latest_match_wins() {
        let runner = ScriptedRunner::new();
        runner
            .on("release", 1, "", "first")
            .on("release", 0, "second", "");

        let out = runner
            .run("sfp", &["release".to_string()], &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(out.stdout, "second");
    }

    #[tokio::test]
    async fn test_scripted_runner_defaults_to_success() {
        let runner = ScriptedRunner::new();
        let out = runner
            .run("sfp", &["org".to_string(), "login".to_string()], &RunOptions::silent())
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(runner.calls_to("org login").len(), 1);
        assert!(runner.calls()[0].silent);
    }

    #[tokio::test]
    async fn test_scripted_runner_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("def.yml");
        let runner = ScriptedRunner::new();
        runner.on_writing("releasecandidate fetch", "-o", "pkgA: 1\n");

        let args = vec![
            "releasecandidate".to_string(),
            "fetch".to_string(),
            "-o".to_string(),
            target.display().to_string(),
        ];
        runner.run("sfp", &args, &RunOptions::default()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "pkgA: 1\n");
    }

    #[test]
    fn test_failing_store() {
        let store = MemoryHandoffStore::failing();
        assert!(store.save("K", "v").is_err());
        assert!(store.is_empty());
    }
}
