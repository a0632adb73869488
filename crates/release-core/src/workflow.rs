//! Workflow host I/O: step outputs and file commands.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use crate::error::{ReleaseError, Result};

pub use release_remote::mask_secret;

pub const OUTPUT_DEPLOYMENT_STATUS: &str = "deployment-status";
pub const OUTPUT_TICKET_ID: &str = "ticket-id";
pub const OUTPUT_CHANGELOG_PATH: &str = "changelog-path";
pub const OUTPUT_CHANGELOG_JSON_PATH: &str = "changelog-json-path";

/// Receives the step outputs of a run.
pub trait OutputSink: Send + Sync {
    fn set_output(&self, name: &str, value: &str) -> Result<()>;
}

/// Writes outputs to the host's `GITHUB_OUTPUT` file.
///
/// Without an output file the values are only logged.
#[derive(Debug, Clone, Default)]
pub struct HostOutputs {
    output_file: Option<PathBuf>,
}

impl HostOutputs {
    pub fn new(output_file: Option<PathBuf>) -> Self {
        Self { output_file }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var_os("GITHUB_OUTPUT")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        )
    }
}

impl OutputSink for HostOutputs {
    fn set_output(&self, name: &str, value: &str) -> Result<()> {
        info!(output = name, value, "Setting output");
        match &self.output_file {
            Some(path) => append_file_command(path, name, value),
            None => Ok(()),
        }
    }
}

/// Append a `name<<delimiter` block to a host file command.
pub fn append_file_command(path: &Path, name: &str, value: &str) -> Result<()> {
    let delimiter = format!("ghadelimiter_{}", Uuid::new_v4());
    if name.contains(&delimiter) || value.contains(&delimiter) {
        return Err(ReleaseError::StateStore(format!(
            "unexpected delimiter in value of {name}"
        )));
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    write!(file, "{name}<<{delimiter}\n{value}\n{delimiter}\n")?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn parse_file_commands(text: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let mut lines = text.lines();
    while let Some(header) = lines.next() {
        let Some((name, delimiter)) = header.split_once("<<") else {
            continue;
        };
        let mut value = Vec::new();
        for line in lines.by_ref() {
            if line == delimiter {
                break;
            }
            value.push(line);
        }
        entries.push((name.to_string(), value.join("\n")));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_host_outputs_appends_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output");
        let outputs = HostOutputs::new(Some(path.clone()));

        outputs.set_output(OUTPUT_DEPLOYMENT_STATUS, "success").unwrap();
        outputs.set_output(OUTPUT_TICKET_ID, "T-1").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("deployment-status<<ghadelimiter_"));
        assert_eq!(
            parse_file_commands(&text),
            vec![
                ("deployment-status".to_string(), "success".to_string()),
                ("ticket-id".to_string(), "T-1".to_string()),
            ]
        );
    }

    #[test]
    fn test_multiline_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output");
        append_file_command(&path, "notes", "line one\nline two").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            parse_file_commands(&text),
            vec![("notes".to_string(), "line one\nline two".to_string())]
        );
    }

    #[test]
    fn test_without_output_file_is_noop() {
        assert!(HostOutputs::new(None).set_output("x", "y").is_ok());
    }
}
