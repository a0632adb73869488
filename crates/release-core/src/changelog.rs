//! Changelog discovery and comment formatting.
//!
//! The deployment engine writes changelog artifacts (markdown and JSON)
//! under an output directory, possibly one subdirectory per domain.
//! [`locate`] finds them; [`format_changelog_comment`] turns the markdown
//! into the body of the status comment.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

/// Placed between concatenated markdown fragments.
pub const FRAGMENT_SEPARATOR: &str = "\n\n---\n\n";

/// Artifacts found under the changelog output directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangelogArtifacts {
    /// Newest markdown file. `content` may span more files than this one.
    pub markdown_path: Option<PathBuf>,
    /// Newest JSON file.
    pub json_path: Option<PathBuf>,
    /// All markdown text, newest first.
    pub content: Option<String>,
}

impl ChangelogArtifacts {
    pub fn is_empty(&self) -> bool {
        self.markdown_path.is_none() && self.json_path.is_none() && self.content.is_none()
    }
}

/// Status shown in the changelog comment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangelogStatus {
    Success,
    Partial,
    /// Not produced by the orchestrator, which reports a failed deploy as
    /// `Partial`. Available to callers rendering their own comments.
    Failed,
    DryRun,
}

impl ChangelogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangelogStatus::Success => "success",
            ChangelogStatus::Partial => "partial",
            ChangelogStatus::Failed => "failed",
            ChangelogStatus::DryRun => "dry-run",
        }
    }

    fn emoji(&self) -> &'static str {
        match self {
            ChangelogStatus::Success => "\u{2705}",
            ChangelogStatus::Partial => "\u{26a0}\u{fe0f}",
            ChangelogStatus::Failed => "\u{274c}",
            ChangelogStatus::DryRun => "\u{1f4dd}",
        }
    }

    fn headline(&self) -> &'static str {
        match self {
            ChangelogStatus::Success => "Completed Successfully",
            ChangelogStatus::Partial => "Partially Completed",
            ChangelogStatus::Failed => "Failed",
            ChangelogStatus::DryRun => "Dry Run Preview",
        }
    }
}

impl fmt::Display for ChangelogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Found {
    path: PathBuf,
    modified: SystemTime,
}

/// Find changelog artifacts under `root`.
///
/// Never fails: a missing directory or any I/O error during the walk
/// yields an empty result.
pub fn locate(root: &Path) -> ChangelogArtifacts {
    match try_locate(root) {
        Ok(artifacts) => artifacts,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "Changelog discovery failed");
            ChangelogArtifacts::default()
        }
    }
}

fn try_locate(root: &Path) -> std::io::Result<ChangelogArtifacts> {
    if !root.is_dir() {
        return Ok(ChangelogArtifacts::default());
    }

    let mut markdown = Vec::new();
    let mut json = Vec::new();
    walk(root, &mut markdown, &mut json)?;

    // Stable sort keeps walk order for equal timestamps.
    markdown.sort_by(|a, b| b.modified.cmp(&a.modified));
    json.sort_by(|a, b| b.modified.cmp(&a.modified));

    let content = match markdown.len() {
        0 => None,
        1 => Some(fs::read_to_string(&markdown[0].path)?),
        _ => {
            let fragments = markdown
                .iter()
                .map(|f| fs::read_to_string(&f.path))
                .collect::<std::io::Result<Vec<_>>>()?;
            Some(fragments.join(FRAGMENT_SEPARATOR))
        }
    };

    Ok(ChangelogArtifacts {
        markdown_path: markdown.first().map(|f| f.path.clone()),
        json_path: json.first().map(|f| f.path.clone()),
        content,
    })
}

/// Depth-first, subdirectories before files, names sorted.
fn walk(dir: &Path, markdown: &mut Vec<Found>, json: &mut Vec<Found>) -> std::io::Result<()> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    dirs.sort();
    files.sort();

    for sub in dirs {
        walk(&sub, markdown, json)?;
    }

    for path in files {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let bucket = if ext.eq_ignore_ascii_case("md") {
            &mut *markdown
        } else if ext.eq_ignore_ascii_case("json") {
            &mut *json
        } else {
            continue;
        };
        let modified = fs::metadata(&path)?.modified()?;
        bucket.push(Found { path, modified });
    }
    Ok(())
}

/// Marker identifying the status comment for one environment.
pub fn comment_marker(environment: &str) -> String {
    format!("<!-- release-domains:{environment} -->")
}

/// Render the status comment body.
pub fn format_changelog_comment(
    content: Option<&str>,
    status: ChangelogStatus,
    release_candidates: &str,
    environment: &str,
    updated_at: DateTime<Utc>,
) -> String {
    let content = content
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("_No changelog was generated for this release._");

    format!(
        "## {emoji} Release {headline}\n\
         \n\
         **Environment:** `{environment}`\n\
         **Release Candidates:** `{release_candidates}`\n\
         **Updated:** {timestamp}\n\
         \n\
         ---\n\
         \n\
         {content}\n\
         \n\
         ---\n\
         <sub>Generated by release-domains</sub>",
        emoji = status.emoji(),
        headline = status.headline(),
        timestamp = updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}
