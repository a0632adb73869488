//! Release definition edits.
//!
//! A release definition is line-oriented `package: version` text. Edits are
//! applied by a two-pass line transformer: the first pass decides what
//! happens to each line, the second emits the result and drops every
//! whitespace-only line. The document structure is never parsed, so a
//! package name matches every line that starts with `<name>:` regardless of
//! which section it sits in.

/// Pin a package to a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOverride {
    pub name: String,
    pub version: String,
}

impl PackageOverride {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Exclusions and overrides requested for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionEdit {
    pub excludes: Vec<String>,
    pub overrides: Vec<PackageOverride>,
}

impl DefinitionEdit {
    pub fn is_empty(&self) -> bool {
        self.excludes.is_empty() && self.overrides.is_empty()
    }

    /// Apply the edit to `text`.
    pub fn apply(&self, text: &str) -> String {
        mutate(text, &self.excludes, &self.overrides)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineAction<'a> {
    Keep,
    Drop,
    Replace { indent: &'a str, with: &'a PackageOverride },
}

/// Remove excluded package lines, rewrite overridden ones, then strip
/// whitespace-only lines.
///
/// Exclusions win over overrides. When several overrides name the same
/// package the last one wins. Indentation and line endings are preserved.
pub fn mutate(text: &str, excludes: &[String], overrides: &[PackageOverride]) -> String {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();

    let actions: Vec<LineAction<'_>> = lines
        .iter()
        .map(|line| classify(strip_ending(line).0, excludes, overrides))
        .collect();

    let mut out = String::with_capacity(text.len());
    for (line, action) in lines.iter().zip(actions) {
        let (content, ending) = strip_ending(line);
        let emitted = match action {
            LineAction::Drop => continue,
            LineAction::Keep => content.to_string(),
            LineAction::Replace { indent, with } => {
                format!("{indent}{}: {}", with.name, with.version)
            }
        };
        if emitted.trim().is_empty() && !ending.is_empty() {
            continue;
        }
        out.push_str(&emitted);
        out.push_str(ending);
    }
    out
}

fn classify<'a>(
    content: &'a str,
    excludes: &[String],
    overrides: &'a [PackageOverride],
) -> LineAction<'a> {
    if excludes.iter().any(|name| declares(content, name)) {
        return LineAction::Drop;
    }
    match overrides.iter().rev().find(|o| declares(content, &o.name)) {
        Some(with) => LineAction::Replace {
            indent: leading_whitespace(content),
            with,
        },
        None => LineAction::Keep,
    }
}

/// Whether the line, after its indentation, starts with `<name>:`.
fn declares(content: &str, name: &str) -> bool {
    content
        .trim_start()
        .strip_prefix(name)
        .is_some_and(|rest| rest.starts_with(':'))
}

fn leading_whitespace(content: &str) -> &str {
    let end = content
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(content.len(), |(i, _)| i);
    &content[..end]
}

/// Split a line into content and its `\n` / `\r\n` terminator.
fn strip_ending(line: &str) -> (&str, &str) {
    if let Some(content) = line.strip_suffix("\r\n") {
        (content, "\r\n")
    } else if let Some(content) = line.strip_suffix('\n') {
        (content, "\n")
    } else {
        (line, "")
    }
}
