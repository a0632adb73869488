//! Framed header and summary blocks written to the job log.

use tracing::info;

use crate::inputs::ReleaseInputs;

const RULE_WIDTH: usize = 90;
const PRODUCT: &str = "release-domains";

fn rule() -> String {
    "-".repeat(RULE_WIDTH)
}

fn banner(lines: &mut Vec<String>, action: &str) {
    lines.push(rule());
    lines.push(format!("{PRODUCT}  -Version:{}", env!("CARGO_PKG_VERSION")));
    lines.push(rule());
    lines.push(format!("Action        : {action}"));
}

fn edit_lines(lines: &mut Vec<String>, inputs: &ReleaseInputs, exclude: &str, overrides: &str) {
    if !inputs.edit.excludes.is_empty() {
        lines.push(format!("{exclude}: {}", inputs.edit.excludes.join(",")));
    }
    if !inputs.edit.overrides.is_empty() {
        let rendered: Vec<String> = inputs
            .edit
            .overrides
            .iter()
            .map(|o| format!("{}={}", o.name, o.version))
            .collect();
        lines.push(format!("{overrides}: {}", rendered.join(",")));
    }
}

/// Header logged before the main phase starts.
pub fn render_header(inputs: &ReleaseInputs) -> Vec<String> {
    let mut lines = Vec::new();
    banner(&mut lines, PRODUCT);
    lines.push(format!("Repository    : {}", inputs.repository));
    lines.push(format!("Environment   : {}", inputs.environment));
    lines.push(format!(
        "Release Candidates: {}",
        inputs.release_candidates_label()
    ));
    lines.push(format!("Domains       : {}", inputs.domains_label()));
    lines.push(format!("SFP Server    : {}", inputs.server.url));
    lines.push(format!("Lock          : {}", inputs.lock.enabled));
    edit_lines(&mut lines, inputs, "Exclude       ", "Override      ");
    if inputs.dry_run {
        lines.push("Mode          : DRY-RUN".to_string());
    }
    lines.push(rule());
    lines
}

/// Summary logged once the main phase finishes.
pub fn render_summary(inputs: &ReleaseInputs, status: &str) -> Vec<String> {
    let mut lines = vec![rule(), "Release Summary".to_string(), rule()];
    lines.push(format!("Environment   : {}", inputs.environment));
    lines.push(format!(
        "Release       : {}",
        inputs.release_candidates_label()
    ));
    lines.push(format!("Domains       : {}", inputs.domains_label()));
    edit_lines(&mut lines, inputs, "Excluded      ", "Overrides     ");
    lines.push(format!("Status        : {status}"));
    lines.push(rule());
    lines
}

/// Header logged by the cleanup phase.
pub fn render_cleanup_header(environment: &str, server_url: &str) -> Vec<String> {
    let mut lines = Vec::new();
    banner(&mut lines, &format!("{PRODUCT} (cleanup)"));
    lines.push(format!("Environment   : {environment}"));
    lines.push(format!("SFP Server    : {server_url}"));
    lines.push(rule());
    lines
}

pub fn log_block(lines: &[String]) {
    for line in lines {
        info!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostContext;
    use crate::inputs::RawInputs;

    fn inputs(dry_run: bool, excludes: Option<&str>) -> ReleaseInputs {
        ReleaseInputs::resolve(
            RawInputs {
                sfp_server_url: "https://sfp.example.com".to_string(),
                sfp_server_token: "srv-token".to_string(),
                environment: "uat".to_string(),
                release_candidates: "core:RC-1".to_string(),
                repository: Some("org/repo".to_string()),
                exclude_packages: excludes.map(str::to_string),
                dry_run,
                ..RawInputs::default()
            },
            &HostContext::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_header_is_framed() {
        let lines = render_header(&inputs(false, None));
        assert_eq!(lines.first().map(String::len), Some(RULE_WIDTH));
        assert_eq!(lines.last(), lines.first());
        assert!(lines.iter().any(|l| l == "Environment   : uat"));
        assert!(lines.iter().any(|l| l == "Release Candidates: core:RC-1"));
        assert!(!lines.iter().any(|l| l.contains("DRY-RUN")));
        assert!(!lines.iter().any(|l| l.contains("srv-token")));
    }

    #[test]
    fn test_header_dry_run_and_excludes() {
        let lines = render_header(&inputs(true, Some("pkgA,pkgB")));
        assert!(lines.iter().any(|l| l == "Mode          : DRY-RUN"));
        assert!(lines.iter().any(|l| l == "Exclude       : pkgA,pkgB"));
    }

    #[test]
    fn test_summary_reports_status() {
        let lines = render_summary(&inputs(false, Some("pkgA")), "failed");
        assert_eq!(lines[1], "Release Summary");
        assert!(lines.iter().any(|l| l == "Status        : failed"));
        assert!(lines.iter().any(|l| l == "Excluded      : pkgA"));
    }

    #[test]
    fn test_cleanup_header() {
        let lines = render_cleanup_header("uat", "https://sfp.example.com");
        assert!(lines.iter().any(|l| l == "Action        : release-domains (cleanup)"));
        assert!(lines.iter().any(|l| l == "SFP Server    : https://sfp.example.com"));
    }
}
