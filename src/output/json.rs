use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::RootReport;
use crate::error::Result;
use crate::rules::policy::PolicyVerdict;
use crate::rules::Finding;
use crate::ScanReport;

#[derive(Serialize)]
struct JsonReport<'a> {
    tool: &'static str,
    version: &'static str,
    generated_at: DateTime<Utc>,
    target: &'a str,
    roots: &'a [RootReport],
    findings: &'a [Finding],
    verdict: &'a PolicyVerdict,
}

/// Render a scan report as a single pretty-printed JSON document.
pub fn render(report: &ScanReport) -> Result<String> {
    let doc = JsonReport {
        tool: "taskguard",
        version: env!("CARGO_PKG_VERSION"),
        generated_at: Utc::now(),
        target: &report.target_name,
        roots: &report.reports,
        findings: &report.findings,
        verdict: &report.verdict,
    };
    let json = serde_json::to_string_pretty(&doc)?;
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::test_support::{finding, report};
    use crate::rules::Severity;

    #[test]
    fn report_carries_roots_and_verdict() {
        let out = render(&report(vec![finding(
            "GUARD-003",
            Severity::High,
            "task role:app#taskfile:roles/app/tasks/main.yml#task:[0]",
        )]))
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["tool"], "taskguard");
        assert_eq!(value["roots"][0]["root_key"], "role role:app");
        assert_eq!(value["findings"][0]["rule_id"], "GUARD-003");
        assert_eq!(value["verdict"]["pass"], false);
        assert!(value["generated_at"].is_string());
    }
}
