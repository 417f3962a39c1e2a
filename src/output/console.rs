use crate::analysis::RootReport;
use crate::rules::{Finding, Severity};
use crate::ScanReport;

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "[CRITICAL]",
        Severity::High => "[HIGH]    ",
        Severity::Medium => "[MEDIUM]  ",
        Severity::Low => "[LOW]     ",
        Severity::Info => "[INFO]    ",
    }
}

fn render_finding(output: &mut String, finding: &Finding) {
    let location = finding
        .location
        .as_ref()
        .map(|l| match l.line {
            Some(line) => format!("{}:{}", l.file, line),
            None => l.file.clone(),
        })
        .unwrap_or_else(|| "-".into());

    output.push_str(&format!(
        "    {} {} {}\n",
        severity_tag(finding.severity),
        finding.rule_id,
        finding.message
    ));
    output.push_str(&format!("               at {}\n", location));
    for evidence in &finding.evidence {
        output.push_str(&format!("               - {}\n", evidence.description));
    }
    if let Some(remediation) = &finding.remediation {
        output.push_str(&format!("               fix: {}\n", remediation));
    }
}

fn render_root(output: &mut String, root: &RootReport) {
    output.push_str(&format!(
        "  {} ({} task(s))\n",
        root.root_key,
        root.tasks.len()
    ));

    let mut sorted: Vec<&Finding> = root.findings.iter().collect();
    sorted.sort_by(|a, b| b.severity.cmp(&a.severity));
    for finding in sorted {
        render_finding(output, finding);
    }

    if !root.dependency.result {
        output.push_str(&format!(
            "    dependencies: unverified {}\n",
            root.dependency.unverified.join(", ")
        ));
    }
    for miss in &root.unresolved {
        let hint = if miss.possible_candidates.is_empty() {
            String::new()
        } else {
            format!(" (did you mean {}?)", miss.possible_candidates.join(", "))
        };
        output.push_str(&format!("    unresolved: {}{}\n", miss.reference, hint));
    }
    output.push('\n');
}

/// Render a scan report as console text, one section per root.
pub fn render(report: &ScanReport) -> String {
    let mut output = String::new();

    if report.reports.is_empty() {
        output.push_str("\n  No entry points found.\n\n");
        return output;
    }

    if report.findings.is_empty() {
        output.push_str(&format!(
            "\n  No risk findings in {} entry point(s).\n\n",
            report.reports.len()
        ));
    } else {
        output.push_str(&format!(
            "\n  {} finding(s) across {} entry point(s):\n\n",
            report.findings.len(),
            report.reports.len()
        ));
    }

    for root in report
        .reports
        .iter()
        .filter(|r| !r.findings.is_empty() || !r.dependency.result || !r.unresolved.is_empty())
    {
        render_root(&mut output, root);
    }

    let verdict = &report.verdict;
    let status = if verdict.pass { "PASS" } else { "FAIL" };
    output.push_str(&format!(
        "  Result: {} (threshold: {}, highest: {})\n\n",
        status,
        verdict.fail_threshold,
        verdict
            .highest_severity
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".into()),
    ));
    for key in &verdict.failing_roots {
        output.push_str(&format!("    failed: {key}\n"));
    }
    if !verdict.failing_roots.is_empty() {
        output.push('\n');
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::test_support::{finding, report};

    #[test]
    fn findings_are_grouped_under_their_root() {
        let out = render(&report(vec![finding(
            "GUARD-001",
            Severity::Critical,
            "task role:app#taskfile:roles/app/tasks/main.yml#task:[1]",
        )]));
        assert!(out.contains("role role:app (0 task(s))"));
        assert!(out.contains("[CRITICAL] GUARD-001"));
        assert!(out.contains("roles/app/tasks/main.yml:4"));
        assert!(out.contains("Result: FAIL"));
        assert!(out.contains("failed: role role:app"));
    }

    #[test]
    fn clean_report_passes() {
        let out = render(&report(Vec::new()));
        assert!(out.contains("No risk findings in 1 entry point(s)"));
        assert!(out.contains("Result: PASS"));
    }
}
