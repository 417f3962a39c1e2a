pub mod console;
pub mod json;
pub mod jsonl;
pub mod sarif;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ScanReport;

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Console,
    Json,
    Jsonl,
    Sarif,
}

impl OutputFormat {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "console" | "text" => Some(Self::Console),
            "json" => Some(Self::Json),
            "jsonl" | "ndjson" | "json-lines" => Some(Self::Jsonl),
            "sarif" => Some(Self::Sarif),
            _ => None,
        }
    }
}

/// Render a scan report into the specified format.
pub fn render(report: &ScanReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Console => Ok(console::render(report)),
        OutputFormat::Json => json::render(report),
        OutputFormat::Jsonl => jsonl::render(report),
        OutputFormat::Sarif => sarif::render(report),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::analysis::RootReport;
    use crate::ir::{Key, SourceLocation};
    use crate::rules::DependencyVerdict;
    use crate::rules::policy::Policy;
    use crate::rules::{AttackCategory, Confidence, Finding, Severity};
    use crate::ScanReport;

    pub fn finding(rule_id: &str, severity: Severity, task: &str) -> Finding {
        let key = Key::parse(task).unwrap();
        Finding {
            rule_id: rule_id.into(),
            rule_name: "Download And Execute".into(),
            severity,
            confidence: Confidence::High,
            attack_category: AttackCategory::RemoteCodeExecution,
            message: "downloaded file is executed".into(),
            location: Some(SourceLocation {
                file: "roles/app/tasks/main.yml".into(),
                line: Some(4),
                key: key.clone(),
            }),
            evidence: Vec::new(),
            related_tasks: vec![key],
            remediation: Some("verify checksums".into()),
            cwe_id: Some("CWE-494".into()),
        }
    }

    pub fn report(findings: Vec<Finding>) -> ScanReport {
        let mut reports = vec![RootReport {
            root_key: Key::parse("role role:app").unwrap(),
            tasks: Vec::new(),
            findings: findings.clone(),
            dependency: DependencyVerdict {
                result: true,
                unverified: Vec::new(),
                guidance: String::new(),
            },
            unresolved: Vec::new(),
            dependent_collections: Vec::new(),
        }];
        let verdict = Policy::default().enforce(&mut reports);
        ScanReport {
            target_name: "site".into(),
            reports,
            findings,
            verdict,
        }
    }
}
