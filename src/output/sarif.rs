use std::collections::BTreeMap;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::rules::{Finding, Severity};
use crate::ScanReport;

const FINGERPRINT_KEY: &str = "taskguardFinding/v1";

/// Render a scan report as SARIF 2.1.0.
///
/// Produces a self-contained SARIF log compatible with GitHub Code Scanning
/// and other SARIF consumers.
pub fn render(report: &ScanReport) -> Result<String> {
    let mut by_rule: BTreeMap<&str, &Finding> = BTreeMap::new();
    for finding in &report.findings {
        by_rule.entry(finding.rule_id.as_str()).or_insert(finding);
    }
    let rules: Vec<Value> = by_rule
        .values()
        .map(|finding| {
            let mut rule = json!({
                "id": finding.rule_id,
                "name": finding.rule_name,
                "shortDescription": { "text": finding.rule_name },
                "defaultConfiguration": {
                    "level": severity_to_sarif_level(finding.severity),
                },
            });
            if let Some(cwe) = &finding.cwe_id {
                rule["properties"] = json!({
                    "tags": [cwe, finding.attack_category.to_string()],
                });
            }
            rule
        })
        .collect();

    let results: Vec<Value> = report.findings.iter().map(result_of).collect();

    let sarif = json!({
        "$schema": "https://docs.oasis-open.org/sarif/sarif/v2.1.0/errata01/os/schemas/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "taskguard",
                    "version": env!("CARGO_PKG_VERSION"),
                    "semanticVersion": env!("CARGO_PKG_VERSION"),
                    "rules": rules,
                },
            },
            "results": results,
            "automationDetails": {
                "id": format!("taskguard/{}/", report.target_name),
                "guid": uuid::Uuid::new_v4().to_string(),
            },
        }],
    });

    let output = serde_json::to_string_pretty(&sarif)?;
    Ok(output)
}

fn result_of(f: &Finding) -> Value {
    let mut result = json!({
        "ruleId": f.rule_id,
        "level": severity_to_sarif_level(f.severity),
        "message": { "text": f.message },
        "partialFingerprints": { (FINGERPRINT_KEY): fingerprint(f) },
    });

    if let Some(loc) = &f.location {
        let mut physical = json!({
            "artifactLocation": { "uri": loc.file },
        });
        if let Some(line) = loc.line {
            physical["region"] = json!({ "startLine": line });
        }
        result["locations"] = json!([{
            "physicalLocation": physical,
            "logicalLocations": [{ "fullyQualifiedName": loc.key.as_str() }],
        }]);
    }

    if let Some(remediation) = &f.remediation {
        result["fixes"] = json!([{
            "description": { "text": remediation },
        }]);
    }

    result
}

/// Stable across runs: rule ID plus the keys of the correlated tasks.
fn fingerprint(f: &Finding) -> String {
    let mut hasher = Sha256::new();
    hasher.update(f.rule_id.as_bytes());
    for key in &f.related_tasks {
        hasher.update(b"\n");
        hasher.update(key.as_str().as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn severity_to_sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low | Severity::Info => "note",
    }
}
