use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{Finding, Severity};
use crate::analysis::RootReport;
use crate::ir::Key;

/// Pass/fail decision over every analyzed root, after the ignore list and
/// severity overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub pass: bool,
    pub total_findings: usize,
    pub effective_findings: usize,
    pub highest_severity: Option<Severity>,
    pub fail_threshold: Severity,
    /// Roots that failed, in root order.
    #[serde(default)]
    pub failing_roots: Vec<Key>,
}

/// `[policy]` section of `.taskguard.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Minimum severity that fails a root.
    #[serde(default = "default_fail_on")]
    pub fail_on: Severity,
    /// Rule IDs to ignore entirely.
    #[serde(default)]
    pub ignore_rules: BTreeSet<String>,
    /// Per-rule severity overrides.
    #[serde(default)]
    pub overrides: BTreeMap<String, Severity>,
    /// Fail a root whose external collections are not all allow-listed,
    /// whatever the severity of its findings.
    #[serde(default)]
    pub fail_on_unverified: bool,
}

fn default_fail_on() -> Severity {
    Severity::High
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            fail_on: default_fail_on(),
            ignore_rules: BTreeSet::new(),
            overrides: BTreeMap::new(),
            fail_on_unverified: false,
        }
    }
}

impl Policy {
    /// Severity after overrides, or `None` for an ignored rule.
    fn effective_severity(&self, finding: &Finding) -> Option<Severity> {
        if self.ignore_rules.contains(&finding.rule_id) {
            return None;
        }
        Some(self.overrides.get(&finding.rule_id).copied().unwrap_or(finding.severity))
    }

    /// Filter findings: remove ignored rules, apply overrides.
    pub fn apply(&self, findings: &[Finding]) -> Vec<Finding> {
        findings
            .iter()
            .filter_map(|f| {
                let severity = self.effective_severity(f)?;
                let mut f = f.clone();
                f.severity = severity;
                Some(f)
            })
            .collect()
    }

    fn root_fails(&self, report: &RootReport) -> bool {
        let severe = report
            .findings
            .iter()
            .filter_map(|f| self.effective_severity(f))
            .any(|sev| sev >= self.fail_on);
        severe || (self.fail_on_unverified && !report.dependency.result)
    }

    /// Evaluate raw (unfiltered) root reports.
    pub fn evaluate(&self, reports: &[RootReport]) -> PolicyVerdict {
        let effective: Vec<Severity> = reports
            .iter()
            .flat_map(|r| r.findings.iter())
            .filter_map(|f| self.effective_severity(f))
            .collect();
        let failing_roots: Vec<Key> = reports
            .iter()
            .filter(|r| self.root_fails(r))
            .map(|r| r.root_key.clone())
            .collect();

        PolicyVerdict {
            pass: failing_roots.is_empty(),
            total_findings: reports.iter().map(|r| r.findings.len()).sum(),
            effective_findings: effective.len(),
            highest_severity: effective.iter().copied().max(),
            fail_threshold: self.fail_on,
            failing_roots,
        }
    }

    /// Evaluate `reports`, then rewrite each root's findings in place.
    pub fn enforce(&self, reports: &mut [RootReport]) -> PolicyVerdict {
        let verdict = self.evaluate(reports);
        for report in reports.iter_mut() {
            report.findings = self.apply(&report.findings);
        }
        verdict
    }
}
