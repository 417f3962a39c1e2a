use super::injectable_fields;
use crate::analysis::walk::ResolvedTree;
use crate::extract::Category;
use crate::rules::{AttackCategory, Detector, Finding, RuleMetadata, Severity};

/// GUARD-003: Mutable Download Source
///
/// An inbound transfer whose source is assembled from variables a caller
/// can override (role defaults, inventory, facts).
pub struct MutableSourceDetector;

impl Detector for MutableSourceDetector {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "GUARD-003".into(),
            name: "Mutable Download Source".into(),
            description: "Download source can be redirected by overriding a variable".into(),
            default_severity: Severity::High,
            attack_category: AttackCategory::UntrustedTransfer,
            cwe_id: Some("CWE-494".into()),
        }
    }

    fn run(&self, tree: &ResolvedTree) -> Vec<Finding> {
        let mut findings = injectable_fields(
            tree,
            &self.metadata(),
            Category::InboundTransfer,
            &["src"],
            |_, raw| format!("Download source '{raw}' depends on overridable variables"),
        );
        for f in &mut findings {
            f.remediation = Some("Hard-code the download URL or validate it with a checksum.".into());
        }
        findings
    }
}

/// GUARD-004: Mutable Upload Destination
pub struct MutableDestinationDetector;

impl Detector for MutableDestinationDetector {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "GUARD-004".into(),
            name: "Mutable Upload Destination".into(),
            description: "Outbound transfer target can be redirected by overriding a variable".into(),
            default_severity: Severity::High,
            attack_category: AttackCategory::DataExfiltration,
            cwe_id: Some("CWE-200".into()),
        }
    }

    fn run(&self, tree: &ResolvedTree) -> Vec<Finding> {
        let mut findings = injectable_fields(
            tree,
            &self.metadata(),
            Category::OutboundTransfer,
            &["dest"],
            |_, raw| format!("Upload destination '{raw}' depends on overridable variables"),
        );
        for f in &mut findings {
            f.remediation = Some("Send data only to fixed, reviewed endpoints.".into());
        }
        findings
    }
}
