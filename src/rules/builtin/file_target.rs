use super::injectable_fields;
use crate::analysis::walk::ResolvedTree;
use crate::extract::Category;
use crate::rules::{AttackCategory, Detector, Finding, RuleMetadata, Severity};

/// GUARD-006: Mutable File Target
///
/// A file change whose target path comes from caller-overridable
/// variables.
pub struct FileTargetDetector;

impl Detector for FileTargetDetector {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "GUARD-006".into(),
            name: "Mutable File Target".into(),
            description: "File change target path can be redirected by overriding a variable".into(),
            default_severity: Severity::Medium,
            attack_category: AttackCategory::ArbitraryFileWrite,
            cwe_id: Some("CWE-73".into()),
        }
    }

    fn run(&self, tree: &ResolvedTree) -> Vec<Finding> {
        let mut findings = injectable_fields(
            tree,
            &self.metadata(),
            Category::FileChange,
            &["dest", "file"],
            |field, raw| format!("File {field} '{raw}' depends on overridable variables"),
        );
        for f in &mut findings {
            f.remediation = Some("Keep target paths fixed or validate them with `assert`.".into());
        }
        findings
    }
}
