use super::injectable_fields;
use crate::analysis::walk::ResolvedTree;
use crate::extract::Category;
use crate::rules::{AttackCategory, Detector, Finding, RuleMetadata, Severity};

/// GUARD-005: Command Injection Surface
///
/// A command whose text interpolates caller-overridable variables.
pub struct CommandInjectionDetector;

impl Detector for CommandInjectionDetector {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "GUARD-005".into(),
            name: "Command Injection Surface".into(),
            description: "Command text interpolates variables a caller can override".into(),
            default_severity: Severity::High,
            attack_category: AttackCategory::CommandInjection,
            cwe_id: Some("CWE-78".into()),
        }
    }

    fn run(&self, tree: &ResolvedTree) -> Vec<Finding> {
        let mut findings = injectable_fields(
            tree,
            &self.metadata(),
            Category::CmdExec,
            &["cmd"],
            |_, raw| format!("Command '{raw}' interpolates overridable variables"),
        );
        for f in &mut findings {
            f.remediation = Some(
                "Quote interpolated values (`| quote`) or pass arguments through `argv`.".into(),
            );
        }
        findings
    }
}
