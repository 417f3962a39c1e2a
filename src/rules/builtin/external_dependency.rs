use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::analysis::supply_chain::{check_typosquats, dependent_collections};
use crate::analysis::walk::ResolvedTree;
use crate::ir::{ExecutableType, SourceLocation};
use crate::resolver::owning_collection;
use crate::rules::{
    AttackCategory, Confidence, Detector, Evidence, Finding, RuleMetadata, Severity,
};

/// Pass/fail of the external dependency check for one tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyVerdict {
    /// `true` iff every external collection is allow-listed.
    pub result: bool,
    pub unverified: Vec<String>,
    pub guidance: String,
}

/// GUARD-002: Unverified Dependency
///
/// Flags every collection outside `ansible.builtin` that module tasks
/// resolve into and that is not on the allow-list.
pub struct ExternalDependencyDetector {
    allow: BTreeSet<String>,
}

impl ExternalDependencyDetector {
    pub fn new(allow: BTreeSet<String>) -> Self {
        Self { allow }
    }

    fn unverified(&self, tree: &ResolvedTree) -> Vec<String> {
        dependent_collections(&tree.tasks)
            .into_iter()
            .filter(|c| !self.allow.contains(c))
            .collect()
    }

    pub fn verify(&self, tree: &ResolvedTree) -> DependencyVerdict {
        let unverified = self.unverified(tree);
        let guidance = if unverified.is_empty() {
            String::new()
        } else {
            format!(
                "Review these collections and add them to [dependencies].allow once trusted: {}",
                unverified.join(", ")
            )
        };
        DependencyVerdict {
            result: unverified.is_empty(),
            unverified,
            guidance,
        }
    }
}

impl Detector for ExternalDependencyDetector {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "GUARD-002".into(),
            name: "Unverified Dependency".into(),
            description: "Uses modules from a collection that is not on the allow-list".into(),
            default_severity: Severity::Medium,
            attack_category: AttackCategory::SupplyChain,
            cwe_id: Some("CWE-829".into()),
        }
    }

    fn run(&self, tree: &ResolvedTree) -> Vec<Finding> {
        let meta = self.metadata();
        let unverified = self.unverified(tree);
        let hints = check_typosquats(&unverified);

        let mut findings = Vec::new();
        for collection in &unverified {
            let users: Vec<_> = tree
                .tasks
                .iter()
                .filter(|t| t.task.executable_type == ExecutableType::Module)
                .filter(|t| owning_collection(&t.task.resolved_name).as_deref() == Some(collection.as_str()))
                .collect();
            let location = users.first().map(|t| SourceLocation::of_task(&t.task));
            let mut finding = meta.finding(
                format!("Collection '{collection}' is used but not allow-listed"),
                location,
            );
            for user in &users {
                finding.evidence.push(Evidence {
                    description: format!("Task uses '{}'", user.task.resolved_name),
                    location: Some(SourceLocation::of_task(&user.task)),
                    snippet: None,
                });
            }
            for hint in hints.iter().filter(|h| &h.collection == collection) {
                finding.confidence = Confidence::Medium;
                finding.severity = Severity::High;
                finding.evidence.push(Evidence {
                    description: format!(
                        "Name is similar to well-known collection '{}' (edit distance {})",
                        hint.similar_to, hint.distance
                    ),
                    location: None,
                    snippet: None,
                });
            }
            finding.related_tasks = users.iter().map(|t| t.task.key.clone()).collect();
            finding.remediation = Some(format!(
                "Verify the publisher of '{collection}' and add it to [dependencies].allow."
            ));
            findings.push(finding);
        }
        findings
    }
}
