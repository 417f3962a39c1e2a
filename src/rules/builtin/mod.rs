mod command_injection;
mod download_exec;
pub mod external_dependency;
mod file_target;
mod mutable_transfer;

use std::collections::BTreeSet;

use super::{Detector, Evidence, Finding, RuleMetadata};
use crate::analysis::walk::ResolvedTree;
use crate::extract::Category;
use crate::ir::SourceLocation;

/// Returns all built-in detectors. `allow` is the collection allow-list
/// for the dependency check.
pub fn all_detectors(allow: &BTreeSet<String>) -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(download_exec::DownloadExecDetector),
        Box::new(external_dependency::ExternalDependencyDetector::new(allow.clone())),
        Box::new(mutable_transfer::MutableSourceDetector),
        Box::new(mutable_transfer::MutableDestinationDetector),
        Box::new(command_injection::CommandInjectionDetector),
        Box::new(file_target::FileTargetDetector),
    ]
}

/// One finding per task effect of `category` whose `fields` carry
/// unresolved, caller-overridable variables.
fn injectable_fields(
    tree: &ResolvedTree,
    meta: &RuleMetadata,
    category: Category,
    fields: &[&str],
    describe: impl Fn(&str, &str) -> String,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for resolved in &tree.tasks {
        for effect in resolved.findings.iter().filter(|f| f.category == category) {
            if !effect.injection_risk {
                continue;
            }
            for &field in fields {
                let vars = effect.mutable_vars_of(field);
                if vars.is_empty() {
                    continue;
                }
                let raw = effect.data.get_str(field).unwrap_or_default();
                let location = SourceLocation::of_task(&resolved.task);
                let mut finding = meta.finding(describe(field, raw), Some(location.clone()));
                finding.evidence.push(Evidence {
                    description: format!(
                        "'{}' is built from caller-overridable variables: {}",
                        field,
                        vars.join(", ")
                    ),
                    location: Some(location),
                    snippet: Some(raw.to_string()),
                });
                finding.related_tasks.push(resolved.task.key.clone());
                findings.push(finding);
            }
        }
    }
    findings
}
