pub mod builtin;
pub mod finding;
pub mod policy;

use std::collections::BTreeSet;

use crate::analysis::walk::ResolvedTree;

pub use builtin::external_dependency::{DependencyVerdict, ExternalDependencyDetector};
pub use finding::{AttackCategory, Confidence, Evidence, Finding, RuleMetadata, Severity};

/// A detector checks one resolved tree and produces findings.
pub trait Detector: Send + Sync {
    /// Metadata about this rule (id, name, severity, CWE).
    fn metadata(&self) -> RuleMetadata;

    /// Run the detector against the ordered tasks of one tree.
    fn run(&self, tree: &ResolvedTree) -> Vec<Finding>;
}

/// The rule engine runs all registered detectors against a tree.
pub struct RuleEngine {
    detectors: Vec<Box<dyn Detector>>,
    dependencies: ExternalDependencyDetector,
}

impl RuleEngine {
    /// Create an engine with all built-in detectors and an empty
    /// collection allow-list.
    pub fn new() -> Self {
        Self::with_allow_list(BTreeSet::new())
    }

    /// Create an engine whose dependency check trusts `allow`.
    pub fn with_allow_list(allow: BTreeSet<String>) -> Self {
        Self {
            detectors: builtin::all_detectors(&allow),
            dependencies: ExternalDependencyDetector::new(allow),
        }
    }

    /// Run all detectors against a tree.
    pub fn run(&self, tree: &ResolvedTree) -> Vec<Finding> {
        self.detectors.iter().flat_map(|d| d.run(tree)).collect()
    }

    /// Dependency verdict for a tree, independent of the findings.
    pub fn verify_dependencies(&self, tree: &ResolvedTree) -> DependencyVerdict {
        self.dependencies.verify(tree)
    }

    /// List metadata for all registered rules.
    pub fn list_rules(&self) -> Vec<RuleMetadata> {
        self.detectors.iter().map(|d| d.metadata()).collect()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}
