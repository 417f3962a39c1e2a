//! Per-root analysis: tree construction, scoped variable resolution,
//! effect extraction and rule evaluation.
//!
//! Roots share only read-only data (corpus, edges, engine config,
//! registries), so each root is analyzed independently on the rayon pool
//! and the reports are collected in root order.

pub mod context;
pub mod options;
pub mod supply_chain;
pub mod template;
pub mod tree;
pub mod walk;

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::extract::{ExtractorRegistry, TaskFinding};
use crate::ir::{Corpus, Edge, Entity, EntityKind, ExecutableType, Key};
use crate::resolver::ResolvedCorpus;
use crate::rules::{DependencyVerdict, Finding, RuleEngine};

use context::Context;
use tree::{TreeBuilder, TreeNode};
use walk::{walk_tree, ResolvedTree};

/// One reachable task in a root report.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub key: Key,
    pub resolved_name: String,
    pub findings: Vec<TaskFinding>,
}

/// A module, role or task-file reference that could not be qualified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedReference {
    pub key: Key,
    pub reference: String,
    pub possible_candidates: Vec<String>,
}

/// Everything known about one entry point.
#[derive(Debug, Clone, Serialize)]
pub struct RootReport {
    pub root_key: Key,
    pub tasks: Vec<TaskReport>,
    pub findings: Vec<Finding>,
    pub dependency: DependencyVerdict,
    pub unresolved: Vec<UnresolvedReference>,
    pub dependent_collections: Vec<String>,
}

impl RootReport {
    /// Task findings flagged with an injection risk.
    pub fn risky_task_findings(&self) -> impl Iterator<Item = (&Key, &TaskFinding)> {
        self.tasks
            .iter()
            .flat_map(|t| t.findings.iter().map(move |f| (&t.key, f)))
            .filter(|(_, f)| f.injection_risk)
    }
}

pub struct Analyzer<'a> {
    corpus: &'a Corpus,
    edges: &'a [Edge],
    engine: &'a EngineConfig,
    registry: ExtractorRegistry,
    rules: RuleEngine,
    entry_points: Vec<EntityKind>,
    exclude: Vec<glob::Pattern>,
}

impl<'a> Analyzer<'a> {
    pub fn new(resolved: &'a ResolvedCorpus, engine: &'a EngineConfig, rules: RuleEngine) -> Self {
        Self {
            corpus: &resolved.corpus,
            edges: &resolved.edges,
            engine,
            registry: ExtractorRegistry::builtin(),
            rules,
            entry_points: vec![EntityKind::Playbook, EntityKind::Role],
            exclude: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_entry_points(mut self, kinds: Vec<EntityKind>) -> Self {
        self.entry_points = kinds;
        self
    }

    pub fn with_exclude(mut self, patterns: Vec<glob::Pattern>) -> Self {
        self.exclude = patterns;
        self
    }

    /// Entry points in corpus order, minus excluded files.
    pub fn roots(&self) -> Vec<Key> {
        self.corpus
            .roots(&self.entry_points)
            .into_iter()
            .filter(|key| {
                let defined_in = self.corpus.get(key.as_str()).map_or("", Entity::defined_in);
                let excluded = self.exclude.iter().any(|p| p.matches(defined_in));
                if excluded {
                    tracing::debug!(root = %key, "root excluded by pattern");
                }
                !excluded
            })
            .collect()
    }

    pub fn build_tree(&self, root: &Key) -> Result<TreeNode> {
        TreeBuilder::new(self.edges, self.engine.max_depth).build(root)
    }

    pub fn resolve_tree(&self, tree: &TreeNode) -> ResolvedTree {
        let base = Context::new(self.engine, self.corpus.inventories());
        walk_tree(tree, self.corpus, &base, &self.registry)
    }

    fn unresolved(&self, tree: &TreeNode) -> Vec<UnresolvedReference> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for key in tree.preorder() {
            if !seen.insert(key) {
                continue;
            }
            let (reference, resolved_name, candidates) = match self.corpus.get(key.as_str()) {
                Some(Entity::Task(t)) if t.executable_type != ExecutableType::TaskFile => {
                    (&t.executable, &t.resolved_name, &t.possible_candidates)
                }
                Some(Entity::RoleReference(r)) => (&r.name, &r.resolved_name, &r.possible_candidates),
                _ => continue,
            };
            if resolved_name.is_empty() {
                out.push(UnresolvedReference {
                    key: key.clone(),
                    reference: reference.clone(),
                    possible_candidates: candidates.clone(),
                });
            }
        }
        out
    }

    /// Analyze one entry point. Only structural and depth errors escape.
    pub fn analyze_root(&self, root: &Key) -> Result<RootReport> {
        tracing::debug!(root = %root, "analyzing root");
        let tree = self.build_tree(root)?;
        let resolved = self.resolve_tree(&tree);
        let findings = self.rules.run(&resolved);
        let dependency = self.rules.verify_dependencies(&resolved);
        let dependent_collections = supply_chain::dependent_collections(&resolved.tasks);
        let unresolved = self.unresolved(&tree);

        let tasks = resolved
            .tasks
            .into_iter()
            .map(|t| TaskReport {
                key: t.task.key,
                resolved_name: t.task.resolved_name,
                findings: t.findings,
            })
            .collect();

        Ok(RootReport {
            root_key: root.clone(),
            tasks,
            findings,
            dependency,
            unresolved,
            dependent_collections,
        })
    }

    /// Analyze every root in parallel; reports come back in root order.
    /// The first root that fails (e.g. `DepthExceeded`) fails the scan.
    pub fn analyze_all(&self) -> Result<Vec<RootReport>> {
        let roots = self.roots();
        roots.par_iter().map(|root| self.analyze_root(root)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Play, Playbook, Role, RoleReference, Task, TaskFile};
    use crate::resolver::{resolve_corpus, PopularityTable};
    use serde_json::json;

    fn site() -> Vec<Entity> {
        let mut pb = Playbook::new("", "", "site.yml").unwrap();
        let mut play = Play::new(&pb, 0);
        let rr = RoleReference::new(&play, 0, "web").unwrap();
        let unknown = Task::new(&play.keys(), 0, "site.yml", "frobnicate", ExecutableType::Module).unwrap();
        play.roles = vec![rr.key.clone()];
        play.tasks = vec![unknown.key.clone()];
        pb.plays = vec![play.key.clone()];

        let mut role = Role::new("", "web", "roles/web").unwrap();
        role.default_variables = json!({"conf_dir": "nginx"}).as_object().cloned().unwrap();
        let mut tf = TaskFile::new("", "web", "roles/web/tasks/main.yml").unwrap();
        let copy = Task::new(&tf.keys(), 0, "roles/web/tasks/main.yml", "copy", ExecutableType::Module)
            .unwrap()
            .with_owner("", "web")
            .with_module_options(json!({"src": "a", "dest": "/etc/{{ conf_dir }}/a"}));
        tf.tasks = vec![copy.key.clone()];
        role.taskfiles = vec![tf.key.clone()];

        vec![
            Entity::Playbook(pb),
            Entity::Play(play),
            Entity::RoleReference(rr),
            Entity::Task(unknown),
            Entity::Role(role),
            Entity::TaskFile(tf),
            Entity::Task(copy),
        ]
    }

    fn resolved() -> (ResolvedCorpus, EngineConfig) {
        let engine = EngineConfig::new();
        let corpus = Corpus::new(site()).unwrap();
        (resolve_corpus(corpus, &engine, &PopularityTable::builtin()), engine)
    }

    #[test]
    fn playbook_root_reaches_role_tasks() {
        let (resolved, engine) = resolved();
        let analyzer = Analyzer::new(&resolved, &engine, RuleEngine::new());
        let roots = analyzer.roots();
        assert_eq!(roots.len(), 2);

        let report = analyzer.analyze_root(&roots[0]).unwrap();
        assert_eq!(report.tasks.len(), 2);
        assert_eq!(report.tasks[0].resolved_name, "ansible.builtin.copy");
        assert!(report.findings.iter().any(|f| f.rule_id == "GUARD-006"));
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.unresolved[0].reference, "frobnicate");
        assert!(report.dependency.result);
        assert_eq!(report.risky_task_findings().count(), 1);
    }

    #[test]
    fn analyze_all_keeps_root_order() {
        let (resolved, engine) = resolved();
        let analyzer = Analyzer::new(&resolved, &engine, RuleEngine::new());
        let reports = analyzer.analyze_all().unwrap();
        let keys: Vec<&Key> = reports.iter().map(|r| &r.root_key).collect();
        assert_eq!(keys, analyzer.roots().iter().collect::<Vec<_>>());
    }

    #[test]
    fn excluded_roots_are_skipped() {
        let (resolved, engine) = resolved();
        let analyzer = Analyzer::new(&resolved, &engine, RuleEngine::new())
            .with_exclude(vec![glob::Pattern::new("roles/**").unwrap()]);
        let roots = analyzer.roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].as_str(), "playbook playbook:site.yml");
    }

    #[test]
    fn depth_bound_fails_the_whole_scan() {
        let (resolved, mut engine) = resolved();
        engine.max_depth = 1;
        let analyzer = Analyzer::new(&resolved, &engine, RuleEngine::new());
        let err = analyzer.analyze_all().unwrap_err();
        assert!(matches!(err, crate::error::GuardError::DepthExceeded { .. }));
    }
}
