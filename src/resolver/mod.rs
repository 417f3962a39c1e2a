//! Reference resolution: short module, role and task-file references to
//! fully-qualified identities, plus the call edges they imply.

pub mod candidates;
pub mod index;

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;

use crate::config::EngineConfig;
use crate::ir::key::{imported_taskfile_key, local_taskfile_key, normalize_path};
use crate::ir::{Corpus, Edge, Entity, ExecutableType, Key, KeyPair, RoleReference, Task};

pub use candidates::{PopularityTable, ReferenceKind};
pub use index::{Indices, NameIndex};

static FQCN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+\.[a-z0-9_]+$").unwrap());

const BUILTIN_COLLECTION: &str = "ansible.builtin";

/// Outcome of resolving one reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Fully-qualified identity, or empty when unresolved.
    pub resolved_name: String,
    /// Callee key for the call edge.
    pub target: Option<Key>,
    pub candidates: Vec<String>,
}

/// Resolves references against read-only indices.
pub struct ReferenceResolver<'a> {
    engine: &'a EngineConfig,
    indices: &'a Indices,
    popularity: &'a PopularityTable,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(
        engine: &'a EngineConfig,
        indices: &'a Indices,
        popularity: &'a PopularityTable,
    ) -> Self {
        Self {
            engine,
            indices,
            popularity,
        }
    }

    fn module_key(&self, fqcn: &str) -> Option<Key> {
        if let Some(key) = self.indices.modules.get(fqcn) {
            return Some(key.clone());
        }
        // Built-ins and uninstalled collection modules have no entity;
        // their key is still deterministic.
        KeyPair::module("", "", fqcn, "").ok().map(|k| k.global)
    }

    /// Resolve a module reference to `(fqcn, key)`.
    pub fn resolve_module(
        &self,
        name: &str,
        collections_in_play: &[String],
        own_collection: &str,
    ) -> Option<(String, Option<Key>)> {
        if FQCN_PATTERN.is_match(name) {
            return Some((name.to_string(), self.module_key(name)));
        }
        if !name.contains('.') {
            if self.engine.is_builtin_module(name) {
                let fqcn = format!("{BUILTIN_COLLECTION}.{name}");
                let key = self.module_key(&fqcn);
                return Some((fqcn, key));
            }
            if let Some(hit) = search_collections(&self.indices.modules, name, collections_in_play, own_collection) {
                return Some(hit);
            }
        }
        fallback_scan(&self.indices.modules, name)
    }

    /// Resolve a role reference to `(fqcn, key)`.
    pub fn resolve_role(
        &self,
        name: &str,
        collections_in_play: &[String],
        own_collection: &str,
    ) -> Option<(String, Option<Key>)> {
        if FQCN_PATTERN.is_match(name) {
            if let Some(key) = self.indices.roles.get(name) {
                return Some((name.to_string(), Some(key.clone())));
            }
        }
        if !name.contains('.') {
            if let Some(hit) = search_collections(&self.indices.roles, name, collections_in_play, own_collection) {
                return Some(hit);
            }
        }
        fallback_scan(&self.indices.roles, name)
    }

    /// Resolve an included task file path relative to the including file.
    pub fn resolve_taskfile(&self, caller: &Key, defined_in: &str, reference: &str) -> Option<Key> {
        if reference.contains("{{") {
            return None;
        }
        let path = match defined_in.rfind("roles/") {
            Some(pos) if reference.starts_with("roles/") => {
                normalize_path(&format!("{}{reference}", &defined_in[..pos]))
            }
            _ => match defined_in.rsplit_once('/') {
                Some((dir, _)) => normalize_path(&format!("{dir}/{reference}")),
                None => normalize_path(reference),
            },
        };
        let global = imported_taskfile_key(caller, &path);
        if let Some(key) = self.indices.taskfiles.get(&global) {
            return Some(key.clone());
        }
        self.indices
            .taskfiles
            .get(&local_taskfile_key(&path))
            .cloned()
    }

    pub fn resolve_task(&self, task: &Task) -> Resolution {
        let (hit, kind) = match task.executable_type {
            ExecutableType::Module => (
                self.resolve_module(&task.executable, &task.collections_in_play, &task.collection),
                Some(ReferenceKind::Module),
            ),
            ExecutableType::Role => (
                self.resolve_role(&task.executable, &task.collections_in_play, &task.collection),
                Some(ReferenceKind::Role),
            ),
            ExecutableType::TaskFile => (
                self.resolve_taskfile(&task.key, &task.defined_in, &task.executable)
                    .map(|key| (key.to_string(), Some(key))),
                None,
            ),
        };
        self.finish(&task.key, &task.executable, hit, kind)
    }

    pub fn resolve_role_reference(&self, reference: &RoleReference) -> Resolution {
        let hit = self.resolve_role(
            &reference.name,
            &reference.collections_in_play,
            &reference.collection,
        );
        self.finish(&reference.key, &reference.name, hit, Some(ReferenceKind::Role))
    }

    fn finish(
        &self,
        caller: &Key,
        reference: &str,
        hit: Option<(String, Option<Key>)>,
        kind: Option<ReferenceKind>,
    ) -> Resolution {
        match hit {
            Some((resolved_name, target)) => Resolution {
                resolved_name,
                target,
                candidates: Vec::new(),
            },
            None => {
                if reference.contains("{{") {
                    tracing::debug!(caller = %caller, reference, "templated reference left unresolved");
                } else {
                    tracing::warn!(caller = %caller, reference, "unresolved reference");
                }
                Resolution {
                    resolved_name: String::new(),
                    target: None,
                    candidates: kind
                        .map(|k| self.popularity.candidates(k, reference))
                        .unwrap_or_default(),
                }
            }
        }
    }
}

/// Rules 3 and 4: the play's `collections:` list in order, then the
/// resolving entity's own collection.
fn search_collections(
    index: &NameIndex,
    name: &str,
    collections_in_play: &[String],
    own_collection: &str,
) -> Option<(String, Option<Key>)> {
    let own = (!own_collection.is_empty()).then_some(own_collection);
    collections_in_play
        .iter()
        .map(String::as_str)
        .chain(own)
        .find_map(|collection| {
            let fqcn = format!("{collection}.{name}");
            index.get(&fqcn).map(|key| (fqcn, Some(key.clone())))
        })
}

/// Rule 5: exact name, then the first `.<name>` suffix in index order.
fn fallback_scan(index: &NameIndex, name: &str) -> Option<(String, Option<Key>)> {
    if let Some(key) = index.get(name) {
        return Some((name.to_string(), Some(key.clone())));
    }
    index
        .find_suffix(name)
        .map(|(fqcn, key)| (fqcn.to_string(), Some(key.clone())))
}

/// Collections a resolved module name depends on, excluding the built-in
/// collection; `None` for names that are not fully qualified.
pub fn owning_collection(resolved_name: &str) -> Option<String> {
    let mut parts = resolved_name.split('.');
    let namespace = parts.next()?;
    let collection = parts.next()?;
    parts.next()?;
    let owner = format!("{namespace}.{collection}");
    (owner != BUILTIN_COLLECTION).then_some(owner)
}

/// Corpus with resolved references and the complete edge list.
#[derive(Debug, Clone)]
pub struct ResolvedCorpus {
    pub corpus: Corpus,
    pub edges: Vec<Edge>,
}

/// Resolve every task and role reference, fill `resolved_name`,
/// `possible_candidates` and `used_in`, and derive containment plus call
/// edges.
///
/// Workers only read the indices; `used_in` pairs are merged afterwards.
pub fn resolve_corpus(
    mut corpus: Corpus,
    engine: &EngineConfig,
    popularity: &PopularityTable,
) -> ResolvedCorpus {
    let indices = Indices::build(&corpus);
    let resolver = ReferenceResolver::new(engine, &indices, popularity);

    let resolutions: Vec<(Key, Resolution)> = corpus
        .entities()
        .par_iter()
        .filter_map(|entity| match entity {
            Entity::Task(task) => Some((task.key.clone(), resolver.resolve_task(task))),
            Entity::RoleReference(r) => Some((r.key.clone(), resolver.resolve_role_reference(r))),
            _ => None,
        })
        .collect();

    let mut used_in: BTreeMap<Key, BTreeSet<Key>> = BTreeMap::new();
    let mut call_edges = Vec::new();
    for (caller, resolution) in resolutions {
        if let Some(target) = &resolution.target {
            used_in.entry(target.clone()).or_default().insert(caller.clone());
            call_edges.push(Edge::new(caller.clone(), target.clone()));
        }
        match corpus.get_mut(caller.as_str()) {
            Some(Entity::Task(task)) => {
                task.resolved_name = resolution.resolved_name;
                task.possible_candidates = resolution.candidates;
            }
            Some(Entity::RoleReference(r)) => {
                r.resolved_name = resolution.resolved_name;
                r.possible_candidates = resolution.candidates;
            }
            _ => {}
        }
    }

    for (callee, callers) in used_in {
        if let Some(set) = corpus.get_mut(callee.as_str()).and_then(Entity::used_in_mut) {
            set.extend(callers);
        }
    }

    let mut edges = corpus.containment_edges();
    edges.extend(call_edges);
    ResolvedCorpus { corpus, edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Module, Play, Playbook, Role, TaskFile};
    use pretty_assertions::assert_eq;

    fn play() -> Play {
        let pb = Playbook::new("", "", "site.yml").unwrap();
        Play::new(&pb, 0)
    }

    fn module_task(play: &Play, index: usize, name: &str) -> Task {
        Task::new(&play.keys(), index, "site.yml", name, ExecutableType::Module).unwrap()
    }

    fn corpus_indices(entities: Vec<Entity>) -> (Corpus, Indices) {
        let corpus = Corpus::new(entities).unwrap();
        let indices = Indices::build(&corpus);
        (corpus, indices)
    }

    #[test]
    fn builtin_wins_over_collections_in_play() {
        let copy = Module::new("acme.tools", "", "acme.tools.copy", "plugins/modules/copy.py").unwrap();
        let (_, indices) = corpus_indices(vec![Entity::Module(copy)]);
        let engine = EngineConfig::new();
        let table = PopularityTable::default();
        let resolver = ReferenceResolver::new(&engine, &indices, &table);

        let task = module_task(&play(), 0, "copy").with_collections_in_play(vec!["acme.tools".into()]);
        let resolution = resolver.resolve_task(&task);
        assert_eq!(resolution.resolved_name, "ansible.builtin.copy");
        assert_eq!(
            resolution.target.unwrap().as_str(),
            "module module:ansible.builtin.copy"
        );
    }

    #[test]
    fn collections_in_play_before_own_collection() {
        let a = Module::new("acme.tools", "", "acme.tools.deploy", "plugins/modules/deploy.py").unwrap();
        let b = Module::new("acme.web", "", "acme.web.deploy", "plugins/modules/deploy.py").unwrap();
        let (_, indices) = corpus_indices(vec![Entity::Module(b), Entity::Module(a)]);
        let engine = EngineConfig::new();
        let table = PopularityTable::default();
        let resolver = ReferenceResolver::new(&engine, &indices, &table);

        let task = module_task(&play(), 0, "deploy")
            .with_collections_in_play(vec!["acme.tools".into()])
            .with_owner("acme.web", "");
        assert_eq!(resolver.resolve_task(&task).resolved_name, "acme.tools.deploy");

        let task = module_task(&play(), 1, "deploy").with_owner("acme.web", "");
        assert_eq!(resolver.resolve_task(&task).resolved_name, "acme.web.deploy");
    }

    #[test]
    fn fqcn_is_accepted_verbatim() {
        let indices = Indices::default();
        let engine = EngineConfig::new();
        let table = PopularityTable::default();
        let resolver = ReferenceResolver::new(&engine, &indices, &table);
        let task = module_task(&play(), 0, "community.general.ufw");
        assert_eq!(resolver.resolve_task(&task).resolved_name, "community.general.ufw");
    }

    #[test]
    fn suffix_fallback_and_candidates() {
        let m = Module::new("zeta.net", "", "zeta.net.probe", "plugins/modules/probe.py").unwrap();
        let (_, indices) = corpus_indices(vec![Entity::Module(m)]);
        let engine = EngineConfig::new();
        let table = PopularityTable::builtin();
        let resolver = ReferenceResolver::new(&engine, &indices, &table);

        let found = resolver.resolve_task(&module_task(&play(), 0, "probe"));
        assert_eq!(found.resolved_name, "zeta.net.probe");

        let missing = resolver.resolve_task(&module_task(&play(), 1, "ufw"));
        assert_eq!(missing.resolved_name, "");
        assert!(missing.target.is_none());
        assert_eq!(missing.candidates, vec!["community.general.ufw".to_string()]);
    }

    #[test]
    fn role_triple_must_exist() {
        let role = Role::new("acme.web", "acme.web.nginx", "roles/nginx").unwrap();
        let (_, indices) = corpus_indices(vec![Entity::Role(role)]);
        let engine = EngineConfig::new();
        let table = PopularityTable::default();
        let resolver = ReferenceResolver::new(&engine, &indices, &table);

        assert!(resolver.resolve_role("acme.web.nginx", &[], "").is_some());
        assert!(resolver.resolve_role("acme.web.apache", &[], "").is_none());
        let (fqcn, _) = resolver.resolve_role("nginx", &["acme.web".into()], "").unwrap();
        assert_eq!(fqcn, "acme.web.nginx");
    }

    #[test]
    fn taskfile_paths_resolve_relative_and_rerooted() {
        let main = TaskFile::new("", "web", "playbooks/roles/web/tasks/main.yml").unwrap();
        let install = TaskFile::new("", "web", "playbooks/roles/web/tasks/install.yml").unwrap();
        let common = TaskFile::new("", "", "playbooks/roles/common/tasks/setup.yml").unwrap();
        let (_, indices) = corpus_indices(vec![
            Entity::TaskFile(main.clone()),
            Entity::TaskFile(install.clone()),
            Entity::TaskFile(common.clone()),
        ]);
        let engine = EngineConfig::new();
        let table = PopularityTable::default();
        let resolver = ReferenceResolver::new(&engine, &indices, &table);
        let caller = KeyPair::task(&main.keys(), 0).global;

        let hit = resolver.resolve_taskfile(&caller, &main.defined_in, "install.yml");
        assert_eq!(hit, Some(install.key));

        let hit = resolver.resolve_taskfile(&caller, &main.defined_in, "roles/common/tasks/setup.yml");
        assert_eq!(hit, Some(common.key));

        assert!(resolver
            .resolve_taskfile(&caller, &main.defined_in, "{{ dynamic }}.yml")
            .is_none());
    }

    #[test]
    fn resolve_corpus_fills_names_edges_and_used_in() {
        let mut pb = Playbook::new("", "", "site.yml").unwrap();
        let mut play = Play::new(&pb, 0);
        let task = module_task(&play, 0, "shell");
        let unresolved = module_task(&play, 1, "ufw");
        play.tasks = vec![task.key.clone(), unresolved.key.clone()];
        pb.plays.push(play.key.clone());
        let shell = Module::new("", "", "ansible.builtin.shell", "").unwrap();

        let corpus = Corpus::new(vec![
            Entity::Playbook(pb.clone()),
            Entity::Play(play.clone()),
            Entity::Task(task.clone()),
            Entity::Task(unresolved.clone()),
            Entity::Module(shell.clone()),
        ])
        .unwrap();

        let resolved = resolve_corpus(corpus, &EngineConfig::new(), &PopularityTable::builtin());
        let t = resolved.corpus.task(task.key.as_str()).unwrap();
        assert_eq!(t.resolved_name, "ansible.builtin.shell");
        let u = resolved.corpus.task(unresolved.key.as_str()).unwrap();
        assert_eq!(u.resolved_name, "");
        assert_eq!(u.possible_candidates, vec!["community.general.ufw".to_string()]);

        assert_eq!(
            resolved.edges,
            vec![
                Edge::new(pb.key.clone(), play.key.clone()),
                Edge::new(play.key.clone(), task.key.clone()),
                Edge::new(play.key.clone(), unresolved.key.clone()),
                Edge::new(task.key.clone(), shell.key.clone()),
            ]
        );

        let Some(Entity::Module(m)) = resolved.corpus.get(shell.key.as_str()) else {
            panic!("module missing");
        };
        assert!(m.used_in.contains(&task.key));
    }

    #[test]
    fn owning_collection_skips_builtin_and_short_names() {
        assert_eq!(owning_collection("community.general.ufw").as_deref(), Some("community.general"));
        assert_eq!(owning_collection("ansible.builtin.copy"), None);
        assert_eq!(owning_collection("copy"), None);
        assert_eq!(owning_collection("geerlingguy.docker"), None);
    }
}
