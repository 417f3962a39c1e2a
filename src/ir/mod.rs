//! Entity model for parsed automation content.
//!
//! The loader produces a flat list of entities. `Corpus` indexes them by
//! global key; everything downstream (resolution, trees, variable scopes,
//! rules) works against the corpus and its edge list.

pub mod entity;
pub mod key;
pub mod variable;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

pub use entity::{
    Collection, Entity, ExecutableType, Inventory, InventoryType, LoopSpec, Module, Play,
    Playbook, Role, RoleReference, Task, TaskFile, Variables,
};
pub use key::{EntityKind, Key, KeyPair};
pub use variable::{ResolvedVariable, VariableSource};

/// A directed caller -> callee edge. Serialized as a `[src, dst]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(Key, Key)", into = "(Key, Key)")]
pub struct Edge {
    pub src: Key,
    pub dst: Key,
}

impl Edge {
    pub fn new(src: Key, dst: Key) -> Self {
        Self { src, dst }
    }
}

impl From<(Key, Key)> for Edge {
    fn from((src, dst): (Key, Key)) -> Self {
        Self { src, dst }
    }
}

impl From<Edge> for (Key, Key) {
    fn from(edge: Edge) -> Self {
        (edge.src, edge.dst)
    }
}

/// Where a finding points in the analyzed content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: Option<usize>,
    pub key: Key,
}

impl SourceLocation {
    pub fn of_task(task: &Task) -> Self {
        Self {
            file: task.defined_in.clone(),
            line: task.line,
            key: task.key.clone(),
        }
    }
}

/// All entities of one analysis run, indexed by global key.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    entities: Vec<Entity>,
    index: HashMap<Key, usize>,
}

impl Corpus {
    /// Validate every entity and build the key index.
    ///
    /// Fails on the first malformed entity or duplicate global key.
    pub fn new(entities: Vec<Entity>) -> Result<Self> {
        let mut index = HashMap::with_capacity(entities.len());
        for (i, entity) in entities.iter().enumerate() {
            entity.validate()?;
            if index.insert(entity.key().clone(), i).is_some() {
                return Err(GuardError::structural(
                    entity.key().as_str(),
                    "duplicate global key in corpus",
                ));
            }
        }
        Ok(Self { entities, index })
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn get(&self, key: &str) -> Option<&Entity> {
        self.index.get(key).map(|&i| &self.entities[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut Entity> {
        let i = *self.index.get(key)?;
        Some(&mut self.entities[i])
    }

    pub fn task(&self, key: &str) -> Option<&Task> {
        match self.get(key) {
            Some(Entity::Task(task)) => Some(task),
            _ => None,
        }
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Task(t) => Some(t),
            _ => None,
        })
    }

    pub fn inventories(&self) -> impl Iterator<Item = &Inventory> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Inventory(i) => Some(i),
            _ => None,
        })
    }

    /// Entry points of the requested kinds, in corpus order.
    pub fn roots(&self, kinds: &[EntityKind]) -> Vec<Key> {
        self.entities
            .iter()
            .filter(|e| kinds.contains(&e.kind()))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Parent -> child edges from each entity's declared children.
    pub fn containment_edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for entity in &self.entities {
            for child in entity.children() {
                if !self.contains(child.as_str()) {
                    tracing::warn!(
                        parent = %entity.key(),
                        child = %child,
                        "declared child is missing from the corpus, skipping"
                    );
                    continue;
                }
                edges.push(Edge::new(entity.key().clone(), child.clone()));
            }
        }
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playbook_with_play() -> (Playbook, Play) {
        let mut pb = Playbook::new("", "", "site.yml").unwrap();
        let play = Play::new(&pb, 0);
        pb.plays.push(play.key.clone());
        (pb, play)
    }

    #[test]
    fn duplicate_global_keys_are_rejected() {
        let (pb, _) = playbook_with_play();
        let err = Corpus::new(vec![Entity::Playbook(pb.clone()), Entity::Playbook(pb)]);
        assert!(matches!(err, Err(GuardError::Structural { .. })));
    }

    #[test]
    fn keys_are_unique_after_construction() {
        let (pb, play) = playbook_with_play();
        let corpus = Corpus::new(vec![Entity::Playbook(pb), Entity::Play(play)]).unwrap();
        let mut keys: Vec<&Key> = corpus.entities().iter().map(|e| e.key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), corpus.len());
    }

    #[test]
    fn containment_edges_skip_missing_children() {
        let (mut pb, play) = playbook_with_play();
        pb.plays.push(Key::parse("play playbook:site.yml#play:[9]").unwrap());
        let corpus = Corpus::new(vec![Entity::Playbook(pb.clone()), Entity::Play(play.clone())]).unwrap();
        let edges = corpus.containment_edges();
        assert_eq!(edges, vec![Edge::new(pb.key, play.key)]);
    }

    #[test]
    fn edge_serializes_as_pair() {
        let edge = Edge::new(
            Key::parse("playbook playbook:site.yml").unwrap(),
            Key::parse("play playbook:site.yml#play:[0]").unwrap(),
        );
        let json = serde_json::to_string(&edge).unwrap();
        assert_eq!(
            json,
            r#"["playbook playbook:site.yml","play playbook:site.yml#play:[0]"]"#
        );
    }
}
