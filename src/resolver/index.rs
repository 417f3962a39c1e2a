use std::collections::HashMap;

use crate::ir::{Corpus, Entity, Key};

/// Name -> key lookup that remembers insertion order.
///
/// Suffix scans walk entries in the order the corpus listed them; the
/// first hit wins.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    entries: Vec<(String, Key)>,
    by_name: HashMap<String, usize>,
}

impl NameIndex {
    /// Register `name`. A name already present keeps its first key.
    pub fn insert(&mut self, name: impl Into<String>, key: Key) {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return;
        }
        self.by_name.insert(name.clone(), self.entries.len());
        self.entries.push((name, key));
    }

    pub fn get(&self, name: &str) -> Option<&Key> {
        self.by_name.get(name).map(|&i| &self.entries[i].1)
    }

    /// First entry whose name ends with `.<short>`.
    pub fn find_suffix(&self, short: &str) -> Option<(&str, &Key)> {
        let suffix = format!(".{short}");
        self.entries
            .iter()
            .find(|(name, _)| name.ends_with(&suffix))
            .map(|(name, key)| (name.as_str(), key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-only lookup tables shared by every resolution worker.
#[derive(Debug, Clone, Default)]
pub struct Indices {
    pub modules: NameIndex,
    pub roles: NameIndex,
    /// Global and local task-file keys, both mapping to the global key.
    pub taskfiles: HashMap<Key, Key>,
}

impl Indices {
    pub fn build(corpus: &Corpus) -> Self {
        let mut indices = Self::default();
        for entity in corpus.entities() {
            match entity {
                Entity::Module(m) => indices.modules.insert(m.fqcn.clone(), m.key.clone()),
                Entity::Role(r) => indices.roles.insert(r.fqcn.clone(), r.key.clone()),
                Entity::TaskFile(t) => {
                    indices.taskfiles.insert(t.key.clone(), t.key.clone());
                    indices
                        .taskfiles
                        .entry(t.local_key.clone())
                        .or_insert_with(|| t.key.clone());
                }
                _ => {}
            }
        }
        tracing::debug!(
            modules = indices.modules.len(),
            roles = indices.roles.len(),
            taskfiles = indices.taskfiles.len(),
            "built resolution indices"
        );
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> Key {
        Key::parse(raw).unwrap()
    }

    #[test]
    fn first_insert_wins() {
        let mut index = NameIndex::default();
        index.insert("acme.web.deploy", key("module module:acme.web.deploy"));
        index.insert("acme.web.deploy", key("module module:other"));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("acme.web.deploy").unwrap().as_str(), "module module:acme.web.deploy");
    }

    #[test]
    fn suffix_scan_follows_insertion_order() {
        let mut index = NameIndex::default();
        index.insert("zeta.tools.sync", key("module module:zeta.tools.sync"));
        index.insert("alpha.tools.sync", key("module module:alpha.tools.sync"));
        let (name, _) = index.find_suffix("sync").unwrap();
        assert_eq!(name, "zeta.tools.sync");
        assert!(index.find_suffix("ync").is_none());
    }
}
