pub mod block;
pub mod dump;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::error::{GuardError, Result};
use crate::ir::{Corpus, Edge, Entity, Key};

/// One loaded unit of content.
#[derive(Debug, Clone)]
pub struct Dump {
    pub path: PathBuf,
    pub entities: Vec<Entity>,
    /// Present when the producer already resolved references.
    pub edges: Option<Vec<Edge>>,
}

/// The merged result of every adapter that matched a scan root.
#[derive(Debug)]
pub struct LoadedCorpus {
    pub corpus: Corpus,
    /// `Some` only when every contributing dump shipped resolved edges.
    pub edges: Option<Vec<Edge>>,
}

/// An adapter detects one on-disk representation of parsed content and
/// loads it into entities.
pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check if this adapter can handle the given path.
    fn detect(&self, root: &Path) -> bool;

    fn load(&self, root: &Path, engine: &EngineConfig) -> Result<Vec<Dump>>;
}

/// All registered adapters.
pub fn all_adapters() -> Vec<Box<dyn Adapter>> {
    vec![Box::new(dump::DumpAdapter)]
}

/// Merge dumps in order. When two dumps carry the same global key the
/// earlier one wins; a key repeated inside one dump reaches `Corpus::new`,
/// which rejects it.
fn merge(dumps: Vec<Dump>) -> Result<LoadedCorpus> {
    let all_resolved = dumps.iter().all(|d| d.edges.is_some());
    let mut earlier: HashSet<Key> = HashSet::new();
    let mut entities = Vec::new();
    let mut edges = Vec::new();
    for dump in dumps {
        let mut current = HashSet::new();
        for entity in dump.entities {
            if earlier.contains(entity.key()) {
                tracing::warn!(
                    key = %entity.key(),
                    path = %dump.path.display(),
                    "entity already loaded from another dump, skipping"
                );
                continue;
            }
            current.insert(entity.key().clone());
            entities.push(entity);
        }
        earlier.extend(current);
        edges.extend(dump.edges.unwrap_or_default());
    }
    Ok(LoadedCorpus {
        corpus: Corpus::new(entities)?,
        edges: all_resolved.then_some(edges),
    })
}

/// Run every adapter that recognizes `root` and merge what they load.
///
/// An adapter that recognizes the layout but fails to load it fails the
/// whole load; finding nothing at all is `NoAdapter`.
pub fn auto_detect_and_load(root: &Path, engine: &EngineConfig) -> Result<LoadedCorpus> {
    let mut dumps = Vec::new();

    for adapter in all_adapters() {
        if !adapter.detect(root) {
            continue;
        }
        let loaded = adapter.load(root, engine)?;
        tracing::debug!(adapter = adapter.name(), dumps = loaded.len(), "adapter loaded");
        dumps.extend(loaded);
    }

    if dumps.is_empty() {
        return Err(GuardError::NoAdapter(root.display().to_string()));
    }

    merge(dumps)
}
