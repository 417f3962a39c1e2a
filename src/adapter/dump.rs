use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::block::RawTaskBlock;
use super::Dump;
use crate::config::EngineConfig;
use crate::error::{GuardError, Result};
use crate::ir::{Corpus, Edge, Entity, Key, KeyPair, Task};

pub const ENTITIES_FILE: &str = "entities.jsonl";
pub const EDGES_FILE: &str = "edges.jsonl";

const TASK_BLOCK_TYPE: &str = "task_block";
const SEARCH_DEPTH: usize = 6;

/// JSON-lines entity dump adapter.
///
/// Looks for `entities.jsonl` files (and an optional sibling
/// `edges.jsonl`) anywhere under the scan root, honoring `.gitignore`.
pub struct DumpAdapter;

impl DumpAdapter {
    fn discover(root: &Path) -> Vec<PathBuf> {
        if root.is_file() {
            return if root.file_name().is_some_and(|n| n == ENTITIES_FILE) {
                vec![root.to_path_buf()]
            } else {
                Vec::new()
            };
        }
        let walker = ignore::WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .max_depth(Some(SEARCH_DEPTH))
            .build();
        let mut found: Vec<PathBuf> = walker
            .flatten()
            .map(|entry| entry.into_path())
            .filter(|p| p.is_file() && p.file_name().is_some_and(|n| n == ENTITIES_FILE))
            .collect();
        found.sort();
        found
    }
}

impl super::Adapter for DumpAdapter {
    fn name(&self) -> &'static str {
        "entity-dump"
    }

    fn detect(&self, root: &Path) -> bool {
        !Self::discover(root).is_empty()
    }

    fn load(&self, root: &Path, engine: &EngineConfig) -> Result<Vec<Dump>> {
        Self::discover(root)
            .into_iter()
            .map(|path| read_dump(&path, engine))
            .collect()
    }
}

fn load_error(path: &Path, line: usize, message: impl Into<String>) -> GuardError {
    GuardError::Load {
        path: path.display().to_string(),
        line,
        message: message.into(),
    }
}

fn parse_lines<T, F>(path: &Path, mut parse: F) -> Result<Vec<T>>
where
    F: FnMut(usize, Value) -> std::result::Result<T, String>,
{
    let content = fs::read_to_string(path)?;
    let mut out = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|e| load_error(path, i + 1, e.to_string()))?;
        out.push(parse(i + 1, value).map_err(|message| load_error(path, i + 1, message))?);
    }
    Ok(out)
}

fn from_value<T: DeserializeOwned>(value: Value) -> std::result::Result<T, String> {
    serde_json::from_value(value).map_err(|e| e.to_string())
}

enum Line {
    Entity(Entity),
    /// A raw task mapping and the line it was read from.
    Block(usize, RawTaskBlock),
}

fn parse_line(line: usize, value: Value) -> std::result::Result<Line, String> {
    if value.get("type").and_then(Value::as_str) == Some(TASK_BLOCK_TYPE) {
        return from_value(value).map(|raw| Line::Block(line, raw));
    }
    from_value(value).map(Line::Entity)
}

/// Convert `task_block` lines into tasks.
///
/// Blocks of one parent are taken in index order. A block that flattens
/// into several tasks shifts the indices of the blocks after it; the
/// returned map gives, for every declared task key that changed, the keys
/// replacing it in the parent's task list.
fn expand_task_blocks(
    path: &Path,
    mut blocks: Vec<(usize, RawTaskBlock)>,
    engine: &EngineConfig,
) -> Result<(Vec<Task>, HashMap<Key, Vec<Key>>)> {
    blocks.sort_by(|(_, a), (_, b)| (&a.parent.global, a.index).cmp(&(&b.parent.global, b.index)));
    let mut tasks = Vec::new();
    let mut replaced = HashMap::new();
    let mut parent: Option<Key> = None;
    let mut shift = 0;
    for (line, raw) in blocks {
        if parent.as_ref() != Some(&raw.parent.global) {
            parent = Some(raw.parent.global.clone());
            shift = 0;
        }
        let declared = KeyPair::task(&raw.parent, raw.index).global;
        let first = raw.index + shift;
        let converted = raw
            .into_tasks(first, engine)
            .map_err(|e| load_error(path, line, e.to_string()))?;
        shift += converted.len().saturating_sub(1);
        let keys: Vec<Key> = converted.iter().map(|t| t.key.clone()).collect();
        if keys.len() != 1 || keys[0] != declared {
            replaced.insert(declared, keys);
        }
        tasks.extend(converted);
    }
    Ok((tasks, replaced))
}

fn splice(list: &mut Vec<Key>, replaced: &HashMap<Key, Vec<Key>>) {
    if !list.iter().any(|k| replaced.contains_key(k)) {
        return;
    }
    *list = list
        .iter()
        .flat_map(|k| replaced.get(k).cloned().unwrap_or_else(|| vec![k.clone()]))
        .collect();
}

/// Read `entities.jsonl` and, when present, the sibling `edges.jsonl`.
pub fn read_dump(entities_path: &Path, engine: &EngineConfig) -> Result<Dump> {
    let mut entities = Vec::new();
    let mut blocks = Vec::new();
    for line in parse_lines(entities_path, parse_line)? {
        match line {
            Line::Entity(entity) => entities.push(entity),
            Line::Block(n, raw) => blocks.push((n, raw)),
        }
    }
    let (tasks, replaced) = expand_task_blocks(entities_path, blocks, engine)?;
    if !replaced.is_empty() {
        for entity in &mut entities {
            match entity {
                Entity::Play(play) => {
                    splice(&mut play.pre_tasks, &replaced);
                    splice(&mut play.tasks, &replaced);
                    splice(&mut play.post_tasks, &replaced);
                }
                Entity::TaskFile(taskfile) => splice(&mut taskfile.tasks, &replaced),
                _ => {}
            }
        }
    }
    entities.extend(tasks.into_iter().map(Entity::Task));

    let edges_path = entities_path.with_file_name(EDGES_FILE);
    let edges = if edges_path.is_file() {
        Some(parse_lines(&edges_path, |_, v| from_value::<Edge>(v))?)
    } else {
        None
    };
    tracing::debug!(
        path = %entities_path.display(),
        entities = entities.len(),
        pre_resolved = edges.is_some(),
        "loaded entity dump"
    );
    Ok(Dump {
        path: entities_path.to_path_buf(),
        entities,
        edges,
    })
}

fn write_lines<T: serde::Serialize>(path: &Path, items: impl IntoIterator<Item = T>) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    for item in items {
        serde_json::to_writer(&mut out, &item)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Write `corpus` and `edges` as a pre-resolved dump into `dir`.
pub fn write_dump(dir: &Path, corpus: &Corpus, edges: &[Edge]) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_lines(&dir.join(ENTITIES_FILE), corpus.entities())?;
    write_lines(&dir.join(EDGES_FILE), edges)?;
    Ok(())
}
