//! Conversion of raw task mappings (as written in a task file) into
//! `Task` entities.
//!
//! Loaders that do not want to split a task into module and task options
//! themselves can emit `task_block` lines; this module does the split the
//! same way for every loader.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::error::{GuardError, Result};
use crate::ir::{ExecutableType, KeyPair, Task, Variables};

static FQCN_MODULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+\.[a-z0-9_]+$").unwrap());

static MODULE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_.]+$").unwrap());

/// `key=value key2={{ var }}` free-form option strings.
static KEY_VALUE_OPTIONS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z0-9_]+=(?:[^ ]*\{\{ [^ ]+ \}\}[^ ]*|[^ ])+\s?)+$").unwrap()
});

const ROLE_IMPORTS: &[&str] = &["import_role", "include_role"];
const TASKFILE_IMPORTS: &[&str] = &["import_tasks", "include_tasks", "include"];
const BLOCK_SECTIONS: &[&str] = &["block", "rescue", "always"];

/// One unconverted task as found in a dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTaskBlock {
    /// Owning play or task file.
    pub parent: KeyPair,
    pub index: usize,
    pub defined_in: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub collections_in_play: Vec<String>,
    #[serde(default)]
    pub line: Option<usize>,
    pub block: Map<String, Value>,
}

impl RawTaskBlock {
    /// Convert to tasks, flattening `block`/`rescue`/`always` sections.
    /// The resulting tasks take consecutive indices from `first_index`.
    pub fn into_tasks(self, first_index: usize, engine: &EngineConfig) -> Result<Vec<Task>> {
        let mappings = flatten_blocks(&[Value::Object(self.block)]);
        mappings
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let mut task = task_from_block(&self.parent, first_index + i, &self.defined_in, block, engine)?
                    .with_owner(&self.collection, &self.role)
                    .with_collections_in_play(self.collections_in_play.clone());
                task.line = self.line;
                Ok(task)
            })
            .collect()
    }
}

/// The key of `block` naming the module, or `None` when every key is a
/// task keyword.
pub fn find_module_name(block: &Map<String, Value>, engine: &EngineConfig) -> Option<String> {
    let explicit = block.keys().find(|k| {
        k.starts_with("ansible.builtin") || engine.is_builtin_module(k) || FQCN_MODULE.is_match(k)
    });
    if let Some(name) = explicit {
        return Some(name.clone());
    }
    block
        .keys()
        .find(|k| !engine.is_task_keyword(k) && MODULE_NAME.is_match(k))
        .cloned()
}

fn short_name(module: &str) -> &str {
    module.rsplit('.').next().unwrap_or(module)
}

/// Split a free-form `k=v` option string into a mapping. Strings that are
/// not entirely `k=v` pairs (shell commands, bare names) are kept as-is.
fn parse_free_form(module: &str, raw: &str) -> Value {
    if !KEY_VALUE_OPTIONS.is_match(raw) {
        return Value::String(raw.to_string());
    }
    let mut options = Map::new();
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for part in raw.split(' ') {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(part);
        depth += part.matches("{{").count();
        depth = depth.saturating_sub(part.matches("}}").count());
        if depth == 0 {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    for token in tokens.iter().filter(|t| !t.is_empty()) {
        match token.split_once('=') {
            Some((k, v)) => {
                options.insert(k.to_string(), Value::String(v.to_string()));
            }
            None => {
                let fallback = if ROLE_IMPORTS.contains(&short_name(module)) {
                    "name"
                } else if TASKFILE_IMPORTS.contains(&short_name(module)) {
                    "file"
                } else {
                    "_raw_params"
                };
                options.insert(fallback.into(), Value::String(token.clone()));
            }
        }
    }
    Value::Object(options)
}

fn reference_of(options: &Value, field: &str) -> String {
    match options {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Build a task from its raw mapping.
///
/// The module key's value becomes the module options; every other key is
/// a task option. `include_role`/`import_role` and the task-file imports
/// turn into role and task-file references.
pub fn task_from_block(
    parent: &KeyPair,
    index: usize,
    defined_in: &str,
    block: &Map<String, Value>,
    engine: &EngineConfig,
) -> Result<Task> {
    let module = find_module_name(block, engine).ok_or_else(|| {
        GuardError::structural(
            KeyPair::task(parent, index).global.as_str(),
            "task block has no module key",
        )
    })?;

    let mut task_options = Variables::new();
    let mut module_options = Value::Null;
    for (k, v) in block {
        if *k == module {
            module_options = match v {
                Value::String(s) => parse_free_form(&module, s),
                other => other.clone(),
            };
        } else {
            task_options.insert(k.clone(), v.clone());
        }
    }
    // `args:` supplements free-form options.
    if let Some(Value::Object(args)) = task_options.get("args") {
        module_options = match module_options {
            Value::Object(mut map) => {
                for (k, v) in args {
                    map.entry(k.clone()).or_insert_with(|| v.clone());
                }
                Value::Object(map)
            }
            Value::String(raw) => {
                let mut map = args.clone();
                map.insert("_raw_params".into(), Value::String(raw));
                Value::Object(map)
            }
            Value::Null => Value::Object(args.clone()),
            other => other,
        };
    }

    let short = short_name(&module);
    let (executable, executable_type) = if ROLE_IMPORTS.contains(&short) {
        (reference_of(&module_options, "name"), ExecutableType::Role)
    } else if TASKFILE_IMPORTS.contains(&short) {
        (reference_of(&module_options, "file"), ExecutableType::TaskFile)
    } else {
        (module.clone(), ExecutableType::Module)
    };

    let variables = match task_options.get("vars") {
        Some(Value::Object(vars)) => vars.clone(),
        _ => Variables::new(),
    };

    let mut task = Task::new(parent, index, defined_in, &executable, executable_type)?
        .with_module_options(module_options.clone())
        .with_variables(variables);

    if let Some(Value::String(name)) = task_options.get("name") {
        task.name = name.clone();
    }
    if short == "set_fact" {
        if let Value::Object(facts) = &module_options {
            task.set_facts = facts
                .iter()
                .filter(|(k, _)| k.as_str() != "cacheable")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }
    }
    if let Some(Value::String(register)) = task_options.get("register") {
        if !register.is_empty() {
            task.registered_variables
                .insert(register.clone(), Value::String(task.key.to_string()));
        }
    }

    let loop_source = task_options
        .iter()
        .find(|(k, _)| k.as_str() == "loop" || k.starts_with("with_"))
        .map(|(_, v)| v.clone());
    if let Some(source) = loop_source {
        let var = task_options
            .get("loop_control")
            .and_then(|c| c.get("loop_var"))
            .and_then(Value::as_str)
            .unwrap_or("item")
            .to_string();
        task = task.with_loop(&var, source);
    }

    Ok(task.with_options(task_options))
}

/// Flatten `block`/`rescue`/`always` sections into the plain task
/// mappings they contain, in file order. Keywords set on the enclosing
/// block (`become`, `vars`, `when`, ...) are inherited unless the inner
/// task sets them itself.
pub fn flatten_blocks(tasks: &[Value]) -> Vec<Map<String, Value>> {
    let mut out = Vec::new();
    for item in tasks {
        let Value::Object(map) = item else {
            tracing::debug!("skipping non-mapping task entry");
            continue;
        };
        if !BLOCK_SECTIONS.iter().any(|s| map.contains_key(*s)) {
            out.push(map.clone());
            continue;
        }
        let inherited: Map<String, Value> = map
            .iter()
            .filter(|(k, _)| !BLOCK_SECTIONS.contains(&k.as_str()) && k.as_str() != "name")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for section in BLOCK_SECTIONS {
            let Some(Value::Array(inner)) = map.get(*section) else {
                continue;
            };
            for mut task in flatten_blocks(inner) {
                for (k, v) in &inherited {
                    task.entry(k.clone()).or_insert_with(|| v.clone());
                }
                out.push(task);
            }
        }
    }
    out
}
