//! Scoped variable resolution along one tree path.
//!
//! A `Context` accumulates variable contributions from the root down to
//! the current node. Children receive a clone; the variable map is shared
//! until the first write on a branch.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::template;
use crate::config::EngineConfig;
use crate::ir::{Entity, Inventory, Key, Task, VariableSource, Variables};

/// Outcome of a variable lookup. Always carries a value, even when the
/// lookup failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: Value,
    pub source: VariableSource,
    /// The failure came from re-entering a name already being resolved.
    pub cycle: bool,
}

impl Resolved {
    fn new(value: Value, source: VariableSource) -> Self {
        Self {
            value,
            source,
            cycle: false,
        }
    }

    fn failed() -> Self {
        Self::new(Value::Null, VariableSource::Failed)
    }

    fn cyclic() -> Self {
        Self {
            cycle: true,
            ..Self::failed()
        }
    }

    pub fn is_failed(&self) -> bool {
        self.source.is_failed()
    }
}

/// Result of substituting every block of a template string.
#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    pub value: Value,
    /// Every block resolved.
    pub complete: bool,
    pub cycle: bool,
}

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    source: VariableSource,
}

/// One contribution to the context, in traversal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub key: Key,
    pub depth: usize,
}

/// Host-level bindings (`register`, `set_fact`) made by tasks. These
/// outlive the task that made them and reach every later task on the
/// same path, unlike task `vars`.
#[derive(Debug, Clone, Default)]
pub struct Facts {
    bindings: Vec<(String, Value, VariableSource)>,
}

impl Facts {
    pub fn of_task(task: &Task) -> Self {
        let registered = task
            .registered_variables
            .iter()
            .map(|(name, value)| (name.clone(), value.clone(), VariableSource::Registered));
        let set = task
            .set_facts
            .iter()
            .map(|(name, value)| (name.clone(), value.clone(), VariableSource::Normal));
        Self {
            bindings: registered.chain(set).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Append `later`; its bindings shadow ours on lookup.
    pub fn extend(&mut self, later: Facts) {
        self.bindings.extend(later.bindings);
    }
}

#[derive(Debug, Clone)]
pub struct Context<'e> {
    engine: &'e EngineConfig,
    inventory: Arc<Value>,
    variables: Arc<HashMap<String, Binding>>,
    chain: Vec<ChainEntry>,
}

fn special_sentinel(name: &str) -> Value {
    Value::String(format!("__special__{name}"))
}

/// Follow a dotted path through mappings and lists.
fn walk<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Exact key first, then the longest bound dotted prefix.
fn lookup_dotted<'v>(root: &'v Value, name: &str) -> Option<&'v Value> {
    if let Some(value) = root.get(name) {
        return Some(value);
    }
    let mut end = name.len();
    while let Some(pos) = name[..end].rfind('.') {
        if let Some(value) = root.get(&name[..pos]) {
            return walk(value, &name[pos + 1..]);
        }
        end = pos;
    }
    None
}

impl<'e> Context<'e> {
    /// Empty context seeded with the `group_vars/all` inventory entries.
    pub fn new<'i>(engine: &'e EngineConfig, inventories: impl IntoIterator<Item = &'i Inventory>) -> Self {
        let mut all = Map::new();
        for inventory in inventories {
            if inventory.is_group_all() {
                all.extend(inventory.variables.clone());
            }
        }
        Self {
            engine,
            inventory: Arc::new(Value::Object(all)),
            variables: Arc::new(HashMap::new()),
            chain: Vec::new(),
        }
    }

    pub fn engine(&self) -> &'e EngineConfig {
        self.engine
    }

    pub fn chain(&self) -> &[ChainEntry] {
        &self.chain
    }

    /// Bind `name`, shadowing any earlier binding.
    pub fn bind(&mut self, name: &str, value: Value, source: VariableSource) {
        Arc::make_mut(&mut self.variables).insert(name.to_string(), Binding { value, source });
    }

    fn bind_all(&mut self, variables: &Variables, source: VariableSource) {
        if variables.is_empty() {
            return;
        }
        let map = Arc::make_mut(&mut self.variables);
        for (name, value) in variables {
            map.insert(
                name.clone(),
                Binding {
                    value: value.clone(),
                    source,
                },
            );
        }
    }

    /// Bind facts made earlier on the path, in the order they were made.
    pub fn absorb(&mut self, facts: &Facts) {
        if facts.is_empty() {
            return;
        }
        let map = Arc::make_mut(&mut self.variables);
        for (name, value, source) in &facts.bindings {
            map.insert(
                name.clone(),
                Binding {
                    value: value.clone(),
                    source: *source,
                },
            );
        }
    }

    /// Append an entity's contribution.
    pub fn add(&mut self, entity: &Entity, depth: usize) {
        match entity {
            Entity::Playbook(e) => self.bind_all(&e.variables, VariableSource::Normal),
            Entity::Play(e) => self.bind_all(&e.variables, VariableSource::Normal),
            Entity::Collection(e) => self.bind_all(&e.variables, VariableSource::Normal),
            Entity::TaskFile(e) => self.bind_all(&e.variables, VariableSource::Normal),
            Entity::RoleReference(e) => self.bind_all(&e.variables, VariableSource::Normal),
            Entity::Role(e) => {
                self.bind_all(&e.default_variables, VariableSource::RoleDefault);
                self.bind_all(&e.variables, VariableSource::RoleVar);
            }
            Entity::Task(e) => {
                self.bind_all(&e.variables, VariableSource::Normal);
                self.bind_all(&e.registered_variables, VariableSource::Registered);
                self.bind_all(&e.set_facts, VariableSource::Normal);
            }
            Entity::Module(_) | Entity::Inventory(_) => {}
        }
        self.chain.push(ChainEntry {
            key: entity.key().clone(),
            depth,
        });
    }

    fn lookup_context(&self, name: &str) -> Option<(Value, VariableSource)> {
        if let Some(binding) = self.variables.get(name) {
            return Some((binding.value.clone(), binding.source));
        }
        let mut end = name.len();
        while let Some(pos) = name[..end].rfind('.') {
            if let Some(binding) = self.variables.get(&name[..pos]) {
                return walk(&binding.value, &name[pos + 1..]).map(|v| (v.clone(), binding.source));
            }
            end = pos;
        }
        None
    }

    fn lookup_inventory(&self, name: &str) -> Option<Value> {
        lookup_dotted(&self.inventory, name).cloned()
    }

    fn is_special(&self, name: &str) -> bool {
        let top = name.split('.').next().unwrap_or(name);
        self.engine.is_special_variable(name) || self.engine.is_special_variable(top)
    }

    /// Resolve `name`. `history` lists the names already being resolved on
    /// this call stack.
    pub fn resolve_variable(&self, name: &str, history: &[String]) -> Resolved {
        if history.iter().any(|h| h == name) {
            return Resolved::cyclic();
        }
        let mut history = history.to_vec();
        history.push(name.to_string());

        if let Some((value, source)) = self.lookup_context(name) {
            return self.expand(value, source, &history);
        }
        if let Some(value) = self.lookup_inventory(name) {
            return self.expand(value, VariableSource::Inventory, &history);
        }
        if self.is_special(name) {
            return Resolved::new(special_sentinel(name), VariableSource::Special);
        }
        if name.starts_with("hostvars[") || name.starts_with("groups[") {
            return Resolved::new(Value::String(name.to_string()), VariableSource::Partial);
        }
        if let Some((top, rest)) = name.split_once('.') {
            let parent = self.resolve_variable(top, &history);
            if parent.cycle {
                return parent;
            }
            if !parent.is_failed() {
                if parent.source == VariableSource::Registered {
                    return parent;
                }
                if let Some(nested) = walk(&parent.value, rest) {
                    return Resolved::new(nested.clone(), parent.source);
                }
                if !parent.value.is_object() {
                    return Resolved::new(Value::String(name.to_string()), VariableSource::Partial);
                }
            }
        }
        Resolved::failed()
    }

    /// Run template substitution over a bound value.
    fn expand(&self, value: Value, source: VariableSource, history: &[String]) -> Resolved {
        match value {
            Value::String(text) => {
                let sub = self.resolve_single_variable(&text, history);
                if sub.cycle {
                    return Resolved::cyclic();
                }
                Resolved::new(sub.value, source)
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(text) => {
                            let sub = self.resolve_single_variable(&text, history);
                            if sub.cycle {
                                return Resolved::cyclic();
                            }
                            out.push(sub.value);
                        }
                        other => out.push(other),
                    }
                }
                Resolved::new(Value::Array(out), source)
            }
            other => Resolved::new(other, source),
        }
    }

    /// Substitute every block of `text`.
    ///
    /// All or nothing: if any block fails the original text comes back
    /// unchanged. A text that is exactly one block yields the resolved
    /// value's native type.
    pub fn resolve_single_variable(&self, text: &str, history: &[String]) -> Substitution {
        let blocks = template::blocks(text);
        let unchanged = |cycle| Substitution {
            value: Value::String(text.to_string()),
            complete: false,
            cycle,
        };
        if blocks.is_empty() {
            return Substitution {
                complete: true,
                ..unchanged(false)
            };
        }

        let mut out = text.to_string();
        for block in &blocks {
            let mut resolved = self.resolve_variable(&block.name, history);
            if resolved.is_failed() {
                if let Some(default) = &block.default {
                    let fallback = self.resolve_variable(default, history);
                    if !fallback.is_failed() {
                        resolved = fallback;
                    }
                }
            }
            if resolved.is_failed() {
                return unchanged(resolved.cycle);
            }
            if block.text == text {
                return Substitution {
                    value: resolved.value,
                    complete: true,
                    cycle: false,
                };
            }
            out = out.replacen(&block.text, &template::render_value(&resolved.value), 1);
        }
        Substitution {
            value: Value::String(out),
            complete: true,
            cycle: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExecutableType, Play, Playbook, Role, Task};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        value.as_object().cloned().unwrap()
    }

    fn empty<'e>(engine: &'e EngineConfig) -> Context<'e> {
        Context::new(engine, std::iter::empty())
    }

    #[test]
    fn task_vars_shadow_role_defaults() {
        let engine = EngineConfig::new();
        let mut ctx = empty(&engine);
        let mut role = Role::new("", "web", "roles/web").unwrap();
        role.default_variables = vars(json!({"port": 80}));
        let pb = Playbook::new("", "", "site.yml").unwrap();
        let play = Play::new(&pb, 0);
        let task = Task::new(&play.keys(), 0, "site.yml", "debug", ExecutableType::Module)
            .unwrap()
            .with_variables(vars(json!({"port": 8080})));

        ctx.add(&Entity::Role(role), 0);
        assert_eq!(ctx.resolve_variable("port", &[]).source, VariableSource::RoleDefault);
        ctx.add(&Entity::Task(task), 1);
        let r = ctx.resolve_variable("port", &[]);
        assert_eq!(r.value, json!(8080));
        assert_eq!(r.source, VariableSource::Normal);
        assert_eq!(ctx.chain().len(), 2);
    }

    #[test]
    fn template_is_all_or_nothing() {
        let engine = EngineConfig::new();
        let mut ctx = empty(&engine);
        ctx.bind("a", json!("x"), VariableSource::Normal);
        let sub = ctx.resolve_single_variable("{{ a }}-{{ b }}", &[]);
        assert_eq!(sub.value, json!("{{ a }}-{{ b }}"));
        assert!(!sub.complete);

        ctx.bind("b", json!("y"), VariableSource::Normal);
        let sub = ctx.resolve_single_variable("{{ a }}-{{ b }}", &[]);
        assert_eq!(sub.value, json!("x-y"));
    }

    #[test]
    fn whole_block_keeps_native_type() {
        let engine = EngineConfig::new();
        let mut ctx = empty(&engine);
        ctx.bind("hosts", json!(["a", "b"]), VariableSource::Normal);
        let sub = ctx.resolve_single_variable("{{ hosts }}", &[]);
        assert_eq!(sub.value, json!(["a", "b"]));
    }

    #[test]
    fn self_reference_fails_without_recursing() {
        let engine = EngineConfig::new();
        let mut ctx = empty(&engine);
        ctx.bind("x", json!("{{ x }}"), VariableSource::Normal);
        let r = ctx.resolve_variable("x", &[]);
        assert_eq!(r.source, VariableSource::Failed);

        ctx.bind("p", json!("{{ q }}"), VariableSource::Normal);
        ctx.bind("q", json!("{{ p }}"), VariableSource::Normal);
        assert_eq!(ctx.resolve_variable("p", &[]).source, VariableSource::Failed);
    }

    #[test]
    fn default_filter_is_used_when_primary_fails() {
        let engine = EngineConfig::new();
        let mut ctx = empty(&engine);
        ctx.bind("fallback", json!("/opt"), VariableSource::RoleDefault);
        let sub = ctx.resolve_single_variable("{{ prefix | default(fallback) }}/bin", &[]);
        assert_eq!(sub.value, json!("/opt/bin"));
    }

    #[test]
    fn nested_values_are_resolved_through_templates() {
        let engine = EngineConfig::new();
        let mut ctx = empty(&engine);
        ctx.bind("base", json!("/srv"), VariableSource::RoleDefault);
        ctx.bind("app_dir", json!("{{ base }}/app"), VariableSource::Normal);
        let r = ctx.resolve_variable("app_dir", &[]);
        assert_eq!(r.value, json!("/srv/app"));
        assert_eq!(r.source, VariableSource::Normal);
    }

    #[test]
    fn dotted_paths_walk_mappings_and_lists() {
        let engine = EngineConfig::new();
        let mut ctx = empty(&engine);
        ctx.bind("app", json!({"paths": {"bin": "/usr/bin"}, "ports": [80, 443]}), VariableSource::RoleVar);
        assert_eq!(ctx.resolve_variable("app.paths.bin", &[]).value, json!("/usr/bin"));
        let port = ctx.resolve_variable("app.ports.1", &[]);
        assert_eq!(port.value, json!(443));
        assert_eq!(port.source, VariableSource::RoleVar);
        assert!(ctx.resolve_variable("app.missing", &[]).is_failed());
    }

    #[test]
    fn dotted_through_scalar_is_partial() {
        let engine = EngineConfig::new();
        let mut ctx = empty(&engine);
        ctx.bind("url", json!("https://example.com"), VariableSource::Normal);
        let r = ctx.resolve_variable("url.host", &[]);
        assert_eq!(r.source, VariableSource::Partial);
        assert_eq!(r.value, json!("url.host"));
    }

    #[test]
    fn dotted_through_templated_mapping() {
        let engine = EngineConfig::new();
        let mut ctx = empty(&engine);
        ctx.bind("defaults", json!({"user": "deploy"}), VariableSource::RoleDefault);
        ctx.bind("settings", json!("{{ defaults }}"), VariableSource::RoleVar);
        let r = ctx.resolve_variable("settings.user", &[]);
        assert_eq!(r.value, json!("deploy"));
        assert_eq!(r.source, VariableSource::RoleVar);
    }

    #[test]
    fn registered_attributes_stay_registered() {
        let engine = EngineConfig::new();
        let mut ctx = empty(&engine);
        ctx.bind("result", json!(""), VariableSource::Registered);
        assert_eq!(ctx.resolve_variable("result.stdout", &[]).source, VariableSource::Registered);
    }

    #[test]
    fn inventory_special_and_partial_fallbacks() {
        let engine = EngineConfig::new();
        let all = Inventory::group_vars("group_vars/all.yml", "all", vars(json!({"ntp_server": "pool.ntp.org"}))).unwrap();
        let web = Inventory::group_vars("group_vars/web.yml", "web", vars(json!({"web_port": 80}))).unwrap();
        let ctx = Context::new(&engine, [&all, &web]);

        let r = ctx.resolve_variable("ntp_server", &[]);
        assert_eq!(r.source, VariableSource::Inventory);
        assert!(ctx.resolve_variable("web_port", &[]).is_failed());

        let r = ctx.resolve_variable("inventory_hostname", &[]);
        assert_eq!(r.source, VariableSource::Special);
        assert_eq!(ctx.resolve_variable("ansible_facts.os_family", &[]).source, VariableSource::Special);

        let r = ctx.resolve_variable("hostvars['db'].ip", &[]);
        assert_eq!(r.source, VariableSource::Partial);
        assert_eq!(r.value, json!("hostvars['db'].ip"));
    }

    #[test]
    fn clones_do_not_leak_between_branches() {
        let engine = EngineConfig::new();
        let mut parent = empty(&engine);
        parent.bind("shared", json!(1), VariableSource::Normal);
        let mut left = parent.clone();
        left.bind("only_left", json!(2), VariableSource::Normal);
        let right = parent.clone();
        assert!(right.resolve_variable("only_left", &[]).is_failed());
        assert!(parent.resolve_variable("only_left", &[]).is_failed());
        assert!(!left.resolve_variable("shared", &[]).is_failed());
    }
}
