//! Per-module effect extraction.
//!
//! Each registered module maps to an [`EffectDescriptor`]: a category and
//! a pure function that pulls the fields rules care about (`src`, `dest`,
//! `cmd`, `file`, ...) out of an option payload. Extraction runs once over
//! the raw payload and once per resolved loop iteration.

pub mod builtin;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::analysis::options::OptionResolution;
use crate::analysis::template;
use crate::ir::Task;

/// What a task does to the managed host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    InboundTransfer,
    OutboundTransfer,
    CmdExec,
    PackageInstall,
    FileChange,
    SystemChange,
    NetworkChange,
    ConfigChange,
    PrivilegeEscalation,
    #[default]
    #[serde(rename = "")]
    None,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InboundTransfer => "inbound_transfer",
            Self::OutboundTransfer => "outbound_transfer",
            Self::CmdExec => "cmd_exec",
            Self::PackageInstall => "package_install",
            Self::FileChange => "file_change",
            Self::SystemChange => "system_change",
            Self::NetworkChange => "network_change",
            Self::ConfigChange => "config_change",
            Self::PrivilegeEscalation => "privilege_escalation",
            Self::None => "",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields extracted from one option payload.
///
/// `origins` remembers which option key each field was read from so the
/// per-option mutable variable map can be consulted later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectData {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(skip)]
    origins: BTreeMap<String, String>,
}

impl EffectData {
    /// Copy `options[option_key]` into `field`. A later call for the same
    /// field overwrites an earlier one.
    pub fn take(&mut self, field: &str, options: &Value, option_key: &str) -> &mut Self {
        if let Some(value) = options.get(option_key) {
            self.fields.insert(field.to_string(), value.clone());
            self.origins.insert(field.to_string(), option_key.to_string());
        }
        self
    }

    /// Use a free-form payload (`command: ls -l`) as `field`.
    pub fn take_free_form(&mut self, field: &str, options: &Value) -> &mut Self {
        if let Value::String(text) = options {
            self.fields.insert(field.to_string(), Value::String(text.clone()));
            self.origins.insert(field.to_string(), String::new());
        }
        self
    }

    pub fn set_flag(&mut self, flag: &str) -> &mut Self {
        self.fields.insert(flag.to_string(), Value::Bool(true));
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// `field` as a string. Other shapes yield `None`.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// `field` as a list of strings; a single string is a list of one.
    pub fn get_strings(&self, field: &str) -> Vec<&str> {
        match self.fields.get(field) {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn flag(&self, flag: &str) -> bool {
        self.fields.get(flag).is_some_and(is_truthy)
    }

    pub fn origin(&self, field: &str) -> Option<&str> {
        self.origins.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Loose YAML truthiness: `true`, `yes`, `on`, `1`.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "on" | "1"),
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// Explicitly false: `false`, `no`, `off`, `0`.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => !*b,
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "false" | "no" | "off" | "0"),
        Value::Number(n) => n.as_i64() == Some(0),
        _ => false,
    }
}

pub type ExtractFn = fn(&Value) -> EffectData;

#[derive(Clone, Copy)]
pub enum CategoryRule {
    Fixed(Category),
    /// Category depends on the raw payload (`git` with `clone: no`, `uri`
    /// by HTTP method, ...).
    Dynamic(fn(&Value) -> Category),
}

#[derive(Clone, Copy)]
pub struct EffectDescriptor {
    pub category: CategoryRule,
    pub extract: ExtractFn,
}

impl EffectDescriptor {
    pub const fn fixed(category: Category, extract: ExtractFn) -> Self {
        Self {
            category: CategoryRule::Fixed(category),
            extract,
        }
    }

    pub const fn dynamic(category: fn(&Value) -> Category, extract: ExtractFn) -> Self {
        Self {
            category: CategoryRule::Dynamic(category),
            extract,
        }
    }

    fn category_for(&self, options: &Value) -> Category {
        match self.category {
            CategoryRule::Fixed(c) => c,
            CategoryRule::Dynamic(f) => f(options),
        }
    }
}

/// Normalized description of one effect of one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFinding {
    pub category: Category,
    /// Fields read from the raw option payload.
    pub data: EffectData,
    /// The same fields, once per resolved iteration.
    pub resolved_data: Vec<EffectData>,
    pub injection_risk: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risk_variables: Vec<String>,
}

impl TaskFinding {
    /// Every string value of `field` across raw and resolved data, raw
    /// first, duplicates removed.
    pub fn values_of(&self, field: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let all = std::iter::once(&self.data).chain(self.resolved_data.iter());
        for data in all {
            for value in data.get_strings(field) {
                if !out.contains(&value) {
                    out.push(value);
                }
            }
        }
        out
    }

    /// Variables that made `field` mutable, if any.
    pub fn mutable_vars_of(&self, field: &str) -> Vec<String> {
        match self.data.get(&format!("mutable_{field}_vars")) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Fields whose unresolved, mutable content makes a task injectable.
pub const RISK_FIELDS: &[&str] = &["src", "dest", "cmd", "file"];

/// Registry of effect descriptors keyed by fully-qualified module name.
pub struct ExtractorRegistry {
    descriptors: HashMap<String, EffectDescriptor>,
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self {
            descriptors: HashMap::new(),
        }
    }

    /// Registry with every built-in module registered.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (fqcn, descriptor) in builtin::descriptors() {
            registry.register(fqcn, descriptor);
        }
        registry
    }

    /// Register or replace the descriptor for `fqcn`.
    pub fn register(&mut self, fqcn: impl Into<String>, descriptor: EffectDescriptor) {
        self.descriptors.insert(fqcn.into(), descriptor);
    }

    pub fn get(&self, fqcn: &str) -> Option<&EffectDescriptor> {
        self.descriptors.get(fqcn)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Classify one task. Unknown modules produce no effect finding; a
    /// privilege escalation finding is appended whenever `become` is set.
    pub fn extract(&self, task: &Task, resolution: &OptionResolution) -> Vec<TaskFinding> {
        let mut findings = Vec::new();
        if let Some(descriptor) = self.get(&task.resolved_name) {
            findings.push(classify(descriptor, &task.module_options, resolution));
        }
        if let Some(escalation) = privilege_escalation(task) {
            findings.push(escalation);
        }
        findings
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn classify(descriptor: &EffectDescriptor, options: &Value, resolution: &OptionResolution) -> TaskFinding {
    let mut data = (descriptor.extract)(options);
    let resolved_data: Vec<EffectData> = resolution
        .iterations
        .iter()
        .map(|iteration| (descriptor.extract)(iteration))
        .collect();

    let mut risk_variables: Vec<String> = Vec::new();
    for &field in RISK_FIELDS {
        let raw_has_block = data.get_strings(field).iter().any(|s| template::has_template(s));
        if !raw_has_block {
            continue;
        }
        if resolved_data
            .iter()
            .any(|d| d.get_strings(field).iter().any(|s| template::has_template(s)))
        {
            data.set_flag(&format!("undetermined_{field}"));
        }
        let Some(origin) = data.origin(field) else {
            continue;
        };
        let mutable = resolution.mutable_for(origin);
        if mutable.is_empty() {
            continue;
        }
        data.fields.insert(
            format!("mutable_{field}_vars"),
            Value::Array(mutable.iter().cloned().map(Value::String).collect()),
        );
        for name in mutable {
            if !risk_variables.contains(name) {
                risk_variables.push(name.clone());
            }
        }
    }

    TaskFinding {
        category: descriptor.category_for(options),
        data,
        resolved_data,
        injection_risk: !risk_variables.is_empty(),
        risk_variables,
    }
}

fn privilege_escalation(task: &Task) -> Option<TaskFinding> {
    let escalate = task.options.get("become")?;
    if !is_truthy(escalate) {
        return None;
    }
    let options = Value::Object(task.options.clone());
    let mut data = EffectData::default();
    data.take("become_user", &options, "become_user")
        .take("become_method", &options, "become_method");
    Some(TaskFinding {
        category: Category::PrivilegeEscalation,
        data,
        ..TaskFinding::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::context::Context;
    use crate::analysis::options::resolve_module_options;
    use crate::config::EngineConfig;
    use crate::ir::{ExecutableType, KeyPair, VariableSource};
    use serde_json::json;

    fn task(module: &str, options: Value) -> Task {
        let parent = KeyPair::taskfile("", "web", "roles/web/tasks/main.yml").unwrap();
        let mut t = Task::new(&parent, 0, "roles/web/tasks/main.yml", module, ExecutableType::Module)
            .unwrap()
            .with_module_options(options);
        t.resolved_name = format!("ansible.builtin.{module}");
        t
    }

    fn run(ctx: &Context<'_>, t: &Task) -> Vec<TaskFinding> {
        let resolution = resolve_module_options(ctx, t);
        ExtractorRegistry::builtin().extract(t, &resolution)
    }

    #[test]
    fn copy_dest_from_role_default_is_injection_risk() {
        let engine = EngineConfig::new();
        let mut ctx = Context::new(&engine, std::iter::empty());
        ctx.bind("role_default_var", json!("nginx"), VariableSource::RoleDefault);
        let t = task("copy", json!({"src": "a.conf", "dest": "/etc/{{ role_default_var }}/conf"}));
        let findings = run(&ctx, &t);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, Category::FileChange);
        assert!(findings[0].injection_risk);
        assert_eq!(findings[0].risk_variables, vec!["role_default_var"]);
        assert_eq!(findings[0].mutable_vars_of("dest"), vec!["role_default_var"]);
        assert_eq!(findings[0].resolved_data[0].get_str("dest"), Some("/etc/nginx/conf"));
    }

    #[test]
    fn copy_dest_from_literal_vars_is_not_flagged() {
        let engine = EngineConfig::new();
        let mut ctx = Context::new(&engine, std::iter::empty());
        ctx.bind("role_default_var", json!("nginx"), VariableSource::Normal);
        let t = task("copy", json!({"dest": "/etc/{{ role_default_var }}/conf"}));
        let findings = run(&ctx, &t);
        assert!(!findings[0].injection_risk);
        assert!(findings[0].risk_variables.is_empty());
    }

    #[test]
    fn unresolved_field_is_marked_undetermined() {
        let engine = EngineConfig::new();
        let ctx = Context::new(&engine, std::iter::empty());
        let t = task("get_url", json!({"url": "{{ nowhere }}", "dest": "/tmp/x"}));
        let findings = run(&ctx, &t);
        assert_eq!(findings[0].category, Category::InboundTransfer);
        assert!(findings[0].data.flag("undetermined_src"));
        assert!(!findings[0].data.flag("undetermined_dest"));
    }

    #[test]
    fn become_adds_privilege_escalation() {
        let engine = EngineConfig::new();
        let ctx = Context::new(&engine, std::iter::empty());
        let mut options = Map::new();
        options.insert("become".into(), json!("yes"));
        options.insert("become_user".into(), json!("postgres"));
        let t = task("command", json!("whoami")).with_options(options);
        let findings = run(&ctx, &t);
        let categories: Vec<Category> = findings.iter().map(|f| f.category).collect();
        assert_eq!(categories, vec![Category::CmdExec, Category::PrivilegeEscalation]);
        assert_eq!(findings[1].data.get_str("become_user"), Some("postgres"));
    }

    #[test]
    fn become_false_is_not_escalation() {
        let engine = EngineConfig::new();
        let ctx = Context::new(&engine, std::iter::empty());
        let mut options = Map::new();
        options.insert("become".into(), json!(false));
        let t = task("command", json!("whoami")).with_options(options);
        let findings = run(&ctx, &t);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, Category::CmdExec);
    }

    #[test]
    fn unknown_module_yields_nothing() {
        let engine = EngineConfig::new();
        let ctx = Context::new(&engine, std::iter::empty());
        let mut t = task("debug", json!({"msg": "hi"}));
        t.resolved_name = "community.general.nothing".into();
        assert!(run(&ctx, &t).is_empty());
    }

    #[test]
    fn custom_descriptor_can_be_registered() {
        fn extract(options: &Value) -> EffectData {
            let mut data = EffectData::default();
            data.take("dest", options, "path");
            data
        }
        let mut registry = ExtractorRegistry::empty();
        registry.register("acme.tools.drop", EffectDescriptor::fixed(Category::FileChange, extract));
        let mut t = task("copy", json!({"path": "/srv/x"}));
        t.resolved_name = "acme.tools.drop".into();
        let findings = registry.extract(&t, &OptionResolution::default());
        assert_eq!(findings[0].data.get_str("dest"), Some("/srv/x"));
        assert_eq!(findings[0].data.origin("dest"), Some("path"));
    }

    #[test]
    fn category_serializes_as_snake_case() {
        assert_eq!(serde_json::to_value(Category::CmdExec).unwrap(), json!("cmd_exec"));
        assert_eq!(serde_json::to_value(Category::None).unwrap(), json!(""));
    }
}
