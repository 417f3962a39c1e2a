use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::key::{validate_path, EntityKind, Key, KeyPair, KEY_DELIMITER, OBJECT_DELIMITER};
use crate::error::{GuardError, Result};

/// Variable mapping as written in `vars:`, `defaults/main.yml`, etc.
pub type Variables = Map<String, Value>;

/// What a task's raw reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutableType {
    Module,
    Role,
    #[serde(alias = "task_file")]
    TaskFile,
}

/// Loop declared on a task: the bound variable name and its source
/// expression (`loop:`, `with_items:`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
    #[serde(default = "default_loop_var")]
    pub var: String,
    pub source: Value,
}

fn default_loop_var() -> String {
    "item".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    pub key: Key,
    pub local_key: Key,
    #[serde(default)]
    pub name: String,
    pub defined_in: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub options: Variables,
    #[serde(default)]
    pub plays: Vec<Key>,
}

impl Playbook {
    pub fn new(collection: &str, role: &str, defined_in: &str) -> Result<Self> {
        let keys = KeyPair::playbook(collection, role, defined_in)?;
        Ok(Self {
            name: keys.global.name().to_string(),
            key: keys.global,
            local_key: keys.local,
            defined_in: defined_in.into(),
            collection: collection.into(),
            role: role.into(),
            variables: Variables::new(),
            options: Variables::new(),
            plays: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Play {
    pub key: Key,
    pub local_key: Key,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub index: usize,
    pub defined_in: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub options: Variables,
    /// The play's `collections:` keyword, in declared order.
    #[serde(default)]
    pub collections_in_play: Vec<String>,
    #[serde(default)]
    pub pre_tasks: Vec<Key>,
    #[serde(default)]
    pub roles: Vec<Key>,
    #[serde(default)]
    pub tasks: Vec<Key>,
    #[serde(default)]
    pub post_tasks: Vec<Key>,
}

impl Play {
    pub fn new(playbook: &Playbook, index: usize) -> Self {
        let keys = KeyPair::play(&playbook.keys(), index);
        Self {
            key: keys.global,
            local_key: keys.local,
            name: String::new(),
            index,
            defined_in: playbook.defined_in.clone(),
            collection: playbook.collection.clone(),
            role: playbook.role.clone(),
            variables: Variables::new(),
            options: Variables::new(),
            collections_in_play: Vec::new(),
            pre_tasks: Vec::new(),
            roles: Vec::new(),
            tasks: Vec::new(),
            post_tasks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub key: Key,
    pub local_key: Key,
    #[serde(default)]
    pub name: String,
    pub fqcn: String,
    pub defined_in: String,
    #[serde(default)]
    pub collection: String,
    /// `defaults/main.yml`
    #[serde(default)]
    pub default_variables: Variables,
    /// `vars/main.yml`
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub options: Variables,
    /// Entry task files (`tasks/main.yml`).
    #[serde(default)]
    pub taskfiles: Vec<Key>,
    #[serde(default)]
    pub used_in: BTreeSet<Key>,
}

impl Role {
    pub fn new(collection: &str, fqcn: &str, defined_in: &str) -> Result<Self> {
        let keys = KeyPair::role(collection, fqcn, defined_in)?;
        Ok(Self {
            key: keys.global,
            local_key: keys.local,
            name: fqcn.rsplit('.').next().unwrap_or(fqcn).to_string(),
            fqcn: fqcn.into(),
            defined_in: defined_in.into(),
            collection: collection.into(),
            default_variables: Variables::new(),
            variables: Variables::new(),
            options: Variables::new(),
            taskfiles: Vec::new(),
            used_in: BTreeSet::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub key: Key,
    pub local_key: Key,
    pub name: String,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub options: Variables,
}

impl Collection {
    pub fn new(name: &str) -> Result<Self> {
        let keys = KeyPair::collection(name)?;
        Ok(Self {
            key: keys.global,
            local_key: keys.local,
            name: name.into(),
            variables: Variables::new(),
            options: Variables::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFile {
    pub key: Key,
    pub local_key: Key,
    #[serde(default)]
    pub name: String,
    pub defined_in: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub options: Variables,
    #[serde(default)]
    pub tasks: Vec<Key>,
    #[serde(default)]
    pub used_in: BTreeSet<Key>,
}

impl TaskFile {
    pub fn new(collection: &str, role: &str, defined_in: &str) -> Result<Self> {
        let keys = KeyPair::taskfile(collection, role, defined_in)?;
        Ok(Self {
            name: keys.global.name().to_string(),
            key: keys.global,
            local_key: keys.local,
            defined_in: defined_in.into(),
            collection: collection.into(),
            role: role.into(),
            variables: Variables::new(),
            options: Variables::new(),
            tasks: Vec::new(),
            used_in: BTreeSet::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub key: Key,
    pub local_key: Key,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub index: usize,
    pub defined_in: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub role: String,
    /// Raw reference: module name, role name or task file path.
    pub executable: String,
    pub executable_type: ExecutableType,
    /// Unresolved option payload: mapping, free-form string, or null.
    #[serde(default)]
    pub module_options: Value,
    /// Task keywords (`become`, `when`, `delegate_to`, ...).
    #[serde(default)]
    pub options: Variables,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub registered_variables: Variables,
    #[serde(default)]
    pub set_facts: Variables,
    #[serde(default, rename = "loop")]
    pub loop_spec: Option<LoopSpec>,
    #[serde(default)]
    pub collections_in_play: Vec<String>,
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub resolved_name: String,
    #[serde(default)]
    pub possible_candidates: Vec<String>,
}

impl Task {
    /// `parent` is the owning play or task file.
    pub fn new(
        parent: &KeyPair,
        index: usize,
        defined_in: &str,
        executable: &str,
        executable_type: ExecutableType,
    ) -> Result<Self> {
        validate_path(defined_in)?;
        let keys = KeyPair::task(parent, index);
        if executable.is_empty() {
            return Err(GuardError::structural(
                keys.global.as_str(),
                "task has no executable reference",
            ));
        }
        Ok(Self {
            key: keys.global,
            local_key: keys.local,
            name: String::new(),
            index,
            defined_in: defined_in.into(),
            collection: String::new(),
            role: String::new(),
            executable: executable.into(),
            executable_type,
            module_options: Value::Null,
            options: Variables::new(),
            variables: Variables::new(),
            registered_variables: Variables::new(),
            set_facts: Variables::new(),
            loop_spec: None,
            collections_in_play: Vec::new(),
            line: None,
            resolved_name: String::new(),
            possible_candidates: Vec::new(),
        })
    }

    pub fn with_module_options(mut self, options: Value) -> Self {
        self.module_options = options;
        self
    }

    pub fn with_options(mut self, options: Variables) -> Self {
        self.options = options;
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_loop(mut self, var: &str, source: Value) -> Self {
        self.loop_spec = Some(LoopSpec {
            var: var.into(),
            source,
        });
        self
    }

    pub fn with_owner(mut self, collection: &str, role: &str) -> Self {
        self.collection = collection.into();
        self.role = role.into();
        self
    }

    pub fn with_collections_in_play(mut self, collections: Vec<String>) -> Self {
        self.collections_in_play = collections;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub key: Key,
    pub local_key: Key,
    #[serde(default)]
    pub name: String,
    pub fqcn: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub defined_in: String,
    #[serde(default)]
    pub builtin: bool,
    #[serde(default)]
    pub used_in: BTreeSet<Key>,
}

impl Module {
    pub fn new(collection: &str, role: &str, fqcn: &str, defined_in: &str) -> Result<Self> {
        let keys = KeyPair::module(collection, role, fqcn, defined_in)?;
        Ok(Self {
            key: keys.global,
            local_key: keys.local,
            name: fqcn.rsplit('.').next().unwrap_or(fqcn).to_string(),
            fqcn: fqcn.into(),
            collection: collection.into(),
            role: role.into(),
            defined_in: defined_in.into(),
            builtin: fqcn.starts_with("ansible.builtin."),
            used_in: BTreeSet::new(),
        })
    }
}

/// A role listed under a play's `roles:` keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleReference {
    pub key: Key,
    pub local_key: Key,
    /// Raw role name as written.
    pub name: String,
    #[serde(default)]
    pub index: usize,
    pub defined_in: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub collections_in_play: Vec<String>,
    /// Role parameters passed at the call site.
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub options: Variables,
    #[serde(default)]
    pub resolved_name: String,
    #[serde(default)]
    pub possible_candidates: Vec<String>,
}

impl RoleReference {
    pub fn new(play: &Play, index: usize, name: &str) -> Result<Self> {
        let keys = KeyPair::role_reference(&KeyPair::from(play), index);
        if name.is_empty() {
            return Err(GuardError::structural(
                keys.global.as_str(),
                "role reference has no name",
            ));
        }
        Ok(Self {
            key: keys.global,
            local_key: keys.local,
            name: name.into(),
            index,
            defined_in: play.defined_in.clone(),
            collection: play.collection.clone(),
            role: play.role.clone(),
            collections_in_play: play.collections_in_play.clone(),
            variables: Variables::new(),
            options: Variables::new(),
            resolved_name: String::new(),
            possible_candidates: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InventoryType {
    #[default]
    GroupVars,
    HostVars,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub key: Key,
    pub local_key: Key,
    #[serde(default)]
    pub name: String,
    pub defined_in: String,
    #[serde(default)]
    pub inventory_type: InventoryType,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub variables: Variables,
}

impl Inventory {
    pub fn group_vars(defined_in: &str, group_name: &str, variables: Variables) -> Result<Self> {
        let keys = KeyPair::inventory(defined_in)?;
        Ok(Self {
            name: keys.global.name().to_string(),
            key: keys.global,
            local_key: keys.local,
            defined_in: defined_in.into(),
            inventory_type: InventoryType::GroupVars,
            group_name: group_name.into(),
            variables,
        })
    }

    /// Only `group_vars/all` feeds variable resolution.
    pub fn is_group_all(&self) -> bool {
        self.inventory_type == InventoryType::GroupVars && self.group_name == "all"
    }
}

/// Any record of the corpus, tagged by `type` in the entity dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Entity {
    #[serde(rename = "playbook")]
    Playbook(Playbook),
    #[serde(rename = "play")]
    Play(Play),
    #[serde(rename = "role")]
    Role(Role),
    #[serde(rename = "collection")]
    Collection(Collection),
    #[serde(rename = "taskfile")]
    TaskFile(TaskFile),
    #[serde(rename = "task")]
    Task(Task),
    #[serde(rename = "module")]
    Module(Module),
    #[serde(rename = "roleinplay")]
    RoleReference(RoleReference),
    #[serde(rename = "inventory")]
    Inventory(Inventory),
}

macro_rules! each_entity {
    ($value:expr, $e:ident => $body:expr) => {
        match $value {
            Entity::Playbook($e) => $body,
            Entity::Play($e) => $body,
            Entity::Role($e) => $body,
            Entity::Collection($e) => $body,
            Entity::TaskFile($e) => $body,
            Entity::Task($e) => $body,
            Entity::Module($e) => $body,
            Entity::RoleReference($e) => $body,
            Entity::Inventory($e) => $body,
        }
    };
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Playbook(_) => EntityKind::Playbook,
            Self::Play(_) => EntityKind::Play,
            Self::Role(_) => EntityKind::Role,
            Self::Collection(_) => EntityKind::Collection,
            Self::TaskFile(_) => EntityKind::TaskFile,
            Self::Task(_) => EntityKind::Task,
            Self::Module(_) => EntityKind::Module,
            Self::RoleReference(_) => EntityKind::RoleReference,
            Self::Inventory(_) => EntityKind::Inventory,
        }
    }

    pub fn key(&self) -> &Key {
        each_entity!(self, e => &e.key)
    }

    pub fn local_key(&self) -> &Key {
        each_entity!(self, e => &e.local_key)
    }

    pub fn keys(&self) -> KeyPair {
        KeyPair {
            global: self.key().clone(),
            local: self.local_key().clone(),
        }
    }

    /// Source file the entity is declared in (empty for collections and
    /// synthesized modules).
    pub fn defined_in(&self) -> &str {
        match self {
            Self::Collection(_) => "",
            Self::Playbook(e) => &e.defined_in,
            Self::Play(e) => &e.defined_in,
            Self::Role(e) => &e.defined_in,
            Self::TaskFile(e) => &e.defined_in,
            Self::Task(e) => &e.defined_in,
            Self::Module(e) => &e.defined_in,
            Self::RoleReference(e) => &e.defined_in,
            Self::Inventory(e) => &e.defined_in,
        }
    }

    /// Keys recomputed from a file-backed entity's own fields. Indexed
    /// children (plays, tasks, role references) depend on their parent and
    /// return `None`.
    fn expected_keys(&self) -> Result<Option<KeyPair>> {
        let keys = match self {
            Self::Playbook(p) => KeyPair::playbook(&p.collection, &p.role, &p.defined_in)?,
            Self::TaskFile(t) => KeyPair::taskfile(&t.collection, &t.role, &t.defined_in)?,
            Self::Inventory(i) => KeyPair::inventory(&i.defined_in)?,
            Self::Collection(c) => KeyPair::collection(&c.name)?,
            Self::Role(r) => KeyPair::role(&r.collection, &r.fqcn, &r.defined_in)?,
            Self::Module(m) => KeyPair::module(&m.collection, &m.role, &m.fqcn, &m.defined_in)?,
            Self::Play(_) | Self::Task(_) | Self::RoleReference(_) => return Ok(None),
        };
        Ok(Some(keys))
    }

    fn indexed(&self) -> Option<(usize, &str)> {
        match self {
            Self::Play(p) => Some((p.index, &p.defined_in)),
            Self::Task(t) => Some((t.index, &t.defined_in)),
            Self::RoleReference(r) => Some((r.index, &r.defined_in)),
            _ => None,
        }
    }

    /// Reject records whose keys do not match their declared type or
    /// cannot be recomputed from their fields, and records with
    /// non-normalized paths.
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        for key in [self.key(), self.local_key()] {
            let parsed = Key::parse(key.as_str())?;
            if parsed.kind() != Some(kind) {
                return Err(GuardError::structural(
                    key.as_str(),
                    format!("key kind does not match entity type '{kind}'"),
                ));
            }
        }
        let key = self.key().as_str();
        let path_error = |e: GuardError| GuardError::structural(key, format!("invalid entity fields: {e}"));

        if let Some(expected) = self.expected_keys().map_err(path_error)? {
            if expected.global != *self.key() || expected.local != *self.local_key() {
                return Err(GuardError::structural(
                    key,
                    format!(
                        "keys do not match entity fields (expected '{}' / '{}')",
                        expected.global, expected.local
                    ),
                ));
            }
        }
        if let Some((index, defined_in)) = self.indexed() {
            validate_path(defined_in).map_err(path_error)?;
            let suffix = format!("{OBJECT_DELIMITER}{}{KEY_DELIMITER}[{index}]", kind.as_str());
            if !self.key().as_str().ends_with(&suffix) || !self.local_key().as_str().ends_with(&suffix) {
                return Err(GuardError::structural(
                    key,
                    format!("key does not end with '{suffix}'"),
                ));
            }
        }
        if let Self::Task(task) = self {
            if task.executable.is_empty() {
                return Err(GuardError::structural(key, "task has no executable reference"));
            }
        }
        Ok(())
    }

    /// Child keys in declaration order (containment edges).
    pub fn children(&self) -> Vec<&Key> {
        match self {
            Self::Playbook(p) => p.plays.iter().collect(),
            Self::Play(p) => p
                .pre_tasks
                .iter()
                .chain(&p.roles)
                .chain(&p.tasks)
                .chain(&p.post_tasks)
                .collect(),
            Self::Role(r) => r.taskfiles.iter().collect(),
            Self::TaskFile(t) => t.tasks.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn used_in_mut(&mut self) -> Option<&mut BTreeSet<Key>> {
        match self {
            Self::Role(r) => Some(&mut r.used_in),
            Self::TaskFile(t) => Some(&mut t.used_in),
            Self::Module(m) => Some(&mut m.used_in),
            _ => None,
        }
    }
}

macro_rules! impl_keys {
    ($($ty:ty),*) => {
        $(
            impl $ty {
                pub fn keys(&self) -> KeyPair {
                    KeyPair {
                        global: self.key.clone(),
                        local: self.local_key.clone(),
                    }
                }
            }

            impl From<&$ty> for KeyPair {
                fn from(value: &$ty) -> Self {
                    value.keys()
                }
            }
        )*
    };
}

impl_keys!(Playbook, Play, Role, Collection, TaskFile, Task, Module, RoleReference, Inventory);
