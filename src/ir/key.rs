//! Global and local keys for corpus entities.
//!
//! A key is `"<kind> <payload>"`. The payload is a `#`-separated list of
//! `<kind>:<name>` segments, so `task collection:acme.web#taskfile:roles/x/tasks/main.yml#task:[2]`
//! names the third task of that task file inside the `acme.web` collection.
//! The kind of any key is the text before the first space.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

pub const KIND_DELIMITER: char = ' ';
pub const KEY_DELIMITER: char = ':';
pub const OBJECT_DELIMITER: char = '#';

/// Entity kind encoded as the first token of every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "playbook")]
    Playbook,
    #[serde(rename = "play")]
    Play,
    #[serde(rename = "role")]
    Role,
    #[serde(rename = "collection")]
    Collection,
    #[serde(rename = "taskfile")]
    TaskFile,
    #[serde(rename = "task")]
    Task,
    #[serde(rename = "module")]
    Module,
    #[serde(rename = "roleinplay")]
    RoleReference,
    #[serde(rename = "inventory")]
    Inventory,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playbook => "playbook",
            Self::Play => "play",
            Self::Role => "role",
            Self::Collection => "collection",
            Self::TaskFile => "taskfile",
            Self::Task => "task",
            Self::Module => "module",
            Self::RoleReference => "roleinplay",
            Self::Inventory => "inventory",
        }
    }

    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "playbook" => Some(Self::Playbook),
            "play" => Some(Self::Play),
            "role" => Some(Self::Role),
            "collection" => Some(Self::Collection),
            "taskfile" | "task_file" => Some(Self::TaskFile),
            "task" => Some(Self::Task),
            "module" => Some(Self::Module),
            "roleinplay" | "role_reference" => Some(Self::RoleReference),
            "inventory" => Some(Self::Inventory),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An opaque, typed entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    fn compose(kind: EntityKind, payload: &str) -> Self {
        Self(format!("{}{}{}", kind.as_str(), KIND_DELIMITER, payload))
    }

    /// Parse and validate a raw key string.
    pub fn parse(raw: &str) -> Result<Self> {
        let key = Self(raw.to_string());
        if key.kind().is_none() {
            return Err(GuardError::structural(raw, "unknown key kind"));
        }
        if key.payload().is_empty() {
            return Err(GuardError::structural(raw, "key has an empty payload"));
        }
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Entity kind recovered from the key prefix.
    pub fn kind(&self) -> Option<EntityKind> {
        let (kind, _) = self.0.split_once(KIND_DELIMITER)?;
        EntityKind::from_str_lenient(kind)
    }

    /// Everything after the kind token.
    pub fn payload(&self) -> &str {
        self.0
            .split_once(KIND_DELIMITER)
            .map(|(_, rest)| rest)
            .unwrap_or("")
    }

    fn last_segment(&self) -> &str {
        let payload = self.payload();
        let segment = payload.rsplit(OBJECT_DELIMITER).next().unwrap_or(payload);
        segment
            .split_once(KEY_DELIMITER)
            .map(|(_, name)| name)
            .unwrap_or(segment)
    }

    /// Short display name: the basename for file-backed kinds, otherwise
    /// the last segment's name.
    pub fn name(&self) -> &str {
        let last = self.last_segment();
        match self.kind() {
            Some(EntityKind::Playbook | EntityKind::TaskFile | EntityKind::Inventory) => {
                last.rsplit('/').next().unwrap_or(last)
            }
            _ => last,
        }
    }

    /// The `collection:<name>#` or `role:<name>#` prefix this key is owned
    /// by, or `""` when the entity has no owner.
    pub fn owner_prefix(&self) -> &str {
        let payload = self.payload();
        let Some((first, _)) = payload.split_once(OBJECT_DELIMITER) else {
            return "";
        };
        if first.starts_with("collection:") || first.starts_with("role:") {
            &payload[..first.len() + 1]
        } else {
            ""
        }
    }

    /// Path of the file-backed segment (playbook or task file) the key
    /// descends from, if any.
    pub fn file_path(&self) -> Option<&str> {
        self.payload()
            .split(OBJECT_DELIMITER)
            .filter_map(|segment| {
                segment
                    .strip_prefix("playbook:")
                    .or_else(|| segment.strip_prefix("taskfile:"))
            })
            .last()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Global and local key of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPair {
    pub global: Key,
    pub local: Key,
}

fn owner_prefix(collection: &str, role: &str) -> String {
    if !collection.is_empty() {
        format!("collection{KEY_DELIMITER}{collection}{OBJECT_DELIMITER}")
    } else if !role.is_empty() {
        format!("role{KEY_DELIMITER}{role}{OBJECT_DELIMITER}")
    } else {
        String::new()
    }
}

fn check_name(kind: EntityKind, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GuardError::structural(
            kind.as_str(),
            "entity name must not be empty",
        ));
    }
    if name.contains(OBJECT_DELIMITER) || name.contains(KIND_DELIMITER) {
        return Err(GuardError::structural(
            name,
            format!("{kind} name contains a reserved delimiter"),
        ));
    }
    Ok(())
}

/// Lexically normalize a slash-separated path (`a/./b/../c` -> `a/c`).
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".into()
    } else {
        joined
    }
}

/// Reject empty and non-normalized paths.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(GuardError::structural(path, "path must not be empty"));
    }
    let normalized = normalize_path(path);
    if normalized != path {
        return Err(GuardError::structural(
            path,
            format!("path is not normalized (expected '{normalized}')"),
        ));
    }
    if path.contains(OBJECT_DELIMITER) {
        return Err(GuardError::structural(path, "path contains '#'"));
    }
    Ok(())
}

impl KeyPair {
    fn file_backed(kind: EntityKind, collection: &str, role: &str, defined_in: &str) -> Result<Self> {
        validate_path(defined_in)?;
        let k = kind.as_str();
        let prefix = owner_prefix(collection, role);
        Ok(Self {
            global: Key::compose(kind, &format!("{prefix}{k}{KEY_DELIMITER}{defined_in}")),
            local: Key::compose(kind, &format!("{k}{KEY_DELIMITER}{defined_in}")),
        })
    }

    pub fn playbook(collection: &str, role: &str, defined_in: &str) -> Result<Self> {
        Self::file_backed(EntityKind::Playbook, collection, role, defined_in)
    }

    pub fn taskfile(collection: &str, role: &str, defined_in: &str) -> Result<Self> {
        Self::file_backed(EntityKind::TaskFile, collection, role, defined_in)
    }

    pub fn inventory(defined_in: &str) -> Result<Self> {
        Self::file_backed(EntityKind::Inventory, "", "", defined_in)
    }

    pub fn collection(name: &str) -> Result<Self> {
        check_name(EntityKind::Collection, name)?;
        let key = Key::compose(
            EntityKind::Collection,
            &format!("collection{KEY_DELIMITER}{name}"),
        );
        Ok(Self {
            global: key.clone(),
            local: key,
        })
    }

    /// Roles are prefixed by their owning collection only.
    pub fn role(collection: &str, fqcn: &str, defined_in: &str) -> Result<Self> {
        check_name(EntityKind::Role, fqcn)?;
        validate_path(defined_in)?;
        let prefix = owner_prefix(collection, "");
        Ok(Self {
            global: Key::compose(EntityKind::Role, &format!("{prefix}role{KEY_DELIMITER}{fqcn}")),
            local: Key::compose(EntityKind::Role, &format!("role{KEY_DELIMITER}{defined_in}")),
        })
    }

    /// Modules may be synthesized (built-ins) and have no defining file;
    /// the local key then falls back to the FQCN.
    pub fn module(collection: &str, role: &str, fqcn: &str, defined_in: &str) -> Result<Self> {
        check_name(EntityKind::Module, fqcn)?;
        let local_name = if defined_in.is_empty() {
            fqcn
        } else {
            validate_path(defined_in)?;
            defined_in
        };
        let prefix = owner_prefix(collection, role);
        Ok(Self {
            global: Key::compose(EntityKind::Module, &format!("{prefix}module{KEY_DELIMITER}{fqcn}")),
            local: Key::compose(EntityKind::Module, &format!("module{KEY_DELIMITER}{local_name}")),
        })
    }

    fn indexed_child(parent: &KeyPair, kind: EntityKind, index: usize) -> Self {
        let k = kind.as_str();
        Self {
            global: Key::compose(
                kind,
                &format!("{}{OBJECT_DELIMITER}{k}{KEY_DELIMITER}[{index}]", parent.global.payload()),
            ),
            local: Key::compose(
                kind,
                &format!("{}{OBJECT_DELIMITER}{k}{KEY_DELIMITER}[{index}]", parent.local.payload()),
            ),
        }
    }

    pub fn play(playbook: &KeyPair, index: usize) -> Self {
        Self::indexed_child(playbook, EntityKind::Play, index)
    }

    /// `parent` is the owning play or task file.
    pub fn task(parent: &KeyPair, index: usize) -> Self {
        Self::indexed_child(parent, EntityKind::Task, index)
    }

    pub fn role_reference(play: &KeyPair, index: usize) -> Self {
        Self::indexed_child(play, EntityKind::RoleReference, index)
    }
}

/// Global key of a task file imported by `caller`, inheriting the caller's
/// collection/role owner.
pub fn imported_taskfile_key(caller: &Key, path: &str) -> Key {
    let normalized = normalize_path(path);
    Key::compose(
        EntityKind::TaskFile,
        &format!("{}taskfile{KEY_DELIMITER}{normalized}", caller.owner_prefix()),
    )
}

/// Local (unowned) key of a task file at `path`.
pub fn local_taskfile_key(path: &str) -> Key {
    Key::compose(
        EntityKind::TaskFile,
        &format!("taskfile{KEY_DELIMITER}{}", normalize_path(path)),
    )
}
