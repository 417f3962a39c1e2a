use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a variable's value came from.
///
/// This is the taint abstraction of the engine: rules never look at the
/// concrete value to decide risk, only at whether the source is one a
/// caller of the content could override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariableSource {
    /// Literal value from a `vars:` block or `set_fact`.
    Normal,
    /// Bound by the task's own loop.
    Loop,
    /// Produced at run time by `register:`.
    Registered,
    RoleDefault,
    RoleVar,
    /// `group_vars/all` inventory entry.
    Inventory,
    /// Reserved name (facts, magic variables) available at run time.
    Special,
    /// Only part of the expression could be followed.
    Partial,
    Failed,
}

impl VariableSource {
    /// Whether a caller of the content, not its author, controls the value.
    pub fn is_mutable(&self) -> bool {
        matches!(
            self,
            Self::RoleDefault | Self::RoleVar | Self::Inventory | Self::Special
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for VariableSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Loop => "loop",
            Self::Registered => "registered",
            Self::RoleDefault => "role-default",
            Self::RoleVar => "role-var",
            Self::Inventory => "inventory",
            Self::Special => "special",
            Self::Partial => "partial",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A variable consulted while resolving a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVariable {
    pub key: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub source: VariableSource,
}
