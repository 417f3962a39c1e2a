pub mod catalog;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};
use crate::ir::EntityKind;
use crate::rules::policy::Policy;

pub use catalog::EngineConfig;

pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Top-level configuration from `.taskguard.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub dependencies: DependencySettings,
    #[serde(default)]
    pub engine: EngineOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Maximum call-tree depth before the root is rejected.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Entity kinds analyzed as entry points.
    #[serde(default = "default_entry_points")]
    pub entry_points: Vec<EntityKind>,
    /// Glob patterns over `defined_in`; matching roots are skipped.
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_entry_points() -> Vec<EntityKind> {
    vec![EntityKind::Playbook, EntityKind::Role]
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            entry_points: default_entry_points(),
            exclude: Vec::new(),
        }
    }
}

impl ScanSettings {
    /// Compile `exclude` into glob patterns.
    pub fn exclude_patterns(&self) -> Result<Vec<glob::Pattern>> {
        self.exclude
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| GuardError::Config(format!("invalid exclude pattern '{p}': {e}")))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencySettings {
    /// Collections trusted without further verification.
    #[serde(default)]
    pub allow: Vec<String>,
    /// JSON file replacing the built-in popular module/role table.
    #[serde(default)]
    pub popularity_table: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineOverrides {
    #[serde(default)]
    pub extra_builtin_modules: Vec<String>,
    #[serde(default)]
    pub extra_special_variables: Vec<String>,
}

impl Config {
    /// Load config from a TOML file. Returns default if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        if config.scan.max_depth == 0 {
            return Err(GuardError::Config("scan.max_depth must be at least 1".into()));
        }
        config.scan.exclude_patterns()?;
        Ok(config)
    }

    /// Generate a starter config file.
    pub fn starter_toml() -> &'static str {
        r#"# taskguard configuration

[policy]
# Minimum severity to fail the scan (info, low, medium, high, critical).
fail_on = "high"

# Rule IDs to ignore entirely.
# ignore_rules = ["GUARD-006"]

# Fail an entry point that depends on a collection outside the allow-list,
# even when no finding reaches fail_on.
# fail_on_unverified = true

# Per-rule severity overrides.
# [policy.overrides]
# "GUARD-002" = "low"

[scan]
# Call trees deeper than this are rejected.
max_depth = 64
# Entity kinds analyzed as entry points.
entry_points = ["playbook", "role"]
# Skip roots whose file matches one of these patterns.
# exclude = ["tests/**", "molecule/**"]

[dependencies]
# Collections trusted without verification.
allow = []
# popularity_table = "popular.json"
"#
    }
}
