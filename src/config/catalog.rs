//! Engine configuration: the name tables the analysis needs to know about
//! the automation language itself.
//!
//! Built once at startup and handed to the resolver and variable walker
//! by reference.

use std::collections::HashSet;

use super::Config;

const BUILTIN_MODULES: &[&str] = &[
    "add_host",
    "apt",
    "apt_key",
    "apt_repository",
    "assemble",
    "assert",
    "async_status",
    "blockinfile",
    "command",
    "copy",
    "cron",
    "deb822_repository",
    "debconf",
    "debug",
    "dnf",
    "dnf5",
    "dpkg_selections",
    "expect",
    "fail",
    "fetch",
    "file",
    "find",
    "gather_facts",
    "get_url",
    "getent",
    "git",
    "group",
    "group_by",
    "hostname",
    "import_playbook",
    "import_role",
    "import_tasks",
    "include",
    "include_role",
    "include_tasks",
    "include_vars",
    "iptables",
    "known_hosts",
    "lineinfile",
    "meta",
    "mount_facts",
    "package",
    "package_facts",
    "pause",
    "ping",
    "pip",
    "raw",
    "reboot",
    "replace",
    "rpm_key",
    "script",
    "service",
    "service_facts",
    "set_fact",
    "set_stats",
    "setup",
    "shell",
    "slurp",
    "stat",
    "subversion",
    "systemd",
    "systemd_service",
    "sysvinit",
    "tempfile",
    "template",
    "unarchive",
    "uri",
    "user",
    "validate_argument_spec",
    "wait_for",
    "wait_for_connection",
    "yum",
    "yum_repository",
];

const TASK_KEYWORDS: &[&str] = &[
    "action",
    "always",
    "any_errors_fatal",
    "args",
    "async",
    "become",
    "become_exe",
    "become_flags",
    "become_method",
    "become_user",
    "block",
    "changed_when",
    "check_mode",
    "collections",
    "connection",
    "debugger",
    "delay",
    "delegate_facts",
    "delegate_to",
    "diff",
    "environment",
    "failed_when",
    "ignore_errors",
    "ignore_unreachable",
    "local_action",
    "loop",
    "loop_control",
    "module_defaults",
    "name",
    "no_log",
    "notify",
    "poll",
    "port",
    "register",
    "remote_user",
    "rescue",
    "retries",
    "run_once",
    "tags",
    "throttle",
    "timeout",
    "until",
    "vars",
    "when",
];

const SPECIAL_VARIABLES: &[&str] = &[
    "ansible_check_mode",
    "ansible_collection_name",
    "ansible_config_file",
    "ansible_dependent_role_names",
    "ansible_diff_mode",
    "ansible_facts",
    "ansible_forks",
    "ansible_index_var",
    "ansible_inventory_sources",
    "ansible_limit",
    "ansible_loop",
    "ansible_loop_var",
    "ansible_parent_role_names",
    "ansible_parent_role_paths",
    "ansible_play_batch",
    "ansible_play_hosts",
    "ansible_play_hosts_all",
    "ansible_play_name",
    "ansible_play_role_names",
    "ansible_playbook_python",
    "ansible_role_name",
    "ansible_role_names",
    "ansible_run_tags",
    "ansible_search_path",
    "ansible_skip_tags",
    "ansible_verbosity",
    "ansible_version",
    "group_names",
    "groups",
    "hostvars",
    "inventory_dir",
    "inventory_file",
    "inventory_hostname",
    "inventory_hostname_short",
    "omit",
    "play_hosts",
    "playbook_dir",
    "role_name",
    "role_names",
    "role_path",
];

/// Prefix of gathered facts (`ansible_distribution`, `ansible_env`, ...).
const FACT_PREFIX: &str = "ansible_";

/// Immutable name tables consulted by resolution and variable lookup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    builtin_modules: HashSet<String>,
    task_keywords: HashSet<String>,
    special_variables: HashSet<String>,
    /// Hard bound on tree depth.
    pub max_depth: usize,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            builtin_modules: BUILTIN_MODULES.iter().map(|s| s.to_string()).collect(),
            task_keywords: TASK_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            special_variables: SPECIAL_VARIABLES.iter().map(|s| s.to_string()).collect(),
            max_depth: super::DEFAULT_MAX_DEPTH,
        }
    }

    /// Compiled-in tables extended with the `[engine]` section of `config`.
    pub fn from_config(config: &Config) -> Self {
        let mut engine = Self::new();
        engine
            .builtin_modules
            .extend(config.engine.extra_builtin_modules.iter().cloned());
        engine
            .special_variables
            .extend(config.engine.extra_special_variables.iter().cloned());
        engine.max_depth = config.scan.max_depth;
        engine
    }

    /// Short name of a module shipped in `ansible.builtin`.
    pub fn is_builtin_module(&self, name: &str) -> bool {
        self.builtin_modules.contains(name)
    }

    /// Task-level keyword (including `with_<lookup>` loops) rather than a
    /// module name.
    pub fn is_task_keyword(&self, name: &str) -> bool {
        self.task_keywords.contains(name) || name.starts_with("with_")
    }

    /// Reserved name whose value only exists at run time.
    pub fn is_special_variable(&self, name: &str) -> bool {
        self.special_variables.contains(name) || name.starts_with(FACT_PREFIX)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tables() {
        let engine = EngineConfig::new();
        assert!(engine.is_builtin_module("get_url"));
        assert!(!engine.is_builtin_module("community.general.ufw"));
        assert!(engine.is_task_keyword("become"));
        assert!(engine.is_task_keyword("with_items"));
        assert!(!engine.is_task_keyword("shell"));
        assert!(engine.is_special_variable("inventory_hostname"));
        assert!(engine.is_special_variable("ansible_distribution"));
        assert!(!engine.is_special_variable("app_version"));
    }

    #[test]
    fn config_extends_tables() {
        let mut config = Config::default();
        config.engine.extra_builtin_modules.push("my_module".into());
        config.engine.extra_special_variables.push("site_fact".into());
        config.scan.max_depth = 8;
        let engine = EngineConfig::from_config(&config);
        assert!(engine.is_builtin_module("my_module"));
        assert!(engine.is_special_variable("site_fact"));
        assert_eq!(engine.max_depth, 8);
    }
}
