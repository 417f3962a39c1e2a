//! Popular module/role names used to guess what an unresolved reference
//! probably meant.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

/// Well-known collection modules, keyed later by their short name.
const POPULAR_MODULES: &[&str] = &[
    "ansible.posix.acl",
    "ansible.posix.authorized_key",
    "ansible.posix.firewalld",
    "ansible.posix.mount",
    "ansible.posix.seboolean",
    "ansible.posix.selinux",
    "ansible.posix.synchronize",
    "ansible.posix.sysctl",
    "ansible.windows.win_command",
    "ansible.windows.win_copy",
    "ansible.windows.win_file",
    "ansible.windows.win_service",
    "ansible.windows.win_shell",
    "amazon.aws.ec2_instance",
    "amazon.aws.s3_object",
    "community.crypto.openssl_privatekey",
    "community.crypto.x509_certificate",
    "community.docker.docker_compose_v2",
    "community.docker.docker_container",
    "community.docker.docker_image",
    "community.docker.docker_network",
    "community.general.archive",
    "community.general.gem",
    "community.general.homebrew",
    "community.general.ini_file",
    "community.general.make",
    "community.general.mount",
    "community.general.nmcli",
    "community.general.npm",
    "community.general.pacman",
    "community.general.slack",
    "community.general.snap",
    "community.general.timezone",
    "community.general.ufw",
    "community.general.yarn",
    "community.mysql.mysql_db",
    "community.mysql.mysql_user",
    "community.postgresql.postgresql_db",
    "community.postgresql.postgresql_user",
    "kubernetes.core.helm",
    "kubernetes.core.k8s",
    "kubernetes.core.k8s_info",
];

/// Well-known Galaxy roles.
const POPULAR_ROLES: &[&str] = &[
    "geerlingguy.apache",
    "geerlingguy.certbot",
    "geerlingguy.docker",
    "geerlingguy.java",
    "geerlingguy.mysql",
    "geerlingguy.nginx",
    "geerlingguy.nodejs",
    "geerlingguy.pip",
    "geerlingguy.postgresql",
    "geerlingguy.redis",
    "nginxinc.nginx",
];

/// Which table to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Module,
    Role,
}

/// Short name -> fully-qualified candidates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PopularityTable {
    #[serde(default)]
    pub modules: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub roles: HashMap<String, Vec<String>>,
}

fn group_by_short_name(names: &[&str]) -> HashMap<String, Vec<String>> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for name in names {
        grouped
            .entry(short_name(name).to_string())
            .or_default()
            .push(name.to_string());
    }
    grouped
}

fn short_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

impl PopularityTable {
    /// Compiled-in table.
    pub fn builtin() -> Self {
        Self {
            modules: group_by_short_name(POPULAR_MODULES),
            roles: group_by_short_name(POPULAR_ROLES),
        }
    }

    /// Load a replacement table from JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            GuardError::Config(format!(
                "invalid popularity table {}: {e}",
                path.display()
            ))
        })
    }

    /// Candidates for `name`, matched on its short name only.
    pub fn candidates(&self, kind: ReferenceKind, name: &str) -> Vec<String> {
        let table = match kind {
            ReferenceKind::Module => &self.modules,
            ReferenceKind::Role => &self.roles,
        };
        table.get(short_name(name)).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_groups_by_short_name() {
        let table = PopularityTable::builtin();
        let mount = table.candidates(ReferenceKind::Module, "mount");
        assert_eq!(
            mount,
            vec!["ansible.posix.mount".to_string(), "community.general.mount".to_string()]
        );
        assert_eq!(
            table.candidates(ReferenceKind::Role, "docker"),
            vec!["geerlingguy.docker".to_string()]
        );
        assert!(table.candidates(ReferenceKind::Module, "no_such_thing").is_empty());
    }

    #[test]
    fn loads_table_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"modules": {{"deploy": ["acme.ops.deploy"]}}}}"#).unwrap();
        let table = PopularityTable::load(file.path()).unwrap();
        assert_eq!(
            table.candidates(ReferenceKind::Module, "x.y.deploy"),
            vec!["acme.ops.deploy".to_string()]
        );
        assert!(table.roles.is_empty());
    }
}
