//! Supply chain analysis: external collections a tree depends on, and
//! typosquat hints against well-known collection names.

use serde::{Deserialize, Serialize};

use super::walk::ResolvedTask;
use crate::ir::ExecutableType;
use crate::resolver::owning_collection;

/// Well-known collection names for typosquat comparison.
const POPULAR_COLLECTIONS: &[&str] = &[
    "ansible.posix",
    "ansible.windows",
    "ansible.netcommon",
    "ansible.utils",
    "community.general",
    "community.crypto",
    "community.docker",
    "community.mysql",
    "community.postgresql",
    "community.windows",
    "community.aws",
    "community.kubernetes",
    "community.rabbitmq",
    "community.mongodb",
    "kubernetes.core",
    "amazon.aws",
    "azure.azcollection",
    "google.cloud",
    "containers.podman",
    "cisco.ios",
    "cisco.nxos",
    "arista.eos",
    "junipernetworks.junos",
    "fortinet.fortios",
    "vmware.vmware_rest",
    "community.vmware",
    "openstack.cloud",
    "redhat.rhel_system_roles",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TyposquatHint {
    pub collection: String,
    pub similar_to: String,
    pub distance: usize,
}

/// Owning collections of every module-typed task, sorted and deduplicated.
/// `ansible.builtin` and names that are not fully qualified are skipped.
pub fn dependent_collections(tasks: &[ResolvedTask]) -> Vec<String> {
    let mut collections: Vec<String> = tasks
        .iter()
        .filter(|t| t.task.executable_type == ExecutableType::Module)
        .filter_map(|t| owning_collection(&t.task.resolved_name))
        .collect();
    collections.sort();
    collections.dedup();
    collections
}

/// Check collection names for typosquat candidates.
///
/// Returns a hint for every name within Levenshtein distance 1-2 of a
/// well-known collection that is not itself an exact match.
pub fn check_typosquats(collections: &[String]) -> Vec<TyposquatHint> {
    let mut hints = Vec::new();
    for collection in collections {
        let name = collection.to_lowercase();
        if POPULAR_COLLECTIONS.contains(&name.as_str()) {
            continue;
        }
        for &popular in POPULAR_COLLECTIONS {
            let distance = levenshtein::levenshtein(&name, popular);
            if distance > 0 && distance <= 2 {
                hints.push(TyposquatHint {
                    collection: collection.clone(),
                    similar_to: popular.to_string(),
                    distance,
                });
            }
        }
    }
    hints
}
