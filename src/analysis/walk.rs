//! Pre-order walk of one call tree with a branch-local variable context.
//!
//! Entity variables stay in the branch that declared them. Facts made by a
//! task (`register`, `set_fact`) flow forward to every later sibling and
//! out of the enclosing role or task file.

use serde::Serialize;

use super::context::{Context, Facts};
use super::options::{resolve_module_options, OptionResolution};
use super::tree::TreeNode;
use crate::extract::{ExtractorRegistry, TaskFinding};
use crate::ir::{Corpus, Entity, EntityKind, Key, Task};

/// A task reached from a root, with its options resolved under the
/// context of the path it was reached by.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTask {
    pub task: Task,
    pub depth: usize,
    pub resolution: OptionResolution,
    pub findings: Vec<TaskFinding>,
}

/// Tasks of one tree in pre-order. The same task may appear more than
/// once when it is reachable through several paths.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTree {
    pub root: Key,
    pub tasks: Vec<ResolvedTask>,
}

struct Walker<'a> {
    corpus: &'a Corpus,
    registry: &'a ExtractorRegistry,
    tasks: Vec<ResolvedTask>,
}

impl<'a> Walker<'a> {
    /// Visit `node` and its subtree. Returns the facts made in that
    /// subtree, in traversal order.
    fn visit(&mut self, node: &TreeNode, depth: usize, mut ctx: Context<'_>) -> Facts {
        let mut facts = Facts::default();
        match self.corpus.get(node.key.as_str()) {
            Some(entity) => {
                ctx.add(entity, depth);
                if let Entity::Task(task) = entity {
                    let resolution = resolve_module_options(&ctx, task);
                    let findings = self.registry.extract(task, &resolution);
                    self.tasks.push(ResolvedTask {
                        task: task.clone(),
                        depth,
                        resolution,
                        findings,
                    });
                    facts = Facts::of_task(task);
                }
            }
            // built-in and uninstalled modules have no entity
            None if node.key.kind() == Some(EntityKind::Module) => {}
            None => {
                tracing::warn!(key = %node.key, "tree references an entity missing from the corpus");
            }
        }
        for child in &node.children {
            let made = self.visit(child, depth + 1, ctx.clone());
            ctx.absorb(&made);
            facts.extend(made);
        }
        facts
    }
}

/// Walk `tree`, cloning `base` at every branch and threading facts
/// forward between siblings.
pub fn walk_tree(
    tree: &TreeNode,
    corpus: &Corpus,
    base: &Context<'_>,
    registry: &ExtractorRegistry,
) -> ResolvedTree {
    let mut walker = Walker {
        corpus,
        registry,
        tasks: Vec::new(),
    };
    walker.visit(tree, 0, base.clone());
    ResolvedTree {
        root: tree.key.clone(),
        tasks: walker.tasks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tree::TreeBuilder;
    use crate::config::EngineConfig;
    use crate::ir::{ExecutableType, Play, Playbook, Role, RoleReference, TaskFile, VariableSource};
    use crate::resolver::{resolve_corpus, PopularityTable};
    use serde_json::json;

    #[test]
    fn sibling_branches_do_not_share_task_vars() {
        let pb = Playbook::new("", "", "site.yml").unwrap();
        let mut play = Play::new(&pb, 0);
        let mut first = Task::new(&play.keys(), 0, "site.yml", "debug", ExecutableType::Module)
            .unwrap()
            .with_module_options(json!({"msg": "{{ greeting }}"}));
        first.variables = json!({"greeting": "hi"}).as_object().cloned().unwrap();
        let second = Task::new(&play.keys(), 1, "site.yml", "debug", ExecutableType::Module)
            .unwrap()
            .with_module_options(json!({"msg": "{{ greeting }}"}));
        play.tasks = vec![first.key.clone(), second.key.clone()];
        let mut pb = pb;
        pb.plays = vec![play.key.clone()];

        let corpus = Corpus::new(vec![
            Entity::Playbook(pb.clone()),
            Entity::Play(play),
            Entity::Task(first),
            Entity::Task(second),
        ])
        .unwrap();
        let engine = EngineConfig::new();
        let resolved = resolve_corpus(corpus, &engine, &PopularityTable::builtin());
        let tree = TreeBuilder::new(&resolved.edges, 16).build(&pb.key).unwrap();
        let ctx = Context::new(&engine, std::iter::empty());
        let walked = walk_tree(&tree, &resolved.corpus, &ctx, &ExtractorRegistry::builtin());

        assert_eq!(walked.tasks.len(), 2);
        assert_eq!(walked.tasks[0].resolution.iterations[0], json!({"msg": "hi"}));
        assert_eq!(walked.tasks[1].resolution.iterations[0], json!({"msg": "{{ greeting }}"}));
        assert_eq!(walked.tasks[0].depth, 2);
    }

    #[test]
    fn facts_reach_later_siblings() {
        let pb = Playbook::new("", "", "site.yml").unwrap();
        let mut play = Play::new(&pb, 0);
        let mut fact = Task::new(&play.keys(), 0, "site.yml", "set_fact", ExecutableType::Module)
            .unwrap()
            .with_module_options(json!({"script_path": "/tmp/x.sh"}));
        fact.set_facts = json!({"script_path": "/tmp/x.sh"}).as_object().cloned().unwrap();
        let run = Task::new(&play.keys(), 1, "site.yml", "debug", ExecutableType::Module)
            .unwrap()
            .with_module_options(json!({"msg": "{{ script_path }} --run"}));
        play.tasks = vec![fact.key.clone(), run.key.clone()];
        let mut pb = pb;
        pb.plays = vec![play.key.clone()];

        let corpus = Corpus::new(vec![
            Entity::Playbook(pb.clone()),
            Entity::Play(play),
            Entity::Task(fact),
            Entity::Task(run),
        ])
        .unwrap();
        let engine = EngineConfig::new();
        let resolved = resolve_corpus(corpus, &engine, &PopularityTable::builtin());
        let tree = TreeBuilder::new(&resolved.edges, 16).build(&pb.key).unwrap();
        let ctx = Context::new(&engine, std::iter::empty());
        let walked = walk_tree(&tree, &resolved.corpus, &ctx, &ExtractorRegistry::builtin());

        assert_eq!(walked.tasks.len(), 2);
        assert_eq!(walked.tasks[1].resolution.iterations[0], json!({"msg": "/tmp/x.sh --run"}));
    }

    #[test]
    fn facts_leave_the_role_but_role_vars_do_not() {
        let mut role = Role::new("", "agent", "roles/agent").unwrap();
        role.variables = json!({"agent_home": "/opt/agent"}).as_object().cloned().unwrap();
        let mut tf = TaskFile::new("", "agent", "roles/agent/tasks/main.yml").unwrap();
        let mut register = Task::new(&tf.keys(), 0, "roles/agent/tasks/main.yml", "command", ExecutableType::Module)
            .unwrap()
            .with_owner("", "agent")
            .with_module_options(json!("id -u"));
        register.registered_variables = json!({"uid": register.key.as_str()}).as_object().cloned().unwrap();
        tf.tasks = vec![register.key.clone()];
        role.taskfiles = vec![tf.key.clone()];

        let pb = Playbook::new("", "", "site.yml").unwrap();
        let mut play = Play::new(&pb, 0);
        let rip = RoleReference::new(&play, 0, "agent").unwrap();
        let after = Task::new(&play.keys(), 0, "site.yml", "debug", ExecutableType::Module)
            .unwrap()
            .with_module_options(json!({"msg": "{{ uid.stdout }} {{ agent_home }}"}));
        play.roles = vec![rip.key.clone()];
        play.tasks = vec![after.key.clone()];
        let mut pb = pb;
        pb.plays = vec![play.key.clone()];

        let corpus = Corpus::new(vec![
            Entity::Playbook(pb.clone()),
            Entity::Play(play),
            Entity::RoleReference(rip),
            Entity::Role(role),
            Entity::TaskFile(tf),
            Entity::Task(register),
            Entity::Task(after),
        ])
        .unwrap();
        let engine = EngineConfig::new();
        let resolved = resolve_corpus(corpus, &engine, &PopularityTable::builtin());
        let tree = TreeBuilder::new(&resolved.edges, 16).build(&pb.key).unwrap();
        let ctx = Context::new(&engine, std::iter::empty());
        let walked = walk_tree(&tree, &resolved.corpus, &ctx, &ExtractorRegistry::builtin());

        let last = walked.tasks.last().unwrap();
        assert!(last.task.key.as_str().ends_with("#play:[0]#task:[0]"));
        let vars = &last.resolution.variables;
        assert!(vars.iter().any(|v| v.key == "uid.stdout" && v.source == VariableSource::Registered));
        assert!(vars.iter().any(|v| v.key == "agent_home" && v.source == VariableSource::Failed));
    }

    #[test]
    fn role_defaults_reach_role_tasks() {
        let mut role = Role::new("", "web", "roles/web").unwrap();
        role.default_variables = json!({"conf_dir": "nginx"}).as_object().cloned().unwrap();
        let mut tf = TaskFile::new("", "web", "roles/web/tasks/main.yml").unwrap();
        let task = Task::new(&tf.keys(), 0, "roles/web/tasks/main.yml", "copy", ExecutableType::Module)
            .unwrap()
            .with_owner("", "web")
            .with_module_options(json!({"src": "a", "dest": "/etc/{{ conf_dir }}/a"}));
        tf.tasks = vec![task.key.clone()];
        role.taskfiles = vec![tf.key.clone()];
        let root = role.key.clone();

        let corpus = Corpus::new(vec![Entity::Role(role), Entity::TaskFile(tf), Entity::Task(task)]).unwrap();
        let engine = EngineConfig::new();
        let resolved = resolve_corpus(corpus, &engine, &PopularityTable::builtin());
        let tree = TreeBuilder::new(&resolved.edges, 16).build(&root).unwrap();
        let ctx = Context::new(&engine, std::iter::empty());
        let walked = walk_tree(&tree, &resolved.corpus, &ctx, &ExtractorRegistry::builtin());

        assert_eq!(walked.tasks.len(), 1);
        let finding = &walked.tasks[0].findings[0];
        assert!(finding.injection_risk);
        assert_eq!(finding.risk_variables, vec!["conf_dir"]);
    }
}
