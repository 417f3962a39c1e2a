use std::collections::HashSet;

use crate::analysis::template;
use crate::analysis::walk::{ResolvedTask, ResolvedTree};
use crate::extract::builtin::remote_host;
use crate::extract::Category;
use crate::ir::SourceLocation;
use crate::rules::{AttackCategory, Detector, Evidence, Finding, RuleMetadata, Severity};

/// Programs that touch a downloaded file without running it.
const NON_EXECUTING_PROGRAMS: &[&str] = &["tar", "gunzip", "unzip", "mv", "cp"];

/// GUARD-001: Download And Execute
///
/// Correlates a file fetched by an inbound transfer with a later command
/// that runs it, either directly (`/tmp/x.sh --install`) or through an
/// interpreter (`bash /tmp/x.sh`).
pub struct DownloadExecDetector;

struct Download<'t> {
    /// Raw and resolved destinations of one transfer.
    dests: Vec<String>,
    task: &'t ResolvedTask,
    sources: Vec<String>,
    mutable_src: Vec<String>,
}

fn is_loop_placeholder(task: &ResolvedTask, value: &str) -> bool {
    let Some(spec) = &task.task.loop_spec else {
        return false;
    };
    let prefix = format!("{}.", spec.var);
    template::blocks(value)
        .iter()
        .any(|b| b.name == spec.var || b.name.starts_with(&prefix))
}

fn downloads(tree: &ResolvedTree) -> Vec<Download<'_>> {
    let mut out = Vec::new();
    for task in &tree.tasks {
        for effect in task.findings.iter().filter(|f| f.category == Category::InboundTransfer) {
            let sources: Vec<String> = effect
                .values_of("src")
                .into_iter()
                .filter(|s| !is_loop_placeholder(task, s))
                .map(String::from)
                .collect();
            let dests: Vec<String> = effect
                .values_of("dest")
                .into_iter()
                .filter(|d| !d.is_empty() && !is_loop_placeholder(task, d))
                .map(String::from)
                .collect();
            if dests.is_empty() {
                continue;
            }
            out.push(Download {
                dests,
                task,
                sources,
                mutable_src: effect.mutable_vars_of("src"),
            });
        }
    }
    out
}

/// Split a command line on whitespace, keeping `{{ ... }}` blocks whole.
fn split_command(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_block = false;
    for word in line.split_whitespace() {
        if word.contains("{{") && !word.contains("}}") {
            in_block = true;
        }
        if word.contains("}}") {
            in_block = false;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
        if !in_block {
            parts.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// `target` is the program itself or the first non-flag argument of a
/// program that executes its argument.
fn is_primary_target(line: &str, target: &str) -> bool {
    let mut position = 0;
    for part in split_command(line) {
        if position == 0 {
            let program = part.rsplit('/').next().unwrap_or(&part);
            if NON_EXECUTING_PROGRAMS.contains(&program) {
                return false;
            }
        }
        if part.starts_with(target) {
            return position <= 1;
        }
        if part.starts_with('-') {
            continue;
        }
        position += 1;
    }
    false
}

/// Only the first line of the command text is considered.
pub(crate) fn is_executed(command: &str, target: &str) -> bool {
    let Some(line) = command.lines().next() else {
        return false;
    };
    let line = line.trim();
    if target.is_empty() || !line.contains(target) {
        return false;
    }
    line.starts_with(target) || is_primary_target(line, target)
}

impl Detector for DownloadExecDetector {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "GUARD-001".into(),
            name: "Download And Execute".into(),
            description: "Executes a file that an earlier task downloaded from a remote source".into(),
            default_severity: Severity::Critical,
            attack_category: AttackCategory::RemoteCodeExecution,
            cwe_id: Some("CWE-494".into()),
        }
    }

    fn run(&self, tree: &ResolvedTree) -> Vec<Finding> {
        let meta = self.metadata();
        let downloads = downloads(tree);
        let mut matched: HashSet<usize> = HashSet::new();
        let mut findings = Vec::new();

        for exec in &tree.tasks {
            for effect in exec.findings.iter().filter(|f| f.category == Category::CmdExec) {
                let commands = effect.values_of("cmd");
                for (i, download) in downloads.iter().enumerate() {
                    if matched.contains(&i) {
                        continue;
                    }
                    let Some((dest, command)) = download.dests.iter().find_map(|dest| {
                        commands
                            .iter()
                            .find(|c| is_executed(c, dest))
                            .map(|c| (dest, c))
                    }) else {
                        continue;
                    };
                    matched.insert(i);

                    let dl_location = SourceLocation::of_task(&download.task.task);
                    let exec_location = SourceLocation::of_task(&exec.task);
                    let mut finding = meta.finding(
                        format!(
                            "'{}' is downloaded by '{}' and executed by '{}'",
                            dest, download.task.task.key, exec.task.key
                        ),
                        Some(exec_location.clone()),
                    );
                    finding.evidence.push(Evidence {
                        description: format!("Download block: {}", dl_location.file),
                        location: Some(dl_location),
                        snippet: download.sources.first().cloned(),
                    });
                    finding.evidence.push(Evidence {
                        description: format!("Exec block: {}", exec_location.file),
                        location: Some(exec_location),
                        snippet: Some(command.to_string()),
                    });
                    if !download.mutable_src.is_empty() {
                        finding.evidence.push(Evidence {
                            description: format!(
                                "Mutable variables: {}",
                                download.mutable_src.join(", ")
                            ),
                            location: None,
                            snippet: None,
                        });
                    }
                    let hosts: Vec<String> =
                        download.sources.iter().filter_map(|s| remote_host(s)).collect();
                    if !hosts.is_empty() {
                        finding.evidence.push(Evidence {
                            description: format!("Remote hosts: {}", hosts.join(", ")),
                            location: None,
                            snippet: None,
                        });
                    }
                    finding.related_tasks = vec![download.task.task.key.clone(), exec.task.key.clone()];
                    finding.remediation = Some(
                        "Pin the download with a checksum, fetch from a trusted location, \
                         or install through a package manager."
                            .into(),
                    );
                    findings.push(finding);
                }
            }
        }
        findings
    }
}
