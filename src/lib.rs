//! taskguard: static risk analysis for Ansible content.
//!
//! Loads a parsed entity dump, resolves module/role/task-file references,
//! walks the call tree of every playbook and role with scoped variable
//! resolution, and reports risky task effects (download-then-execute,
//! unverified collections, caller-overridable paths and commands).
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use taskguard::{scan, ScanOptions};
//!
//! let options = ScanOptions::default();
//! let report = scan(Path::new("./dump"), &options).unwrap();
//! println!("Pass: {}, Findings: {}", report.verdict.pass, report.findings.len());
//! ```

pub mod adapter;
pub mod analysis;
pub mod config;
pub mod error;
pub mod extract;
pub mod ir;
pub mod output;
pub mod resolver;
pub mod rules;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use analysis::{Analyzer, RootReport};
use config::{Config, EngineConfig};
use error::Result;
use output::OutputFormat;
use resolver::{resolve_corpus, PopularityTable, ResolvedCorpus};
use rules::policy::PolicyVerdict;
use rules::{Finding, RuleEngine};

pub const CONFIG_FILE: &str = ".taskguard.toml";

/// Options for a scan invocation.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Path to config file (defaults to `.taskguard.toml` in scan dir).
    pub config_path: Option<PathBuf>,
    /// Output format.
    pub format: OutputFormat,
    /// CLI override for fail_on threshold.
    pub fail_on_override: Option<rules::Severity>,
    /// CLI override for `scan.max_depth`.
    pub max_depth_override: Option<usize>,
    /// Collections allow-listed in addition to `dependencies.allow`.
    pub extra_allow: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            format: OutputFormat::Console,
            fail_on_override: None,
            max_depth_override: None,
            extra_allow: Vec::new(),
        }
    }
}

/// Complete scan report.
#[derive(Debug)]
pub struct ScanReport {
    pub target_name: String,
    /// Per-root results, in root order, with policy applied.
    pub reports: Vec<RootReport>,
    /// All effective findings across roots.
    pub findings: Vec<Finding>,
    pub verdict: PolicyVerdict,
}

/// Load the config for `path` and fold in CLI overrides.
pub fn load_config(path: &Path, options: &ScanOptions) -> Result<Config> {
    let config_path = options.config_path.clone().unwrap_or_else(|| {
        let dir = if path.is_file() {
            path.parent().unwrap_or(path)
        } else {
            path
        };
        dir.join(CONFIG_FILE)
    });
    let mut config = Config::load(&config_path)?;

    if let Some(fail_on) = options.fail_on_override {
        config.policy.fail_on = fail_on;
    }
    if let Some(depth) = options.max_depth_override {
        config.scan.max_depth = depth.max(1);
    }
    config.dependencies.allow.extend(options.extra_allow.iter().cloned());
    Ok(config)
}

/// Load the dump under `path` and resolve it, unless it already ships
/// its edge list.
pub fn load_and_resolve(path: &Path, config: &Config, engine: &EngineConfig) -> Result<ResolvedCorpus> {
    let loaded = adapter::auto_detect_and_load(path, engine)?;
    if let Some(edges) = loaded.edges {
        tracing::debug!(edges = edges.len(), "using pre-resolved edge list");
        return Ok(ResolvedCorpus {
            corpus: loaded.corpus,
            edges,
        });
    }
    let popularity = match &config.dependencies.popularity_table {
        Some(table) => PopularityTable::load(table)?,
        None => PopularityTable::builtin(),
    };
    Ok(resolve_corpus(loaded.corpus, engine, &popularity))
}

/// Run a complete scan: load, resolve, analyze every root, evaluate policy.
pub fn scan(path: &Path, options: &ScanOptions) -> Result<ScanReport> {
    let config = load_config(path, options)?;
    let engine = EngineConfig::from_config(&config);
    let resolved = load_and_resolve(path, &config, &engine)?;

    let allow: BTreeSet<String> = config.dependencies.allow.iter().cloned().collect();
    let analyzer = Analyzer::new(&resolved, &engine, RuleEngine::with_allow_list(allow))
        .with_entry_points(config.scan.entry_points.clone())
        .with_exclude(config.scan.exclude_patterns()?);
    let mut reports = analyzer.analyze_all()?;

    let target_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".into());

    let verdict = config.policy.enforce(&mut reports);
    let findings: Vec<Finding> = reports.iter().flat_map(|r| r.findings.iter().cloned()).collect();

    Ok(ScanReport {
        target_name,
        reports,
        findings,
        verdict,
    })
}

/// Render a scan report in the specified format.
pub fn render_report(report: &ScanReport, format: OutputFormat) -> Result<String> {
    output::render(report, format)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::error::GuardError;
    use crate::rules::Severity;
    use std::path::Path;

    #[test]
    fn download_then_execute_detected() {
        let opts = ScanOptions::default();
        let report = scan(Path::new("tests/fixtures/download_exec"), &opts).unwrap();

        assert_eq!(report.reports.len(), 2);
        for root in &report.reports {
            let hits: Vec<_> = root.findings.iter().filter(|f| f.rule_id == "GUARD-001").collect();
            assert_eq!(hits.len(), 1, "root {}", root.root_key);
            assert_eq!(hits[0].related_tasks.len(), 2);
            assert!(root.findings.iter().any(|f| f.rule_id == "GUARD-003"));
        }
        assert!(!report.verdict.pass);
        assert_eq!(report.verdict.highest_severity, Some(Severity::Critical));
    }

    #[test]
    fn clean_playbook_passes() {
        let opts = ScanOptions::default();
        let report = scan(Path::new("tests/fixtures/clean"), &opts).unwrap();
        assert_eq!(report.reports.len(), 1);
        assert!(report.findings.is_empty());
        assert!(report.verdict.pass);

        let root = &report.reports[0];
        assert!(root.dependency.result);
        assert!(root.unresolved.is_empty());
        assert_eq!(root.tasks.len(), 2);
        assert_eq!(root.tasks[0].resolved_name, "ansible.builtin.copy");
        assert!(root.risky_task_findings().next().is_none());
    }

    #[test]
    fn unverified_collection_fails_configured_policy() {
        let opts = ScanOptions::default();
        let report = scan(Path::new("tests/fixtures/unverified_dependency"), &opts).unwrap();
        let root = &report.reports[0];
        assert!(!root.dependency.result);
        assert_eq!(root.dependency.unverified, vec!["acme.tools"]);
        assert_eq!(root.dependent_collections, vec!["acme.tools", "community.general"]);
        assert!(report.findings.iter().any(|f| f.rule_id == "GUARD-002"));
        assert!(!report.verdict.pass);
    }

    #[test]
    fn allow_override_clears_dependency_finding() {
        let opts = ScanOptions {
            extra_allow: vec!["acme.tools".into()],
            ..ScanOptions::default()
        };
        let report = scan(Path::new("tests/fixtures/unverified_dependency"), &opts).unwrap();
        assert!(report.reports[0].dependency.result);
        assert!(report.verdict.pass);
    }

    #[test]
    fn pre_resolved_dump_gives_same_findings() {
        let fixture = Path::new("tests/fixtures/download_exec");
        let opts = ScanOptions::default();
        let config = load_config(fixture, &opts).unwrap();
        let engine = EngineConfig::from_config(&config);
        let resolved = load_and_resolve(fixture, &config, &engine).unwrap();

        let dir = tempfile::tempdir().unwrap();
        adapter::dump::write_dump(dir.path(), &resolved.corpus, &resolved.edges).unwrap();

        let original = scan(fixture, &opts).unwrap();
        let reloaded = scan(dir.path(), &opts).unwrap();
        let ids = |r: &ScanReport| r.findings.iter().map(|f| f.rule_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&original), ids(&reloaded));
    }

    #[test]
    fn ignored_rule_is_dropped_from_roots() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("custom.toml");
        std::fs::write(&config, "[policy]\nignore_rules = [\"GUARD-001\"]\n").unwrap();
        let opts = ScanOptions {
            config_path: Some(config),
            ..ScanOptions::default()
        };
        let report = scan(Path::new("tests/fixtures/download_exec"), &opts).unwrap();
        assert!(report
            .reports
            .iter()
            .all(|r| r.findings.iter().all(|f| f.rule_id != "GUARD-001")));
        assert!(report.findings.iter().all(|f| f.rule_id != "GUARD-001"));
    }

    #[test]
    fn repeated_entity_in_one_dump_is_structural() {
        let dir = tempfile::tempdir().unwrap();
        let line = "{\"type\":\"playbook\",\"key\":\"playbook playbook:site.yml\",\"local_key\":\"playbook playbook:site.yml\",\"name\":\"site.yml\",\"defined_in\":\"site.yml\"}";
        std::fs::write(dir.path().join("entities.jsonl"), format!("{line}\n{line}\n")).unwrap();
        let err = scan(dir.path(), &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, GuardError::Structural { .. }), "{err}");
    }

    #[test]
    fn unnormalized_path_in_dump_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("entities.jsonl"),
            "{\"type\":\"playbook\",\"key\":\"playbook playbook:./a/../site.yml\",\"local_key\":\"playbook playbook:./a/../site.yml\",\"name\":\"site.yml\",\"defined_in\":\"./a/../site.yml\"}\n",
        )
        .unwrap();
        let err = scan(dir.path(), &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, GuardError::Structural { .. }), "{err}");
    }

    #[test]
    fn malformed_line_surfaces_as_load_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("entities.jsonl"), "{not json\n").unwrap();
        match scan(dir.path(), &ScanOptions::default()) {
            Err(GuardError::Load { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected load error, got {:?}", other.map(|r| r.verdict)),
        }
    }

    #[test]
    fn strict_dependency_policy_fails_without_findings_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("strict.toml");
        std::fs::write(&config, "[policy]\nfail_on = \"critical\"\nfail_on_unverified = true\n").unwrap();
        let opts = ScanOptions {
            config_path: Some(config),
            ..ScanOptions::default()
        };
        let report = scan(Path::new("tests/fixtures/unverified_dependency"), &opts).unwrap();
        assert!(!report.verdict.pass);
        assert_eq!(report.verdict.failing_roots.len(), 1);
        assert_eq!(report.verdict.failing_roots[0].as_str(), "playbook playbook:firewall.yml");
    }

    #[test]
    fn every_format_renders() {
        let report = scan(Path::new("tests/fixtures/download_exec"), &ScanOptions::default()).unwrap();
        for format in [
            OutputFormat::Console,
            OutputFormat::Json,
            OutputFormat::Jsonl,
            OutputFormat::Sarif,
        ] {
            let out = render_report(&report, format).unwrap();
            assert!(out.contains("GUARD-001"), "{format:?}");
        }
    }
}
