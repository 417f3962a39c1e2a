use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;

use taskguard::analysis::Analyzer;
use taskguard::config::{Config, EngineConfig};
use taskguard::error::{GuardError, Result};
use taskguard::ir::Key;
use taskguard::output::OutputFormat;
use taskguard::rules::{RuleEngine, Severity};
use taskguard::{ScanOptions, CONFIG_FILE};

#[derive(Parser)]
#[command(
    name = "taskguard",
    about = "Static risk analysis for Ansible playbooks, roles and collections",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan an entity dump for risky task sequences
    Scan {
        /// Directory containing entities.jsonl (searched recursively)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Config file path
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output format (console, json, jsonl, sarif)
        #[arg(long, short = 'f', default_value = "console")]
        format: String,

        /// Minimum severity to fail (info, low, medium, high, critical)
        #[arg(long)]
        fail_on: Option<String>,

        /// Maximum call-tree depth
        #[arg(long)]
        max_depth: Option<usize>,

        /// Allow-list a collection (repeatable)
        #[arg(long = "allow", value_name = "COLLECTION")]
        allow: Vec<String>,

        /// Write output to file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Resolve references and write a pre-resolved dump
    Resolve {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Output directory for entities.jsonl and edges.jsonl
        #[arg(long, short = 'o')]
        output: PathBuf,

        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Print the call tree of one root (or every root) as JSON lines
    Tree {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Global key of the root, e.g. "playbook playbook:site.yml"
        #[arg(long)]
        root: Option<String>,

        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// List all available detection rules
    ListRules {
        /// Output format (table, json)
        #[arg(long, short = 'f', default_value = "table")]
        format: String,
    },

    /// Generate a starter .taskguard.toml config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("TASKGUARD_LOG")
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Scan {
            path,
            config,
            format,
            fail_on,
            max_depth,
            allow,
            output,
        } => cmd_scan(path, config, format, fail_on, max_depth, allow, output),
        Commands::Resolve {
            path,
            output,
            config,
        } => cmd_resolve(path, output, config),
        Commands::Tree {
            path,
            root,
            config,
            max_depth,
        } => cmd_tree(path, root, config, max_depth),
        Commands::ListRules { format } => cmd_list_rules(format),
        Commands::Init { force } => cmd_init(force),
    };

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn cmd_scan(
    path: PathBuf,
    config: Option<PathBuf>,
    format_str: String,
    fail_on_str: Option<String>,
    max_depth: Option<usize>,
    allow: Vec<String>,
    output_path: Option<PathBuf>,
) -> Result<i32> {
    let format = OutputFormat::from_str_lenient(&format_str).unwrap_or_else(|| {
        eprintln!("Warning: unknown format '{}', using console", format_str);
        OutputFormat::Console
    });

    let fail_on = fail_on_str.and_then(|s| {
        let sev = Severity::from_str_lenient(&s);
        if sev.is_none() {
            eprintln!("Warning: unknown severity '{}', using config default", s);
        }
        sev
    });

    let options = ScanOptions {
        config_path: config,
        format,
        fail_on_override: fail_on,
        max_depth_override: max_depth,
        extra_allow: allow,
    };

    let report = taskguard::scan(&path, &options)?;
    let rendered = taskguard::render_report(&report, format)?;

    match output_path {
        Some(out) => std::fs::write(&out, &rendered)?,
        None => print!("{}", rendered),
    }

    // Exit code: 0 = pass, 1 = findings above threshold
    Ok(if report.verdict.pass { 0 } else { 1 })
}

fn prepare(
    path: &Path,
    config: Option<PathBuf>,
    max_depth: Option<usize>,
) -> Result<(Config, EngineConfig)> {
    let options = ScanOptions {
        config_path: config,
        max_depth_override: max_depth,
        ..ScanOptions::default()
    };
    let config = taskguard::load_config(path, &options)?;
    let engine = EngineConfig::from_config(&config);
    Ok((config, engine))
}

fn cmd_resolve(path: PathBuf, output: PathBuf, config: Option<PathBuf>) -> Result<i32> {
    let (config, engine) = prepare(&path, config, None)?;
    let resolved = taskguard::load_and_resolve(&path, &config, &engine)?;
    taskguard::adapter::dump::write_dump(&output, &resolved.corpus, &resolved.edges)?;
    eprintln!(
        "Wrote {} entities and {} edges to {}",
        resolved.corpus.len(),
        resolved.edges.len(),
        output.display()
    );
    Ok(0)
}

fn cmd_tree(
    path: PathBuf,
    root: Option<String>,
    config: Option<PathBuf>,
    max_depth: Option<usize>,
) -> Result<i32> {
    let (config, engine) = prepare(&path, config, max_depth)?;
    let resolved = taskguard::load_and_resolve(&path, &config, &engine)?;
    let analyzer = Analyzer::new(&resolved, &engine, RuleEngine::new())
        .with_entry_points(config.scan.entry_points.clone())
        .with_exclude(config.scan.exclude_patterns()?);

    let roots = match root {
        Some(raw) => {
            let key = Key::parse(&raw)?;
            if !resolved.corpus.contains(key.as_str()) {
                return Err(GuardError::Config(format!("root '{raw}' is not in the corpus")));
            }
            vec![key]
        }
        None => analyzer.roots(),
    };

    for key in &roots {
        let tree = analyzer.build_tree(key)?;
        for pair in tree.to_edge_list() {
            println!("{}", serde_json::to_string(&pair)?);
        }
    }
    Ok(0)
}

fn cmd_list_rules(format_str: String) -> Result<i32> {
    let engine = RuleEngine::new();
    let rules = engine.list_rules();

    match format_str.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&rules)?;
            println!("{}", json);
        }
        _ => {
            println!(
                "{:<10} {:<28} {:<10} {:<8} CATEGORY",
                "ID", "NAME", "SEVERITY", "CWE"
            );
            println!("{}", "-".repeat(80));
            for rule in &rules {
                println!(
                    "{:<10} {:<28} {:<10} {:<8} {}",
                    rule.id,
                    rule.name,
                    rule.default_severity.to_string(),
                    rule.cwe_id.as_deref().unwrap_or("-"),
                    rule.attack_category,
                );
            }
        }
    }

    Ok(0)
}

fn cmd_init(force: bool) -> Result<i32> {
    let path = PathBuf::from(CONFIG_FILE);

    if path.exists() && !force {
        eprintln!("{CONFIG_FILE} already exists. Use --force to overwrite.");
        return Ok(1);
    }

    std::fs::write(&path, Config::starter_toml())?;
    println!("Created {CONFIG_FILE}");

    Ok(0)
}
