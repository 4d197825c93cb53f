use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use pulse::blueprint::{Blueprint, StepKind, StepStatus};
use pulse::config::PipelineConfig;
use pulse::registry::{ActionRegistry, LoadReport};
use pulse::runtime::{BuildMode, Engine, Scene};
use tracing::{Level, error, info};

#[derive(Parser)]
#[command(author, version, about = "Build scenes from blueprint step trees", long_about = None)]
struct Cli {
    /// Pipeline config file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Sources {
    /// Extra directories to scan for action manifests
    #[arg(long = "actions")]
    action_dirs: Vec<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    /// Path to the blueprint file (YAML or JSON)
    blueprint: PathBuf,

    #[command(flatten)]
    sources: Sources,

    /// Blueprint variables (key=value)
    #[arg(long, short = 'D', value_parser = parse_key_val)]
    vars: Vec<(String, serde_json::Value)>,

    /// Scene to build into (YAML); starts empty when omitted
    #[arg(long)]
    scene: Option<PathBuf>,

    /// Write the resulting scene here (YAML)
    #[arg(long)]
    save_scene: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and run a blueprint
    Build(RunArgs),

    /// Validate every step against the scene without running anything
    Validate(RunArgs),

    /// List registered actions by category
    Actions {
        #[command(flatten)]
        sources: Sources,
    },

    /// Static check of a blueprint document
    Check {
        blueprint: PathBuf,

        #[command(flatten)]
        sources: Sources,
    },
}

fn parse_key_val(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, val_str) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    // Try parsing as JSON, otherwise treat as string
    let val = serde_json::from_str(val_str).unwrap_or_else(|_| serde_json::Value::String(val_str.to_string()));
    Ok((key.to_string(), val))
}

fn init_logging(verbose: bool, config: &PipelineConfig) {
    let level = if verbose {
        Level::DEBUG
    } else {
        config
            .log_level
            .as_deref()
            .and_then(|l| Level::from_str(l).ok())
            .unwrap_or(Level::INFO)
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn print_reports(reports: &[LoadReport]) {
    for report in reports {
        for e in &report.load_errors {
            error!("{}", e);
        }
        for e in &report.registration_errors {
            error!("{}", e);
        }
    }
}

fn load_blueprint(path: &Path, registry: &ActionRegistry, config: &PipelineConfig) -> Result<Blueprint> {
    let mut blueprint = Blueprint::load(path, registry)?;
    blueprint.settings.merge_defaults(&config.default_settings);
    Ok(blueprint)
}

fn load_scene(path: Option<&Path>, blueprint: &Blueprint) -> Result<Scene> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read scene from {}", path.display()))?;
            serde_yaml::from_str(&content).with_context(|| format!("Failed to deserialize scene from {}", path.display()))
        }
        None => Ok(Scene::new(blueprint.settings.rig_name())),
    }
}

fn print_tree(blueprint: &Blueprint) {
    for id in blueprint.tree.descendants(blueprint.root()).into_iter().skip(1) {
        let Some(step) = blueprint.tree.step(id) else { continue };
        let depth = blueprint.tree.path(id).matches('/').count();
        let status = if step.disabled {
            "disabled".to_string()
        } else {
            format!("{:?}", step.result.status)
        };
        println!("{}{} [{}]", "  ".repeat(depth), step.display_name(), status);
        for message in &step.result.messages {
            println!("{}  - {}", "  ".repeat(depth), message);
        }
        if let StepKind::Batch(_) = step.kind {
            for (i, variant) in step.result.variants.iter().enumerate() {
                if variant.status != StepStatus::Success {
                    println!("{}  #{} [{:?}] {}", "  ".repeat(depth), i, variant.status, variant.messages.join("; "));
                }
            }
        }
    }
}

async fn run(args: RunArgs, mode: BuildMode, config: &PipelineConfig) -> Result<ExitCode> {
    let (registry, reports) = config.build_registry(&args.sources.action_dirs);
    print_reports(&reports);

    let mut blueprint = load_blueprint(&args.blueprint, &registry, config)?;
    blueprint.variables.extend(args.vars);
    let mut scene = load_scene(args.scene.as_deref(), &blueprint)?;

    let mut engine = Engine::new(Arc::clone(&registry))
        .with_mode(mode)
        .stop_on_validation_warnings(config.stop_on_validation_warnings);
    let summary = engine.run(&mut blueprint, &mut scene).await;

    print_tree(&blueprint);
    println!("{}", summary);

    if let Some(path) = args.save_scene {
        let content = serde_yaml::to_string(&scene)?;
        std::fs::write(&path, content).with_context(|| format!("Failed to write scene to {}", path.display()))?;
        info!("Scene written to {}", path.display());
    }

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    init_logging(cli.verbose, &config);

    match cli.command {
        Commands::Build(args) => run(args, BuildMode::Build, &config).await,
        Commands::Validate(args) => run(args, BuildMode::Validate, &config).await,
        Commands::Actions { sources } => {
            let (registry, reports) = config.build_registry(&sources.action_dirs);
            print_reports(&reports);
            let mut category = None;
            for spec in registry.all() {
                if category.as_ref() != Some(&spec.category) {
                    println!("{}", if spec.category.is_empty() { "(uncategorized)" } else { spec.category.as_str() });
                    category = Some(spec.category.clone());
                }
                println!("  {:<24} {}", spec.id, spec.display_name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { blueprint, sources } => {
            let (registry, reports) = config.build_registry(&sources.action_dirs);
            print_reports(&reports);
            let blueprint = load_blueprint(&blueprint, &registry, &config)?;
            let mut issues = blueprint.pre_build_issues();
            issues.extend(blueprint.validate());
            for issue in &issues {
                match issue.variant {
                    Some(i) => println!("{} {}[{}]: {}", issue.severity, issue.path, i, issue.error),
                    None => println!("{} {}: {}", issue.severity, issue.path, issue.error),
                }
            }
            let errors = issues.iter().filter(|i| i.is_error()).count();
            println!("{} issue(s), {} error(s)", issues.len(), errors);
            Ok(if errors == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}
