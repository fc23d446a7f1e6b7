//! CS-030: CLI subcommands: init, validate, plan, apply, migrations, upgrade.

use crate::core::context::EngineContext;
use crate::core::types::{EngineConfig, Report, Requirement};
use crate::core::{executor, migration, parser, planner, requirement};
use crate::provenance::eventlog::{self, JournalHook};
use crate::tree::imports::TypeScriptImports;
use crate::tree::project::Project;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a cascade.yaml in a codebase
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate cascade.yaml
    Validate {
        /// Path to cascade.yaml
        #[arg(short, long, default_value = "cascade.yaml")]
        file: PathBuf,
    },

    /// Show the changesets a requirement resolves to, without changing anything
    Plan {
        /// Codebase root
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Requirement as JSON
        #[arg(short, long)]
        requirement: PathBuf,
    },

    /// Resolve a requirement and apply every changeset
    Apply {
        /// Codebase root
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Requirement as JSON
        #[arg(short, long)]
        requirement: PathBuf,

        /// Show the plan without applying it
        #[arg(long)]
        dry_run: bool,
    },

    /// List recorded migration artifacts
    Migrations {
        /// Library root
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },

    /// Replay a library's migrations against a downstream codebase
    Upgrade {
        /// Library root
        #[arg(short, long)]
        library: PathBuf,

        /// Downstream codebase root
        #[arg(short, long, default_value = ".")]
        downstream: PathBuf,
    },
}

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan {
            project,
            requirement,
        } => cmd_plan(&project, &requirement).await,
        Commands::Apply {
            project,
            requirement,
            dry_run,
        } => cmd_apply(&project, &requirement, dry_run).await,
        Commands::Migrations { project } => cmd_migrations(&project).await,
        Commands::Upgrade {
            library,
            downstream,
        } => cmd_upgrade(&library, &downstream).await,
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join(parser::CONFIG_FILE);
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let name = std::fs::canonicalize(path)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "project".to_string());
    std::fs::write(&config_path, parser::template(&name))
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized cascade project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        println!(
            "OK: {} (sources {}, tests under {})",
            config.name,
            config.source_glob,
            config.test_roots.join(", ")
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Load a codebase and its configuration.
async fn open_project(root: &Path) -> Result<(Project, EngineConfig), String> {
    let config = parser::load_project_config(root)?;
    let project = Project::open(root, &[config.state_dir.as_str()])
        .await
        .map_err(|e| e.to_string())?;
    Ok((project, config))
}

fn read_requirement(file: &Path) -> Result<Requirement, String> {
    let json = std::fs::read_to_string(file)
        .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
    requirement::deserialize_requirement(&json, &file.display().to_string())
        .map_err(|e| e.to_string())
}

async fn cmd_plan(root: &Path, requirement_file: &Path) -> Result<(), String> {
    let root_requirement = read_requirement(requirement_file)?;
    let (mut project, config) = open_project(root).await?;
    let ctx = EngineContext::new(&mut project, &TypeScriptImports, &config);

    let changeset = planner::changeset_for_requirement(&root_requirement, &ctx)
        .await
        .map_err(|e| e.to_string())?;
    print!("{}", planner::render_plan(&changeset));
    Ok(())
}

async fn cmd_apply(root: &Path, requirement_file: &Path, dry_run: bool) -> Result<(), String> {
    let root_requirement = read_requirement(requirement_file)?;
    let (mut project, config) = open_project(root).await?;

    if dry_run {
        let ctx = EngineContext::new(&mut project, &TypeScriptImports, &config);
        let changeset = planner::changeset_for_requirement(&root_requirement, &ctx)
            .await
            .map_err(|e| e.to_string())?;
        print!("{}", planner::render_plan(&changeset));
        println!();
        println!("Dry run: no changes applied.");
        return Ok(());
    }

    let start = Instant::now();
    let mut hook = JournalHook::new(root.join(&config.state_dir), eventlog::generate_run_id());
    hook.started(&root_requirement.describe())?;

    let mut ctx = EngineContext::new(&mut project, &TypeScriptImports, &config);
    let (_, report) = executor::run(&root_requirement, &mut ctx, &mut hook)
        .await
        .map_err(|e| e.to_string())?;
    hook.completed(&report, start.elapsed().as_secs_f64())?;

    print_report(&report, &hook);
    if report.implemented.is_empty() {
        return Err("nothing was implemented".to_string());
    }
    Ok(())
}

async fn cmd_migrations(root: &Path) -> Result<(), String> {
    let (project, config) = open_project(root).await?;
    let pending = migration::gather(&project, &config, None)
        .await
        .map_err(|e| e.to_string())?;

    if pending.is_empty() {
        println!("No migrations recorded under {}/.", config.migration_dir);
        return Ok(());
    }
    println!("{} migration(s):", pending.len());
    for m in &pending {
        let summary = requirement::deserialize_requirement(&m.content, &m.path)
            .map(|r| r.describe())
            .unwrap_or_else(|e| format!("UNREADABLE: {}", e));
        println!("  {:<10} {}", m.version, summary);
        println!("  {:<10} {}", "", m.path);
    }
    Ok(())
}

async fn cmd_upgrade(library_root: &Path, downstream_root: &Path) -> Result<(), String> {
    let (library, library_config) = open_project(library_root).await?;
    let (mut downstream, config) = open_project(downstream_root).await?;

    let start = Instant::now();
    let mut hook = JournalHook::new(
        downstream_root.join(&config.state_dir),
        eventlog::generate_run_id(),
    );
    hook.started(&format!("Upgrade {}", library_config.name))?;

    let mut ctx = EngineContext::new(&mut downstream, &TypeScriptImports, &config);
    let report = migration::propagate(&library, &library_config, &mut ctx, &mut hook)
        .await
        .map_err(|e| e.to_string())?;
    hook.completed(&report, start.elapsed().as_secs_f64())?;

    print_report(&report, &hook);
    Ok(())
}

fn print_report(report: &Report, hook: &JournalHook) {
    for r in &report.implemented {
        println!("  + {}", r.describe());
    }
    for u in &report.unimplemented {
        println!("  ! {}: {}", u.requirement.describe(), u.message);
    }
    println!();
    println!("{}", summary_line(report, hook));
}

fn summary_line(report: &Report, hook: &JournalHook) -> String {
    format!(
        "Run {}: {} changeset(s), {} implemented, {} unimplemented.",
        hook.run_id(),
        hook.changesets(),
        report.implemented.len(),
        report.unimplemented.len()
    )
}
