// src/main.rs
//
// =============================================================================
// SAXSFLOW: COMMANDER & ENTRY POINT (v 0.1 )
// =============================================================================
//
// Modes:
// 1. RUN:   Loads a workflow document, runs it, prints outputs as JSON.
// 2. STACK: Prints the execution stack of a workflow document.
// 3. OPS:   Lists the registered operation classes.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use saxsflow::{EngineConfig, RunStatus, Value, WfManager};
use std::path::{Path, PathBuf};

// ============================================================================
// 1. CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(
    name = "saxsflow",
    version,
    about = "Workflow engine for SAXS/diffraction analyses"
)]
struct Cli {
    /// Engine config (YAML). Environment overrides still apply.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and run a workflow document (.yml / .json).
    Run {
        file: PathBuf,

        /// Workflow name (default: file stem).
        #[arg(long)]
        name: Option<String>,
    },

    /// Print the execution stack of a workflow document.
    Stack {
        file: PathBuf,
    },

    /// List operation classes and their inputs.
    Ops,
}

// ============================================================================
// 2. ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };

    match cli.command {
        Commands::Run { file, name } => run(config, &file, name).await,
        Commands::Stack { file } => stack(config, &file),
        Commands::Ops => ops(config),
    }
}

// ============================================================================
// 3. COMMANDS
// ============================================================================

fn workflow_name(file: &Path, name: Option<String>) -> String {
    name.unwrap_or_else(|| {
        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workflow");
        stem.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    })
}

fn load(config: EngineConfig, file: &Path, name: Option<String>) -> Result<(WfManager, saxsflow::Workflow)> {
    let mgr = WfManager::new(config);
    let name = workflow_name(file, name);
    let (wf, report) = mgr
        .load_wf(&name, file)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    if !report.is_clean() {
        log::warn!(
            "⚠️  {} ops and {} inputs skipped while loading",
            report.skipped_ops.len(),
            report.skipped_inputs.len()
        );
    }
    Ok((mgr, wf))
}

async fn run(config: EngineConfig, file: &Path, name: Option<String>) -> Result<()> {
    let (_mgr, wf) = load(config, file, name)?;

    // Ctrl-C requests a cooperative stop.
    let stopper = wf.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop_wf();
        }
    });

    let report = wf.run_wf().await;
    let outputs = Value::Map(wf.wf_outputs_dict());
    println!("{}", serde_json::to_string_pretty(&outputs)?);

    match report.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Cancelled => bail!("Run cancelled"),
        RunStatus::Failed { tag, kind, message } => bail!(
            "Run failed ({}{}): {}",
            kind,
            tag.map(|t| format!(" in '{}'", t)).unwrap_or_default(),
            message
        ),
    }
}

fn stack(config: EngineConfig, file: &Path) -> Result<()> {
    let (_mgr, wf) = load(config, file, None)?;
    let stack = wf.execution_stack()?;
    print!("{}", stack);
    Ok(())
}

fn ops(config: EngineConfig) -> Result<()> {
    let mgr = WfManager::new(config);
    for name in mgr.ops().list() {
        let info = mgr.ops().describe(&name)?;
        println!("{}", info.name);
        for spec in &info.inputs {
            println!("  in  {:<16} {}", spec.name, spec.doc);
        }
        for spec in &info.outputs {
            println!("  out {:<16} {}", spec.name, spec.doc);
        }
    }
    Ok(())
}
