//! crossbuild - build one binary for every target in a matrix
//!
//! ## Commands
//!
//! - `run`: expand the matrix and build, compress and publish every target
//! - `plan`: show the jobs a matrix expands to, without running them
//! - `artifacts`: list what the artifact store holds

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbuild_core::{
    expand_matrix, init_tracing, ArtifactRef, ArtifactStore, CancelSignal, Collaborators,
    FsArtifactStore, JobRunner, MatrixDefinition, Orchestrator, RunConfig, RunReport,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "crossbuild")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-target build & release pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and reports
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, compress and publish every enabled matrix target
    Run {
        /// Matrix file (TOML)
        #[arg(short, long, default_value = "crossbuild.toml")]
        matrix: PathBuf,

        /// Workspace to build in (default: current directory)
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Artifact store directory (overrides the matrix file and environment)
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,

        /// Maximum concurrent jobs, 0 for unlimited (overrides the matrix file and environment)
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Show the jobs a matrix expands to
    Plan {
        /// Matrix file (TOML)
        #[arg(short, long, default_value = "crossbuild.toml")]
        matrix: PathBuf,
    },

    /// List stored artifacts
    Artifacts {
        /// Matrix file (TOML); optional, read for its artifacts_dir
        #[arg(short, long, default_value = "crossbuild.toml")]
        matrix: PathBuf,

        /// Workspace the store lives in (default: current directory)
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Artifact store directory (overrides the matrix file and environment)
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run {
            matrix,
            workspace,
            artifacts_dir,
            max_parallel,
        } => cmd_run(&matrix, &workspace, artifacts_dir, max_parallel, cli.json).await,
        Commands::Plan { matrix } => cmd_plan(&matrix, cli.json).map(|_| 0),
        Commands::Artifacts {
            matrix,
            workspace,
            artifacts_dir,
        } => cmd_artifacts(&matrix, &workspace, artifacts_dir, cli.json)
            .await
            .map(|_| 0),
    };

    match result {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Run the matrix; returns the process exit status.
async fn cmd_run(
    matrix: &Path,
    workspace: &Path,
    artifacts_dir: Option<PathBuf>,
    max_parallel: Option<usize>,
    json: bool,
) -> Result<u8> {
    let config = RunConfig::load(matrix)
        .and_then(RunConfig::apply_env)
        .with_context(|| format!("Failed to load matrix {:?}", matrix))?;
    let config = with_overrides(config, artifacts_dir, max_parallel);

    let store_root = workspace.join(&config.artifacts_dir);
    let store = Arc::new(
        FsArtifactStore::new(&store_root)
            .with_context(|| format!("Failed to open artifact store {:?}", store_root))?,
    );

    let cancel = CancelSignal::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted: no new jobs will be launched, waiting for running jobs");
                cancel.cancel();
            }
        });
    }

    let collaborators = Collaborators::process(workspace, store);
    let orchestrator = Orchestrator::new(JobRunner::new(collaborators, workspace))
        .with_max_parallel(config.max_parallel)
        .with_cancel_signal(cancel);

    info!(matrix = ?matrix, artifacts = ?store_root, "Running build matrix");
    let results = orchestrator.run(&config.definition).await?;
    let report = RunReport::new(results);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }

    Ok(report.exit_code() as u8)
}

/// Command-line flags win over the matrix file and environment.
fn with_overrides(
    mut config: RunConfig,
    artifacts_dir: Option<PathBuf>,
    max_parallel: Option<usize>,
) -> RunConfig {
    if let Some(dir) = artifacts_dir {
        config.artifacts_dir = dir;
    }
    if let Some(n) = max_parallel {
        config.max_parallel = n;
    }
    config
}

/// Print the expanded jobs.
fn cmd_plan(matrix: &Path, json: bool) -> Result<()> {
    let config = RunConfig::load(matrix)
        .with_context(|| format!("Failed to load matrix {:?}", matrix))?;
    let jobs = expand_matrix(&config.definition)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    let digest = config.definition.digest();
    println!("{} job(s), matrix digest {}", jobs.len(), &digest[..12]);
    for job in &jobs {
        let route = if job.entry.use_cross { "cross" } else { "native" };
        println!(
            "  {:<40} {:<16} {:<7} {}",
            job.target(),
            job.entry.runs_on,
            route,
            job.output_path.display()
        );
        let steps: Vec<String> = job
            .steps
            .iter()
            .map(|s| {
                if s.continue_on_error {
                    format!("{}?", s.name)
                } else {
                    s.name.clone()
                }
            })
            .collect();
        println!("    steps: {}", steps.join(" -> "));
    }
    Ok(())
}

/// Resolve the store the same way `run` does and list it.
async fn cmd_artifacts(
    matrix: &Path,
    workspace: &Path,
    artifacts_dir: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let store_root = artifacts_root(matrix, workspace, artifacts_dir)?;
    let artifacts = list_artifacts(&store_root).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
        return Ok(());
    }

    if artifacts.is_empty() {
        println!("No artifacts in {:?}", store_root);
        return Ok(());
    }
    for artifact in &artifacts {
        println!(
            "{:<40} {:<12} {:>10} bytes  sha256:{}",
            artifact.name, artifact.file_name, artifact.size_bytes, artifact.digest
        );
    }
    Ok(())
}

/// Store directory for `artifacts`; the matrix file is optional here.
fn artifacts_root(
    matrix: &Path,
    workspace: &Path,
    artifacts_dir: Option<PathBuf>,
) -> Result<PathBuf> {
    let config = if matrix.exists() {
        RunConfig::load(matrix)
    } else {
        Ok(RunConfig::new(MatrixDefinition::new(Vec::new())))
    }
    .and_then(RunConfig::apply_env)
    .with_context(|| format!("Failed to load matrix {:?}", matrix))?;
    let config = with_overrides(config, artifacts_dir, None);
    Ok(workspace.join(config.artifacts_dir))
}

async fn list_artifacts(store_root: &Path) -> Result<Vec<ArtifactRef>> {
    let store = FsArtifactStore::new(store_root)
        .with_context(|| format!("Failed to open artifact store {:?}", store_root))?;
    Ok(store.list().await?)
}
