//! `brio-parallel` command line: partition analysis and workspace maintenance.

use anyhow::Context;
use brio_parallel::infrastructure::audit::{AuditEvent, log_audit};
use brio_parallel::infrastructure::config::Settings;
use brio_parallel::infrastructure::telemetry::TelemetryBuilder;
use brio_parallel::isolation::{RetentionPolicy, WorkspaceManager};
use brio_parallel::partition::{PartitionAnalyzer, Thresholds, load_task_list};
use brio_parallel::store::MetadataStore;
use brio_parallel::vcs::GitCli;
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

/// Parallel task partitioning and isolated workspace maintenance.
#[derive(Debug, Parser)]
#[command(name = "brio-parallel", version)]
#[command(about = "Partition task lists into per-domain work-streams and maintain their workspaces", long_about = None)]
struct Cli {
    /// Configuration file (default: ./brio-parallel.toml if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the partition plan (exit 0 when viable, 1 when sequential)
    Analyze {
        /// JSON task list
        task_list: PathBuf,
    },
    /// Reclaim orphaned workspaces and apply retention
    Maintain,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let _telemetry = TelemetryBuilder::from_settings(&settings.telemetry, env!("CARGO_PKG_VERSION"))
        .init()
        .context("Failed to initialize telemetry")?;

    log_audit(&AuditEvent::SystemStartup {
        component: "brio-parallel".into(),
    });

    match cli.command {
        Commands::Analyze { task_list } => analyze(&settings, &task_list),
        Commands::Maintain => maintain(&settings).await,
    }
}

fn analyze(settings: &Settings, path: &std::path::Path) -> anyhow::Result<ExitCode> {
    let list = load_task_list(path)?;
    let plan = PartitionAnalyzer::new(Thresholds::from(&settings.partition)).analyze_list(&list)?;
    info!(viable = plan.viable, reason = %plan.reason, "Partition analyzed");

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(if plan.viable {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn maintain(settings: &Settings) -> anyhow::Result<ExitCode> {
    // The default database lives under the workspace root.
    let root = settings.workspace.resolved_workspace_root();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create {}", root.display()))?;

    let url = settings.database.url_for(&settings.workspace);
    let store = MetadataStore::connect(url.expose_secret())
        .await
        .context("Failed to open metadata store")?;
    let git = Arc::new(GitCli::new(settings.workspace.git_timeout()));
    let manager = WorkspaceManager::new(&settings.workspace, git, store)?;

    let orphans = manager.recover_orphans().await?;
    let garbage = manager
        .collect_garbage(&RetentionPolicy::from(&settings.retention), chrono::Utc::now())
        .await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "orphans": orphans,
            "garbage": garbage,
        }))?
    );
    Ok(if garbage.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
