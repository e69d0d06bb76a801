//! Thin bootstrap: init tracing, read config from the environment, run one
//! orchestration and print the final dashboard.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use codecrew::{
    format_dashboard, CargoTestGate, ClaudeCliRunner, Config, GitWorktrees, Orchestrator,
    SqliteTaskStore, TaskStatus,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let project = match args.next() {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("Usage: codecrew <project-path> <task description...>");
            std::process::exit(2);
        }
    };
    let description = args.collect::<Vec<_>>().join(" ");
    if description.is_empty() {
        eprintln!("Usage: codecrew <project-path> <task description...>");
        std::process::exit(2);
    }

    let config = Config::from_env()?;

    let state_dir = project.join(".codecrew");
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;

    let runner = Arc::new(ClaudeCliRunner::new(&config));
    let worktrees = Arc::new(GitWorktrees::open(project.clone()).await?);
    let gate = Arc::new(CargoTestGate);
    let store = Arc::new(SqliteTaskStore::open(&state_dir.join("tasks.db"))?);

    let mut orchestrator = Orchestrator::new(
        config,
        project,
        description,
        runner,
        worktrees,
        gate,
        store,
    );

    let dashboard = orchestrator.execute().await;
    println!("{}", format_dashboard(&dashboard));

    if dashboard.status == TaskStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}
