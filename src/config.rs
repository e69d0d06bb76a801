//! Orchestrator configuration from environment variables.
//!
//! All knobs have defaults so a bare `codecrew <project> <task...>` works out
//! of the box. Environment variables override:
//!
//! - `CODECREW_BUDGET_USD` - cost ceiling for one task (default 15.0)
//! - `CODECREW_MAX_RETRIES` - attempts per subtask (default 3)
//! - `CODECREW_DEFAULT_ROLE` - fallback agent role (default "rust-backend")
//! - `CODECREW_AGENT_BIN` - agent CLI binary (default "claude")
//! - `CODECREW_AGENT_TIMEOUT_SECS` - per-invocation deadline (default 300)
//! - `CODECREW_INPUT_USD_PER_MTOK` / `CODECREW_OUTPUT_USD_PER_MTOK` - pricing
//! - `CODECREW_RETAIN_WORKTREES` - keep merged worktrees after a successful
//!   run for post-mortem inspection (default false)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::budget::Pricing;

/// Frozen orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cost ceiling in USD for one task, planning included.
    pub budget_usd: f64,
    /// Maximum agent attempts per subtask before it is marked failed.
    pub max_retries: u32,
    /// Role assigned to the fallback plan when planner output is unusable.
    pub default_role: String,
    /// Agent CLI binary.
    pub agent_bin: PathBuf,
    /// Deadline for a single agent invocation.
    pub agent_timeout: Duration,
    /// Per-token pricing used by the budget ledger.
    pub pricing: Pricing,
    /// Keep merged worktrees after a fully successful run instead of
    /// tearing them down.
    pub retain_worktrees_on_success: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            budget_usd: 15.0,
            max_retries: 3,
            default_role: "rust-backend".to_string(),
            agent_bin: PathBuf::from("claude"),
            agent_timeout: Duration::from_secs(300),
            pricing: Pricing::default(),
            retain_worktrees_on_success: false,
        }
    }
}

impl Config {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let budget_usd = parse_env("CODECREW_BUDGET_USD", defaults.budget_usd)?;
        let max_retries = parse_env("CODECREW_MAX_RETRIES", defaults.max_retries)?;
        let timeout_secs =
            parse_env("CODECREW_AGENT_TIMEOUT_SECS", defaults.agent_timeout.as_secs())?;
        let input_price =
            parse_env("CODECREW_INPUT_USD_PER_MTOK", defaults.pricing.input_usd_per_mtok)?;
        let output_price = parse_env(
            "CODECREW_OUTPUT_USD_PER_MTOK",
            defaults.pricing.output_usd_per_mtok,
        )?;
        let retain = parse_env(
            "CODECREW_RETAIN_WORKTREES",
            defaults.retain_worktrees_on_success,
        )?;

        Ok(Self {
            budget_usd,
            max_retries,
            default_role: std::env::var("CODECREW_DEFAULT_ROLE")
                .unwrap_or(defaults.default_role),
            agent_bin: std::env::var("CODECREW_AGENT_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.agent_bin),
            agent_timeout: Duration::from_secs(timeout_secs),
            pricing: Pricing {
                input_usd_per_mtok: input_price,
                output_usd_per_mtok: output_price,
            },
            retain_worktrees_on_success: retain,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        Err(_) => Ok(default),
    }
}
