//! Agent execution capability boundary.
//!
//! The orchestrator never generates code itself; it invokes an external
//! coding agent through the [`AgentRunner`] trait and judges the outcome.
//! The same capability serves planning (role "planner") and subtask
//! execution. The production implementation shells out to the agent CLI;
//! tests substitute scripted runners.

mod claude;

pub use claude::ClaudeCliRunner;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome status reported by a single agent invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Success,
    Failed,
}

/// Result of one agent invocation attempt. Transient - consumed by the
/// retry loop and the budget ledger, surfaced only through the dashboard.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub status: AgentStatus,
    /// Paths the agent reports having touched.
    pub files_modified: Vec<String>,
    /// Tests the agent reports having added.
    pub tests_added: u32,
    /// Full textual output; the planner's plan JSON lives here.
    pub raw_output: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration: Duration,
    /// Agent-reported errors when status is failed.
    pub errors: Vec<String>,
}

impl AgentResult {
    pub fn succeeded(&self) -> bool {
        self.status == AgentStatus::Success
    }
}

/// Faults at the capability boundary. A timeout is recoverable and feeds the
/// same retry path as a failing test gate.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent did not respond within {0}s")]
    Timeout(u64),
    #[error("agent runner failed: {0}")]
    Runner(String),
    #[error("failed to spawn agent: {0}")]
    Spawn(#[from] std::io::Error),
}

/// External agent execution capability.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run one agent invocation for `role` inside `workdir`. On retry
    /// attempts the prior failure detail is passed as `feedback`.
    async fn run(
        &self,
        role: &str,
        description: &str,
        workdir: &Path,
        feedback: Option<&str>,
    ) -> Result<AgentResult, AgentError>;
}

/// Structured fields scraped from an agent's `## RESULT` block.
#[derive(Debug, Clone, Default)]
pub struct ResultBlock {
    pub failed: bool,
    pub files_modified: Vec<String>,
    pub tests_added: u32,
    pub errors: Vec<String>,
}

/// Scan agent output for a `## RESULT` block:
///
/// ```text
/// ## RESULT
/// STATUS: success
/// FILES_MODIFIED: src/main.rs, src/lib.rs
/// TESTS_ADDED: 2
/// ```
///
/// The parser is lenient: a missing block or missing lines default to
/// success with empty fields, since not every agent follows the convention.
pub fn parse_result_block(output: &str) -> ResultBlock {
    let mut block = ResultBlock::default();

    let Some(start) = output.find("## RESULT") else {
        return block;
    };

    for line in output[start..].lines().skip(1) {
        let line = line.trim();
        if line.starts_with("##") {
            break;
        }
        if let Some(value) = line.strip_prefix("STATUS:") {
            block.failed = value.trim().eq_ignore_ascii_case("failed");
        } else if let Some(value) = line.strip_prefix("FILES_MODIFIED:") {
            block.files_modified = value
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        } else if let Some(value) = line.strip_prefix("TESTS_ADDED:") {
            block.tests_added = value.trim().parse().unwrap_or(0);
        } else if let Some(value) = line.strip_prefix("ERRORS:") {
            block.errors = value
                .split(';')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
        }
    }

    block
}
