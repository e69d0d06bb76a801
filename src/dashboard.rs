//! Read-only task dashboard and its fixed-format text rendering.
//!
//! The dashboard is a pull-based projection rebuilt on demand by the
//! orchestrator; callers never mutate it in place. [`format_dashboard`] is a
//! pure function - identical input yields byte-identical output.

use serde::Serialize;

use crate::store::TaskStatus;

/// Per-subtask progress line. Cost, duration and tokens are only present
/// for a completed subtask; unfinished entries never fabricate them.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDashboardEntry {
    pub role: String,
    pub status: String,
    pub cost_usd: Option<f64>,
    pub duration_seconds: Option<u64>,
    pub tokens: Option<u64>,
}

impl AgentDashboardEntry {
    /// Entry for a subtask that has not produced results yet.
    pub fn pending(role: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            status: status.into(),
            cost_usd: None,
            duration_seconds: None,
            tokens: None,
        }
    }
}

/// Snapshot of one task's progress for external reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDashboard {
    pub task_id: String,
    pub description: String,
    pub status: TaskStatus,
    pub agents: Vec<AgentDashboardEntry>,
    pub total_cost_usd: f64,
    pub budget_usd: f64,
    pub baseline_tests: u32,
    pub regressions: u32,
}

/// Render a dashboard as fixed-format text:
/// cost as `$X.XX/$Y.YY`, durations as `Ns`, tokens as `Nk tok`, and the
/// summary lines `<n> baseline` / `<n> regressions`.
pub fn format_dashboard(dashboard: &TaskDashboard) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "Task {}: {}\n",
        dashboard.task_id, dashboard.description
    ));
    out.push_str(&format!("Status: {}\n", dashboard.status.as_str()));
    out.push_str(&format!(
        "Cost: ${:.2}/${:.2}\n",
        dashboard.total_cost_usd, dashboard.budget_usd
    ));

    out.push_str("Agents:\n");
    for entry in &dashboard.agents {
        let mut line = format!("  {:<16} {:<8}", entry.role, entry.status);
        if let Some(cost) = entry.cost_usd {
            line.push_str(&format!("  ${:.2}", cost));
        }
        if let Some(secs) = entry.duration_seconds {
            line.push_str(&format!("  {}s", secs));
        }
        if let Some(tokens) = entry.tokens {
            line.push_str(&format!("  {}k tok", tokens / 1000));
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }

    out.push_str(&format!(
        "Tests: {} baseline, {} regressions\n",
        dashboard.baseline_tests, dashboard.regressions
    ));

    out
}
