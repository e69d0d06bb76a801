//! Plan generation - decompose a task description into role-tagged subtasks.
//!
//! The planner is one agent invocation with a planning instruction. Its
//! output is expected to contain a JSON object of the form
//! `{"agents": [{"role": "...", "description": "..."}]}`. Unusable output
//! degrades silently to a single-subtask fallback plan; planning failure
//! never aborts a task.

use std::path::Path;

use serde::Deserialize;

use crate::agent::AgentRunner;
use crate::budget::BudgetLedger;

/// One role-scoped unit of work derived from the task description.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentTask {
    pub role: String,
    pub description: String,
}

/// Whether the plan came from the planner or from the fallback path.
/// Decided once at generation; never re-interpreted later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    Parsed,
    Fallback,
}

/// Immutable, ordered set of subtasks for one task.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub agents: Vec<AgentTask>,
    pub source: PlanSource,
}

impl ExecutionPlan {
    fn fallback(default_role: &str, description: &str) -> Self {
        Self {
            agents: vec![AgentTask {
                role: default_role.to_string(),
                description: description.to_string(),
            }],
            source: PlanSource::Fallback,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlanPayload {
    agents: Vec<AgentTask>,
}

const PLANNING_INSTRUCTION: &str = "Decompose the following task into independent subtasks, \
one per specialist agent. Reply with a JSON object of the form \
{\"agents\": [{\"role\": \"<role-name>\", \"description\": \"<what to do>\"}]} \
and nothing else.\n\nTask:\n";

/// Extract and parse the first JSON object found in the planner's output.
/// Tolerates surrounding prose. Returns `None` when there is no well-formed,
/// non-empty agent list.
fn parse_plan(raw: &str) -> Option<Vec<AgentTask>> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }

    let payload: PlanPayload = serde_json::from_str(&raw[start..=end]).ok()?;
    if payload.agents.is_empty() {
        return None;
    }
    Some(payload.agents)
}

/// Invoke the planner once and build the execution plan. Token usage is
/// recorded into the ledger regardless of whether the plan parses.
pub async fn generate_plan(
    runner: &dyn AgentRunner,
    ledger: &mut BudgetLedger,
    project: &Path,
    description: &str,
    default_role: &str,
) -> ExecutionPlan {
    let instruction = format!("{}{}", PLANNING_INSTRUCTION, description);

    let result = match runner.run("planner", &instruction, project, None).await {
        Ok(result) => result,
        Err(e) => {
            tracing::debug!(error = %e, "Planner invocation failed, using fallback plan");
            return ExecutionPlan::fallback(default_role, description);
        }
    };

    ledger.record(result.input_tokens, result.output_tokens);

    match parse_plan(&result.raw_output) {
        Some(agents) => {
            tracing::info!(subtasks = agents.len(), "Planner produced an execution plan");
            ExecutionPlan {
                agents,
                source: PlanSource::Parsed,
            }
        }
        None => {
            tracing::debug!("Planner output was not a usable plan, using fallback");
            ExecutionPlan::fallback(default_role, description)
        }
    }
}
