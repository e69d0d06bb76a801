//! Top-level task orchestration.
//!
//! One [`Orchestrator`] owns one task end to end: baseline capture, plan
//! generation, the per-subtask agent execution loop with retry-on-test-
//! failure, serialized integration merges, the post-merge regression gate,
//! and terminal worktree cleanup. All mutable state (ledger, task status,
//! subtask slots) is owned by the instance; nothing is process-global, so
//! separate tasks run in separate orchestrators without cross-talk.
//!
//! External capabilities (agent, worktrees, tests, persistence) are reached
//! through traits; their faults are classified here and never escape raw:
//! recoverable faults feed the retry counter, terminal ones become the
//! task's error message.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::AgentRunner;
use crate::budget::BudgetLedger;
use crate::config::Config;
use crate::dashboard::{AgentDashboardEntry, TaskDashboard};
use crate::gate::{TestBaseline, TestGate, TestLevel, TestResult};
use crate::plan::{generate_plan, AgentTask};
use crate::store::{TaskStatus, TaskStore};
use crate::worktree::Worktrees;

/// Per-subtask execution state: WAITING -> RUNNING -> {DONE | FAILED},
/// or SKIPPED when the budget ran out before the subtask was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Waiting,
    Running,
    Done,
    Failed,
    Skipped,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Live progress of one planned subtask.
#[derive(Debug, Clone)]
struct AgentSlot {
    task: AgentTask,
    state: AgentState,
    cost_usd: f64,
    tokens: u64,
    duration: Duration,
}

impl AgentSlot {
    fn new(task: AgentTask) -> Self {
        Self {
            task,
            state: AgentState::Waiting,
            cost_usd: 0.0,
            tokens: 0,
            duration: Duration::ZERO,
        }
    }

    fn dashboard_entry(&self) -> AgentDashboardEntry {
        if self.state == AgentState::Done {
            AgentDashboardEntry {
                role: self.task.role.clone(),
                status: self.state.as_str().to_string(),
                cost_usd: Some(self.cost_usd),
                duration_seconds: Some(self.duration.as_secs()),
                tokens: Some(self.tokens),
            }
        } else {
            AgentDashboardEntry::pending(self.task.role.clone(), self.state.as_str())
        }
    }
}

/// Conditions that end the task with status ERROR. Everything else is
/// either retried or degrades gracefully.
#[derive(Debug, thiserror::Error)]
enum Terminal {
    #[error("Agent '{role}' failed after {attempts} attempts")]
    RetriesExhausted { role: String, attempts: u32 },
    #[error("Merge conflicts: {0}")]
    MergeConflicts(String),
    #[error("Regression gate failed: {count} tests regressed after merge ({failed})")]
    Regressions { count: u32, failed: String },
    #[error("{0}")]
    Capability(String),
    #[error("Task cancelled")]
    Cancelled,
}

/// Drives one task from PENDING to a terminal state.
pub struct Orchestrator {
    config: Config,
    project: PathBuf,
    description: String,
    task_id: String,
    ledger: BudgetLedger,
    runner: Arc<dyn AgentRunner>,
    worktrees: Arc<dyn Worktrees>,
    gate: Arc<dyn TestGate>,
    store: Arc<dyn TaskStore>,
    slots: Vec<AgentSlot>,
    status: TaskStatus,
    error: Option<String>,
    baseline: Option<TestBaseline>,
    regressions: u32,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        project: PathBuf,
        description: impl Into<String>,
        runner: Arc<dyn AgentRunner>,
        worktrees: Arc<dyn Worktrees>,
        gate: Arc<dyn TestGate>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        let ledger = BudgetLedger::new(config.budget_usd, config.pricing);
        Self {
            config,
            project,
            description: description.into(),
            task_id: Uuid::new_v4().to_string(),
            ledger,
            runner,
            worktrees,
            gate,
            store,
            slots: Vec::new(),
            status: TaskStatus::Pending,
            error: None,
            baseline: None,
            regressions: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Token observed at every suspension point; cancelling it discards
    /// in-flight worktrees and ends the task without merging partial work.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the task to completion and return the final dashboard snapshot.
    pub async fn execute(&mut self) -> TaskDashboard {
        tracing::info!(task = %self.task_id, description = %self.description, "Task started");

        if let Err(e) = self
            .store
            .create_task(&self.task_id, &self.description)
            .await
        {
            tracing::warn!(task = %self.task_id, error = %e, "Failed to persist task creation");
        }

        self.status = TaskStatus::Executing;
        self.persist().await;

        match self.run().await {
            Ok(()) => {
                self.status = TaskStatus::Done;
                self.persist().await;
                tracing::info!(
                    task = %self.task_id,
                    cost = self.ledger.total_spent(),
                    "Task done"
                );
            }
            Err(terminal) => {
                self.error = Some(terminal.to_string());
                self.status = TaskStatus::Error;
                self.persist().await;
                tracing::error!(task = %self.task_id, error = %terminal, "Task failed");
            }
        }

        self.dashboard()
    }

    /// Current snapshot; rebuilt on demand, safe to call mid-run.
    pub fn dashboard(&self) -> TaskDashboard {
        TaskDashboard {
            task_id: self.task_id.clone(),
            description: self.description.clone(),
            status: self.status,
            agents: self.slots.iter().map(AgentSlot::dashboard_entry).collect(),
            total_cost_usd: self.ledger.total_spent(),
            budget_usd: self.ledger.budget(),
            baseline_tests: self.baseline.as_ref().map(|b| b.total_tests).unwrap_or(0),
            regressions: self.regressions,
        }
    }

    async fn run(&mut self) -> Result<(), Terminal> {
        if self.cancel.is_cancelled() {
            return Err(Terminal::Cancelled);
        }

        let gate = Arc::clone(&self.gate);
        let baseline = gate
            .capture_baseline(&self.project)
            .await
            .map_err(|e| Terminal::Capability(format!("Failed to capture test baseline: {}", e)))?;
        tracing::info!(
            task = %self.task_id,
            total = baseline.total_tests,
            passing = baseline.passing_tests,
            "Baseline captured"
        );
        self.baseline = Some(baseline);

        let runner = Arc::clone(&self.runner);
        let plan = generate_plan(
            runner.as_ref(),
            &mut self.ledger,
            &self.project,
            &self.description,
            &self.config.default_role,
        )
        .await;
        self.slots = plan.agents.into_iter().map(AgentSlot::new).collect();
        self.persist().await;

        // Subtasks run strictly in plan order; a failed subtask halts the
        // rest instead of accumulating partial merges.
        for idx in 0..self.slots.len() {
            if self.cancel.is_cancelled() {
                return Err(Terminal::Cancelled);
            }
            if self.ledger.is_over_budget() {
                tracing::info!(
                    role = %self.slots[idx].task.role,
                    spent = self.ledger.total_spent(),
                    budget = self.ledger.budget(),
                    "Budget exhausted, skipping subtask"
                );
                self.slots[idx].state = AgentState::Skipped;
                continue;
            }
            self.run_subtask(idx).await?;
            self.persist().await;
        }

        self.regression_gate().await?;

        if self.config.retain_worktrees_on_success {
            tracing::info!(task = %self.task_id, "Retaining worktrees for inspection");
        } else if let Err(e) = self.worktrees.cleanup().await {
            tracing::warn!(task = %self.task_id, error = %e, "Worktree cleanup failed");
        }

        Ok(())
    }

    /// One subtask's bounded retry loop. Every attempt records its token
    /// cost; recoverable faults become feedback for the next attempt.
    async fn run_subtask(&mut self, idx: usize) -> Result<(), Terminal> {
        let task = self.slots[idx].task.clone();
        let role = task.role.clone();
        let runner = Arc::clone(&self.runner);
        let worktrees = Arc::clone(&self.worktrees);
        let gate = Arc::clone(&self.gate);
        let max_retries = self.config.max_retries.max(1);

        self.slots[idx].state = AgentState::Running;

        let worktree = worktrees.create(&role).await.map_err(|e| {
            Terminal::Capability(format!("Failed to create worktree for '{}': {}", role, e))
        })?;

        let mut feedback: Option<String> = None;

        for attempt in 1..=max_retries {
            if self.cancel.is_cancelled() {
                self.discard(&worktree).await;
                return Err(Terminal::Cancelled);
            }
            if attempt > 1 && self.ledger.is_over_budget() {
                tracing::info!(role = %role, attempt, "Budget exhausted mid-retry, skipping subtask");
                self.discard(&worktree).await;
                self.slots[idx].state = AgentState::Skipped;
                return Ok(());
            }

            tracing::info!(role = %role, attempt, max_retries, "Agent attempt");

            let result = match runner
                .run(&role, &task.description, &worktree, feedback.as_deref())
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    // Timeouts and runner faults are recoverable attempts.
                    tracing::warn!(role = %role, attempt, error = %e, "Agent invocation failed");
                    feedback = Some(format!("The previous attempt failed to run: {}", e));
                    continue;
                }
            };

            let delta = self.ledger.record(result.input_tokens, result.output_tokens);
            {
                let slot = &mut self.slots[idx];
                slot.cost_usd += delta;
                slot.tokens += result.input_tokens + result.output_tokens;
                slot.duration += result.duration;
            }

            // A cancellation that arrived while the agent was running must
            // discard the worktree, not carry the attempt on to a merge.
            if self.cancel.is_cancelled() {
                self.discard(&worktree).await;
                return Err(Terminal::Cancelled);
            }

            if !result.succeeded() {
                feedback = Some(if result.errors.is_empty() {
                    "The previous attempt reported failure.".to_string()
                } else {
                    format!(
                        "The previous attempt reported errors: {}",
                        result.errors.join("; ")
                    )
                });
                continue;
            }

            let message = format!("codecrew[{}]: attempt {}", role, attempt);
            if let Err(e) = worktrees.commit_agent_work(&worktree, &message).await {
                tracing::warn!(role = %role, attempt, error = %e, "Commit failed");
                feedback = Some(format!(
                    "The previous attempt produced no committable changes: {}",
                    e
                ));
                continue;
            }

            let fast = match gate.run_level(TestLevel::Fast, &worktree).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(role = %role, attempt, error = %e, "Fast test gate could not run");
                    feedback = Some(format!("The test runner failed to start: {}", e));
                    continue;
                }
            };

            if fast.passed {
                if self.cancel.is_cancelled() {
                    self.discard(&worktree).await;
                    return Err(Terminal::Cancelled);
                }

                let conflicts = match worktrees.merge_to_integration(&worktree, &role).await {
                    Ok(conflicts) => conflicts,
                    Err(e) => {
                        self.discard(&worktree).await;
                        self.slots[idx].state = AgentState::Failed;
                        return Err(Terminal::Capability(format!(
                            "Merge failed for '{}': {}",
                            role, e
                        )));
                    }
                };

                if !conflicts.is_empty() {
                    self.discard(&worktree).await;
                    self.slots[idx].state = AgentState::Failed;
                    let detail = conflicts
                        .iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(Terminal::MergeConflicts(detail));
                }

                self.slots[idx].state = AgentState::Done;
                tracing::info!(role = %role, attempt, "Subtask done and merged");
                return Ok(());
            }

            tracing::info!(
                role = %role,
                attempt,
                passed = fast.passed_tests,
                total = fast.total_tests,
                "Fast test gate failed"
            );
            feedback = Some(test_feedback(&fast));
        }

        self.discard(&worktree).await;
        self.slots[idx].state = AgentState::Failed;
        Err(Terminal::RetriesExhausted {
            role,
            attempts: max_retries,
        })
    }

    /// Run the normal level once after all merges and compare against the
    /// baseline. Regressions are never negative.
    async fn regression_gate(&mut self) -> Result<(), Terminal> {
        let integration = self.worktrees.integration_path();
        let normal = self
            .gate
            .run_level(TestLevel::Normal, &integration)
            .await
            .map_err(|e| Terminal::Capability(format!("Post-merge test run failed: {}", e)))?;

        let passing_baseline = self
            .baseline
            .as_ref()
            .map(|b| b.passing_tests)
            .unwrap_or(0);
        self.regressions = passing_baseline.saturating_sub(normal.passed_tests);

        tracing::info!(
            task = %self.task_id,
            passed = normal.passed,
            regressions = self.regressions,
            "Regression gate complete"
        );

        if !normal.passed && self.regressions > 0 {
            return Err(Terminal::Regressions {
                count: self.regressions,
                failed: normal.failed_tests.join(", "),
            });
        }

        Ok(())
    }

    /// Remove a worktree that will not be merged. Removal failures are
    /// logged, not surfaced; the subtask's fate is already decided.
    async fn discard(&self, worktree: &Path) {
        if let Err(e) = self.worktrees.remove(worktree).await {
            tracing::warn!(
                worktree = %worktree.display(),
                error = %e,
                "Failed to remove worktree"
            );
        }
    }

    async fn persist(&self) {
        if let Err(e) = self
            .store
            .update_task(
                &self.task_id,
                self.status,
                self.error.as_deref(),
                self.ledger.total_spent(),
            )
            .await
        {
            tracing::warn!(task = %self.task_id, error = %e, "Failed to persist task state");
        }
    }
}

/// Failure detail fed back to the agent on the next attempt.
fn test_feedback(result: &TestResult) -> String {
    let mut feedback = format!(
        "{}/{} tests passed at the {} level.",
        result.passed_tests,
        result.total_tests,
        result.level.as_str()
    );
    if !result.failed_tests.is_empty() {
        feedback.push_str(&format!(" Failing tests: {}", result.failed_tests.join(", ")));
    }
    feedback
}
