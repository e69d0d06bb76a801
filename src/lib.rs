//! # codecrew
//!
//! A budgeted multi-agent build orchestrator: one high-level task is
//! decomposed into role-tagged subtasks, each executed by an external
//! coding agent inside an isolated git worktree, gated by tests, and merged
//! into a shared integration branch.
//!
//! ## Control Flow
//!
//! ```text
//!  Orchestrator
//!      │
//!      ├─► TestGate.capture_baseline      (before any mutation)
//!      ├─► Plan Generator                 (one planner invocation,
//!      │                                   silent fallback plan)
//!      ├─► per subtask, in plan order:
//!      │      Worktrees.create
//!      │      AgentRunner.run ──► commit ──► fast test gate
//!      │          ▲                              │
//!      │          └──── retry with feedback ◄────┘ (bounded)
//!      │      Worktrees.merge_to_integration   (conflicts are data)
//!      ├─► TestGate normal level          (regression vs baseline)
//!      └─► Worktrees.cleanup + persist + dashboard
//! ```
//!
//! Spend is metered by a per-task [`budget::BudgetLedger`]; once the budget
//! is reached, remaining subtasks and retries are skipped rather than run.
//! Every external capability sits behind a trait so the whole engine is
//! testable with scripted fakes.
//!
//! ## Modules
//! - `orchestrator`: the task state machine and agent execution loop
//! - `plan`: planner invocation and fallback plan
//! - `worktree`: per-subtask git worktrees and the integration branch
//! - `gate`: baseline capture and fast/normal test levels
//! - `budget`: token-to-cost accounting
//! - `agent`: the external agent capability and its CLI implementation
//! - `store`: durable task persistence (SQLite)
//! - `dashboard`: pull-based progress snapshot and text rendering

pub mod agent;
pub mod budget;
pub mod config;
pub mod dashboard;
pub mod gate;
pub mod orchestrator;
pub mod plan;
pub mod store;
pub mod worktree;

pub use agent::{AgentResult, AgentRunner, AgentStatus, ClaudeCliRunner};
pub use budget::{BudgetLedger, Pricing};
pub use config::Config;
pub use dashboard::{format_dashboard, AgentDashboardEntry, TaskDashboard};
pub use gate::{CargoTestGate, TestBaseline, TestGate, TestLevel, TestResult};
pub use orchestrator::Orchestrator;
pub use plan::{AgentTask, ExecutionPlan, PlanSource};
pub use store::{SqliteTaskStore, TaskRecord, TaskStatus, TaskStore};
pub use worktree::{GitWorktrees, MergeConflict, Worktrees};
