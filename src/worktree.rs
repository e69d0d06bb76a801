//! Per-subtask git worktree management.
//!
//! Each subtask gets an isolated worktree on its own branch; successful work
//! is committed there and merged into a shared integration branch. Merges
//! are serialized by the orchestrator, so the integration checkout has a
//! single writer at a time.
//!
//! Merge conflicts are data, not errors: `merge_to_integration` returns one
//! entry per conflicting path and only fails when git itself cannot run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

/// One conflicting path from a failed integration merge, tagged with the
/// subtask's role.
#[derive(Debug, Clone)]
pub struct MergeConflict {
    pub role: String,
    pub path: String,
}

impl std::fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: CONFLICT in {}", self.role, self.path)
    }
}

/// Workspace lifecycle capability consumed by the orchestrator.
#[async_trait]
pub trait Worktrees: Send + Sync {
    /// Allocate an isolated worktree for one subtask. Never shared.
    async fn create(&self, role: &str) -> Result<PathBuf>;

    /// Commit the agent's changes in `worktree` as one unit. Fails when
    /// there is nothing to commit, since the caller expects changes.
    /// Returns the short commit id.
    async fn commit_agent_work(&self, worktree: &Path, message: &str) -> Result<String>;

    /// Merge the worktree's branch into the integration branch. Conflicts
    /// are returned, never raised; the merge is aborted when they occur.
    async fn merge_to_integration(&self, worktree: &Path, role: &str)
        -> Result<Vec<MergeConflict>>;

    /// Checkout of the shared integration line; the post-merge test gate
    /// runs here.
    fn integration_path(&self) -> PathBuf;

    /// Discard a single worktree whose subtask failed terminally.
    async fn remove(&self, worktree: &Path) -> Result<()>;

    /// Idempotent teardown of all worktree resources after a fully
    /// successful run.
    async fn cleanup(&self) -> Result<()>;
}

/// Production [`Worktrees`] backed by `git worktree`.
///
/// Layout inside the project:
/// `.codecrew/worktrees/<role>-<n>` for agents and `.codecrew/integration`
/// for the shared integration checkout, on branch
/// `codecrew/integration-<run>`.
pub struct GitWorktrees {
    project: PathBuf,
    run_id: String,
    integration_dir: PathBuf,
    integration_branch: String,
    seq: AtomicU32,
    /// Branch per live worktree path. Entries leave on remove/cleanup.
    branches: Mutex<HashMap<PathBuf, String>>,
}

impl GitWorktrees {
    /// Set up the integration branch and checkout from the project's HEAD.
    pub async fn open(project: PathBuf) -> Result<Self> {
        let run_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let integration_branch = format!("codecrew/integration-{}", run_id);
        let integration_dir = project.join(".codecrew").join("integration");

        let manager = Self {
            project,
            run_id,
            integration_dir: integration_dir.clone(),
            integration_branch: integration_branch.clone(),
            seq: AtomicU32::new(0),
            branches: Mutex::new(HashMap::new()),
        };

        if let Some(parent) = integration_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        manager
            .git(
                &manager.project,
                &[
                    "worktree",
                    "add",
                    "-b",
                    &integration_branch,
                    &integration_dir.to_string_lossy(),
                    "HEAD",
                ],
            )
            .await
            .context("Failed to create integration worktree")?;

        tracing::info!(
            branch = %integration_branch,
            dir = %integration_dir.display(),
            "Integration worktree ready"
        );

        Ok(manager)
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .current_dir(dir)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute git {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Like [`git`] but failures are logged and swallowed. Used on the
    /// teardown paths, which must be idempotent.
    async fn git_lenient(&self, dir: &Path, args: &[&str]) {
        if let Err(e) = self.git(dir, args).await {
            tracing::warn!(error = %e, "Ignoring git failure during teardown");
        }
    }
}

#[async_trait]
impl Worktrees for GitWorktrees {
    async fn create(&self, role: &str) -> Result<PathBuf> {
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        let branch = format!("codecrew/agent-{}-{}-{}", role, self.run_id, n);
        let dir = self
            .project
            .join(".codecrew")
            .join("worktrees")
            .join(format!("{}-{}", role, n));

        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.git(
            &self.project,
            &[
                "worktree",
                "add",
                "-b",
                &branch,
                &dir.to_string_lossy(),
                "HEAD",
            ],
        )
        .await
        .with_context(|| format!("Failed to create worktree for '{}'", role))?;

        self.branches.lock().await.insert(dir.clone(), branch.clone());

        tracing::info!(role = %role, branch = %branch, dir = %dir.display(), "Created agent worktree");
        Ok(dir)
    }

    async fn commit_agent_work(&self, worktree: &Path, message: &str) -> Result<String> {
        self.git(worktree, &["add", "-A"]).await?;

        let commit = self.git(worktree, &["commit", "-m", message]).await;
        if let Err(e) = commit {
            anyhow::bail!(
                "Failed to commit agent work in {}: {}",
                worktree.display(),
                e
            );
        }

        self.git(worktree, &["rev-parse", "--short", "HEAD"]).await
    }

    async fn merge_to_integration(
        &self,
        worktree: &Path,
        role: &str,
    ) -> Result<Vec<MergeConflict>> {
        let branch = self
            .branches
            .lock()
            .await
            .get(worktree)
            .cloned()
            .with_context(|| format!("Unknown worktree: {}", worktree.display()))?;

        let message = format!("codecrew: merge {}", role);
        let merge = self
            .git(
                &self.integration_dir,
                &["merge", "--no-ff", &branch, "-m", &message],
            )
            .await;

        match merge {
            Ok(_) => {
                tracing::info!(role = %role, branch = %branch, "Merged into integration");
                Ok(Vec::new())
            }
            Err(merge_err) => {
                let unresolved = self
                    .git(
                        &self.integration_dir,
                        &["diff", "--name-only", "--diff-filter=U"],
                    )
                    .await
                    .unwrap_or_default();

                self.git_lenient(&self.integration_dir, &["merge", "--abort"]).await;

                let conflicts: Vec<MergeConflict> = unresolved
                    .lines()
                    .filter(|l| !l.is_empty())
                    .map(|path| MergeConflict {
                        role: role.to_string(),
                        path: path.to_string(),
                    })
                    .collect();

                if conflicts.is_empty() {
                    // Merge failed for a reason other than conflicting paths.
                    return Err(merge_err);
                }

                tracing::warn!(role = %role, count = conflicts.len(), "Merge produced conflicts");
                Ok(conflicts)
            }
        }
    }

    fn integration_path(&self) -> PathBuf {
        self.integration_dir.clone()
    }

    async fn remove(&self, worktree: &Path) -> Result<()> {
        let branch = self.branches.lock().await.remove(worktree);

        self.git(
            &self.project,
            &["worktree", "remove", "--force", &worktree.to_string_lossy()],
        )
        .await
        .with_context(|| format!("Failed to remove worktree {}", worktree.display()))?;

        if let Some(branch) = branch {
            self.git_lenient(&self.project, &["branch", "-D", &branch]).await;
        }

        tracing::info!(dir = %worktree.display(), "Removed agent worktree");
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        let remaining: Vec<(PathBuf, String)> = {
            let mut branches = self.branches.lock().await;
            branches.drain().collect()
        };

        for (dir, branch) in remaining {
            self.git_lenient(
                &self.project,
                &["worktree", "remove", "--force", &dir.to_string_lossy()],
            )
            .await;
            self.git_lenient(&self.project, &["branch", "-D", &branch]).await;
        }

        self.git_lenient(
            &self.project,
            &[
                "worktree",
                "remove",
                "--force",
                &self.integration_dir.to_string_lossy(),
            ],
        )
        .await;
        self.git_lenient(&self.project, &["worktree", "prune"]).await;

        // The integration branch carries the merged result; only its
        // checkout and the per-agent worktrees are torn down.
        tracing::info!(branch = %self.integration_branch, "Worktree cleanup complete");
        Ok(())
    }
}
