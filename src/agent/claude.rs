//! Agent CLI subprocess runner.
//!
//! Invokes the agent binary in print mode with JSON output and maps its
//! envelope into an [`AgentResult`]. The CLI reports its own token usage;
//! pricing stays with the budget ledger.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{parse_result_block, AgentError, AgentResult, AgentRunner, AgentStatus};
use crate::config::Config;

/// JSON envelope printed by the agent CLI in `--output-format json` mode.
#[derive(Debug, Deserialize)]
struct CliEnvelope {
    #[serde(default)]
    result: String,
    #[serde(default)]
    usage: CliUsage,
}

#[derive(Debug, Default, Deserialize)]
struct CliUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Production [`AgentRunner`] backed by the agent CLI.
pub struct ClaudeCliRunner {
    bin: PathBuf,
    timeout: Duration,
}

impl ClaudeCliRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            bin: config.agent_bin.clone(),
            timeout: config.agent_timeout,
        }
    }

    fn build_prompt(role: &str, description: &str, feedback: Option<&str>) -> String {
        let mut prompt = format!(
            "You are the '{}' agent working in this repository.\n\nTask:\n{}\n",
            role, description
        );

        if let Some(feedback) = feedback {
            prompt.push_str("\nThe previous attempt did not pass the test gate:\n");
            prompt.push_str(feedback);
            prompt.push_str("\nFix the failures before finishing.\n");
        }

        prompt.push_str(
            "\nWhen you are done, end your reply with a block of this form:\n\
             ## RESULT\n\
             STATUS: success|failed\n\
             FILES_MODIFIED: <comma-separated paths>\n\
             TESTS_ADDED: <count>\n",
        );

        prompt
    }
}

#[async_trait]
impl AgentRunner for ClaudeCliRunner {
    async fn run(
        &self,
        role: &str,
        description: &str,
        workdir: &Path,
        feedback: Option<&str>,
    ) -> Result<AgentResult, AgentError> {
        let prompt = Self::build_prompt(role, description, feedback);
        let started = Instant::now();

        tracing::info!(role = %role, workdir = %workdir.display(), "Invoking agent");

        let mut cmd = Command::new(&self.bin);
        cmd.arg("-p")
            .arg(&prompt)
            .args(["--output-format", "json"])
            .current_dir(workdir)
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(role = %role, "Agent invocation timed out");
                return Err(AgentError::Timeout(self.timeout.as_secs()));
            }
        };

        if !output.stderr.is_empty() {
            tracing::warn!(
                role = %role,
                "agent stderr: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AgentError::Runner(format!(
                "agent exited with {}: {}",
                output.status, stderr
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if raw.is_empty() {
            return Err(AgentError::Runner("agent returned empty output".to_string()));
        }

        // Prefer the JSON envelope; fall back to raw stdout when the CLI
        // printed plain text.
        let (text, input_tokens, output_tokens) = match serde_json::from_str::<CliEnvelope>(&raw) {
            Ok(envelope) if !envelope.result.is_empty() => (
                envelope.result,
                envelope.usage.input_tokens,
                envelope.usage.output_tokens,
            ),
            _ => {
                tracing::warn!(role = %role, "Agent output was not a JSON envelope, using raw stdout");
                (raw, 0, 0)
            }
        };

        let block = parse_result_block(&text);
        let status = if block.failed {
            AgentStatus::Failed
        } else {
            AgentStatus::Success
        };

        Ok(AgentResult {
            status,
            files_modified: block.files_modified,
            tests_added: block.tests_added,
            raw_output: text,
            input_tokens,
            output_tokens,
            duration: started.elapsed(),
            errors: block.errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_includes_feedback_section() {
        let prompt = ClaudeCliRunner::build_prompt(
            "rust-backend",
            "Fix auth bug",
            Some("2/10 tests failed: test_login"),
        );

        assert!(prompt.contains("rust-backend"));
        assert!(prompt.contains("Fix auth bug"));
        assert!(prompt.contains("test_login"));
        assert!(prompt.contains("## RESULT"));
    }

    #[test]
    fn test_prompt_without_feedback() {
        let prompt = ClaudeCliRunner::build_prompt("rust-backend", "Add endpoint", None);

        assert!(!prompt.contains("previous attempt"));
    }

    #[test]
    fn test_envelope_parsing() {
        let raw = r#"{"result": "done\n## RESULT\nSTATUS: success", "usage": {"input_tokens": 1000, "output_tokens": 500}}"#;

        let envelope: CliEnvelope = serde_json::from_str(raw).expect("valid envelope");

        assert_eq!(envelope.usage.input_tokens, 1000);
        assert_eq!(envelope.usage.output_tokens, 500);
        assert!(envelope.result.contains("## RESULT"));
    }
}
