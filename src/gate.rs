//! Test gate - baseline capture and per-level test runs.
//!
//! Two levels matter: a cheap fast level run after every subtask attempt
//! (it gates retry), and a normal level run once after all subtasks are
//! merged (it gates final regression). A failing [`TestResult`] is an
//! ordinary outcome; only failure to invoke the runner is an error.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::process::Command;

/// Test granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestLevel {
    /// Cheap per-attempt gate (`cargo test --lib`).
    Fast,
    /// Full post-merge regression gate (`cargo test`).
    Normal,
}

impl TestLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Normal => "normal",
        }
    }
}

/// Outcome of one gate invocation. Transient.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub level: TestLevel,
    pub passed: bool,
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: Vec<String>,
    pub duration: Duration,
}

/// Pass/fail snapshot captured once before any subtask runs, used only for
/// regression comparison after the final merge.
#[derive(Debug, Clone)]
pub struct TestBaseline {
    pub total_tests: u32,
    pub passing_tests: u32,
    pub snapshot_hash: String,
}

/// External test-execution capability.
#[async_trait]
pub trait TestGate: Send + Sync {
    /// Run the full suite once, before any mutation.
    async fn capture_baseline(&self, path: &Path) -> Result<TestBaseline>;

    async fn run_level(&self, level: TestLevel, path: &Path) -> Result<TestResult>;
}

/// Production [`TestGate`] backed by `cargo test`.
pub struct CargoTestGate;

impl CargoTestGate {
    async fn run_cargo(&self, level: TestLevel, path: &Path) -> Result<(String, bool)> {
        let mut cmd = Command::new("cargo");
        cmd.arg("test");
        if level == TestLevel::Fast {
            cmd.arg("--lib");
        }
        cmd.current_dir(path).env("NO_COLOR", "1");

        let output = cmd
            .output()
            .await
            .context("Failed to execute cargo test")?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((text, output.status.success()))
    }
}

#[async_trait]
impl TestGate for CargoTestGate {
    async fn capture_baseline(&self, path: &Path) -> Result<TestBaseline> {
        let result = self.run_level(TestLevel::Normal, path).await?;

        let snapshot = format!(
            "{}:{}:{}",
            result.total_tests,
            result.passed_tests,
            result.failed_tests.join(",")
        );
        let hash = hex_digest(&snapshot);

        tracing::info!(
            total = result.total_tests,
            passing = result.passed_tests,
            hash = %hash,
            "Captured test baseline"
        );

        Ok(TestBaseline {
            total_tests: result.total_tests,
            passing_tests: result.passed_tests,
            snapshot_hash: hash,
        })
    }

    async fn run_level(&self, level: TestLevel, path: &Path) -> Result<TestResult> {
        let started = Instant::now();
        let (output, success) = self.run_cargo(level, path).await?;
        let duration = started.elapsed();

        let parsed = parse_cargo_output(&output);
        let result = match parsed {
            Some((passed_tests, failed, failed_tests)) => TestResult {
                level,
                passed: failed == 0 && success,
                total_tests: passed_tests + failed,
                passed_tests,
                failed_tests,
                duration,
            },
            None if !success => {
                // The suite never ran, most likely a build failure in the
                // agent's changes. That gates the same way failing tests do.
                TestResult {
                    level,
                    passed: false,
                    total_tests: 0,
                    passed_tests: 0,
                    failed_tests: vec!["build".to_string()],
                    duration,
                }
            }
            None => anyhow::bail!("Unable to parse cargo test output"),
        };

        tracing::info!(
            level = %level.as_str(),
            passed = result.passed,
            total = result.total_tests,
            "Test gate run complete"
        );

        Ok(result)
    }
}

fn hex_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// Parse `cargo test` output. Sums `test result:` summary lines across
/// suites and collects `test <name> ... FAILED` entries.
fn parse_cargo_output(output: &str) -> Option<(u32, u32, Vec<String>)> {
    let mut passed = 0u32;
    let mut failed = 0u32;
    let mut seen_summary = false;
    let mut failed_tests = Vec::new();

    for line in output.lines() {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("test result:") {
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            for pair in tokens.windows(2) {
                if pair[1].starts_with("passed") {
                    passed += pair[0].parse::<u32>().unwrap_or(0);
                    seen_summary = true;
                } else if pair[1].starts_with("failed") {
                    failed += pair[0].parse::<u32>().unwrap_or(0);
                }
            }
        } else if line.starts_with("test ") && line.ends_with("FAILED") {
            if let Some(name) = line
                .strip_prefix("test ")
                .and_then(|rest| rest.split_whitespace().next())
            {
                failed_tests.push(name.to_string());
            }
        }
    }

    if seen_summary {
        failed_tests.sort();
        failed_tests.dedup();
        Some((passed, failed, failed_tests))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_suite() {
        let output = "running 10 tests\n..........\ntest result: ok. 10 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out\n";

        let (passed, failed, names) = parse_cargo_output(output).expect("should parse");

        assert_eq!(passed, 10);
        assert_eq!(failed, 0);
        assert!(names.is_empty());
    }

    #[test]
    fn test_parse_failures_with_names() {
        let output = "running 10 tests\ntest tests::test_foo ... FAILED\ntest tests::test_bar ... FAILED\ntest result: FAILED. 8 passed; 2 failed; 0 ignored\n";

        let (passed, failed, names) = parse_cargo_output(output).expect("should parse");

        assert_eq!(passed, 8);
        assert_eq!(failed, 2);
        assert_eq!(names, vec!["tests::test_bar", "tests::test_foo"]);
    }

    #[test]
    fn test_parse_sums_multiple_suites() {
        let output = "test result: ok. 4 passed; 0 failed; 0 ignored\ntest result: ok. 6 passed; 1 failed; 0 ignored\n";

        let (passed, failed, _) = parse_cargo_output(output).expect("should parse");

        assert_eq!(passed, 10);
        assert_eq!(failed, 1);
    }

    #[test]
    fn test_unparsable_output() {
        assert!(parse_cargo_output("error[E0432]: unresolved import").is_none());
    }

    #[test]
    fn test_snapshot_hash_is_stable() {
        assert_eq!(hex_digest("10:10:"), hex_digest("10:10:"));
        assert_ne!(hex_digest("10:10:"), hex_digest("10:8:a,b"));
        assert_eq!(hex_digest("10:10:").len(), 16);
    }
}
