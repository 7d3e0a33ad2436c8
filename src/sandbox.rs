//! Sandbox: materializes a FileSet pair to a temp directory and runs the
//! configured test harness against it (spec §4.2).
//!
//! Isolation here is filesystem-and-timeout only, not security sandboxing
//! (see SPEC_FULL.md's Non-goals) — the harness runs as a normal child
//! process under a temp `cwd`. Grounded in
//! `original_source/jelly/sandbox/runner.py` for the materialization and
//! output-parsing algorithm, and in `tools::{CommandValidator, ExecutionTimeout}`
//! for the whitelist-checked, timeout-wrapped subprocess pattern.

use crate::config::Config;
use crate::fileset::FileSet;
use crate::harness_output::parse_harness_output;
use crate::log_sink::{Level, LogSink};
use crate::test_result::TestResult;
use crate::tools::{CommandValidator, SafeCommand};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::Duration;

pub struct Sandbox<'a> {
    config: &'a Config,
    log: &'a LogSink,
}

impl<'a> Sandbox<'a> {
    pub fn new(config: &'a Config, log: &'a LogSink) -> Self {
        Self { config, log }
    }

    /// Materialize `code` under `T/src/` and `tests` under `T/tests/`, run
    /// the configured harness with `cwd=T`, and parse its output into a
    /// [`TestResult`] (spec §4.2 steps 1-6).
    pub async fn run_tests(&self, code: &FileSet, tests: &FileSet) -> Result<TestResult> {
        let _timer = self.log.timed("sandbox", "run_tests");

        let temp_dir = tempfile::tempdir().context("failed to create sandbox temp directory")?;
        let root = temp_dir.path();

        self.materialize(root, code, tests)?;

        let command_line = self.config.orchestrator.test_harness_command.clone();
        let (cmd, args) = command_line
            .split_first()
            .context("orchestrator.test_harness_command must not be empty")?;

        let validator = CommandValidator::default();
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let safe = validator
            .validate(cmd, &arg_refs)
            .context("test harness command failed whitelist validation")?;

        let timeout_secs = self.config.orchestrator.test_timeout_seconds;
        let result = self.spawn_and_collect(root, &safe, Duration::from_secs(timeout_secs)).await;

        if self.config.orchestrator.keep_sandbox_on_failure {
            let keep = match &result {
                Ok(r) => !r.all_passed,
                Err(_) => true,
            };
            if keep {
                let kept_path = temp_dir.into_path();
                self.log.event(
                    Level::Warning,
                    "sandbox",
                    "run_tests.kept",
                    vec![("path".into(), serde_json::json!(kept_path.display().to_string()))],
                );
            }
        }

        result
    }

    fn materialize(&self, root: &Path, code: &FileSet, tests: &FileSet) -> Result<()> {
        let src_dir = root.join("src");
        let tests_dir = root.join("tests");
        std::fs::create_dir_all(&src_dir).context("failed to create src/ in sandbox")?;
        std::fs::create_dir_all(&tests_dir).context("failed to create tests/ in sandbox")?;

        // Bootstrap file prepending T/src to the module search path, so
        // generated tests can `import` the generated code by module name.
        let conftest =
            "import sys, os\nsys.path.insert(0, os.path.join(os.path.dirname(__file__), \"src\"))\n";
        std::fs::write(root.join("conftest.py"), conftest)
            .context("failed to write sandbox conftest.py")?;
        std::fs::write(src_dir.join("__init__.py"), "")
            .context("failed to write src/__init__.py")?;
        std::fs::write(tests_dir.join("__init__.py"), "")
            .context("failed to write tests/__init__.py")?;

        for (path, content) in code.iter() {
            let relative = path.strip_prefix("src/").unwrap_or(path);
            let dest = src_dir.join(relative);
            write_with_parents(&dest, content)?;
        }

        for (path, content) in tests.iter() {
            let relative = path.strip_prefix("tests/").unwrap_or(path);
            let dest = tests_dir.join(relative);
            ensure_package_markers(&tests_dir, &dest)?;
            write_with_parents(&dest, content)?;
        }

        Ok(())
    }

    async fn spawn_and_collect(
        &self,
        cwd: &Path,
        safe: &SafeCommand,
        timeout: Duration,
    ) -> Result<TestResult> {
        let (cmd, args) = safe.as_tuple();
        let mut process = Command::new(cmd);
        process
            .args(args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        self.log.event(
            Level::Debug,
            "sandbox",
            "harness.spawn",
            vec![("command".into(), serde_json::json!(safe.as_tuple().0))],
        );

        let mut child = process.spawn().context("failed to spawn test harness")?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_success = output.status.success();
                Ok(parse_harness_output(&stdout, &stderr, exit_success))
            }
            Ok(Err(e)) => Err(anyhow::anyhow!("failed to wait for test harness: {e}")),
            Err(_) => {
                self.log.event(
                    Level::Warning,
                    "sandbox",
                    "harness.timeout",
                    vec![("timeout_secs".into(), serde_json::json!(timeout.as_secs()))],
                );
                Ok(TestResult::single_failure(
                    "(timeout)",
                    "TimeoutError",
                    format!("test harness exceeded {}s", timeout.as_secs()),
                ))
            }
        }
    }
}

fn write_with_parents(dest: &Path, content: &str) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::write(dest, content).with_context(|| format!("failed to write {}", dest.display()))
}

/// Ensure an empty `__init__.py` exists in every directory from `tests_dir`
/// down to `dest`'s parent, so nested test packages import cleanly
/// (spec §4.2 step 3).
fn ensure_package_markers(tests_dir: &Path, dest: &Path) -> Result<()> {
    let Some(parent) = dest.parent() else {
        return Ok(());
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory {}", parent.display()))?;

    let mut dir = parent.to_path_buf();
    loop {
        let marker = dir.join("__init__.py");
        if !marker.exists() {
            std::fs::write(&marker, "")
                .with_context(|| format!("failed to write {}", marker.display()))?;
        }
        if dir == tests_dir || !dir.starts_with(tests_dir) {
            break;
        }
        match dir.parent() {
            Some(p) if p != dir => dir = p.to_path_buf(),
            _ => break,
        }
    }
    Ok(())
}

#[allow(dead_code)]
fn default_sandbox_root() -> PathBuf {
    std::env::temp_dir()
}
