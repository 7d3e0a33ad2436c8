//! Orchestrator (spec §4.1): the top-level state machine that ties the
//! capability gate, MCP bootstrap, agents, sandbox, and sidecar manager
//! together into one run.

use crate::agents::{CapabilityChecker, CodeGenerator, TestDesigner};
use crate::capability::{self, CapabilityDecision, CheckSeverity};
use crate::child_builder;
use crate::config::{Config, McpUnavailableBehavior};
use crate::fileset::FileSet;
use crate::log_sink::{Level, LogSink};
use crate::mcp::bootstrap::{self, BootstrapResult};
use crate::mcp::sidecar::SidecarManager;
use crate::requirements::Requirements;
use crate::test_executor::TestExecutor;
use crate::test_result::TestResult;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub struct RunOutcome {
    pub result: TestResult,
    pub mcp_bootstrap: Option<Value>,
    pub run_log_file: PathBuf,
    pub capability_decision: Option<CapabilityDecision>,
    pub delegated_to_child: Option<Value>,
}

pub struct Orchestrator {
    config: Config,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the full pipeline end to end (spec §4.1's steps (0)-(5)).
    pub async fn run(
        &self,
        requirements_path: &Path,
        project_dir: &Path,
        depth: u32,
        seen_signatures: Vec<String>,
    ) -> anyhow::Result<RunOutcome> {
        let log = LogSink::create(&self.config.logging.log_dir, Level::parse(&self.config.logging.run_log_level), None)?;
        let run_log_file = log.log_file().to_path_buf();

        log.event(
            Level::Info,
            "orchestrator",
            "run.start",
            vec![("requirements_path", json!(requirements_path.to_string_lossy())), ("depth", json!(depth))],
        );

        let requirements_text = std::fs::read_to_string(requirements_path)
            .unwrap_or_default();
        let requirements = Requirements::new(requirements_text);

        let sidecars = SidecarManager::new(&self.config, project_dir, &log)?;

        // (0) Capability gate.
        let mut capability_decision = None;
        if self.config.orchestrator.capability_gate_enabled {
            log.event(Level::Info, "orchestrator", "step.capability_gate.running", vec![]);
            let preflight = capability::run_preflight(requirements_path, project_dir, &self.config);
            let baseline_status = bootstrap::bootstrap(&self.config, project_dir, &log).to_status();

            let has_hard_failure = preflight.iter().any(|c| c.severity == CheckSeverity::Hard && !c.passed);
            let llm = if has_hard_failure {
                None
            } else {
                let checker = CapabilityChecker::new(&self.config, &log);
                Some(checker.check(requirements.text(), &preflight, &baseline_status, depth).await)
            };

            let decision = capability::decide(
                preflight,
                llm,
                self.config.capability.confidence_threshold,
                baseline_status,
                depth,
                requirements.text(),
                &log,
            );

            if !decision.capable {
                log.event(Level::Warning, "orchestrator", "step.capability_gate.incapable", vec![("reasons", json!(decision.reasons))]);
                let outcome = child_builder::delegate(
                    requirements_path,
                    project_dir,
                    &decision,
                    depth,
                    &seen_signatures,
                    &self.config,
                    &log,
                )
                .await;

                sidecars.stop_all().await;
                log.event(Level::Info, "orchestrator", "step.complete", vec![("delegated", json!(true))]);

                return Ok(RunOutcome {
                    result: outcome.result,
                    mcp_bootstrap: None,
                    run_log_file,
                    capability_decision: Some(decision),
                    delegated_to_child: Some(json!({
                        "child_workspace": outcome.child_workspace.map(|p| p.to_string_lossy().to_string()),
                        "child_project_dir": outcome.child_project_dir.map(|p| p.to_string_lossy().to_string()),
                        "stdout_tail": outcome.stdout_tail,
                        "stderr_tail": outcome.stderr_tail,
                    })),
                });
            }
            log.event(Level::Info, "orchestrator", "step.capability_gate.capable", vec![]);
            capability_decision = Some(decision);
        }

        // MCP bootstrap.
        let mut bootstrap_result = BootstrapResult::default();
        let mut fail_closed: Option<TestResult> = None;
        if self.config.orchestrator.mcp_bootstrap_enabled {
            log.event(Level::Info, "orchestrator", "step.mcp_bootstrap.running", vec![]);
            bootstrap_result = bootstrap::bootstrap(&self.config, project_dir, &log);
            if !bootstrap_result.unavailable.is_empty() {
                match self.config.orchestrator.mcp_unavailable_behavior {
                    McpUnavailableBehavior::FailClosed => {
                        log.event(Level::Error, "orchestrator", "step.mcp_bootstrap.fail_closed", vec![("unavailable", json!(bootstrap_result.unavailable))]);
                        fail_closed = Some(TestResult::single_failure(
                            "(mcp_bootstrap)",
                            "McpUnavailable",
                            format!("required MCP servers unavailable: {:?}", bootstrap_result.unavailable),
                        ));
                    }
                    McpUnavailableBehavior::WarnAndContinue => {
                        log.event(Level::Warning, "orchestrator", "step.mcp_bootstrap.warn_and_continue", vec![("unavailable", json!(bootstrap_result.unavailable))]);
                    }
                    McpUnavailableBehavior::UnitOnlyFallback => {
                        log.event(Level::Warning, "orchestrator", "step.mcp_bootstrap.unit_only_fallback", vec![]);
                        bootstrap_result.available.clear();
                    }
                }
            }
        }

        if let Some(result) = fail_closed {
            sidecars.stop_all().await;
            log.event(Level::Info, "orchestrator", "step.complete", vec![("fail_closed", json!(true))]);
            return Ok(RunOutcome {
                result,
                mcp_bootstrap: Some(bootstrap_result.to_status()),
                run_log_file,
                capability_decision,
                delegated_to_child: None,
            });
        }

        // (1) design tests, (2) generate code -- concurrently.
        log.event(Level::Info, "orchestrator", "step.design_and_generate.running", vec![]);
        let designer = TestDesigner::new(&self.config, &log);
        let generator = CodeGenerator::new(&self.config, &log);
        let signatures = requirements.signatures();

        let (design_result, mut code) = tokio::join!(
            designer.design_tests(requirements.text(), &signatures, &bootstrap_result.available, project_dir),
            generator.generate(requirements.text()),
        );
        let mut tests = design_result.tests;
        let mcp_plan = design_result.mcp_plan;

        // (3) adapt tests.
        log.event(Level::Info, "orchestrator", "step.adapt_tests.running", vec![]);
        tests = designer.adapt_tests(&code, &tests).await;

        // (4) test & iterate.
        let executor = TestExecutor::new(&self.config, project_dir, &log);
        let mut result = TestResult::neutral();
        let mut previous_code_paths = code.path_set();
        let max_iterations = self.config.orchestrator.max_fix_iterations.max(1);

        for iteration in 0..max_iterations {
            log.event(Level::Info, "orchestrator", "step.test_and_iterate.running", vec![("iteration", json!(iteration))]);
            result = executor.run_all(&code, &tests, &mcp_plan, Some(&sidecars)).await;

            if result.all_passed {
                break;
            }

            let is_last = iteration + 1 >= max_iterations;
            if is_last {
                log.event(Level::Warning, "orchestrator", "step.test_and_iterate.last_iteration_failed", vec![]);
                break;
            }

            let feedback = result.format_feedback();
            let refined = generator.refine(requirements.text(), &code, &feedback, iteration + 1).await;
            code = FileSet::merge_preferring(&code, &refined);

            let code_paths_changed = code.path_set() != previous_code_paths;
            previous_code_paths = code.path_set();

            if result.should_readapt_tests(code_paths_changed) {
                log.event(Level::Info, "orchestrator", "step.test_and_iterate.readapting_tests", vec![]);
                let adapted = designer.adapt_tests(&code, &tests).await;
                tests = FileSet::merge_preferring(&tests, &adapted);
            }
        }

        // (5) write outputs.
        log.event(Level::Info, "orchestrator", "step.write_outputs.running", vec![]);
        write_outputs(project_dir, &code, &tests, self.config.orchestrator.clean_output_before_write)?;

        sidecars.stop_all().await;
        log.event(Level::Info, "orchestrator", "run.complete", vec![("all_passed", json!(result.all_passed))]);

        let mut summary = bootstrap_result.to_status();
        if let Value::Object(ref mut map) = summary {
            map.insert("sidecar_summary".to_string(), json!(sidecars.summary()));
        }

        Ok(RunOutcome {
            result,
            mcp_bootstrap: Some(summary),
            run_log_file,
            capability_decision,
            delegated_to_child: None,
        })
    }
}

/// Persist `code` under `project_dir/src` and `tests` under
/// `project_dir/tests` (spec §4.1 step (5)), stripping the conventional
/// `src/`/`tests/` prefix from each entry the same way Sandbox does.
fn write_outputs(project_dir: &Path, code: &FileSet, tests: &FileSet, clean_first: bool) -> anyhow::Result<()> {
    let src_dir = project_dir.join("src");
    let tests_dir = project_dir.join("tests");

    if clean_first {
        clean_bottom_up(&src_dir)?;
        clean_bottom_up(&tests_dir)?;
    }

    for (path, content) in code.iter() {
        let relative = path.strip_prefix("src/").unwrap_or(path);
        write_with_parents(&src_dir.join(relative), content)?;
    }
    for (path, content) in tests.iter() {
        let relative = path.strip_prefix("tests/").unwrap_or(path);
        write_with_parents(&tests_dir.join(relative), content)?;
    }
    Ok(())
}

fn write_with_parents(dest: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, content)?;
    Ok(())
}

/// Remove `dir`'s contents depth-first, then the directory itself, if it exists.
fn clean_bottom_up(dir: &Path) -> anyhow::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            clean_bottom_up(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    std::fs::remove_dir(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_bottom_up_is_noop_on_missing_dir() {
        let dir = std::env::temp_dir().join("builder_orchestrator_test_missing_dir_xyz");
        assert!(clean_bottom_up(&dir).is_ok());
    }

    #[test]
    fn clean_bottom_up_removes_nested_contents() {
        let dir = std::env::temp_dir().join(format!("builder_orchestrator_test_{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("nested").join("file.txt"), "x").unwrap();
        clean_bottom_up(&dir).unwrap();
        assert!(!dir.exists());
    }
}
