//! ChildBuilder (spec §4.7): "pregnancy" recursion — when the capability
//! gate finds the run incapable, delegate to a fresh subprocess of the same
//! binary in an isolated workspace, rather than recursing in-process.
//!
//! Grounded in spec §9's design note: the parent passes `depth` and
//! `seen_signatures` as CLI arguments; the child gets a fresh run_id and
//! there is no shared memory between parent and child.

use crate::capability::CapabilityDecision;
use crate::config::Config;
use crate::log_sink::{Level, LogSink};
use crate::test_result::TestResult;
use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct DelegationOutcome {
    pub result: TestResult,
    pub child_workspace: Option<PathBuf>,
    pub child_project_dir: Option<PathBuf>,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

/// Names excluded when copying the repository into a child workspace
/// (spec §4.7 step 3: `.git`, caches, logs, the workspace dir itself, `output/`).
fn is_excluded_entry(name: &str, config: &Config) -> bool {
    const ALWAYS_EXCLUDED: &[&str] = &[".git", "target", "__pycache__", ".pytest_cache", "output"];
    if ALWAYS_EXCLUDED.contains(&name) {
        return true;
    }
    let log_dir_name = Path::new(&config.logging.log_dir)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let workspace_dir_name = Path::new(&config.pregnancy.workspace_dir)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    (!log_dir_name.is_empty() && name == log_dir_name) || (!workspace_dir_name.is_empty() && name == workspace_dir_name)
}

fn copy_dir_filtered(src: &Path, dst: &Path, config: &Config) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if is_excluded_entry(&name_str, config) {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_filtered(&src_path, &dst_path, config)?;
        } else if file_type.is_file() {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

fn tail(text: &str, max_chars: usize) -> String {
    let len = text.chars().count();
    if len <= max_chars {
        text.to_string()
    } else {
        text.chars().skip(len - max_chars).collect()
    }
}

/// Signature derived from a capability decision, used to detect and abort
/// repeated-failure loops across pregnancy generations (spec §4.7 step 2).
fn capability_signature(decision: &CapabilityDecision) -> String {
    if !decision.missing_capabilities.is_empty() {
        let mut sorted = decision.missing_capabilities.clone();
        sorted.sort();
        sorted.join(",")
    } else if !decision.reasons.is_empty() {
        decision.reasons.join(",")
    } else {
        "incapable".to_string()
    }
}

/// Delegate a run to a freshly-spawned child process of the same binary
/// (spec §4.7).
pub async fn delegate(
    requirements_path: &Path,
    project_dir: &Path,
    decision: &CapabilityDecision,
    depth: u32,
    seen_signatures: &[String],
    config: &Config,
    log: &LogSink,
) -> DelegationOutcome {
    if depth + 1 > config.pregnancy.max_depth {
        log.event(
            Level::Warning,
            "child_builder",
            "delegate.depth_exceeded",
            vec![("depth", json!(depth)), ("max_depth", json!(config.pregnancy.max_depth))],
        );
        return DelegationOutcome {
            result: TestResult::single_failure(
                "(pregnancy)",
                "PregnancyDepthExceeded",
                format!("depth={} exceeds max_depth={}", depth + 1, config.pregnancy.max_depth),
            ),
            child_workspace: None,
            child_project_dir: None,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
        };
    }

    let signature = capability_signature(decision);
    if seen_signatures.iter().any(|s| s == &signature) {
        log.event(
            Level::Warning,
            "child_builder",
            "delegate.repeated_signature",
            vec![("signature", json!(signature))],
        );
        return DelegationOutcome {
            result: TestResult::single_failure(
                "(pregnancy)",
                "RepeatedCapabilitySignature",
                format!("capability signature '{signature}' already seen in this pregnancy chain"),
            ),
            child_workspace: None,
            child_project_dir: None,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
        };
    }

    match run_child(requirements_path, project_dir, decision, depth, seen_signatures, &signature, config, log).await {
        Ok(outcome) => outcome,
        Err(e) => DelegationOutcome {
            result: TestResult::single_failure("(pregnancy)", "ChildBuilderSetupFailed", e.to_string()),
            child_workspace: None,
            child_project_dir: None,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
        },
    }
}

async fn run_child(
    requirements_path: &Path,
    project_dir: &Path,
    decision: &CapabilityDecision,
    depth: u32,
    seen_signatures: &[String],
    signature: &str,
    config: &Config,
    log: &LogSink,
) -> Result<DelegationOutcome> {
    let repo_root = std::env::current_dir().context("failed to resolve current directory")?;

    let child_id = uuid::Uuid::new_v4().simple().to_string();
    let child_workspace = Path::new(&config.pregnancy.workspace_dir).join(format!("child_{child_id}"));
    std::fs::create_dir_all(&child_workspace)
        .with_context(|| format!("failed to create child workspace {}", child_workspace.display()))?;

    copy_dir_filtered(&repo_root, &child_workspace, config)
        .with_context(|| format!("failed to copy repository into {}", child_workspace.display()))?;

    let child_requirements = if !decision.recommended_child_requirements.trim().is_empty() {
        decision.recommended_child_requirements.clone()
    } else {
        std::fs::read_to_string(requirements_path).unwrap_or_default()
    };
    let child_requirements_path = child_workspace.join("child_requirements.md");
    std::fs::write(&child_requirements_path, &child_requirements)
        .with_context(|| format!("failed to write {}", child_requirements_path.display()))?;

    let child_project_dir = child_workspace.join("output");
    std::fs::create_dir_all(&child_project_dir)?;

    let mut all_signatures = seen_signatures.to_vec();
    all_signatures.push(signature.to_string());
    let signatures_json = serde_json::to_string(&all_signatures)?;

    let self_exe = std::env::current_exe().context("failed to resolve current executable")?;

    log.event(
        Level::Info,
        "child_builder",
        "delegate.spawn",
        vec![
            ("child_workspace", json!(child_workspace.to_string_lossy())),
            ("depth", json!(depth + 1)),
        ],
    );

    let mut command = tokio::process::Command::new(&self_exe);
    command
        .arg("run")
        .arg(&child_requirements_path)
        .arg("--project-dir")
        .arg(&child_project_dir)
        .arg(format!("--pregnancy-depth={}", depth + 1))
        .arg(format!("--pregnancy-signatures={signatures_json}"))
        .current_dir(&child_workspace)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().context("failed to spawn child builder process")?;
    let timeout = Duration::from_secs(config.pregnancy.timeout_seconds);

    let outcome = tokio::time::timeout(timeout, child.wait_with_output()).await;

    match outcome {
        Err(_) => {
            log.event(Level::Error, "child_builder", "delegate.timeout", vec![("timeout_seconds", json!(config.pregnancy.timeout_seconds))]);
            Ok(DelegationOutcome {
                result: TestResult::single_failure(
                    "(pregnancy)",
                    "PregnancyTimeout",
                    format!("child builder exceeded timeout of {}s", config.pregnancy.timeout_seconds),
                ),
                child_workspace: Some(child_workspace),
                child_project_dir: Some(child_project_dir),
                stdout_tail: String::new(),
                stderr_tail: String::new(),
            })
        }
        Ok(Err(e)) => Err(e).context("failed waiting for child builder process"),
        Ok(Ok(output)) => {
            let stdout_tail = tail(&String::from_utf8_lossy(&output.stdout), 2000);
            let stderr_tail = tail(&String::from_utf8_lossy(&output.stderr), 2000);

            if !output.status.success() {
                let code = output.status.code().unwrap_or(-1);
                log.event(
                    Level::Error,
                    "child_builder",
                    "delegate.child_failed",
                    vec![("code", json!(code))],
                );
                return Ok(DelegationOutcome {
                    result: TestResult::single_failure(
                        "(pregnancy)",
                        "ChildBuilderFailed",
                        format!("child builder exited with code {code}:\nstdout: {stdout_tail}\nstderr: {stderr_tail}"),
                    ),
                    child_workspace: Some(child_workspace),
                    child_project_dir: Some(child_project_dir),
                    stdout_tail,
                    stderr_tail,
                });
            }

            log.event(Level::Info, "child_builder", "delegate.child_succeeded", vec![]);
            let mut result = TestResult::new(1, 1, 0, Vec::new());
            result.mcp_summary = Some(json!({
                "delegated_to_child": true,
                "child_workspace": child_workspace.to_string_lossy(),
                "child_project_dir": child_project_dir.to_string_lossy(),
                "stdout_tail": stdout_tail,
                "stderr_tail": stderr_tail,
            }));
            Ok(DelegationOutcome {
                result,
                child_workspace: Some(child_workspace),
                child_project_dir: Some(child_project_dir),
                stdout_tail,
                stderr_tail,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CheckSeverity, PreflightCheck};

    fn decision_with(missing: Vec<&str>, reasons: Vec<&str>) -> CapabilityDecision {
        CapabilityDecision {
            capable: false,
            confidence: 0.0,
            reasons: reasons.into_iter().map(String::from).collect(),
            missing_capabilities: missing.into_iter().map(String::from).collect(),
            recommended_child_requirements: String::new(),
            mcp_baseline_status: json!({}),
            preflight_checks: vec![PreflightCheck {
                name: "requirements_file_exists".into(),
                severity: CheckSeverity::Hard,
                passed: false,
                detail: "missing".into(),
            }],
            depth: 0,
        }
    }

    #[test]
    fn signature_prefers_missing_capabilities_sorted() {
        let decision = decision_with(vec!["b", "a"], vec!["unused"]);
        assert_eq!(capability_signature(&decision), "a,b");
    }

    #[test]
    fn signature_falls_back_to_reasons_then_sentinel() {
        let with_reasons = decision_with(vec![], vec!["no api key"]);
        assert_eq!(capability_signature(&with_reasons), "no api key");

        let with_neither = decision_with(vec![], vec![]);
        assert_eq!(capability_signature(&with_neither), "incapable");
    }

    #[test]
    fn exclusion_set_covers_git_and_configured_dirs() {
        let config = Config::default();
        assert!(is_excluded_entry(".git", &config));
        assert!(is_excluded_entry("output", &config));
        assert!(is_excluded_entry(".builder_logs", &config));
        assert!(is_excluded_entry(".builder_pregnancy", &config));
        assert!(!is_excluded_entry("src", &config));
    }

    #[test]
    fn tail_truncates_from_the_end() {
        let text = "a".repeat(10);
        assert_eq!(tail(&text, 4), "aaaa");
        assert_eq!(tail(&text, 100), text);
    }
}
