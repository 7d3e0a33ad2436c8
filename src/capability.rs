//! CapabilityDecision (spec §3) and the preflight + LM-assessed
//! capability gate (spec §4.6).

use crate::config::Config;
use crate::log_sink::{Level, LogSink};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityDecision {
    pub capable: bool,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub missing_capabilities: Vec<String>,
    pub recommended_child_requirements: String,
    pub mcp_baseline_status: serde_json::Value,
    pub preflight_checks: Vec<PreflightCheck>,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckSeverity {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreflightCheck {
    pub name: String,
    pub severity: CheckSeverity,
    pub passed: bool,
    pub detail: String,
}

/// The LM capability checker's raw response shape (spec §4.9), before the
/// gate combines it with preflight + threshold.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmCapabilityAssessment {
    pub capable: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub missing_capabilities: Vec<String>,
    #[serde(default)]
    pub recommended_child_requirements: String,
}

impl LlmCapabilityAssessment {
    /// The "assessment_unavailable" sentinel structure returned when the LM
    /// response cannot be parsed as the expected JSON (spec §4.9).
    pub fn unavailable() -> Self {
        Self {
            capable: true,
            confidence: 1.0,
            reasons: vec!["assessment_unavailable".to_string()],
            missing_capabilities: Vec::new(),
            recommended_child_requirements: String::new(),
        }
    }

    /// Clamp confidence to [0,1], truncate list fields to 8 items,
    /// coerce non-string items via stringification (spec §4.9's adapter
    /// normalization rules). `raw` is the parsed JSON value prior to
    /// strict typing, so loosely-typed list entries can be stringified.
    pub fn normalize(mut self, raw: &serde_json::Value) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        if let Some(arr) = raw.get("reasons").and_then(|v| v.as_array()) {
            self.reasons = stringify_truncated(arr);
        } else {
            self.reasons.truncate(8);
        }
        if let Some(arr) = raw.get("missing_capabilities").and_then(|v| v.as_array()) {
            self.missing_capabilities = stringify_truncated(arr);
        } else {
            self.missing_capabilities.truncate(8);
        }
        self
    }
}

fn stringify_truncated(arr: &[serde_json::Value]) -> Vec<String> {
    arr.iter()
        .take(8)
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

/// Run the deterministic preflight checks (spec §4.6).
pub fn run_preflight(requirements_path: &Path, project_dir: &Path, config: &Config) -> Vec<PreflightCheck> {
    let mut checks = Vec::new();

    let exists = requirements_path.is_file();
    checks.push(PreflightCheck {
        name: "requirements_file_exists".into(),
        severity: CheckSeverity::Hard,
        passed: exists,
        detail: format!("{}", requirements_path.display()),
    });

    let non_empty = exists
        && std::fs::metadata(requirements_path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);
    checks.push(PreflightCheck {
        name: "requirements_non_empty".into(),
        severity: CheckSeverity::Hard,
        passed: non_empty,
        detail: String::new(),
    });

    let api_key_set = std::env::var(&config.lm.api_key_env)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);
    checks.push(PreflightCheck {
        name: "lm_api_key_configured".into(),
        severity: CheckSeverity::Hard,
        passed: api_key_set,
        detail: config.lm.api_key_env.clone(),
    });

    let writable = is_dir_writable(project_dir);
    checks.push(PreflightCheck {
        name: "project_dir_writable".into(),
        severity: CheckSeverity::Hard,
        passed: writable,
        detail: format!("{}", project_dir.display()),
    });

    let harness_cmd = config.orchestrator.test_harness_command.first().cloned().unwrap_or_default();
    let harness_found = command_on_path(&harness_cmd);
    checks.push(PreflightCheck {
        name: "test_harness_discoverable".into(),
        severity: CheckSeverity::Hard,
        passed: harness_found,
        detail: harness_cmd,
    });

    let node_found = command_on_path("node") || command_on_path("npm");
    checks.push(PreflightCheck {
        name: "node_npm_available".into(),
        severity: CheckSeverity::Soft,
        passed: node_found,
        detail: String::new(),
    });

    checks
}

fn is_dir_writable(dir: &Path) -> bool {
    let probe = dir.join(format!(".builder_write_probe_{}", std::process::id()));
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

fn command_on_path(command: &str) -> bool {
    if command.is_empty() {
        return false;
    }
    let path = Path::new(command);
    if path.is_absolute() || command.contains('/') {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| {
                let candidate = dir.join(command);
                candidate.is_file()
            })
        })
        .unwrap_or(false)
}

fn hard_failures(checks: &[PreflightCheck]) -> Vec<&PreflightCheck> {
    checks
        .iter()
        .filter(|c| c.severity == CheckSeverity::Hard && !c.passed)
        .collect()
}

/// Build the §6 child-requirements Markdown document for a set of gap
/// reasons.
pub fn synthesize_child_requirements(gaps: &[String], original_requirements: &str) -> String {
    let capped: Vec<&String> = gaps.iter().take(8).collect();
    let mut doc = String::from("# Child Capability Bootstrap\n\n## Objective\n\n");
    doc.push_str("Resolve the capability gaps below, then complete the original requirements.\n\n");
    doc.push_str("## Capability Gaps\n\n");
    for gap in &capped {
        doc.push_str(&format!("- {gap}\n"));
    }
    doc.push_str("\n## Original Requirements\n\n");
    doc.push_str(original_requirements);
    doc
}

/// Result of running the full capability gate: preflight, then (if
/// preflight passes) the LM assessment combined with the threshold.
pub fn decide(
    preflight_checks: Vec<PreflightCheck>,
    llm: Option<LlmCapabilityAssessment>,
    confidence_threshold: f64,
    mcp_baseline_status: serde_json::Value,
    depth: u32,
    original_requirements: &str,
    log: &LogSink,
) -> CapabilityDecision {
    let failures = hard_failures(&preflight_checks);
    if !failures.is_empty() {
        let reasons: Vec<String> = failures
            .iter()
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect();
        log.event(
            Level::Warning,
            "capability_gate",
            "preflight.hard_failure",
            vec![("reasons".into(), serde_json::json!(reasons))],
        );
        let recommended = synthesize_child_requirements(&reasons, original_requirements);
        return CapabilityDecision {
            capable: false,
            confidence: 0.0,
            reasons: reasons.clone(),
            missing_capabilities: reasons,
            recommended_child_requirements: recommended,
            mcp_baseline_status,
            preflight_checks,
            depth,
        };
    }

    let assessment = llm.unwrap_or_else(LlmCapabilityAssessment::unavailable);
    let capable = assessment.capable && assessment.confidence >= confidence_threshold;
    CapabilityDecision {
        capable,
        confidence: assessment.confidence,
        reasons: assessment.reasons,
        missing_capabilities: assessment.missing_capabilities,
        recommended_child_requirements: assessment.recommended_child_requirements,
        mcp_baseline_status,
        preflight_checks,
        depth,
    }
}
