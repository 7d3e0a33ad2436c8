//! TestResult and Failure (spec §3).
//!
//! `all_passed` is derived, never set independently of `failed`/`total_tests`
//! — spec §8 states this as a law (`r.all_passed == (r.failed == 0 && r.total > 0)`)
//! and explicitly keeps the "empty suite is vacuously passing" alternative
//! out (see SPEC_FULL.md's Open Question resolutions).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Failure {
    pub test_name: String,
    pub error_type: String,
    pub error_message: String,
    pub traceback: String,
}

impl Failure {
    pub fn new(
        test_name: impl Into<String>,
        error_type: impl Into<String>,
        error_message: impl Into<String>,
        traceback: impl Into<String>,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            error_type: error_type.into(),
            error_message: error_message.into(),
            traceback: traceback.into(),
        }
    }
}

/// Kinds of failure whose presence in a [`TestResult`] triggers test
/// re-adaptation (spec §4.1's `_should_readapt_tests` predicate).
pub const READAPT_ERROR_TYPES: &[&str] = &[
    "ImportError",
    "ModuleNotFoundError",
    "NameError",
    "AttributeError",
    "SyntaxError",
    "IndentationError",
];

/// Fragments whose presence anywhere in the aggregate failure text also
/// triggers re-adaptation (spec §4.1), matched case-insensitively.
pub const READAPT_TEXT_FRAGMENTS: &[&str] = &[
    "no module named",
    "cannot import name",
    "has no attribute",
    "is not defined",
    "found no collectors",
    "fixture",
    "importerror",
    "nameerror",
    "attributeerror",
    "syntaxerror",
    "indentationerror",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub all_passed: bool,
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub failure_details: Vec<Failure>,
    /// MCP step-execution summary, present only when an MCP plan ran
    /// alongside the unit tests (spec §4.3).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_summary: Option<serde_json::Value>,
}

impl TestResult {
    /// Construct a result, deriving `all_passed` from `failed`/`total`.
    pub fn new(total_tests: usize, passed: usize, failed: usize, failure_details: Vec<Failure>) -> Self {
        Self {
            all_passed: failed == 0 && total_tests > 0,
            total_tests,
            passed,
            failed,
            failure_details,
            mcp_summary: None,
        }
    }

    /// The all-zero neutral result for an absent FileSet/plan half of a
    /// merge (spec §4.3). Always non-passing on its own, since total==0.
    pub fn neutral() -> Self {
        Self::new(0, 0, 0, Vec::new())
    }

    /// A single synthetic failure, used throughout the orchestrator's
    /// error-propagation policy (spec §7) instead of raising.
    pub fn single_failure(test_name: &str, error_type: &str, error_message: impl Into<String>) -> Self {
        Self::new(
            1,
            0,
            1,
            vec![Failure::new(test_name, error_type, error_message, "")],
        )
    }

    /// Merge unit-test and MCP-step results (spec §4.3): sums, concatenated
    /// failures, MCP summary attached.
    pub fn merge(mut self, other: TestResult) -> TestResult {
        let total = self.total_tests + other.total_tests;
        let passed = self.passed + other.passed;
        let failed = self.failed + other.failed;
        self.failure_details.extend(other.failure_details);
        if other.mcp_summary.is_some() {
            self.mcp_summary = other.mcp_summary;
        }
        TestResult {
            all_passed: failed == 0 && total > 0,
            total_tests: total,
            passed,
            failed,
            failure_details: self.failure_details,
            mcp_summary: self.mcp_summary,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.passed + self.failed == self.total_tests
            && self.all_passed == (self.failed == 0 && self.total_tests > 0)
    }

    /// Whether this result's failures should trigger test re-adaptation,
    /// combined with a caller-supplied "code paths changed" flag (the other
    /// half of spec §4.1's `_should_readapt_tests` predicate).
    pub fn should_readapt_tests(&self, code_paths_changed: bool) -> bool {
        if code_paths_changed {
            return true;
        }
        if self
            .failure_details
            .iter()
            .any(|f| READAPT_ERROR_TYPES.contains(&f.error_type.as_str()))
        {
            return true;
        }
        let combined: String = self
            .failure_details
            .iter()
            .map(|f| format!("{} {}", f.error_message, f.traceback))
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        READAPT_TEXT_FRAGMENTS
            .iter()
            .any(|fragment| combined.contains(fragment))
    }

    /// Render the run's pipeline failures as LM-facing feedback text
    /// (spec §4.1 step 4.2, "format failure feedback").
    pub fn format_feedback(&self) -> String {
        let mut out = format!(
            "{}/{} tests failed.\n\n",
            self.failed, self.total_tests
        );
        for failure in &self.failure_details {
            out.push_str(&format!(
                "- {} ({}): {}\n",
                failure.test_name, failure.error_type, failure.error_message
            ));
            if !failure.traceback.trim().is_empty() {
                out.push_str(&format!("  {}\n", failure.traceback.trim()));
            }
        }
        out
    }
}
