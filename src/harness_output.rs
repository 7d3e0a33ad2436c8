//! Pure parser for the external test harness's textual output (spec §4.2
//! step 5) — factored out as a string-in/struct-out function per spec §9's
//! design note ("factor it as a pure function over strings so it is
//! unit-testable independent of any LM"), grounded in
//! `original_source/jelly/sandbox/runner.py::_parse_pytest_output`.

use crate::test_result::{Failure, TestResult};
use regex::Regex;
use std::sync::OnceLock;

fn summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+) passed(?:.*?(\d+) failed)?(?:.*?(\d+) error)?").unwrap()
    })
}

fn failed_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+) failed").unwrap())
}

fn error_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+) error").unwrap())
}

fn failed_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(?:FAILED|ERROR)\s+(.*?)\s+-\s+(.*)$").unwrap())
}

fn traceback_section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)_{5,}\s(.*?)\s_{5,}\n(.*?)(?:_{5,}|\z)").unwrap())
}

fn error_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([\w.]+(?:Error|Exception))[:\s]*(.*)").unwrap())
}

/// Parse harness stdout/stderr into a [`TestResult`], applying the
/// three-tier fallback from spec §4.2 step 5, then the step-6 "non-zero
/// exit with zero parsed failures" override.
pub fn parse_harness_output(stdout: &str, stderr: &str, exit_success: bool) -> TestResult {
    let (passed, mut failed) = parse_summary_counts(stdout);

    let mut failure_details = parse_failed_error_lines(stdout);

    if failure_details.is_empty() && failed > 0 {
        failure_details = parse_traceback_sections(stdout);
    }

    if failure_details.is_empty() && failed > 0 {
        let combined = format!("{stdout}\n{stderr}");
        let tail = tail_chars(combined.trim(), 500);
        failure_details.push(Failure::new("(unparsed)", "Error", tail, ""));
    }

    if !exit_success && failure_details.is_empty() {
        let combined = format!("{stdout}\n{stderr}");
        let tail = tail_chars(combined.trim(), 500);
        failure_details.push(Failure::new("(execution)", "Error", tail, ""));
        if failed == 0 {
            failed = 1;
        }
    }

    if passed == 0 && failed == 0 && !failure_details.is_empty() {
        // Only synthetic (execution)/(unparsed) failures exist; count them.
        failed = failure_details.len();
    }

    let total = passed + failed;
    TestResult::new(total, passed, failed, failure_details)
}

fn parse_summary_counts(stdout: &str) -> (usize, usize) {
    if let Some(caps) = summary_re().captures(stdout) {
        let passed = caps.get(1).map(|m| m.as_str()).unwrap_or("0").parse().unwrap_or(0);
        let failed: usize = caps.get(2).map(|m| m.as_str()).unwrap_or("0").parse().unwrap_or(0);
        let errors: usize = caps.get(3).map(|m| m.as_str()).unwrap_or("0").parse().unwrap_or(0);
        (passed, failed + errors)
    } else {
        let failed: usize = failed_only_re()
            .captures(stdout)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let errors: usize = error_only_re()
            .captures(stdout)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        (0, failed + errors)
    }
}

fn parse_failed_error_lines(stdout: &str) -> Vec<Failure> {
    failed_line_re()
        .captures_iter(stdout)
        .map(|caps| {
            let test_name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let error_msg = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            let error_type = if error_msg.contains(':') {
                error_msg.split(':').next().unwrap_or("Error").to_string()
            } else {
                "Error".to_string()
            };
            Failure::new(test_name, error_type, error_msg, "")
        })
        .collect()
}

fn parse_traceback_sections(stdout: &str) -> Vec<Failure> {
    traceback_section_re()
        .captures_iter(stdout)
        .map(|caps| {
            let test_name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            let (error_type, error_message) = match error_type_re().captures(body) {
                Some(c) => (
                    c.get(1).map(|m| m.as_str().to_string()).unwrap_or_else(|| "Error".to_string()),
                    c.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
                ),
                None => ("Error".to_string(), tail_chars(body.trim(), 200)),
            };
            Failure::new(test_name, error_type, error_message, tail_chars(body.trim(), 500))
        })
        .collect()
}

fn tail_chars(s: &str, n: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= n {
        s.to_string()
    } else {
        chars[chars.len() - n..].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_pass_summary() {
        let stdout = "collected 3 items\n\n3 passed in 0.02s\n";
        let result = parse_harness_output(stdout, "", true);
        assert_eq!(result.total_tests, 3);
        assert_eq!(result.passed, 3);
        assert_eq!(result.failed, 0);
        assert!(result.all_passed);
    }

    #[test]
    fn parses_failed_and_error_lines() {
        let stdout = "2 passed, 2 failed in 0.10s\n\
            FAILED tests/test_a.py::test_one - AssertionError: expected 5 got 4\n\
            ERROR tests/test_b.py::test_two - ValueError: bad input\n";
        let result = parse_harness_output(stdout, "", false);
        assert_eq!(result.passed, 2);
        assert_eq!(result.failed, 2);
        assert_eq!(result.failure_details.len(), 2);
        assert_eq!(result.failure_details[0].error_type, "AssertionError");
        assert_eq!(result.failure_details[1].error_type, "ValueError");
    }

    #[test]
    fn falls_back_to_traceback_sections() {
        let stdout = "1 passed, 1 failed in 0.05s\n\
            _____ test_divide _____\n\
            some setup\n\
            ZeroDivisionError: division by zero\n\
            _____ end _____\n";
        let result = parse_harness_output(stdout, "", false);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failure_details.len(), 1);
        assert_eq!(result.failure_details[0].error_type, "ZeroDivisionError");
    }

    #[test]
    fn falls_back_to_unparsed_last_500_chars() {
        let stdout = "1 failed in 0.01s\nsomething went horribly wrong without a FAILED line";
        let result = parse_harness_output(stdout, "", false);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failure_details.len(), 1);
        assert_eq!(result.failure_details[0].test_name, "(unparsed)");
    }

    #[test]
    fn nonzero_exit_with_no_parsed_failures_synthesizes_execution_failure() {
        let stderr = "AssertionError: boom";
        let result = parse_harness_output("", stderr, false);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failure_details.len(), 1);
        assert_eq!(result.failure_details[0].test_name, "(execution)");
        assert!(!result.all_passed);
    }

    #[test]
    fn zero_exit_with_clean_summary_is_consistent() {
        let result = parse_harness_output("5 passed in 0.1s\n", "", true);
        assert!(result.is_consistent());
    }
}
