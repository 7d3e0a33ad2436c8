//! Shared JSON-from-LM-response extraction, used by every agent phase that
//! expects a JSON object/array back (capability checker, and the test
//! designer's analyze/tool-selection/plan phases) rather than a FileSet.
//!
//! Grounded in `original_source/jelly/agents/capability_checker.py::_parse_json`
//! and `BaseAgent.extract_code_blocks`: try each fenced block in order, then
//! the whole trimmed response, and take the first successful parse.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").unwrap())
}

/// All fenced code block bodies in `response`, in order of appearance.
pub fn extract_fenced_blocks(response: &str) -> Vec<String> {
    fence_re()
        .captures_iter(response)
        .map(|c| c.get(1).map(|m| m.as_str().to_string()).unwrap_or_default())
        .collect()
}

/// Try to deserialize `T` from each fenced block, then from the whole
/// trimmed response. Returns `None` if nothing parses.
pub fn parse_json_response<T: DeserializeOwned>(response: &str) -> Option<T> {
    let mut candidates = extract_fenced_blocks(response);
    candidates.push(response.trim().to_string());
    for candidate in candidates {
        if let Ok(value) = serde_json::from_str(candidate.trim()) {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, PartialEq, Debug)]
    struct Sample {
        ok: bool,
    }

    #[test]
    fn parses_from_json_fence() {
        let response = "here you go\n```json\n{\"ok\": true}\n```\n";
        let parsed: Sample = parse_json_response(response).unwrap();
        assert!(parsed.ok);
    }

    #[test]
    fn parses_from_raw_response_when_no_fence() {
        let response = "  {\"ok\": false}  ";
        let parsed: Sample = parse_json_response(response).unwrap();
        assert!(!parsed.ok);
    }

    #[test]
    fn returns_none_on_garbage() {
        let parsed: Option<Sample> = parse_json_response("not json at all");
        assert!(parsed.is_none());
    }

    #[test]
    fn extracts_multiple_blocks_in_order() {
        let response = "```python\na = 1\n```\n```python\nb = 2\n```\n";
        let blocks = extract_fenced_blocks(response);
        assert_eq!(blocks, vec!["a = 1\n".to_string(), "b = 2\n".to_string()]);
    }
}
