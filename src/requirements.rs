//! Requirements document (spec §3, §6): opaque Markdown text. The only
//! structure the core interprets is fenced code blocks whose first line
//! looks like a function/method declaration — those become *signatures*,
//! opaque strings that guide the test designer. Everything else in the
//! document is untouched.

use regex::Regex;
use std::sync::OnceLock;

fn decl_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // Rust: `fn name(...)`, `pub fn name(...)`, `pub async fn name(...)`
            Regex::new(r"^\s*(pub(\(\w+\))?\s+)?(async\s+)?fn\s+\w+\s*\(").unwrap(),
            // Python: `def name(...):`
            Regex::new(r"^\s*(async\s+)?def\s+\w+\s*\(.*\)\s*:?\s*$").unwrap(),
            // JavaScript/TypeScript: `function name(...)`, `export function name(...)`
            Regex::new(r"^\s*(export\s+)?(async\s+)?function\s+\w+\s*\(").unwrap(),
            // Java/C#/C++ style: `[modifiers] ReturnType name(...)`
            Regex::new(r"^\s*(public|private|protected)\s+[\w<>\[\],\s]+\s+\w+\s*\(.*\)\s*\{?\s*$").unwrap(),
            // Go: `func name(...)`
            Regex::new(r"^\s*func\s+(\(\w+\s+\*?\w+\)\s+)?\w+\s*\(").unwrap(),
        ]
    })
}

/// A requirements document: opaque text plus extracted signatures.
#[derive(Debug, Clone)]
pub struct Requirements {
    text: String,
}

impl Requirements {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Extract zero or more function signatures from fenced code blocks in
    /// the requirements text. A signature is the trimmed text of the first
    /// line in a fenced block that matches a known function/method
    /// declaration pattern. Order of appearance is preserved; duplicates
    /// are kept (the test designer treats these as opaque hints, not a set).
    pub fn signatures(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut in_block = false;
        for line in self.text.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") {
                in_block = !in_block;
                continue;
            }
            if !in_block {
                continue;
            }
            if decl_patterns().iter().any(|re| re.is_match(line)) {
                out.push(line.trim().to_string());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_python_signature() {
        let req = Requirements::new("Implement this:\n```python\ndef add(a, b):\n    pass\n```\n");
        let sigs = req.signatures();
        assert_eq!(sigs, vec!["def add(a, b):".to_string()]);
    }

    #[test]
    fn extracts_rust_signature() {
        let req = Requirements::new("```rust\npub fn add(a: i32, b: i32) -> i32 {\n```\n");
        let sigs = req.signatures();
        assert_eq!(sigs.len(), 1);
        assert!(sigs[0].starts_with("pub fn add"));
    }

    #[test]
    fn ignores_prose_outside_fences() {
        let req = Requirements::new("def add(a, b): this is prose, not a fence\n");
        assert!(req.signatures().is_empty());
    }

    #[test]
    fn ignores_non_declaration_lines_in_fences() {
        let req = Requirements::new("```\nsome example output\n42\n```\n");
        assert!(req.signatures().is_empty());
    }

    #[test]
    fn extracts_multiple_signatures_in_order() {
        let req = Requirements::new(
            "```python\ndef add(a, b):\n    pass\n```\nMore text.\n```python\ndef sub(a, b):\n    pass\n```\n",
        );
        let sigs = req.signatures();
        assert_eq!(sigs.len(), 2);
        assert!(sigs[0].contains("add"));
        assert!(sigs[1].contains("sub"));
    }
}
