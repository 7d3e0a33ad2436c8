//! FileSet: the path-to-content mapping shipped between pipeline steps and
//! to disk (spec §3).
//!
//! A FileSet is produced by parsing an LM response for fenced code blocks.
//! The parser is a pure function over strings — spec §9 calls this out
//! explicitly as something that must be unit-testable independent of any LM.

use std::collections::BTreeMap;

/// An ordered mapping from relative path to file content.
///
/// Backed by a `BTreeMap` so iteration order is deterministic (by path);
/// spec §3 only requires an "ordered mapping", not insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    files: BTreeMap<String, String>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|s| s.as_str())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Insert a normalized path. Returns an error if the raw path fails
    /// normalization (absolute, or contains `..`).
    pub fn insert(&mut self, path: impl AsRef<str>, content: impl Into<String>) -> Result<(), String> {
        let normalized = normalize_path(path.as_ref())?;
        self.files.insert(normalized, content.into());
        Ok(())
    }

    /// Insert without validating — used internally once a path is already
    /// known-normalized (e.g. merge of two FileSets).
    fn insert_raw(&mut self, path: String, content: String) {
        self.files.insert(path, content);
    }

    /// Merge `other` into `self`; entries in `other` take precedence.
    /// Used by the adapt/refine "backfill missing files from the previous
    /// FileSet" rule (spec §4.1, §4.9).
    pub fn merge_preferring(base: &FileSet, overlay: &FileSet) -> FileSet {
        let mut merged = base.clone();
        for (path, content) in overlay.iter() {
            merged.insert_raw(path.to_string(), content.to_string());
        }
        merged
    }

    pub fn path_set(&self) -> std::collections::BTreeSet<String> {
        self.files.keys().cloned().collect()
    }

    /// Render back to the fenced-block wire format this FileSet was parsed
    /// from. `path_prefix` is the directory each first-line comment should
    /// declare the file under (`"src"` or `"tests"`).
    pub fn to_fenced_blocks(&self, path_prefix: &str) -> String {
        let mut out = String::new();
        for (path, content) in self.iter() {
            let declared = if path.starts_with(&format!("{path_prefix}/")) {
                path.to_string()
            } else {
                format!("{path_prefix}/{path}")
            };
            out.push_str("```\n");
            out.push_str("# ");
            out.push_str(&declared);
            out.push('\n');
            out.push_str(content);
            if !content.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("```\n\n");
        }
        out
    }
}

/// Normalize a relative path: forward slashes, no leading `/`, no `..`
/// components. Returns an error string describing the violation.
pub fn normalize_path(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim().replace('\\', "/");
    let trimmed = trimmed.trim_start_matches("./");
    if trimmed.is_empty() {
        return Err("empty path".to_string());
    }
    if trimmed.starts_with('/') {
        return Err(format!("absolute path not allowed: {raw}"));
    }
    if trimmed.split('/').any(|seg| seg == "..") {
        return Err(format!("path traversal not allowed: {raw}"));
    }
    Ok(trimmed.to_string())
}

/// Parse an LM response into a FileSet.
///
/// A fenced code block's relative path is taken from, in order of
/// preference:
/// 1. the fence info string, if it carries a `:<relpath>` suffix
///    (e.g. ` ```python:src/foo.py `)
/// 2. the first interior line, if it is a `# <relpath>` comment
///
/// Blocks matching neither get a `{fallback_prefix}_<N>` name, where N is
/// the 1-based index of the block in the response. Empty blocks are kept
/// (callers that want to drop them, e.g. the test generator, filter
/// afterward) unless `drop_empty` is set.
pub fn parse_fileset(response: &str, fallback_prefix: &str, drop_empty: bool) -> FileSet {
    let mut set = FileSet::new();
    let mut n = 0usize;
    for block in iter_fenced_blocks(response) {
        n += 1;
        let (declared_path, mut lines) = (block.info_path.clone(), block.lines.clone());

        let mut path = declared_path;
        if path.is_none() {
            if let Some(first) = lines.first() {
                if let Some(p) = first_line_path_comment(first) {
                    path = Some(p);
                    lines.remove(0);
                }
            }
        }

        let content = lines.join("\n");
        if drop_empty && content.trim().is_empty() {
            continue;
        }

        let raw_path = path.unwrap_or_else(|| format!("{fallback_prefix}_{n}"));
        let normalized = match normalize_path(&raw_path) {
            Ok(p) => p,
            Err(_) => format!("{fallback_prefix}_{n}"),
        };
        set.insert_raw(normalized, content);
    }
    set
}

struct FencedBlock {
    info_path: Option<String>,
    lines: Vec<String>,
}

fn iter_fenced_blocks(response: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut lines = response.lines().peekable();
    while let Some(line) = lines.next() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("```") {
            let info_path = info_string_path(rest.trim());
            let mut body = Vec::new();
            for inner in lines.by_ref() {
                if inner.trim_start().starts_with("```") {
                    break;
                }
                body.push(inner.to_string());
            }
            blocks.push(FencedBlock {
                info_path,
                lines: body,
            });
        }
    }
    blocks
}

/// `python:src/foo.py` -> Some("src/foo.py"); `python` -> None.
fn info_string_path(info: &str) -> Option<String> {
    let idx = info.find(':')?;
    let path = info[idx + 1..].trim();
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// `# src/foo.py` -> Some("src/foo.py").
fn first_line_path_comment(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix('#')?;
    let path = rest.trim();
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_line_comment() {
        let resp = "```\n# src/calc.py\ndef add(a, b):\n    return a + b\n```\n";
        let fs = parse_fileset(resp, "module", false);
        assert_eq!(fs.len(), 1);
        assert_eq!(fs.get("src/calc.py").unwrap().trim(), "def add(a, b):\n    return a + b");
    }

    #[test]
    fn parses_fence_info_path() {
        let resp = "```python:src/calc.py\ndef add(a, b):\n    return a + b\n```\n";
        let fs = parse_fileset(resp, "module", false);
        assert_eq!(fs.len(), 1);
        assert!(fs.get("src/calc.py").is_some());
    }

    #[test]
    fn falls_back_to_module_n() {
        let resp = "```\nprint('hi')\n```\n\n```\nprint('bye')\n```\n";
        let fs = parse_fileset(resp, "module", false);
        assert_eq!(fs.len(), 2);
        assert!(fs.get("module_1").is_some());
        assert!(fs.get("module_2").is_some());
    }

    #[test]
    fn rejects_path_traversal_with_fallback() {
        let resp = "```\n# ../../etc/passwd\nmalicious\n```\n";
        let fs = parse_fileset(resp, "module", false);
        assert_eq!(fs.len(), 1);
        assert!(fs.get("module_1").is_some());
        assert!(fs.get("../../etc/passwd").is_none());
    }

    #[test]
    fn preserves_duplicate_basenames_at_distinct_paths() {
        let mut fs = FileSet::new();
        fs.insert("src/a/util.py", "A").unwrap();
        fs.insert("src/b/util.py", "B").unwrap();
        assert_eq!(fs.len(), 2);
        assert_eq!(fs.get("src/a/util.py").unwrap(), "A");
        assert_eq!(fs.get("src/b/util.py").unwrap(), "B");
    }

    #[test]
    fn drops_empty_blocks_when_requested() {
        let resp = "```\n# tests/test_empty.py\n```\n\n```\n# tests/test_real.py\nassert True\n```\n";
        let fs = parse_fileset(resp, "test", true);
        assert_eq!(fs.len(), 1);
        assert!(fs.get("tests/test_real.py").is_some());
    }

    #[test]
    fn merge_preferring_overlay_backfills_missing() {
        let mut base = FileSet::new();
        base.insert("src/a.py", "old a").unwrap();
        base.insert("src/b.py", "old b").unwrap();
        let mut overlay = FileSet::new();
        overlay.insert("src/a.py", "new a").unwrap();
        let merged = FileSet::merge_preferring(&base, &overlay);
        assert_eq!(merged.get("src/a.py").unwrap(), "new a");
        assert_eq!(merged.get("src/b.py").unwrap(), "old b");
    }

    proptest::proptest! {
        #[test]
        fn roundtrip_preserves_content(name in "[a-z]{1,8}", body in "[a-zA-Z0-9 \n]{0,64}") {
            let mut fs = FileSet::new();
            let path = format!("src/{name}.py");
            fs.insert(&path, &body).unwrap();
            let rendered = fs.to_fenced_blocks("src");
            let parsed = parse_fileset(&rendered, "module", false);
            let got = parsed.get(&path).unwrap_or("");
            prop_assert_eq!(got.trim_end(), body.trim_end());
        }
    }
}
