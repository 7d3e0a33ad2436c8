//! Code generator agent (spec §4.9's "Code generator"): produces and
//! refines the implementation FileSet.
//!
//! Grounded in `original_source/jelly/agents/programmer.py`'s `Programmer`:
//! Chain-of-Thought generate prompt, retry-once-on-zero-blocks parse
//! policy, and a refine prompt that backfills any file missing from the
//! refinement response from the previous FileSet (here expressed as
//! [`FileSet::merge_preferring`] rather than Python dict-update, since a
//! FileSet's normalized-path invariants must still hold after the merge).

use crate::config::Config;
use crate::fileset::{parse_fileset, FileSet};
use crate::lm_client::LmClient;
use crate::log_sink::{Level, LogSink};
use serde_json::json;

const GENERATE_SYSTEM_PROMPT: &str = "\
You are a Programmer. You implement the requirements exactly as specified, with \
no extra features and no missing ones.

Think step by step about the data structures and algorithm before writing code, \
then output the implementation.

Output each file in a separate fenced code block with a `# src/<relpath>` comment \
on the first line. Do not include any file outside `src/`.
";

const RETRY_SYSTEM_PROMPT_SUFFIX: &str = "\

IMPORTANT: your previous response contained no fenced code blocks. You MUST \
respond with at least one ```-fenced code block, each beginning with a \
`# src/<relpath>` comment line.
";

const REFINE_SYSTEM_PROMPT: &str = "\
You are a Programmer fixing a failing implementation. You are given the \
requirements, the current code, and feedback describing test failures.

Output only the files that need to change, each in its own fenced code block \
with a `# src/<relpath>` comment on the first line. Files you do not include \
are assumed unchanged.
";

pub struct CodeGenerator<'a> {
    lm: LmClient,
    max_tokens: u32,
    log: &'a LogSink,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(config: &Config, log: &'a LogSink) -> Self {
        Self {
            lm: LmClient::new(&config.lm, log),
            max_tokens: config.lm.programmer_max_tokens,
            log,
        }
    }

    /// Generate the initial implementation from requirements alone.
    pub async fn generate(&self, requirements: &str) -> FileSet {
        let prompt = format!("## Requirements\n\n{requirements}\n");

        let response = match self.lm.complete(GENERATE_SYSTEM_PROMPT, &prompt, self.max_tokens).await {
            Ok(r) => r,
            Err(e) => {
                self.log.event(Level::Error, "code_generator", "generate.lm_call_failed", vec![("error".into(), json!(e.to_string()))]);
                return FileSet::new();
            }
        };

        let files = parse_fileset(&response, "src/module", false);
        if !files.is_empty() {
            return files;
        }

        self.log.event(Level::Warning, "code_generator", "generate.zero_blocks_retrying", vec![]);
        let retry_system = format!("{GENERATE_SYSTEM_PROMPT}{RETRY_SYSTEM_PROMPT_SUFFIX}");
        match self.lm.complete(&retry_system, &prompt, self.max_tokens).await {
            Ok(response) => parse_fileset(&response, "src/module", false),
            Err(e) => {
                self.log.event(Level::Error, "code_generator", "generate.retry_failed", vec![("error".into(), json!(e.to_string()))]);
                FileSet::new()
            }
        }
    }

    /// Refine the implementation given prior code and failure feedback.
    /// Any file not present in the response is backfilled from
    /// `previous_code` (spec §4.9's "missing files... backfilled").
    pub async fn refine(&self, requirements: &str, previous_code: &FileSet, feedback: &str, iteration: u32) -> FileSet {
        let prompt = format!(
            "## Requirements\n\n{requirements}\n\n## Current Code\n\n{}\n## Test Failure Feedback (iteration {iteration})\n\n{feedback}\n",
            previous_code.to_fenced_blocks("src"),
        );

        let response = match self.lm.complete(REFINE_SYSTEM_PROMPT, &prompt, self.max_tokens).await {
            Ok(r) => r,
            Err(e) => {
                self.log.event(Level::Error, "code_generator", "refine.lm_call_failed", vec![("error".into(), json!(e.to_string()))]);
                return previous_code.clone();
            }
        };

        let overlay = parse_fileset(&response, "src/module", false);
        FileSet::merge_preferring(previous_code, &overlay)
    }
}
