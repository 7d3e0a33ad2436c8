//! Capability checker agent (spec §4.6, §4.9): asks the LM whether the
//! current setup can likely deliver the requirements, given deterministic
//! preflight results and MCP baseline status.
//!
//! Grounded in `original_source/jelly/agents/capability_checker.py`'s
//! `CapabilityChecker.check()`/`_parse()` — prompt assembly from
//! requirements + preflight + tool + MCP + depth context, JSON-in-fence
//! response, and normalization delegated to
//! [`crate::capability::LlmCapabilityAssessment::normalize`].

use crate::capability::{LlmCapabilityAssessment, PreflightCheck};
use crate::config::Config;
use crate::lm_client::LmClient;
use crate::log_sink::LogSink;
use serde_json::{json, Value};

const SYSTEM_PROMPT: &str = "\
You are a Capability Checker for Builder, an automated build-and-test system.

You must decide whether the CURRENT builder setup can likely produce and verify
a working solution for the provided requirements.

Assess based on:
- deterministic preflight checks
- available tools and environment
- MCP baseline diagnostics
- recursion depth context
- repository context

Return ONLY JSON inside a code block with this schema:
```json
{
  \"capable\": true,
  \"confidence\": 0.0,
  \"reasons\": [\"...\"],
  \"missing_capabilities\": [\"...\"],
  \"recommended_child_requirements\": \"...\"
}
```

Rules:
- confidence is a float in [0, 1].
- If you are uncertain, lower confidence.
- Keep reasons and missing_capabilities concise and concrete.
- recommended_child_requirements should be empty if capable is true.
";

pub struct CapabilityChecker<'a> {
    lm: LmClient,
    max_tokens: u32,
    log: &'a LogSink,
}

impl<'a> CapabilityChecker<'a> {
    pub fn new(config: &Config, log: &'a LogSink) -> Self {
        Self {
            lm: LmClient::new(&config.lm, log),
            max_tokens: config.lm.test_designer_max_tokens,
            log,
        }
    }

    pub async fn check(
        &self,
        requirements: &str,
        preflight_checks: &[PreflightCheck],
        mcp_baseline_status: &Value,
        depth: u32,
    ) -> LlmCapabilityAssessment {
        let prompt = format!(
            "## Requirements\n\n{requirements}\n\n## Deterministic preflight checks\n\n{}\n\n## MCP baseline status\n\n{}\n\n## Recursion depth\n\n{depth}\n",
            serde_json::to_string_pretty(preflight_checks).unwrap_or_default(),
            serde_json::to_string_pretty(mcp_baseline_status).unwrap_or_default(),
        );

        match self.lm.complete(SYSTEM_PROMPT, &prompt, self.max_tokens).await {
            Ok(response) => self.parse(&response),
            Err(e) => {
                self.log.event(
                    crate::log_sink::Level::Warning,
                    "capability_checker",
                    "check.lm_call_failed",
                    vec![("error".into(), json!(e.to_string()))],
                );
                LlmCapabilityAssessment::unavailable()
            }
        }
    }

    fn parse(&self, response: &str) -> LlmCapabilityAssessment {
        match super::json_extract::parse_json_response::<Value>(response) {
            Some(raw) => match serde_json::from_value::<LlmCapabilityAssessment>(raw.clone()) {
                Ok(assessment) => assessment.normalize(&raw),
                Err(_) => LlmCapabilityAssessment::unavailable(),
            },
            None => LlmCapabilityAssessment::unavailable(),
        }
    }
}
