//! Error kinds for the Builder pipeline.
//!
//! These are the error *kinds* from spec §7, not a type per failure site:
//! transport, protocol, configuration, parse, execution, capability, and
//! install/launch failures. Most of the pipeline degrades these to a
//! synthetic [`crate::test_result::Failure`] rather than propagating them
//! (see §7's propagation policy) — this enum exists for the few call sites
//! that must actually abort (LM call exhaustion, child delegation guards).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("MCP protocol error (code {code}): {message}")]
    Protocol { code: i64, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to parse LM response: {0}")]
    Parse(String),

    #[error("sandbox execution error: {0}")]
    Execution(String),

    #[error("capability gate: {0}")]
    Capability(String),

    #[error("sidecar install/launch error: {0}")]
    InstallLaunch(String),

    #[error("pregnancy delegation stopped: maximum depth reached (depth={depth}, max_depth={max_depth})")]
    PregnancyDepthExceeded { depth: u32, max_depth: u32 },

    #[error("pregnancy delegation stopped: repeated capability signature '{0}' detected")]
    RepeatedCapabilitySignature(String),

    #[error("child builder timed out after {0}s")]
    PregnancyTimeout(u64),

    #[error("child builder exited with code {code}")]
    ChildBuilderFailed { code: i32 },
}
