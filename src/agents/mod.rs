//! LM-backed agents (spec §4.9): thin, stateless wrappers around
//! [`crate::lm_client::LmClient`] that each own one prompt contract and
//! one response-parsing/normalization policy.

pub mod capability_checker;
pub mod code_generator;
pub mod json_extract;
pub mod test_designer;

pub use capability_checker::CapabilityChecker;
pub use code_generator::CodeGenerator;
pub use test_designer::{AnalysisResult, TestCategory, TestDesignResult, TestDesigner, TestingNeed};
