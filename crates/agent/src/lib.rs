//! Conversation orchestration for Qalam.
//!
//! The [`Orchestrator`] ties the session store to the instruction store:
//! every message is appended synchronously, and user messages are handed to
//! an [`InstructionExtractor`](qalam_core::InstructionExtractor) in the
//! background so that recurring preferences are learned without slowing
//! down the conversation.

pub mod keyword;
pub mod orchestrator;
pub mod runtime;

pub use keyword::KeywordExtractor;
pub use orchestrator::{DEFAULT_EXTRACTION_TIMEOUT, Orchestrator};
pub use runtime::{build_from_config, compact_policy, open_instruction_store};
