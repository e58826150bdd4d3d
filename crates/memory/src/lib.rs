//! Instruction memory for Qalam: normalization, similarity scoring and the
//! deduplicating instruction store with its persistence backends.

pub mod file_backend;
pub mod in_memory;
pub mod noop;
pub mod normalize;
pub mod similarity;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

use qalam_core::error::InstructionError;
use qalam_core::instruction::InstructionBackend;

pub use file_backend::FileBackend;
pub use in_memory::InMemoryBackend;
pub use noop::NoopBackend;
pub use normalize::{CanonicalRule, TextNormalizer, normalize};
pub use similarity::{
    DEFAULT_MERGE_THRESHOLD, SimilarityScorer, SimilarityWeights, sequence_ratio, token_overlap,
};
pub use store::{CategoryStats, CompactPolicy, InstructionStore, MergeTextPolicy, StoreSettings};

/// Build a backend from its configured name (`file`, `memory` or `none`).
pub fn create_backend(
    kind: &str,
    path: PathBuf,
) -> Result<Arc<dyn InstructionBackend>, InstructionError> {
    match kind {
        "file" => Ok(Arc::new(FileBackend::new(path))),
        "memory" | "in_memory" => Ok(Arc::new(InMemoryBackend::new())),
        "none" => Ok(Arc::new(NoopBackend)),
        other => Err(InstructionError::Validation(format!(
            "unknown instruction backend '{other}'"
        ))),
    }
}
