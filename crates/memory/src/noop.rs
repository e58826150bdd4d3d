//! No-op backend: disables instruction persistence entirely.

use async_trait::async_trait;
use qalam_core::error::StorageError;
use qalam_core::instruction::{InstructionBackend, InstructionRecord};

/// Loads nothing and discards every save.
pub struct NoopBackend;

#[async_trait]
impl InstructionBackend for NoopBackend {
    fn name(&self) -> &str {
        "none"
    }

    async fn load(&self) -> Result<Vec<InstructionRecord>, StorageError> {
        Ok(Vec::new())
    }

    async fn save(&self, _records: &[InstructionRecord]) -> Result<(), StorageError> {
        Ok(())
    }
}
