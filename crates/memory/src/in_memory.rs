//! In-memory backend, useful for testing and ephemeral runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use qalam_core::error::StorageError;
use qalam_core::instruction::{InstructionBackend, InstructionRecord};
use tokio::sync::RwLock;

/// Keeps the last saved snapshot in a Vec.
#[derive(Default)]
pub struct InMemoryBackend {
    records: Arc<RwLock<Vec<InstructionRecord>>>,
    saves: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a pre-seeded snapshot.
    pub fn with_records(records: Vec<InstructionRecord>) -> Self {
        Self {
            records: Arc::new(RwLock::new(records)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstructionBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self) -> Result<Vec<InstructionRecord>, StorageError> {
        Ok(self.records.read().await.clone())
    }

    async fn save(&self, records: &[InstructionRecord]) -> Result<(), StorageError> {
        *self.records.write().await = records.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qalam_core::instruction::Category;

    fn record(id: &str) -> InstructionRecord {
        InstructionRecord {
            id: id.into(),
            raw_text: "make it shorter".into(),
            normalized_text: "make it shorter".into(),
            category: Category::Style,
            usage_count: 1,
            created_at: Utc::now(),
            last_used_at: Utc::now(),
            active: true,
        }
    }

    #[tokio::test]
    async fn save_replaces_snapshot() {
        let mem = InMemoryBackend::with_records(vec![record("a"), record("b")]);
        assert_eq!(mem.load().await.unwrap().len(), 2);

        mem.save(&[record("c")]).await.unwrap();
        let loaded = mem.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "c");
        assert_eq!(mem.save_count(), 1);
    }

    #[tokio::test]
    async fn starts_empty() {
        let mem = InMemoryBackend::new();
        assert!(mem.load().await.unwrap().is_empty());
        assert_eq!(mem.save_count(), 0);
    }
}
