//! Wiring from [`AppConfig`] to live stores and an orchestrator.

use std::sync::Arc;

use chrono::Duration;
use qalam_config::{AppConfig, InstructionConfig};
use qalam_core::error::Result;
use qalam_core::event::EventBus;
use qalam_core::instruction::InstructionExtractor;
use qalam_memory::{
    CompactPolicy, InstructionStore, MergeTextPolicy, SimilarityScorer, SimilarityWeights,
    StoreSettings, TextNormalizer, create_backend,
};
use qalam_session::{SessionSettings, SessionStore};
use tracing::info;

use crate::orchestrator::Orchestrator;

/// Open the configured instruction store, loading any saved snapshot.
pub async fn open_instruction_store(config: &InstructionConfig) -> Result<InstructionStore> {
    let backend = create_backend(&config.backend, config.snapshot_path())?;
    let scorer = SimilarityScorer::new(
        TextNormalizer::default(),
        SimilarityWeights {
            sequence: config.sequence_weight,
            token: config.token_weight,
        },
    );
    let settings = StoreSettings {
        merge_threshold: config.merge_threshold,
        text_policy: config.text_policy.parse::<MergeTextPolicy>()?,
    };
    Ok(InstructionStore::open(backend, scorer, settings).await?)
}

/// Compaction thresholds from config.
pub fn compact_policy(config: &InstructionConfig) -> CompactPolicy {
    let days = i64::try_from(config.compact_max_idle_days).unwrap_or(i64::MAX);
    CompactPolicy {
        min_usage: config.compact_min_usage,
        max_idle: Duration::try_days(days).unwrap_or(Duration::MAX),
    }
}

/// Build stores and an orchestrator from a loaded config.
pub async fn build_from_config(
    config: &AppConfig,
    extractor: Arc<dyn InstructionExtractor>,
    events: Arc<EventBus>,
) -> Result<Orchestrator> {
    let instructions = open_instruction_store(&config.instructions)
        .await?
        .with_events(events.clone());
    let sessions = SessionStore::new(SessionSettings::from(&config.sessions)).with_events(events.clone());

    info!(
        backend = %config.instructions.backend,
        extractor = extractor.name(),
        max_sessions = config.sessions.max_sessions,
        "Runtime assembled"
    );

    Ok(Orchestrator::new(Arc::new(sessions), Arc::new(instructions), extractor)
        .with_extraction_timeout(config.extraction.timeout())
        .with_extraction_enabled(config.extraction.enabled)
        .with_context_messages(config.extraction.context_messages)
        .with_events(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyword::KeywordExtractor;
    use qalam_core::message::Role;

    fn memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.instructions.backend = "memory".into();
        config
    }

    #[tokio::test]
    async fn builds_a_working_orchestrator() {
        let orch = build_from_config(
            &memory_config(),
            Arc::new(KeywordExtractor::new()),
            Arc::new(EventBus::default()),
        )
        .await
        .unwrap();

        let id = orch.create_session(None).unwrap();
        let (_, handle) = orch
            .handle_message_and_wait(&id, Role::User, "keep it brief")
            .unwrap();
        handle.unwrap().await.unwrap();
        assert_eq!(orch.instructions().list_active(None).await.len(), 1);
    }

    #[tokio::test]
    async fn file_backend_uses_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.instructions.path = Some(dir.path().join("learned.json"));

        let store = open_instruction_store(&config.instructions).await.unwrap();
        store
            .upsert(qalam_core::instruction::Category::Tone, "be polite")
            .await
            .unwrap();
        assert!(dir.path().join("learned.json").exists());
    }

    #[tokio::test]
    async fn bad_text_policy_is_rejected() {
        let mut config = memory_config();
        config.instructions.text_policy = "prefer_shorter".into();
        assert!(open_instruction_store(&config.instructions).await.is_err());
    }

    #[test]
    fn compact_policy_reads_config() {
        let policy = compact_policy(&InstructionConfig::default());
        assert_eq!(policy.min_usage, 2);
        assert_eq!(policy.max_idle, Duration::days(90));
    }
}
