//! Message handling with background instruction learning.
//!
//! `handle_message` appends to the session synchronously and returns. For
//! user messages it then spawns an extraction task: the extractor gets a
//! bounded amount of time, and whatever it yields is upserted into the
//! instruction store. Nothing on that path reaches the caller; failures are
//! logged and published as `ExtractionFailed`.

use std::sync::Arc;
use std::time::Duration;

use qalam_core::clock::Clock;
use qalam_core::error::{Error, ExtractionError, SessionError};
use qalam_core::event::{DomainEvent, EventBus};
use qalam_core::instruction::{Category, InstructionExtractor, InstructionRecord};
use qalam_core::message::{Role, SessionId};
use qalam_core::session::Session;
use qalam_memory::InstructionStore;
use qalam_session::SessionStore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default extraction budget.
pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    instructions: Arc<InstructionStore>,
    extractor: Arc<dyn InstructionExtractor>,

    /// Abandon extraction after this long
    extraction_timeout: Duration,

    extraction_enabled: bool,

    /// Prior messages passed to the extractor as context
    context_messages: usize,

    event_bus: Option<Arc<EventBus>>,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        instructions: Arc<InstructionStore>,
        extractor: Arc<dyn InstructionExtractor>,
    ) -> Self {
        Self {
            sessions,
            instructions,
            extractor,
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
            extraction_enabled: true,
            context_messages: 4,
            event_bus: None,
        }
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn with_extraction_enabled(mut self, enabled: bool) -> Self {
        self.extraction_enabled = enabled;
        self
    }

    pub fn with_context_messages(mut self, n: usize) -> Self {
        self.context_messages = n;
        self
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn instructions(&self) -> &Arc<InstructionStore> {
        &self.instructions
    }

    pub fn create_session(&self, context: Option<String>) -> Result<SessionId, SessionError> {
        self.sessions.create(context)
    }

    /// Append a message and kick off background learning. Returns as soon
    /// as the append is done.
    pub fn handle_message(
        &self,
        session_id: &SessionId,
        role: Role,
        content: &str,
    ) -> Result<Session, SessionError> {
        let (session, _learning) = self.handle_message_and_wait(session_id, role, content)?;
        Ok(session)
    }

    /// Like [`handle_message`](Self::handle_message), but also hands back the
    /// learning task, if one was started, so the caller can await it.
    pub fn handle_message_and_wait(
        &self,
        session_id: &SessionId,
        role: Role,
        content: &str,
    ) -> Result<(Session, Option<JoinHandle<()>>), SessionError> {
        let session = self.sessions.append_message(session_id, role, content)?;

        if role != Role::User || !self.extraction_enabled {
            return Ok((session, None));
        }

        let job = LearningJob {
            session_id: session_id.clone(),
            message: content.trim().to_string(),
            context: self.conversation_context(&session),
            extractor: self.extractor.clone(),
            instructions: self.instructions.clone(),
            timeout: self.extraction_timeout,
        };
        let events = self.event_bus.clone();
        let clock = self.sessions.clock().clone();
        let handle = tokio::spawn(async move {
            let session_id = job.session_id.clone();
            match job.run().await {
                Ok(Some(record)) => {
                    info!(
                        session_id = %session_id,
                        record_id = %record.id,
                        category = %record.category,
                        usage_count = record.usage_count,
                        "Instruction learned"
                    );
                }
                Ok(None) => debug!(session_id = %session_id, "No instruction in message"),
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Instruction extraction failed");
                    if let Some(bus) = events {
                        bus.publish(DomainEvent::ExtractionFailed {
                            session_id: session_id.to_string(),
                            error_message: e.to_string(),
                            timestamp: clock.now(),
                        });
                    }
                }
            }
        });

        Ok((session, Some(handle)))
    }

    /// Record a new draft of the letter.
    pub fn record_revision(&self, session_id: &SessionId, content: &str) -> Result<u64, SessionError> {
        self.sessions.append_revision(session_id, content)
    }

    /// Learned preferences, ready to splice into a generation prompt.
    pub async fn prompt_block(&self, max_items: usize) -> String {
        self.instructions.format_for_prompt(max_items).await
    }

    /// Session context followed by the messages before the newest one.
    fn conversation_context(&self, session: &Session) -> String {
        let mut lines: Vec<String> = Vec::new();
        if let Some(context) = &session.context {
            lines.push(context.clone());
        }

        let recent: Vec<_> = session.recent_messages(self.context_messages + 1).collect();
        let prior = recent.len().saturating_sub(1);
        for message in &recent[..prior] {
            lines.push(format!("{}: {}", message.role, message.content));
        }
        lines.join("\n")
    }
}

/// Everything the background task needs, owned.
struct LearningJob {
    session_id: SessionId,
    message: String,
    context: String,
    extractor: Arc<dyn InstructionExtractor>,
    instructions: Arc<InstructionStore>,
    timeout: Duration,
}

impl LearningJob {
    async fn run(self) -> Result<Option<InstructionRecord>, Error> {
        let extracted = tokio::time::timeout(
            self.timeout,
            self.extractor.extract(&self.message, &self.context),
        )
        .await
        .map_err(|_| ExtractionError::Timeout {
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        })??;

        let Some(extracted) = extracted else {
            return Ok(None);
        };
        debug!(
            session_id = %self.session_id,
            extractor = self.extractor.name(),
            category = %extracted.category,
            "Extractor yielded an instruction"
        );

        let category: Category = extracted
            .category
            .parse()
            .map_err(|_| ExtractionError::InvalidCategory(extracted.category.clone()))?;
        let record = self.instructions.upsert(category, &extracted.text).await?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use qalam_core::clock::ManualClock;
    use qalam_core::instruction::ExtractedInstruction;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns scripted results in order, then `None`.
    struct ScriptedExtractor {
        script: Mutex<Vec<Result<Option<ExtractedInstruction>, ExtractionError>>>,
        calls: AtomicUsize,
        seen_context: Mutex<Vec<String>>,
    }

    impl ScriptedExtractor {
        fn new(mut script: Vec<Result<Option<ExtractedInstruction>, ExtractionError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
                seen_context: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InstructionExtractor for ScriptedExtractor {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn extract(
            &self,
            _message_text: &str,
            conversation_context: &str,
        ) -> Result<Option<ExtractedInstruction>, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_context
                .lock()
                .unwrap()
                .push(conversation_context.to_string());
            self.script.lock().unwrap().pop().unwrap_or(Ok(None))
        }
    }

    struct SlowExtractor;

    #[async_trait]
    impl InstructionExtractor for SlowExtractor {
        fn name(&self) -> &str {
            "slow"
        }

        async fn extract(
            &self,
            message_text: &str,
            _conversation_context: &str,
        ) -> Result<Option<ExtractedInstruction>, ExtractionError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(ExtractedInstruction::new("style", message_text)))
        }
    }

    fn orchestrator(extractor: Arc<dyn InstructionExtractor>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(SessionStore::default()),
            Arc::new(InstructionStore::in_memory()),
            extractor,
        )
    }

    #[tokio::test]
    async fn learned_instruction_lands_in_store() {
        let extractor = Arc::new(ScriptedExtractor::new(vec![Ok(Some(
            ExtractedInstruction::new("style", "make it shorter"),
        ))]));
        let orch = orchestrator(extractor);
        let id = orch.create_session(None).unwrap();

        let (session, handle) = orch
            .handle_message_and_wait(&id, Role::User, "please make it shorter")
            .unwrap();
        assert_eq!(session.messages.len(), 1);
        handle.unwrap().await.unwrap();

        let active = orch.instructions().list_active(Some(Category::Style)).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].raw_text, "make it shorter");
    }

    #[tokio::test]
    async fn assistant_messages_are_not_analyzed() {
        let extractor = Arc::new(ScriptedExtractor::new(vec![]));
        let orch = orchestrator(extractor.clone());
        let id = orch.create_session(None).unwrap();

        let (_, handle) = orch
            .handle_message_and_wait(&id, Role::Assistant, "Here is a shorter draft.")
            .unwrap();
        assert!(handle.is_none());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_extraction_only_appends() {
        let extractor = Arc::new(ScriptedExtractor::new(vec![]));
        let orch = orchestrator(extractor.clone()).with_extraction_enabled(false);
        let id = orch.create_session(None).unwrap();

        let session = orch.handle_message(&id, Role::User, "make it shorter").unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_extractor_is_abandoned() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let orch = orchestrator(Arc::new(SlowExtractor))
            .with_extraction_timeout(Duration::from_secs(2))
            .with_events(bus);
        let id = orch.create_session(None).unwrap();

        let (_, handle) = orch
            .handle_message_and_wait(&id, Role::User, "make it shorter")
            .unwrap();
        handle.unwrap().await.unwrap();

        assert!(orch.instructions().list_active(None).await.is_empty());
        let event = rx.recv().await.unwrap();
        match &*event {
            DomainEvent::ExtractionFailed { error_message, .. } => {
                assert!(error_message.contains("2000ms"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_events_use_the_session_clock() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let extractor = Arc::new(ScriptedExtractor::new(vec![Err(ExtractionError::Failed(
            "model unavailable".into(),
        ))]));
        let orch = Orchestrator::new(
            Arc::new(SessionStore::default().with_clock(clock.clone())),
            Arc::new(InstructionStore::in_memory()),
            extractor,
        )
        .with_events(bus);
        let id = orch.create_session(None).unwrap();
        clock.advance(chrono::Duration::seconds(30));

        let (_, handle) = orch
            .handle_message_and_wait(&id, Role::User, "make it shorter")
            .unwrap();
        handle.unwrap().await.unwrap();

        match &*rx.recv().await.unwrap() {
            DomainEvent::ExtractionFailed { timestamp, .. } => {
                assert_eq!(*timestamp, clock.now());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn extraction_failures_never_reach_the_caller() {
        let extractor = Arc::new(ScriptedExtractor::new(vec![
            Err(ExtractionError::Failed("model unavailable".into())),
            Ok(Some(ExtractedInstruction::new("poetry", "rhyme everything"))),
        ]));
        let orch = orchestrator(extractor);
        let id = orch.create_session(None).unwrap();

        for text in ["make it shorter", "rhyme everything"] {
            let (session, handle) = orch.handle_message_and_wait(&id, Role::User, text).unwrap();
            assert_eq!(session.messages.back().unwrap().content, text);
            handle.unwrap().await.unwrap();
        }
        assert!(orch.instructions().list_active(None).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_session_fails_synchronously() {
        let orch = orchestrator(Arc::new(ScriptedExtractor::new(vec![])));
        let missing = SessionId::new();
        assert!(matches!(
            orch.handle_message(&missing, Role::User, "hello"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn extractor_sees_session_context_and_prior_messages() {
        let extractor = Arc::new(ScriptedExtractor::new(vec![]));
        let orch = orchestrator(extractor.clone()).with_context_messages(1);
        let id = orch
            .create_session(Some("Complaint to the water company".into()))
            .unwrap();

        orch.handle_message(&id, Role::User, "draft a complaint").unwrap();
        orch.handle_message(&id, Role::Assistant, "Dear Sir or Madam,").unwrap();
        let (_, handle) = orch
            .handle_message_and_wait(&id, Role::User, "make it shorter")
            .unwrap();
        handle.unwrap().await.unwrap();

        let seen = extractor.seen_context.lock().unwrap();
        assert!(
            seen.iter()
                .any(|c| c == "Complaint to the water company\nassistant: Dear Sir or Madam,"),
            "{seen:?}"
        );
    }

    #[tokio::test]
    async fn prompt_block_and_revisions_pass_through() {
        let extractor = Arc::new(ScriptedExtractor::new(vec![Ok(Some(
            ExtractedInstruction::new("tone", "be warm but formal"),
        ))]));
        let orch = orchestrator(extractor);
        let id = orch.create_session(None).unwrap();

        assert_eq!(orch.record_revision(&id, "Dear Ms. Haddad,").unwrap(), 1);
        let (_, handle) = orch
            .handle_message_and_wait(&id, Role::User, "be warm but formal")
            .unwrap();
        handle.unwrap().await.unwrap();

        let block = orch.prompt_block(5).await;
        assert!(block.contains("### tone\n- be warm but formal"));
    }
}
