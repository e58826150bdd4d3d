//! Deduplicated instruction store.
//!
//! Records live in one partition per [`Category`], each behind its own
//! async mutex: merge-or-create is a check-then-act sequence, so upserts
//! into the same category serialize while different categories proceed in
//! parallel. Every mutation is followed by a snapshot write through the
//! injected [`InstructionBackend`].
//!
//! Within a category no two active records score at or above the merge
//! threshold against each other. `upsert` maintains this on insert;
//! `optimize` restores it after threshold or rule-table changes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use qalam_core::clock::{Clock, SystemClock};
use qalam_core::error::InstructionError;
use qalam_core::event::{DomainEvent, EventBus};
use qalam_core::instruction::{Category, InstructionBackend, InstructionRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::noop::NoopBackend;
use crate::similarity::{DEFAULT_MERGE_THRESHOLD, SimilarityScorer, TIE_EPSILON};

/// Which text a merged record keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeTextPolicy {
    /// Take the incoming text when its normalized form is strictly longer.
    /// Applies on every merge, whatever the score, not only between
    /// near-tied candidates.
    #[default]
    PreferLonger,
    /// Never replace the established text
    KeepExisting,
    /// Always take the incoming text
    PreferNewest,
}

impl std::str::FromStr for MergeTextPolicy {
    type Err = InstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "prefer_longer" => Ok(Self::PreferLonger),
            "keep_existing" => Ok(Self::KeepExisting),
            "prefer_newest" => Ok(Self::PreferNewest),
            other => Err(InstructionError::Validation(format!(
                "unknown text policy '{other}'"
            ))),
        }
    }
}

/// Tunables for merge decisions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreSettings {
    pub merge_threshold: f64,
    pub text_policy: MergeTextPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            text_policy: MergeTextPolicy::default(),
        }
    }
}

/// Which records `compact` removes besides soft-deleted ones.
#[derive(Debug, Clone, Copy)]
pub struct CompactPolicy {
    /// Records used fewer times than this...
    pub min_usage: u64,
    /// ...and idle for longer than this are dropped
    pub max_idle: Duration,
}

/// Per-category counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub category: Category,
    pub active: usize,
    pub inactive: usize,
    pub total_usage: u64,
}

/// The instruction knowledge base.
pub struct InstructionStore {
    /// Indexed by `Category as usize`; records in creation order
    partitions: [Mutex<Vec<InstructionRecord>>; Category::ALL.len()],
    scorer: SimilarityScorer,
    settings: StoreSettings,
    backend: Arc<dyn InstructionBackend>,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventBus>>,
    /// Serializes snapshot writes so the last write is the freshest
    persist_lock: Mutex<()>,
}

impl InstructionStore {
    /// An empty store writing through `backend`.
    pub fn new(
        backend: Arc<dyn InstructionBackend>,
        scorer: SimilarityScorer,
        settings: StoreSettings,
    ) -> Self {
        Self {
            partitions: std::array::from_fn(|_| Mutex::new(Vec::new())),
            scorer,
            settings,
            backend,
            clock: Arc::new(SystemClock),
            events: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// An empty, non-persistent store with default scoring.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(NoopBackend),
            SimilarityScorer::default(),
            StoreSettings::default(),
        )
    }

    /// Load the backend's snapshot into a new store.
    pub async fn open(
        backend: Arc<dyn InstructionBackend>,
        scorer: SimilarityScorer,
        settings: StoreSettings,
    ) -> Result<Self, InstructionError> {
        let mut records = backend.load().await?;
        records.sort_by_key(|r| r.created_at);
        let count = records.len();

        let mut store = Self::new(backend, scorer, settings);
        for record in records {
            store.partitions[record.category as usize]
                .get_mut()
                .push(record);
        }
        info!(backend = store.backend.name(), count, "Instruction store loaded");
        Ok(store)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> StoreSettings {
        self.settings
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    fn partition(&self, category: Category) -> &Mutex<Vec<InstructionRecord>> {
        &self.partitions[category as usize]
    }

    /// Insert `raw_text` into `category`, merging into the closest existing
    /// active record when it scores at or above the merge threshold.
    pub async fn upsert(
        &self,
        category: Category,
        raw_text: &str,
    ) -> Result<InstructionRecord, InstructionError> {
        let raw = raw_text.trim();
        if raw.is_empty() {
            return Err(InstructionError::Validation(
                "instruction text is empty".into(),
            ));
        }
        let normalized = self.scorer.normalizer().normalize(raw);
        if normalized.is_empty() {
            return Err(InstructionError::Validation(format!(
                "instruction text '{raw}' has no comparable content"
            )));
        }

        let now = self.clock.now();
        let (record, merged) = {
            let mut records = self.partition(category).lock().await;
            match self.best_match(&records, &normalized, None) {
                Some((idx, score)) if score >= self.settings.merge_threshold => {
                    let replace = self.should_replace_text(&records, idx, &normalized);
                    let existing = &mut records[idx];
                    existing.usage_count += 1;
                    existing.last_used_at = now;
                    if replace {
                        existing.raw_text = raw.to_string();
                        existing.normalized_text = normalized;
                    }
                    debug!(
                        record_id = %existing.id,
                        category = %category,
                        score,
                        usage_count = existing.usage_count,
                        replaced_text = replace,
                        "Merged instruction into existing record"
                    );
                    (existing.clone(), true)
                }
                _ => {
                    let record = InstructionRecord {
                        id: Uuid::new_v4().to_string(),
                        raw_text: raw.to_string(),
                        normalized_text: normalized,
                        category,
                        usage_count: 1,
                        created_at: now,
                        last_used_at: now,
                        active: true,
                    };
                    debug!(record_id = %record.id, category = %category, "Created instruction record");
                    records.push(record.clone());
                    (record, false)
                }
            }
        };

        if let Some(events) = &self.events {
            events.publish(DomainEvent::InstructionLearned {
                record_id: record.id.clone(),
                category: category.to_string(),
                merged,
                usage_count: record.usage_count,
                timestamp: now,
            });
        }
        self.persist().await;
        Ok(record)
    }

    /// [`upsert`](Self::upsert) with a category tag that still needs parsing.
    pub async fn upsert_str(
        &self,
        category: &str,
        raw_text: &str,
    ) -> Result<InstructionRecord, InstructionError> {
        let category: Category = category.parse()?;
        self.upsert(category, raw_text).await
    }

    /// Highest-scoring active record. Ties within [`TIE_EPSILON`] go to the
    /// higher usage count, then to the earliest created.
    fn best_match(
        &self,
        records: &[InstructionRecord],
        normalized: &str,
        exclude: Option<usize>,
    ) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, record) in records.iter().enumerate() {
            if !record.active || Some(idx) == exclude {
                continue;
            }
            let score = self
                .scorer
                .score_normalized(normalized, &record.normalized_text);
            let better = match best {
                None => true,
                Some((best_idx, best_score)) => {
                    score > best_score + TIE_EPSILON
                        || ((score - best_score).abs() <= TIE_EPSILON
                            && record.usage_count > records[best_idx].usage_count)
                }
            };
            if better {
                best = Some((idx, score));
            }
        }
        best
    }

    fn should_replace_text(
        &self,
        records: &[InstructionRecord],
        idx: usize,
        incoming: &str,
    ) -> bool {
        let existing = &records[idx].normalized_text;
        let wanted = match self.settings.text_policy {
            MergeTextPolicy::KeepExisting => false,
            MergeTextPolicy::PreferLonger => incoming.chars().count() > existing.chars().count(),
            MergeTextPolicy::PreferNewest => incoming != existing,
        };
        if !wanted {
            return false;
        }
        // Keep the old text if the new one would collide with a sibling
        match self.best_match(records, incoming, Some(idx)) {
            Some((_, score)) => score < self.settings.merge_threshold,
            None => true,
        }
    }

    /// Active records, most recently used first. Without a category, all
    /// categories are returned grouped in [`Category::ALL`] order.
    pub async fn list_active(&self, category: Option<Category>) -> Vec<InstructionRecord> {
        let categories: Vec<Category> = match category {
            Some(c) => vec![c],
            None => Category::ALL.to_vec(),
        };

        let mut out = Vec::new();
        for c in categories {
            let records = self.partition(c).lock().await;
            let mut active: Vec<InstructionRecord> =
                records.iter().filter(|r| r.active).cloned().collect();
            active.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
            out.extend(active);
        }
        out
    }

    /// Look up one record, active or not.
    pub async fn get(&self, id: &str) -> Result<InstructionRecord, InstructionError> {
        for c in Category::ALL {
            let records = self.partition(c).lock().await;
            if let Some(record) = records.iter().find(|r| r.id == id) {
                return Ok(record.clone());
            }
        }
        Err(InstructionError::NotFound(id.to_string()))
    }

    /// Count an application of an instruction (e.g. it was spliced into a
    /// prompt that the user accepted).
    pub async fn record_usage(&self, id: &str) -> Result<InstructionRecord, InstructionError> {
        let now = self.clock.now();
        let updated = self
            .modify(id, |record| {
                if !record.active {
                    return Err(InstructionError::NotFound(record.id.clone()));
                }
                record.usage_count += 1;
                record.last_used_at = now;
                Ok(())
            })
            .await?;
        self.persist().await;
        Ok(updated)
    }

    /// Soft-delete a record. Deactivating twice is not an error.
    pub async fn deactivate(&self, id: &str) -> Result<InstructionRecord, InstructionError> {
        let updated = self
            .modify(id, |record| {
                record.active = false;
                Ok(())
            })
            .await?;
        info!(record_id = %id, "Instruction deactivated");
        self.persist().await;
        Ok(updated)
    }

    async fn modify<F>(&self, id: &str, f: F) -> Result<InstructionRecord, InstructionError>
    where
        F: FnOnce(&mut InstructionRecord) -> Result<(), InstructionError>,
    {
        for c in Category::ALL {
            let mut records = self.partition(c).lock().await;
            if let Some(record) = records.iter_mut().find(|r| r.id == id) {
                f(record)?;
                return Ok(record.clone());
            }
        }
        Err(InstructionError::NotFound(id.to_string()))
    }

    /// Re-scan every category pairwise and merge active records that score
    /// at or above the threshold. Returns the number of records removed.
    ///
    /// Records are visited by usage count (highest first, creation order on
    /// ties); each one is either kept or absorbed into the best-matching
    /// record already kept. The survivor keeps its text and absorbs the
    /// usage count, so a second run finds nothing to merge.
    pub async fn optimize(&self) -> usize {
        let mut removed = 0;
        for c in Category::ALL {
            let mut records = self.partition(c).lock().await;
            let merged = self.merge_partition(&mut records);
            if merged > 0 {
                debug!(category = %c, merged, "Merged duplicate instructions");
            }
            removed += merged;
        }

        info!(removed, "Instruction store optimized");
        if removed > 0 {
            self.persist().await;
        }
        removed
    }

    fn merge_partition(&self, records: &mut Vec<InstructionRecord>) -> usize {
        let mut order: Vec<usize> = (0..records.len()).filter(|&i| records[i].active).collect();
        order.sort_by(|&a, &b| {
            records[b]
                .usage_count
                .cmp(&records[a].usage_count)
                .then(a.cmp(&b))
        });

        let mut kept: Vec<usize> = Vec::new();
        let mut absorbed: Vec<(usize, usize)> = Vec::new();
        for idx in order {
            let mut target: Option<(usize, f64)> = None;
            for &k in &kept {
                let score = self
                    .scorer
                    .score_normalized(&records[idx].normalized_text, &records[k].normalized_text);
                if score >= self.settings.merge_threshold
                    && target.is_none_or(|(_, best)| score > best + TIE_EPSILON)
                {
                    target = Some((k, score));
                }
            }
            match target {
                Some((k, _)) => absorbed.push((k, idx)),
                None => kept.push(idx),
            }
        }

        let mut doomed = vec![false; records.len()];
        for &(into, from) in &absorbed {
            let usage = records[from].usage_count;
            let last_used = records[from].last_used_at;
            let survivor = &mut records[into];
            survivor.usage_count += usage;
            survivor.last_used_at = survivor.last_used_at.max(last_used);
            doomed[from] = true;
        }

        let mut idx = 0;
        records.retain(|_| {
            let keep = !doomed[idx];
            idx += 1;
            keep
        });
        absorbed.len()
    }

    /// Hard-delete soft-deleted records and stale, rarely used ones.
    pub async fn compact(&self, policy: CompactPolicy) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        for c in Category::ALL {
            let mut records = self.partition(c).lock().await;
            let before = records.len();
            records.retain(|r| r.active && !is_stale(r, now, policy));
            removed += before - records.len();
        }

        info!(removed, "Instruction store compacted");
        if removed > 0 {
            self.persist().await;
        }
        removed
    }

    /// Render the top `max_items` active records (usage first, then recency)
    /// as a prompt block grouped by category. Empty when nothing is active.
    pub async fn format_for_prompt(&self, max_items: usize) -> String {
        if max_items == 0 {
            return String::new();
        }

        let mut ranked: Vec<InstructionRecord> = Vec::new();
        for c in Category::ALL {
            let records = self.partition(c).lock().await;
            ranked.extend(records.iter().filter(|r| r.active).cloned());
        }
        ranked.sort_by(|a, b| {
            b.usage_count
                .cmp(&a.usage_count)
                .then(b.last_used_at.cmp(&a.last_used_at))
                .then(a.created_at.cmp(&b.created_at))
        });
        ranked.truncate(max_items);
        if ranked.is_empty() {
            return String::new();
        }

        let mut out = String::from("## Learned writing preferences\n");
        for c in Category::ALL {
            let mut items = ranked.iter().filter(|r| r.category == c).peekable();
            if items.peek().is_none() {
                continue;
            }
            out.push_str(&format!("\n### {c}\n"));
            for record in items {
                out.push_str(&format!("- {}\n", record.raw_text));
            }
        }
        out
    }

    pub async fn stats(&self) -> Vec<CategoryStats> {
        let mut out = Vec::with_capacity(Category::ALL.len());
        for c in Category::ALL {
            let records = self.partition(c).lock().await;
            let active = records.iter().filter(|r| r.active).count();
            out.push(CategoryStats {
                category: c,
                active,
                inactive: records.len() - active,
                total_usage: records
                    .iter()
                    .filter(|r| r.active)
                    .map(|r| r.usage_count)
                    .sum(),
            });
        }
        out
    }

    /// Every record, active or not, grouped by category.
    pub async fn snapshot(&self) -> Vec<InstructionRecord> {
        let mut out = Vec::new();
        for c in Category::ALL {
            out.extend(self.partition(c).lock().await.iter().cloned());
        }
        out
    }

    /// Write the current state through the backend.
    pub async fn flush(&self) -> Result<(), InstructionError> {
        let _guard = self.persist_lock.lock().await;
        let records = self.snapshot().await;
        self.backend.save(&records).await?;
        Ok(())
    }

    /// Persistence is best effort on the mutation path: the in-memory
    /// state stays authoritative and the next write retries.
    async fn persist(&self) {
        if let Err(e) = self.flush().await {
            warn!(backend = self.backend.name(), error = %e, "Failed to persist instruction snapshot");
        }
    }
}

fn is_stale(record: &InstructionRecord, now: DateTime<Utc>, policy: CompactPolicy) -> bool {
    record.usage_count < policy.min_usage && now - record.last_used_at > policy.max_idle
}
