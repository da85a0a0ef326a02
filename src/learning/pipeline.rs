//! Learning pipeline - turns aged ledger conversations into knowledge cards
//!
//! The ledger is read as a snapshot and no lock is held while the model
//! runs. Results are upserted afterwards and the conversation is marked
//! processed only if it did not grow in the meantime.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::segment::{
    complete_exchanges, dialogue_text, grouped_to_cards, heuristic_cards, sanitize_extracted,
};
use super::LlmCapability;
use crate::config::LearningConfig;
use crate::knowledge::{CardInput, CardSource, KnowledgeStore};
use crate::ledger::ConversationLedger;
use crate::types::Message;

/// Counters from one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearningStats {
    /// Conversations marked processed
    pub processed: usize,
    /// Cards created or updated
    pub added: usize,
    pub errors: usize,
}

impl std::fmt::Display for LearningStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed={} added={} errors={}",
            self.processed, self.added, self.errors
        )
    }
}

/// Batch job feeding the knowledge store from the ledger
pub struct LearningPipeline {
    ledger: Arc<ConversationLedger>,
    knowledge: Arc<KnowledgeStore>,
    llm: Option<Arc<dyn LlmCapability>>,
    config: LearningConfig,
}

impl LearningPipeline {
    /// Create a pipeline; without a model capability only heuristics are used
    pub fn new(
        ledger: Arc<ConversationLedger>,
        knowledge: Arc<KnowledgeStore>,
        llm: Option<Arc<dyn LlmCapability>>,
        config: LearningConfig,
    ) -> Self {
        Self {
            ledger,
            knowledge,
            llm,
            config,
        }
    }

    /// Learn from one conversation; returns the number of cards changed
    pub async fn process_conversation(&self, conversation_id: &str) -> Result<usize> {
        self.process_conversation_at(conversation_id, Utc::now()).await
    }

    pub async fn process_conversation_at(&self, conversation_id: &str, now: DateTime<Utc>) -> Result<usize> {
        if self.ledger.is_processed(conversation_id) {
            debug!("Skipping processed conversation {}", conversation_id);
            return Ok(0);
        }
        let history = self.ledger.get_history(conversation_id);
        if history.len() < 2 {
            return Ok(0);
        }
        if complete_exchanges(&history, self.config.min_segment_messages).is_empty() {
            debug!("No complete exchanges in {}", conversation_id);
            return Ok(0);
        }

        let cards = self.collect_cards(conversation_id, &history).await;
        if cards.is_empty() {
            info!("Nothing learned from {}, will retry later", conversation_id);
            return Ok(0);
        }

        let (created, updated) = self
            .knowledge
            .upsert_at(&cards, Some(conversation_id), CardSource::HistoryLearning, now)
            .await?;
        let changed = created + updated;
        if changed > 0 {
            self.ledger
                .mark_processed_if_unchanged(conversation_id, history.len(), now)
                .await?;
        }
        info!(
            "Learned from {}: created={} updated={}",
            conversation_id, created, updated
        );
        Ok(changed)
    }

    /// Extraction chain: cards, then grouped Q/A, then heuristics without a model
    async fn collect_cards(&self, conversation_id: &str, history: &[Message]) -> Vec<CardInput> {
        let Some(llm) = &self.llm else {
            return heuristic_cards(history, self.config.min_segment_messages);
        };

        let dialogue = dialogue_text(history, self.config.max_card_messages, self.config.max_dialogue_chars);
        match llm.extract_cards(&dialogue).await {
            Ok(cards) => {
                let cards = sanitize_extracted(cards);
                if !cards.is_empty() {
                    return cards;
                }
                debug!("Card extraction empty for {}, trying grouped Q/A", conversation_id);
            }
            Err(e) => warn!("Card extraction failed for {}: {:#}", conversation_id, e),
        }

        let dialogue = dialogue_text(history, self.config.max_grouped_messages, self.config.max_dialogue_chars);
        match llm.extract_grouped(&dialogue).await {
            Ok(drafts) => grouped_to_cards(&drafts),
            Err(e) => {
                warn!("Grouped extraction failed for {}: {:#}", conversation_id, e);
                Vec::new()
            }
        }
    }

    /// Scan the ledger and learn from every eligible conversation
    pub async fn run(&self) -> LearningStats {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> LearningStats {
        let snapshot = self.ledger.snapshot();
        let min_age = Duration::minutes(self.config.min_dialog_age_minutes.max(0));
        let mut stats = LearningStats::default();
        let mut attempted = 0;

        for (conversation_id, history) in &snapshot.conversations {
            if snapshot.meta.get(conversation_id).is_some_and(|m| m.processed) {
                continue;
            }
            if history.len() < 2 {
                continue;
            }
            let last_at = history.last().and_then(|m| m.timestamp);
            if let Some(ts) = last_at {
                if now.signed_duration_since(ts) < min_age {
                    debug!("{} is still active, skipping", conversation_id);
                    continue;
                }
            }
            if let Some(max) = self.config.max_dialogs_per_run {
                if attempted >= max {
                    break;
                }
            }
            attempted += 1;

            match self.process_conversation_at(conversation_id, now).await {
                Ok(changed) => {
                    stats.added += changed;
                    if self.ledger.is_processed(conversation_id) {
                        stats.processed += 1;
                    }
                }
                Err(e) => {
                    warn!("Learning failed for {}: {:#}", conversation_id, e);
                    stats.errors += 1;
                }
            }
        }

        info!("Learning run finished: {}", stats);
        stats
    }
}
