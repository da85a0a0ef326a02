//! Knowledge Store - JSON-backed card repository with merge-on-write upsert
//!
//! Mutations run a load-modify-save cycle under the store lock; search and
//! listing read a snapshot without locking.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::enrich::TextEnricher;
use super::ranking::{score_card, SequenceRatio, Similarity};
use super::{
    normalize_topic, CardInput, CardPriority, CardSource, Category, KnowledgeCard, KnowledgeError,
};
use crate::config::Config;
use crate::storage::DocumentStore;

/// Default relevance floor for search results
pub const DEFAULT_MIN_RELEVANCE: f64 = 0.3;

/// A scored search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: f64,
    pub card: KnowledgeCard,
}

/// Persistent knowledge card store
pub struct KnowledgeStore {
    doc: DocumentStore<Vec<KnowledgeCard>>,
    similarity: Box<dyn Similarity>,
    enricher: TextEnricher,
    lock: Mutex<()>,
}

impl KnowledgeStore {
    /// Create a store at `path` using edit-distance similarity
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_similarity(path, Box::new(SequenceRatio))
    }

    pub fn with_similarity(path: impl Into<PathBuf>, similarity: Box<dyn Similarity>) -> Self {
        Self {
            doc: DocumentStore::new(path),
            similarity,
            enricher: TextEnricher::default(),
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.storage.knowledge_path()?))
    }

    pub fn enricher(&self) -> &TextEnricher {
        &self.enricher
    }

    /// Merge `inputs` into the store, returning `(created, updated)`
    pub async fn upsert(
        &self,
        inputs: &[CardInput],
        conversation_id: Option<&str>,
        source: CardSource,
    ) -> Result<(usize, usize)> {
        self.upsert_at(inputs, conversation_id, source, Utc::now()).await
    }

    pub async fn upsert_at(
        &self,
        inputs: &[CardInput],
        conversation_id: Option<&str>,
        source: CardSource,
        now: DateTime<Utc>,
    ) -> Result<(usize, usize)> {
        if inputs.is_empty() {
            return Ok((0, 0));
        }
        let _guard = self.lock.lock().await;
        let mut cards = self.doc.load()?;
        let (created, updated) = merge_inputs(&mut cards, inputs, conversation_id, source, now);
        if created + updated > 0 {
            self.doc.save(&cards)?;
            info!("Knowledge cards upsert: created={} updated={}", created, updated);
        }
        Ok((created, updated))
    }

    /// Ranked search over topic, facts and tags
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        category: Option<Category>,
        min_relevance: f64,
    ) -> Vec<SearchHit> {
        let query = normalize_topic(query);
        if query.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<SearchHit> = self
            .doc
            .load_or_default()
            .into_iter()
            .filter(|card| category.map_or(true, |c| card.category == c))
            .filter_map(|card| {
                let score = score_card(&card, &query, self.similarity.as_ref());
                (score >= min_relevance).then_some(SearchHit { score, card })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        debug!("Knowledge search '{}' -> {} hits", query, hits.len());
        hits
    }

    /// Search with default filters, returning cards only
    pub fn find(&self, query: &str, limit: usize) -> Vec<KnowledgeCard> {
        self.search(query, limit, None, DEFAULT_MIN_RELEVANCE)
            .into_iter()
            .map(|hit| hit.card)
            .collect()
    }

    pub fn get(&self, topic: &str) -> Option<KnowledgeCard> {
        let key = normalize_topic(topic);
        if key.is_empty() {
            return None;
        }
        self.doc
            .load_or_default()
            .into_iter()
            .find(|card| card.key() == key)
    }

    pub fn list_cards(&self) -> Vec<KnowledgeCard> {
        self.doc.load_or_default()
    }

    /// Most recently updated cards first
    pub fn list_recent(&self, limit: usize) -> Vec<KnowledgeCard> {
        let mut cards = self.doc.load_or_default();
        cards.sort_by(|a, b| {
            let a_ts = a.updated_at.or(a.created_at);
            let b_ts = b.updated_at.or(b.created_at);
            b_ts.cmp(&a_ts)
        });
        cards.truncate(limit);
        cards
    }

    /// Bump usage statistics after a card was used in a reply
    pub async fn record_usage(&self, topic: &str) -> Result<bool> {
        self.record_usage_at(topic, Utc::now()).await
    }

    pub async fn record_usage_at(&self, topic: &str, now: DateTime<Utc>) -> Result<bool> {
        let key = normalize_topic(topic);
        let _guard = self.lock.lock().await;
        let mut cards = self.doc.load()?;
        let Some(card) = cards.iter_mut().find(|c| c.key() == key) else {
            debug!("record_usage: no card for '{}'", topic);
            return Ok(false);
        };
        card.usage_count += 1;
        card.last_used_at = Some(now);
        card.relevance_score = (card.relevance_score + 0.01).min(1.0);
        self.doc.save(&cards)?;
        Ok(true)
    }

    /// Fold `from_topic` into `into_topic` and delete the source card
    pub async fn merge_topics(&self, from_topic: &str, into_topic: &str) -> Result<(), KnowledgeError> {
        let from_key = normalize_topic(from_topic);
        let into_key = normalize_topic(into_topic);
        if from_key.is_empty() || into_key.is_empty() {
            return Err(KnowledgeError::EmptyTopic);
        }
        if from_key == into_key {
            return Err(KnowledgeError::SameTopic);
        }

        let _guard = self.lock.lock().await;
        let mut cards = self.doc.load()?;
        let from_idx = cards
            .iter()
            .position(|c| c.key() == from_key)
            .ok_or_else(|| KnowledgeError::TopicNotFound(from_topic.trim().to_string()))?;
        if !cards.iter().any(|c| c.key() == into_key) {
            return Err(KnowledgeError::TopicNotFound(into_topic.trim().to_string()));
        }

        let from = cards.remove(from_idx);
        let now = Utc::now();
        if let Some(into) = cards.iter_mut().find(|c| c.key() == into_key) {
            into.facts = sorted_union(&into.facts, &from.facts);
            into.tags = sorted_union(&into.tags, &from.tags);
            into.linked_conversation_ids =
                sorted_union(&into.linked_conversation_ids, &from.linked_conversation_ids);
            into.priority = into.priority.min(from.priority);
            into.source = into.source.or(Some(CardSource::AdminMerge));
            into.updated_at = Some(now);
        }
        self.doc.save(&cards)?;
        info!("Merged topic '{}' into '{}'", from.topic, into_topic.trim());
        Ok(())
    }

    pub async fn delete_by_topic(&self, topic: &str) -> Result<(), KnowledgeError> {
        let key = normalize_topic(topic);
        if key.is_empty() {
            return Err(KnowledgeError::EmptyTopic);
        }
        let _guard = self.lock.lock().await;
        let mut cards = self.doc.load()?;
        let before = cards.len();
        cards.retain(|c| c.key() != key);
        if cards.len() == before {
            return Err(KnowledgeError::TopicNotFound(topic.trim().to_string()));
        }
        self.doc.save(&cards)?;
        info!("Deleted knowledge card '{}'", topic.trim());
        Ok(())
    }

    /// Admin entry point: add facts to a topic, creating it if needed
    pub async fn add_facts(
        &self,
        topic: &str,
        facts: &[String],
        category: Option<Category>,
        tags: &[String],
        priority: CardPriority,
        conversation_id: Option<&str>,
    ) -> Result<(usize, usize), KnowledgeError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(KnowledgeError::EmptyTopic);
        }
        let facts = clean_list(facts);
        if facts.is_empty() {
            return Err(KnowledgeError::EmptyFacts);
        }
        let mut input = CardInput::new(topic, facts)
            .with_tags(tags.to_vec())
            .with_priority(priority);
        if let Some(category) = category {
            input = input.with_category(category);
        }
        let counts = self
            .upsert(&[input], conversation_id, CardSource::AdminManual)
            .await?;
        Ok(counts)
    }

    /// Build cards from structured free text; returns the changed count and topics
    pub async fn add_knowledge_from_text(
        &self,
        text: &str,
        conversation_id: Option<&str>,
    ) -> Result<(usize, Vec<String>)> {
        let inputs = self.enricher.parse_text(text);
        if inputs.is_empty() {
            warn!("No knowledge found in {} chars of text", text.len());
            return Ok((0, Vec::new()));
        }
        let topics = inputs.iter().map(|c| c.topic.clone()).collect();
        let (created, updated) = self
            .upsert(&inputs, conversation_id, CardSource::AdminManual)
            .await?;
        Ok((created + updated, topics))
    }
}

/// Apply upsert semantics to an in-memory card list
fn merge_inputs(
    cards: &mut Vec<KnowledgeCard>,
    inputs: &[CardInput],
    conversation_id: Option<&str>,
    source: CardSource,
    now: DateTime<Utc>,
) -> (usize, usize) {
    let mut index: HashMap<String, usize> = cards
        .iter()
        .enumerate()
        .map(|(i, c)| (c.key(), i))
        .filter(|(key, _)| !key.is_empty())
        .collect();
    let conversation_id = conversation_id.map(str::trim).filter(|id| !id.is_empty());

    let mut created = 0;
    let mut updated = 0;
    for input in inputs {
        let topic = input.topic.trim();
        if topic.is_empty() {
            continue;
        }
        let key = normalize_topic(topic);
        let facts = clean_list(&input.facts);
        let tags = clean_list(&input.tags);
        let category = input.category.as_deref().and_then(Category::from_key);
        let priority = CardPriority::from_level(input.priority.unwrap_or(2));

        if let Some(&i) = index.get(&key) {
            let card = &mut cards[i];
            card.topic = topic.to_string();
            card.facts = sorted_union(&card.facts, &facts);
            let merged_tags = sorted_union(&card.tags, &tags);
            if !merged_tags.is_empty() {
                card.tags = merged_tags;
            }
            if let Some(category) = category {
                card.category = category;
            }
            card.priority = card.priority.min(priority);
            card.source = card.source.or(Some(source));
            card.updated_at = Some(now);
            if let Some(id) = conversation_id {
                if !card.linked_conversation_ids.iter().any(|d| d == id) {
                    card.linked_conversation_ids.push(id.to_string());
                }
            }
            updated += 1;
        } else {
            cards.push(KnowledgeCard {
                topic: topic.to_string(),
                category: category.unwrap_or_default(),
                facts: sorted_union(&[], &facts),
                tags: sorted_union(&[], &tags),
                priority,
                relevance_score: 0.5,
                source: Some(source),
                linked_conversation_ids: conversation_id.map(|id| vec![id.to_string()]).unwrap_or_default(),
                usage_count: 0,
                created_at: Some(now),
                updated_at: Some(now),
                last_used_at: None,
            });
            index.insert(key, cards.len() - 1);
            created += 1;
        }
    }
    (created, updated)
}

fn clean_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn sorted_union(existing: &[String], incoming: &[String]) -> Vec<String> {
    existing
        .iter()
        .chain(incoming)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
