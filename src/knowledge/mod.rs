//! Knowledge cards - structured knowledge learned from conversations
//!
//! A card is keyed by its case/space-normalized topic. Repeat topics are
//! merged (facts and tags behave as sorted sets), never overwritten.

pub mod enrich;
pub mod ranking;
pub mod store;

pub use ranking::{SequenceRatio, Similarity};
pub use store::{KnowledgeStore, SearchHit, DEFAULT_MIN_RELEVANCE};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::flexible_time;

/// Fixed card categories, persisted under their Russian keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Category {
    SchengenVisas,
    OtherVisas,
    Documents,
    Cost,
    Timelines,
    Process,
    SpecialConditions,
    CommunicationStyle,
    #[default]
    General,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::SchengenVisas,
        Category::OtherVisas,
        Category::Documents,
        Category::Cost,
        Category::Timelines,
        Category::Process,
        Category::SpecialConditions,
        Category::CommunicationStyle,
        Category::General,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Category::SchengenVisas => "визы_шенген",
            Category::OtherVisas => "визы_другие",
            Category::Documents => "документы",
            Category::Cost => "стоимость",
            Category::Timelines => "сроки",
            Category::Process => "процесс",
            Category::SpecialConditions => "особые_условия",
            Category::CommunicationStyle => "манера_общения",
            Category::General => "общее",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Category::SchengenVisas => "Визы в страны Шенгенской зоны",
            Category::OtherVisas => "Визы в другие страны",
            Category::Documents => "Документы и требования",
            Category::Cost => "Стоимость и оплата",
            Category::Timelines => "Сроки оформления и рассмотрения",
            Category::Process => "Процесс оформления",
            Category::SpecialConditions => "Особые условия и ограничения",
            Category::CommunicationStyle => "Примеры манеры общения менеджера",
            Category::General => "Общая информация",
        }
    }

    /// Parse a category key; `None` for anything outside the fixed set
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL.into_iter().find(|c| c.key() == key)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl Serialize for Category {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.key())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(Category::from_key(&raw).unwrap_or_default())
    }
}

/// Card priority; numerically lower is more important
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum CardPriority {
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl CardPriority {
    /// Map a numeric priority, falling back to `Medium` when out of range
    pub fn from_level(level: i64) -> Self {
        match level {
            1 => CardPriority::High,
            3 => CardPriority::Low,
            _ => CardPriority::Medium,
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for CardPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CardPriority::High => write!(f, "high"),
            CardPriority::Medium => write!(f, "medium"),
            CardPriority::Low => write!(f, "low"),
        }
    }
}

impl Serialize for CardPriority {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.level())
    }
}

impl<'de> Deserialize<'de> for CardPriority {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let level = i64::deserialize(d)?;
        Ok(CardPriority::from_level(level))
    }
}

/// Where a card's knowledge came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardSource {
    HistoryLearning,
    AdminManual,
    LlmExtraction,
    AdminMerge,
}

impl std::fmt::Display for CardSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CardSource::HistoryLearning => write!(f, "history_learning"),
            CardSource::AdminManual => write!(f, "admin_manual"),
            CardSource::LlmExtraction => write!(f, "llm_extraction"),
            CardSource::AdminMerge => write!(f, "admin_merge"),
        }
    }
}

fn default_relevance() -> f64 {
    0.5
}

/// A persisted knowledge card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeCard {
    pub topic: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: CardPriority,
    #[serde(default = "default_relevance")]
    pub relevance_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<CardSource>,
    #[serde(default, rename = "dialog_ids")]
    pub linked_conversation_ids: Vec<String>,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default, with = "flexible_time", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "flexible_time", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "flexible_time", skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl KnowledgeCard {
    pub fn key(&self) -> String {
        normalize_topic(&self.topic)
    }
}

/// Upsert input as produced by extraction or admin tooling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardInput {
    pub topic: String,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Raw category key; ignored unless it names a fixed category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl CardInput {
    pub fn new(topic: impl Into<String>, facts: Vec<String>) -> Self {
        Self {
            topic: topic.into(),
            facts,
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category.key().to_string());
        self
    }

    pub fn with_priority(mut self, priority: CardPriority) -> Self {
        self.priority = Some(priority.level() as i64);
        self
    }
}

/// Caller-facing knowledge store failures
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("topic is empty")]
    EmptyTopic,
    #[error("no facts given")]
    EmptyFacts,
    #[error("topic not found: {0}")]
    TopicNotFound(String),
    #[error("topics are the same")]
    SameTopic,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Case/space normalization used for topic identity
pub fn normalize_topic(topic: &str) -> String {
    topic.trim().to_lowercase()
}
