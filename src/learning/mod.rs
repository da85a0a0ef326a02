//! Background learning from conversation history
//!
//! Aged, unprocessed conversations are segmented into complete exchanges,
//! handed to an external language model for knowledge extraction, and the
//! resulting cards are merged into the knowledge store. A conversation is
//! marked processed only when knowledge actually changed.

pub mod pipeline;
pub mod segment;

pub use pipeline::{LearningPipeline, LearningStats};

use anyhow::Result;

use crate::faq::FaqDraft;
use crate::knowledge::{CardInput, KnowledgeCard};
use crate::types::Usage;

/// Generated reply text plus optional token accounting
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub answer: String,
    pub usage: Option<Usage>,
}

impl Summary {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            usage: None,
        }
    }
}

/// Opaque generative-model capability
///
/// Implementations own prompt construction and the model call. Empty or
/// failed extraction is treated by callers as "nothing learned yet".
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LlmCapability: Send + Sync {
    /// Produce a customer-facing answer for the rendered dialogue
    ///
    /// `knowledge` holds the cards ranked most relevant to the latest
    /// customer message, best first.
    async fn summarize(&self, dialogue: &str, knowledge: &[KnowledgeCard]) -> Result<Summary>;

    /// Extract knowledge cards from a rendered dialogue
    async fn extract_cards(&self, dialogue: &str) -> Result<Vec<CardInput>>;

    /// Extract grouped question/answer pairs from a full history
    async fn extract_grouped(&self, dialogue: &str) -> Result<Vec<FaqDraft>>;
}
