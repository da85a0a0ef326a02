//! Conversation ledger
//!
//! Append-only message history per conversation id plus a metadata
//! side-table, persisted as one JSON document:
//!
//! ```json
//! { "avito_1": [ {"role": "user", ...} ], "_meta": { "avito_1": {"processed": true} } }
//! ```
//!
//! Every mutation is a load-modify-save cycle under the ledger lock, so the
//! duplicate check against the last entry and the append are atomic.

pub mod dedup;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::storage::DocumentStore;
use crate::types::{flexible_time, Message, Role, Usage};

/// Reserved top-level key holding conversation metadata
pub const META_KEY: &str = "_meta";

/// Per-conversation bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMeta {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub processed: bool,
    #[serde(default, with = "flexible_time", skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_account_id: Option<String>,
}

impl ConversationMeta {
    pub fn is_empty(&self) -> bool {
        !self.processed && self.last_processed_at.is_none() && self.linked_account_id.is_none()
    }
}

/// Partial metadata update; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct MetaUpdate {
    pub processed: Option<bool>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub linked_account_id: Option<String>,
}

/// On-disk shape of the ledger file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerDocument {
    #[serde(rename = "_meta", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, ConversationMeta>,
    #[serde(flatten)]
    pub conversations: BTreeMap<String, Vec<Message>>,
}

impl LedgerDocument {
    fn clear_processed(&mut self, conversation_id: &str) -> bool {
        let Some(meta) = self.meta.get_mut(conversation_id) else {
            return false;
        };
        let changed = meta.processed || meta.last_processed_at.is_some();
        meta.processed = false;
        meta.last_processed_at = None;
        if meta.is_empty() {
            self.meta.remove(conversation_id);
        }
        changed
    }
}

/// Result of an append attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Dropped as an echo of the previous entry
    Suppressed,
    /// Empty content or conversation id
    Empty,
}

impl std::fmt::Display for AppendOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppendOutcome::Appended => write!(f, "appended"),
            AppendOutcome::Suppressed => write!(f, "suppressed"),
            AppendOutcome::Empty => write!(f, "empty"),
        }
    }
}

/// JSON-backed conversation ledger
pub struct ConversationLedger {
    doc: DocumentStore<LedgerDocument>,
    dedup_window: Duration,
    lock: Mutex<()>,
}

impl ConversationLedger {
    /// Create a ledger at `path` with the given duplicate window
    pub fn new(path: impl Into<PathBuf>, dedup_window_secs: i64) -> Self {
        Self {
            doc: DocumentStore::new(path),
            dedup_window: Duration::seconds(dedup_window_secs.max(0)),
            lock: Mutex::new(()),
        }
    }

    /// Create a ledger from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let path = config.storage.ledger_path()?;
        Ok(Self::new(path, config.ledger.dedup_window_secs))
    }

    /// Append a message stamped with the current time
    pub async fn append(&self, conversation_id: &str, role: Role, content: &str) -> Result<AppendOutcome> {
        self.append_at(conversation_id, role, content, None, Utc::now()).await
    }

    /// Append a bot reply together with its token usage
    pub async fn append_with_usage(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        usage: Usage,
    ) -> Result<AppendOutcome> {
        self.append_at(conversation_id, role, content, Some(usage), Utc::now()).await
    }

    /// Append with an explicit clock reading
    pub async fn append_at(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        usage: Option<Usage>,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        if conversation_id.is_empty() || conversation_id == META_KEY || content.trim().is_empty() {
            debug!("Ignoring empty append for '{}'", conversation_id);
            return Ok(AppendOutcome::Empty);
        }

        let _guard = self.lock.lock().await;
        let mut doc = self.doc.load()?;

        let history = doc.conversations.entry(conversation_id.to_string()).or_default();
        if dedup::is_duplicate(history.last(), role, content, now, self.dedup_window) {
            info!(
                "Suppressed duplicate {} message for {} ({} chars)",
                role,
                conversation_id,
                content.chars().count()
            );
            return Ok(AppendOutcome::Suppressed);
        }

        history.push(Message {
            role,
            content: content.to_string(),
            timestamp: Some(now),
            usage,
        });
        let len = history.len();
        if doc.clear_processed(conversation_id) {
            debug!("Reopened {} for learning", conversation_id);
        }

        self.doc
            .save(&doc)
            .with_context(|| format!("Failed to append to {}", conversation_id))?;
        debug!("Appended {} message to {} ({} total)", role, conversation_id, len);
        Ok(AppendOutcome::Appended)
    }

    /// Full ordered history for a conversation
    pub fn get_history(&self, conversation_id: &str) -> Vec<Message> {
        self.doc
            .load_or_default()
            .conversations
            .remove(conversation_id)
            .unwrap_or_default()
    }

    /// Read-only snapshot of the whole ledger
    pub fn snapshot(&self) -> LedgerDocument {
        self.doc.load_or_default()
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        self.snapshot().conversations.into_keys().collect()
    }

    pub fn get_meta(&self, conversation_id: &str) -> ConversationMeta {
        self.doc
            .load_or_default()
            .meta
            .remove(conversation_id)
            .unwrap_or_default()
    }

    pub fn is_processed(&self, conversation_id: &str) -> bool {
        self.get_meta(conversation_id).processed
    }

    /// Merge the provided fields into the conversation's metadata
    pub async fn set_meta(&self, conversation_id: &str, update: MetaUpdate) -> Result<()> {
        if conversation_id.is_empty() {
            warn!("set_meta called with empty conversation id");
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut doc = self.doc.load()?;
        let meta = doc.meta.entry(conversation_id.to_string()).or_default();
        if let Some(processed) = update.processed {
            meta.processed = processed;
        }
        if let Some(at) = update.last_processed_at {
            meta.last_processed_at = Some(at);
        }
        if let Some(account) = update.linked_account_id {
            meta.linked_account_id = Some(account);
        }
        if meta.is_empty() {
            doc.meta.remove(conversation_id);
        }
        self.doc.save(&doc)
    }

    pub async fn set_linked_account(&self, conversation_id: &str, account_id: &str) -> Result<()> {
        self.set_meta(
            conversation_id,
            MetaUpdate {
                linked_account_id: Some(account_id.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn mark_processed(&self, conversation_id: &str) -> Result<()> {
        self.mark_processed_at(conversation_id, Utc::now()).await
    }

    pub async fn mark_processed_at(&self, conversation_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.set_meta(
            conversation_id,
            MetaUpdate {
                processed: Some(true),
                last_processed_at: Some(now),
                ..Default::default()
            },
        )
        .await?;
        debug!("Marked {} processed", conversation_id);
        Ok(())
    }

    /// Mark processed only if the conversation still has `expected_len` messages
    ///
    /// Learning works on a snapshot; a message appended while the model was
    /// running must keep the conversation open.
    pub async fn mark_processed_if_unchanged(
        &self,
        conversation_id: &str,
        expected_len: usize,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut doc = self.doc.load()?;
        let current = doc.conversations.get(conversation_id).map_or(0, Vec::len);
        if current != expected_len {
            info!(
                "{} changed during learning ({} -> {} messages), leaving it open",
                conversation_id, expected_len, current
            );
            return Ok(false);
        }
        let meta = doc.meta.entry(conversation_id.to_string()).or_default();
        meta.processed = true;
        meta.last_processed_at = Some(now);
        self.doc.save(&doc)?;
        debug!("Marked {} processed", conversation_id);
        Ok(true)
    }

    /// Drop the processed marker, removing empty metadata entirely
    pub async fn clear_processed_flag(&self, conversation_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.doc.load()?;
        if doc.clear_processed(conversation_id) {
            self.doc.save(&doc)?;
        }
        Ok(())
    }
}
