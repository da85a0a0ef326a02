//! Support Ledger - conversation ledger and knowledge learning engine
//!
//! Backing store for a marketplace support bot with a human operator:
//! - Durable per-conversation message ledger with cross-channel dedup
//! - Session gate pausing the bot during handoff and operator cooldown
//! - Knowledge cards with ranked fuzzy search
//! - Background learning that turns finished dialogs into cards
//! - Curated FAQ store guarded against accidental shrinkage
//!
//! # Example
//!
//! ```ignore
//! use support_ledger::{Config, ConversationLedger, Role};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let ledger = ConversationLedger::from_config(&config)?;
//!     ledger.append("chat-1", Role::User, "Сколько стоит виза?").await?;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod types;
pub mod config;
pub mod storage;
pub mod ledger;
pub mod session;
pub mod cli;

// Knowledge and learning
pub mod knowledge;
pub mod faq;
pub mod learning;
pub mod orchestrator;

pub use config::Config;

pub use types::{Message, Role, Usage};

pub use ledger::{AppendOutcome, ConversationLedger, ConversationMeta};

pub use session::{SessionGate, SessionState};

pub use knowledge::{
    CardInput,
    CardPriority,
    CardSource,
    Category,
    KnowledgeCard,
    KnowledgeError,
    KnowledgeStore,
    SearchHit,
};

pub use faq::{FaqDraft, FaqEntry, FaqError, FaqStore};

pub use learning::{LearningPipeline, LearningStats, LlmCapability, Summary};

pub use orchestrator::{contains_handoff, OutboundTransport, ReplyOrchestrator, ReplyOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Support conversation ledger", NAME, VERSION)
}
