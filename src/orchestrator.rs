//! Reply orchestration for one marketplace account
//!
//! Ties the ledger, the session gate, the knowledge store, the generative
//! capability and the outbound transport together. Every customer message
//! is recorded even when the bot stays silent.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::faq::FaqStore;
use crate::knowledge::{KnowledgeCard, KnowledgeStore, DEFAULT_MIN_RELEVANCE};
use crate::learning::segment::dialogue_text;
use crate::learning::{LlmCapability, Summary};
use crate::ledger::ConversationLedger;
use crate::session::SessionGate;
use crate::types::Role;

/// Messages of recent history rendered for a reply
const REPLY_CONTEXT_MESSAGES: usize = 20;

/// Cards handed to the capability as knowledge context
const KNOWLEDGE_CONTEXT_CARDS: usize = 5;

/// Top cards whose usage statistics are bumped per reply
const USAGE_TRACKED_CARDS: usize = 3;

/// Delivery channel back to the marketplace
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Deliver `text`; returns false when the platform rejected it
    async fn send(&self, conversation_id: &str, text: &str) -> bool;
}

/// What happened to an incoming customer message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Empty message, nothing recorded
    Ignored,
    /// Recorded, but an operator owns the conversation right now
    Paused,
    Replied { handoff: bool },
    /// The capability produced no text
    NoAnswer,
    SendFailed,
}

impl std::fmt::Display for ReplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyOutcome::Ignored => write!(f, "ignored"),
            ReplyOutcome::Paused => write!(f, "paused"),
            ReplyOutcome::Replied { handoff: true } => write!(f, "replied (handoff)"),
            ReplyOutcome::Replied { handoff: false } => write!(f, "replied"),
            ReplyOutcome::NoAnswer => write!(f, "no answer"),
            ReplyOutcome::SendFailed => write!(f, "send failed"),
        }
    }
}

/// True when `text` contains any handoff phrase, ignoring case
pub fn contains_handoff(text: &str, phrases: &[String]) -> bool {
    let text = text.to_lowercase();
    phrases
        .iter()
        .map(|p| p.trim().to_lowercase())
        .any(|p| !p.is_empty() && text.contains(&p))
}

pub struct ReplyOrchestrator {
    ledger: Arc<ConversationLedger>,
    gate: Arc<SessionGate>,
    knowledge: Arc<KnowledgeStore>,
    faq: Option<Arc<FaqStore>>,
    llm: Arc<dyn LlmCapability>,
    transport: Arc<dyn OutboundTransport>,
    handoff_phrases: Vec<String>,
    max_dialogue_chars: usize,
}

impl ReplyOrchestrator {
    pub fn new(
        config: &Config,
        ledger: Arc<ConversationLedger>,
        gate: Arc<SessionGate>,
        knowledge: Arc<KnowledgeStore>,
        llm: Arc<dyn LlmCapability>,
        transport: Arc<dyn OutboundTransport>,
    ) -> Self {
        Self {
            ledger,
            gate,
            knowledge,
            faq: None,
            llm,
            transport,
            handoff_phrases: config.handoff.phrases.clone(),
            max_dialogue_chars: config.learning.max_dialogue_chars,
        }
    }

    /// Answer close matches of curated FAQ questions directly
    pub fn with_faq(mut self, faq: Arc<FaqStore>) -> Self {
        self.faq = Some(faq);
        self
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    /// Cards relevant to `text`, recording usage of the best ones
    async fn knowledge_context(&self, text: &str) -> Vec<KnowledgeCard> {
        let cards: Vec<KnowledgeCard> = self
            .knowledge
            .search(text, KNOWLEDGE_CONTEXT_CARDS, None, DEFAULT_MIN_RELEVANCE)
            .into_iter()
            .map(|hit| hit.card)
            .collect();
        for card in cards.iter().take(USAGE_TRACKED_CARDS) {
            if let Err(e) = self.knowledge.record_usage(&card.topic).await {
                warn!("Failed to record usage for '{}': {:#}", card.topic, e);
            }
        }
        debug!("Knowledge context: {} card(s)", cards.len());
        cards
    }

    /// Curated answer if one matches, otherwise a generated one
    async fn compose_answer(&self, conversation_id: &str, text: &str) -> Result<Summary> {
        if let Some(entry) = self.faq.as_ref().and_then(|faq| faq.find_exact(text)) {
            info!("Answering {} from curated FAQ", conversation_id);
            return Ok(Summary::new(entry.answer.replace(['*', '#'], "")));
        }
        let knowledge = self.knowledge_context(text).await;
        let history = self.ledger.get_history(conversation_id);
        let dialogue = dialogue_text(&history, REPLY_CONTEXT_MESSAGES, self.max_dialogue_chars);
        self.llm.summarize(&dialogue, &knowledge).await
    }

    /// Handle a customer message: record, consult the gate, answer
    pub async fn on_customer_message(&self, conversation_id: &str, text: &str) -> Result<ReplyOutcome> {
        if text.trim().is_empty() {
            return Ok(ReplyOutcome::Ignored);
        }
        self.ledger.append(conversation_id, Role::User, text).await?;

        if !self.gate.can_reply(conversation_id).await {
            debug!("Bot paused for {}", conversation_id);
            return Ok(ReplyOutcome::Paused);
        }

        let summary = self.compose_answer(conversation_id, text).await?;
        let answer = summary.answer.trim();
        if answer.is_empty() {
            warn!("Empty answer generated for {}", conversation_id);
            return Ok(ReplyOutcome::NoAnswer);
        }

        if !self.transport.send(conversation_id, answer).await {
            warn!("Failed to deliver reply to {}", conversation_id);
            return Ok(ReplyOutcome::SendFailed);
        }

        match summary.usage.clone() {
            Some(usage) => {
                self.ledger
                    .append_with_usage(conversation_id, Role::Assistant, answer, usage)
                    .await?
            }
            None => self.ledger.append(conversation_id, Role::Assistant, answer).await?,
        };

        let handoff = contains_handoff(text, &self.handoff_phrases)
            || contains_handoff(answer, &self.handoff_phrases);
        if handoff {
            self.gate.set_waiting_manager(conversation_id).await;
        }
        Ok(ReplyOutcome::Replied { handoff })
    }

    /// Relay an operator reply; returns whether it was delivered
    pub async fn on_operator_reply(&self, conversation_id: &str, text: &str) -> Result<bool> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        if !self.transport.send(conversation_id, text).await {
            warn!("Operator reply to {} was not delivered", conversation_id);
            return Ok(false);
        }
        self.ledger.append(conversation_id, Role::Manager, text).await?;
        self.gate.set_cooldown(conversation_id, None).await;
        info!("Operator replied in {}", conversation_id);
        Ok(true)
    }

    /// Record the marketplace echo of a message sent from the owner account
    pub async fn on_owner_echo(&self, conversation_id: &str, text: &str) -> Result<()> {
        let outcome = self.ledger.append(conversation_id, Role::ExternalOwner, text).await?;
        debug!("Owner echo for {}: {}", conversation_id, outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{CardInput, CardSource};
    use crate::learning::MockLlmCapability;
    use crate::session::SessionState;
    use crate::types::Usage;
    use tempfile::tempdir;

    fn phrases() -> Vec<String> {
        Config::default().handoff.phrases
    }

    fn orchestrator(
        dir: &tempfile::TempDir,
        llm: MockLlmCapability,
        transport: MockOutboundTransport,
    ) -> (ReplyOrchestrator, Arc<ConversationLedger>) {
        let (orch, ledger, _) = orchestrator_with_knowledge(dir, llm, transport);
        (orch, ledger)
    }

    fn orchestrator_with_knowledge(
        dir: &tempfile::TempDir,
        llm: MockLlmCapability,
        transport: MockOutboundTransport,
    ) -> (ReplyOrchestrator, Arc<ConversationLedger>, Arc<KnowledgeStore>) {
        let ledger = Arc::new(ConversationLedger::new(dir.path().join("chat_history.json"), 120));
        let knowledge = Arc::new(KnowledgeStore::new(dir.path().join("knowledge_cards.json")));
        let orch = ReplyOrchestrator::new(
            &Config::default(),
            ledger.clone(),
            Arc::new(SessionGate::from_config(&Config::default())),
            knowledge.clone(),
            Arc::new(llm),
            Arc::new(transport),
        );
        (orch, ledger, knowledge)
    }

    #[test]
    fn test_contains_handoff() {
        assert!(contains_handoff("С вами СВЯЖЕТСЯ менеджер сегодня", &phrases()));
        assert!(!contains_handoff("Стоимость 15000", &phrases()));
        assert!(!contains_handoff("что угодно", &["  ".to_string()]));
    }

    #[tokio::test]
    async fn test_reply_records_usage() {
        let dir = tempdir().unwrap();
        let mut llm = MockLlmCapability::new();
        llm.expect_summarize().returning(|_, _| {
            Ok(Summary {
                answer: "Стоимость от 15000 руб".into(),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    model: "m".into(),
                }),
            })
        });
        let mut transport = MockOutboundTransport::new();
        transport.expect_send().times(1).returning(|_, _| true);
        let (orch, ledger) = orchestrator(&dir, llm, transport);

        let outcome = orch.on_customer_message("c1", "Сколько стоит?").await.unwrap();
        assert_eq!(outcome, ReplyOutcome::Replied { handoff: false });
        let history = ledger.get_history("c1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].usage.as_ref().unwrap().prompt_tokens, 10);
    }

    #[tokio::test]
    async fn test_handoff_pauses_bot() {
        let dir = tempdir().unwrap();
        let mut llm = MockLlmCapability::new();
        llm.expect_summarize()
            .times(1)
            .returning(|_, _| Ok(Summary::new("По данному вопросу вам в ближайшее время ответит наш менеджер")));
        let mut transport = MockOutboundTransport::new();
        transport.expect_send().times(1).returning(|_, _| true);
        let (orch, ledger) = orchestrator(&dir, llm, transport);

        let first = orch.on_customer_message("c1", "Нужна виза").await.unwrap();
        assert_eq!(first, ReplyOutcome::Replied { handoff: true });
        assert_eq!(orch.gate().state("c1").await, SessionState::WaitingManager);

        let second = orch.on_customer_message("c1", "Ау?").await.unwrap();
        assert_eq!(second, ReplyOutcome::Paused);
        assert_eq!(ledger.get_history("c1").last().unwrap().content, "Ау?");
    }

    #[tokio::test]
    async fn test_failed_send_is_not_recorded() {
        let dir = tempdir().unwrap();
        let mut llm = MockLlmCapability::new();
        llm.expect_summarize().returning(|_, _| Ok(Summary::new("Ответ")));
        let mut transport = MockOutboundTransport::new();
        transport.expect_send().returning(|_, _| false);
        let (orch, ledger) = orchestrator(&dir, llm, transport);

        assert_eq!(
            orch.on_customer_message("c1", "Вопрос").await.unwrap(),
            ReplyOutcome::SendFailed
        );
        assert!(!orch.on_operator_reply("c1", "Ответ менеджера").await.unwrap());
        assert_eq!(ledger.get_history("c1").len(), 1);
        assert_eq!(orch.gate().state("c1").await, SessionState::Active);
    }

    #[tokio::test]
    async fn test_operator_reply_starts_cooldown_and_echo_is_suppressed() {
        let dir = tempdir().unwrap();
        let mut transport = MockOutboundTransport::new();
        transport.expect_send().returning(|_, _| true);
        let (orch, ledger) = orchestrator(&dir, MockLlmCapability::new(), transport);

        ledger.append("c1", Role::User, "Сколько стоит?").await.unwrap();
        assert!(orch.on_operator_reply("c1", "15000 руб").await.unwrap());
        orch.on_owner_echo("c1", "15000  РУБ").await.unwrap();

        assert!(matches!(orch.gate().state("c1").await, SessionState::Cooldown { .. }));
        let history = ledger.get_history("c1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Manager);

        assert_eq!(
            orch.on_customer_message("c1", "А сроки?").await.unwrap(),
            ReplyOutcome::Paused
        );
    }

    #[tokio::test]
    async fn test_reply_uses_knowledge_and_records_usage() {
        let dir = tempdir().unwrap();
        let mut llm = MockLlmCapability::new();
        llm.expect_summarize()
            .withf(|_, cards| cards.first().is_some_and(|c| c.topic == "Стоимость визы в Италию"))
            .times(1)
            .returning(|_, _| Ok(Summary::new("Стоимость визы в Италию от 15000 руб")));
        let mut transport = MockOutboundTransport::new();
        transport.expect_send().returning(|_, _| true);
        let (orch, _, knowledge) = orchestrator_with_knowledge(&dir, llm, transport);
        let card = CardInput::new("Стоимость визы в Италию", vec!["от 15000 руб".into()]);
        knowledge.upsert(&[card], None, CardSource::AdminManual).await.unwrap();

        let outcome = orch.on_customer_message("c1", "Стоимость визы в Италию").await.unwrap();
        assert_eq!(outcome, ReplyOutcome::Replied { handoff: false });
        let card = knowledge.get("стоимость визы в италию").unwrap();
        assert_eq!(card.usage_count, 1);
        assert!(card.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_curated_faq_answers_without_model() {
        let dir = tempdir().unwrap();
        let faq = Arc::new(FaqStore::new(dir.path().join("faq.json")));
        faq.add_entry("Сколько стоит виза в Италию?", "**От 15000 рублей**", "manual")
            .await
            .unwrap();
        let mut llm = MockLlmCapability::new();
        llm.expect_summarize().never();
        let mut transport = MockOutboundTransport::new();
        transport
            .expect_send()
            .withf(|_, text| text.to_string() == "От 15000 рублей")
            .times(1)
            .returning(|_, _| true);
        let (orch, ledger) = orchestrator(&dir, llm, transport);
        let orch = orch.with_faq(faq);

        let outcome = orch.on_customer_message("c1", "сколько стоит виза в италию").await.unwrap();
        assert_eq!(outcome, ReplyOutcome::Replied { handoff: false });
        assert_eq!(ledger.get_history("c1")[1].content, "От 15000 рублей");
    }
}
