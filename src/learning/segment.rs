//! Splitting ledger history into learnable exchanges

use crate::faq::FaqDraft;
use crate::knowledge::{CardInput, CardPriority, Category};
use crate::types::{Message, Role};

/// Last user message shorter than this gets earlier messages as context
const SHORT_QUESTION_CHARS: usize = 20;

/// Split history after each operator message
///
/// An exchange is the run of messages ending with a `manager` or
/// `avito_owner` reply. Empty messages are skipped and a trailing run with
/// no operator reply is dropped.
pub fn complete_exchanges(history: &[Message], min_messages: usize) -> Vec<Vec<Message>> {
    if history.len() < min_messages {
        return Vec::new();
    }
    let mut exchanges = Vec::new();
    let mut current: Vec<Message> = Vec::new();
    for msg in history {
        if msg.content.trim().is_empty() {
            continue;
        }
        current.push(msg.clone());
        if msg.role.is_operator() {
            let exchange = std::mem::take(&mut current);
            if exchange.len() >= min_messages {
                exchanges.push(exchange);
            }
        }
    }
    exchanges
}

fn user_messages(exchange: &[Message]) -> Vec<&str> {
    exchange
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.trim())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Question for an exchange, pulling in context for short follow-ups
pub fn format_question(exchange: &[Message]) -> String {
    let users = user_messages(exchange);
    let Some((last, earlier)) = users.split_last() else {
        return String::new();
    };
    if last.chars().count() < SHORT_QUESTION_CHARS && !earlier.is_empty() {
        let context = earlier[earlier.len().saturating_sub(2)..].join(" ");
        return format!("{} {}", context, last).trim().to_string();
    }
    users.join(" ")
}

/// All user messages, prefixed by up to two earlier bot replies
pub fn combine_user_messages(exchange: &[Message]) -> String {
    let users = user_messages(exchange);
    if users.is_empty() {
        return String::new();
    }
    let combined = users.join(" ");
    let bot: Vec<&str> = exchange
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .map(|m| m.content.trim())
        .collect();
    if bot.is_empty() {
        return combined;
    }
    let context = bot[bot.len().saturating_sub(2)..].join(" ");
    format!("{} {}", context, combined).trim().to_string()
}

/// Last operator reply in the exchange
pub fn extract_answer(exchange: &[Message]) -> Option<String> {
    exchange
        .iter()
        .rev()
        .find(|m| m.role.is_operator() && !m.content.trim().is_empty())
        .map(|m| m.content.trim().to_string())
}

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "Клиент",
        Role::Assistant => "Бот",
        Role::Manager | Role::ExternalOwner => "Менеджер",
    }
}

/// Render the tail of a history as labelled dialogue lines
///
/// Keeps the last `max_messages` messages, then the last `max_chars`
/// characters of the rendered text.
pub fn dialogue_text(history: &[Message], max_messages: usize, max_chars: usize) -> String {
    let start = history.len().saturating_sub(max_messages);
    let text = history[start..]
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| format!("{}: {}", speaker(m.role), m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n");
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    text.chars().skip(total - max_chars).collect()
}

/// Model-free fallback: one card per exchange
pub fn heuristic_cards(history: &[Message], min_messages: usize) -> Vec<CardInput> {
    complete_exchanges(history, min_messages)
        .iter()
        .filter_map(|exchange| {
            let answer = extract_answer(exchange)?;
            let mut question = format_question(exchange);
            if question.is_empty() {
                question = combine_user_messages(exchange);
            }
            (!question.is_empty()).then(|| CardInput::new(question, vec![answer]))
        })
        .collect()
}

/// Convert grouped Q/A pairs to cards; answer lines become facts
pub fn grouped_to_cards(drafts: &[FaqDraft]) -> Vec<CardInput> {
    drafts
        .iter()
        .filter_map(|draft| {
            let question = draft.question.trim();
            let answer = draft.answer.trim();
            if question.is_empty() || answer.is_empty() {
                return None;
            }
            let mut facts: Vec<String> = answer
                .lines()
                .map(|line| line.trim_matches(|c: char| c == '-' || c == '•' || c.is_whitespace()))
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            if facts.is_empty() {
                facts.push(answer.to_string());
            }
            Some(CardInput::new(question, facts))
        })
        .collect()
}

/// Validate model-extracted cards before upsert
///
/// Drops cards without a topic, and cards without facts unless they describe
/// communication style. Unknown categories become the default category and
/// every card gets medium priority.
pub fn sanitize_extracted(cards: Vec<CardInput>) -> Vec<CardInput> {
    cards
        .into_iter()
        .filter_map(|mut card| {
            card.topic = card.topic.trim().to_string();
            if card.topic.is_empty() {
                return None;
            }
            card.facts.retain(|f| !f.trim().is_empty());
            card.tags.retain(|t| !t.trim().is_empty());
            let category = card
                .category
                .as_deref()
                .map(|key| Category::from_key(key).unwrap_or_default());
            if card.facts.is_empty() && category != Some(Category::CommunicationStyle) {
                return None;
            }
            card.category = category.map(|c| c.key().to_string());
            card.priority = Some(CardPriority::Medium.level() as i64);
            Some(card)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn m(role: Role, content: &str) -> Message {
        Message::new(role, content, Utc::now())
    }

    #[test]
    fn test_complete_exchanges_split_on_operator() {
        let history = vec![
            m(Role::User, "Сколько стоит?"),
            m(Role::Assistant, "Уточню"),
            m(Role::Manager, "15000"),
            m(Role::User, "  "),
            m(Role::User, "А сроки?"),
            m(Role::ExternalOwner, "10 дней"),
            m(Role::User, "Спасибо"),
        ];
        let exchanges = complete_exchanges(&history, 2);
        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[0].len(), 3);
        assert_eq!(exchanges[1].len(), 2);
    }

    #[test]
    fn test_lone_operator_message_is_not_an_exchange() {
        let history = vec![m(Role::Manager, "Здравствуйте"), m(Role::User, "?")];
        assert!(complete_exchanges(&history, 2).is_empty());
    }

    #[test]
    fn test_short_question_gets_context() {
        let exchange = vec![
            m(Role::User, "Нужна виза в Грецию"),
            m(Role::User, "На две недели в июле"),
            m(Role::User, "Готовы?"),
            m(Role::Manager, "Да"),
        ];
        assert_eq!(
            format_question(&exchange),
            "Нужна виза в Грецию На две недели в июле Готовы?"
        );
        assert_eq!(extract_answer(&exchange).as_deref(), Some("Да"));
    }

    #[test]
    fn test_combine_user_messages_with_bot_context() {
        let exchange = vec![
            m(Role::Assistant, "Здравствуйте!"),
            m(Role::User, "Цена?"),
            m(Role::Manager, "15000"),
        ];
        assert_eq!(combine_user_messages(&exchange), "Здравствуйте! Цена?");
    }

    #[test]
    fn test_dialogue_text_limits() {
        let history = vec![
            m(Role::User, "первое"),
            m(Role::Assistant, "второе"),
            m(Role::ExternalOwner, "третье"),
        ];
        assert_eq!(dialogue_text(&history, 2, 1000), "Бот: второе\nМенеджер: третье");
        assert_eq!(dialogue_text(&history, 10, 6), "третье");
    }

    #[test]
    fn test_grouped_to_cards_bullets() {
        let cards = grouped_to_cards(&[FaqDraft::new(
            "Виза в Италию",
            "- Стоимость 15000\n• Срок 10 дней\n",
        )]);
        assert_eq!(cards[0].topic, "Виза в Италию");
        assert_eq!(cards[0].facts, vec!["Стоимость 15000", "Срок 10 дней"]);
    }

    #[test]
    fn test_sanitize_extracted() {
        let mut style = CardInput::new("Приветствие", vec![]);
        style.category = Some("манера_общения".into());
        let mut odd = CardInput::new("Тема", vec!["факт".into()]);
        odd.category = Some("что-то".into());
        let cards = sanitize_extracted(vec![CardInput::new(" ", vec!["x".into()]), CardInput::new("Пусто", vec![]), style, odd]);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[1].category.as_deref(), Some("общее"));
        assert_eq!(cards[1].priority, Some(2));
    }

    #[test]
    fn test_heuristic_cards() {
        let history = vec![
            m(Role::User, "Сколько стоит виза в Италию?"),
            m(Role::ExternalOwner, "Зависит от типа, от 15000 руб"),
        ];
        let cards = heuristic_cards(&history, 2);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].topic, "Сколько стоит виза в Италию?");
        assert_eq!(cards[0].facts, vec!["Зависит от типа, от 15000 руб"]);
    }
}
