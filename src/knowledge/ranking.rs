//! Search scoring for knowledge cards
//!
//! String similarity sits behind [`Similarity`] so the ranking can move to
//! embeddings without touching the store.

use std::collections::HashSet;

use super::{normalize_topic, CardPriority, KnowledgeCard};

/// Pairwise string similarity in `0.0..=1.0`
pub trait Similarity: Send + Sync {
    fn ratio(&self, a: &str, b: &str) -> f64;
}

/// Ratcliff/Obershelp matching ratio, `2 * matches / total_chars`
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceRatio;

impl Similarity for SequenceRatio {
    fn ratio(&self, a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let total = a.len() + b.len();
        if total == 0 {
            return 1.0;
        }
        2.0 * matching_chars(&a, &b) as f64 / total as f64
    }
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, len) = longest_match(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + len..], &b[j + len..])
}

/// Longest common block as `(start_a, start_b, len)`, earliest on ties
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        for j in 0..b.len() {
            cur[j + 1] = if a[i] == b[j] { prev[j] + 1 } else { 0 };
            let len = cur[j + 1];
            if len > best.2 {
                best = (i + 1 - len, j + 1 - len, len);
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    best
}

/// Words longer than two characters
pub fn significant_words(text: &str) -> HashSet<&str> {
    text.split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .collect()
}

/// Composite relevance of `card` for an already-normalized query
pub fn score_card(card: &KnowledgeCard, query: &str, similarity: &dyn Similarity) -> f64 {
    let topic = normalize_topic(&card.topic);
    let mut score = 0.0;

    if topic.contains(query) {
        score += 0.5;
    } else if query.contains(topic.as_str()) {
        score += 0.3;
    }

    score += similarity.ratio(query, &topic) * 0.3;

    let facts = normalize_topic(&card.facts.join(" "));
    score += similarity.ratio(query, &facts) * 0.2;

    let tag_matches = card
        .tags
        .iter()
        .map(|t| normalize_topic(t))
        .filter(|t| !t.is_empty() && (query.contains(t.as_str()) || t.contains(query)))
        .count();
    score += (tag_matches as f64 * 0.1).min(0.2);

    let common = significant_words(query)
        .intersection(&significant_words(&topic))
        .count();
    score += (common as f64 * 0.05).min(0.15);

    if card.priority == CardPriority::High {
        score *= 1.2;
    }
    if card.usage_count > 0 {
        score *= 1.1;
    }

    score * 0.7 + card.relevance_score * 0.3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(topic: &str) -> KnowledgeCard {
        serde_json::from_value(serde_json::json!({ "topic": topic, "facts": ["от 15000 руб"] })).unwrap()
    }

    #[test]
    fn test_ratio_bounds() {
        let sim = SequenceRatio;
        assert_eq!(sim.ratio("abc", "abc"), 1.0);
        assert_eq!(sim.ratio("abc", "xyz"), 0.0);
        assert_eq!(sim.ratio("", ""), 1.0);
        // difflib: SequenceMatcher(None, "abcd", "bcde").ratio() == 0.75
        assert!((sim.ratio("abcd", "bcde") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_ratio_counts_unicode_chars() {
        let sim = SequenceRatio;
        assert!((sim.ratio("виза", "визы") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_exact_topic_beats_unrelated_query() {
        let c = card("Стоимость визы в Италию");
        let exact = score_card(&c, "стоимость визы в италию", &SequenceRatio);
        let unrelated = score_card(&c, "погода завтра", &SequenceRatio);
        assert!(exact >= unrelated);
        assert!(exact > 0.5);
    }

    #[test]
    fn test_priority_and_usage_boost() {
        let plain = card("Сроки");
        let mut boosted = plain.clone();
        boosted.priority = CardPriority::High;
        boosted.usage_count = 3;
        let q = "сроки";
        assert!(score_card(&boosted, q, &SequenceRatio) > score_card(&plain, q, &SequenceRatio));
    }
}
