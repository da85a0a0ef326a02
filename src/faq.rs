//! Legacy FAQ store
//!
//! A flat list of question/answer pairs kept alongside the knowledge cards.
//! Loading repairs what it can and falls back to `<file>.backup`; saving
//! refuses to shrink the list and writes through a temp file.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::knowledge::{SequenceRatio, Similarity};
use crate::storage::write_text_atomic;

const QUESTION_MIN: usize = 3;
const QUESTION_MAX: usize = 500;
const ANSWER_MIN: usize = 5;
const ANSWER_MAX: usize = 2000;

/// Similarity at which a curated answer is sent without generation
pub const EXACT_MATCH_THRESHOLD: f64 = 0.93;

static TRAILING_COMMA_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*\]").expect("valid regex"));
static TRAILING_COMMA_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*\}").expect("valid regex"));
static LINKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+|www\.\S+").expect("valid regex"));
static MENTIONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"@\w+").expect("valid regex"));
static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));
static QUESTION_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Q:").expect("valid regex"));
static ANSWER_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)A:").expect("valid regex"));

fn default_source() -> String {
    "manual".to_string()
}

/// A persisted FAQ entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqEntry {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default = "default_source")]
    pub source: String,
}

/// An unvalidated question/answer pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqDraft {
    pub question: String,
    pub answer: String,
}

impl FaqDraft {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Entries plus the count that must not shrink on the next save
#[derive(Debug, Clone, Default)]
pub struct FaqSnapshot {
    pub entries: Vec<FaqEntry>,
    pub count_at_load: usize,
}

/// Outcome of a batch insert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub added: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Error)]
pub enum FaqError {
    #[error("{0}")]
    Validation(String),
    #[error("question already exists in FAQ")]
    Duplicate,
    #[error("refusing to shrink FAQ from {previous} to {current} entries")]
    Shrink { previous: usize, current: usize },
    #[error("failed to save FAQ: {0:#}")]
    Persist(anyhow::Error),
}

/// Check trimmed lengths of a question/answer pair
pub fn validate_entry(question: &str, answer: &str) -> Result<(), FaqError> {
    let question = question.trim();
    let answer = answer.trim();
    let q_len = question.chars().count();
    let a_len = answer.chars().count();
    let reason = if question.is_empty() {
        "question is empty"
    } else if answer.is_empty() {
        "answer is empty"
    } else if q_len < QUESTION_MIN {
        "question is too short (min 3 chars)"
    } else if a_len < ANSWER_MIN {
        "answer is too short (min 5 chars)"
    } else if q_len > QUESTION_MAX {
        "question is too long (max 500 chars)"
    } else if a_len > ANSWER_MAX {
        "answer is too long (max 2000 chars)"
    } else {
        return Ok(());
    };
    Err(FaqError::Validation(reason.to_string()))
}

/// Lower-case, drop links, mentions and punctuation, collapse whitespace
pub fn normalize_question(text: &str) -> String {
    let lower = text.trim().to_lowercase();
    let stripped = LINKS.replace_all(&lower, "");
    let stripped = MENTIONS.replace_all(&stripped, "");
    let stripped = PUNCTUATION.replace_all(&stripped, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Highest-scoring entry, if its score reaches `threshold`
pub fn best_match(
    entries: &[FaqEntry],
    text: &str,
    similarity: &dyn Similarity,
    threshold: f64,
) -> Option<FaqEntry> {
    let incoming = normalize_question(text);
    if incoming.is_empty() {
        return None;
    }
    let (score, entry) = entries
        .iter()
        .filter(|e| !e.question.trim().is_empty() && !e.answer.trim().is_empty())
        .map(|e| (similarity.ratio(&incoming, &normalize_question(&e.question)), e))
        .fold(None, |best: Option<(f64, &FaqEntry)>, (score, e)| match best {
            Some((top, _)) if top >= score => best,
            _ => Some((score, e)),
        })?;
    if score < threshold {
        return None;
    }
    info!("Exact FAQ match {:.2} for '{}'", score, preview(&entry.question));
    Some(entry.clone())
}

/// JSON-backed FAQ list with repair and backup
pub struct FaqStore {
    path: PathBuf,
    backup_path: PathBuf,
    lock: Mutex<()>,
}

impl FaqStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let backup_path = sibling(&path, "backup");
        Self {
            path,
            backup_path,
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.storage.faq_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Load entries, repairing or restoring from backup when needed
    pub fn load(&self) -> FaqSnapshot {
        match self.read_main() {
            Ok(entries) => {
                debug!("Loaded FAQ: {} entries", entries.len());
                return FaqSnapshot {
                    count_at_load: entries.len(),
                    entries,
                };
            }
            Err(e) => warn!("{:#}; trying repair and backup", e),
        }

        if let Some(entries) = self.repair_main() {
            info!("FAQ repaired automatically: {} entries", entries.len());
            return FaqSnapshot {
                count_at_load: entries.len(),
                entries,
            };
        }

        match self.restore_backup() {
            Ok(Some(entries)) => {
                info!("FAQ restored from backup: {} entries", entries.len());
                FaqSnapshot {
                    count_at_load: entries.len(),
                    entries,
                }
            }
            Ok(None) => {
                warn!("No FAQ backup at {}, starting empty", self.backup_path.display());
                FaqSnapshot::default()
            }
            Err(e) => {
                error!("Failed to restore FAQ backup: {:#}", e);
                FaqSnapshot::default()
            }
        }
    }

    pub fn list(&self) -> Vec<FaqEntry> {
        self.load().entries
    }

    /// Curated entry matching `text` closely enough to answer verbatim
    pub fn find_exact(&self, text: &str) -> Option<FaqEntry> {
        best_match(&self.list(), text, &SequenceRatio, EXACT_MATCH_THRESHOLD)
    }

    fn read_main(&self) -> Result<Vec<FaqEntry>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if raw.trim().is_empty() {
            anyhow::bail!("FAQ file {} is empty", self.path.display());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("FAQ file {} is not a JSON list", self.path.display()))
    }

    /// Strip trailing commas; accepted only if a non-empty list comes out
    fn repair_main(&self) -> Option<Vec<FaqEntry>> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let fixed = TRAILING_COMMA_ARRAY.replace_all(&raw, "]");
        let fixed = TRAILING_COMMA_OBJECT.replace_all(&fixed, "}");
        let entries: Vec<FaqEntry> = serde_json::from_str(&fixed).ok()?;
        if entries.is_empty() {
            return None;
        }
        match serde_json::to_string_pretty(&entries) {
            Ok(content) => {
                if let Err(e) = write_text_atomic(&self.path, &content) {
                    warn!("Failed to write repaired FAQ: {:#}", e);
                }
            }
            Err(e) => warn!("Failed to serialize repaired FAQ: {}", e),
        }
        Some(entries)
    }

    fn restore_backup(&self) -> Result<Option<Vec<FaqEntry>>> {
        if !self.backup_path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.backup_path)
            .with_context(|| format!("Failed to read {}", self.backup_path.display()))?;
        let entries: Vec<FaqEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("FAQ backup {} is not a JSON list", self.backup_path.display()))?;
        std::fs::copy(&self.backup_path, &self.path)
            .with_context(|| format!("Failed to restore {}", self.path.display()))?;
        Ok(Some(entries))
    }

    /// Persist `entries`, refusing to go below `previous_count`
    pub fn save(&self, entries: &[FaqEntry], previous_count: usize) -> Result<(), FaqError> {
        if entries.len() < previous_count {
            error!(
                "CRITICAL: FAQ entry count would drop from {} to {}, save refused",
                previous_count,
                entries.len()
            );
            return Err(FaqError::Shrink {
                previous: previous_count,
                current: entries.len(),
            });
        }

        if self.path.exists() {
            if let Err(e) = std::fs::copy(&self.path, &self.backup_path) {
                warn!("Failed to back up FAQ: {}", e);
            }
        }

        let written = serde_json::to_string_pretty(entries)
            .context("Failed to serialize FAQ")
            .and_then(|content| write_text_atomic(&self.path, &content));
        match written {
            Ok(()) => {
                info!("FAQ saved: {} entries (was {})", entries.len(), previous_count);
                Ok(())
            }
            Err(e) => {
                error!("Failed to save FAQ: {:#}", e);
                if self.backup_path.exists() {
                    match std::fs::copy(&self.backup_path, &self.path) {
                        Ok(_) => info!("FAQ restored from backup after failed save"),
                        Err(restore) => error!("Failed to restore FAQ backup: {}", restore),
                    }
                }
                Err(FaqError::Persist(e))
            }
        }
    }

    /// Validate, reject duplicates, append and save; returns the new total
    pub async fn add_entry(&self, question: &str, answer: &str, source: &str) -> Result<usize, FaqError> {
        if let Err(e) = validate_entry(question, answer) {
            warn!("FAQ entry rejected: {} (question: '{}')", e, preview(question));
            return Err(e);
        }

        let _guard = self.lock.lock().await;
        let FaqSnapshot { mut entries, count_at_load } = self.load();
        let key = question.trim().to_lowercase();
        if entries.iter().any(|e| e.question.trim().to_lowercase() == key) {
            info!("FAQ already has question '{}'", preview(question));
            return Err(FaqError::Duplicate);
        }

        entries.push(FaqEntry {
            question: question.trim().to_string(),
            answer: answer.trim().to_string(),
            source: source.to_string(),
        });
        self.save(&entries, count_at_load)?;
        Ok(entries.len())
    }

    /// Insert many drafts with a single load/save round trip
    pub async fn add_entries_batch(&self, drafts: &[FaqDraft], source: &str) -> BatchResult {
        if drafts.is_empty() {
            return BatchResult::default();
        }

        let _guard = self.lock.lock().await;
        let FaqSnapshot { mut entries, count_at_load } = self.load();
        let mut known: HashSet<String> = entries
            .iter()
            .map(|e| e.question.trim().to_lowercase())
            .filter(|q| !q.is_empty())
            .collect();

        let mut result = BatchResult::default();
        for draft in drafts {
            let question = draft.question.trim();
            let answer = draft.answer.trim();
            if let Err(e) = validate_entry(question, answer) {
                result.skipped += 1;
                result.errors.push(format!("'{}...': {}", preview(question), e));
                continue;
            }
            if !known.insert(question.to_lowercase()) {
                result.skipped += 1;
                debug!("Skipping duplicate FAQ question '{}'", preview(question));
                continue;
            }
            entries.push(FaqEntry {
                question: question.to_string(),
                answer: answer.to_string(),
                source: source.to_string(),
            });
            result.added += 1;
        }

        if result.added > 0 {
            if let Err(e) = self.save(&entries, count_at_load) {
                return BatchResult {
                    added: 0,
                    skipped: drafts.len(),
                    errors: vec![e.to_string()],
                };
            }
            info!(
                "Added {} FAQ entries (skipped {}), source '{}'",
                result.added, result.skipped, source
            );
        }
        result
    }
}

/// Parse a JSON list of `{question, answer}` or `Q: ... A: ...` text
pub fn parse_faq_text(text: &str) -> Vec<FaqDraft> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(text) {
        let drafts: Vec<FaqDraft> = items
            .iter()
            .filter_map(|item| {
                let question = item.get("question")?;
                let answer = item.get("answer")?;
                Some(FaqDraft::new(
                    value_text(question).trim(),
                    value_text(answer).trim(),
                ))
            })
            .collect();
        if !drafts.is_empty() {
            return drafts;
        }
    }

    let starts: Vec<(usize, usize)> = QUESTION_MARKER
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();
    let mut drafts = Vec::new();
    for (i, &(_, body_start)) in starts.iter().enumerate() {
        let body_end = starts.get(i + 1).map_or(text.len(), |&(next, _)| next);
        let block = &text[body_start..body_end];
        let Some(split) = ANSWER_MARKER.find(block) else {
            continue;
        };
        let question = strip_quotes(block[..split.start()].trim());
        let answer = strip_quotes(block[split.end()..].trim());
        if !question.is_empty() && !answer.is_empty() {
            drafts.push(FaqDraft::new(question, answer));
        }
    }
    drafts
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn strip_quotes(s: &str) -> &str {
    let s = s.strip_prefix(['"', '\'']).unwrap_or(s);
    s.strip_suffix(['"', '\'']).unwrap_or(s).trim()
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_question() {
        assert_eq!(
            normalize_question("  Сколько СТОИТ виза?! https://x.ru @admin "),
            "сколько стоит виза"
        );
    }

    #[tokio::test]
    async fn test_find_exact_ignores_case_and_punctuation() {
        let dir = tempdir().unwrap();
        let store = FaqStore::new(dir.path().join("faq.json"));
        store
            .add_entry("Сколько стоит виза в Италию?", "От 15000 рублей", "manual")
            .await
            .unwrap();

        let hit = store.find_exact("сколько стоит виза в италию").unwrap();
        assert_eq!(hit.answer, "От 15000 рублей");
        assert!(store.find_exact("Какие документы нужны для визы?").is_none());
        assert!(store.find_exact("?!").is_none());
    }

    fn entry(q: &str) -> FaqEntry {
        FaqEntry {
            question: q.to_string(),
            answer: "Ответ на вопрос".to_string(),
            source: "manual".to_string(),
        }
    }

    #[test]
    fn test_validate_entry_bounds() {
        assert!(validate_entry("abc", "12345").is_ok());
        assert!(matches!(validate_entry("ab", "12345"), Err(FaqError::Validation(_))));
        assert!(validate_entry("abc", "1234").is_err());
        assert!(validate_entry(&"q".repeat(501), "12345").is_err());
        assert!(validate_entry("abc", &"a".repeat(2001)).is_err());
        assert!(validate_entry("   ", "12345").is_err());
    }

    #[test]
    fn test_shrink_guard_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let store = FaqStore::new(dir.path().join("faq.json"));
        let three = vec![entry("one?"), entry("two?"), entry("three?")];
        store.save(&three, 0).unwrap();

        let err = store.save(&[], 3).unwrap_err();
        assert!(matches!(err, FaqError::Shrink { previous: 3, current: 0 }));
        let snapshot = store.load();
        assert_eq!(snapshot.entries.len(), 3);
        assert_eq!(snapshot.count_at_load, 3);
    }

    #[test]
    fn test_save_keeps_backup_of_previous_version() {
        let dir = tempdir().unwrap();
        let store = FaqStore::new(dir.path().join("faq.json"));
        store.save(&[entry("one?")], 0).unwrap();
        store.save(&[entry("one?"), entry("two?")], 1).unwrap();

        let backup: Vec<FaqEntry> =
            serde_json::from_str(&std::fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(backup.len(), 1);
        assert!(!dir.path().join("faq.json.tmp").exists());
    }

    #[test]
    fn test_trailing_commas_are_repaired() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faq.json");
        std::fs::write(
            &path,
            r#"[{"question": "Сроки?", "answer": "10 дней", "source": "manual",},]"#,
        )
        .unwrap();
        let store = FaqStore::new(&path);
        let snapshot = store.load();
        assert_eq!(snapshot.count_at_load, 1);
        // Repaired content is written back
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(serde_json::from_str::<Vec<FaqEntry>>(&raw).is_ok());
    }

    #[test]
    fn test_corrupt_file_restores_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faq.json");
        let store = FaqStore::new(&path);
        std::fs::write(
            store.backup_path(),
            serde_json::to_string(&vec![entry("one?"), entry("two?")]).unwrap(),
        )
        .unwrap();
        std::fs::write(&path, "{\"broken\": ").unwrap();

        let snapshot = store.load();
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(store.read_main().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_everything_is_empty() {
        let dir = tempdir().unwrap();
        let store = FaqStore::new(dir.path().join("faq.json"));
        let snapshot = store.load();
        assert!(snapshot.entries.is_empty());
        assert_eq!(snapshot.count_at_load, 0);
    }

    #[tokio::test]
    async fn test_add_entry_rejects_duplicates() {
        let dir = tempdir().unwrap();
        let store = FaqStore::new(dir.path().join("faq.json"));
        assert_eq!(store.add_entry("Сколько стоит?", "От 15000 руб", "admin").await.unwrap(), 1);
        assert!(matches!(
            store.add_entry("  сколько СТОИТ? ", "Другой ответ", "admin").await,
            Err(FaqError::Duplicate)
        ));
        assert!(matches!(
            store.add_entry("Hi", "short", "admin").await,
            Err(FaqError::Validation(_))
        ));
        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_counts() {
        let dir = tempdir().unwrap();
        let store = FaqStore::new(dir.path().join("faq.json"));
        store.add_entry("Сроки?", "10 рабочих дней", "admin").await.unwrap();

        let result = store
            .add_entries_batch(
                &[
                    FaqDraft::new("Цена?", "15000 рублей"),
                    FaqDraft::new("цена?", "дубликат в пачке"),
                    FaqDraft::new("сроки?", "уже есть в FAQ"),
                    FaqDraft::new("?", "слишком короткий вопрос"),
                ],
                "import",
            )
            .await;
        assert_eq!(result.added, 1);
        assert_eq!(result.skipped, 3);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_parse_faq_text_json() {
        let drafts = parse_faq_text(r#"[{"question": " Q1 ", "answer": "A1"}, {"question": "only"}]"#);
        assert_eq!(drafts, vec![FaqDraft::new("Q1", "A1")]);
    }

    #[test]
    fn test_parse_faq_text_markers() {
        let text = "Q: Сколько стоит виза?\nA: \"От 15000 руб\"\n\nq: Сроки?\na: 10 дней";
        let drafts = parse_faq_text(text);
        assert_eq!(
            drafts,
            vec![
                FaqDraft::new("Сколько стоит виза?", "От 15000 руб"),
                FaqDraft::new("Сроки?", "10 дней"),
            ]
        );
        assert!(parse_faq_text("   ").is_empty());
    }
}
