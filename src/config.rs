//! Configuration management
//!
//! Manages file locations, session timing, duplicate suppression and
//! learning limits for the support ledger.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// On-disk document locations
    #[serde(default)]
    pub storage: StorageConfig,
    /// Session gate timing
    #[serde(default)]
    pub session: SessionConfig,
    /// Ledger duplicate suppression
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Background learning limits
    #[serde(default)]
    pub learning: LearningConfig,
    /// Phrases that mark a reply as deferred to an operator
    #[serde(default)]
    pub handoff: HandoffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Overrides the platform data directory
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_ledger_file")]
    pub ledger_file: String,
    #[serde(default = "default_knowledge_file")]
    pub knowledge_file: String,
    #[serde(default = "default_faq_file")]
    pub faq_file: String,
}

fn default_ledger_file() -> String {
    "chat_history.json".to_string()
}

fn default_knowledge_file() -> String {
    "knowledge_cards.json".to_string()
}

fn default_faq_file() -> String {
    "faq.json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            ledger_file: default_ledger_file(),
            knowledge_file: default_knowledge_file(),
            faq_file: default_faq_file(),
        }
    }
}

impl StorageConfig {
    /// Resolve the directory holding all documents
    pub fn resolve_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => data_dir(),
        }
    }

    pub fn ledger_path(&self) -> Result<PathBuf> {
        Ok(self.resolve_dir()?.join(&self.ledger_file))
    }

    pub fn knowledge_path(&self) -> Result<PathBuf> {
        Ok(self.resolve_dir()?.join(&self.knowledge_file))
    }

    pub fn faq_path(&self) -> Result<PathBuf> {
        Ok(self.resolve_dir()?.join(&self.faq_file))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Pause after an operator reply before the bot answers again
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
}

fn default_cooldown_minutes() -> i64 {
    15
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Two channels reporting the same text within this window collapse into one entry
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: i64,
}

fn default_dedup_window_secs() -> i64 {
    120
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Conversations with activity newer than this are left alone
    #[serde(default = "default_min_dialog_age_minutes")]
    pub min_dialog_age_minutes: i64,
    #[serde(default = "default_min_segment_messages")]
    pub min_segment_messages: usize,
    /// History tail sent for card extraction
    #[serde(default = "default_max_card_messages")]
    pub max_card_messages: usize,
    /// History tail sent for grouped Q/A extraction
    #[serde(default = "default_max_grouped_messages")]
    pub max_grouped_messages: usize,
    #[serde(default = "default_max_dialogue_chars")]
    pub max_dialogue_chars: usize,
    #[serde(default)]
    pub max_dialogs_per_run: Option<usize>,
}

fn default_min_dialog_age_minutes() -> i64 {
    30
}

fn default_min_segment_messages() -> usize {
    2
}

fn default_max_card_messages() -> usize {
    80
}

fn default_max_grouped_messages() -> usize {
    60
}

fn default_max_dialogue_chars() -> usize {
    8000
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_dialog_age_minutes: default_min_dialog_age_minutes(),
            min_segment_messages: default_min_segment_messages(),
            max_card_messages: default_max_card_messages(),
            max_grouped_messages: default_max_grouped_messages(),
            max_dialogue_chars: default_max_dialogue_chars(),
            max_dialogs_per_run: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    #[serde(default = "default_handoff_phrases")]
    pub phrases: Vec<String>,
}

fn default_handoff_phrases() -> Vec<String> {
    [
        "по данному вопросу вам в ближайшее время ответит наш менеджер",
        "ответит наш менеджер",
        "наш менеджер ответит",
        "свяжется менеджер",
        "свяжется наш менеджер",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            phrases: default_handoff_phrases(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            ledger: LedgerConfig::default(),
            learning: LearningConfig::default(),
            handoff: HandoffConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "support-ledger", "support-ledger")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "support-ledger", "support-ledger")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.cooldown_minutes, 15);
        assert_eq!(config.ledger.dedup_window_secs, 120);
        assert_eq!(config.learning.max_card_messages, 80);
        assert_eq!(config.handoff.phrases.len(), 5);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            "[session]\ncooldown_minutes = 5\n\n[storage]\ndata_dir = \"/tmp/ledger\"\n",
        )
        .unwrap();
        assert_eq!(config.session.cooldown_minutes, 5);
        assert_eq!(config.storage.faq_file, "faq.json");
        assert_eq!(
            config.storage.ledger_path().unwrap(),
            PathBuf::from("/tmp/ledger/chat_history.json")
        );
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.learning.min_dialog_age_minutes, 30);
    }
}
