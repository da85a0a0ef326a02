//! CLI interface for support-ledger

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::faq::{parse_faq_text, FaqStore};
use crate::knowledge::{Category, KnowledgeStore, DEFAULT_MIN_RELEVANCE};
use crate::learning::LearningPipeline;
use crate::ledger::ConversationLedger;

const FAQ_IMPORT_SOURCE: &str = "import";

#[derive(Parser)]
#[command(name = "support-ledger")]
#[command(about = "Conversation ledger and knowledge base for a marketplace support bot", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Learn knowledge cards from finished conversations
    Learn {
        /// Minimum minutes since the last message (overrides config)
        #[arg(long)]
        min_age: Option<i64>,
    },
    /// Search knowledge cards
    Search {
        query: String,
        #[arg(short, long, default_value = "5")]
        limit: usize,
        /// Restrict to a category key (e.g. "визы_шенген")
        #[arg(short, long)]
        category: Option<String>,
    },
    /// List recently updated cards
    Cards {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Merge one topic into another
    Merge { from: String, into: String },
    /// Delete a card by topic
    Delete { topic: String },
    /// Import knowledge from a structured text file
    ImportText { file: PathBuf },
    /// Import Q:/A: pairs into the FAQ
    FaqImport { file: PathBuf },
    /// Print a conversation's history
    History { conversation_id: String },
}

fn parse_category(key: Option<&str>) -> Result<Option<Category>> {
    key.map(|key| Category::from_key(key).with_context(|| format!("Unknown category '{}'", key)))
        .transpose()
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Learn { min_age } => {
            let mut learning = config.learning.clone();
            if let Some(minutes) = min_age {
                learning.min_dialog_age_minutes = minutes;
            }
            let ledger = Arc::new(ConversationLedger::from_config(&config)?);
            let knowledge = Arc::new(KnowledgeStore::from_config(&config)?);
            // No model is wired into the CLI, so only heuristic extraction runs
            let pipeline = LearningPipeline::new(ledger, knowledge, None, learning);
            let stats = pipeline.run().await;
            println!("Learning finished: {}", stats);
        }
        Commands::Search { query, limit, category } => {
            let category = parse_category(category.as_deref())?;
            let store = KnowledgeStore::from_config(&config)?;
            let hits = store.search(&query, limit, category, DEFAULT_MIN_RELEVANCE);
            if hits.is_empty() {
                println!("No cards found for '{}'", query);
            }
            for hit in hits {
                println!("[{:.2}] {} ({})", hit.score, hit.card.topic, hit.card.category.key());
                for fact in &hit.card.facts {
                    println!("    - {}", fact);
                }
            }
        }
        Commands::Cards { limit } => {
            let store = KnowledgeStore::from_config(&config)?;
            let cards = store.list_recent(limit);
            println!("{} card(s)", cards.len());
            for card in cards {
                println!(
                    "{} [{}] facts={} used={}",
                    card.topic,
                    card.category.key(),
                    card.facts.len(),
                    card.usage_count
                );
            }
        }
        Commands::Merge { from, into } => {
            let store = KnowledgeStore::from_config(&config)?;
            store.merge_topics(&from, &into).await?;
            println!("Merged '{}' into '{}'", from, into);
        }
        Commands::Delete { topic } => {
            let store = KnowledgeStore::from_config(&config)?;
            store.delete_by_topic(&topic).await?;
            println!("Deleted '{}'", topic);
        }
        Commands::ImportText { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let store = KnowledgeStore::from_config(&config)?;
            let (changed, topics) = store.add_knowledge_from_text(&text, None).await?;
            println!("{} card(s) changed", changed);
            for topic in topics {
                println!("  {}", topic);
            }
        }
        Commands::FaqImport { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let drafts = parse_faq_text(&text);
            let store = FaqStore::from_config(&config)?;
            let result = store.add_entries_batch(&drafts, FAQ_IMPORT_SOURCE).await;
            println!("Added {}, skipped {}", result.added, result.skipped);
            for error in result.errors {
                eprintln!("  {}", error);
            }
        }
        Commands::History { conversation_id } => {
            let ledger = ConversationLedger::from_config(&config)?;
            let history = ledger.get_history(&conversation_id);
            if history.is_empty() {
                println!("No messages for {}", conversation_id);
            }
            for msg in history {
                let at = msg
                    .timestamp
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{} {:>12}: {}", at, msg.role.as_str(), msg.content);
            }
            let meta = ledger.get_meta(&conversation_id);
            if meta.processed {
                println!("(processed)");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_category_flag() {
        let cli = Cli::try_parse_from(["support-ledger", "search", "виза", "--category", "визы_шенген"]).unwrap();
        let Commands::Search { category, .. } = cli.command else {
            panic!("expected search");
        };
        assert_eq!(parse_category(category.as_deref()).unwrap(), Some(Category::SchengenVisas));
        assert!(parse_category(Some("визы")).is_err());
        assert_eq!(parse_category(None).unwrap(), None);
    }
}
