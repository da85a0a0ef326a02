//! Concurrent writers on shared stores must not lose updates

use std::sync::Arc;
use support_ledger::{CardInput, CardSource, ConversationLedger, KnowledgeStore, Role};
use tempfile::tempdir;

const WRITERS: usize = 40;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_appends_all_survive() {
    let dir = tempdir().unwrap();
    let ledger = Arc::new(ConversationLedger::new(dir.path().join("chat_history.json"), 120));

    let tasks: Vec<_> = (0..WRITERS)
        .map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .append("c1", Role::User, &format!("Сообщение номер {}", i))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let history = ledger.get_history("c1");
    assert_eq!(history.len(), WRITERS);
    for i in 0..WRITERS {
        let expected = format!("Сообщение номер {}", i);
        assert!(history.iter().any(|m| m.content == expected), "missing {}", expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_upserts_all_survive() {
    let dir = tempdir().unwrap();
    let store = Arc::new(KnowledgeStore::new(dir.path().join("knowledge_cards.json")));

    let tasks: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let input = CardInput::new("Виза в Италию", vec![format!("факт {:02}", i)]);
                let conversation_id = format!("c{}", i);
                store
                    .upsert(&[input], Some(conversation_id.as_str()), CardSource::HistoryLearning)
                    .await
                    .unwrap()
            })
        })
        .collect();
    let mut created = 0;
    let mut updated = 0;
    for task in tasks {
        let (c, u) = task.await.unwrap();
        created += c;
        updated += u;
    }

    assert_eq!((created, updated), (1, WRITERS - 1));
    let cards = store.list_cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].facts.len(), WRITERS);
    assert_eq!(cards[0].linked_conversation_ids.len(), WRITERS);
}
