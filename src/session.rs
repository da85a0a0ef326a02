//! Session gate - decides per conversation whether the bot may answer
//!
//! States are evaluated lazily: an expired cooldown is only noticed (and
//! latched back to `Active`) when `can_reply` is queried.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Reply permission state of one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// The bot handed off; only an operator action clears this
    WaitingManager,
    Cooldown { until: DateTime<Utc> },
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Active => write!(f, "active"),
            SessionState::WaitingManager => write!(f, "waiting_manager"),
            SessionState::Cooldown { until } => write!(f, "cooldown until {}", until.to_rfc3339()),
        }
    }
}

/// In-memory per-conversation state machine
pub struct SessionGate {
    sessions: Mutex<HashMap<String, SessionState>>,
    default_cooldown_minutes: i64,
}

impl SessionGate {
    pub fn new(default_cooldown_minutes: i64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            default_cooldown_minutes: if default_cooldown_minutes > 0 {
                default_cooldown_minutes
            } else {
                15
            },
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.session.cooldown_minutes)
    }

    /// Pause replies until an operator clears the conversation
    pub async fn set_waiting_manager(&self, conversation_id: &str) {
        if conversation_id.is_empty() {
            warn!("set_waiting_manager called with empty conversation id");
            return;
        }
        self.sessions
            .lock()
            .await
            .insert(conversation_id.to_string(), SessionState::WaitingManager);
        info!("Session {} is waiting for a manager", conversation_id);
    }

    /// Pause replies for `minutes`; `None` or a non-positive value uses the default
    pub async fn set_cooldown(&self, conversation_id: &str, minutes: Option<i64>) {
        self.set_cooldown_at(conversation_id, minutes, Utc::now()).await
    }

    pub async fn set_cooldown_at(&self, conversation_id: &str, minutes: Option<i64>, now: DateTime<Utc>) {
        if conversation_id.is_empty() {
            warn!("set_cooldown called with empty conversation id");
            return;
        }
        let minutes = match minutes {
            Some(m) if m > 0 => m,
            _ => self.default_cooldown_minutes,
        };
        let until = now + Duration::minutes(minutes);
        self.sessions
            .lock()
            .await
            .insert(conversation_id.to_string(), SessionState::Cooldown { until });
        info!("Session {} in cooldown for {} minutes", conversation_id, minutes);
    }

    /// Return the conversation to `Active`
    pub async fn clear(&self, conversation_id: &str) {
        if self.sessions.lock().await.remove(conversation_id).is_some() {
            debug!("Session {} cleared", conversation_id);
        }
    }

    pub async fn state(&self, conversation_id: &str) -> SessionState {
        self.sessions
            .lock()
            .await
            .get(conversation_id)
            .copied()
            .unwrap_or(SessionState::Active)
    }

    pub async fn can_reply(&self, conversation_id: &str) -> bool {
        self.can_reply_at(conversation_id, Utc::now()).await
    }

    /// Evaluate the gate at `now`, latching an expired cooldown to `Active`
    pub async fn can_reply_at(&self, conversation_id: &str, now: DateTime<Utc>) -> bool {
        if conversation_id.is_empty() {
            warn!("can_reply called with empty conversation id");
            return true;
        }
        let mut sessions = self.sessions.lock().await;
        match sessions.get(conversation_id).copied() {
            None | Some(SessionState::Active) => true,
            Some(SessionState::WaitingManager) => false,
            Some(SessionState::Cooldown { until }) => {
                if now > until {
                    sessions.remove(conversation_id);
                    debug!("Cooldown expired for {}", conversation_id);
                    true
                } else {
                    false
                }
            }
        }
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new(15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cooldown_expires_lazily() {
        let gate = SessionGate::default();
        let start = Utc::now();
        gate.set_cooldown_at("c1", Some(15), start).await;
        assert!(!gate.can_reply_at("c1", start).await);

        let later = start + Duration::minutes(16);
        assert!(gate.can_reply_at("c1", later).await);
        assert_eq!(gate.state("c1").await, SessionState::Active);
        assert!(gate.can_reply_at("c1", later).await);
    }

    #[tokio::test]
    async fn test_waiting_manager_never_expires() {
        let gate = SessionGate::default();
        gate.set_waiting_manager("c1").await;
        assert!(!gate.can_reply_at("c1", Utc::now() + Duration::days(30)).await);
        gate.clear("c1").await;
        assert!(gate.can_reply("c1").await);
    }

    #[tokio::test]
    async fn test_non_positive_minutes_use_default() {
        let gate = SessionGate::new(10);
        let start = Utc::now();
        gate.set_cooldown_at("c1", Some(-5), start).await;
        assert_eq!(
            gate.state("c1").await,
            SessionState::Cooldown { until: start + Duration::minutes(10) }
        );
    }

    #[tokio::test]
    async fn test_from_config_uses_configured_cooldown() {
        let mut config = Config::default();
        config.session.cooldown_minutes = 5;
        let gate = SessionGate::from_config(&config);
        let start = Utc::now();
        gate.set_cooldown_at("c1", None, start).await;
        assert!(gate.can_reply_at("c1", start + Duration::minutes(6)).await);
    }

    #[tokio::test]
    async fn test_empty_id_is_ignored() {
        let gate = SessionGate::default();
        gate.set_waiting_manager("").await;
        assert!(gate.can_reply("").await);
    }

    #[tokio::test]
    async fn test_cooldown_overrides_waiting() {
        let gate = SessionGate::default();
        let start = Utc::now();
        gate.set_waiting_manager("c1").await;
        gate.set_cooldown_at("c1", None, start).await;
        assert!(gate.can_reply_at("c1", start + Duration::minutes(16)).await);
    }
}
