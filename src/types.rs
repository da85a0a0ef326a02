//! Shared types used across modules
//!
//! Ledger messages and roles are read by the ledger, the learning pipeline
//! and the reply orchestrator, so they live here to avoid circular imports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single message in a conversation ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Older ledgers contain entries without a timestamp
    #[serde(default, with = "flexible_time", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(timestamp),
            usage: None,
        }
    }
}

/// Token accounting attached to generated replies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub model: String,
}

/// Author of a ledger message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Marketplace customer
    User,
    /// Automated reply
    Assistant,
    /// Operator reply sent from the internal chat
    Manager,
    /// Message authored by the marketplace account itself, usually the echo
    /// of an operator reply reported by the marketplace push channel
    #[serde(rename = "avito_owner")]
    ExternalOwner,
}

impl Role {
    /// Wire name used in the persisted ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Manager => "manager",
            Role::ExternalOwner => "avito_owner",
        }
    }

    /// Parse from the persisted wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "manager" => Some(Role::Manager),
            "avito_owner" | "external_owner" => Some(Role::ExternalOwner),
            _ => None,
        }
    }

    /// Operator-side roles close a customer exchange
    pub fn is_operator(&self) -> bool {
        matches!(self, Role::Manager | Role::ExternalOwner)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Serde helper for optional instants
///
/// Writes RFC 3339. Reads RFC 3339 or a naive `YYYY-MM-DDTHH:MM:SS[.f]`
/// string (taken as UTC); anything unparsable reads as `None`.
pub mod flexible_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => s.serialize_str(&ts.to_rfc3339()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        Ok(raw.as_deref().and_then(parse))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
