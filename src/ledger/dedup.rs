//! Cross-channel duplicate suppression
//!
//! The marketplace push channel and the operator chat both report operator
//! messages, and the push channel also echoes bot replies. A new entry is
//! dropped when it repeats the most recent entry from a role that the
//! incoming role may be an echo of.

use chrono::{DateTime, Duration, Utc};

use crate::types::{Message, Role};

/// Roles of the last entry that suppress an identical append as `role`
pub fn suppression_roles(role: Role) -> &'static [Role] {
    match role {
        Role::User => &[],
        Role::Assistant => &[Role::ExternalOwner, Role::Assistant],
        Role::Manager => &[Role::ExternalOwner, Role::Manager],
        Role::ExternalOwner => &[Role::Manager, Role::Assistant, Role::ExternalOwner],
    }
}

/// Collapse whitespace runs and lower-case
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whether appending `content` as `role` at `now` repeats `last`
pub fn is_duplicate(
    last: Option<&Message>,
    role: Role,
    content: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    let Some(last) = last else {
        return false;
    };
    if !suppression_roles(role).contains(&last.role) {
        return false;
    }
    if normalize(&last.content) != normalize(content) {
        return false;
    }
    match last.timestamp {
        None => true,
        Some(ts) => now.signed_duration_since(ts) <= window,
    }
}
