//! Optimistic placeholders and their reconciliation with server-confirmed messages.
//!
//! Each in-flight send owns exactly one placeholder, tagged with a correlation token.
//! Reconciliation matches on the token only, never on text.

use crate::api::Message;
use std::collections::HashSet;
use uuid::Uuid;

/// Token tying a placeholder to the send that created it.
pub type CorrelationId = Uuid;

/// An entry of the visible message list.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub message: Message,
    /// Set while the message is an unconfirmed placeholder.
    pub correlation: Option<CorrelationId>,
}

impl ChatEntry {
    pub fn confirmed(message: Message) -> Self {
        Self {
            message,
            correlation: None,
        }
    }

    pub fn pending(message: Message, correlation: CorrelationId) -> Self {
        Self {
            message,
            correlation: Some(correlation),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.correlation.is_some()
    }
}

fn position_of(entries: &[ChatEntry], token: CorrelationId) -> Option<usize> {
    entries.iter().position(|e| e.correlation == Some(token))
}

/// Remove the placeholder of one send. Returns whether it was still present.
pub fn remove_pending(entries: &mut Vec<ChatEntry>, token: CorrelationId) -> bool {
    match position_of(entries, token) {
        Some(i) => {
            entries.remove(i);
            true
        }
        None => false,
    }
}

/// Replace the placeholder of one send by the confirmed messages, in order.
///
/// Messages whose id is already listed (e.g. fetched by a concurrent load) are skipped.
/// When the placeholder is gone, the new messages go after the last confirmed entry.
/// Returns the messages actually inserted.
pub fn promote_pending(
    entries: &mut Vec<ChatEntry>,
    token: CorrelationId,
    confirmed: Vec<Message>,
) -> Vec<Message> {
    let mut seen: HashSet<i64> = entries
        .iter()
        .filter(|e| !e.is_pending())
        .map(|e| e.message.id)
        .collect();
    let fresh: Vec<Message> = confirmed
        .into_iter()
        .filter(|m| !m.is_pending() && seen.insert(m.id))
        .collect();
    let replacement = fresh.iter().cloned().map(ChatEntry::confirmed);
    match position_of(entries, token) {
        Some(i) => {
            entries.splice(i..=i, replacement);
        }
        None => {
            let at = entries
                .iter()
                .position(|e| e.is_pending())
                .unwrap_or(entries.len());
            entries.splice(at..at, replacement);
        }
    }
    fresh
}

/// New visible list after a successful load: the server list followed by the placeholders
/// of sends still in flight.
pub fn merge_server_list(entries: &[ChatEntry], server: Vec<Message>) -> Vec<ChatEntry> {
    let mut merged: Vec<ChatEntry> = server.into_iter().map(ChatEntry::confirmed).collect();
    merged.extend(entries.iter().filter(|e| e.is_pending()).cloned());
    merged
}
