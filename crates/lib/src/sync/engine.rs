//! Chat sync engine: the selected conversation's message list, kept consistent with the backend.
//!
//! State lives behind one lock that is never held across a backend call. Results of
//! asynchronous work are applied only if the selection epoch they started under is still
//! current, so a late response for a deselected conversation is dropped.

use crate::api::{ApiError, Attachment, Author, ChatBackend, Conversation, Message};
use crate::config::Config;
use crate::store::{KeyValueStore, MessageHistory};
use crate::sync::pending::{self, ChatEntry};
use crate::sync::retry::RetryPolicy;
use crate::sync::typing::{TypingAnimator, TypingFrame};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("message is empty and has no attachments")]
    EmptyMessage,
    #[error("no customer selected")]
    NoCustomer,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Result of a message load. Failures are reported here, never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The server list (this many messages) is now visible.
    Applied(usize),
    /// The conversation is no longer (or was never) selected; nothing was applied.
    Stale,
    /// Every attempt failed; the visible list was cleared.
    Failed,
}

/// Result of a successful send.
#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    /// Messages the backend returned for this exchange (empty when it returned none).
    pub confirmed: Vec<Message>,
    /// Reply text, when the backend sent one.
    pub reply: Option<String>,
    /// True when the list had to be reloaded because the response carried no messages.
    pub resynced: bool,
}

#[derive(Default)]
struct SyncState {
    customer: Option<i64>,
    conversations: Vec<Conversation>,
    selected: Option<i64>,
    /// Bumped on every selection change.
    epoch: u64,
    entries: Vec<ChatEntry>,
}

impl SyncState {
    fn is_current(&self, conversation_id: i64, epoch: u64) -> bool {
        self.epoch == epoch && self.selected == Some(conversation_id)
    }

    fn confirmed_ids(&self) -> HashSet<i64> {
        self.entries
            .iter()
            .filter(|e| !e.is_pending())
            .map(|e| e.message.id)
            .collect()
    }

    fn messages(&self) -> Vec<Message> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    /// Switch the selection; the list is replaced by `entries` (hydrated history or nothing).
    fn select(&mut self, conversation_id: Option<i64>, entries: Vec<ChatEntry>) {
        self.selected = conversation_id;
        self.epoch += 1;
        self.entries = entries;
    }
}

/// Owns the active customer's conversations and the selected conversation's messages.
pub struct ChatSyncEngine {
    backend: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
    history: Option<MessageHistory>,
    typing: TypingAnimator,
    state: RwLock<SyncState>,
}

impl ChatSyncEngine {
    pub fn new(backend: Arc<dyn ChatBackend>, config: &Config) -> Self {
        Self {
            backend,
            retry: RetryPolicy::from_config(&config.sync),
            history: None,
            typing: TypingAnimator::new(config.typing.clone()),
            state: RwLock::new(SyncState::default()),
        }
    }

    /// Persist confirmed messages in `store` and show them instantly when a conversation is selected.
    pub fn with_history(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.history = Some(MessageHistory::new(store));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn customer(&self) -> Option<i64> {
        self.state.read().await.customer
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.read().await.conversations.clone()
    }

    pub async fn selected(&self) -> Option<i64> {
        self.state.read().await.selected
    }

    /// Visible messages of the selected conversation, placeholders included.
    pub async fn messages(&self) -> Vec<Message> {
        self.state.read().await.messages()
    }

    pub async fn entries(&self) -> Vec<ChatEntry> {
        self.state.read().await.entries.clone()
    }

    /// Typing frames for the most recent agent reply.
    pub fn typing(&self) -> watch::Receiver<Option<TypingFrame>> {
        self.typing.subscribe()
    }

    /// Act for another customer: forget the current conversations and load theirs.
    pub async fn set_customer(&self, customer_id: i64) -> Result<(), SyncError> {
        {
            let mut s = self.state.write().await;
            s.customer = Some(customer_id);
            s.conversations.clear();
            s.select(None, Vec::new());
        }
        self.typing.cancel();
        log::info!("acting for customer {}", customer_id);
        self.refresh_conversations().await
    }

    /// Reload the customer's conversations. The selection is kept if it still exists,
    /// otherwise the first conversation (or none) is selected.
    pub async fn refresh_conversations(&self) -> Result<(), SyncError> {
        let customer = self.customer().await.ok_or(SyncError::NoCustomer)?;
        let list = self.backend.list_conversations(customer).await?;
        let reselect = {
            let mut s = self.state.write().await;
            if s.customer != Some(customer) {
                log::debug!("dropping conversation list of previous customer {}", customer);
                return Ok(());
            }
            s.conversations = list;
            let still_there = s
                .selected
                .map(|id| s.conversations.iter().any(|c| c.id == id))
                .unwrap_or(false);
            let first = s.conversations.first().map(|c| c.id);
            if still_there || first == s.selected {
                None
            } else {
                Some(first)
            }
        };
        if let Some(next) = reselect {
            self.select_conversation(next).await;
        }
        Ok(())
    }

    /// Select a conversation (or none). The list is cleared immediately (then filled from
    /// local history when available) and the conversation's messages are loaded.
    pub async fn select_conversation(&self, conversation_id: Option<i64>) -> Option<LoadOutcome> {
        self.typing.cancel();
        let hydrated: Vec<ChatEntry> = match (conversation_id, &self.history) {
            (Some(id), Some(history)) => history.load(id).into_iter().map(ChatEntry::confirmed).collect(),
            _ => Vec::new(),
        };
        {
            let mut s = self.state.write().await;
            s.select(conversation_id, hydrated);
        }
        log::debug!("selected conversation {:?}", conversation_id);
        match conversation_id {
            Some(id) => Some(self.load_messages(id).await),
            None => None,
        }
    }

    /// Fetch the conversation's messages with bounded exponential backoff and show them.
    ///
    /// Does nothing for a conversation that is not selected. Gives up early if the
    /// selection changes between attempts. When every attempt fails the list is cleared
    /// (placeholders of sends still in flight stay) and the failure is logged.
    pub async fn load_messages(&self, conversation_id: i64) -> LoadOutcome {
        let epoch = {
            let s = self.state.read().await;
            if s.selected != Some(conversation_id) {
                log::debug!("not loading conversation {}: not selected", conversation_id);
                return LoadOutcome::Stale;
            }
            s.epoch
        };

        let mut attempt = 0;
        let result = loop {
            match self.backend.list_messages(conversation_id).await {
                Ok(messages) => break Ok(messages),
                Err(e) => match self.retry.delay_after(attempt) {
                    Some(delay) => {
                        log::debug!(
                            "loading conversation {} failed (attempt {}/{}): {}; retrying in {:?}",
                            conversation_id,
                            attempt + 1,
                            self.retry.attempts(),
                            e,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        if !self.state.read().await.is_current(conversation_id, epoch) {
                            return LoadOutcome::Stale;
                        }
                        attempt += 1;
                    }
                    None => break Err(e),
                },
            }
        };

        let saved = {
            let mut s = self.state.write().await;
            if !s.is_current(conversation_id, epoch) {
                log::debug!("discarding stale load of conversation {}", conversation_id);
                return LoadOutcome::Stale;
            }
            match result {
                Ok(messages) => {
                    let count = messages.len();
                    s.entries = pending::merge_server_list(&s.entries, messages);
                    Ok((count, s.messages()))
                }
                Err(e) => {
                    s.entries.retain(|entry| entry.is_pending());
                    Err(e)
                }
            }
        };
        match saved {
            Ok((count, messages)) => {
                if let Some(history) = &self.history {
                    history.save(conversation_id, &messages);
                }
                LoadOutcome::Applied(count)
            }
            Err(e) => {
                log::warn!(
                    "loading conversation {} failed after {} attempts: {}",
                    conversation_id,
                    self.retry.attempts(),
                    e
                );
                LoadOutcome::Failed
            }
        }
    }

    /// Send an admin message, showing it optimistically until the backend confirms it.
    ///
    /// On failure the placeholder is rolled back and the error returned; sends are never
    /// retried. On success the placeholder is replaced by the returned messages, or, when the
    /// backend returned none, removed and the list reloaded.
    pub async fn send_message(
        &self,
        conversation_id: i64,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<SendOutcome, SyncError> {
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let token = uuid::Uuid::new_v4();
        {
            let mut s = self.state.write().await;
            if s.selected == Some(conversation_id) {
                s.entries.push(ChatEntry::pending(
                    Message::pending(conversation_id, text),
                    token,
                ));
            }
        }

        let response = match self
            .backend
            .send_message(conversation_id, text, &attachments)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                pending::remove_pending(&mut self.state.write().await.entries, token);
                log::warn!("sending to conversation {} failed: {}", conversation_id, e);
                return Err(e.into());
            }
        };
        let reply = response.reply_text();

        if let Some(confirmed) = response.confirmed_messages() {
            let promoted = {
                let mut s = self.state.write().await;
                if s.selected == Some(conversation_id) {
                    let inserted = pending::promote_pending(&mut s.entries, token, confirmed.clone());
                    Some((inserted, s.messages()))
                } else {
                    None
                }
            };
            if let Some((inserted, messages)) = promoted {
                if let Some(history) = &self.history {
                    history.save(conversation_id, &messages);
                }
                self.reveal_latest_agent(&inserted);
            }
            return Ok(SendOutcome {
                confirmed,
                reply,
                resynced: false,
            });
        }

        log::debug!(
            "send to conversation {} returned no messages; reloading",
            conversation_id
        );
        let known = {
            let mut s = self.state.write().await;
            pending::remove_pending(&mut s.entries, token);
            s.confirmed_ids()
        };
        let outcome = self.load_messages(conversation_id).await;
        let resynced = matches!(outcome, LoadOutcome::Applied(_));
        if resynced {
            let arrived: Vec<Message> = self
                .messages()
                .await
                .into_iter()
                .filter(|m| !m.is_pending() && !known.contains(&m.id))
                .collect();
            self.reveal_latest_agent(&arrived);
        }
        Ok(SendOutcome {
            confirmed: Vec::new(),
            reply,
            resynced,
        })
    }

    /// Create a conversation for the active customer and select it.
    /// A blank title becomes `Conversation {n+1}`, n being the current conversation count.
    pub async fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, SyncError> {
        let (customer, count) = {
            let s = self.state.read().await;
            (s.customer.ok_or(SyncError::NoCustomer)?, s.conversations.len())
        };
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Conversation {}", count + 1));
        let created = self.backend.create_conversation(customer, &title).await?;
        log::info!("created conversation {} ({})", created.id, created.title);
        let still_customer = {
            let mut s = self.state.write().await;
            if s.customer == Some(customer) {
                s.conversations.retain(|c| c.id != created.id);
                s.conversations.insert(0, created.clone());
                true
            } else {
                false
            }
        };
        if still_customer {
            self.select_conversation(Some(created.id)).await;
        }
        Ok(created)
    }

    /// Delete a conversation. If it was selected, the first remaining conversation (or none)
    /// is selected and the message list cleared before the replacement loads.
    /// With history enabled the list is replaced by the replacement's own cached messages
    /// instead of being left empty; nothing of the deleted conversation remains either way.
    pub async fn delete_conversation(&self, conversation_id: i64) -> Result<(), SyncError> {
        self.backend.delete_conversation(conversation_id).await?;
        if let Some(history) = &self.history {
            history.forget(conversation_id);
        }
        log::info!("deleted conversation {}", conversation_id);
        let replacement = {
            let mut s = self.state.write().await;
            s.conversations.retain(|c| c.id != conversation_id);
            if s.selected == Some(conversation_id) {
                Some(s.conversations.first().map(|c| c.id))
            } else {
                None
            }
        };
        if let Some(next) = replacement {
            self.select_conversation(next).await;
        }
        Ok(())
    }

    fn reveal_latest_agent(&self, arrived: &[Message]) {
        if let Some(latest) = arrived.iter().rev().find(|m| m.author == Author::Agent) {
            self.typing.animate(latest);
        }
    }
}
