//! Support backend API: wire types and the HTTP client.
//!
//! The chat sync engine only talks to the backend through [`ChatBackend`], so tests and
//! alternative transports can stand in for [`BackendClient`].

mod client;
mod types;

use async_trait::async_trait;

pub use client::{ApiError, BackendClient, DEFAULT_BASE_URL};
pub use types::{
    Attachment, Author, Conversation, Customer, Document, Message, NewCustomer, SendResponse,
    PENDING_MESSAGE_ID,
};

/// Conversation and message operations the chat sync engine needs from the backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Conversations of a customer, newest first.
    async fn list_conversations(&self, customer_id: i64) -> Result<Vec<Conversation>, ApiError>;

    async fn create_conversation(
        &self,
        customer_id: i64,
        title: &str,
    ) -> Result<Conversation, ApiError>;

    async fn delete_conversation(&self, conversation_id: i64) -> Result<(), ApiError>;

    /// Full ordered message list of a conversation.
    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, ApiError>;

    /// Send an admin message (with optional attachments) and return the backend's reply.
    async fn send_message(
        &self,
        conversation_id: i64,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<SendResponse, ApiError>;
}
