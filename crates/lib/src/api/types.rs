//! Wire types for the support backend (customers, conversations, messages, documents).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Id used by a message that has not been confirmed by the backend yet.
pub const PENDING_MESSAGE_ID: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of `POST /customers/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCustomer {
    pub full_name: String,
    pub email: String,
    pub title: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub customer_id: i64,
    pub title: String,
    #[serde(default)]
    pub external_thread_id: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct NewConversation<'a> {
    pub customer_id: i64,
    pub title: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    Admin,
    Agent,
}

impl Author {
    pub fn as_str(self) -> &'static str {
        match self {
            Author::Admin => "admin",
            Author::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub author: Author,
    pub text: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Locally synthesized admin message shown before the backend confirms it.
    pub fn pending(conversation_id: i64, text: impl Into<String>) -> Self {
        Self {
            id: PENDING_MESSAGE_ID,
            conversation_id,
            author: Author::Admin,
            text: text.into(),
            created_at: Some(Utc::now()),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id == PENDING_MESSAGE_ID
    }
}

/// Response of `POST /chat/conversations/{id}/messages`.
///
/// Backends differ in shape: some return the stored exchange under `messages`, some a
/// single stored `message` object, others only the reply text under `reply`,
/// `message` or `content`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub reply: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    /// Kept raw: some backends list agent-framework entries (`{type, content}`) here
    /// instead of stored messages.
    #[serde(default)]
    pub messages: Option<serde_json::Value>,
}

impl SendResponse {
    /// Authoritative messages for the exchange, if the backend returned any.
    /// A `messages` array that is empty or not made of stored messages yields `None`.
    pub fn confirmed_messages(&self) -> Option<Vec<Message>> {
        if let Some(raw) = &self.messages {
            return serde_json::from_value::<Vec<Message>>(raw.clone())
                .ok()
                .filter(|messages| !messages.is_empty());
        }
        let single = self
            .message
            .as_ref()
            .filter(|v| v.is_object())
            .and_then(|v| serde_json::from_value::<Message>(v.clone()).ok())?;
        Some(vec![single])
    }

    /// Reply text: first string among `reply`, `message`, `content`.
    pub fn reply_text(&self) -> Option<String> {
        [&self.reply, &self.message, &self.content]
            .into_iter()
            .flatten()
            .find_map(|v| v.as_str())
            .map(|s| s.to_string())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub customer_id: i64,
    pub title: String,
    pub url: String,
    #[serde(default, rename = "type")]
    pub typ: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A file sent along with a message or uploaded as a customer document.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = guess_content_type(&file_name).to_string();
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    /// Read a local file into an attachment.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Self::new(file_name, bytes))
    }
}

/// Accepts RFC 3339 timestamps and the naive `YYYY-MM-DDTHH:MM:SS[.f]` form some databases
/// emit (read as UTC). Anything else becomes `None` instead of failing the whole record.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }))
}

fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}
