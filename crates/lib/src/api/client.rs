//! HTTP client for the support backend (http://localhost:8000 by default).
//! Covers customers, conversations, messages, chat sends and document uploads.

use crate::api::types::{
    Attachment, Conversation, Customer, Document, Message, NewConversation, NewCustomer,
    SendResponse,
};
use crate::api::ChatBackend;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Client for the support backend HTTP API.
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected backend response: {0}")]
    Decode(String),
}

impl BackendClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET /customers/
    pub async fn list_customers(&self) -> Result<Vec<Customer>, ApiError> {
        let res = self.client.get(self.url("/customers/")).send().await?;
        decode(res).await
    }

    /// POST /customers/
    pub async fn create_customer(&self, customer: &NewCustomer) -> Result<Customer, ApiError> {
        let res = self
            .client
            .post(self.url("/customers/"))
            .json(customer)
            .send()
            .await?;
        decode(res).await
    }

    /// POST /documents/upload: multipart `file`, customer id and title in the query.
    pub async fn upload_document(
        &self,
        customer_id: i64,
        title: &str,
        file: Attachment,
    ) -> Result<Document, ApiError> {
        let form = Form::new().part("file", attachment_part(file)?);
        let res = self
            .client
            .post(self.url("/documents/upload"))
            .query(&[("customer_id", customer_id.to_string()), ("title", title.to_string())])
            .multipart(form)
            .send()
            .await?;
        decode(res).await
    }
}

#[async_trait]
impl ChatBackend for BackendClient {
    async fn list_conversations(&self, customer_id: i64) -> Result<Vec<Conversation>, ApiError> {
        let url = self.url(&format!("/conversations/customer/{}", customer_id));
        let res = self.client.get(url).send().await?;
        decode(res).await
    }

    async fn create_conversation(
        &self,
        customer_id: i64,
        title: &str,
    ) -> Result<Conversation, ApiError> {
        let res = self
            .client
            .post(self.url("/conversations/"))
            .json(&NewConversation { customer_id, title })
            .send()
            .await?;
        decode(res).await
    }

    async fn delete_conversation(&self, conversation_id: i64) -> Result<(), ApiError> {
        let url = self.url(&format!("/conversations/{}", conversation_id));
        let res = self.client.delete(url).send().await?;
        check_status(res).await.map(|_| ())
    }

    /// Cache-busted with a timestamp query and no-cache headers so proxies never serve a stale list.
    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, ApiError> {
        let url = self.url(&format!("/messages/conversation/{}", conversation_id));
        let stamp = chrono::Utc::now().timestamp_millis().to_string();
        let res = self
            .client
            .get(url)
            .query(&[("_t", stamp)])
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::PRAGMA, "no-cache")
            .send()
            .await?;
        decode(res).await
    }

    async fn send_message(
        &self,
        conversation_id: i64,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<SendResponse, ApiError> {
        let url = self.url(&format!("/chat/conversations/{}/messages", conversation_id));
        let req = if attachments.is_empty() {
            self.client
                .post(url)
                .json(&serde_json::json!({ "message": text }))
        } else {
            let mut form = Form::new().text("message", text.to_string());
            for file in attachments {
                form = form.part("files", attachment_part(file.clone())?);
            }
            self.client.post(url).multipart(form)
        };
        let res = req.send().await?;
        decode(res).await
    }
}

fn attachment_part(file: Attachment) -> Result<Part, ApiError> {
    Part::bytes(file.bytes)
        .file_name(file.file_name)
        .mime_str(&file.content_type)
        .map_err(ApiError::Request)
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

async fn decode<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, ApiError> {
    let res = check_status(res).await?;
    let bytes = res.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_and_trims() {
        assert_eq!(BackendClient::new(None).base_url(), DEFAULT_BASE_URL);
        assert_eq!(
            BackendClient::new(Some("http://api.local:9000/".into())).base_url(),
            "http://api.local:9000"
        );
        assert_eq!(BackendClient::new(Some("  ".into())).base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn status_error_mentions_code() {
        let err = ApiError::Status {
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "backend returned 502: bad gateway");
    }
}
