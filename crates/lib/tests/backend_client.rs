//! Integration test: BackendClient against an axum mock backend bound to a free port.
//! Checks request paths, cache busting on message loads and multipart bodies.

use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use lib::api::{ApiError, Attachment, Author, BackendClient, ChatBackend, NewCustomer};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A multipart field as the mock received it.
#[derive(Debug, Clone)]
struct Part {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
}

/// One request as the mock received it.
#[derive(Debug, Clone, Default)]
struct Seen {
    path: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    json: Option<Value>,
    parts: Vec<Part>,
}

#[derive(Clone, Default)]
struct Mock {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Mock {
    fn record(&self, seen: Seen) {
        self.seen.lock().unwrap().push(seen);
    }

    fn last(&self, path: &str) -> Seen {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.path == path)
            .cloned()
            .unwrap_or_else(|| panic!("no request to {}", path))
    }
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect()
}

async fn read_parts(mut multipart: Multipart) -> Vec<Part> {
    let mut parts = Vec::new();
    while let Some(field) = multipart.next_field().await.expect("multipart field") {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.expect("field bytes").to_vec();
        parts.push(Part {
            name,
            file_name,
            content_type,
            data,
        });
    }
    parts
}

async fn list_customers(State(mock): State<Mock>) -> Json<Value> {
    mock.record(Seen {
        path: "/customers/".into(),
        ..Default::default()
    });
    Json(json!([
        {"id": 1, "full_name": "Ada Lovelace", "email": "ada@example.com", "title": "Engineer",
         "location": "London", "created_at": "2024-05-01T09:00:00Z"}
    ]))
}

async fn create_customer(State(mock): State<Mock>, Json(body): Json<Value>) -> Json<Value> {
    mock.record(Seen {
        path: "/customers/".into(),
        json: Some(body.clone()),
        ..Default::default()
    });
    let mut created = body;
    created["id"] = json!(7);
    Json(created)
}

async fn list_conversations(
    State(mock): State<Mock>,
    Path(customer_id): Path<i64>,
) -> Result<Json<Value>, (StatusCode, &'static str)> {
    mock.record(Seen {
        path: format!("/conversations/customer/{}", customer_id),
        ..Default::default()
    });
    if customer_id == 999 {
        return Err((StatusCode::OK, "this is not json"));
    }
    Ok(Json(json!([
        {"id": 12, "customer_id": customer_id, "title": "Refund", "external_thread_id": "t-12"},
        {"id": 11, "customer_id": customer_id, "title": "Onboarding", "external_thread_id": "t-11"}
    ])))
}

async fn create_conversation(State(mock): State<Mock>, Json(body): Json<Value>) -> Json<Value> {
    mock.record(Seen {
        path: "/conversations/".into(),
        json: Some(body.clone()),
        ..Default::default()
    });
    Json(json!({
        "id": 13,
        "customer_id": body["customer_id"],
        "title": body["title"],
        "external_thread_id": "t-13"
    }))
}

async fn delete_conversation(State(mock): State<Mock>, Path(id): Path<i64>) -> StatusCode {
    mock.record(Seen {
        path: format!("/conversations/{}", id),
        ..Default::default()
    });
    if id == 404 {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn list_messages(
    State(mock): State<Mock>,
    Path(id): Path<i64>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    mock.record(Seen {
        path: format!("/messages/conversation/{}", id),
        query,
        headers: header_map(&headers),
        ..Default::default()
    });
    Json(json!([
        {"id": 1, "conversation_id": id, "author": "admin", "text": "hi",
         "created_at": "2024-05-01T10:00:00.123456"},
        {"id": 2, "conversation_id": id, "author": "agent", "text": "hello!",
         "created_at": "not a date"}
    ]))
}

async fn send_message(State(mock): State<Mock>, Path(id): Path<i64>, req: Request) -> Json<Value> {
    let headers = header_map(req.headers());
    let is_multipart = headers
        .get("content-type")
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);
    let mut seen = Seen {
        path: format!("/chat/conversations/{}/messages", id),
        headers,
        ..Default::default()
    };
    let text = if is_multipart {
        let multipart = Multipart::from_request(req, &()).await.expect("multipart body");
        seen.parts = read_parts(multipart).await;
        seen.parts
            .iter()
            .find(|p| p.name == "message")
            .map(|p| String::from_utf8_lossy(&p.data).into_owned())
            .unwrap_or_default()
    } else {
        let Json(body) = Json::<Value>::from_request(req, &()).await.expect("json body");
        let text = body["message"].as_str().unwrap_or_default().to_string();
        seen.json = Some(body);
        text
    };
    mock.record(seen);
    Json(json!({
        "reply": format!("Echo: {}", text),
        "messages": [
            {"id": 101, "conversation_id": id, "author": "admin", "text": text},
            {"id": 102, "conversation_id": id, "author": "agent", "text": format!("Echo: {}", text)}
        ]
    }))
}

async fn upload_document(
    State(mock): State<Mock>,
    Query(query): Query<HashMap<String, String>>,
    multipart: Multipart,
) -> Json<Value> {
    let parts = read_parts(multipart).await;
    let customer_id: i64 = query
        .get("customer_id")
        .and_then(|c| c.parse().ok())
        .unwrap_or_default();
    let title = query.get("title").cloned().unwrap_or_default();
    mock.record(Seen {
        path: "/documents/upload".into(),
        query,
        parts,
        ..Default::default()
    });
    Json(json!({
        "id": 5,
        "customer_id": customer_id,
        "title": title,
        "url": "/uploads/5.pdf",
        "type": "application/pdf"
    }))
}

async fn start_mock() -> (BackendClient, Mock) {
    let mock = Mock::default();
    let app = Router::new()
        .route("/customers/", get(list_customers).post(create_customer))
        .route("/conversations/customer/:customer_id", get(list_conversations))
        .route("/conversations/", post(create_conversation))
        .route("/conversations/:id", delete(delete_conversation))
        .route("/messages/conversation/:id", get(list_messages))
        .route("/chat/conversations/:id/messages", post(send_message))
        .route("/documents/upload", post(upload_document))
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let client = BackendClient::new(Some(format!("http://{}/", addr)));
    (client, mock)
}

#[tokio::test]
async fn list_messages_busts_caches_and_reads_lenient_timestamps() {
    let (client, mock) = start_mock().await;

    let messages = client.list_messages(4).await.unwrap();

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].author, Author::Admin);
    assert_eq!(messages[1].author, Author::Agent);
    assert!(messages[0].created_at.is_some());
    assert!(messages[1].created_at.is_none());

    let seen = mock.last("/messages/conversation/4");
    let stamp: i64 = seen.query.get("_t").expect("_t query").parse().expect("numeric _t");
    assert!(stamp > 0);
    assert_eq!(seen.headers.get("cache-control").map(String::as_str), Some("no-cache"));
    assert_eq!(seen.headers.get("pragma").map(String::as_str), Some("no-cache"));
}

#[tokio::test]
async fn send_without_attachments_posts_json() {
    let (client, mock) = start_mock().await;

    let response = client.send_message(4, "hello", &[]).await.unwrap();

    let seen = mock.last("/chat/conversations/4/messages");
    assert_eq!(seen.json, Some(json!({ "message": "hello" })));
    assert!(seen.parts.is_empty());
    let confirmed = response.confirmed_messages().expect("messages");
    assert_eq!(confirmed.iter().map(|m| m.id).collect::<Vec<_>>(), vec![101, 102]);
    assert_eq!(response.reply_text().as_deref(), Some("Echo: hello"));
}

#[tokio::test]
async fn send_with_attachments_posts_multipart() {
    let (client, mock) = start_mock().await;
    let files = vec![
        Attachment::new("invoice.pdf", b"%PDF-1.4".to_vec()),
        Attachment::new("notes.txt", b"call back tomorrow".to_vec()),
    ];

    client.send_message(4, "see attached", &files).await.unwrap();

    let seen = mock.last("/chat/conversations/4/messages");
    assert!(seen.json.is_none());
    let message = seen.parts.iter().find(|p| p.name == "message").expect("message part");
    assert_eq!(message.data, b"see attached");
    let uploaded: Vec<&Part> = seen.parts.iter().filter(|p| p.name == "files").collect();
    assert_eq!(uploaded.len(), 2);
    assert_eq!(uploaded[0].file_name.as_deref(), Some("invoice.pdf"));
    assert_eq!(uploaded[0].content_type.as_deref(), Some("application/pdf"));
    assert_eq!(uploaded[0].data, b"%PDF-1.4");
    assert_eq!(uploaded[1].file_name.as_deref(), Some("notes.txt"));
    assert_eq!(uploaded[1].content_type.as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn conversation_endpoints() {
    let (client, mock) = start_mock().await;

    let list = client.list_conversations(3).await.unwrap();
    assert_eq!(list.iter().map(|c| c.id).collect::<Vec<_>>(), vec![12, 11]);
    assert_eq!(list[0].external_thread_id, "t-12");

    let created = client.create_conversation(3, "Billing").await.unwrap();
    assert_eq!(created.id, 13);
    assert_eq!(created.title, "Billing");
    assert_eq!(
        mock.last("/conversations/").json,
        Some(json!({ "customer_id": 3, "title": "Billing" }))
    );

    client.delete_conversation(13).await.unwrap();
    mock.last("/conversations/13");

    let err = client.delete_conversation(404).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 404, .. }));
}

#[tokio::test]
async fn unexpected_body_is_a_decode_error() {
    let (client, _mock) = start_mock().await;

    let err = client.list_conversations(999).await.unwrap_err();

    assert!(matches!(err, ApiError::Decode(_)), "got {:?}", err);
}

#[tokio::test]
async fn customer_endpoints() {
    let (client, mock) = start_mock().await;

    let customers = client.list_customers().await.unwrap();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].full_name, "Ada Lovelace");
    assert!(customers[0].created_at.is_some());

    let created = client
        .create_customer(&NewCustomer {
            full_name: "Grace Hopper".into(),
            email: "grace@example.com".into(),
            title: None,
            location: Some("Arlington".into()),
        })
        .await
        .unwrap();
    assert_eq!(created.id, 7);
    assert_eq!(created.location.as_deref(), Some("Arlington"));
    let body = mock.last("/customers/").json.expect("json body");
    assert_eq!(body["email"], "grace@example.com");
}

#[tokio::test]
async fn upload_document_sends_query_and_file() {
    let (client, mock) = start_mock().await;

    let doc = client
        .upload_document(3, "Contract", Attachment::new("contract.pdf", b"%PDF".to_vec()))
        .await
        .unwrap();

    assert_eq!(doc.id, 5);
    assert_eq!(doc.title, "Contract");
    assert_eq!(doc.typ.as_deref(), Some("application/pdf"));
    let seen = mock.last("/documents/upload");
    assert_eq!(seen.query.get("customer_id").map(String::as_str), Some("3"));
    assert_eq!(seen.query.get("title").map(String::as_str), Some("Contract"));
    assert_eq!(seen.parts.len(), 1);
    assert_eq!(seen.parts[0].name, "file");
    assert_eq!(seen.parts[0].file_name.as_deref(), Some("contract.pdf"));
}

#[tokio::test]
async fn unreachable_backend_is_a_request_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    let port = listener.local_addr().expect("local_addr").port();
    drop(listener);
    let client = BackendClient::new(Some(format!("http://127.0.0.1:{}", port)));

    let err = client.list_messages(1).await.unwrap_err();

    assert!(matches!(err, ApiError::Request(_)));
}
