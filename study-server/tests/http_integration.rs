//! HTTP integration tests for the study API
//!
//! The chat provider is a wiremock server speaking the chat-completions wire
//! format; requests go through the full router with Axum `oneshot`, carrying
//! the session cookie between calls like a browser would.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::json;
use study_core::{
    ChatBackend, ChatClientConfig, OpenAiChatClient, PasswordGate, StudyConfig, TermRecord,
    TermTable,
};
use study_server::http::{build_router, HttpState, SESSION_COOKIE};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> Arc<dyn ChatBackend> {
    let config = ChatClientConfig {
        api_key: "test-api-key".to_string(),
        base_url: String::new(),
        model: "gpt-4o".to_string(),
        temperature: 0.0,
        max_tokens: 500,
        frequency_penalty: 0.5,
        presence_penalty: 0.5,
        timeout: Duration::from_secs(5),
    };
    Arc::new(
        OpenAiChatClient::with_base_url(config, server.uri()).expect("Failed to create client"),
    )
}

fn biology() -> TermTable {
    TermTable::from_records([
        TermRecord::new("mitosis", "cell division producing two identical daughter cells"),
        TermRecord::new("meiosis", "division producing four haploid cells"),
    ])
}

fn make_app(server: &MockServer, gate: PasswordGate) -> Router {
    let mut config = StudyConfig::default();
    config.terms.default_path = format!("{}/../terms_template.csv", env!("CARGO_MANIFEST_DIR"));
    let state = HttpState::new(config, client_for(server), gate, biology());
    build_router(Arc::new(state))
}

async fn mount_reply(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": text}}]
        })))
        .mount(server)
        .await;
}

async fn mount_stream(server: &MockServer, fragments: &[&str]) {
    let mut body = String::new();
    for fragment in fragments {
        let chunk = json!({"choices": [{"delta": {"content": fragment}}]});
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    body.push_str("data: [DONE]\n\n");
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(server)
        .await;
}

/// A browser-like client: remembers the session cookie between requests.
struct Client {
    app: Router,
    cookie: Option<String>,
}

impl Client {
    fn new(app: Router) -> Self {
        Self { app, cookie: None }
    }

    async fn send(&mut self, method: &str, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
        self.send_with(method, uri, body, &[("content-type", "application/json")])
            .await
    }

    async fn send_with(
        &mut self,
        method: &str,
        uri: &str,
        body: Body,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, format!("{SESSION_COOKIE}={cookie}"));
        }
        let req = builder.body(body).unwrap();

        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        if let Some(set) = resp.headers().get(header::SET_COOKIE) {
            let set = set.to_str().unwrap();
            let pair = set.split(';').next().unwrap();
            let (name, value) = pair.split_once('=').unwrap();
            assert_eq!(name, SESSION_COOKIE);
            self.cookie = Some(value.to_string());
        }
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn json(&mut self, method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let (status, bytes) = self.send(method, uri, Body::from(body.to_string())).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get(&mut self, uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, bytes) = self.send("GET", uri, Body::empty()).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}

/// Parse an SSE body into `(event, data)` pairs.
fn sse_events(body: &[u8]) -> Vec<(String, serde_json::Value)> {
    let text = String::from_utf8(body.to_vec()).unwrap();
    text.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = Some(serde_json::from_str(v.trim()).unwrap());
                }
            }
            Some((event?, data?))
        })
        .collect()
}

// ===========================================================================
// Session & password gate
// ===========================================================================

#[tokio::test]
async fn test_session_cookie_issued_once() {
    let server = MockServer::start().await;
    let mut client = Client::new(make_app(&server, PasswordGate::disabled()));

    let (status, _) = client.get("/conversation").await;
    assert_eq!(status, StatusCode::OK);
    let first = client.cookie.clone().expect("session cookie set");

    client.get("/conversation").await;
    assert_eq!(client.cookie.as_deref(), Some(first.as_str()));
}

#[tokio::test]
async fn test_password_gate_flow() {
    let server = MockServer::start().await;
    let mut client = Client::new(make_app(&server, PasswordGate::new("letmein")));

    let (status, body) = client.json("POST", "/terms/pick", json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");

    let (status, body) = client
        .json("POST", "/auth", json!({"password": "nope"}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Password incorrect");

    let (status, _) = client
        .json("POST", "/auth", json!({"password": "letmein"}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = client.json("POST", "/terms/pick", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["term"].is_string());
}

#[tokio::test]
async fn test_authentication_does_not_leak_across_sessions() {
    let server = MockServer::start().await;
    let app = make_app(&server, PasswordGate::new("letmein"));
    let mut alice = Client::new(app.clone());
    let mut bob = Client::new(app);

    alice
        .json("POST", "/auth", json!({"password": "letmein"}))
        .await;
    let (status, _) = bob.get("/conversation").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = alice.get("/conversation").await;
    assert_eq!(status, StatusCode::OK);
}

// ===========================================================================
// Public endpoints
// ===========================================================================

#[tokio::test]
async fn test_public_endpoints_need_no_password() {
    let server = MockServer::start().await;
    let mut client = Client::new(make_app(&server, PasswordGate::new("letmein")));

    let (status, body) = client.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default_terms"], 2);

    let (status, body) = client.get("/version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["protocol"], "study/1");

    let (status, body) = client.get("/app").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["password_required"], true);
}

// ===========================================================================
// Chat
// ===========================================================================

#[tokio::test]
async fn test_pick_then_chat_whole_reply() {
    let server = MockServer::start().await;
    mount_reply(&server, "Good. Which phase comes first?").await;
    let mut client = Client::new(make_app(&server, PasswordGate::disabled()));

    let (_, picked) = client.json("POST", "/terms/pick", json!({})).await;
    let term = picked["term"].as_str().unwrap().to_string();

    let (status, body) = client
        .json("POST", "/chat", json!({"message": "It splits a cell in two"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "Good. Which phase comes first?");

    // The provider saw the term-specific system prompt followed by the message.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let messages = sent["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    assert!(messages[0]["content"].as_str().unwrap().contains(&term));
    assert_eq!(
        messages[1],
        json!({"role": "user", "content": "It splits a cell in two"})
    );

    let (_, convo) = client.get("/conversation").await;
    assert_eq!(convo["term"], term.as_str());
    let visible = convo["messages"].as_array().unwrap();
    assert_eq!(visible.len(), 2);
    assert_eq!(visible[1]["content"], "Good. Which phase comes first?");
}

#[tokio::test]
async fn test_chat_before_pick_uses_generic_prompt() {
    let server = MockServer::start().await;
    mount_reply(&server, "Happy to help. Pick a term first.").await;
    let mut client = Client::new(make_app(&server, PasswordGate::disabled()));

    let (status, _) = client
        .json("POST", "/chat", json!({"message": "hello"}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let requests = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(sent["messages"][0]["content"]
        .as_str()
        .unwrap()
        .contains("pick a course term"));
}

#[tokio::test]
async fn test_new_pick_discards_previous_transcript() {
    let server = MockServer::start().await;
    mount_reply(&server, "Tell me more.").await;
    let mut client = Client::new(make_app(&server, PasswordGate::disabled()));

    client.json("POST", "/terms/pick", json!({})).await;
    client
        .json("POST", "/chat", json!({"message": "first answer"}))
        .await;
    let (_, picked) = client.json("POST", "/terms/pick", json!({})).await;
    assert_eq!(picked["click_counter"], 2);

    let (_, convo) = client.get("/conversation").await;
    assert_eq!(convo["messages"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_chat_rejects_missing_message() {
    let server = MockServer::start().await;
    let mut client = Client::new(make_app(&server, PasswordGate::disabled()));

    let (status, body) = client.json("POST", "/chat", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "message field is required");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_provider_failure_surfaces_and_keeps_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached"}
        })))
        .mount(&server)
        .await;
    let mut client = Client::new(make_app(&server, PasswordGate::disabled()));

    client.json("POST", "/terms/pick", json!({})).await;
    let (status, body) = client
        .json("POST", "/chat", json!({"message": "answer"}))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("Rate limit reached"));

    let (_, convo) = client.get("/conversation").await;
    assert_eq!(convo["state"], "awaiting_response");
    let visible = convo["messages"].as_array().unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0]["role"], "user");
}

#[tokio::test]
async fn test_stream_delivers_deltas_then_done() {
    let server = MockServer::start().await;
    mount_stream(&server, &["Which ", "phase ", "comes first?"]).await;
    let mut client = Client::new(make_app(&server, PasswordGate::disabled()));

    client.json("POST", "/terms/pick", json!({})).await;
    let (status, body) = client
        .send(
            "POST",
            "/chat/stream",
            Body::from(json!({"message": "two daughter cells"}).to_string()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let events = sse_events(&body);
    let deltas: Vec<&str> = events
        .iter()
        .filter(|(name, _)| name == "delta")
        .map(|(_, data)| data["text"].as_str().unwrap())
        .collect();
    assert_eq!(deltas, vec!["Which ", "phase ", "comes first?"]);
    let (last_name, last_data) = events.last().unwrap();
    assert_eq!(last_name, "done");
    assert_eq!(last_data["reply"], "Which phase comes first?");

    let (_, convo) = client.get("/conversation").await;
    let visible = convo["messages"].as_array().unwrap();
    assert_eq!(visible.len(), 2);
    assert_eq!(visible[1]["content"], "Which phase comes first?");
}

#[tokio::test]
async fn test_stream_provider_error_ends_with_error_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;
    let mut client = Client::new(make_app(&server, PasswordGate::disabled()));

    let (status, body) = client
        .send(
            "POST",
            "/chat/stream",
            Body::from(json!({"message": "answer"}).to_string()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let events = sse_events(&body);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "error");
    assert!(events[0].1["error"]
        .as_str()
        .unwrap()
        .contains("upstream down"));
}

// ===========================================================================
// Term files
// ===========================================================================

#[tokio::test]
async fn test_upload_replaces_terms_for_this_session_only() {
    let server = MockServer::start().await;
    let app = make_app(&server, PasswordGate::disabled());
    let mut uploader = Client::new(app.clone());
    let mut other = Client::new(app);

    let (status, bytes) = uploader
        .send_with(
            "POST",
            "/terms/upload",
            Body::from("TERM,SCHEMA\nallele,a variant form of a gene\n"),
            &[("x-file-name", "genetics.csv")],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["rows"], 1);
    assert_eq!(body["file"], "genetics.csv");

    let (_, picked) = uploader.json("POST", "/terms/pick", json!({})).await;
    assert_eq!(picked["term"], "allele");

    let (_, picked) = other.json("POST", "/terms/pick", json!({})).await;
    assert_ne!(picked["term"], "allele");
}

#[tokio::test]
async fn test_upload_missing_columns_is_reported() {
    let server = MockServer::start().await;
    let mut client = Client::new(make_app(&server, PasswordGate::disabled()));

    let (status, bytes) = client
        .send_with(
            "POST",
            "/terms/upload",
            Body::from("WORD,MEANING\nallele,gene variant\n"),
            &[("x-file-name", "wrong.csv")],
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("An error occurred while loading the file"));

    let (_, picked) = client.json("POST", "/terms/pick", json!({})).await;
    assert!(picked["term"].is_null());
    assert_eq!(picked["message"], "Please click the button to begin");
}

#[tokio::test]
async fn test_removing_upload_falls_back_to_default_terms() {
    let server = MockServer::start().await;
    let mut client = Client::new(make_app(&server, PasswordGate::disabled()));

    client
        .send_with(
            "POST",
            "/terms/upload",
            Body::from("WORD\nallele\n"),
            &[("x-file-name", "wrong.csv")],
        )
        .await;
    let (_, picked) = client.json("POST", "/terms/pick", json!({})).await;
    assert!(picked["term"].is_null());

    let (status, body) = client.json("DELETE", "/terms/upload", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);

    let (_, picked) = client.json("POST", "/terms/pick", json!({})).await;
    let term = picked["term"].as_str().unwrap();
    assert!(term == "mitosis" || term == "meiosis");
}

#[tokio::test]
async fn test_upload_with_term_only_rows() {
    let server = MockServer::start().await;
    let mut client = Client::new(make_app(&server, PasswordGate::disabled()));

    let (status, bytes) = client
        .send_with(
            "POST",
            "/terms/upload",
            Body::from("TERM,SCHEMA\nallele\n"),
            &[("x-file-name", "mine.csv")],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["rows"], 1);

    let (_, picked) = client.json("POST", "/terms/pick", json!({})).await;
    assert_eq!(picked["term"], "allele");
}

#[tokio::test]
async fn test_template_download_is_csv_attachment() {
    let server = MockServer::start().await;
    let app = make_app(&server, PasswordGate::disabled());

    let req = Request::builder()
        .method("GET")
        .uri("/terms/template")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    assert!(resp.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("terms_template.csv"));

    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.starts_with("TERM,SCHEMA"));
}
