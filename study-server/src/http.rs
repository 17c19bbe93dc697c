//! Study HTTP API
//!
//! Axum-based HTTP server exposing the study session over JSON and
//! Server-Sent Events. Every user action is its own endpoint; the session is
//! identified by an http-only cookie and created on first contact.
//!
//! Architecture: each endpoint has a thin axum handler that resolves and locks
//! the session, then delegates to an inner function that is directly testable
//! without axum dispatch machinery.
//!
//! Endpoints:
//! - `GET /health`: health check
//! - `GET /version`: server version info
//! - `GET /app`: titles, instructions and resource links
//! - `POST /auth`: verify the shared password for this session
//! - `POST /terms/pick`: pick a random term and restart the conversation
//! - `POST /terms/upload`: replace this session's terms with an uploaded CSV
//! - `DELETE /terms/upload`: drop the upload and go back to the default terms
//! - `GET /terms/template`: download the default term file
//! - `GET /conversation`: visible transcript and selection
//! - `POST /chat`: send a message, wait for the whole reply
//! - `POST /chat/stream`: send a message, receive the reply as SSE

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use bytes::Bytes;
use futures::stream;
use serde::Deserialize;
use study_core::config::TermsConfig;
use study_core::terms::{self, TermSource, TermsError};
use study_core::{
    receive_assistant, ChatBackend, ChatClientConfig, OpenAiChatClient, PasswordGate,
    PromptTemplates, RelayError, ResponseMode, StudyConfig, StudyError, StudySession, TermTable,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::sessions::{SessionHandle, SessionStore};

pub const SESSION_COOKIE: &str = "study_session";
pub const TEMPLATE_FILE_NAME: &str = "terms_template.csv";
const BEGIN_MESSAGE: &str = "Please click the button to begin";

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub config: StudyConfig,
    pub sessions: Arc<SessionStore>,
    pub default_terms: Arc<TermTable>,
    pub templates: PromptTemplates,
    pub gate: PasswordGate,
    pub backend: Arc<dyn ChatBackend>,
}

impl HttpState {
    pub fn new(
        config: StudyConfig,
        backend: Arc<dyn ChatBackend>,
        gate: PasswordGate,
        default_terms: TermTable,
    ) -> Self {
        let templates = PromptTemplates::from(&config.prompts);
        Self {
            config,
            sessions: Arc::new(SessionStore::new()),
            default_terms: Arc::new(default_terms),
            templates,
            gate,
            backend,
        }
    }

    /// Wire up the real chat client, password gate and default term table.
    pub fn from_config(config: StudyConfig) -> Result<Self, StudyError> {
        let client_config = ChatClientConfig::from_config(&config.chat)?;
        let backend: Arc<dyn ChatBackend> = Arc::new(OpenAiChatClient::new(client_config)?);
        let gate = PasswordGate::from_config(&config.auth)?;
        let default_terms = load_default_terms(&config.terms);
        Ok(Self::new(config, backend, gate, default_terms))
    }
}

/// Load the bundled term file. A broken file is reported and replaced by an
/// empty table so the service still starts.
pub fn load_default_terms(config: &TermsConfig) -> TermTable {
    match terms::load(&TermSource::File(config.resolved_default_path())) {
        Ok(table) => table,
        Err(e) => {
            tracing::error!(error = %e, "Default term file unusable, starting with no terms");
            TermTable::empty()
        }
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/app", get(app_handler))
        .route("/auth", post(auth_handler))
        .route("/terms/pick", post(pick_handler))
        .route(
            "/terms/upload",
            post(upload_handler).delete(clear_upload_handler),
        )
        .route("/terms/template", get(template_handler))
        .route("/conversation", get(conversation_handler))
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Study HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct AuthRequest {
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChatRequest {
    pub message: Option<String>,
}

pub fn error_json(msg: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "error": msg.into(),
        "status": "error",
    })
}

fn unauthorized() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::UNAUTHORIZED,
        error_json("password required for this session"),
    )
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": state.sessions.len().await,
            "default_terms": state.default_terms.len(),
            "backend": state.backend.name(),
        }),
    )
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "study/1",
    })
}

pub fn app_inner(config: &StudyConfig) -> serde_json::Value {
    serde_json::json!({
        "title": config.app.title,
        "author": config.app.author,
        "instructions": config.app.instructions,
        "warning_message": config.app.warning_message,
        "resources": config.app.resources,
        "password_required": config.auth.enabled,
    })
}

pub fn auth_inner(
    state: &HttpState,
    session: &mut StudySession,
    req: AuthRequest,
) -> (StatusCode, serde_json::Value) {
    let password = match req.password {
        Some(p) => p,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                error_json("password field is required"),
            )
        }
    };

    session.touch();
    if session.authenticate(&state.gate, &password) {
        (StatusCode::OK, serde_json::json!({"authenticated": true}))
    } else {
        (StatusCode::UNAUTHORIZED, error_json("Password incorrect"))
    }
}

pub fn pick_inner(state: &HttpState, session: &mut StudySession) -> (StatusCode, serde_json::Value) {
    if !session.is_authorized(&state.gate) {
        return unauthorized();
    }
    session.touch();

    let picked = session
        .pick_term(
            &state.default_terms,
            &state.templates,
            state.config.session.seed_strategy,
        )
        .map(|record| record.term.clone());
    let click_counter = session.selection.click_counter;

    match picked {
        Some(term) => (
            StatusCode::OK,
            serde_json::json!({"term": term, "click_counter": click_counter}),
        ),
        None => (
            StatusCode::OK,
            serde_json::json!({
                "term": null,
                "click_counter": click_counter,
                "message": BEGIN_MESSAGE,
            }),
        ),
    }
}

pub fn upload_inner(
    state: &HttpState,
    session: &mut StudySession,
    file_name: &str,
    body: Vec<u8>,
) -> (StatusCode, serde_json::Value) {
    if !session.is_authorized(&state.gate) {
        return unauthorized();
    }
    session.touch();

    let result = terms::load_upload(file_name, body, state.config.terms.max_upload_bytes);
    match session.use_uploaded_terms(result) {
        Ok(rows) => {
            tracing::info!(session = %session.id, file = file_name, rows, "Term file uploaded");
            (
                StatusCode::OK,
                serde_json::json!({"file": file_name, "rows": rows}),
            )
        }
        Err(e) => {
            let status = match e {
                TermsError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (
                status,
                error_json(format!("An error occurred while loading the file: {e}")),
            )
        }
    }
}

pub fn clear_upload_inner(
    state: &HttpState,
    session: &mut StudySession,
) -> (StatusCode, serde_json::Value) {
    if !session.is_authorized(&state.gate) {
        return unauthorized();
    }
    session.touch();

    let removed = session.clear_uploaded_terms();
    (
        StatusCode::OK,
        serde_json::json!({
            "removed": removed,
            "rows": state.default_terms.len(),
        }),
    )
}

pub fn template_inner(
    state: &HttpState,
    session: &StudySession,
) -> std::result::Result<Vec<u8>, (StatusCode, serde_json::Value)> {
    if !session.is_authorized(&state.gate) {
        return Err(unauthorized());
    }
    terms::template_bytes(&state.config.terms.resolved_default_path()).map_err(|e| {
        tracing::error!(error = %e, "Template download failed");
        (
            StatusCode::NOT_FOUND,
            error_json(format!("The file {TEMPLATE_FILE_NAME} was not found.")),
        )
    })
}

pub fn conversation_inner(
    state: &HttpState,
    session: &StudySession,
) -> (StatusCode, serde_json::Value) {
    if !session.is_authorized(&state.gate) {
        return unauthorized();
    }

    let mut body = serde_json::json!({
        "state": session.conversation.state(),
        "term": session.selection.selected.as_ref().map(|r| r.term.as_str()),
        "click_counter": session.selection.click_counter,
        "messages": session.visible_messages(),
    });
    if session.selection.selected.is_none() {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("message".to_string(), serde_json::json!(BEGIN_MESSAGE));
        }
    }
    (StatusCode::OK, body)
}

/// Validate and record the student's message. Shared by both chat endpoints.
pub fn begin_turn(
    state: &HttpState,
    session: &mut StudySession,
    req: ChatRequest,
) -> std::result::Result<(), (StatusCode, serde_json::Value)> {
    if !session.is_authorized(&state.gate) {
        return Err(unauthorized());
    }
    let message = match req.message {
        Some(m) if !m.trim().is_empty() => m,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                error_json("message field is required"),
            ))
        }
    };

    session.touch();
    session.submit(message, &state.templates);
    Ok(())
}

/// Inner chat: records the message and waits for the whole reply.
pub async fn chat_inner(
    state: &HttpState,
    session: &mut StudySession,
    req: ChatRequest,
) -> (StatusCode, serde_json::Value) {
    if let Err(rejection) = begin_turn(state, session, req) {
        return rejection;
    }

    let result = receive_assistant(
        &mut session.conversation,
        state.backend.as_ref(),
        ResponseMode::Whole,
        |_, _| {},
    )
    .await;
    session.touch();

    match result {
        Ok(reply) => (
            StatusCode::OK,
            serde_json::json!({
                "reply": reply,
                "messages": session.conversation.visible().len(),
            }),
        ),
        Err(e) => relay_error_response(e),
    }
}

fn relay_error_response(e: RelayError) -> (StatusCode, serde_json::Value) {
    let status = match e {
        RelayError::NothingPending => StatusCode::CONFLICT,
        RelayError::Chat(_) => StatusCode::BAD_GATEWAY,
    };
    (status, error_json(e.to_string()))
}

// ============================================================================
// Axum handler wrappers (thin, delegating to inner functions)
// ============================================================================

fn session_cookie(id: Uuid) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .build()
}

/// Find (or start) the caller's session and make sure the cookie names it.
async fn open_session(state: &HttpState, jar: CookieJar) -> (CookieJar, SessionHandle) {
    let cookie = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let (id, handle, created) = state
        .sessions
        .resolve(cookie.as_deref(), &state.templates)
        .await;
    let jar = if created {
        jar.add(session_cookie(id))
    } else {
        jar
    };
    (jar, handle)
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn app_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(app_inner(&state.config)))
}

pub async fn auth_handler(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    Json(req): Json<AuthRequest>,
) -> impl IntoResponse {
    let (jar, handle) = open_session(&state, jar).await;
    let mut session = handle.lock().await;
    let (status, body) = auth_inner(&state, &mut session, req);
    (status, jar, Json(body))
}

pub async fn pick_handler(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
) -> impl IntoResponse {
    let (jar, handle) = open_session(&state, jar).await;
    let mut session = handle.lock().await;
    let (status, body) = pick_inner(&state, &mut session);
    (status, jar, Json(body))
}

pub async fn upload_handler(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let file_name = headers
        .get("x-file-name")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("upload.csv")
        .to_string();

    let (jar, handle) = open_session(&state, jar).await;
    let mut session = handle.lock().await;
    let (status, body) = upload_inner(&state, &mut session, &file_name, body.to_vec());
    (status, jar, Json(body))
}

pub async fn clear_upload_handler(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
) -> impl IntoResponse {
    let (jar, handle) = open_session(&state, jar).await;
    let mut session = handle.lock().await;
    let (status, body) = clear_upload_inner(&state, &mut session);
    (status, jar, Json(body))
}

pub async fn template_handler(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
) -> Response {
    let (jar, handle) = open_session(&state, jar).await;
    let session = handle.lock().await;
    match template_inner(&state, &session) {
        Ok(bytes) => (
            StatusCode::OK,
            jar,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{TEMPLATE_FILE_NAME}\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err((status, body)) => (status, jar, Json(body)).into_response(),
    }
}

pub async fn conversation_handler(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
) -> impl IntoResponse {
    let (jar, handle) = open_session(&state, jar).await;
    let session = handle.lock().await;
    let (status, body) = conversation_inner(&state, &session);
    (status, jar, Json(body))
}

pub async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let (jar, handle) = open_session(&state, jar).await;
    let mut session = handle.lock().await;
    let (status, body) = chat_inner(&state, &mut session, req).await;
    (status, jar, Json(body))
}

/// Streams `delta` events (`{"text"}`) while the reply arrives, then one `done`
/// (`{"reply"}`) or `error` event. The relay runs in its own task holding the
/// session lock, so it finishes and commits even if the client goes away.
pub async fn chat_stream_handler(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    Json(req): Json<ChatRequest>,
) -> Response {
    let (jar, handle) = open_session(&state, jar).await;
    let mut session = handle.lock_owned().await;
    if let Err((status, body)) = begin_turn(&state, &mut session, req) {
        return (status, jar, Json(body)).into_response();
    }

    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let task_state = state.clone();
    tokio::spawn(async move {
        let result = receive_assistant(
            &mut session.conversation,
            task_state.backend.as_ref(),
            ResponseMode::Streaming,
            |fragment, _| {
                let _ = tx.send(json_event("delta", serde_json::json!({"text": fragment})));
            },
        )
        .await;
        session.touch();

        let last = match result {
            Ok(reply) => json_event("done", serde_json::json!({"reply": reply})),
            Err(e) => json_event("error", relay_error_response(e).1),
        };
        let _ = tx.send(last);
    });

    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    });
    (jar, Sse::new(events).keep_alive(KeepAlive::default())).into_response()
}

fn json_event(name: &str, data: serde_json::Value) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_default()
}

// ============================================================================
// Unit tests calling inner functions directly
// ============================================================================
