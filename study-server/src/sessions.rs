//! In-memory session store.
//!
//! Each session sits behind its own async mutex. Handlers hold the lock for the
//! whole user action (including a streamed reply), which serializes actions
//! within a session while different sessions proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use study_core::{PromptTemplates, StudySession};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub type SessionHandle = Arc<Mutex<StudySession>>;

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<SessionHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn create(&self, templates: &PromptTemplates) -> (Uuid, SessionHandle) {
        let session = StudySession::new(templates);
        let id = session.id;
        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, handle.clone());
        tracing::info!(session = %id, "Session created");
        (id, handle)
    }

    /// Look up the session named by a cookie value, creating a new one when the
    /// value is missing, malformed or unknown. The flag is true for new sessions.
    pub async fn resolve(
        &self,
        cookie: Option<&str>,
        templates: &PromptTemplates,
    ) -> (Uuid, SessionHandle, bool) {
        if let Some(id) = cookie.and_then(|v| Uuid::parse_str(v).ok()) {
            if let Some(handle) = self.get(id).await {
                return (id, handle, false);
            }
        }
        let (id, handle) = self.create(templates).await;
        (id, handle, true)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle for longer than `timeout`. Sessions that are busy
    /// (locked) are kept. Returns how many were removed.
    pub async fn sweep_idle(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(session) => !session.is_idle(now, timeout),
            Err(_) => true,
        });
        before - sessions.len()
    }
}
