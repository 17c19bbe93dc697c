//! Per-student study session.
//!
//! Owns everything one student's interaction touches: the password flag, the
//! current selection and click counter, the conversation, and an optional
//! uploaded term table. Each user action is a method here; nothing is shared
//! between sessions.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::PasswordGate;
use crate::conversation::Conversation;
use crate::models::{Message, TermRecord};
use crate::prompt::PromptTemplates;
use crate::selector;
use crate::terms::{TermTable, TermsError};

/// How the seed for each term pick is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStrategy {
    /// Seed = click counter. The n-th pick is the same in every session.
    #[default]
    ClickCounter,
    /// Click counter mixed with a per-session salt.
    Session,
    /// Unseeded.
    Entropy,
}

impl SeedStrategy {
    pub fn seed(self, salt: u64, click_counter: u64) -> Option<u64> {
        match self {
            SeedStrategy::ClickCounter => Some(click_counter),
            SeedStrategy::Session => {
                Some(salt ^ click_counter.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            }
            SeedStrategy::Entropy => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionState {
    pub selected: Option<TermRecord>,
    pub click_counter: u64,
}

#[derive(Debug)]
pub struct StudySession {
    pub id: Uuid,
    pub authenticated: bool,
    pub selection: SelectionState,
    pub conversation: Conversation,
    pub uploaded_terms: Option<Arc<TermTable>>,
    pub seed_salt: u64,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl StudySession {
    /// A fresh session holding the generic system prompt.
    pub fn new(templates: &PromptTemplates) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            authenticated: false,
            selection: SelectionState::default(),
            conversation: Conversation::with_system(templates.initial_prompt()),
            uploaded_terms: None,
            seed_salt: rand::thread_rng().gen(),
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn is_authorized(&self, gate: &PasswordGate) -> bool {
        !gate.is_enabled() || self.authenticated
    }

    /// Check a password attempt. A wrong attempt clears the flag.
    pub fn authenticate(&mut self, gate: &PasswordGate, input: &str) -> bool {
        self.authenticated = gate.verify(input);
        if self.authenticated {
            tracing::info!(session = %self.id, "Password verified");
        } else {
            tracing::warn!(session = %self.id, "Password incorrect");
        }
        self.authenticated
    }

    /// Pick a new term and restart the conversation around it.
    ///
    /// Uses the uploaded table when there is one, else `default_terms`. When
    /// nothing can be picked the conversation restarts with the generic prompt.
    pub fn pick_term(
        &mut self,
        default_terms: &TermTable,
        templates: &PromptTemplates,
        strategy: SeedStrategy,
    ) -> Option<&TermRecord> {
        self.selection.click_counter += 1;
        let seed = strategy.seed(self.seed_salt, self.selection.click_counter);

        let picked = {
            let table = self.uploaded_terms.as_deref().unwrap_or(default_terms);
            selector::select(table, seed)
        };

        match &picked {
            Some(record) => tracing::info!(
                session = %self.id,
                click = self.selection.click_counter,
                term = %record.term,
                "Term selected"
            ),
            None => tracing::warn!(
                session = %self.id,
                click = self.selection.click_counter,
                "No term available to select"
            ),
        }

        self.conversation.reset(templates.prompt_for(picked.as_ref()));
        self.selection.selected = picked;
        self.selection.selected.as_ref()
    }

    /// Record a student message, restoring the system prompt first if needed.
    pub fn submit(&mut self, text: impl Into<String>, templates: &PromptTemplates) {
        let selected = &self.selection.selected;
        self.conversation
            .submit_user(text, || templates.prompt_for(selected.as_ref()));
    }

    pub fn current_prompt(&self, templates: &PromptTemplates) -> String {
        templates.prompt_for(self.selection.selected.as_ref())
    }

    /// Store an uploaded table. On failure the session continues with an empty
    /// table and the error is handed back for reporting.
    pub fn use_uploaded_terms(
        &mut self,
        result: Result<TermTable, TermsError>,
    ) -> Result<usize, TermsError> {
        match result {
            Ok(table) => {
                let rows = table.len();
                self.uploaded_terms = Some(Arc::new(table));
                Ok(rows)
            }
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Uploaded term file rejected");
                self.uploaded_terms = Some(Arc::new(TermTable::empty()));
                Err(e)
            }
        }
    }

    /// Forget the uploaded table so picks use the default terms again.
    /// Returns whether there was one to forget.
    pub fn clear_uploaded_terms(&mut self) -> bool {
        let had_upload = self.uploaded_terms.take().is_some();
        if had_upload {
            tracing::info!(session = %self.id, "Uploaded term file removed");
        }
        had_upload
    }

    /// Transcript without the system prompt.
    pub fn visible_messages(&self) -> &[Message] {
        self.conversation.visible()
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    pub fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_active_at > timeout
    }
}
