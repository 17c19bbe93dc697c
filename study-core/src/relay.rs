//! Chat relay: sends the conversation to the backend and merges the reply back.
//!
//! Contract: fragments are accumulated in a `ReplyBuffer`; observers see each
//! fragment and the running text, but the conversation is only touched once,
//! after the reply is complete. Any failure leaves it as it was.

use futures::StreamExt;
use thiserror::Error;

use crate::chat::{ChatBackend, ChatError};
use crate::conversation::{Conversation, ConversationState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// One request, one complete reply.
    Whole,
    /// Incremental fragments, committed when the stream ends.
    Streaming,
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("there is no unanswered user message to reply to")]
    NothingPending,

    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Accumulates reply fragments in arrival order.
#[derive(Debug, Default)]
pub struct ReplyBuffer {
    text: String,
    fragments: usize,
}

impl ReplyBuffer {
    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments += 1;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Ask the backend to answer the trailing user message.
///
/// `on_partial(fragment, text_so_far)` runs once per streamed fragment (never in
/// `Whole` mode). Returns the committed reply, or `None` when the reply was
/// empty and nothing was appended.
pub async fn receive_assistant<F>(
    conversation: &mut Conversation,
    backend: &dyn ChatBackend,
    mode: ResponseMode,
    mut on_partial: F,
) -> Result<Option<String>, RelayError>
where
    F: FnMut(&str, &str) + Send,
{
    if conversation.state() != ConversationState::AwaitingResponse {
        return Err(RelayError::NothingPending);
    }

    let mut reply = ReplyBuffer::default();
    let outcome = match mode {
        ResponseMode::Whole => backend
            .complete(conversation.messages())
            .await
            .map(|text| {
                if !text.is_empty() {
                    reply.push(&text);
                }
            }),
        ResponseMode::Streaming => {
            collect_stream(conversation, backend, &mut reply, &mut on_partial).await
        }
    };

    if let Err(e) = outcome {
        tracing::error!(
            backend = backend.name(),
            fragments = reply.fragments(),
            error = %e,
            "Chat relay failed, conversation left unchanged"
        );
        return Err(e.into());
    }

    let fragments = reply.fragments();
    let text = reply.into_text();
    if conversation.commit_assistant(text.clone()) {
        tracing::info!(
            backend = backend.name(),
            fragments,
            chars = text.chars().count(),
            turns = conversation.len(),
            "Assistant reply committed"
        );
        Ok(Some(text))
    } else {
        tracing::info!(backend = backend.name(), "Assistant reply was empty, nothing committed");
        Ok(None)
    }
}

async fn collect_stream<F>(
    conversation: &Conversation,
    backend: &dyn ChatBackend,
    reply: &mut ReplyBuffer,
    on_partial: &mut F,
) -> Result<(), ChatError>
where
    F: FnMut(&str, &str) + Send,
{
    let mut stream = backend.stream(conversation.messages()).await?;
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        reply.push(&fragment);
        on_partial(&fragment, reply.text());
    }
    Ok(())
}
