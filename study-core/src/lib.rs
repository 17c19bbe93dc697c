pub mod auth;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod error;
pub mod models;
pub mod prompt;
pub mod relay;
pub mod selector;
pub mod session;
pub mod sse;
pub mod terms;

pub use auth::PasswordGate;
pub use chat::{ChatBackend, ChatClientConfig, ChatError, FragmentStream, OpenAiChatClient};
pub use config::StudyConfig;
pub use conversation::{Conversation, ConversationState};
pub use error::StudyError;
pub use models::{Message, Role, TermRecord};
pub use prompt::{build_prompt, PromptTemplates};
pub use relay::{receive_assistant, RelayError, ReplyBuffer, ResponseMode};
pub use selector::select;
pub use session::{SeedStrategy, SelectionState, StudySession};
pub use terms::{TermSource, TermTable, TermsError};
