use thiserror::Error;

use crate::chat::ChatError;

/// Startup failures that stop the service before it serves anything.
#[derive(Error, Debug)]
pub enum StudyError {
    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Missing secret: environment variable {0} is not set")]
    MissingSecret(String),
}
