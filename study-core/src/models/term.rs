use serde::{Deserialize, Serialize};

/// One study term and the reference definition ("schema") used to ground the
/// tutoring prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    pub term: String,
    pub schema: String,
}

impl TermRecord {
    pub fn new(term: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            schema: schema.into(),
        }
    }
}
