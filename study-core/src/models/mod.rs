pub mod message;
pub mod term;

pub use message::{Message, Role};
pub use term::TermRecord;
