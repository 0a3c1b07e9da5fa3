//! In-memory conversation history for front-ends

pub mod chat_log;

pub use chat_log::{ChatLog, ChatLogEntry};
