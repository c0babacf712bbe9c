mod chat;

pub use chat::{ChatMessage, ChatRequest, ErrorBody};
