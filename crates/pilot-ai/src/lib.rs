//! Core library surface for the pilot-ai crate.
mod google;
mod retry;
mod types;

pub use google::{GoogleClient, GoogleConfig};
pub use types::{
    AiError, CompletionRequest, CompletionResponse, CompletionUsage, LlmClient, Message,
    MessageRole,
};
