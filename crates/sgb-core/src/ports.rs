use async_trait::async_trait;

use crate::{
    domain::{ConversationMessage, ThreadRef, UserId},
    errors::Error,
    Result,
};

/// Hexagonal port for the chat backend.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    /// Every message of the thread, oldest first. Implementations drain all pages.
    async fn fetch_thread_history(&self, thread: &ThreadRef) -> Result<Vec<ConversationMessage>>;

    async fn post_reply(&self, thread: &ThreadRef, text: &str) -> Result<()>;

    /// The bot's own user id. Called once at startup.
    async fn resolve_self_identity(&self) -> Result<UserId>;
}

/// Reply text plus the provider-reported token count for the whole call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub total_tokens: u64,
}

/// Hexagonal port for the text-completion backend.
#[async_trait]
pub trait CompletionPort: Send + Sync {
    /// `preamble` carries the character settings, `prompt` the assembled transcript.
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<Completion>;

    /// Generate an image and return a URL to it.
    async fn create_image(&self, prompt: &str) -> Result<String> {
        let _ = prompt;
        Err(Error::External(
            "image generation is not supported by this provider".to_string(),
        ))
    }
}
