//! Provider-agnostic LLM client abstraction.
//!
//! The mission runtime never speaks to a concrete LLM provider's wire format.
//! Commander and agent sessions talk to whatever implements [`ClientWrapper`]
//! instead; the crate ships only [`crate::mock_client::MockClientWrapper`] as
//! a reference implementation for tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use missionrt::client_wrapper::{ClientWrapper, Message, Role};
//!
//! async fn ask(client: &dyn ClientWrapper) -> Result<Message, Box<dyn std::error::Error>> {
//!     client
//!         .send_message(&[Message {
//!             role: Role::User,
//!             content: Arc::from("Who are you?"),
//!         }])
//!         .await
//! }
//! ```

use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Represents the possible roles for a message in a session's conversation
/// history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A system authored message that primes or constrains model behaviour
    /// (the commander/agent system prompt).
    System,
    /// A user authored message (a task objective, an ask-commander question,
    /// a tool result fed back into the loop).
    User,
    /// An assistant authored message (a commander/agent model response).
    Assistant,
}

/// How many tokens were spent on prompt vs. completion for a single call.
#[derive(Clone, Debug)]
pub struct TokenUsage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

/// A single turn in a commander or agent conversation.
///
/// Stored as `Arc<str>` so histories can be cheaply cloned when a commander
/// is forked to answer an isolated ask-commander query.
#[derive(Clone)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body — plain text, following the tagged-segment protocol
    /// on assistant turns.
    pub content: Arc<str>,
}

/// Trait defining the interface the runtime uses to drive an LLM provider.
///
/// Implementations **must** be thread-safe (`Send + Sync`) so a single
/// provider instance can be shared between concurrently running commander
/// and agent sessions. Where a provider exposes token accounting, wrappers
/// should capture it and surface it via [`ClientWrapper::get_last_usage`].
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send the full conversation history and return the model's next turn.
    ///
    /// The `messages` slice must include any system priming message the
    /// caller wishes to send. Implementations that fail should return a
    /// boxed error describing the provider/network fault; the caller wraps
    /// it into [`crate::error::MissionError::Llm`].
    async fn send_message(&self, messages: &[Message]) -> Result<Message, Box<dyn Error>>;

    /// Return the identifier used to select the upstream model (e.g.
    /// `"gpt-4.1"`), surfaced in logs and session metadata.
    fn model_name(&self) -> &str;

    /// Hook to retrieve usage from the most recent [`send_message`](Self::send_message) call.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Expose a shared mutable slot where the implementation can persist
    /// token usage. By default wrappers report no usage data.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}

/// Blanket impl so a shared `Arc<dyn ClientWrapper>` handle can itself be
/// used wherever a `ClientWrapper` is expected. This is how the runtime
/// hands the same provider instance to many concurrently running commander
/// and agent sessions without each one owning a distinct client type.
#[async_trait]
impl ClientWrapper for Arc<dyn ClientWrapper> {
    async fn send_message(&self, messages: &[Message]) -> Result<Message, Box<dyn Error>> {
        (**self).send_message(messages).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn get_last_usage(&self) -> Option<TokenUsage> {
        (**self).get_last_usage().await
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        (**self).usage_slot()
    }
}
