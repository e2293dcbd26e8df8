//! A token-budgeted conversation history shared by commander and agent
//! sessions.
//!
//! [`LlmSession`] wraps a [`ClientWrapper`] and keeps the running dialogue
//! within a token budget, trimming the oldest turns first. It knows nothing
//! about the tagged-segment protocol — that parsing lives in
//! [`crate::segment_parser`] — it only manages history and token accounting.

use std::sync::Arc;

use crate::client_wrapper::{ClientWrapper, Message, Role};

/// A conversational session bounded by a token budget.
///
/// The system prompt is kept outside `conversation_history` and is
/// re-attached at the front of every request so that trimming never evicts
/// it.
///
/// # Example
///
/// ```rust
/// use missionrt::client_wrapper::Role;
/// use missionrt::llm_session::LlmSession;
/// use missionrt::mock_client::MockClientWrapper;
///
/// # #[tokio::main]
/// # async fn main() {
/// let client = MockClientWrapper::new(vec!["hello back".into()]);
/// let mut session = LlmSession::new(client, "You are a helpful commander.".to_string(), 8000);
/// let reply = session.send_message(Role::User, "hi".to_string()).await.unwrap();
/// assert_eq!(&*reply.content, "hello back");
/// # }
/// ```
pub struct LlmSession<T: ClientWrapper> {
    client: Arc<T>,
    system_prompt: Message,
    conversation_history: Vec<Message>,
    max_tokens: usize,
    token_count: usize,
}

impl<T: ClientWrapper> LlmSession<T> {
    /// Create a new session with the given client, system prompt, and token
    /// budget (including the system prompt itself).
    pub fn new(client: T, system_prompt: String, max_tokens: usize) -> Self {
        let system_prompt_message = Message {
            role: Role::System,
            content: Arc::from(system_prompt.as_str()),
        };
        let system_prompt_tokens = count_message_tokens(&system_prompt_message);
        LlmSession {
            client: Arc::new(client),
            system_prompt: system_prompt_message,
            conversation_history: Vec::new(),
            max_tokens,
            token_count: system_prompt_tokens,
        }
    }

    /// A clone of the shared client handle, for collaborators (fork helpers,
    /// ask-commander isolation) that need to drive the same provider
    /// without going through this session's history.
    pub fn client(&self) -> Arc<T> {
        Arc::clone(&self.client)
    }

    /// The full conversation history excluding the system prompt.
    pub fn history(&self) -> &[Message] {
        &self.conversation_history
    }

    /// Append a message to history without sending it, used to seed a forked
    /// session with ancestor or dependency context.
    pub fn push_history(&mut self, role: Role, content: String) {
        let message = Message {
            role,
            content: Arc::from(content.as_str()),
        };
        self.token_count += count_message_tokens(&message);
        self.conversation_history.push(message);
        self.trim_conversation_history();
    }

    /// Send a message to the LLM and append both it and the reply to
    /// history, trimming as needed to stay within the token budget.
    pub async fn send_message(
        &mut self,
        role: Role,
        content: String,
    ) -> Result<Message, Box<dyn std::error::Error>> {
        let message = Message {
            role,
            content: Arc::from(content.as_str()),
        };
        self.token_count += count_message_tokens(&message);
        self.conversation_history.push(message);
        self.trim_conversation_history();

        self.conversation_history.insert(0, self.system_prompt.clone());
        let response = self.client.send_message(&self.conversation_history).await?;
        self.conversation_history.remove(0);

        self.token_count += count_message_tokens(&response);
        self.conversation_history.push(response);
        self.trim_conversation_history();

        Ok(self.conversation_history.last().unwrap().clone())
    }

    /// Replace the system prompt, updating the token budget accordingly.
    pub fn set_system_prompt(&mut self, prompt: String) {
        let old_prompt_tokens = count_message_tokens(&self.system_prompt);
        self.system_prompt = Message {
            role: Role::System,
            content: Arc::from(prompt.as_str()),
        };
        let new_prompt_tokens = count_message_tokens(&self.system_prompt);
        self.token_count = self.token_count - old_prompt_tokens + new_prompt_tokens;
    }

    /// Drop the oldest messages until the total token count fits the budget.
    fn trim_conversation_history(&mut self) {
        while self.token_count > self.max_tokens {
            if !self.conversation_history.is_empty() {
                let removed_message = self.conversation_history.remove(0);
                self.token_count -= count_message_tokens(&removed_message);
            } else {
                break;
            }
        }
    }
}

/// Estimate the number of tokens in a string, assuming roughly one token per
/// four characters.
fn count_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Estimate the number of tokens in a [`Message`], including a fixed
/// per-message overhead for its role annotation.
fn count_message_tokens(message: &Message) -> usize {
    let role_token_count = 1;
    role_token_count + count_tokens(&message.content)
}
