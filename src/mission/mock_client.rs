//! A scripted [`ClientWrapper`] for tests.
//!
//! Mirrors the corpus's scripted-LLM-caller pattern: a queue of canned
//! responses consumed in order, plus a call log so tests can assert on
//! call count and ordering without a real provider.

use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::client_wrapper::{ClientWrapper, Message, Role};

/// A [`ClientWrapper`] that returns pre-programmed responses in order and
/// records every call it receives.
///
/// # Example
///
/// ```rust
/// use missionrt::client_wrapper::{ClientWrapper, Message, Role};
/// use missionrt::mock_client::MockClientWrapper;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mock = MockClientWrapper::new(vec!["first reply".into(), "second reply".into()]);
/// let reply = mock
///     .send_message(&[Message { role: Role::User, content: Arc::from("hi") }])
///     .await
///     .unwrap();
/// assert_eq!(&*reply.content, "first reply");
/// assert_eq!(mock.call_count().await, 1);
/// # }
/// ```
pub struct MockClientWrapper {
    responses: Mutex<Vec<String>>,
    call_log: Mutex<Vec<Vec<Message>>>,
    model_name: String,
}

impl MockClientWrapper {
    /// Build a mock that will return `responses` in order, one per call.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_log: Mutex::new(Vec::new()),
            model_name: "mock-model".to_string(),
        }
    }

    /// Build a mock that reports `model_name` from [`ClientWrapper::model_name`].
    pub fn with_model_name(responses: Vec<String>, model_name: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_log: Mutex::new(Vec::new()),
            model_name: model_name.into(),
        }
    }

    /// Number of times [`ClientWrapper::send_message`] was invoked.
    pub async fn call_count(&self) -> usize {
        self.call_log.lock().await.len()
    }

    /// The full message history passed on the Nth call (0-indexed), if any.
    pub async fn messages_for_call(&self, n: usize) -> Option<Vec<Message>> {
        self.call_log.lock().await.get(n).cloned()
    }
}

#[async_trait]
impl ClientWrapper for MockClientWrapper {
    async fn send_message(&self, messages: &[Message]) -> Result<Message, Box<dyn Error>> {
        self.call_log.lock().await.push(messages.to_vec());

        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            return Err("MockClientWrapper: no more programmed responses".into());
        }
        let content = responses.remove(0);
        Ok(Message {
            role: Role::Assistant,
            content: Arc::from(content.as_str()),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_responses_in_order() {
        let mock = MockClientWrapper::new(vec!["a".into(), "b".into()]);
        let msg = [Message {
            role: Role::User,
            content: Arc::from("q"),
        }];
        let r1 = mock.send_message(&msg).await.unwrap();
        let r2 = mock.send_message(&msg).await.unwrap();
        assert_eq!(&*r1.content, "a");
        assert_eq!(&*r2.content, "b");
        assert_eq!(mock.call_count().await, 2);
    }

    #[tokio::test]
    async fn errors_when_exhausted() {
        let mock = MockClientWrapper::new(vec!["only".into()]);
        let msg = [Message {
            role: Role::User,
            content: Arc::from("q"),
        }];
        mock.send_message(&msg).await.unwrap();
        assert!(mock.send_message(&msg).await.is_err());
    }
}
