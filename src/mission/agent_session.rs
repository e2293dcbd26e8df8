//! Agent sessions: the ReAct loop driven by an agent commander delegates to.
//!
//! An [`AgentSession`] wraps an [`LlmSession`] and a [`ToolRegistry`] and
//! drives the tagged-segment protocol to completion: feed the model's
//! streamed reply through a [`SegmentParser`], act on whichever segment it
//! produced (`ACTION` → call a tool and loop, `ANSWER` → done,
//! `ASK_COMMANDER` → suspend and hand the question back to the caller), and
//! repeat until the model answers or the loop's turn budget is exhausted.
//!
//! Agent sessions are not `Clone` — forking one (to inherit context into a
//! sibling agent, mirroring the teacher's `Agent::fork`/`fork_with_context`)
//! goes through [`AgentSession::fork`] and [`AgentSession::fork_with_context`]
//! instead, which share the tool registry and secret registry by `Arc` but
//! give the fork its own independent [`LlmSession`] history.

use std::sync::Arc;

use crate::client_wrapper::{ClientWrapper, Role};
use crate::error::{MissionError, ToolErrorKind};
use crate::llm_session::LlmSession;
use crate::secrets::SecretRegistry;
use crate::segment_parser::SegmentParser;
use crate::tool_protocol::ToolRegistry;

/// The outcome of driving an [`AgentSession`] to its next suspension point.
pub enum AgentOutcome {
    /// The agent produced a final natural-language answer.
    Answered(String),
    /// The agent is suspended waiting on an answer to a question it asked
    /// its owning commander. Resume with [`AgentSession::resume_with_answer`].
    AskedCommander(String),
    /// The agent exhausted its tool-turn budget without answering.
    TurnBudgetExhausted,
}

/// A single-threaded ReAct loop session delegated to by a commander.
pub struct AgentSession<T: ClientWrapper> {
    session: LlmSession<T>,
    tools: Arc<ToolRegistry>,
    secrets: Arc<SecretRegistry>,
    max_turns: usize,
    token_budget: usize,
    /// Set while the session is suspended on an outstanding ask-commander
    /// question, so `resume_with_answer` knows what to feed back in.
    pending_question: Option<String>,
}

impl<T: ClientWrapper> AgentSession<T> {
    /// Create a new agent session with the given system prompt and tool
    /// registry.
    pub fn new(
        client: T,
        system_prompt: String,
        tools: Arc<ToolRegistry>,
        secrets: Arc<SecretRegistry>,
        max_tokens: usize,
        max_turns: usize,
    ) -> Self {
        Self {
            session: LlmSession::new(client, system_prompt, max_tokens),
            tools,
            secrets,
            max_turns,
            token_budget: max_tokens,
            pending_question: None,
        }
    }

    /// Share this session's collaborators but start a fresh, empty history.
    /// Mirrors the teacher's `fork()`: same tools and secrets, independent
    /// conversation.
    pub fn fork(&self) -> Self
    where
        T: Clone,
    {
        Self {
            session: LlmSession::new((*self.session.client()).clone(), String::new(), self.token_budget),
            tools: Arc::clone(&self.tools),
            secrets: Arc::clone(&self.secrets),
            max_turns: self.max_turns,
            token_budget: self.token_budget,
            pending_question: None,
        }
    }

    /// Like [`fork`](Self::fork), but also copies the current conversation
    /// history into the new session, for a sibling agent that should inherit
    /// accumulated context instead of starting cold.
    pub fn fork_with_context(&self) -> Self
    where
        T: Clone,
    {
        let mut forked = self.fork();
        for message in self.session.history() {
            let role = message.role.clone();
            forked.session.push_history(role, message.content.to_string());
        }
        forked
    }

    /// Drive the loop starting from an initial objective, running tool calls
    /// until the model answers, asks its commander, or the turn budget is
    /// exhausted.
    pub async fn run(&mut self, objective: String) -> Result<AgentOutcome, MissionError> {
        self.step(Role::User, objective).await
    }

    /// Resume a session that suspended on [`AgentOutcome::AskedCommander`],
    /// feeding the commander's answer back in as the next turn.
    pub async fn resume_with_answer(&mut self, answer: String) -> Result<AgentOutcome, MissionError> {
        self.pending_question = None;
        self.step(Role::User, format!("ASK_COMMANDER_ANSWER: {}", answer)).await
    }

    /// Reopen a completed conversation to answer a follow-up question from
    /// the owning commander (`ask_agent`), prepending a `FOLLOWUP_QUESTION`
    /// wrapper. The agent may use its tools again but is instructed to
    /// answer from memory when possible.
    pub async fn answer_follow_up(&mut self, question: String) -> Result<AgentOutcome, MissionError> {
        self.step(
            Role::User,
            format!(
                "FOLLOWUP_QUESTION: {}\n(Answer from what you already know if possible; use tools only if necessary.)",
                question
            ),
        )
        .await
    }

    async fn step(&mut self, role: Role, content: String) -> Result<AgentOutcome, MissionError> {
        let mut role = role;
        let mut content = content;

        for _ in 0..self.max_turns {
            let reply = self
                .session
                .send_message(role, content)
                .await
                .map_err(|e| MissionError::Llm(e.to_string()))?;

            let mut parser = SegmentParser::new();
            parser.feed(&reply.content);
            let parsed = parser.finish();

            if let Some(answer) = parsed.answer() {
                return Ok(AgentOutcome::Answered(answer.to_string()));
            }

            if let Some(question) = parsed.ask_commander() {
                self.pending_question = Some(question.to_string());
                return Ok(AgentOutcome::AskedCommander(question.to_string()));
            }

            if let Some(action) = parsed.action() {
                let raw_input = parsed.action_input().unwrap_or("{}");
                let substituted = self.secrets.substitute(raw_input);
                let params: serde_json::Value =
                    serde_json::from_str(&substituted).unwrap_or(serde_json::Value::Null);

                let tool_result = self.tools.call(action, params).await;
                let feedback = match tool_result {
                    Ok(result) => serde_json::to_string(&result)
                        .unwrap_or_else(|_| "{}".to_string()),
                    Err(err) => self.format_tool_error(action, &err),
                };

                role = Role::User;
                content = format!("TOOL_RESULT: {}", feedback);
                continue;
            }

            // No recognised terminal or action segment: treat the raw reply
            // as the answer rather than looping forever on malformed output.
            return Ok(AgentOutcome::Answered(reply.content.to_string()));
        }

        Ok(AgentOutcome::TurnBudgetExhausted)
    }

    /// Render a tool-call failure as the observation text fed back to the
    /// model, rather than aborting the loop: the model, not the Rust retry
    /// policy, decides whether to try a different tool or give up. A
    /// `tool not found` failure additionally lists every tool name this
    /// session actually has available, so the model can self-correct.
    fn format_tool_error(&self, action: &str, err: &MissionError) -> String {
        match err {
            MissionError::Tool {
                kind: ToolErrorKind::NotFound,
                ..
            } => {
                let available: Vec<&str> =
                    self.tools.list_tools().iter().map(|m| m.name.as_str()).collect();
                format!(
                    "ERROR: tool '{}' is not registered. Available tools: {}",
                    action,
                    available.join(", ")
                )
            }
            MissionError::Tool { kind, message, .. } => {
                let retry_note = if kind.is_retryable() { " (retryable)" } else { "" };
                format!("ERROR ({}{}): {}", kind, retry_note, message)
            }
            other => format!("ERROR: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_client::MockClientWrapper;

    fn empty_registries() -> (Arc<ToolRegistry>, Arc<SecretRegistry>) {
        (Arc::new(ToolRegistry::new()), Arc::new(SecretRegistry::new()))
    }

    #[tokio::test]
    async fn answers_directly_when_model_emits_answer_segment() {
        let client = MockClientWrapper::new(vec!["ANSWER: it is sunny\n___STOP___\n".to_string()]);
        let (tools, secrets) = empty_registries();
        let mut session = AgentSession::new(client, "sys".to_string(), tools, secrets, 10_000, 5);
        match session.run("what's the weather?".to_string()).await.unwrap() {
            AgentOutcome::Answered(text) => assert_eq!(text, "it is sunny"),
            _ => panic!("expected an answer"),
        }
    }

    #[tokio::test]
    async fn suspends_on_ask_commander_segment() {
        let client = MockClientWrapper::new(vec![
            "ASK_COMMANDER: what currency should I use?\n___STOP___\n".to_string(),
        ]);
        let (tools, secrets) = empty_registries();
        let mut session = AgentSession::new(client, "sys".to_string(), tools, secrets, 10_000, 5);
        match session.run("quote a price".to_string()).await.unwrap() {
            AgentOutcome::AskedCommander(question) => assert_eq!(question, "what currency should I use?"),
            _ => panic!("expected ask-commander suspension"),
        }
    }

    #[tokio::test]
    async fn answer_follow_up_reopens_a_completed_conversation() {
        let client = MockClientWrapper::new(vec![
            "ANSWER: it is sunny\n___STOP___\n".to_string(),
            "ANSWER: around 22C\n___STOP___\n".to_string(),
        ]);
        let (tools, secrets) = empty_registries();
        let mut session = AgentSession::new(client, "sys".to_string(), tools, secrets, 10_000, 5);
        session.run("what's the weather?".to_string()).await.unwrap();
        match session.answer_follow_up("what's the temperature?".to_string()).await.unwrap() {
            AgentOutcome::Answered(text) => assert_eq!(text, "around 22C"),
            _ => panic!("expected an answer"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_as_an_observation_not_an_abort() {
        let client = MockClientWrapper::new(vec![
            "ACTION: bogus_tool\nACTION_INPUT: {}\n___STOP___\n".to_string(),
            "ANSWER: gave up after the bad tool name\n___STOP___\n".to_string(),
        ]);
        let (tools, secrets) = empty_registries();
        let mut session = AgentSession::new(client, "sys".to_string(), tools, secrets, 10_000, 5);
        match session.run("do something".to_string()).await.unwrap() {
            AgentOutcome::Answered(text) => assert_eq!(text, "gave up after the bad tool name"),
            _ => panic!("expected the loop to continue past the tool-not-found observation"),
        }
    }

    #[tokio::test]
    async fn exhausts_turn_budget_on_endless_actions() {
        let responses = vec![
            "ACTION: noop\nACTION_INPUT: {}\n___STOP___\n".to_string();
            3
        ];
        let client = MockClientWrapper::new(responses);
        let (tools, secrets) = empty_registries();
        let mut session = AgentSession::new(client, "sys".to_string(), tools, secrets, 10_000, 3);
        match session.run("loop forever".to_string()).await.unwrap() {
            AgentOutcome::TurnBudgetExhausted => {}
            _ => panic!("expected turn budget exhaustion"),
        }
    }
}
