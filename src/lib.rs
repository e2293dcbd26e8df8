//! Mission Runtime: a concurrent orchestration engine for LLM-backed
//! commander/agent missions.
//!
//! A [`Mission`](types::Mission) declares a DAG of tasks; each task drives a
//! commander session ([`commander_session`]) that delegates work to one or
//! more agent sessions ([`agent_session`]). The [`scheduler`] walks the DAG,
//! the [`iteration`] engine handles dataset-driven tasks, and completed
//! outputs land in the [`knowledge_store`] for later tasks to query.
//!
//! Everything outside the core — LLM provider SDKs, concrete tool
//! implementations, config-file parsing, a CLI — is expected to be supplied
//! by the embedding application against the trait surfaces this crate
//! exposes ([`client_wrapper::ClientWrapper`], [`tool_protocol::Tool`],
//! [`persistence`], [`streaming::StreamingHandler`]).

#[path = "mission/types.rs"]
pub mod types;
#[path = "mission/config.rs"]
pub mod config;
#[path = "mission/error.rs"]
pub mod error;
#[path = "mission/client_wrapper.rs"]
pub mod client_wrapper;
#[path = "mission/mock_client.rs"]
pub mod mock_client;
#[path = "mission/llm_session.rs"]
pub mod llm_session;
#[path = "mission/segment_parser.rs"]
pub mod segment_parser;
#[path = "mission/secrets.rs"]
pub mod secrets;
#[path = "mission/objective.rs"]
pub mod objective;
#[path = "mission/tool_protocol.rs"]
pub mod tool_protocol;
#[path = "mission/result_store.rs"]
pub mod result_store;
#[path = "mission/knowledge_store.rs"]
pub mod knowledge_store;
#[path = "mission/question_cache.rs"]
pub mod question_cache;
#[path = "mission/ancestor_context.rs"]
pub mod ancestor_context;
#[path = "mission/agent_session.rs"]
pub mod agent_session;
#[path = "mission/commander_session.rs"]
pub mod commander_session;
#[path = "mission/commander_registry.rs"]
pub mod commander_registry;
#[path = "mission/iteration.rs"]
pub mod iteration;
#[path = "mission/scheduler.rs"]
pub mod scheduler;
#[path = "mission/persistence.rs"]
pub mod persistence;
#[path = "mission/streaming.rs"]
pub mod streaming;
#[path = "mission/runner.rs"]
pub mod runner;

pub use client_wrapper::{ClientWrapper, Message, Role};
pub use error::MissionError;
pub use runner::Runner;
pub use types::Mission;
