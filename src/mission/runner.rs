//! The mission runtime's embedding entry point.
//!
//! [`Runner`] is the glue the rest of the crate is built for: it resolves a
//! mission's declared inputs against the raw string map an embedding
//! application supplies, wires up the shared stores every task needs, and
//! drives the [`crate::scheduler`] to completion, pushing lifecycle events to
//! a [`StreamingHandler`] and persisting results through a [`Persistence`]
//! bundle as it goes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::client_wrapper::ClientWrapper;
use crate::commander_registry::CommanderRegistry;
use crate::config::RuntimeConfig;
use crate::error::MissionError;
use crate::iteration::IterationDeps;
use crate::knowledge_store::KnowledgeStore;
use crate::persistence::Persistence;
use crate::question_cache::QuestionCache;
use crate::result_store::ResultStore;
use crate::scheduler::{self, SchedulerDeps};
use crate::secrets::SecretRegistry;
use crate::streaming::{NullStreamingHandler, StreamEvent, StreamingHandler};
use crate::types::{InputDeclaration, InputKind, Mission, TaskResult};

/// Coerce one raw string input per its declared [`InputKind`], per the
/// external-interface contract: `string` passes through, `number` via
/// `f64::parse`, `bool` via `bool::parse`, `list`/`object` via
/// `serde_json::from_str`.
///
/// # Examples
///
/// ```rust
/// use missionrt::runner::coerce_input;
/// use missionrt::types::InputKind;
///
/// assert_eq!(coerce_input(InputKind::Number, "3.5").unwrap(), serde_json::json!(3.5));
/// assert_eq!(coerce_input(InputKind::Bool, "true").unwrap(), serde_json::json!(true));
/// assert!(coerce_input(InputKind::Number, "not a number").is_err());
/// ```
pub fn coerce_input(kind: InputKind, raw: &str) -> Result<Value, MissionError> {
    match kind {
        InputKind::String | InputKind::Secret => Ok(Value::String(raw.to_string())),
        InputKind::Number => raw
            .parse::<f64>()
            .map(|n| serde_json::json!(n))
            .map_err(|e| MissionError::ConfigResolution(format!("invalid number input: {}", e))),
        InputKind::Bool => raw
            .parse::<bool>()
            .map(Value::Bool)
            .map_err(|e| MissionError::ConfigResolution(format!("invalid bool input: {}", e))),
        InputKind::List | InputKind::Object => serde_json::from_str(raw)
            .map_err(|e| MissionError::ConfigResolution(format!("invalid json input: {}", e))),
    }
}

/// Resolve every declared input against the raw string map a caller passes
/// to [`Runner::new`], applying declared defaults and failing fast on a
/// missing required input.
pub fn resolve_inputs(
    declarations: &[InputDeclaration],
    raw: &HashMap<String, String>,
) -> Result<HashMap<String, Value>, MissionError> {
    let mut resolved = HashMap::new();
    for decl in declarations {
        let value = match raw.get(&decl.name) {
            Some(text) => coerce_input(decl.kind, text)?,
            None => match &decl.default {
                Some(default) => default.clone(),
                None => {
                    if decl.required {
                        return Err(MissionError::ConfigResolution(format!(
                            "missing required input '{}'",
                            decl.name
                        )));
                    }
                    continue;
                }
            },
        };
        resolved.insert(decl.name.clone(), value);
    }
    Ok(resolved)
}

/// A constructed, ready-to-run mission: its inputs already resolved, its
/// shared stores already allocated.
pub struct Runner {
    /// Unique id for this run, assigned once at construction so every log
    /// line and streamed event for the run can be correlated.
    run_id: Uuid,
    mission: Mission,
    client: Arc<dyn ClientWrapper>,
    system_prompt: String,
    config: Arc<RuntimeConfig>,
    inputs: HashMap<String, Value>,
    knowledge_store: Arc<KnowledgeStore>,
    secrets: Arc<SecretRegistry>,
    persistence: Arc<Persistence>,
    commander_registry: Arc<CommanderRegistry>,
}

impl Runner {
    /// Build a runner for `mission`, resolving `raw_inputs` against its
    /// declared inputs. Fails fast (before any task starts) on a missing
    /// required input or a value that doesn't coerce to its declared type.
    pub fn new(
        mission: Mission,
        client: Arc<dyn ClientWrapper>,
        system_prompt: String,
        raw_inputs: HashMap<String, String>,
    ) -> Result<Self, MissionError> {
        scheduler::validate_dag(&mission)?;
        let inputs = resolve_inputs(&mission.inputs, &raw_inputs)?;
        Ok(Self {
            run_id: Uuid::new_v4(),
            mission,
            client,
            system_prompt,
            config: Arc::new(RuntimeConfig::default()),
            inputs,
            knowledge_store: Arc::new(KnowledgeStore::new()),
            secrets: Arc::new(SecretRegistry::new()),
            persistence: Arc::new(crate::persistence::MemoryPersistence::bundle()),
            commander_registry: Arc::new(CommanderRegistry::new()),
        })
    }

    /// Override the default [`RuntimeConfig`].
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Override the secret registry (empty by default).
    pub fn with_secrets(mut self, secrets: SecretRegistry) -> Self {
        self.secrets = Arc::new(secrets);
        self
    }

    /// Override the persistence bundle (in-memory by default).
    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = Arc::new(persistence);
        self
    }

    /// This run's unique id, for correlating log lines and streamed events
    /// with a particular mission execution.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run the mission to completion, pushing lifecycle events to
    /// `streamer` and persisting each task's result through this runner's
    /// persistence bundle as it completes.
    ///
    /// Returns the first task error encountered, if any. Results published
    /// before a failure remain queryable via [`Runner::knowledge_store`].
    pub async fn run(
        &self,
        streamer: Arc<dyn StreamingHandler>,
    ) -> Result<HashMap<String, TaskResult>, MissionError> {
        let started_at = Utc::now();
        log::info!(
            "mission '{}' started (run_id={})",
            self.mission.name,
            self.run_id
        );
        streamer.handle(StreamEvent::MissionStarted).await;

        let deps = SchedulerDeps {
            client: Arc::clone(&self.client),
            system_prompt: self.system_prompt.clone(),
            inputs: self.inputs.clone(),
            iteration_deps: IterationDeps {
                knowledge_store: Arc::clone(&self.knowledge_store),
                result_store: Arc::new(ResultStore::new()),
                question_cache: Arc::new(QuestionCache::new()),
                secrets: Arc::clone(&self.secrets),
                config: Arc::clone(&self.config),
                commander_registry: Arc::clone(&self.commander_registry),
                streamer: Arc::clone(&streamer),
            },
        };

        let outcome = scheduler::run_mission(&self.mission, deps).await;

        match &outcome {
            Ok(results) => {
                for result in results.values() {
                    self.persistence.task_results.save_task_result(result).await;
                }
                streamer.handle(StreamEvent::MissionCompleted).await;
                log::info!(
                    "mission '{}' completed (run_id={}, elapsed={}ms)",
                    self.mission.name,
                    self.run_id,
                    (Utc::now() - started_at).num_milliseconds()
                );
            }
            Err(err) => {
                log::error!(
                    "mission '{}' failed (run_id={}): {}",
                    self.mission.name,
                    self.run_id,
                    err
                );
                streamer
                    .handle(StreamEvent::MissionFailed {
                        message: err.to_string(),
                    })
                    .await;
            }
        }

        outcome
    }

    /// Run with a no-op streaming handler, for callers that don't need
    /// progress events.
    pub async fn run_silent(&self) -> Result<HashMap<String, TaskResult>, MissionError> {
        self.run(Arc::new(NullStreamingHandler)).await
    }

    /// The knowledge store this runner publishes completed task results
    /// into, for querying after (or during, from another task) the run.
    pub fn knowledge_store(&self) -> Arc<KnowledgeStore> {
        Arc::clone(&self.knowledge_store)
    }
}
