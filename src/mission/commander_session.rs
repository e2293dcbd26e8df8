//! Commander sessions: the orchestrating side of a task.
//!
//! A commander owns a task end to end. It drives its own tagged-segment
//! ReAct loop exactly like an [`AgentSession`], but additionally exposes the
//! commander-only tool surface: delegating work to agents (`call_agent` /
//! `ask_agent`), answering questions sub-agents ask it (`ask_commander` and
//! the question-cache dedup path), reading back what ancestor or sibling
//! tasks published (`query_task_output`), pulling the next dataset item in
//! sequential iteration mode (`dataset_next` / `dataset_item_complete`), and
//! paging through intercepted tool results (`result_info` and friends).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent_session::{AgentOutcome, AgentSession};
use crate::client_wrapper::{ClientWrapper, Role};
use crate::commander_registry::CommanderRegistry;
use crate::config::RuntimeConfig;
use crate::error::MissionError;
use crate::knowledge_store::{AggregateOp, AggregateResult, Filter, FilterOp, KnowledgeStore, Record};
use crate::llm_session::LlmSession;
use crate::question_cache::{AskOutcome, QuestionCache};
use crate::result_store::{InterceptOutcome, ResultStore};
use crate::secrets::SecretRegistry;
use crate::segment_parser::SegmentParser;
use crate::tool_protocol::ToolRegistry;
use crate::types::{DatasetItem, IterationResult, TaskOutput};

/// Cursor over a task's resolved dataset, shared between the sequential
/// iteration engine and whatever pulls items via `dataset_next`.
pub struct DatasetCursor {
    items: Vec<DatasetItem>,
    next_index: usize,
    /// The item most recently handed out by `next`, still awaiting a
    /// matching `complete` call. `None` once exhausted or immediately after
    /// `complete` clears it.
    active: Option<DatasetItem>,
    completed: Vec<IterationResult>,
}

/// Why a `dataset_next`/`dataset_item_complete` call couldn't proceed.
#[derive(Debug, PartialEq, Eq)]
pub enum DatasetCursorError {
    /// `next` was called again before the previous item was completed.
    ItemAlreadyActive,
    /// `complete` was called with no item currently dispensed.
    NoActiveItem,
}

impl DatasetCursor {
    pub fn new(items: Vec<DatasetItem>) -> Self {
        Self {
            items,
            next_index: 0,
            active: None,
            completed: Vec::new(),
        }
    }

    /// Hand out the next unprocessed item, or `None` once the dataset is
    /// exhausted. Errors if the previously dispensed item was never
    /// completed.
    fn next(&mut self) -> Result<Option<DatasetItem>, DatasetCursorError> {
        if self.active.is_some() {
            return Err(DatasetCursorError::ItemAlreadyActive);
        }
        let item = self.items.get(self.next_index).cloned();
        if let Some(item) = &item {
            self.next_index += 1;
            self.active = Some(item.clone());
        }
        Ok(item)
    }

    /// Record the active item's result and clear it, allowing the next
    /// `next` call to proceed. Errors if no item is currently active.
    fn complete(&mut self, result: IterationResult) -> Result<(), DatasetCursorError> {
        if self.active.take().is_none() {
            return Err(DatasetCursorError::NoActiveItem);
        }
        self.completed.push(result);
        Ok(())
    }

    pub fn completed_results(&self) -> &[IterationResult] {
        &self.completed
    }
}

/// Parse the `filters` array of a `query_task_output` tool input: each entry
/// is `{field, op, value}`, where `op` is one of the `FilterOp` names.
fn parse_filters(value: Option<&serde_json::Value>) -> Vec<Filter> {
    let entries = match value.and_then(|v| v.as_array()) {
        Some(entries) => entries,
        None => return Vec::new(),
    };
    entries
        .iter()
        .filter_map(|entry| {
            let field = entry.get("field")?.as_str()?.to_string();
            let op = match entry.get("op")?.as_str()? {
                "eq" => FilterOp::Eq,
                "ne" => FilterOp::Ne,
                "gt" => FilterOp::Gt,
                "lt" => FilterOp::Lt,
                "gte" => FilterOp::Gte,
                "lte" => FilterOp::Lte,
                "contains" => FilterOp::Contains,
                _ => return None,
            };
            let filter_value = entry.get("value")?.clone();
            Some(Filter::new(field, op, filter_value))
        })
        .collect()
}

/// Render an [`AggregateResult`] into the JSON observation the model sees.
fn aggregate_result_to_json(result: &AggregateResult) -> serde_json::Value {
    match result {
        AggregateResult::Count(n) => serde_json::json!({ "count": n }),
        AggregateResult::Sum(v) => serde_json::json!({ "sum": v }),
        AggregateResult::Avg(v) => serde_json::json!({ "avg": v }),
        AggregateResult::Extremum { value, record } => serde_json::json!({
            "value": value,
            "item_id": record.item_id,
            "index": record.index,
            "output": record.output,
        }),
        AggregateResult::Distinct(values) => serde_json::json!({ "distinct": values }),
        AggregateResult::Grouped(buckets) => serde_json::Value::Array(
            buckets
                .iter()
                .map(|(key, nested)| {
                    serde_json::json!({
                        "group": key,
                        "result": aggregate_result_to_json(nested),
                    })
                })
                .collect(),
        ),
    }
}

/// The outcome of driving a commander's own segment-protocol loop one step.
pub enum CommanderOutcome {
    /// A terminal `OUTPUT` segment, schema-validated, plus whatever
    /// `LEARNINGS` segment accompanied it (threaded into the next sequential
    /// iteration's prompt — see [`crate::iteration::run_sequential`]).
    Output(TaskOutput, Option<String>),
    /// A terminal `ANSWER` segment for a task with no declared output
    /// schema, plus its optional `LEARNINGS` segment.
    Answered(String, Option<String>),
    TurnBudgetExhausted,
}

/// A commander session for one task.
pub struct CommanderSession<T: ClientWrapper> {
    session: LlmSession<T>,
    task_name: String,
    knowledge_store: Arc<KnowledgeStore>,
    result_store: Arc<ResultStore>,
    question_cache: Arc<QuestionCache>,
    secrets: Arc<SecretRegistry>,
    config: Arc<RuntimeConfig>,
    dataset_cursor: Option<Arc<Mutex<DatasetCursor>>>,
    output_schema: Vec<String>,
    max_turns: usize,
    /// Persistent per-agent-name sessions, created lazily on first
    /// `call_agent`. Reused across calls so a second `call_agent` for the
    /// same name continues the same conversation instead of starting cold.
    agents: Mutex<HashMap<String, AgentSession<T>>>,
    agent_tools: Arc<ToolRegistry>,
    /// This commander's identity in the shared ask-commander question
    /// cache: `task_name` for a non-iterated task (or the single spanning
    /// commander in sequential-dataset mode), `"task_name[index]"` for one
    /// parallel iteration.
    cache_key: String,
    /// Other tasks' completed commanders, for this commander's own
    /// `ask_commander(task_name, question, index?)` tool.
    commander_registry: Option<Arc<CommanderRegistry>>,
}

impl<T: ClientWrapper> CommanderSession<T> {
    /// Build a commander session for `task_name`, with its system prompt
    /// already augmented with the required `OUTPUT` schema and
    /// `dependency_context` (the rendered ancestor summary, resolved once by
    /// the caller via [`crate::ancestor_context::resolve_ancestor_context`]
    /// before fan-out — never recomputed here, so it is safe to build many
    /// commanders, or retry the same one, without repeating the ancestor
    /// queries that produced it).
    pub async fn new(
        client: T,
        task_name: String,
        base_system_prompt: String,
        dependency_context: String,
        knowledge_store: Arc<KnowledgeStore>,
        result_store: Arc<ResultStore>,
        question_cache: Arc<QuestionCache>,
        secrets: Arc<SecretRegistry>,
        config: Arc<RuntimeConfig>,
        output_schema: Vec<String>,
        max_turns: usize,
    ) -> Result<Self, MissionError> {
        let mut prompt = base_system_prompt;
        if !output_schema.is_empty() {
            prompt.push_str(&format!(
                "\n\nYour final OUTPUT must be a JSON object containing these fields: {}.",
                output_schema.join(", ")
            ));
        }
        if !dependency_context.is_empty() {
            prompt.push('\n');
            prompt.push('\n');
            prompt.push_str(&dependency_context);
        }

        let cache_key = task_name.clone();
        Ok(Self {
            session: LlmSession::new(client, prompt, config.commander_max_tokens),
            task_name,
            knowledge_store,
            result_store,
            question_cache,
            secrets,
            config,
            dataset_cursor: None,
            output_schema,
            max_turns,
            agents: Mutex::new(HashMap::new()),
            agent_tools: Arc::new(ToolRegistry::new()),
            cache_key,
            commander_registry: None,
        })
    }

    /// Attach the tool registry every agent this commander spawns via
    /// `call_agent` will be given.
    pub fn with_agent_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.agent_tools = tools;
        self
    }

    /// Override this commander's ask-commander cache key. Used by the
    /// iteration engine to scope a parallel iteration's commander to
    /// `"task_name[index]"` instead of the bare task name.
    pub fn with_cache_key(mut self, cache_key: String) -> Self {
        self.cache_key = cache_key;
        self
    }

    /// Attach the mission-wide registry of other tasks' completed
    /// commanders, so this commander's `ask_commander(task_name, ...)` tool
    /// can actually reach them.
    pub fn with_commander_registry(mut self, registry: Arc<CommanderRegistry>) -> Self {
        self.commander_registry = Some(registry);
        self
    }

    /// Clone this commander's conversation history and collaborators into an
    /// independent session, for answering an isolated follow-up question
    /// from a descendant task after this task has already completed. The
    /// fork shares the knowledge store, result store, question cache, and
    /// secrets registry by `Arc`, so isolated-query side effects (if any)
    /// are still visible mission-wide, but its own conversation history is
    /// separate so the isolated question never pollutes the original.
    pub fn fork_for_query(&self) -> Self
    where
        T: Clone,
    {
        let mut forked_session = LlmSession::new(
            (*self.session.client()).clone(),
            String::new(),
            self.config.commander_max_tokens,
        );
        for message in self.session.history() {
            forked_session.push_history(message.role.clone(), message.content.to_string());
        }
        Self {
            session: forked_session,
            task_name: self.task_name.clone(),
            knowledge_store: Arc::clone(&self.knowledge_store),
            result_store: Arc::clone(&self.result_store),
            question_cache: Arc::clone(&self.question_cache),
            secrets: Arc::clone(&self.secrets),
            config: Arc::clone(&self.config),
            dataset_cursor: None,
            output_schema: Vec::new(),
            max_turns: self.max_turns,
            agents: Mutex::new(HashMap::new()),
            agent_tools: Arc::clone(&self.agent_tools),
            cache_key: self.cache_key.clone(),
            commander_registry: self.commander_registry.clone(),
        }
    }

    /// Ask this commander a one-off question in isolation (via
    /// [`fork_for_query`](Self::fork_for_query)) and return just the answer,
    /// aborting with [`MissionError::DependencyContext`] if the fork fails to
    /// produce an `ANSWER` segment within its turn budget.
    pub async fn answer_query_isolated(&self, question: String) -> Result<String, MissionError>
    where
        T: Clone,
    {
        let mut fork = self.fork_for_query();
        match fork.run(question).await? {
            CommanderOutcome::Answered(answer, _) => Ok(answer),
            CommanderOutcome::Output(output, _) => Ok(serde_json::to_string(&output).unwrap_or_default()),
            CommanderOutcome::TurnBudgetExhausted => Err(MissionError::DependencyContext(format!(
                "isolated query to task '{}' exhausted its turn budget without answering",
                self.task_name
            ))),
        }
    }

    /// Attach a dataset cursor, switching this commander into
    /// sequential-iteration mode where it drives `dataset_next` /
    /// `dataset_item_complete` itself across the whole dataset instead of
    /// being recreated per item.
    pub fn with_dataset_cursor(mut self, cursor: Arc<Mutex<DatasetCursor>>) -> Self {
        self.dataset_cursor = Some(cursor);
        self
    }

    /// Pull the next unprocessed dataset item, or `None` once the dataset is
    /// exhausted. Only meaningful after [`with_dataset_cursor`](Self::with_dataset_cursor).
    /// Errors if the previously dispensed item was never completed.
    pub async fn dataset_next(&self) -> Result<Option<DatasetItem>, DatasetCursorError> {
        match &self.dataset_cursor {
            Some(cursor) => cursor.lock().await.next(),
            None => Ok(None),
        }
    }

    /// Record a completed iteration and clear the cursor's active item.
    /// Errors if no item is currently active.
    pub async fn dataset_item_complete(&self, result: IterationResult) -> Result<(), DatasetCursorError> {
        match &self.dataset_cursor {
            Some(cursor) => cursor.lock().await.complete(result),
            None => Err(DatasetCursorError::NoActiveItem),
        }
    }

    /// Delegate work to the named agent: exactly one of `task` (a new
    /// assignment) or `response` (answering the agent's outstanding
    /// `ASK_COMMANDER`) must be set. The first call for a given name creates
    /// its persistent session; later calls reuse it, so an agent's
    /// conversation accumulates across every task this commander gives it.
    pub async fn call_agent(
        &self,
        agent_name: &str,
        task: Option<String>,
        response: Option<String>,
    ) -> Result<AgentOutcome, MissionError>
    where
        T: Clone,
    {
        if task.is_some() == response.is_some() {
            return Err(MissionError::DependencyContext(format!(
                "call_agent('{}') requires exactly one of `task` or `response`",
                agent_name
            )));
        }

        let mut agents = self.agents.lock().await;
        if !agents.contains_key(agent_name) {
            let client = (*self.session.client()).clone();
            let system_prompt = format!(
                "You are the '{}' agent, delegated to by the commander running task '{}'.",
                agent_name, self.task_name
            );
            agents.insert(
                agent_name.to_string(),
                AgentSession::new(
                    client,
                    system_prompt,
                    Arc::clone(&self.agent_tools),
                    Arc::clone(&self.secrets),
                    self.config.agent_max_tokens,
                    self.max_turns,
                ),
            );
        }
        let agent = agents.get_mut(agent_name).expect("just inserted or already present");

        match (task, response) {
            (Some(task), None) => agent.run(task).await,
            (None, Some(response)) => agent.resume_with_answer(response).await,
            _ => unreachable!("exactly-one check above"),
        }
    }

    /// Ask a question of an agent this commander has already delegated to
    /// at least once, reopening its conversation via
    /// [`AgentSession::answer_follow_up`].
    pub async fn ask_agent(&self, agent_name: &str, question: String) -> Result<String, MissionError> {
        let mut agents = self.agents.lock().await;
        let agent = agents.get_mut(agent_name).ok_or_else(|| {
            MissionError::DependencyContext(format!(
                "no agent session named '{}' has been created yet",
                agent_name
            ))
        })?;
        match agent.answer_follow_up(question).await? {
            AgentOutcome::Answered(text) => Ok(text),
            AgentOutcome::AskedCommander(q) => Err(MissionError::DependencyContext(format!(
                "agent '{}' asked a follow-up question instead of answering: {}",
                agent_name, q
            ))),
            AgentOutcome::TurnBudgetExhausted => Err(MissionError::DependencyContext(format!(
                "agent '{}' exhausted its turn budget answering a follow-up question",
                agent_name
            ))),
        }
    }

    /// List every question asked of this commander so far (by its own
    /// agents, through [`ask_commander`](Self::ask_commander)), alongside its
    /// answer once one has been published.
    pub async fn list_commander_questions(&self) -> Vec<(String, Option<Result<String, String>>)> {
        self.question_cache.list(&self.cache_key).await
    }

    /// Look up the published answer to a specific question this commander
    /// has already answered, if any.
    pub async fn get_commander_answer(&self, question: &str) -> Option<String> {
        self.question_cache
            .list(&self.cache_key)
            .await
            .into_iter()
            .find(|(q, _)| q == question)
            .and_then(|(_, answer)| answer)
            .and_then(|result| result.ok())
    }

    /// Ask a question of a dependency task's commander, deduplicating on
    /// `(task_name[index]?, question)` via the shared [`QuestionCache`]: if
    /// an identical question is already in flight against the same target,
    /// this call waits for that answer instead of performing a second clone
    /// query. Otherwise it looks up the target's completed commander in the
    /// shared [`CommanderRegistry`], forks it, and runs an isolated query.
    pub async fn ask_commander(
        &self,
        target_task: &str,
        question: String,
        index: Option<usize>,
    ) -> Result<String, MissionError>
    where
        T: Clone,
    {
        let cache_key = match index {
            Some(i) => format!("{}[{}]", target_task, i),
            None => target_task.to_string(),
        };

        match self.question_cache.ask(&cache_key, &question).await {
            AskOutcome::Answered(Ok(answer)) => Ok(answer),
            AskOutcome::Answered(Err(message)) => Err(MissionError::DependencyContext(message)),
            AskOutcome::BecomeAsker => {
                let outcome = self.query_dependency_commander(target_task, index, question.clone()).await;
                match outcome {
                    Ok(answer) => {
                        self.question_cache.resolve(&cache_key, &question, answer.clone()).await;
                        Ok(answer)
                    }
                    Err(err) => {
                        self.question_cache.fail(&cache_key, &question, err.to_string()).await;
                        Err(err)
                    }
                }
            }
        }
    }

    async fn query_dependency_commander(
        &self,
        target_task: &str,
        index: Option<usize>,
        question: String,
    ) -> Result<String, MissionError>
    where
        T: Clone,
    {
        let registry = self.commander_registry.as_ref().ok_or_else(|| {
            MissionError::DependencyContext(format!(
                "no commander registry available to query task '{}'",
                target_task
            ))
        })?;
        let handle = match index {
            Some(i) => registry.get_iteration(target_task, i).await,
            None => registry.get_task(target_task).await,
        };
        match handle {
            Some(commander) => commander.answer_query_isolated(question).await,
            None => Err(MissionError::DependencyContext(format!(
                "no completed commander found for task '{}'{}",
                target_task,
                index.map(|i| format!("[{}]", i)).unwrap_or_default()
            ))),
        }
    }

    /// Read back another task's published result: filtered, ordered, and
    /// paginated the same way the `query_task_output` tool exposes it.
    #[allow(clippy::too_many_arguments)]
    pub async fn query_task_output(
        &self,
        task_name: &str,
        filters: &[Filter],
        order_by: Option<&str>,
        desc: bool,
        offset: usize,
        limit: Option<usize>,
    ) -> Vec<Record> {
        self.knowledge_store
            .query(task_name, filters, order_by, desc, offset, limit)
            .await
    }

    /// The `query_task_output` tool's full surface, dispatched from a single
    /// JSON input: plain filtered/ordered/paginated records when `aggregate`
    /// is absent, or an aggregate computation over the matched records
    /// otherwise. Returns the JSON the model sees as the observation.
    pub async fn query_task_output_tool(&self, input: &serde_json::Value) -> serde_json::Value {
        let task_name = input.get("task_name").and_then(|v| v.as_str()).unwrap_or("");
        let filters = parse_filters(input.get("filters"));
        let order_by = input.get("order_by").and_then(|v| v.as_str());
        let desc = input.get("desc").and_then(|v| v.as_bool()).unwrap_or(false);
        let offset = input.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = input.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);

        match input.get("aggregate") {
            Some(agg) => {
                let field = agg.get("field").and_then(|v| v.as_str()).unwrap_or("");
                let op = match agg.get("op").and_then(|v| v.as_str()).unwrap_or("count") {
                    "sum" => AggregateOp::Sum,
                    "avg" => AggregateOp::Avg,
                    "min" => AggregateOp::Min,
                    "max" => AggregateOp::Max,
                    "distinct" => AggregateOp::Distinct,
                    _ => AggregateOp::Count,
                };
                let group_by = agg.get("group_by").and_then(|v| v.as_str());
                match self
                    .knowledge_store
                    .aggregate(task_name, field, op, &filters, group_by)
                    .await
                {
                    Some(result) => aggregate_result_to_json(&result),
                    None => serde_json::json!({ "error": "no matching numeric values" }),
                }
            }
            None => {
                let records = self
                    .query_task_output(task_name, &filters, order_by, desc, offset, limit)
                    .await;
                serde_json::Value::Array(
                    records
                        .into_iter()
                        .map(|r| {
                            serde_json::json!({
                                "item_id": r.item_id,
                                "index": r.index,
                                "output": r.output,
                            })
                        })
                        .collect(),
                )
            }
        }
    }

    /// Metadata for an intercepted tool result.
    pub async fn result_info(&self, id: &str) -> Option<serde_json::Value> {
        self.result_store.result_info(id).await
    }

    /// A page of items from an intercepted array result.
    pub async fn result_items(&self, id: &str, offset: usize, count: usize) -> Option<Vec<serde_json::Value>> {
        self.result_store.result_items(id, offset, count).await
    }

    /// A single field of an intercepted object result.
    pub async fn result_get(&self, id: &str, key: &str) -> Option<serde_json::Value> {
        self.result_store.result_get(id, key).await
    }

    /// The key names of an intercepted object result.
    pub async fn result_keys(&self, id: &str) -> Option<Vec<String>> {
        self.result_store.result_keys(id).await
    }

    /// A byte-range chunk of an intercepted scalar result.
    pub async fn result_chunk(&self, id: &str, offset: usize, len: usize) -> Option<String> {
        self.result_store.result_chunk(id, offset, len).await
    }

    /// Convert an intercepted array result into dataset items for a later
    /// task's iteration.
    pub async fn result_to_dataset(&self, id: &str) -> Option<Vec<DatasetItem>> {
        self.result_store.result_to_dataset(id).await
    }

    /// Offer a freshly produced tool result to the interceptor.
    pub async fn intercept_result(&self, tool_name: &str, value: serde_json::Value) -> InterceptOutcome {
        self.result_store.intercept(tool_name, value, &self.config).await
    }

    /// Answer a question a delegated agent session asked this commander
    /// (the `ASK_COMMANDER` segment's yield/resume half of the protocol —
    /// not to be confused with [`ask_commander`](Self::ask_commander), which
    /// is this commander's own tool for querying a *different* task's
    /// commander).
    ///
    /// Deduplicates on exact question text, scoped to this commander's own
    /// `cache_key`, via the shared [`QuestionCache`]: if an identical
    /// question is already in flight, this call waits for that answer
    /// instead of asking the model again. Otherwise it drives one extra turn
    /// of this commander's own session to produce an answer, then publishes
    /// it for any concurrent identical askers.
    pub async fn answer_agent_question(&mut self, question: String) -> Result<String, MissionError> {
        match self.question_cache.ask(&self.cache_key, &question).await {
            AskOutcome::Answered(Ok(answer)) => Ok(answer),
            AskOutcome::Answered(Err(message)) => Err(MissionError::DependencyContext(message)),
            AskOutcome::BecomeAsker => {
                let prompt = format!(
                    "An agent working on this task asks: \"{}\". Respond with an ANSWER segment only.",
                    question
                );
                let reply = self
                    .session
                    .send_message(Role::User, prompt)
                    .await
                    .map_err(|e| MissionError::Llm(e.to_string()));

                match reply {
                    Ok(message) => {
                        let mut parser = SegmentParser::new();
                        parser.feed(&message.content);
                        let parsed = parser.finish();
                        let answer = parsed
                            .answer()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| message.content.to_string());
                        self.question_cache.resolve(&self.cache_key, &question, answer.clone()).await;
                        Ok(answer)
                    }
                    Err(err) => {
                        self.question_cache.fail(&self.cache_key, &question, err.to_string()).await;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Run this commander's own tagged-segment loop to completion on
    /// `objective`, dispatching any `ACTION`/`ACTION_INPUT` segment against
    /// the commander's own built-in tool surface (`call_agent`, `ask_agent`,
    /// `ask_commander`, `query_task_output`, and the result-paging tools —
    /// see [`Self::dispatch_action`]) and applying `output_schema`
    /// validation when a terminal `OUTPUT` segment is produced.
    pub async fn run(&mut self, objective: String) -> Result<CommanderOutcome, MissionError>
    where
        T: Clone,
    {
        let substituted = self.secrets.substitute(&objective);
        let mut role = Role::User;
        let mut content = substituted;

        for _ in 0..self.max_turns {
            let reply = self
                .session
                .send_message(role, content)
                .await
                .map_err(|e| MissionError::Llm(e.to_string()))?;

            let mut parser = SegmentParser::new();
            parser.feed(&reply.content);
            let parsed = parser.finish();

            if let Some(output_text) = parsed.output() {
                let output: TaskOutput = serde_json::from_str(output_text).map_err(|_| {
                    MissionError::OutputValidation {
                        task_name: self.task_name.clone(),
                        missing_fields: self.output_schema.clone(),
                    }
                })?;
                let missing: Vec<String> = self
                    .output_schema
                    .iter()
                    .filter(|field| !matches!(output.get(*field), Some(v) if !v.is_null()))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    return Err(MissionError::OutputValidation {
                        task_name: self.task_name.clone(),
                        missing_fields: missing,
                    });
                }
                let learnings = parsed.learnings().map(|s| s.to_string());
                return Ok(CommanderOutcome::Output(output, learnings));
            }

            if let Some(answer) = parsed.answer() {
                let learnings = parsed.learnings().map(|s| s.to_string());
                return Ok(CommanderOutcome::Answered(answer.to_string(), learnings));
            }

            if let Some(action) = parsed.action() {
                let input = parsed.action_input().unwrap_or("{}");
                let observation = self.dispatch_action(action, input).await;
                role = Role::User;
                content = format!("<OBSERVATION>{}</OBSERVATION>", observation);
                continue;
            }

            // Reasoning-only turn: just continue the conversation.
            role = Role::User;
            content = "Continue.".to_string();
        }

        Ok(CommanderOutcome::TurnBudgetExhausted)
    }

    /// Dispatch one `ACTION`/`ACTION_INPUT` pair against this commander's
    /// built-in tool surface, returning the observation text to feed back as
    /// the model's next input. Unknown action names get an error
    /// observation naming the tools that do exist, mirroring
    /// [`crate::agent_session::AgentSession`]'s "tool not found" handling.
    async fn dispatch_action(&self, action: &str, raw_input: &str) -> String
    where
        T: Clone,
    {
        let substituted = self.secrets.substitute(raw_input);
        let input: serde_json::Value = serde_json::from_str(&substituted).unwrap_or(serde_json::Value::Null);

        match action {
            "call_agent" => {
                let agent_name = input.get("agent_name").and_then(|v| v.as_str()).unwrap_or("");
                let task = input.get("task").and_then(|v| v.as_str()).map(str::to_string);
                let response = input.get("response").and_then(|v| v.as_str()).map(str::to_string);
                match self.call_agent(agent_name, task, response).await {
                    Ok(AgentOutcome::Answered(text)) => text,
                    Ok(AgentOutcome::AskedCommander(question)) => {
                        format!("agent '{}' asks: {}", agent_name, question)
                    }
                    Ok(AgentOutcome::TurnBudgetExhausted) => {
                        format!("agent '{}' exhausted its turn budget", agent_name)
                    }
                    Err(err) => format!("ERROR: {}", err),
                }
            }
            "ask_agent" => {
                let agent_name = input.get("agent_id").and_then(|v| v.as_str()).unwrap_or("");
                let question = input.get("question").and_then(|v| v.as_str()).unwrap_or("").to_string();
                match self.ask_agent(agent_name, question).await {
                    Ok(answer) => answer,
                    Err(err) => format!("ERROR: {}", err),
                }
            }
            "ask_commander" => {
                let target = input.get("task_name").and_then(|v| v.as_str()).unwrap_or("");
                let question = input.get("question").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let index = input.get("index").and_then(|v| v.as_u64()).map(|n| n as usize);
                match self.ask_commander(target, question, index).await {
                    Ok(answer) => answer,
                    Err(err) => format!("ERROR: {}", err),
                }
            }
            "list_commander_questions" => {
                let questions = self.list_commander_questions().await;
                serde_json::to_string(
                    &questions
                        .into_iter()
                        .map(|(q, _)| q)
                        .collect::<Vec<_>>(),
                )
                .unwrap_or_default()
            }
            "get_commander_answer" => {
                let question = input.get("question").and_then(|v| v.as_str()).unwrap_or("");
                match self.get_commander_answer(question).await {
                    Some(answer) => answer,
                    None => "ERROR: no answer published yet for that question".to_string(),
                }
            }
            "query_task_output" => {
                serde_json::to_string(&self.query_task_output_tool(&input).await).unwrap_or_default()
            }
            "dataset_next" => match self.dataset_next().await {
                Ok(Some(item)) => {
                    serde_json::json!({ "item_id": item.item_id, "value": item.value }).to_string()
                }
                Ok(None) => serde_json::json!({ "status": "exhausted" }).to_string(),
                Err(DatasetCursorError::ItemAlreadyActive) => {
                    "ERROR: the previous dataset item has not been completed yet; call \
                     dataset_item_complete before requesting the next one"
                        .to_string()
                }
                Err(DatasetCursorError::NoActiveItem) => unreachable!("dataset_next never returns this error"),
            },
            "dataset_item_complete" => {
                let item_id = input.get("item_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let output: TaskOutput = input
                    .get("output")
                    .and_then(|v| v.as_object())
                    .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
                let learnings = input.get("learnings").and_then(|v| v.as_str()).map(str::to_string);
                let result = IterationResult {
                    item_id,
                    output,
                    learnings,
                    attempts: 1,
                };
                match self.dataset_item_complete(result).await {
                    Ok(()) => serde_json::json!({ "status": "recorded" }).to_string(),
                    Err(DatasetCursorError::NoActiveItem) => {
                        "ERROR: no active dataset item to complete; call dataset_next first".to_string()
                    }
                    Err(DatasetCursorError::ItemAlreadyActive) => {
                        unreachable!("dataset_item_complete never returns this error")
                    }
                }
            }
            "result_to_dataset" => {
                let id = input.get("id").and_then(|v| v.as_str()).unwrap_or("");
                match self.result_to_dataset(id).await {
                    Some(items) => format!(
                        "promoted {} items from result '{}' into a dataset",
                        items.len(),
                        id
                    ),
                    None => "ERROR: unknown result id, or result is not an array".to_string(),
                }
            }
            "result_info" => {
                let id = input.get("id").and_then(|v| v.as_str()).unwrap_or("");
                match self.result_info(id).await {
                    Some(info) => info.to_string(),
                    None => "ERROR: unknown result id".to_string(),
                }
            }
            "result_items" => {
                let id = input.get("id").and_then(|v| v.as_str()).unwrap_or("");
                let offset = input.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                let count = input.get("count").and_then(|v| v.as_u64()).unwrap_or(20) as usize;
                match self.result_items(id, offset, count).await {
                    Some(items) => serde_json::to_string(&items).unwrap_or_default(),
                    None => "ERROR: unknown result id".to_string(),
                }
            }
            "result_get" => {
                let id = input.get("id").and_then(|v| v.as_str()).unwrap_or("");
                let key = input.get("key").and_then(|v| v.as_str()).unwrap_or("");
                match self.result_get(id, key).await {
                    Some(value) => value.to_string(),
                    None => "ERROR: unknown result id or key".to_string(),
                }
            }
            "result_keys" => {
                let id = input.get("id").and_then(|v| v.as_str()).unwrap_or("");
                match self.result_keys(id).await {
                    Some(keys) => serde_json::to_string(&keys).unwrap_or_default(),
                    None => "ERROR: unknown result id".to_string(),
                }
            }
            "result_chunk" => {
                let id = input.get("id").and_then(|v| v.as_str()).unwrap_or("");
                let offset = input.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                let length = input.get("length").and_then(|v| v.as_u64()).unwrap_or(2048) as usize;
                match self.result_chunk(id, offset, length).await {
                    Some(chunk) => chunk,
                    None => "ERROR: unknown result id".to_string(),
                }
            }
            other => format!(
                "ERROR: unknown action '{}'. Available: call_agent, ask_agent, ask_commander, \
                 list_commander_questions, get_commander_answer, query_task_output, dataset_next, \
                 dataset_item_complete, result_info, result_items, result_get, result_keys, \
                 result_chunk, result_to_dataset",
                other
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_client::MockClientWrapper;
    use std::collections::HashMap;

    fn empty_mission(task_name: &str) -> Mission {
        Mission {
            name: "m".to_string(),
            inputs: vec![],
            vars: HashMap::new(),
            tasks: vec![crate::types::TaskDeclaration {
                name: task_name.to_string(),
                objective: "do it".to_string(),
                depends_on: vec![],
                dataset: None,
            }],
        }
    }

    #[tokio::test]
    async fn produces_validated_output() {
        let client = MockClientWrapper::new(vec![
            "OUTPUT: {\"price\": 42}\n___STOP___\n".to_string(),
        ]);
        let mut commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "You are a commander.".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec!["price".to_string()],
            5,
        )
        .await
        .unwrap();

        match commander.run("quote something".to_string()).await.unwrap() {
            CommanderOutcome::Output(output, _) => {
                assert_eq!(output["price"], serde_json::json!(42));
            }
            _ => panic!("expected output"),
        }
    }

    #[tokio::test]
    async fn missing_required_output_field_is_rejected() {
        let client = MockClientWrapper::new(vec!["OUTPUT: {}\n___STOP___\n".to_string()]);
        let mut commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec!["price".to_string()],
            5,
        )
        .await
        .unwrap();

        let result = commander.run("quote something".to_string()).await;
        match result {
            Err(MissionError::OutputValidation { missing_fields, .. }) => {
                assert_eq!(missing_fields, vec!["price".to_string()]);
            }
            _ => panic!("expected output validation error"),
        }
    }

    #[tokio::test]
    async fn answer_agent_question_answers_and_caches() {
        let client = MockClientWrapper::new(vec!["ANSWER: use USD\n___STOP___\n".to_string()]);
        let mut commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap();

        let answer = commander
            .answer_agent_question("which currency?".to_string())
            .await
            .unwrap();
        assert_eq!(answer, "use USD");
    }

    #[tokio::test]
    async fn ask_commander_queries_a_registered_dependency_commander() {
        let dependency_client = MockClientWrapper::new(vec!["ANSWER: it was in USD\n___STOP___\n".to_string()]);
        let dependency: Arc<dyn ClientWrapper> = Arc::new(dependency_client);
        let dependency_commander = CommanderSession::new(
            dependency,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap();

        let registry = Arc::new(crate::commander_registry::CommanderRegistry::new());
        registry
            .register_task("quote".to_string(), Arc::new(dependency_commander))
            .await;

        let report_client: Arc<dyn ClientWrapper> = Arc::new(MockClientWrapper::new(vec![]));
        let reporter = CommanderSession::new(
            report_client,
            "report".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap()
        .with_commander_registry(registry);

        let answer = reporter
            .ask_commander("quote", "what currency was it in?".to_string(), None)
            .await
            .unwrap();
        assert_eq!(answer, "it was in USD");
    }

    #[tokio::test]
    async fn ask_commander_fails_when_target_is_not_registered() {
        let client: Arc<dyn ClientWrapper> = Arc::new(MockClientWrapper::new(vec![]));
        let reporter = CommanderSession::new(
            client,
            "report".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap()
        .with_commander_registry(Arc::new(crate::commander_registry::CommanderRegistry::new()));

        let result = reporter.ask_commander("quote", "anything?".to_string(), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn isolated_query_forks_instead_of_mutating_original() {
        let client: Arc<dyn ClientWrapper> = Arc::new(MockClientWrapper::new(vec![
            "ANSWER: yes, in USD\n___STOP___\n".to_string(),
        ]));
        let commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap();

        let answer = commander
            .answer_query_isolated("was the quote in USD?".to_string())
            .await
            .unwrap();
        assert_eq!(answer, "yes, in USD");
        assert_eq!(commander.session.history().len(), 0);
    }

    #[tokio::test]
    async fn dataset_cursor_hands_out_items_once_each() {
        let items = vec![
            DatasetItem {
                item_id: "a".to_string(),
                value: serde_json::json!({"id": "a"}),
            },
            DatasetItem {
                item_id: "b".to_string(),
                value: serde_json::json!({"id": "b"}),
            },
        ];
        let cursor = Arc::new(Mutex::new(DatasetCursor::new(items)));
        let client = MockClientWrapper::new(vec![]);
        let commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap()
        .with_dataset_cursor(cursor);

        let first = commander.dataset_next().await.unwrap().unwrap();
        assert_eq!(first.item_id, "a");
        commander
            .dataset_item_complete(IterationResult {
                item_id: first.item_id,
                output: TaskOutput::new(),
                learnings: None,
                attempts: 1,
            })
            .await
            .unwrap();

        let second = commander.dataset_next().await.unwrap().unwrap();
        assert_eq!(second.item_id, "b");
        commander
            .dataset_item_complete(IterationResult {
                item_id: second.item_id,
                output: TaskOutput::new(),
                learnings: None,
                attempts: 1,
            })
            .await
            .unwrap();

        assert!(commander.dataset_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dataset_next_rejects_a_second_call_without_completing_the_first() {
        let items = vec![DatasetItem {
            item_id: "a".to_string(),
            value: serde_json::json!({"id": "a"}),
        }];
        let cursor = Arc::new(Mutex::new(DatasetCursor::new(items)));
        let client = MockClientWrapper::new(vec![]);
        let commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap()
        .with_dataset_cursor(cursor);

        assert!(commander.dataset_next().await.unwrap().is_some());
        assert_eq!(commander.dataset_next().await, Err(DatasetCursorError::ItemAlreadyActive));
    }

    #[tokio::test]
    async fn dataset_item_complete_rejects_completion_with_no_active_item() {
        let cursor = Arc::new(Mutex::new(DatasetCursor::new(vec![])));
        let client = MockClientWrapper::new(vec![]);
        let commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap()
        .with_dataset_cursor(cursor);

        let result = commander
            .dataset_item_complete(IterationResult {
                item_id: "ghost".to_string(),
                output: TaskOutput::new(),
                learnings: None,
                attempts: 1,
            })
            .await;
        assert_eq!(result, Err(DatasetCursorError::NoActiveItem));
    }

    #[tokio::test]
    async fn dataset_next_and_complete_are_reachable_through_dispatch_action() {
        let items = vec![DatasetItem {
            item_id: "a".to_string(),
            value: serde_json::json!({"id": "a"}),
        }];
        let cursor = Arc::new(Mutex::new(DatasetCursor::new(items)));
        let client = MockClientWrapper::new(vec![]);
        let commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap()
        .with_dataset_cursor(cursor);

        let observation = commander.dispatch_action("dataset_next", "{}").await;
        let parsed: serde_json::Value = serde_json::from_str(&observation).unwrap();
        assert_eq!(parsed["item_id"], serde_json::json!("a"));

        let observation = commander
            .dispatch_action(
                "dataset_item_complete",
                r#"{"item_id": "a", "output": {"price": 9}}"#,
            )
            .await;
        assert_eq!(observation, serde_json::json!({ "status": "recorded" }).to_string());

        let observation = commander.dispatch_action("dataset_next", "{}").await;
        assert_eq!(observation, serde_json::json!({ "status": "exhausted" }).to_string());
    }

    #[tokio::test]
    async fn call_agent_reuses_the_same_session_across_calls() {
        let client = MockClientWrapper::new(vec!["ANSWER: ok\n___STOP___\n".to_string()]);
        let commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap();

        match commander
            .call_agent("researcher", Some("find the price".to_string()), None)
            .await
            .unwrap()
        {
            AgentOutcome::Answered(text) => assert_eq!(text, "ok"),
            _ => panic!("expected an answer"),
        }
        assert_eq!(commander.agents.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn ask_agent_requires_an_existing_session() {
        let client = MockClientWrapper::new(vec![]);
        let commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap();

        let result = commander.ask_agent("researcher", "still there?".to_string()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_commander_questions_reports_asked_and_answered() {
        let client = MockClientWrapper::new(vec!["ANSWER: use USD\n___STOP___\n".to_string()]);
        let mut commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::new(KnowledgeStore::new()),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap();

        commander.answer_agent_question("which currency?".to_string()).await.unwrap();
        let questions = commander.list_commander_questions().await;
        assert_eq!(questions.len(), 1);
        assert_eq!(
            commander.get_commander_answer("which currency?").await,
            Some("use USD".to_string())
        );
    }

    fn published_prices(task_name: &str, prices: &[f64]) -> crate::types::TaskResult {
        crate::types::TaskResult {
            task_name: task_name.to_string(),
            iterations: prices
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let mut output = TaskOutput::new();
                    output.insert("price".to_string(), serde_json::Value::from(*p));
                    IterationResult {
                        item_id: format!("item_{}", i),
                        output,
                        learnings: None,
                        attempts: 1,
                    }
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn query_task_output_tool_filters_and_paginates() {
        let knowledge_store = Arc::new(KnowledgeStore::new());
        knowledge_store.publish(published_prices("quote", &[30.0, 10.0, 20.0])).await;
        let client = MockClientWrapper::new(vec!["REASONING: n/a\n".to_string()]);
        let commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::clone(&knowledge_store),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap();

        let result = commander
            .query_task_output_tool(&serde_json::json!({
                "task_name": "quote",
                "order_by": "price",
                "desc": true,
                "limit": 1,
            }))
            .await;
        let records = result.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["output"]["price"], serde_json::json!(30.0));
    }

    #[tokio::test]
    async fn query_task_output_tool_aggregates_with_group_by() {
        let knowledge_store = Arc::new(KnowledgeStore::new());
        let mut result = published_prices("quote", &[10.0, 20.0, 30.0]);
        result.iterations[0].output.insert("region".to_string(), serde_json::Value::from("east"));
        result.iterations[1].output.insert("region".to_string(), serde_json::Value::from("west"));
        result.iterations[2].output.insert("region".to_string(), serde_json::Value::from("east"));
        knowledge_store.publish(result).await;

        let client = MockClientWrapper::new(vec!["REASONING: n/a\n".to_string()]);
        let commander = CommanderSession::new(
            client,
            "quote".to_string(),
            "sys".to_string(),
            String::new(),
            Arc::clone(&knowledge_store),
            Arc::new(ResultStore::new()),
            Arc::new(QuestionCache::new()),
            Arc::new(SecretRegistry::new()),
            Arc::new(RuntimeConfig::default()),
            vec![],
            5,
        )
        .await
        .unwrap();

        let result = commander
            .query_task_output_tool(&serde_json::json!({
                "task_name": "quote",
                "aggregate": { "field": "price", "op": "sum", "group_by": "region" },
            }))
            .await;
        let groups = result.as_array().unwrap();
        assert_eq!(groups.len(), 2);
    }
}
