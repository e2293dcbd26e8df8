//! Dataset-driven iteration.
//!
//! A task bound to a dataset runs its commander once per item instead of
//! once overall. [`run_task`] resolves the dataset, then dispatches to
//! [`run_sequential`] or [`run_parallel`] depending on the task's declared
//! [`IterationMode`]. Both honor the same retry and smoke-test rules; they
//! differ only in whether one commander spans the whole dataset (sequential,
//! pulling items via `dataset_next`/`dataset_item_complete`) or a fresh
//! commander is spun up per item under a concurrency-limiting semaphore
//! (parallel).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};

use crate::ancestor_context::resolve_ancestor_context;
use crate::client_wrapper::ClientWrapper;
use crate::commander_registry::CommanderRegistry;
use crate::commander_session::{CommanderOutcome, CommanderSession, DatasetCursor};
use crate::config::RuntimeConfig;
use crate::error::MissionError;
use crate::knowledge_store::KnowledgeStore;
use crate::objective::resolve_objective;
use crate::question_cache::QuestionCache;
use crate::result_store::ResultStore;
use crate::secrets::SecretRegistry;
use crate::streaming::{StreamEvent, StreamingHandler};
use crate::types::{
    item_id_for, DatasetBinding, IterationMode, IterationResult, Mission, ResolvedDataset,
    TaskDeclaration, TaskOutput, TaskResult,
};

/// Resolve a task's bound input (expected to be a JSON array) into a
/// [`ResolvedDataset`], tagging every item with a stable id.
pub fn resolve_dataset(
    task_name: &str,
    binding: &DatasetBinding,
    inputs: &std::collections::HashMap<String, Value>,
) -> Result<ResolvedDataset, MissionError> {
    let raw = inputs.get(&binding.bind_to_input).ok_or_else(|| {
        MissionError::DatasetResolution(format!(
            "task '{}' binds to undeclared input '{}'",
            task_name, binding.bind_to_input
        ))
    })?;
    let items = match raw {
        Value::Array(list) => list
            .iter()
            .enumerate()
            .map(|(i, v)| crate::types::DatasetItem {
                item_id: item_id_for(v, i),
                value: v.clone(),
            })
            .collect(),
        _ => {
            return Err(MissionError::DatasetResolution(format!(
                "task '{}' input '{}' is not a list",
                task_name, binding.bind_to_input
            )))
        }
    };
    Ok(ResolvedDataset {
        task_name: task_name.to_string(),
        items,
    })
}

/// Everything an iteration run needs that is shared across every commander
/// it creates, bundled so call sites don't thread eight Arcs by hand.
pub struct IterationDeps {
    pub knowledge_store: Arc<KnowledgeStore>,
    pub result_store: Arc<ResultStore>,
    pub question_cache: Arc<QuestionCache>,
    pub secrets: Arc<SecretRegistry>,
    pub config: Arc<RuntimeConfig>,
    pub commander_registry: Arc<CommanderRegistry>,
    pub streamer: Arc<dyn StreamingHandler>,
}

/// Push a [`StreamEvent`] to the handler. Delivery is awaited in place — the
/// handler contract requires implementations not to block for long — so
/// events reach a consumer in the same order they're raised here.
async fn emit(streamer: &Arc<dyn StreamingHandler>, event: StreamEvent) {
    streamer.handle(event).await;
}

/// Run `task` to completion (iterated or not) and return its published
/// [`TaskResult`].
pub async fn run_task(
    task: &TaskDeclaration,
    mission: &Mission,
    client: Arc<dyn ClientWrapper>,
    system_prompt: String,
    inputs: &std::collections::HashMap<String, Value>,
    deps: &IterationDeps,
) -> Result<TaskResult, MissionError> {
    match &task.dataset {
        None => run_single(task, mission, client, system_prompt, deps).await,
        Some(binding) => {
            let dataset = resolve_dataset(&task.name, binding, inputs)?;
            match binding.mode {
                IterationMode::Sequential => {
                    run_sequential(task, mission, client, system_prompt, binding, dataset, deps).await
                }
                IterationMode::Parallel => {
                    run_parallel(task, mission, client, system_prompt, binding, dataset, deps).await
                }
            }
        }
    }
}

async fn run_single(
    task: &TaskDeclaration,
    mission: &Mission,
    client: Arc<dyn ClientWrapper>,
    system_prompt: String,
    deps: &IterationDeps,
) -> Result<TaskResult, MissionError> {
    let objective = resolve_objective(&task.objective, &mission.vars, &std::collections::HashMap::new(), None);
    let dependency_context = resolve_ancestor_context(mission, &deps.commander_registry, &task.name).await?;

    let mut commander = CommanderSession::new(
        client,
        task.name.clone(),
        system_prompt,
        dependency_context,
        Arc::clone(&deps.knowledge_store),
        Arc::clone(&deps.result_store),
        Arc::clone(&deps.question_cache),
        Arc::clone(&deps.secrets),
        Arc::clone(&deps.config),
        Vec::new(),
        50,
    )
    .await?
    .with_cache_key(task.name.clone())
    .with_commander_registry(Arc::clone(&deps.commander_registry));

    emit(
        &deps.streamer,
        StreamEvent::IterationStarted {
            task_name: task.name.clone(),
            item_id: "item_0".to_string(),
        },
    ).await;
    let (output, learnings) = match run_commander_to_output(&mut commander, objective).await {
        Ok(pair) => pair,
        Err(err) => {
            emit(
                &deps.streamer,
                StreamEvent::IterationFailed {
                    task_name: task.name.clone(),
                    item_id: "item_0".to_string(),
                    message: err.to_string(),
                },
            ).await;
            return Err(err);
        }
    };
    emit(
        &deps.streamer,
        StreamEvent::IterationCompleted {
            task_name: task.name.clone(),
            item_id: "item_0".to_string(),
        },
    ).await;
    deps.commander_registry
        .register_task(task.name.clone(), Arc::new(commander))
        .await;
    let result = TaskResult {
        task_name: task.name.clone(),
        iterations: vec![IterationResult {
            item_id: "item_0".to_string(),
            output,
            learnings,
            attempts: 1,
        }],
    };
    deps.knowledge_store.publish(result.clone()).await;
    Ok(result)
}

async fn run_commander_to_output(
    commander: &mut CommanderSession<Arc<dyn ClientWrapper>>,
    objective: String,
) -> Result<(TaskOutput, Option<String>), MissionError> {
    match commander.run(objective).await? {
        CommanderOutcome::Output(output, learnings) => Ok((output, learnings)),
        CommanderOutcome::Answered(text, learnings) => {
            let mut output = TaskOutput::new();
            output.insert("answer".to_string(), Value::String(text));
            Ok((output, learnings))
        }
        CommanderOutcome::TurnBudgetExhausted => Err(MissionError::Llm(
            "task turn budget exhausted without a terminal segment".to_string(),
        )),
    }
}

/// Run with retries: the same closure is retried up to `max_retries` extra
/// times when it fails with a retryable [`MissionError`]. `on_retry` is
/// invoked with the attempt number just consumed whenever another attempt
/// will follow, for progress reporting.
async fn with_retries<F, Fut, O, R, RFut>(
    max_retries: usize,
    mut attempt: F,
    mut on_retry: R,
) -> (Result<O, MissionError>, usize)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<O, MissionError>>,
    R: FnMut(usize) -> RFut,
    RFut: std::future::Future<Output = ()>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return (Ok(value), attempts),
            Err(err) if err.is_retryable() && attempts <= max_retries => {
                on_retry(attempts).await;
                continue;
            }
            Err(err) => return (Err(err), attempts),
        }
    }
}

async fn run_sequential(
    task: &TaskDeclaration,
    mission: &Mission,
    client: Arc<dyn ClientWrapper>,
    system_prompt: String,
    binding: &DatasetBinding,
    dataset: ResolvedDataset,
    deps: &IterationDeps,
) -> Result<TaskResult, MissionError> {
    let max_retries = binding.max_retries.unwrap_or(deps.config.default_max_retries);
    let cursor = Arc::new(Mutex::new(DatasetCursor::new(dataset.items)));
    let dependency_context = resolve_ancestor_context(mission, &deps.commander_registry, &task.name).await?;

    let mut commander = CommanderSession::new(
        client,
        task.name.clone(),
        system_prompt,
        dependency_context,
        Arc::clone(&deps.knowledge_store),
        Arc::clone(&deps.result_store),
        Arc::clone(&deps.question_cache),
        Arc::clone(&deps.secrets),
        Arc::clone(&deps.config),
        binding.output_schema.clone(),
        50,
    )
    .await?
    .with_dataset_cursor(Arc::clone(&cursor))
    .with_cache_key(format!("{}[0]", task.name))
    .with_commander_registry(Arc::clone(&deps.commander_registry));

    let mut iterations = Vec::new();
    let mut previous_output: Option<TaskOutput> = None;
    let mut previous_learnings: Option<String> = None;

    while let Some(item) = commander
        .dataset_next()
        .await
        .expect("this loop always completes an item before pulling the next")
    {
        let mut objective = resolve_objective(
            &task.objective,
            &mission.vars,
            &std::collections::HashMap::new(),
            Some(&item.value),
        );
        if let Some(prev) = &previous_output {
            objective.push_str(&format!(
                "\n\nThe previous iteration ran against a *different* dataset item. Its output \
                 was: {} — treat this only as pagination/cumulative-state/behavioral context, not \
                 as data about the current item.",
                serde_json::to_string(prev).unwrap_or_default()
            ));
        }
        if let Some(prev) = &previous_learnings {
            objective.push_str(&format!("\n\nLearnings carried forward from the previous iteration: {}", prev));
        }

        emit(
            &deps.streamer,
            StreamEvent::IterationStarted {
                task_name: task.name.clone(),
                item_id: item.item_id.clone(),
            },
        ).await;

        let (outcome, attempts) = with_retries(
            max_retries,
            || {
                let commander = &mut commander;
                let objective = objective.clone();
                async move { run_commander_to_output(commander, objective).await }
            },
            |attempt| {
                let streamer = &deps.streamer;
                let task_name = task.name.clone();
                let item_id = item.item_id.clone();
                async move {
                    emit(
                        streamer,
                        StreamEvent::IterationRetrying {
                            task_name,
                            item_id,
                            attempt,
                        },
                    )
                    .await;
                }
            },
        )
        .await;

        match outcome {
            Ok((output, learnings)) => {
                previous_output = Some(output.clone());
                previous_learnings = learnings.clone();
                let result = IterationResult {
                    item_id: item.item_id.clone(),
                    output,
                    learnings,
                    attempts,
                };
                commander
                    .dataset_item_complete(result.clone())
                    .await
                    .expect("the item just pulled from dataset_next is still active");
                emit(
                    &deps.streamer,
                    StreamEvent::IterationCompleted {
                        task_name: task.name.clone(),
                        item_id: item.item_id.clone(),
                    },
                ).await;
                iterations.push(result);
            }
            Err(err) => {
                emit(
                    &deps.streamer,
                    StreamEvent::IterationFailed {
                        task_name: task.name.clone(),
                        item_id: item.item_id.clone(),
                        message: err.to_string(),
                    },
                ).await;
                return Err(err);
            }
        }
    }

    deps.commander_registry
        .register_iteration(task.name.clone(), 0, Arc::new(commander))
        .await;

    let result = TaskResult {
        task_name: task.name.clone(),
        iterations,
    };
    deps.knowledge_store.publish(result.clone()).await;
    Ok(result)
}

async fn run_parallel(
    task: &TaskDeclaration,
    mission: &Mission,
    client: Arc<dyn ClientWrapper>,
    system_prompt: String,
    binding: &DatasetBinding,
    dataset: ResolvedDataset,
    deps: &IterationDeps,
) -> Result<TaskResult, MissionError> {
    let max_retries = binding.max_retries.unwrap_or(deps.config.default_max_retries);
    let concurrency = binding
        .concurrency_limit
        .unwrap_or(deps.config.default_concurrency_limit)
        .max(1);
    let stagger = Duration::from_millis(binding.start_stagger_ms.unwrap_or(0));
    // Resolved once for the whole iterated task, per §4.7 — not once per
    // iteration or per retry attempt, since it can mean forking and querying
    // every non-iterated ancestor's commander.
    let dependency_context = resolve_ancestor_context(mission, &deps.commander_registry, &task.name).await?;

    let mut iterations = Vec::new();
    let mut remaining = dataset.items;

    if binding.smoke_test && !remaining.is_empty() {
        let first = remaining.remove(0);
        let objective = resolve_objective(
            &task.objective,
            &mission.vars,
            &std::collections::HashMap::new(),
            Some(&first.value),
        );
        // Smoke-test gate: if iteration 0 ultimately fails (after its own
        // retries), the rest of the dataset never starts.
        emit(
            &deps.streamer,
            StreamEvent::IterationStarted {
                task_name: task.name.clone(),
                item_id: first.item_id.clone(),
            },
        ).await;
        let (outcome, attempts, smoketest_commander) = run_one_item(
            task,
            dependency_context.clone(),
            Arc::clone(&client),
            system_prompt.clone(),
            binding,
            &first.item_id,
            objective,
            max_retries,
            deps,
        )
        .await;
        match outcome {
            Ok((output, learnings)) => {
                if let Some(commander) = smoketest_commander {
                    deps.commander_registry
                        .register_iteration(task.name.clone(), 0, Arc::new(commander))
                        .await;
                }
                emit(
                    &deps.streamer,
                    StreamEvent::IterationCompleted {
                        task_name: task.name.clone(),
                        item_id: first.item_id.clone(),
                    },
                ).await;
                iterations.push(IterationResult {
                    item_id: first.item_id,
                    output,
                    learnings,
                    attempts,
                })
            }
            Err(err) => {
                emit(
                    &deps.streamer,
                    StreamEvent::IterationFailed {
                        task_name: task.name.clone(),
                        item_id: first.item_id.clone(),
                        message: err.to_string(),
                    },
                ).await;
                return Err(err);
            }
        }
    }

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut handles = Vec::new();
    // If the smoke-test already consumed dataset index 0, the remaining
    // items' registry indices must start at 1 so they don't collide with it.
    let index_offset = if binding.smoke_test && !iterations.is_empty() { 1 } else { 0 };

    for (index, item) in remaining.into_iter().enumerate() {
        let registry_index = index + index_offset;
        let permit_sem = Arc::clone(&semaphore);
        let client = Arc::clone(&client);
        let task_name = task.name.clone();
        let objective_template = task.objective.clone();
        let vars = mission.vars.clone();
        let system_prompt = system_prompt.clone();
        let binding = binding.clone();
        let knowledge_store = Arc::clone(&deps.knowledge_store);
        let result_store = Arc::clone(&deps.result_store);
        let question_cache = Arc::clone(&deps.question_cache);
        let secrets = Arc::clone(&deps.secrets);
        let config = Arc::clone(&deps.config);
        let commander_registry = Arc::clone(&deps.commander_registry);
        let streamer = Arc::clone(&deps.streamer);
        let mission_name = mission.name.clone();
        let mission_tasks = mission.tasks.clone();
        let mission_inputs = mission.inputs.clone();
        let dependency_context = dependency_context.clone();
        let stagger = stagger * index as u32;

        let handle = tokio::spawn(async move {
            if !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
            let _permit = permit_sem.acquire().await.expect("semaphore not closed");

            let mission = Mission {
                name: mission_name,
                inputs: mission_inputs,
                vars,
                tasks: mission_tasks,
            };
            let objective = resolve_objective(
                &objective_template,
                &mission.vars,
                &std::collections::HashMap::new(),
                Some(&item.value),
            );
            let task = TaskDeclaration {
                name: task_name,
                objective: objective_template,
                depends_on: Vec::new(),
                dataset: Some(binding.clone()),
            };
            let deps = IterationDeps {
                knowledge_store,
                result_store,
                question_cache,
                secrets,
                config,
                commander_registry,
                streamer,
            };

            emit(
                &deps.streamer,
                StreamEvent::IterationStarted {
                    task_name: task.name.clone(),
                    item_id: item.item_id.clone(),
                },
            ).await;

            let (attempt_outcome, attempts) = with_retries(
                max_retries,
                || {
                    let task = &task;
                    let client = Arc::clone(&client);
                    let system_prompt = system_prompt.clone();
                    let objective = objective.clone();
                    let dependency_context = dependency_context.clone();
                    let deps = &deps;
                    async move {
                        let mut commander = CommanderSession::new(
                            client,
                            task.name.clone(),
                            system_prompt,
                            dependency_context,
                            Arc::clone(&deps.knowledge_store),
                            Arc::clone(&deps.result_store),
                            Arc::clone(&deps.question_cache),
                            Arc::clone(&deps.secrets),
                            Arc::clone(&deps.config),
                            binding.output_schema.clone(),
                            50,
                        )
                        .await?;
                        run_commander_to_output(&mut commander, objective.clone())
                            .await
                            .map(|(output, learnings)| (output, learnings, commander))
                    }
                },
                |attempt| {
                    let streamer = &deps.streamer;
                    let task_name = task.name.clone();
                    let item_id = item.item_id.clone();
                    async move {
                        emit(
                            streamer,
                            StreamEvent::IterationRetrying {
                                task_name,
                                item_id,
                                attempt,
                            },
                        )
                        .await;
                    }
                },
            )
            .await;

            let outcome = match attempt_outcome {
                Ok((output, learnings, commander)) => {
                    deps.commander_registry
                        .register_iteration(task.name.clone(), registry_index, Arc::new(commander))
                        .await;
                    emit(
                        &deps.streamer,
                        StreamEvent::IterationCompleted {
                            task_name: task.name.clone(),
                            item_id: item.item_id.clone(),
                        },
                    ).await;
                    Ok((output, learnings))
                }
                Err(err) => {
                    emit(
                        &deps.streamer,
                        StreamEvent::IterationFailed {
                            task_name: task.name.clone(),
                            item_id: item.item_id.clone(),
                            message: err.to_string(),
                        },
                    ).await;
                    Err(err)
                }
            };

            outcome.map(|(output, learnings)| IterationResult {
                item_id: item.item_id,
                output,
                learnings,
                attempts,
            })
        });
        handles.push(handle);
    }

    for handle in handles {
        let joined = handle
            .await
            .map_err(|e| MissionError::Llm(format!("iteration task panicked: {}", e)))?;
        iterations.push(joined?);
    }

    let result = TaskResult {
        task_name: task.name.clone(),
        iterations,
    };
    deps.knowledge_store.publish(result.clone()).await;
    Ok(result)
}

#[allow(clippy::too_many_arguments)]
async fn run_one_item(
    task: &TaskDeclaration,
    dependency_context: String,
    client: Arc<dyn ClientWrapper>,
    system_prompt: String,
    binding: &DatasetBinding,
    item_id: &str,
    objective: String,
    max_retries: usize,
    deps: &IterationDeps,
) -> (
    Result<(TaskOutput, Option<String>), MissionError>,
    usize,
    Option<CommanderSession<Arc<dyn ClientWrapper>>>,
) {
    let (outcome, attempts) = with_retries(
        max_retries,
        || {
            let client = Arc::clone(&client);
            let system_prompt = system_prompt.clone();
            let objective = objective.clone();
            let dependency_context = dependency_context.clone();
            async move {
                let mut commander = CommanderSession::new(
                    client,
                    task.name.clone(),
                    system_prompt,
                    dependency_context,
                    Arc::clone(&deps.knowledge_store),
                    Arc::clone(&deps.result_store),
                    Arc::clone(&deps.question_cache),
                    Arc::clone(&deps.secrets),
                    Arc::clone(&deps.config),
                    binding.output_schema.clone(),
                    50,
                )
                .await?;
                run_commander_to_output(&mut commander, objective.clone())
                    .await
                    .map(|(output, learnings)| (output, learnings, commander))
            }
        },
        |attempt| {
            let streamer = &deps.streamer;
            let task_name = task.name.clone();
            let item_id = item_id.to_string();
            async move {
                emit(
                    streamer,
                    StreamEvent::IterationRetrying {
                        task_name,
                        item_id,
                        attempt,
                    },
                )
                .await;
            }
        },
    )
    .await;

    match outcome {
        Ok((output, learnings, commander)) => (Ok((output, learnings)), attempts, Some(commander)),
        Err(err) => (Err(err), attempts, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_client::MockClientWrapper;
    use std::collections::HashMap;

    fn mission_with_task(task: TaskDeclaration) -> Mission {
        Mission {
            name: "m".to_string(),
            inputs: vec![],
            vars: HashMap::new(),
            tasks: vec![task],
        }
    }

    fn deps() -> IterationDeps {
        IterationDeps {
            knowledge_store: Arc::new(KnowledgeStore::new()),
            result_store: Arc::new(ResultStore::new()),
            question_cache: Arc::new(QuestionCache::new()),
            secrets: Arc::new(SecretRegistry::new()),
            config: Arc::new(RuntimeConfig::default()),
            commander_registry: Arc::new(CommanderRegistry::new()),
            streamer: Arc::new(crate::streaming::NullStreamingHandler),
        }
    }

    #[tokio::test]
    async fn single_task_publishes_one_iteration() {
        let task = TaskDeclaration {
            name: "greet".to_string(),
            objective: "say hi".to_string(),
            depends_on: vec![],
            dataset: None,
        };
        let mission = mission_with_task(task.clone());
        let client: Arc<dyn ClientWrapper> =
            Arc::new(MockClientWrapper::new(vec!["ANSWER: hi there\n___STOP___\n".to_string()]));
        let deps = deps();
        let result = run_task(&task, &mission, client, "sys".to_string(), &HashMap::new(), &deps)
            .await
            .unwrap();
        assert_eq!(result.iterations.len(), 1);
        assert_eq!(result.iterations[0].output["answer"], Value::String("hi there".to_string()));
    }

    #[tokio::test]
    async fn sequential_dataset_runs_one_iteration_per_item() {
        let binding = DatasetBinding {
            bind_to_input: "items".to_string(),
            mode: IterationMode::Sequential,
            concurrency_limit: None,
            max_retries: None,
            start_stagger_ms: None,
            smoke_test: false,
            output_schema: vec!["n".to_string()],
        };
        let task = TaskDeclaration {
            name: "square".to_string(),
            objective: "square {{item.n}}".to_string(),
            depends_on: vec![],
            dataset: Some(binding),
        };
        let mission = mission_with_task(task.clone());
        let client: Arc<dyn ClientWrapper> = Arc::new(MockClientWrapper::new(vec![
            "OUTPUT: {\"n\": 1}\n___STOP___\n".to_string(),
            "OUTPUT: {\"n\": 4}\n___STOP___\n".to_string(),
        ]));
        let mut inputs = HashMap::new();
        inputs.insert("items".to_string(), serde_json::json!([{"n": 1}, {"n": 2}]));
        let deps = deps();
        let result = run_task(&task, &mission, client, "sys".to_string(), &inputs, &deps)
            .await
            .unwrap();
        assert_eq!(result.iterations.len(), 2);
    }

    #[tokio::test]
    async fn sequential_dataset_threads_learnings_into_the_next_iteration() {
        let binding = DatasetBinding {
            bind_to_input: "items".to_string(),
            mode: IterationMode::Sequential,
            concurrency_limit: None,
            max_retries: None,
            start_stagger_ms: None,
            smoke_test: false,
            output_schema: vec!["n".to_string()],
        };
        let task = TaskDeclaration {
            name: "square".to_string(),
            objective: "square {{item.n}}".to_string(),
            depends_on: vec![],
            dataset: Some(binding),
        };
        let mission = mission_with_task(task.clone());
        let mock = Arc::new(MockClientWrapper::new(vec![
            "OUTPUT: {\"n\": 1}\nLEARNINGS: pagination cursor was \"abc\"\n___STOP___\n".to_string(),
            "OUTPUT: {\"n\": 4}\n___STOP___\n".to_string(),
        ]));
        let client: Arc<dyn ClientWrapper> = mock.clone();
        let mut inputs = HashMap::new();
        inputs.insert("items".to_string(), serde_json::json!([{"n": 1}, {"n": 2}]));
        let deps = deps();
        let result = run_task(&task, &mission, client, "sys".to_string(), &inputs, &deps)
            .await
            .unwrap();

        assert_eq!(result.iterations[0].learnings.as_deref(), Some("pagination cursor was \"abc\""));

        let second_call = mock.messages_for_call(1).await.unwrap();
        let last_message = second_call.last().unwrap();
        assert!(last_message.content.contains("pagination cursor was \"abc\""));
    }

    #[test]
    fn resolve_dataset_rejects_non_array_input() {
        let binding = DatasetBinding {
            bind_to_input: "items".to_string(),
            mode: IterationMode::Sequential,
            concurrency_limit: None,
            max_retries: None,
            start_stagger_ms: None,
            smoke_test: false,
            output_schema: vec![],
        };
        let mut inputs = HashMap::new();
        inputs.insert("items".to_string(), serde_json::json!("not a list"));
        let result = resolve_dataset("t", &binding, &inputs);
        assert!(result.is_err());
    }
}
