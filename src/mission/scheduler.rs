//! The DAG scheduler.
//!
//! Topologically sorts a mission's tasks once, then walks the DAG: every
//! task whose dependencies have all completed is launched concurrently as
//! its own [`tokio::spawn`]ed unit of work. There is no global concurrency
//! cap on tasks — only [`crate::iteration`]'s parallel mode bounds
//! concurrency, and only within one task's dataset. The first task error
//! observed marks the mission failed; the scheduler then drains whatever is
//! still in flight and returns that error, leaving every other task's
//! already-published output queryable through the knowledge store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::client_wrapper::ClientWrapper;
use crate::error::MissionError;
use crate::iteration::{self, IterationDeps};
use crate::streaming::StreamEvent;
use crate::types::{IterationMode, Mission, TaskDeclaration, TaskResult};

/// Topologically sort `mission`'s tasks (Kahn's algorithm), or report the
/// names of one cycle if the dependency graph is not acyclic.
///
/// # Examples
///
/// ```rust
/// use missionrt::scheduler::topological_sort;
/// use missionrt::types::{Mission, TaskDeclaration};
/// use std::collections::HashMap;
///
/// let mission = Mission {
///     name: "m".to_string(),
///     inputs: vec![],
///     vars: HashMap::new(),
///     tasks: vec![
///         TaskDeclaration { name: "b".into(), objective: "".into(), depends_on: vec!["a".into()], dataset: None },
///         TaskDeclaration { name: "a".into(), objective: "".into(), depends_on: vec![], dataset: None },
///     ],
/// };
/// let order = topological_sort(&mission).unwrap();
/// assert_eq!(order, vec!["a".to_string(), "b".to_string()]);
/// ```
pub fn topological_sort(mission: &Mission) -> Result<Vec<String>, MissionError> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in &mission.tasks {
        in_degree.entry(task.name.as_str()).or_insert(0);
        for dep in &task.depends_on {
            if mission.task(dep).is_none() {
                return Err(MissionError::ConfigResolution(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.name, dep
                )));
            }
            *in_degree.entry(task.name.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(task.name.as_str());
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    ready.sort();

    let mut order = Vec::with_capacity(mission.tasks.len());
    let mut frontier: std::collections::VecDeque<&str> = ready.into();

    while let Some(name) = frontier.pop_front() {
        order.push(name.to_string());
        if let Some(children) = dependents.get(name) {
            let mut newly_ready = Vec::new();
            for child in children {
                let degree = in_degree.get_mut(child).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    newly_ready.push(*child);
                }
            }
            newly_ready.sort();
            for child in newly_ready {
                frontier.push_back(child);
            }
        }
    }

    if order.len() != mission.tasks.len() {
        let unresolved: Vec<String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        return Err(MissionError::ConfigResolution(format!(
            "dependency cycle detected among tasks: {}",
            unresolved.join(", ")
        )));
    }

    Ok(order)
}

/// Validate structural invariants on a mission's task declarations: unique
/// names, no self-dependency, every dependency reference resolves, at least
/// one agent available (checked by the caller, which knows the mission's
/// default agent roster — this function only checks what it has in scope).
pub fn validate_dag(mission: &Mission) -> Result<(), MissionError> {
    let mut seen = HashSet::new();
    for task in &mission.tasks {
        if !seen.insert(task.name.as_str()) {
            return Err(MissionError::ConfigResolution(format!(
                "duplicate task name '{}'",
                task.name
            )));
        }
        if task.depends_on.iter().any(|dep| dep == &task.name) {
            return Err(MissionError::ConfigResolution(format!(
                "task '{}' depends on itself",
                task.name
            )));
        }
        if let Some(dataset) = &task.dataset {
            if dataset.mode == IterationMode::Sequential
                && (dataset.concurrency_limit.is_some()
                    || dataset.start_stagger_ms.is_some()
                    || dataset.smoke_test)
            {
                return Err(MissionError::ConfigResolution(format!(
                    "task '{}' sets a parallel-only iterator option (concurrency_limit, \
                     start_stagger_ms, or smoke_test) while its dataset mode is sequential",
                    task.name
                )));
            }
        }
    }
    // `topological_sort` independently reports missing references and
    // cycles; run it purely for its error, discarding the order.
    topological_sort(mission).map(|_| ())
}

/// Per-task spawn inputs the scheduler hands to [`iteration::run_task`],
/// factored out so `run_mission` doesn't need ten positional arguments.
pub struct SchedulerDeps {
    pub client: Arc<dyn ClientWrapper>,
    pub system_prompt: String,
    pub inputs: HashMap<String, serde_json::Value>,
    pub iteration_deps: IterationDeps,
}

/// Run every task in `mission` to completion, honoring dependency order and
/// running independent tasks concurrently.
///
/// On the first task failure, the scheduler stops launching new tasks,
/// drains whatever is already in flight (so their knowledge-store writes,
/// if any, still land), and returns that task's error. Every task result
/// published before the failure remains in `deps.iteration_deps.knowledge_store`.
pub async fn run_mission(
    mission: &Mission,
    deps: SchedulerDeps,
) -> Result<HashMap<String, TaskResult>, MissionError> {
    validate_dag(mission)?;

    let deps = Arc::new(deps);
    let mission = Arc::new(mission.clone());

    let mut completed: HashSet<String> = HashSet::new();
    let mut in_flight: HashSet<String> = HashSet::new();
    let mut results: HashMap<String, TaskResult> = HashMap::new();

    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Result<TaskResult, MissionError>)>();
    let mut first_error: Option<MissionError> = None;

    loop {
        let ready: Vec<TaskDeclaration> = mission
            .tasks
            .iter()
            .filter(|t| {
                !completed.contains(&t.name)
                    && !in_flight.contains(&t.name)
                    && t.depends_on.iter().all(|d| completed.contains(d))
            })
            .cloned()
            .collect();

        if first_error.is_none() {
            for task in ready {
                in_flight.insert(task.name.clone());
                let tx = tx.clone();
                let mission = Arc::clone(&mission);
                let deps = Arc::clone(&deps);
                tokio::spawn(async move {
                    log::info!("task '{}' started", task.name);
                    let streamer = Arc::clone(&deps.iteration_deps.streamer);
                    streamer
                        .handle(StreamEvent::TaskStarted {
                            task_name: task.name.clone(),
                        })
                        .await;
                    let outcome = iteration::run_task(
                        &task,
                        &mission,
                        Arc::clone(&deps.client),
                        deps.system_prompt.clone(),
                        &deps.inputs,
                        &deps.iteration_deps,
                    )
                    .await;
                    match &outcome {
                        Ok(_) => {
                            log::info!("task '{}' completed", task.name);
                            streamer
                                .handle(StreamEvent::TaskCompleted {
                                    task_name: task.name.clone(),
                                })
                                .await;
                        }
                        Err(err) => {
                            log::error!("task '{}' failed: {}", task.name, err);
                            streamer
                                .handle(StreamEvent::TaskFailed {
                                    task_name: task.name.clone(),
                                    message: err.to_string(),
                                })
                                .await;
                        }
                    }
                    let _ = tx.send((task.name.clone(), outcome));
                });
            }
        }

        if completed.len() == mission.tasks.len() {
            break;
        }
        if in_flight.is_empty() {
            // Nothing ready and nothing running: either every task is done
            // (handled above) or we're blocked behind the first error with
            // no further in-flight work to drain.
            break;
        }

        match rx.recv().await {
            Some((task_name, outcome)) => {
                in_flight.remove(&task_name);
                match outcome {
                    Ok(result) => {
                        results.insert(task_name.clone(), result);
                        completed.insert(task_name);
                    }
                    Err(err) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                        completed.insert(task_name);
                    }
                }
            }
            None => break,
        }
    }

    // End-of-mission cleanup: every iteration commander is dropped regardless
    // of outcome. Non-iterated task commanders stay in the registry for the
    // lifetime of the mission object itself.
    deps.iteration_deps.commander_registry.close_iteration_commanders().await;

    match first_error {
        Some(err) => Err(err),
        None => Ok(results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::knowledge_store::KnowledgeStore;
    use crate::mock_client::MockClientWrapper;
    use crate::question_cache::QuestionCache;
    use crate::result_store::ResultStore;
    use crate::secrets::SecretRegistry;
    use crate::types::TaskDeclaration;

    fn task(name: &str, depends_on: &[&str]) -> TaskDeclaration {
        TaskDeclaration {
            name: name.to_string(),
            objective: format!("do {}", name),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            dataset: None,
        }
    }

    fn mission(tasks: Vec<TaskDeclaration>) -> Mission {
        Mission {
            name: "m".to_string(),
            inputs: vec![],
            vars: HashMap::new(),
            tasks,
        }
    }

    fn deps(responses: Vec<String>) -> SchedulerDeps {
        SchedulerDeps {
            client: Arc::new(MockClientWrapper::new(responses)),
            system_prompt: "sys".to_string(),
            inputs: HashMap::new(),
            iteration_deps: IterationDeps {
                knowledge_store: Arc::new(KnowledgeStore::new()),
                result_store: Arc::new(ResultStore::new()),
                question_cache: Arc::new(QuestionCache::new()),
                secrets: Arc::new(SecretRegistry::new()),
                config: Arc::new(RuntimeConfig::default()),
                commander_registry: Arc::new(crate::commander_registry::CommanderRegistry::new()),
                streamer: Arc::new(crate::streaming::NullStreamingHandler),
            },
        }
    }

    #[test]
    fn topological_sort_orders_dependencies_before_dependents() {
        let mission = mission(vec![task("c", &["b"]), task("b", &["a"]), task("a", &[])]);
        let order = topological_sort(&mission).unwrap();
        assert_eq!(order, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn topological_sort_detects_a_cycle() {
        let mission = mission(vec![task("a", &["b"]), task("b", &["a"])]);
        assert!(topological_sort(&mission).is_err());
    }

    #[test]
    fn validate_dag_rejects_self_dependency() {
        let mission = mission(vec![task("a", &["a"])]);
        assert!(validate_dag(&mission).is_err());
    }

    #[test]
    fn validate_dag_rejects_parallel_only_options_on_a_sequential_iterator() {
        use crate::types::DatasetBinding;
        let mut t = task("a", &[]);
        t.dataset = Some(DatasetBinding {
            bind_to_input: "items".to_string(),
            mode: crate::types::IterationMode::Sequential,
            concurrency_limit: Some(3),
            max_retries: None,
            start_stagger_ms: None,
            smoke_test: false,
            output_schema: vec![],
        });
        let mission = mission(vec![t]);
        assert!(validate_dag(&mission).is_err());
    }

    #[test]
    fn validate_dag_rejects_duplicate_names() {
        let mission = mission(vec![task("a", &[]), task("a", &[])]);
        assert!(validate_dag(&mission).is_err());
    }

    #[tokio::test]
    async fn linear_chain_runs_every_task_to_completion() {
        let mission = mission(vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])]);
        // b and c each fork their ancestors' commanders to ask for
        // dependency context before their own call: b asks a (1 extra), c
        // asks b and a transitively (2 extra).
        let responses = vec![
            "ANSWER: a done\n___STOP___\n".to_string(),
            "ANSWER: a context for b\n___STOP___\n".to_string(),
            "ANSWER: b done\n___STOP___\n".to_string(),
            "ANSWER: b context for c\n___STOP___\n".to_string(),
            "ANSWER: a context for c\n___STOP___\n".to_string(),
            "ANSWER: c done\n___STOP___\n".to_string(),
        ];
        let results = run_mission(&mission, deps(responses)).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.contains_key("a"));
        assert!(results.contains_key("c"));
    }

    #[tokio::test]
    async fn diamond_dependency_completes_join_task_last() {
        let mission = mission(vec![
            task("root", &[]),
            task("left", &["root"]),
            task("right", &["root"]),
            task("join", &["left", "right"]),
        ]);
        // root: 1 own call. left/right each ask root before their own call
        // (2 apiece, racing for the shared FIFO but identically shaped).
        // join asks left, right, and root transitively before its own call
        // (4). Total: 1 + 2 + 2 + 4 = 9.
        let responses = vec![
            "ANSWER: ok\n___STOP___\n".to_string(),
            "ANSWER: ok\n___STOP___\n".to_string(),
            "ANSWER: ok\n___STOP___\n".to_string(),
            "ANSWER: ok\n___STOP___\n".to_string(),
            "ANSWER: ok\n___STOP___\n".to_string(),
            "ANSWER: ok\n___STOP___\n".to_string(),
            "ANSWER: ok\n___STOP___\n".to_string(),
            "ANSWER: ok\n___STOP___\n".to_string(),
            "ANSWER: ok\n___STOP___\n".to_string(),
        ];
        let results = run_mission(&mission, deps(responses)).await.unwrap();
        assert_eq!(results.len(), 4);
    }

    #[tokio::test]
    async fn a_task_failure_is_surfaced_as_the_mission_error() {
        let mission = mission(vec![task("a", &[])]);
        // No programmed responses: the mock client errors on first call.
        let results = run_mission(&mission, deps(vec![])).await;
        assert!(results.is_err());
    }
}
