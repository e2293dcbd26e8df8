//! Pull-model ancestor context.
//!
//! A task's commander does not have its ancestors' full conversation
//! history pushed into its own prompt — that would make every task's token
//! budget grow with the depth of the DAG. Instead, once when the task
//! starts, it gets a small breadth-first summary built by *asking* each
//! non-iterated ancestor's completed commander a standardized question
//! (forking that commander per [`crate::commander_session::CommanderSession::answer_query_isolated`]
//! rather than reading its raw published output) — the pull half of the
//! name. The commander owns what it remembers; a descendant asks for what
//! it needs instead of having every ancestor's full output pushed at it.

use std::collections::{HashSet, VecDeque};

use crate::commander_registry::CommanderRegistry;
use crate::error::MissionError;
use crate::types::Mission;

/// What a descendant task is told about one ancestor, computed once and
/// injected into its system prompt.
#[derive(Debug, Clone)]
pub enum AncestorSummary {
    /// The ancestor was not iterated: its commander was forked and asked
    /// the standardized dependency-context question; this is its answer.
    DependencySummary { task_name: String, summary: String },
    /// The ancestor was iterated: only its declared output schema (field
    /// names) is injected, since the full per-item output set could be
    /// arbitrarily large and no single commander speaks for the whole
    /// dataset. The descendant queries individual items via
    /// `query_task_output`, or a specific iteration via
    /// `ask_commander(task_name, question, index)`, instead.
    SchemaOnly { task_name: String, fields: Vec<String> },
}

/// The standardized question posed to every non-iterated ancestor's
/// commander, per §4.9: phrased around the *descendant's* objective so one
/// question is reused across every ancestor this task has.
fn standardized_question(descendant_objective: &str) -> String {
    format!(
        "A dependent task needs your help. Their objective is: {}. Based on what you learned \
         during your task, what relevant context, findings, or information should they know to \
         accomplish their objective?",
        descendant_objective
    )
}

/// Walk the DAG breadth-first from `task_name`'s direct dependencies,
/// visiting every transitive ancestor exactly once, and build one
/// [`AncestorSummary`] per ancestor. Non-iterated ancestors are asked the
/// standardized question via a forked, isolated query against their
/// registered commander; iterated ancestors are skipped in favor of a
/// schema-only summary.
///
/// Returns [`MissionError::DependencyContext`] if an ancestor named in
/// `depends_on` does not exist in the mission, has no commander registered
/// yet (the scheduler started this task before its dependencies were
/// actually satisfied), or if the isolated query itself fails.
pub async fn build_ancestor_context(
    mission: &Mission,
    commander_registry: &CommanderRegistry,
    task_name: &str,
) -> Result<Vec<AncestorSummary>, MissionError> {
    let root = mission
        .task(task_name)
        .ok_or_else(|| MissionError::DependencyContext(format!("unknown task '{}'", task_name)))?;
    let question = standardized_question(&root.objective);

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = root.depends_on.iter().cloned().collect();
    let mut summaries = Vec::new();

    while let Some(ancestor_name) = queue.pop_front() {
        if !visited.insert(ancestor_name.clone()) {
            continue;
        }

        let ancestor_task = mission.task(&ancestor_name).ok_or_else(|| {
            MissionError::DependencyContext(format!(
                "task '{}' depends on unknown task '{}'",
                task_name, ancestor_name
            ))
        })?;

        let summary = match &ancestor_task.dataset {
            Some(dataset) => AncestorSummary::SchemaOnly {
                task_name: ancestor_name.clone(),
                fields: dataset.output_schema.clone(),
            },
            None => {
                let handle = commander_registry.get_task(&ancestor_name).await.ok_or_else(|| {
                    MissionError::DependencyContext(format!(
                        "ancestor task '{}' has no registered commander yet",
                        ancestor_name
                    ))
                })?;
                let answer = handle.answer_query_isolated(question.clone()).await?;
                AncestorSummary::DependencySummary {
                    task_name: ancestor_name.clone(),
                    summary: answer,
                }
            }
        };
        summaries.push(summary);

        for grandparent in &ancestor_task.depends_on {
            queue.push_back(grandparent.clone());
        }
    }

    Ok(summaries)
}

/// Render the ancestor summaries into the plain-text block injected into a
/// descendant task's system prompt.
pub fn render_ancestor_context(summaries: &[AncestorSummary]) -> String {
    if summaries.is_empty() {
        return String::new();
    }

    let mut out = String::from("Ancestor task context:\n");
    for summary in summaries {
        match summary {
            AncestorSummary::DependencySummary { task_name, summary } => {
                out.push_str(&format!("- {} (completed): {}\n", task_name, summary));
            }
            AncestorSummary::SchemaOnly { task_name, fields } => {
                out.push_str(&format!(
                    "- {} (iterated, query via query_task_output; fields: {})\n",
                    task_name,
                    fields.join(", ")
                ));
            }
        }
    }
    out
}

/// Build and render a task's ancestor context in one step — the call site
/// iteration engines and [`crate::runner::Runner`] use once per task (or
/// once per iterated task, never once per iteration or retry; see
/// §4.7's "queryAncestorsForContext... once for the whole iterated task").
pub async fn resolve_ancestor_context(
    mission: &Mission,
    commander_registry: &CommanderRegistry,
    task_name: &str,
) -> Result<String, MissionError> {
    let summaries = build_ancestor_context(mission, commander_registry, task_name).await?;
    Ok(render_ancestor_context(&summaries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::ClientWrapper;
    use crate::commander_registry::CommanderHandle;
    use crate::commander_session::CommanderSession;
    use crate::config::RuntimeConfig;
    use crate::knowledge_store::KnowledgeStore;
    use crate::mock_client::MockClientWrapper;
    use crate::question_cache::QuestionCache;
    use crate::result_store::ResultStore;
    use crate::secrets::SecretRegistry;
    use crate::types::{DatasetBinding, IterationMode, TaskDeclaration};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn mission_with_chain() -> Mission {
        Mission {
            name: "m".to_string(),
            inputs: vec![],
            vars: HashMap::new(),
            tasks: vec![
                TaskDeclaration {
                    name: "root".to_string(),
                    objective: "do root".to_string(),
                    depends_on: vec![],
                    dataset: None,
                },
                TaskDeclaration {
                    name: "mid".to_string(),
                    objective: "do mid".to_string(),
                    depends_on: vec!["root".to_string()],
                    dataset: None,
                },
                TaskDeclaration {
                    name: "leaf".to_string(),
                    objective: "do leaf".to_string(),
                    depends_on: vec!["mid".to_string()],
                    dataset: None,
                },
            ],
        }
    }

    /// A completed commander registered under `task_name`, scripted to
    /// answer any isolated query with `answer`.
    async fn registered_commander(task_name: &str, answer: &str) -> CommanderHandle {
        let client: Arc<dyn ClientWrapper> = Arc::new(MockClientWrapper::new(vec![format!(
            "REASONING: n/a\nANSWER: {}\n___STOP___\n",
            answer
        )]));
        let mission = Mission {
            name: "m".to_string(),
            inputs: vec![],
            vars: HashMap::new(),
            tasks: vec![TaskDeclaration {
                name: task_name.to_string(),
                objective: "do it".to_string(),
                depends_on: vec![],
                dataset: None,
            }],
        };
        Arc::new(
            CommanderSession::new(
                client,
                task_name.to_string(),
                "sys".to_string(),
                String::new(),
                Arc::new(KnowledgeStore::new()),
                Arc::new(ResultStore::new()),
                Arc::new(QuestionCache::new()),
                Arc::new(SecretRegistry::new()),
                Arc::new(RuntimeConfig::default()),
                Vec::new(),
                5,
            )
            .await
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn walks_transitive_ancestors_breadth_first() {
        let mission = mission_with_chain();
        let registry = CommanderRegistry::new();
        registry
            .register_task("root".to_string(), registered_commander("root", "root learned a").await)
            .await;
        registry
            .register_task("mid".to_string(), registered_commander("mid", "mid learned b").await)
            .await;

        let summaries = build_ancestor_context(&mission, &registry, "leaf").await.unwrap();
        assert_eq!(summaries.len(), 2);
    }

    #[tokio::test]
    async fn asking_an_ancestor_returns_its_clones_answer() {
        let mission = mission_with_chain();
        let registry = CommanderRegistry::new();
        registry
            .register_task("root".to_string(), registered_commander("root", "use USD for all totals").await)
            .await;

        let summaries = build_ancestor_context(&mission, &registry, "mid").await.unwrap();
        match &summaries[0] {
            AncestorSummary::DependencySummary { task_name, summary } => {
                assert_eq!(task_name, "root");
                assert_eq!(summary, "use USD for all totals");
            }
            AncestorSummary::SchemaOnly { .. } => panic!("expected a dependency summary"),
        }
    }

    #[tokio::test]
    async fn errors_when_an_ancestor_has_no_registered_commander() {
        let mission = mission_with_chain();
        let registry = CommanderRegistry::new();
        // "root" never registers.
        let result = build_ancestor_context(&mission, &registry, "mid").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn iterated_ancestor_gets_schema_only_summary_without_asking() {
        let mut mission = mission_with_chain();
        mission.tasks[0].dataset = Some(DatasetBinding {
            bind_to_input: "items".to_string(),
            mode: IterationMode::Sequential,
            concurrency_limit: None,
            max_retries: None,
            start_stagger_ms: None,
            smoke_test: false,
            output_schema: vec!["price".to_string()],
        });
        // No commander registered for "root" at all — if the iterated branch
        // tried to ask it anyway, this would fail instead of short-circuiting
        // to a schema-only summary.
        let registry = CommanderRegistry::new();

        let summaries = build_ancestor_context(&mission, &registry, "mid").await.unwrap();
        match &summaries[0] {
            AncestorSummary::SchemaOnly { fields, .. } => assert_eq!(fields, &vec!["price".to_string()]),
            AncestorSummary::DependencySummary { .. } => panic!("expected schema-only summary"),
        }
    }

    #[tokio::test]
    async fn resolve_renders_empty_string_for_a_root_task() {
        let mission = mission_with_chain();
        let registry = CommanderRegistry::new();
        let rendered = resolve_ancestor_context(&mission, &registry, "root").await.unwrap();
        assert_eq!(rendered, "");
    }
}
