//! Live registry of completed commander handles.
//!
//! A non-iterated task's commander is kept under its task name for the
//! remainder of the mission (so descendants can pull ancestor context via
//! [`crate::ancestor_context`], or query it directly through
//! `ask_commander`). An iterated task's per-iteration commanders are kept
//! under `(task_name, index)` so a descendant can target a specific
//! iteration with `ask_commander(task_name, question, index)`. Iteration
//! commanders are dropped at end-of-mission cleanup; non-iterated commanders
//! live as long as the registry itself.
//!
//! Handles are stored as `Arc<CommanderSession<..>>` rather than behind a
//! lock: cloning one for a query ([`CommanderSession::fork_for_query`]) only
//! needs `&self`, so concurrent ancestor queries never contend with each
//! other or with the original commander's own (already-finished) loop.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::client_wrapper::ClientWrapper;
use crate::commander_session::CommanderSession;

/// A completed commander, shared read-only so any number of descendants can
/// fork it for an isolated query concurrently.
pub type CommanderHandle = Arc<CommanderSession<Arc<dyn ClientWrapper>>>;

/// Shared, mission-wide store of completed commander handles.
#[derive(Default)]
pub struct CommanderRegistry {
    task_commanders: RwLock<HashMap<String, CommanderHandle>>,
    iteration_commanders: RwLock<HashMap<String, HashMap<usize, CommanderHandle>>>,
}

impl CommanderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the commander that completed a non-iterated task.
    pub async fn register_task(&self, task_name: String, commander: CommanderHandle) {
        self.task_commanders.write().await.insert(task_name, commander);
    }

    /// Register one iteration's commander, keyed by its index within the
    /// task's dataset. In sequential single-commander-spanning mode, every
    /// index maps to the same handle.
    pub async fn register_iteration(&self, task_name: String, index: usize, commander: CommanderHandle) {
        self.iteration_commanders
            .write()
            .await
            .entry(task_name)
            .or_default()
            .insert(index, commander);
    }

    /// The completed commander for a non-iterated task, if any.
    pub async fn get_task(&self, task_name: &str) -> Option<CommanderHandle> {
        self.task_commanders.read().await.get(task_name).cloned()
    }

    /// The completed commander for a specific iteration of a task, if any.
    pub async fn get_iteration(&self, task_name: &str, index: usize) -> Option<CommanderHandle> {
        self.iteration_commanders
            .read()
            .await
            .get(task_name)
            .and_then(|by_index| by_index.get(&index))
            .cloned()
    }

    /// End-of-mission cleanup: drop every iteration commander. Non-iterated
    /// commanders are left in place — the caller drops the whole registry
    /// (and with it their last `Arc`) once the mission itself is discarded.
    pub async fn close_iteration_commanders(&self) {
        self.iteration_commanders.write().await.clear();
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

    async fn sample_commander(task_name: &str) -> CommanderHandle {
        let client: Arc<dyn ClientWrapper> = Arc::new(MockClientWrapper::new(vec![]));
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
    async fn registers_and_looks_up_a_task_commander() {
        let registry = CommanderRegistry::new();
        let handle = sample_commander("a").await;
        registry.register_task("a".to_string(), handle).await;
        assert!(registry.get_task("a").await.is_some());
        assert!(registry.get_task("b").await.is_none());
    }

    #[tokio::test]
    async fn registers_iteration_commanders_independently_per_index() {
        let registry = CommanderRegistry::new();
        registry
            .register_iteration("b".to_string(), 0, sample_commander("b").await)
            .await;
        registry
            .register_iteration("b".to_string(), 1, sample_commander("b").await)
            .await;
        assert!(registry.get_iteration("b", 0).await.is_some());
        assert!(registry.get_iteration("b", 1).await.is_some());
        assert!(registry.get_iteration("b", 2).await.is_none());
    }

    #[tokio::test]
    async fn close_iteration_commanders_drops_them_but_not_task_commanders() {
        let registry = CommanderRegistry::new();
        registry.register_task("a".to_string(), sample_commander("a").await).await;
        registry
            .register_iteration("b".to_string(), 0, sample_commander("b").await)
            .await;
        registry.close_iteration_commanders().await;
        assert!(registry.get_task("a").await.is_some());
        assert!(registry.get_iteration("b", 0).await.is_none());
    }
}
