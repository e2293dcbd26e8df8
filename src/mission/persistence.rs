//! Persistence contracts and an in-memory reference implementation.
//!
//! The runtime never picks a storage backend for itself. Four narrow traits
//! cover what the core actually needs to persist — task results, iteration
//! results, ask-commander answers, and dataset resolutions — and
//! [`MemoryPersistence`] implements all four in-process for tests and for
//! applications that don't need durability across restarts. Writes through
//! these traits are best-effort: a failure to persist never aborts the
//! mission, it is only logged.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::types::{IterationResult, ResolvedDataset, TaskResult};

/// Durable storage for completed task results.
#[async_trait]
pub trait TaskResultStore: Send + Sync {
    async fn save_task_result(&self, result: &TaskResult);
    async fn load_task_result(&self, task_name: &str) -> Option<TaskResult>;
}

/// Durable storage for individual iteration results, persisted as they
/// complete rather than only once the whole task finishes.
#[async_trait]
pub trait IterationResultStore: Send + Sync {
    async fn save_iteration_result(&self, task_name: &str, result: &IterationResult);
    async fn load_iteration_results(&self, task_name: &str) -> Vec<IterationResult>;
}

/// Durable storage for ask-commander question/answer pairs.
#[async_trait]
pub trait AskCommanderStore: Send + Sync {
    async fn save_answer(&self, question: &str, answer: &str);
    async fn load_answer(&self, question: &str) -> Option<String>;
}

/// Durable storage for a task's resolved dataset, so a restarted mission can
/// resume iteration without re-resolving the bound input.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    async fn save_dataset(&self, dataset: &ResolvedDataset);
    async fn load_dataset(&self, task_name: &str) -> Option<ResolvedDataset>;
}

/// The bundle of persistence traits a mission runner depends on.
pub struct Persistence {
    pub task_results: Arc<dyn TaskResultStore>,
    pub iteration_results: Arc<dyn IterationResultStore>,
    pub ask_commander: Arc<dyn AskCommanderStore>,
    pub datasets: Arc<dyn DatasetStore>,
}

/// An in-memory implementation of every persistence trait, used as the
/// runtime's default and exercised by the test suite. Nothing here survives
/// process restart.
#[derive(Default)]
pub struct MemoryPersistence {
    task_results: RwLock<HashMap<String, TaskResult>>,
    iteration_results: RwLock<HashMap<String, Vec<IterationResult>>>,
    answers: RwLock<HashMap<String, String>>,
    datasets: RwLock<HashMap<String, ResolvedDataset>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a [`Persistence`] bundle backed by a single shared
    /// `MemoryPersistence` instance.
    pub fn bundle() -> Persistence {
        let shared = Arc::new(MemoryPersistence::new());
        Persistence {
            task_results: shared.clone(),
            iteration_results: shared.clone(),
            ask_commander: shared.clone(),
            datasets: shared,
        }
    }
}

#[async_trait]
impl TaskResultStore for MemoryPersistence {
    async fn save_task_result(&self, result: &TaskResult) {
        self.task_results
            .write()
            .await
            .insert(result.task_name.clone(), result.clone());
    }

    async fn load_task_result(&self, task_name: &str) -> Option<TaskResult> {
        self.task_results.read().await.get(task_name).cloned()
    }
}

#[async_trait]
impl IterationResultStore for MemoryPersistence {
    async fn save_iteration_result(&self, task_name: &str, result: &IterationResult) {
        self.iteration_results
            .write()
            .await
            .entry(task_name.to_string())
            .or_default()
            .push(result.clone());
    }

    async fn load_iteration_results(&self, task_name: &str) -> Vec<IterationResult> {
        self.iteration_results
            .read()
            .await
            .get(task_name)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AskCommanderStore for MemoryPersistence {
    async fn save_answer(&self, question: &str, answer: &str) {
        self.answers
            .write()
            .await
            .insert(question.to_string(), answer.to_string());
    }

    async fn load_answer(&self, question: &str) -> Option<String> {
        self.answers.read().await.get(question).cloned()
    }
}

#[async_trait]
impl DatasetStore for MemoryPersistence {
    async fn save_dataset(&self, dataset: &ResolvedDataset) {
        self.datasets
            .write()
            .await
            .insert(dataset.task_name.clone(), dataset.clone());
    }

    async fn load_dataset(&self, task_name: &str) -> Option<ResolvedDataset> {
        self.datasets.read().await.get(task_name).cloned()
    }
}
