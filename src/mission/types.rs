//! Core data model: missions, tasks, datasets, and the results they produce.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The type coercion applied to a resolved input value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    String,
    Number,
    Bool,
    List,
    Object,
    /// A secret input: the resolved value is wrapped in [`SecretValue`] and
    /// never rendered into logs or prompts directly.
    Secret,
}

/// A declared input to a mission, resolved once at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDeclaration {
    pub name: String,
    pub kind: InputKind,
    pub required: bool,
    pub default: Option<Value>,
}

/// A resolved input value. Secret inputs carry their value behind
/// [`SecretValue`] so a stray `{:?}` never leaks it.
#[derive(Debug, Clone)]
pub enum ResolvedInput {
    Plain(Value),
    Secret(SecretValue),
}

/// A value that deliberately does not implement [`std::fmt::Display`] with
/// its contents and redacts itself under [`std::fmt::Debug`].
#[derive(Clone)]
pub struct SecretValue(Value);

impl SecretValue {
    pub fn new(value: Value) -> Self {
        SecretValue(value)
    }

    /// Explicit, named access to the underlying value — the only way to read
    /// a secret back out, so call sites make their intent visible.
    pub fn reveal(&self) -> &Value {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretValue(<redacted>)")
    }
}

/// How a task should iterate over its bound dataset, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationMode {
    Sequential,
    Parallel,
}

/// Dataset-driven iteration settings attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetBinding {
    /// Name of the input (a `list`-typed [`InputDeclaration`]) to iterate over.
    pub bind_to_input: String,
    pub mode: IterationMode,
    /// Maximum simultaneously in-flight items in parallel mode. Falls back to
    /// [`crate::config::RuntimeConfig::default_concurrency_limit`] when `None`.
    pub concurrency_limit: Option<usize>,
    /// Retry attempts per item on a retryable failure. Falls back to
    /// [`crate::config::RuntimeConfig::default_max_retries`] when `None`.
    pub max_retries: Option<usize>,
    /// Milliseconds to stagger the start of successive parallel items by.
    pub start_stagger_ms: Option<u64>,
    /// Run a smoke test on the first item before committing to the rest.
    pub smoke_test: bool,
    /// Required field names the task's `OUTPUT` segment must contain for an
    /// iteration to be accepted.
    pub output_schema: Vec<String>,
}

/// A single declared task within a mission's DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDeclaration {
    pub name: String,
    /// Template string, resolved against mission vars/inputs and (inside an
    /// iteration) the current dataset item.
    pub objective: String,
    /// Names of tasks that must complete before this one may start.
    pub depends_on: Vec<String>,
    pub dataset: Option<DatasetBinding>,
}

/// A mission: a named DAG of tasks plus the inputs and vars available to
/// their objectives.
#[derive(Debug, Clone)]
pub struct Mission {
    pub name: String,
    pub inputs: Vec<InputDeclaration>,
    pub vars: HashMap<String, Value>,
    pub tasks: Vec<TaskDeclaration>,
}

impl Mission {
    pub fn task(&self, name: &str) -> Option<&TaskDeclaration> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// One dataset item resolved from a list-typed input, tagged with a stable
/// id so results, retries, and logs can refer to it unambiguously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetItem {
    pub item_id: String,
    pub value: Value,
}

/// Extract a stable id for a dataset item: `id`/`name`/`key` field if
/// present, else `item_<index>`. Total over every possible item shape.
pub fn item_id_for(value: &Value, index: usize) -> String {
    for key in ["id", "name", "key"] {
        if let Some(v) = value.get(key) {
            if let Some(s) = v.as_str() {
                return s.to_string();
            }
            if let Some(n) = v.as_i64() {
                return n.to_string();
            }
        }
    }
    format!("item_{}", index)
}

/// A dataset resolved from its bound input, held in the runtime's
/// `resolved_datasets` registry for the lifetime of the owning task.
#[derive(Debug, Clone)]
pub struct ResolvedDataset {
    pub task_name: String,
    pub items: Vec<DatasetItem>,
}

/// The structured, schema-validated output of one iteration (`OUTPUT`
/// segment, parsed as a JSON object).
pub type TaskOutput = HashMap<String, Value>;

/// The outcome of a single dataset item (or the sole run, for a
/// non-iterated task).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationResult {
    pub item_id: String,
    pub output: TaskOutput,
    pub learnings: Option<String>,
    pub attempts: usize,
}

/// The final, published result of a task, stored in the knowledge store and
/// visible to descendant tasks via `query_task_output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_name: String,
    pub iterations: Vec<IterationResult>,
}

impl TaskResult {
    /// The merged output for non-iterated tasks (exactly one iteration), or
    /// `None` for iterated tasks where callers should consult `iterations`.
    pub fn single_output(&self) -> Option<&TaskOutput> {
        if self.iterations.len() == 1 {
            Some(&self.iterations[0].output)
        } else {
            None
        }
    }
}
