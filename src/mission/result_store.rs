//! Result interception and paging.
//!
//! Large tool results are not inlined into a session's conversation history
//! — doing so would blow through the token budget in a handful of turns.
//! Instead a result above a size threshold is stored under a generated id
//! (`_result_<tool>_<n>`) and the session is handed back a small inline
//! summary plus the id, which it can page through with the `result_info` /
//! `result_items` / `result_get` / `result_keys` / `result_chunk` /
//! `result_to_dataset` tool surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::RuntimeConfig;
use crate::types::{item_id_for, DatasetItem};

/// A result that was too large to inline, held by the store under `id`.
#[derive(Debug, Clone)]
pub struct StoredResult {
    pub id: String,
    pub tool_name: String,
    pub value: Value,
}

/// The outcome of offering a tool result to the store.
#[derive(Debug, Clone)]
pub enum InterceptOutcome {
    /// The result was small enough to return to the session unchanged.
    Inline(Value),
    /// The result was stored; the session sees `summary` inline and can page
    /// through the rest via `id`.
    Stored { id: String, summary: Value },
}

/// Concurrent store of intercepted tool results, shared by every session
/// within a mission.
#[derive(Default)]
pub struct ResultStore {
    entries: RwLock<HashMap<String, StoredResult>>,
    next_seq: AtomicUsize,
}

fn approx_byte_size(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a freshly produced tool result to the store. Returns
    /// [`InterceptOutcome::Inline`] when the result is small enough to pass
    /// through untouched, or [`InterceptOutcome::Stored`] with a generated id
    /// and summary otherwise.
    pub async fn intercept(
        &self,
        tool_name: &str,
        value: Value,
        config: &RuntimeConfig,
    ) -> InterceptOutcome {
        let oversized_collection = match &value {
            Value::Array(items) => items.len() > config.result_sample_items * 4,
            Value::Object(map) => map.len() > config.result_sample_items * 4,
            _ => false,
        };
        if !oversized_collection && approx_byte_size(&value) <= config.result_intercept_threshold_bytes {
            return InterceptOutcome::Inline(value);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let id = format!("_result_{}_{}", tool_name, seq);
        let summary = self.summarize(&value, config);

        let stored = StoredResult {
            id: id.clone(),
            tool_name: tool_name.to_string(),
            value,
        };
        self.entries.write().await.insert(id.clone(), stored);

        InterceptOutcome::Stored { id, summary }
    }

    fn summarize(&self, value: &Value, config: &RuntimeConfig) -> Value {
        match value {
            Value::Array(items) => {
                let sample: Vec<Value> = items.iter().take(config.result_sample_items).cloned().collect();
                serde_json::json!({
                    "kind": "array",
                    "total_items": items.len(),
                    "sample": sample,
                })
            }
            Value::Object(map) => {
                let keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
                serde_json::json!({
                    "kind": "object",
                    "total_keys": map.len(),
                    "keys": keys,
                })
            }
            other => {
                let text = other.to_string();
                let truncated: String = text.chars().take(config.result_sample_bytes).collect();
                serde_json::json!({ "kind": "scalar", "preview": truncated })
            }
        }
    }

    /// Metadata about a stored result: its tool name, value kind, and size.
    pub async fn result_info(&self, id: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(id)?;
        let (kind, count) = match &entry.value {
            Value::Array(items) => ("array", Some(items.len())),
            Value::Object(map) => ("object", Some(map.len())),
            _ => ("scalar", None),
        };
        Some(serde_json::json!({
            "id": entry.id,
            "tool_name": entry.tool_name,
            "kind": kind,
            "count": count,
            "byte_size": approx_byte_size(&entry.value),
        }))
    }

    /// A page of items from a stored array result.
    pub async fn result_items(&self, id: &str, offset: usize, count: usize) -> Option<Vec<Value>> {
        let entries = self.entries.read().await;
        let entry = entries.get(id)?;
        match &entry.value {
            Value::Array(items) => Some(items.iter().skip(offset).take(count).cloned().collect()),
            _ => None,
        }
    }

    /// Look up a single field of a stored object result by key.
    pub async fn result_get(&self, id: &str, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(id)?;
        entry.value.get(key).cloned()
    }

    /// The key names of a stored object result.
    pub async fn result_keys(&self, id: &str) -> Option<Vec<String>> {
        let entries = self.entries.read().await;
        let entry = entries.get(id)?;
        match &entry.value {
            Value::Object(map) => Some(map.keys().cloned().collect()),
            _ => None,
        }
    }

    /// A byte-range chunk of the stored result's JSON text representation,
    /// for incrementally reading an oversized scalar result.
    pub async fn result_chunk(&self, id: &str, offset: usize, len: usize) -> Option<String> {
        let entries = self.entries.read().await;
        let entry = entries.get(id)?;
        let text = entry.value.to_string();
        let bytes = text.as_bytes();
        if offset >= bytes.len() {
            return Some(String::new());
        }
        let end = (offset + len).min(bytes.len());
        Some(String::from_utf8_lossy(&bytes[offset..end]).into_owned())
    }

    /// Convert a stored array result into dataset items, so it can feed a
    /// later task's iteration the way a declared input list would.
    pub async fn result_to_dataset(&self, id: &str) -> Option<Vec<DatasetItem>> {
        let entries = self.entries.read().await;
        let entry = entries.get(id)?;
        match &entry.value {
            Value::Array(items) => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| DatasetItem {
                        item_id: item_id_for(v, i),
                        value: v.clone(),
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}
