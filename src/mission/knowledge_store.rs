//! Queryable in-memory store of published task outputs.
//!
//! Every task publishes its [`TaskResult`] here once it completes. Later
//! tasks read it back either directly by task name (`get`) or through a
//! small filter/aggregate query surface (`query`/`aggregate`) that treats
//! every iteration of one task as one record.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::types::TaskResult;

/// A single queryable record: one iteration's output, tagged with the task
/// and dataset item it came from, plus its position within the task.
#[derive(Debug, Clone)]
pub struct Record {
    pub task_name: String,
    pub item_id: String,
    pub index: usize,
    pub output: HashMap<String, Value>,
}

/// A filter comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
}

/// A single `field OP value` predicate evaluated against a [`Record`].
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Filter {
            field: field.into(),
            op,
            value,
        }
    }
}

/// Resolve a field name against a record. `index`, `item_id`, `status`, and
/// `summary` are reserved and resolve to the record's intrinsic properties
/// before falling through to its output map, matching the field-resolution
/// order a descendant task's `query_task_output` call relies on. Every
/// record that reaches the store came from a completed iteration, so
/// `status` is always `"success"` — failed iterations never get published.
fn resolve_field<'a>(record: &'a Record, field: &str) -> Option<Value> {
    match field {
        "task_name" => Some(Value::String(record.task_name.clone())),
        "item_id" => Some(Value::String(record.item_id.clone())),
        "index" => Some(Value::from(record.index as u64)),
        "status" => Some(Value::String("success".to_string())),
        "summary" => record
            .output
            .get("summary")
            .cloned()
            .or_else(|| Some(Value::String(String::new()))),
        other => record.output.get(other).cloned(),
    }
}

/// Compare two JSON values for ordering, preferring a numeric comparison
/// when both sides parse as numbers and falling back to lexicographic
/// string comparison otherwise.
fn compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (as_f64(lhs), as_f64(rhs)) {
        return a.partial_cmp(&b);
    }
    let a = to_comparable_string(lhs);
    let b = to_comparable_string(rhs);
    Some(a.cmp(&b))
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn to_comparable_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches(record: &Record, filter: &Filter) -> bool {
    let field_value = match resolve_field(record, &filter.field) {
        Some(v) => v,
        None => return false,
    };

    match filter.op {
        FilterOp::Eq => field_value == filter.value,
        FilterOp::Ne => field_value != filter.value,
        FilterOp::Gt => compare(&field_value, &filter.value) == Some(std::cmp::Ordering::Greater),
        FilterOp::Lt => compare(&field_value, &filter.value) == Some(std::cmp::Ordering::Less),
        FilterOp::Gte => matches!(
            compare(&field_value, &filter.value),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ),
        FilterOp::Lte => matches!(
            compare(&field_value, &filter.value),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ),
        FilterOp::Contains => match (&field_value, &filter.value) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.contains(needle),
            _ => false,
        },
    }
}

/// An aggregation function applied to the numeric values of one field across
/// a set of matched records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Distinct,
}

/// The result of an `aggregate` call. `Min`/`Max` carry the winning record
/// alongside the extremal value, per the query surface's contract.
#[derive(Debug, Clone)]
pub enum AggregateResult {
    Count(usize),
    Sum(f64),
    Avg(f64),
    Extremum { value: f64, record: Record },
    Distinct(Vec<Value>),
    /// `group_by`'d aggregation: one (bucket key, nested result) pair per
    /// distinct value of the grouping field, in first-seen order.
    Grouped(Vec<(Value, Box<AggregateResult>)>),
}

/// Concurrent store of published task results, shared by every session
/// within a mission.
#[derive(Default)]
pub struct KnowledgeStore {
    results: RwLock<HashMap<String, TaskResult>>,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish (or replace) a task's full result.
    pub async fn publish(&self, result: TaskResult) {
        self.results.write().await.insert(result.task_name.clone(), result);
    }

    /// The full result published for `task_name`, if any.
    pub async fn get(&self, task_name: &str) -> Option<TaskResult> {
        self.results.read().await.get(task_name).cloned()
    }

    async fn task_records(&self, task_name: &str) -> Vec<Record> {
        let results = self.results.read().await;
        match results.get(task_name) {
            Some(task_result) => task_result
                .iterations
                .iter()
                .enumerate()
                .map(|(index, iteration)| Record {
                    task_name: task_result.task_name.clone(),
                    item_id: iteration.item_id.clone(),
                    index,
                    output: iteration.output.clone(),
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every record of `task_name` satisfying every filter in `filters` (a
    /// logical AND), optionally sorted by `order_by` (ascending, or
    /// descending when `desc`), then paginated by `offset`/`limit`.
    #[allow(clippy::too_many_arguments)]
    pub async fn query(
        &self,
        task_name: &str,
        filters: &[Filter],
        order_by: Option<&str>,
        desc: bool,
        offset: usize,
        limit: Option<usize>,
    ) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .task_records(task_name)
            .await
            .into_iter()
            .filter(|record| filters.iter().all(|f| matches(record, f)))
            .collect();

        if let Some(field) = order_by {
            records.sort_by(|a, b| {
                let av = resolve_field(a, field);
                let bv = resolve_field(b, field);
                let ord = match (&av, &bv) {
                    (Some(x), Some(y)) => compare(x, y).unwrap_or(std::cmp::Ordering::Equal),
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                if desc {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let records = records.into_iter().skip(offset);
        match limit {
            Some(n) => records.take(n).collect(),
            None => records.collect(),
        }
    }

    /// Apply an aggregation function over `field` across every record of
    /// `task_name` matching `filters`. When `group_by` names a field, the
    /// matched records are first bucketed by that field's value (first-seen
    /// bucket order) and the aggregation is applied within each bucket.
    pub async fn aggregate(
        &self,
        task_name: &str,
        field: &str,
        op: AggregateOp,
        filters: &[Filter],
        group_by: Option<&str>,
    ) -> Option<AggregateResult> {
        let records: Vec<Record> = self
            .task_records(task_name)
            .await
            .into_iter()
            .filter(|record| filters.iter().all(|f| matches(record, f)))
            .collect();

        match group_by {
            None => aggregate_records(&records, field, op),
            Some(group_field) => {
                let mut order: Vec<Value> = Vec::new();
                let mut buckets: HashMap<String, Vec<Record>> = HashMap::new();
                for record in records {
                    let key = resolve_field(&record, group_field).unwrap_or(Value::Null);
                    let key_str = key.to_string();
                    if !buckets.contains_key(&key_str) {
                        order.push(key.clone());
                    }
                    buckets.entry(key_str).or_default().push(record);
                }
                let mut grouped = Vec::new();
                for key in order {
                    let bucket = buckets.get(&key.to_string()).cloned().unwrap_or_default();
                    if let Some(result) = aggregate_records(&bucket, field, op) {
                        grouped.push((key, Box::new(result)));
                    }
                }
                Some(AggregateResult::Grouped(grouped))
            }
        }
    }
}

fn aggregate_records(records: &[Record], field: &str, op: AggregateOp) -> Option<AggregateResult> {
    if op == AggregateOp::Count {
        return Some(AggregateResult::Count(records.len()));
    }

    if op == AggregateOp::Distinct {
        let mut seen = Vec::new();
        for record in records {
            if let Some(v) = resolve_field(record, field) {
                if !seen.contains(&v) {
                    seen.push(v);
                }
            }
        }
        return Some(AggregateResult::Distinct(seen));
    }

    let numeric: Vec<(f64, &Record)> = records
        .iter()
        .filter_map(|r| resolve_field(r, field).as_ref().and_then(as_f64).map(|v| (v, r)))
        .collect();

    if numeric.is_empty() {
        return None;
    }

    Some(match op {
        AggregateOp::Count | AggregateOp::Distinct => unreachable!(),
        AggregateOp::Sum => AggregateResult::Sum(numeric.iter().map(|(v, _)| v).sum()),
        AggregateOp::Avg => {
            AggregateResult::Avg(numeric.iter().map(|(v, _)| v).sum::<f64>() / numeric.len() as f64)
        }
        AggregateOp::Min => {
            let (value, record) = numeric
                .into_iter()
                .fold(None, |acc: Option<(f64, &Record)>, cur| match acc {
                    Some(best) if best.0 <= cur.0 => Some(best),
                    _ => Some(cur),
                })
                .unwrap();
            AggregateResult::Extremum {
                value,
                record: record.clone(),
            }
        }
        AggregateOp::Max => {
            let (value, record) = numeric
                .into_iter()
                .fold(None, |acc: Option<(f64, &Record)>, cur| match acc {
                    Some(best) if best.0 >= cur.0 => Some(best),
                    _ => Some(cur),
                })
                .unwrap();
            AggregateResult::Extremum {
                value,
                record: record.clone(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IterationResult;

    fn sample_result(task_name: &str, prices: &[f64]) -> TaskResult {
        TaskResult {
            task_name: task_name.to_string(),
            iterations: prices
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let mut output = HashMap::new();
                    output.insert("price".to_string(), Value::from(*p));
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
    async fn get_returns_published_result() {
        let store = KnowledgeStore::new();
        store.publish(sample_result("quote", &[10.0, 20.0])).await;
        let result = store.get("quote").await.unwrap();
        assert_eq!(result.iterations.len(), 2);
    }

    #[tokio::test]
    async fn query_filters_numerically() {
        let store = KnowledgeStore::new();
        store.publish(sample_result("quote", &[5.0, 15.0, 25.0])).await;
        let records = store
            .query(
                "quote",
                &[Filter::new("price", FilterOp::Gt, Value::from(10.0))],
                None,
                false,
                0,
                None,
            )
            .await;
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn query_is_scoped_to_one_task() {
        let store = KnowledgeStore::new();
        store.publish(sample_result("quote", &[5.0])).await;
        store.publish(sample_result("other", &[5.0])).await;
        let records = store.query("quote", &[], None, false, 0, None).await;
        assert!(records.iter().all(|r| r.task_name == "quote"));
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn query_orders_and_paginates() {
        let store = KnowledgeStore::new();
        store.publish(sample_result("quote", &[30.0, 10.0, 20.0])).await;
        let records = store
            .query("quote", &[], Some("price"), true, 1, Some(1))
            .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].output.get("price").unwrap(), &Value::from(20.0));
    }

    #[tokio::test]
    async fn aggregate_avg_over_matched_records() {
        let store = KnowledgeStore::new();
        store.publish(sample_result("quote", &[10.0, 20.0, 30.0])).await;
        match store.aggregate("quote", "price", AggregateOp::Avg, &[], None).await {
            Some(AggregateResult::Avg(avg)) => assert!((avg - 20.0).abs() < f64::EPSILON),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn aggregate_max_returns_winning_record() {
        let store = KnowledgeStore::new();
        store.publish(sample_result("quote", &[10.0, 30.0, 20.0])).await;
        match store.aggregate("quote", "price", AggregateOp::Max, &[], None).await {
            Some(AggregateResult::Extremum { value, record }) => {
                assert_eq!(value, 30.0);
                assert_eq!(record.item_id, "item_1");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn aggregate_group_by_buckets_then_aggregates() {
        let store = KnowledgeStore::new();
        let mut result = sample_result("quote", &[10.0, 20.0, 30.0]);
        result.iterations[0]
            .output
            .insert("region".to_string(), Value::from("east"));
        result.iterations[1]
            .output
            .insert("region".to_string(), Value::from("west"));
        result.iterations[2]
            .output
            .insert("region".to_string(), Value::from("east"));
        store.publish(result).await;

        match store
            .aggregate("quote", "price", AggregateOp::Sum, &[], Some("region"))
            .await
        {
            Some(AggregateResult::Grouped(buckets)) => {
                assert_eq!(buckets.len(), 2);
                let east = buckets
                    .iter()
                    .find(|(k, _)| k == &Value::from("east"))
                    .unwrap();
                match east.1.as_ref() {
                    AggregateResult::Sum(v) => assert_eq!(*v, 40.0),
                    other => panic!("unexpected bucket result: {:?}", other),
                }
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn reserved_fields_resolve_before_output_map() {
        let store = KnowledgeStore::new();
        store.publish(sample_result("quote", &[1.0])).await;
        let records = store
            .query(
                "quote",
                &[Filter::new("status", FilterOp::Eq, Value::from("success"))],
                None,
                false,
                0,
                None,
            )
            .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].index, 0);
    }
}
