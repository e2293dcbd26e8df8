//! Push-style progress reporting.
//!
//! Sessions push lifecycle events to a [`StreamingHandler`] as they happen;
//! the handler is best-effort and never allowed to abort the mission. An
//! embedding application supplies its own handler (wiring into a websocket,
//! a TUI, a log sink); [`NullStreamingHandler`] is the crate's no-op
//! reference implementation, used when none is supplied.

use async_trait::async_trait;

/// A single progress event pushed by the runtime.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MissionStarted,
    MissionCompleted,
    MissionFailed { message: String },
    TaskStarted { task_name: String },
    TaskCompleted { task_name: String },
    TaskFailed { task_name: String, message: String },
    IterationStarted { task_name: String, item_id: String },
    IterationRetrying { task_name: String, item_id: String, attempt: usize },
    IterationCompleted { task_name: String, item_id: String },
    IterationFailed { task_name: String, item_id: String, message: String },
}

/// Receiver for [`StreamEvent`]s. Implementations must not block the caller
/// for long or propagate errors back into the mission — a streaming sink
/// going down should never fail a task.
#[async_trait]
pub trait StreamingHandler: Send + Sync {
    /// Handle one event. Errors are swallowed by callers; log them instead
    /// of returning them if observability into delivery failures is needed.
    async fn handle(&self, event: StreamEvent);
}

/// A [`StreamingHandler`] that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStreamingHandler;

#[async_trait]
impl StreamingHandler for NullStreamingHandler {
    async fn handle(&self, _event: StreamEvent) {}
}
