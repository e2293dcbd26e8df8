//! Ask-commander question cache.
//!
//! Multiple agent or commander sessions can ask the same target commander
//! the same question concurrently — most commonly when several parallel
//! dataset items hit the same ambiguity at once. The cache deduplicates on
//! the pair `(cache_key, question_text)`: `cache_key` identifies the target
//! commander (a task name, or `"task_name[index]"` for a specific
//! iteration), so identical question text asked of two different
//! commanders never collides. The first asker for a given pair becomes
//! responsible for actually querying the commander; every subsequent asker
//! with the identical pair waits on the same one-shot readiness latch
//! instead of re-asking.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

/// What a caller should do after offering a question to the cache.
pub enum AskOutcome {
    /// No prior identical `(cache_key, question)` was in flight; the caller
    /// is now responsible for obtaining an answer and calling
    /// [`QuestionCache::resolve`] or [`QuestionCache::fail`].
    BecomeAsker,
    /// An identical question to the same target was already answered or
    /// failed; here is the result.
    Answered(Result<String, String>),
}

struct Slot {
    notify: Notify,
    answer: Mutex<Option<Result<String, String>>>,
}

/// Exact-text-match dedup cache for ask-commander questions, scoped per
/// target commander via `cache_key`.
#[derive(Default)]
pub struct QuestionCache {
    slots: Mutex<HashMap<(String, String), Arc<Slot>>>,
}

impl QuestionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `question` (targeting `cache_key`) to the cache. Returns
    /// quickly either way: either the caller becomes the asker, or the call
    /// blocks only long enough to await an in-flight answer (never
    /// re-asking).
    pub async fn ask(&self, cache_key: &str, question: &str) -> AskOutcome {
        let key = (cache_key.to_string(), question.to_string());
        let slot = {
            let mut slots = self.slots.lock().await;
            if let Some(existing) = slots.get(&key) {
                Arc::clone(existing)
            } else {
                let slot = Arc::new(Slot {
                    notify: Notify::new(),
                    answer: Mutex::new(None),
                });
                slots.insert(key, Arc::clone(&slot));
                return AskOutcome::BecomeAsker;
            }
        };

        loop {
            // Register as a waiter *before* checking the answer: `publish`
            // wakes via `notify_waiters`, which only reaches tasks already
            // registered at the moment it's called. Building the `Notified`
            // future and `enable`-ing it first means a `publish` landing
            // between the check and the await still wakes us, instead of
            // the notification being lost and this loop blocking forever.
            let notified = slot.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(answer) = slot.answer.lock().await.clone() {
                return AskOutcome::Answered(answer);
            }

            notified.await;
        }
    }

    /// Publish a successful answer for `(cache_key, question)`, waking every
    /// waiter.
    pub async fn resolve(&self, cache_key: &str, question: &str, answer: String) {
        self.publish(cache_key, question, Ok(answer)).await;
    }

    /// Publish a failure for `(cache_key, question)` (the asker errored
    /// before getting an answer), waking every waiter with the same error.
    pub async fn fail(&self, cache_key: &str, question: &str, error: String) {
        self.publish(cache_key, question, Err(error)).await;
    }

    /// Snapshot every question asked of `cache_key` so far, alongside its
    /// answer once one has been published (`None` while still in flight).
    pub async fn list(&self, cache_key: &str) -> Vec<(String, Option<Result<String, String>>)> {
        let slots = self.slots.lock().await;
        let mut out = Vec::new();
        for ((key, question), slot) in slots.iter() {
            if key == cache_key {
                out.push((question.clone(), slot.answer.lock().await.clone()));
            }
        }
        out
    }

    async fn publish(&self, cache_key: &str, question: &str, result: Result<String, String>) {
        let key = (cache_key.to_string(), question.to_string());
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(&key).cloned()
        };
        if let Some(slot) = slot {
            *slot.answer.lock().await = Some(result);
            slot.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_asker_becomes_owner_second_waits() {
        let cache = Arc::new(QuestionCache::new());

        let first = matches!(cache.ask("task_a", "what is the budget?").await, AskOutcome::BecomeAsker);
        assert!(first);

        let cache2 = Arc::clone(&cache);
        let waiter = tokio::spawn(async move { cache2.ask("task_a", "what is the budget?").await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.resolve("task_a", "what is the budget?", "$500".to_string()).await;

        match waiter.await.unwrap() {
            AskOutcome::Answered(Ok(answer)) => assert_eq!(answer, "$500"),
            _ => panic!("expected answered outcome"),
        }
    }

    #[tokio::test]
    async fn list_reports_in_flight_and_resolved_questions() {
        let cache = QuestionCache::new();
        assert!(matches!(cache.ask("task_a", "still pending?").await, AskOutcome::BecomeAsker));
        assert!(matches!(cache.ask("task_a", "already answered?").await, AskOutcome::BecomeAsker));
        cache.resolve("task_a", "already answered?", "yes".to_string()).await;

        let mut entries = cache.list("task_a").await;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "already answered?");
        assert_eq!(entries[0].1, Some(Ok("yes".to_string())));
        assert_eq!(entries[1].0, "still pending?");
        assert_eq!(entries[1].1, None);
    }

    #[tokio::test]
    async fn different_text_never_dedups() {
        let cache = QuestionCache::new();
        assert!(matches!(cache.ask("task_a", "question a").await, AskOutcome::BecomeAsker));
        assert!(matches!(cache.ask("task_a", "question b").await, AskOutcome::BecomeAsker));
    }

    #[tokio::test]
    async fn same_question_text_does_not_collide_across_different_targets() {
        let cache = QuestionCache::new();
        assert!(matches!(cache.ask("task_a", "same question?").await, AskOutcome::BecomeAsker));
        assert!(matches!(cache.ask("task_b", "same question?").await, AskOutcome::BecomeAsker));
    }

    #[tokio::test]
    async fn asker_failure_propagates_to_waiters() {
        let cache = Arc::new(QuestionCache::new());
        assert!(matches!(cache.ask("task_a", "risky question").await, AskOutcome::BecomeAsker));

        let cache2 = Arc::clone(&cache);
        let waiter = tokio::spawn(async move { cache2.ask("task_a", "risky question").await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.fail("task_a", "risky question", "commander crashed".to_string()).await;

        match waiter.await.unwrap() {
            AskOutcome::Answered(Err(message)) => assert_eq!(message, "commander crashed"),
            _ => panic!("expected answered-with-error outcome"),
        }
    }
}
