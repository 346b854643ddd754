//! Lane Scheduler (C7, spec §4.7): per-key FIFO serialisation plus global
//! concurrency-class caps. No direct teacher analog exists for this two-level
//! scheduler shape; structured on the handle/engine split
//! `skynet-scheduler::engine::SchedulerHandle` uses for its own shared state,
//! built on `tokio::sync::{Mutex, Semaphore}` instead of sqlite since there is
//! nothing here to persist.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use conduit_core::config::LaneConfig;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};

/// One FIFO lane per distinct session key. `tokio::sync::Mutex` grants
/// waiters in acquire order, which gives the strict FIFO-per-key ordering
/// spec §8 requires without a separate queue data structure.
struct Lanes {
    by_key: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Lanes {
    fn new() -> Self {
        Self {
            by_key: StdMutex::new(HashMap::new()),
        }
    }

    fn lane_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.by_key.lock().unwrap();
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

pub struct LaneScheduler {
    lanes: Lanes,
    classes: HashMap<String, Arc<Semaphore>>,
}

impl LaneScheduler {
    /// Builds the fixed set of concurrency classes from config (at minimum
    /// `default` and `cron`, per spec §4.7).
    pub fn new(config: &LaneConfig) -> Self {
        let mut classes = HashMap::new();
        classes.insert("default".to_string(), Arc::new(Semaphore::new(config.default_class_concurrency)));
        classes.insert("cron".to_string(), Arc::new(Semaphore::new(config.cron_class_concurrency)));
        Self {
            lanes: Lanes::new(),
            classes,
        }
    }

    /// Runs `f` after (a) no other task is running under `key` and (b) a
    /// slot in `class` is free. Ordering within a key is strict FIFO.
    /// Dropping the returned future before it resolves (caller cancellation)
    /// while still queued for the key lock or the class slot simply removes
    /// this waiter; nothing downstream observes it ran.
    ///
    /// Unknown classes fall back to `default` (never panics on a bad
    /// concurrency-class string) and are logged once.
    pub async fn enqueue_with_session<F, Fut, T>(&self, key: &str, class: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lane = self.lanes.lane_for(key);
        let _key_guard = lane.lock().await;

        let semaphore = self.classes.get(class).unwrap_or_else(|| {
            tracing::warn!(class, "unknown concurrency class, falling back to default");
            self.classes.get("default").expect("default class always present")
        });
        let _slot = semaphore.acquire().await.expect("semaphore never closed");

        // The class slot and the key lock are both released when this
        // scope ends, whether `f` completed or panicked while unwinding.
        f().await
    }

    /// Currently available (unused) slots in `class`, for observability.
    pub fn available_slots(&self, class: &str) -> usize {
        self.classes.get(class).map(|s| s.available_permits()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config() -> LaneConfig {
        LaneConfig {
            default_class_concurrency: 2,
            cron_class_concurrency: 1,
        }
    }

    #[tokio::test]
    async fn same_key_tasks_serialize() {
        let scheduler = Arc::new(LaneScheduler::new(&config()));
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let scheduler = scheduler.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                scheduler
                    .enqueue_with_session("channel-1", "default", || async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        order.lock().unwrap().push(i);
                    })
                    .await;
            }));
            // stagger spawns so enqueue order is deterministic
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn different_keys_run_in_parallel() {
        let scheduler = Arc::new(LaneScheduler::new(&config()));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for key in ["a", "b"] {
            let scheduler = scheduler.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                scheduler
                    .enqueue_with_session(key, "default", || async move {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn class_cap_limits_global_concurrency() {
        let scheduler = Arc::new(LaneScheduler::new(&config()));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..4u32 {
            let scheduler = scheduler.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                scheduler
                    .enqueue_with_session(&format!("key-{i}"), "default", || async move {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_task_still_releases_its_slot() {
        let scheduler = Arc::new(LaneScheduler::new(&config()));
        let first: Result<(), &str> = scheduler
            .enqueue_with_session("channel-1", "default", || async { Err("boom") })
            .await;
        assert!(first.is_err());

        let second = scheduler
            .enqueue_with_session("channel-1", "default", || async { 42 })
            .await;
        assert_eq!(second, 42);
    }

    #[tokio::test]
    async fn unknown_class_falls_back_to_default() {
        let scheduler = LaneScheduler::new(&config());
        let result = scheduler.enqueue_with_session("channel-1", "nonexistent", || async { 7 }).await;
        assert_eq!(result, 7);
    }
}
