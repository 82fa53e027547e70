// Cron engine: one timer task per admitted entry
//
// Entries registered before `start` wait on a gate, so bootstrap
// reconciliation can admit the whole snapshot without firing anything.
// Firing actions run on the timer task and may block on network.

use crate::schedule::TimeExpr;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Opaque handle to a registered entry, used only for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(u64);

/// What an entry does at each implied instant.
#[async_trait]
pub trait FireAction: Send + Sync {
    async fn fire(&self);
}

pub struct CronEngine {
    started: watch::Sender<bool>,
    entries: Mutex<HashMap<EntryId, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl CronEngine {
    pub fn new() -> Self {
        let (started, _) = watch::channel(false);
        Self {
            started,
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an entry. The action captures whatever snapshot it
    /// needs; the engine never re-reads anything at fire time.
    pub fn add(&self, expr: TimeExpr, action: Arc<dyn FireAction>) -> EntryId {
        let id = EntryId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut started = self.started.subscribe();

        let handle = tokio::spawn(async move {
            while !*started.borrow() {
                if started.changed().await.is_err() {
                    return;
                }
            }
            loop {
                let now = Utc::now();
                let Some(next) = expr.next_after(now) else {
                    break;
                };
                let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;
                action.fire().await;
            }
        });

        self.entries
            .lock()
            .expect("engine lock poisoned")
            .insert(id, handle);
        id
    }

    /// Cancel an entry. Unknown ids are tolerated; they indicate a
    /// prior admit that failed.
    pub fn remove(&self, id: EntryId) -> bool {
        match self
            .entries
            .lock()
            .expect("engine lock poisoned")
            .remove(&id)
        {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Open the gate; entries admitted from now on fire immediately on
    /// schedule.
    pub fn start(&self) {
        let _ = self.started.send(true);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("engine lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CronEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CronEngine {
    fn drop(&mut self) {
        for (_, handle) in self
            .entries
            .lock()
            .expect("engine lock poisoned")
            .drain()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingAction {
        fired: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FireAction for CountingAction {
        async fn fire(&self) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Arc<AtomicUsize>, Arc<CountingAction>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let action = Arc::new(CountingAction {
            fired: fired.clone(),
        });
        (fired, action)
    }

    #[tokio::test]
    async fn test_entries_wait_for_start() {
        let engine = CronEngine::new();
        let (fired, action) = counting();
        engine.add(TimeExpr::parse("@every 1ms").unwrap(), action);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        engine.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_remove_cancels_firing() {
        let engine = CronEngine::new();
        engine.start();
        let (fired, action) = counting();
        let id = engine.add(TimeExpr::parse("@every 10ms").unwrap(), action);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(engine.remove(id));
        let seen = fired.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), seen);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_entry_is_tolerated() {
        let engine = CronEngine::new();
        let (_, action) = counting();
        let id = engine.add(TimeExpr::parse("@every 1h").unwrap(), action);
        assert!(engine.remove(id));
        assert!(!engine.remove(id));
    }

    #[tokio::test]
    async fn test_distinct_entries_fire_concurrently() {
        let engine = CronEngine::new();
        engine.start();
        let (fired_a, action_a) = counting();
        let (fired_b, action_b) = counting();
        engine.add(TimeExpr::parse("@every 10ms").unwrap(), action_a);
        engine.add(TimeExpr::parse("@every 10ms").unwrap(), action_b);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fired_a.load(Ordering::SeqCst) > 0);
        assert!(fired_b.load(Ordering::SeqCst) > 0);
    }
}
