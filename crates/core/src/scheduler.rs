//! Keyed grace-period timers
//!
//! At most one pending timer exists per key. Starting a timer for a key
//! that already has one replaces it; a fired timer removes its own entry
//! before its callback runs, so `has(key)` is false while finalization is
//! in progress.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::Result;

/// Default grace period before an empty room is closed
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

struct PendingGrace {
    /// Distinguishes this timer from any later replacement for the same key
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TimerTable {
    pending: HashMap<String, PendingGrace>,
    next_generation: u64,
}

struct Inner {
    table: Mutex<TimerTable>,
    duration_ms: AtomicU64,
}

impl Inner {
    fn lock_table(&self) -> MutexGuard<'_, TimerTable> {
        // The table is never left half-updated, so a poisoned lock is still usable
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of delayed, cancellable callbacks keyed by room code.
///
/// Cloning yields another handle to the same table.
#[derive(Clone)]
pub struct GracePeriodScheduler {
    inner: Arc<Inner>,
}

impl GracePeriodScheduler {
    pub fn new(duration: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(TimerTable::default()),
                duration_ms: AtomicU64::new(duration_millis(duration)),
            }),
        }
    }

    /// Delay applied to timers started from now on
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.inner.duration_ms.load(Ordering::Relaxed))
    }

    /// Change the delay. Timers already armed keep their original deadline.
    pub fn set_duration(&self, duration: Duration) {
        self.inner
            .duration_ms
            .store(duration_millis(duration), Ordering::Relaxed);
        info!(duration_ms = duration_millis(duration), "Grace period duration changed");
    }

    /// Arm a timer for `key`, replacing any pending one.
    ///
    /// When the timer expires `callback(key)` runs once. Errors and panics
    /// from the callback are logged and go no further.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, key: impl Into<String>, callback: F)
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let key = key.into();
        let delay = self.duration();

        let mut table = self.inner.lock_table();
        if let Some(previous) = table.pending.remove(&key) {
            previous.handle.abort();
            debug!(key = %key, "Replaced pending grace period");
        }

        let generation = table.next_generation;
        table.next_generation += 1;

        let handle = tokio::spawn(run_timer(
            self.inner.clone(),
            key.clone(),
            generation,
            delay,
            callback,
        ));
        table.pending.insert(key.clone(), PendingGrace { generation, handle });
        drop(table);

        info!(key = %key, delay_ms = duration_millis(delay), "Grace period started");
    }

    /// Cancel the pending timer for `key`. Returns whether one existed.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self.inner.lock_table().pending.remove(key);
        match removed {
            Some(pending) => {
                pending.handle.abort();
                info!(key = %key, "Grace period cancelled");
                true
            }
            None => false,
        }
    }

    /// True iff a timer is currently armed for `key`
    pub fn has(&self, key: &str) -> bool {
        self.inner.lock_table().pending.contains_key(key)
    }

    /// Number of armed timers
    pub fn pending_count(&self) -> usize {
        self.inner.lock_table().pending.len()
    }

    /// Cancel every armed timer, returning how many there were
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, PendingGrace)> =
            self.inner.lock_table().pending.drain().collect();
        for (key, pending) in &drained {
            pending.handle.abort();
            debug!(key = %key, "Grace period abandoned");
        }
        drained.len()
    }
}

impl Default for GracePeriodScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn run_timer<F, Fut>(
    inner: Arc<Inner>,
    key: String,
    generation: u64,
    delay: Duration,
    callback: F,
) where
    F: FnOnce(String) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::time::sleep(delay).await;

    {
        let mut table = inner.lock_table();
        match table.pending.get(&key) {
            Some(entry) if entry.generation == generation => {
                table.pending.remove(&key);
            }
            // Cancelled or replaced while we were waking up
            _ => return,
        }
    }
    drop(inner);

    debug!(key = %key, "Grace period expired");

    // Own task, so a panicking callback cannot take the timer down with it
    match tokio::spawn(callback(key.clone())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(key = %key, error = %e, "Grace period callback failed");
        }
        Err(e) => {
            error!(key = %key, error = %e, "Grace period callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    const GRACE: Duration = Duration::from_millis(5000);

    fn counting_callback(
        counter: &Arc<AtomicUsize>,
    ) -> impl FnOnce(String) -> std::future::Ready<Result<()>> + Send + 'static {
        let counter = counter.clone();
        move |_key: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(()))
        }
    }

    async fn failing_finalize(_key: String) -> Result<()> {
        Err(Error::InvalidOperation("repository offline".into()))
    }

    async fn exploding_finalize(_key: String) -> Result<()> {
        panic!("finalize blew up")
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_then_cancel_never_fires() {
        let scheduler = GracePeriodScheduler::new(GRACE);
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.start("ABC123", counting_callback(&fired));
        assert!(scheduler.has("ABC123"));
        assert!(scheduler.cancel("ABC123"));
        assert!(!scheduler.has("ABC123"));

        sleep(GRACE * 2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_fires_only_latest() {
        let scheduler = GracePeriodScheduler::new(GRACE);
        let calls = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let calls = calls.clone();
            scheduler.start("ROOM", move |_key| async move {
                calls.lock().unwrap().push(label);
                Ok(())
            });
        }
        assert_eq!(scheduler.pending_count(), 1);

        sleep(GRACE * 2).await;
        assert_eq!(*calls.lock().unwrap(), vec!["second"]);
        assert!(!scheduler.has("ROOM"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resets_deadline() {
        let scheduler = GracePeriodScheduler::new(GRACE);
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.start("ROOM", counting_callback(&fired));
        sleep(Duration::from_millis(3000)).await;
        scheduler.start("ROOM", counting_callback(&fired));

        sleep(Duration::from_millis(3000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(scheduler.has("ROOM"));

        sleep(Duration::from_millis(2500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let scheduler = GracePeriodScheduler::new(GRACE);
        assert!(!scheduler.cancel("UNKNOWN"));

        scheduler.start("KEY", |_key| async { Ok(()) });
        assert!(scheduler.cancel("KEY"));
        assert!(!scheduler.cancel("KEY"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_keys_fire_once_and_table_drains() {
        let scheduler = GracePeriodScheduler::new(GRACE);
        let fired = Arc::new(Mutex::new(HashMap::<String, usize>::new()));

        for i in 0..100 {
            let fired = fired.clone();
            scheduler.start(format!("ROOM{i:03}"), move |key| async move {
                *fired.lock().unwrap().entry(key).or_default() += 1;
                Ok(())
            });
        }
        assert_eq!(scheduler.pending_count(), 100);

        sleep(GRACE + Duration::from_millis(10)).await;

        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 100);
        assert!(fired.values().all(|&count| count == 1));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_removed_before_callback_runs() {
        let scheduler = GracePeriodScheduler::new(GRACE);
        let seen_pending = Arc::new(Mutex::new(None));

        let observer = scheduler.clone();
        let seen = seen_pending.clone();
        scheduler.start("SELF", move |key| async move {
            *seen.lock().unwrap() = Some(observer.has(&key));
            Ok(())
        });

        sleep(GRACE * 2).await;
        assert_eq!(*seen_pending.lock().unwrap(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_callback_does_not_disturb_other_timers() {
        let scheduler = GracePeriodScheduler::new(GRACE);
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.start("BROKEN", failing_finalize);
        scheduler.start("PANICS", exploding_finalize);
        scheduler.start("HEALTHY", counting_callback(&fired));

        sleep(GRACE * 2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 0);

        // Still usable afterwards
        scheduler.start("AGAIN", counting_callback(&fired));
        sleep(GRACE * 2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_duration_applies_to_new_timers_only() {
        let scheduler = GracePeriodScheduler::new(GRACE);
        let slow = Arc::new(AtomicUsize::new(0));
        let fast = Arc::new(AtomicUsize::new(0));

        scheduler.start("SLOW", counting_callback(&slow));
        scheduler.set_duration(Duration::from_millis(100));
        assert_eq!(scheduler.duration(), Duration::from_millis(100));
        scheduler.start("FAST", counting_callback(&fast));

        sleep(Duration::from_millis(200)).await;
        assert_eq!(fast.load(Ordering::SeqCst), 1);
        assert_eq!(slow.load(Ordering::SeqCst), 0);
        assert!(scheduler.has("SLOW"));

        sleep(GRACE).await;
        assert_eq!(slow.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let scheduler = GracePeriodScheduler::new(GRACE);
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.start("A", counting_callback(&fired));
        scheduler.start("B", counting_callback(&fired));
        assert_eq!(scheduler.cancel_all(), 2);

        sleep(GRACE * 2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_count(), 0);
    }
}
