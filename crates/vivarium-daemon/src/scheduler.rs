//! Background periodic tasks

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Clears the busy flag when a run finishes, even if it panicked
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A job run immediately and then once per period.
///
/// A tick that fires while the previous run is still active is skipped.
/// Cancelling stops further ticks; a run already in flight finishes.
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
    skipped: Arc<AtomicU64>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let busy = Arc::new(AtomicBool::new(false));
        let skipped = Arc::new(AtomicU64::new(0));

        let handle = tokio::spawn({
            let skipped = skipped.clone();
            async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                info!(task = name, period_secs = period.as_secs(), "Periodic task started");

                loop {
                    ticker.tick().await;

                    if busy
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        skipped.fetch_add(1, Ordering::Relaxed);
                        debug!(task = name, "Previous run still active, skipping tick");
                        continue;
                    }

                    let guard = BusyGuard(busy.clone());
                    let run = job();
                    tokio::spawn(async move {
                        let _guard = guard;
                        run.await;
                    });
                }
            }
        });

        Self {
            name,
            handle,
            skipped,
        }
    }

    /// Stop scheduling further runs
    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            info!(
                task = self.name,
                skipped = self.skipped.load(Ordering::Relaxed),
                "Periodic task cancelled"
            );
        }
        self.handle.abort();
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_runs_immediately_and_repeats() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = PeriodicTask::spawn("count", Duration::from_millis(20), {
            let runs = runs.clone();
            move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(110)).await;
        task.cancel();
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_busy_ticks_are_skipped() {
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let task = PeriodicTask::spawn("slow", Duration::from_millis(10), {
            let active = active.clone();
            let max_active = max_active.clone();
            let runs = runs.clone();
            move || {
                let active = active.clone();
                let max_active = max_active.clone();
                let runs = runs.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(45)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        task.cancel();

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert!(task.skipped.load(Ordering::Relaxed) > 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = PeriodicTask::spawn("cancel", Duration::from_millis(10), {
            let runs = runs.clone();
            move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        task.cancel();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_cancel = runs.load(Ordering::SeqCst);
        assert!(after_cancel >= 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
        assert!(task.handle.is_finished());
    }
}
