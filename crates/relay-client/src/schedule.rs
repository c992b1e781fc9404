//! Periodic task plumbing shared by the poller and the reconciler.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// At most one cycle in flight. A second caller is turned away instead of
/// queued.
#[derive(Debug, Default)]
pub struct CycleGuard {
    busy: AtomicBool,
}

/// Held for the duration of a cycle; releases the guard on drop.
#[derive(Debug)]
pub struct CycleToken<'a> {
    busy: &'a AtomicBool,
}

impl CycleGuard {
    pub fn try_enter(&self) -> Option<CycleToken<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleToken { busy: &self.busy })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for CycleToken<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Run `cycle` every `period`, starting immediately. Ticks missed while a
/// cycle runs are skipped. With a `visibility` channel the task waits while
/// the value is `false` and stops when the sender is dropped.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    visibility: Option<watch::Receiver<bool>>,
    mut cycle: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut visibility = visibility;
        loop {
            ticker.tick().await;
            if let Some(rx) = visibility.as_mut() {
                if rx.has_changed().is_err() {
                    break;
                }
                let visible = *rx.borrow_and_update();
                if !visible {
                    tracing::debug!(task = name, "paused while hidden");
                    if rx.wait_for(|visible| *visible).await.is_err() {
                        break;
                    }
                    tracing::debug!(task = name, "resumed");
                    ticker.reset();
                }
            }
            cycle().await;
        }
        tracing::debug!(task = name, "periodic task stopped");
    })
}
