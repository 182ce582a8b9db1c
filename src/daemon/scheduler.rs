use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    config::SettingsHandle,
    storage::{retention::apply_retention, usage_store::UsageStore},
    utils::clock::Clock,
    window_api::WindowSource,
};

use super::{focus::FocusMonitor, tracker::SessionTracker};

#[derive(Debug, Clone, Copy)]
pub struct Intervals {
    pub poll: Duration,
    pub flush: Duration,
    pub checkpoint: Duration,
    pub retention: Duration,
    pub focus: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(1),
            flush: Duration::from_secs(10),
            checkpoint: Duration::from_secs(30),
            retention: Duration::from_secs(60 * 60),
            focus: Duration::from_secs(5),
        }
    }
}

/// Fixed rate timer that stops when shutdown is requested.
struct Ticker<'a> {
    clock: &'a dyn Clock,
    period: Duration,
    next: Instant,
    shutdown: &'a CancellationToken,
}

impl<'a> Ticker<'a> {
    fn new(clock: &'a dyn Clock, period: Duration, shutdown: &'a CancellationToken) -> Self {
        Self {
            clock,
            period,
            next: clock.instant(),
            shutdown,
        }
    }

    /// Waits for the next tick. Returns false once shutdown was requested.
    async fn tick(&mut self) -> bool {
        self.next += self.period;
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = self.clock.sleep_until(self.next) => true,
        }
    }
}

async fn blocking<T: Send + 'static>(
    operation: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(operation).await?
}

/// Drives the tracker with independent timers. Storage work runs on blocking threads, so a slow
/// write delays only its own timer.
pub struct Scheduler {
    tracker: Arc<SessionTracker>,
    store: Arc<dyn UsageStore>,
    settings: Arc<SettingsHandle>,
    clock: Arc<dyn Clock>,
    intervals: Intervals,
}

impl Scheduler {
    pub fn new(
        tracker: Arc<SessionTracker>,
        store: Arc<dyn UsageStore>,
        settings: Arc<SettingsHandle>,
        clock: Arc<dyn Clock>,
        intervals: Intervals,
    ) -> Self {
        Self {
            tracker,
            store,
            settings,
            clock,
            intervals,
        }
    }

    /// Runs until `shutdown` is cancelled, then closes the tracker exactly once.
    pub async fn run(
        self,
        mut source: Box<dyn WindowSource>,
        mut focus: FocusMonitor,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let clock = self.clock.as_ref();
        let intervals = self.intervals;

        let poll = async {
            let mut ticker = Ticker::new(clock, intervals.poll, &shutdown);
            while ticker.tick().await {
                self.tracker.poll(source.as_mut());
            }
            debug!("Poll timer stopped");
        };

        let flush = async {
            let mut ticker = Ticker::new(clock, intervals.flush, &shutdown);
            while ticker.tick().await {
                let tracker = self.tracker.clone();
                match blocking(move || tracker.flush()).await {
                    Ok(0) => (),
                    Ok(count) => debug!("Flushed {count} sessions"),
                    Err(e) => error!("Flush failed {e:?}"),
                }
            }
        };

        let checkpoint = async {
            let mut ticker = Ticker::new(clock, intervals.checkpoint, &shutdown);
            while ticker.tick().await {
                let tracker = self.tracker.clone();
                if let Err(e) = blocking(move || tracker.checkpoint()).await {
                    error!("Checkpoint failed {e:?}");
                }
            }
        };

        let retention = async {
            let mut ticker = Ticker::new(clock, intervals.retention, &shutdown);
            while ticker.tick().await {
                let store = self.store.clone();
                let today = clock.local_date();
                let days = self.settings.current().retention_days();
                let cleanup = blocking(move || Ok(apply_retention(store.as_ref(), today, days)));
                if let Err(e) = cleanup.await {
                    error!("Retention failed {e:?}");
                }
            }
        };

        // A check can wait on an open notification, so it is dropped on shutdown instead of
        // being awaited. Dropping it closes the notification.
        let focus_checks = async {
            let mut ticker = Ticker::new(clock, intervals.focus, &shutdown);
            while ticker.tick().await {
                tokio::select! {
                    _ = shutdown.cancelled() => debug!("Focus check interrupted by shutdown"),
                    _ = focus.check() => (),
                }
            }
        };

        let stop_requested = async {
            shutdown.cancelled().await;
            clock.time()
        };

        let (.., stopped_at) =
            tokio::join!(poll, flush, checkpoint, retention, focus_checks, stop_requested);

        info!("Timers stopped, closing the tracker");
        let tracker = self.tracker.clone();
        blocking(move || tracker.shutdown_at(stopped_at)).await
    }
}
