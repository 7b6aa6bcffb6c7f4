use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::executor::EditForwarder;
use crate::metrics;
use crate::model::{Clock, DrainReport, ReleasedEdit, SchedulerEvent, TokioClock};
use crate::runtime::MutationScheduler;

/// Runs drain cycles for a [`MutationScheduler`] and forwards what they release.
///
/// A cycle is one timer task ticking every `drain_interval`. It is started when an
/// admission reports `start_drain` and ends on the first tick that leaves the scheduler
/// with no records, so at most one cycle is draining at any time.
pub struct DrainWorker {
    scheduler: Arc<MutationScheduler>,
    forwarder: Arc<dyn EditForwarder>,
    clock: Arc<dyn Clock>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl DrainWorker {
    pub fn new(scheduler: Arc<MutationScheduler>, forwarder: Arc<dyn EditForwarder>) -> Self {
        Self::with_clock(scheduler, forwarder, Arc::new(TokioClock))
    }

    pub fn with_clock(
        scheduler: Arc<MutationScheduler>,
        forwarder: Arc<dyn EditForwarder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler,
            forwarder,
            clock,
            worker: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn scheduler(&self) -> &Arc<MutationScheduler> {
        &self.scheduler
    }

    /// Spawns the timer task for a new cycle. A task left over from the previous cycle has
    /// already seen its last tick and only finishes forwarding.
    pub fn start_cycle(&self) {
        let scheduler = Arc::clone(&self.scheduler);
        let forwarder = Arc::clone(&self.forwarder);
        let clock = Arc::clone(&self.clock);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            run_cycle(scheduler, forwarder, clock, cancel).await;
        });
        let previous = self.worker.lock().replace(handle);
        if previous.is_some() {
            debug!("drain cycle restarted");
        }
    }

    /// Runs a single drain pass immediately, outside of any timer.
    pub async fn drain_now(&self) -> DrainReport {
        let mut report = self.scheduler.drain(self.clock.now());
        let released = std::mem::take(&mut report.released);
        deliver(&self.scheduler, self.forwarder.as_ref(), released).await;
        report
    }

    /// Stops the running cycle. Edits still queued stay queued; the worker does not start
    /// again after this.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!("drain worker ended abnormally: {err}");
                }
            }
        }
    }
}

impl Drop for DrainWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_cycle(
    scheduler: Arc<MutationScheduler>,
    forwarder: Arc<dyn EditForwarder>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) {
    let period = scheduler.config().drain_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                let mut report = scheduler.drain(clock.now());
                let released = std::mem::take(&mut report.released);
                deliver(&scheduler, forwarder.as_ref(), released).await;
                if report.idle {
                    debug!("drain cycle finished");
                    break;
                }
            }
        }
    }
}

async fn deliver(
    scheduler: &MutationScheduler,
    forwarder: &dyn EditForwarder,
    released: Vec<ReleasedEdit>,
) {
    for edit in released {
        let resource = edit.request.resource;
        let id = edit.request.id;
        match forwarder.forward(&edit.request).await {
            Ok(value) => {
                metrics::record_delivered();
                scheduler.publish(SchedulerEvent::Delivered { resource, edit: id });
                let _ = edit.completion.send(Ok(value));
            }
            Err(err) => {
                metrics::record_failed();
                warn!(channel = %resource, edit = %id, error = %err, "deferred edit failed");
                scheduler.publish(SchedulerEvent::Failed {
                    resource,
                    edit: id,
                    error: err.clone(),
                });
                let _ = edit.completion.send(Err(err));
            }
        }
    }
}
