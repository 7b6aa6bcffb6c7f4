use std::collections::HashMap;

use chatgate_core_types::ChannelId;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::SchedulerError;
use crate::metrics;
use crate::model::{
    Admission, DeferredEdit, DrainReport, EditId, MutationRequest, ReleasedEdit, SchedulerEvent,
    ThrottleConfig, WindowSnapshot, WindowState,
};
use crate::window::{PendingWindow, QueuedEdit};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct SchedulerState {
    windows: HashMap<ChannelId, PendingWindow>,
    draining: bool,
    next_sweep: Option<Instant>,
}

/// Admission controller for hot-field edits.
///
/// All window records and the drain-cycle flag live behind one lock, so the
/// count/queue/expiry triple of a resource never changes outside a single critical
/// section. Nothing here awaits; the caller forwards admitted edits and runs the drain
/// ticks.
#[derive(Debug)]
pub struct MutationScheduler {
    state: Mutex<SchedulerState>,
    config: ThrottleConfig,
    events: broadcast::Sender<SchedulerEvent>,
}

impl MutationScheduler {
    pub fn new(config: ThrottleConfig) -> Result<Self, SchedulerError> {
        if config.burst == 0 {
            return Err(SchedulerError::InvalidConfig("burst must be at least 1".into()));
        }
        if config.window.is_zero() || config.drain_interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "window and drain interval must be non-zero".into(),
            ));
        }
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            state: Mutex::new(SchedulerState::default()),
            config,
            events,
        })
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: SchedulerEvent) {
        if self.events.receiver_count() > 0 {
            let _ = self.events.send(event);
        }
    }

    /// Decides whether `request` goes out now or waits for a drain tick.
    pub fn admit(&self, request: MutationRequest, now: Instant) -> Admission {
        self.admit_with_hold(request, now, false)
    }

    /// Like [`admit`](Self::admit), but a deferred edit is held: it keeps its place in
    /// line and no drain tick releases it until [`unhold`](Self::unhold) is called.
    /// [`withdraw`](Self::withdraw) takes it back out instead.
    pub fn admit_held(&self, request: MutationRequest, now: Instant) -> Admission {
        self.admit_with_hold(request, now, true)
    }

    fn admit_with_hold(&self, request: MutationRequest, now: Instant, held: bool) -> Admission {
        self.sweep_idle(now);

        let burst = self.config.burst;
        let window = self.config.window;
        let resource = request.resource;
        let mut state = self.state.lock();

        let Some(record) = state.windows.get_mut(&resource) else {
            state
                .windows
                .insert(resource, PendingWindow::opened(now, window));
            drop(state);
            return self.forwarded(request, 1);
        };

        if !record.has_backlog() {
            if record.is_expired(now) {
                record.restart(now, window);
                let sent = record.sent();
                drop(state);
                return self.forwarded(request, sent);
            }
            if record.try_take_slot(now, burst, window) {
                let sent = record.sent();
                drop(state);
                return self.forwarded(request, sent);
            }
        }

        let (tx, rx) = oneshot::channel();
        let id = request.id;
        let position = record.queued();
        let queued = record.push(QueuedEdit {
            request,
            completion: tx,
            held,
        });
        let start_drain = !state.draining;
        state.draining = true;
        drop(state);

        metrics::record_deferred();
        debug!(channel = %resource, edit = %id, queued, held, "hot-field edit deferred");
        self.publish(SchedulerEvent::Deferred {
            resource,
            edit: id,
            queued,
        });
        Admission::Deferred {
            handle: DeferredEdit::new(id, resource, position, rx),
            start_drain,
        }
    }

    /// Drops records whose window closed with nothing queued. Runs at most once per
    /// window length, so resources that never deferred do not pile up between cycles.
    fn sweep_idle(&self, now: Instant) {
        let mut state = self.state.lock();
        if state.next_sweep.is_some_and(|at| now < at) {
            return;
        }
        state.next_sweep = Some(now + self.config.window);
        let mut closed = Vec::new();
        state.windows.retain(|resource, record| {
            let keep = record.has_backlog() || !record.is_expired(now);
            if !keep {
                closed.push(*resource);
            }
            keep
        });
        drop(state);

        if closed.is_empty() {
            return;
        }
        debug!(closed = closed.len(), "idle windows swept");
        for resource in closed {
            metrics::record_window_closed();
            self.publish(SchedulerEvent::WindowClosed { resource });
        }
    }

    /// Lets a held edit be released by the next drain tick. Returns false when the edit
    /// is no longer queued.
    pub fn unhold(&self, resource: ChannelId, id: EditId) -> bool {
        let mut state = self.state.lock();
        state
            .windows
            .get_mut(&resource)
            .is_some_and(|record| record.unhold(id))
    }

    /// Removes a queued edit before any tick releases it. Its handle resolves as
    /// abandoned. Returns false when the edit is no longer queued.
    pub fn withdraw(&self, resource: ChannelId, id: EditId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            state
                .windows
                .get_mut(&resource)
                .and_then(|record| record.remove(id))
        };
        match removed {
            Some(edit) => {
                drop(edit);
                debug!(channel = %resource, edit = %id, "queued edit withdrawn");
                self.publish(SchedulerEvent::Withdrawn { resource, edit: id });
                true
            }
            None => false,
        }
    }

    fn forwarded(&self, request: MutationRequest, sent: u32) -> Admission {
        metrics::record_forwarded();
        debug!(channel = %request.resource, edit = %request.id, sent, "hot-field edit admitted");
        self.publish(SchedulerEvent::Forwarded {
            resource: request.resource,
            edit: request.id,
            sent,
        });
        Admission::Forward(request)
    }

    /// One drain tick.
    ///
    /// Every record with a backlog releases up to `burst` edits in FIFO order, which
    /// resets its count and reopens its window. Records with nothing queued are removed
    /// once their window has closed. When the mapping ends up empty the drain cycle is
    /// marked stopped.
    pub fn drain(&self, now: Instant) -> DrainReport {
        let burst = self.config.burst;
        let window = self.config.window;
        let mut report = DrainReport::default();
        let mut state = self.state.lock();

        let mut closed = Vec::new();
        for (resource, record) in state.windows.iter_mut() {
            if !record.has_backlog() {
                if record.is_expired(now) {
                    closed.push(*resource);
                }
                continue;
            }
            for edit in record.release(now, burst, window) {
                report.released.push(ReleasedEdit {
                    request: edit.request,
                    completion: edit.completion,
                });
            }
        }
        for resource in &closed {
            state.windows.remove(resource);
        }

        report.closed = closed;
        report.remaining = state.windows.len();
        if state.windows.is_empty() {
            state.draining = false;
            report.idle = true;
        }
        drop(state);

        for released in &report.released {
            metrics::record_released();
            self.publish(SchedulerEvent::Released {
                resource: released.request.resource,
                edit: released.request.id,
            });
        }
        for resource in &report.closed {
            metrics::record_window_closed();
            self.publish(SchedulerEvent::WindowClosed {
                resource: *resource,
            });
        }
        self.publish(SchedulerEvent::Drained {
            released: report.released.len(),
            remaining: report.remaining,
        });
        if report.idle {
            self.publish(SchedulerEvent::CycleStopped);
        }
        info!(
            released = report.released.len(),
            closed = report.closed.len(),
            remaining = report.remaining,
            "drain tick"
        );
        report
    }

    pub fn is_draining(&self) -> bool {
        self.state.lock().draining
    }

    pub fn tracked(&self) -> usize {
        self.state.lock().windows.len()
    }

    pub fn queued(&self, resource: ChannelId) -> usize {
        self.state
            .lock()
            .windows
            .get(&resource)
            .map(|record| record.queued())
            .unwrap_or(0)
    }

    pub fn snapshot(&self, resource: ChannelId, now: Instant) -> WindowSnapshot {
        let state = self.state.lock();
        match state.windows.get(&resource) {
            Some(record) => WindowSnapshot {
                resource,
                state: record.state(self.config.burst),
                sent: record.sent(),
                queued: record.queued(),
                expires_in_ms: record.remaining(now).as_millis() as u64,
            },
            None => WindowSnapshot {
                resource,
                state: WindowState::Idle,
                sent: 0,
                queued: 0,
                expires_in_ms: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use std::time::Duration;

    const TEN_MINUTES: Duration = Duration::from_secs(600);

    fn scheduler() -> MutationScheduler {
        MutationScheduler::new(ThrottleConfig::default()).unwrap()
    }

    fn rename(resource: u64, name: &str) -> MutationRequest {
        let mut payload = Map::new();
        payload.insert("name".into(), json!(name));
        MutationRequest::new(ChannelId(resource), payload, None)
    }

    fn expect_forward(admission: Admission) -> MutationRequest {
        match admission {
            Admission::Forward(request) => request,
            other => panic!("expected forward, got {other:?}"),
        }
    }

    fn expect_deferred(admission: Admission) -> (DeferredEdit, bool) {
        match admission {
            Admission::Deferred {
                handle,
                start_drain,
            } => (handle, start_drain),
            other => panic!("expected deferral, got {other:?}"),
        }
    }

    #[test]
    fn third_rapid_edit_is_deferred() {
        let scheduler = scheduler();
        let now = Instant::now();
        expect_forward(scheduler.admit(rename(1, "a"), now));
        expect_forward(scheduler.admit(rename(1, "b"), now));
        let (handle, start_drain) = expect_deferred(scheduler.admit(rename(1, "c"), now));
        assert!(start_drain);
        assert_eq!(handle.position, 0);
        assert_eq!(scheduler.queued(ChannelId(1)), 1);
        assert!(scheduler.is_draining());
    }

    #[test]
    fn only_first_deferral_starts_the_cycle() {
        let scheduler = scheduler();
        let now = Instant::now();
        for name in ["a", "b"] {
            expect_forward(scheduler.admit(rename(1, name), now));
            expect_forward(scheduler.admit(rename(2, name), now));
        }
        let (_, first) = expect_deferred(scheduler.admit(rename(1, "c"), now));
        let (_, second) = expect_deferred(scheduler.admit(rename(2, "c"), now));
        let (third_handle, third) = expect_deferred(scheduler.admit(rename(1, "d"), now));
        assert!(first);
        assert!(!second);
        assert!(!third);
        assert_eq!(third_handle.position, 1);
    }

    #[test]
    fn resources_are_independent() {
        let scheduler = scheduler();
        let now = Instant::now();
        for name in ["a", "b"] {
            expect_forward(scheduler.admit(rename(1, name), now));
        }
        expect_deferred(scheduler.admit(rename(1, "c"), now));
        expect_forward(scheduler.admit(rename(2, "x"), now));
        expect_forward(scheduler.admit(rename(2, "y"), now));
    }

    #[test]
    fn second_edit_refreshes_window() {
        let scheduler = scheduler();
        let start = Instant::now();
        expect_forward(scheduler.admit(rename(1, "a"), start));
        let later = start + Duration::from_secs(120);
        expect_forward(scheduler.admit(rename(1, "b"), later));
        let snapshot = scheduler.snapshot(ChannelId(1), later);
        assert_eq!(snapshot.sent, 2);
        assert_eq!(snapshot.expires_in_ms, TEN_MINUTES.as_millis() as u64);
    }

    #[test]
    fn drain_releases_single_item_then_closes_window() {
        let scheduler = scheduler();
        let now = Instant::now();
        expect_forward(scheduler.admit(rename(1, "a"), now));
        expect_forward(scheduler.admit(rename(1, "b"), now));
        let (handle, _) = expect_deferred(scheduler.admit(rename(1, "c"), now));

        let tick = now + TEN_MINUTES;
        let report = scheduler.drain(tick);
        assert_eq!(report.released.len(), 1);
        assert_eq!(report.released[0].request.id, handle.id);
        assert_eq!(report.remaining, 1);
        assert!(!report.idle);
        assert_eq!(scheduler.queued(ChannelId(1)), 0);

        let report = scheduler.drain(tick + TEN_MINUTES);
        assert!(report.released.is_empty());
        assert_eq!(report.closed, vec![ChannelId(1)]);
        assert!(report.idle);
        assert!(!scheduler.is_draining());
        assert_eq!(scheduler.tracked(), 0);
    }

    #[test]
    fn drain_releases_two_of_three_in_order() {
        let scheduler = scheduler();
        let now = Instant::now();
        expect_forward(scheduler.admit(rename(1, "a"), now));
        expect_forward(scheduler.admit(rename(1, "b"), now));
        let ids: Vec<_> = ["c", "d", "e"]
            .iter()
            .map(|name| expect_deferred(scheduler.admit(rename(1, name), now)).0.id)
            .collect();

        let report = scheduler.drain(now + TEN_MINUTES);
        let released: Vec<_> = report.released.iter().map(|r| r.request.id).collect();
        assert_eq!(released, ids[..2].to_vec());
        assert_eq!(scheduler.queued(ChannelId(1)), 1);

        let report = scheduler.drain(now + TEN_MINUTES * 2);
        assert_eq!(report.released.len(), 1);
        assert_eq!(report.released[0].request.id, ids[2]);
    }

    #[test]
    fn drain_tick_releases_even_while_window_is_open() {
        let scheduler = scheduler();
        let now = Instant::now();
        expect_forward(scheduler.admit(rename(1, "a"), now));
        expect_forward(scheduler.admit(rename(1, "b"), now + Duration::from_secs(300)));
        let (handle, _) =
            expect_deferred(scheduler.admit(rename(1, "c"), now + Duration::from_secs(301)));

        // The window refreshed at +300s is still open at this tick.
        let report = scheduler.drain(now + TEN_MINUTES);
        assert_eq!(report.released.len(), 1);
        assert_eq!(report.released[0].request.id, handle.id);
        assert_eq!(scheduler.queued(ChannelId(1)), 0);
    }

    #[test]
    fn open_window_without_backlog_survives_the_tick() {
        let scheduler = scheduler();
        let now = Instant::now();
        for name in ["a", "b"] {
            expect_forward(scheduler.admit(rename(1, name), now));
        }
        expect_deferred(scheduler.admit(rename(1, "c"), now));
        expect_forward(scheduler.admit(rename(2, "x"), now + Duration::from_secs(500)));

        let tick = now + TEN_MINUTES;
        let report = scheduler.drain(tick);
        assert!(report.closed.is_empty());
        assert_eq!(report.remaining, 2);
        assert_eq!(scheduler.snapshot(ChannelId(2), tick).sent, 1);

        let report = scheduler.drain(tick + TEN_MINUTES);
        assert_eq!(report.closed.len(), 2);
        assert!(report.idle);
    }

    #[test]
    fn new_edits_queue_behind_backlog() {
        let scheduler = scheduler();
        let now = Instant::now();
        expect_forward(scheduler.admit(rename(1, "a"), now));
        expect_forward(scheduler.admit(rename(1, "b"), now));
        for name in ["c", "d", "e"] {
            expect_deferred(scheduler.admit(rename(1, name), now));
        }
        let tick = now + TEN_MINUTES;
        scheduler.drain(tick);
        // One edit still waits, so a fresh one may not jump ahead of it.
        let (handle, start_drain) = expect_deferred(scheduler.admit(rename(1, "f"), tick));
        assert_eq!(handle.position, 1);
        assert!(!start_drain);
    }

    #[test]
    fn expired_idle_window_restarts_burst() {
        let scheduler = scheduler();
        let now = Instant::now();
        expect_forward(scheduler.admit(rename(1, "a"), now));
        expect_forward(scheduler.admit(rename(1, "b"), now));
        let later = now + TEN_MINUTES;
        expect_forward(scheduler.admit(rename(1, "c"), later));
        assert_eq!(scheduler.snapshot(ChannelId(1), later).sent, 1);
    }

    #[test]
    fn zero_burst_is_rejected() {
        let config = ThrottleConfig {
            burst: 0,
            ..ThrottleConfig::default()
        };
        assert!(matches!(
            MutationScheduler::new(config),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn dropped_completion_reports_abandoned() {
        let scheduler = scheduler();
        let now = Instant::now();
        expect_forward(scheduler.admit(rename(1, "a"), now));
        expect_forward(scheduler.admit(rename(1, "b"), now));
        let (handle, _) = expect_deferred(scheduler.admit(rename(1, "c"), now));
        let report = scheduler.drain(now + TEN_MINUTES);
        drop(report);
        assert!(matches!(
            handle.wait().await,
            Err(SchedulerError::Abandoned(_))
        ));
    }

    #[test]
    fn idle_records_are_swept_without_a_drain_cycle() {
        let scheduler = scheduler();
        let now = Instant::now();
        for resource in 0..1_000 {
            expect_forward(scheduler.admit(rename(resource, "a"), now));
        }
        assert_eq!(scheduler.tracked(), 1_000);
        assert!(!scheduler.is_draining());

        expect_forward(scheduler.admit(rename(5_000, "a"), now + Duration::from_secs(3_600)));
        assert_eq!(scheduler.tracked(), 1);
    }

    #[test]
    fn sweep_keeps_backlogs_and_open_windows() {
        let scheduler = scheduler();
        let now = Instant::now();
        expect_forward(scheduler.admit(rename(1, "a"), now));
        expect_forward(scheduler.admit(rename(1, "b"), now));
        expect_deferred(scheduler.admit(rename(1, "c"), now));
        expect_forward(scheduler.admit(rename(2, "x"), now));

        let later = now + TEN_MINUTES;
        expect_forward(scheduler.admit(rename(3, "y"), later));
        assert_eq!(scheduler.tracked(), 2);
        assert_eq!(scheduler.queued(ChannelId(1)), 1);
        assert_eq!(scheduler.snapshot(ChannelId(3), later).sent, 1);
    }

    #[test]
    fn held_edit_waits_for_unhold() {
        let scheduler = scheduler();
        let now = Instant::now();
        expect_forward(scheduler.admit(rename(1, "a"), now));
        expect_forward(scheduler.admit(rename(1, "b"), now));
        let (handle, _) = expect_deferred(scheduler.admit_held(rename(1, "c"), now));

        let report = scheduler.drain(now + TEN_MINUTES);
        assert!(report.released.is_empty());
        assert_eq!(scheduler.queued(ChannelId(1)), 1);

        assert!(scheduler.unhold(ChannelId(1), handle.id));
        let report = scheduler.drain(now + TEN_MINUTES * 2);
        assert_eq!(report.released.len(), 1);
        assert_eq!(report.released[0].request.id, handle.id);
    }

    #[tokio::test]
    async fn withdrawn_edit_is_never_released() {
        let scheduler = scheduler();
        let now = Instant::now();
        expect_forward(scheduler.admit(rename(1, "a"), now));
        expect_forward(scheduler.admit(rename(1, "b"), now));
        let (handle, _) = expect_deferred(scheduler.admit_held(rename(1, "c"), now));

        assert!(scheduler.withdraw(ChannelId(1), handle.id));
        assert!(!scheduler.withdraw(ChannelId(1), handle.id));
        assert!(!scheduler.unhold(ChannelId(1), handle.id));
        assert_eq!(scheduler.queued(ChannelId(1)), 0);

        let report = scheduler.drain(now + TEN_MINUTES);
        assert!(report.released.is_empty());
        assert_eq!(report.closed, vec![ChannelId(1)]);
        assert!(matches!(
            handle.wait().await,
            Err(SchedulerError::Abandoned(_))
        ));
    }
}
