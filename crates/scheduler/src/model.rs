use std::fmt;
use std::time::Duration;

use chatgate_core_types::ChannelId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::executor::ForwardError;

/// JSON body of an edit, as it will be sent to the transport.
pub type EditPayload = Map<String, Value>;

/// Result delivered to the holder of a [`DeferredEdit`].
pub type DeferredOutcome = Result<Value, ForwardError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EditId(pub Uuid);

impl EditId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EditId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One edit touching throttled fields of a resource.
#[derive(Clone, Debug, PartialEq)]
pub struct MutationRequest {
    pub id: EditId,
    pub resource: ChannelId,
    pub payload: EditPayload,
    pub reason: Option<String>,
}

impl MutationRequest {
    pub fn new(resource: ChannelId, payload: EditPayload, reason: Option<String>) -> Self {
        Self {
            id: EditId::new(),
            resource,
            payload,
            reason,
        }
    }
}

/// Outcome of [`crate::runtime::MutationScheduler::admit`].
#[derive(Debug)]
pub enum Admission {
    /// Within the burst; the caller forwards the request now.
    Forward(MutationRequest),
    /// Burst exhausted; the request sits in the resource queue until a drain tick.
    Deferred {
        handle: DeferredEdit,
        /// Set when this deferral opened a new drain cycle that nobody is running yet.
        start_drain: bool,
    },
}

/// Handle for an edit that was queued instead of forwarded.
#[derive(Debug)]
pub struct DeferredEdit {
    pub id: EditId,
    pub resource: ChannelId,
    /// Number of edits queued ahead of this one at the time it was deferred.
    pub position: usize,
    receiver: oneshot::Receiver<DeferredOutcome>,
}

impl DeferredEdit {
    pub(crate) fn new(
        id: EditId,
        resource: ChannelId,
        position: usize,
        receiver: oneshot::Receiver<DeferredOutcome>,
    ) -> Self {
        Self {
            id,
            resource,
            position,
            receiver,
        }
    }

    /// Waits until a drain tick forwards the edit and returns the transport response.
    pub async fn wait(self) -> Result<Value, SchedulerError> {
        match self.receiver.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(SchedulerError::Forward(err)),
            Err(_) => Err(SchedulerError::Abandoned(self.id)),
        }
    }

    /// Non-blocking probe; `None` while still queued.
    pub fn try_result(&mut self) -> Option<Result<Value, SchedulerError>> {
        match self.receiver.try_recv() {
            Ok(Ok(value)) => Some(Ok(value)),
            Ok(Err(err)) => Some(Err(SchedulerError::Forward(err))),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(SchedulerError::Abandoned(self.id)))
            }
        }
    }
}

/// Queued request released by a drain tick, together with the completion for its caller.
#[derive(Debug)]
pub struct ReleasedEdit {
    pub request: MutationRequest,
    pub completion: oneshot::Sender<DeferredOutcome>,
}

/// Result of one drain pass.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Released requests, FIFO within each resource.
    pub released: Vec<ReleasedEdit>,
    /// Resources whose record was removed during this pass.
    pub closed: Vec<ChannelId>,
    /// Records still present after the pass.
    pub remaining: usize,
    /// True when the mapping ended up empty and the drain cycle was stopped.
    pub idle: bool,
}

/// Observable state of a resource's window.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum WindowState {
    Idle,
    Open { sent: u32 },
    Saturated { queued: usize },
}

#[derive(Clone, Debug, Serialize)]
pub struct WindowSnapshot {
    pub resource: ChannelId,
    pub state: WindowState,
    pub sent: u32,
    pub queued: usize,
    pub expires_in_ms: u64,
}

/// Scheduler-wide events, published on a broadcast channel.
#[derive(Clone, Debug)]
pub enum SchedulerEvent {
    Forwarded { resource: ChannelId, edit: EditId, sent: u32 },
    Deferred { resource: ChannelId, edit: EditId, queued: usize },
    Released { resource: ChannelId, edit: EditId },
    Delivered { resource: ChannelId, edit: EditId },
    Failed { resource: ChannelId, edit: EditId, error: ForwardError },
    Withdrawn { resource: ChannelId, edit: EditId },
    WindowClosed { resource: ChannelId },
    Drained { released: usize, remaining: usize },
    CycleStopped,
}

/// Secondary limit parameters for hot fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Edits let through per window.
    pub burst: u32,
    /// Window length, refreshed by every forwarded edit.
    pub window: Duration,
    /// Drain tick cadence.
    pub drain_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            burst: 2,
            window: Duration::from_secs(10 * 60),
            drain_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Time source for the scheduler. Admission and drain take `now` explicitly; the clock is
/// only read at the edges.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Reads tokio's clock, which follows `tokio::time::pause`/`advance` in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Starts at the tokio time of its creation.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: parking_lot::Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: parking_lot::Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}
