use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    forwarded: AtomicU64,
    deferred: AtomicU64,
    released: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    windows_closed: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_forwarded() {
    increment(&COUNTERS.forwarded);
}

pub fn record_deferred() {
    increment(&COUNTERS.deferred);
}

pub fn record_released() {
    increment(&COUNTERS.released);
}

pub fn record_delivered() {
    increment(&COUNTERS.delivered);
}

pub fn record_failed() {
    increment(&COUNTERS.failed);
}

pub fn record_window_closed() {
    increment(&COUNTERS.windows_closed);
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SchedulerMetricsSnapshot {
    pub forwarded: u64,
    pub deferred: u64,
    pub released: u64,
    pub delivered: u64,
    pub failed: u64,
    pub windows_closed: u64,
}

pub fn snapshot() -> SchedulerMetricsSnapshot {
    SchedulerMetricsSnapshot {
        forwarded: COUNTERS.forwarded.load(Ordering::Relaxed),
        deferred: COUNTERS.deferred.load(Ordering::Relaxed),
        released: COUNTERS.released.load(Ordering::Relaxed),
        delivered: COUNTERS.delivered.load(Ordering::Relaxed),
        failed: COUNTERS.failed.load(Ordering::Relaxed),
        windows_closed: COUNTERS.windows_closed.load(Ordering::Relaxed),
    }
}
