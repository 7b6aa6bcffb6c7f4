use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::model::{DeferredOutcome, EditId, MutationRequest, WindowState};

#[derive(Debug)]
pub(crate) struct QueuedEdit {
    pub request: MutationRequest,
    pub completion: oneshot::Sender<DeferredOutcome>,
    /// Held edits stay at their queue position but block release until unheld.
    pub held: bool,
}

/// Pending-mutation record of one resource: how many hot edits went out in the current
/// window, when the window closes, and what is waiting for the next drain tick.
#[derive(Debug)]
pub(crate) struct PendingWindow {
    sent: u32,
    expires_at: Instant,
    queue: VecDeque<QueuedEdit>,
}

impl PendingWindow {
    /// Record for a resource whose first hot edit goes out at `now`.
    pub fn opened(now: Instant, window: Duration) -> Self {
        Self {
            sent: 1,
            expires_at: now + window,
            queue: VecDeque::new(),
        }
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn has_backlog(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// Takes one slot of the burst and refreshes the window. Returns false when the burst
    /// is used up.
    pub fn try_take_slot(&mut self, now: Instant, burst: u32, window: Duration) -> bool {
        if self.sent >= burst {
            return false;
        }
        self.sent += 1;
        self.expires_at = now + window;
        true
    }

    /// A closed window with nothing owed starts over as if the resource were idle.
    pub fn restart(&mut self, now: Instant, window: Duration) {
        debug_assert!(self.queue.is_empty());
        self.sent = 1;
        self.expires_at = now + window;
    }

    pub fn push(&mut self, edit: QueuedEdit) -> usize {
        self.queue.push_back(edit);
        self.queue.len()
    }

    /// Drain step: the count goes back to zero and up to `burst` queued edits re-enter
    /// through the slot transition, oldest first. A held edit at the head stops the
    /// release and leaves the count untouched.
    pub fn release(&mut self, now: Instant, burst: u32, window: Duration) -> Vec<QueuedEdit> {
        if !self.head_releasable() {
            return Vec::new();
        }
        self.sent = 0;
        let mut released = Vec::new();
        while self.head_releasable() && self.try_take_slot(now, burst, window) {
            if let Some(edit) = self.queue.pop_front() {
                released.push(edit);
            }
        }
        released
    }

    fn head_releasable(&self) -> bool {
        self.queue.front().is_some_and(|edit| !edit.held)
    }

    /// Clears the hold on a queued edit. Returns false when it is no longer queued.
    pub fn unhold(&mut self, id: EditId) -> bool {
        match self.queue.iter_mut().find(|edit| edit.request.id == id) {
            Some(edit) => {
                edit.held = false;
                true
            }
            None => false,
        }
    }

    /// Takes a queued edit out of the line; the ones behind it move up.
    pub fn remove(&mut self, id: EditId) -> Option<QueuedEdit> {
        let index = self.queue.iter().position(|edit| edit.request.id == id)?;
        self.queue.remove(index)
    }

    pub fn state(&self, burst: u32) -> WindowState {
        if !self.queue.is_empty() || self.sent >= burst {
            WindowState::Saturated {
                queued: self.queue.len(),
            }
        } else {
            WindowState::Open { sent: self.sent }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MutationRequest;
    use chatgate_core_types::ChannelId;
    use serde_json::Map;

    const WINDOW: Duration = Duration::from_secs(600);

    fn queued(resource: u64) -> (QueuedEdit, oneshot::Receiver<DeferredOutcome>) {
        let (tx, rx) = oneshot::channel();
        let edit = QueuedEdit {
            request: MutationRequest::new(ChannelId(resource), Map::new(), None),
            completion: tx,
            held: false,
        };
        (edit, rx)
    }

    #[test]
    fn burst_of_two_then_full() {
        let now = Instant::now();
        let mut window = PendingWindow::opened(now, WINDOW);
        assert_eq!(window.sent(), 1);
        assert!(window.try_take_slot(now + Duration::from_secs(30), 2, WINDOW));
        assert_eq!(window.remaining(now), Duration::from_secs(630));
        assert!(!window.try_take_slot(now + Duration::from_secs(31), 2, WINDOW));
        assert_eq!(window.state(2), WindowState::Saturated { queued: 0 });
    }

    #[test]
    fn release_is_fifo_and_capped() {
        let now = Instant::now();
        let mut window = PendingWindow::opened(now, WINDOW);
        window.try_take_slot(now, 2, WINDOW);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (edit, _rx) = queued(9);
            ids.push(edit.request.id);
            window.push(edit);
        }

        let later = now + WINDOW;
        let released = window.release(later, 2, WINDOW);
        let released_ids: Vec<_> = released.iter().map(|edit| edit.request.id).collect();
        assert_eq!(released_ids, ids[..2].to_vec());
        assert_eq!(window.queued(), 1);
        assert_eq!(window.sent(), 2);
        assert!(!window.is_expired(later));
    }

    #[test]
    fn release_single_item_leaves_slot() {
        let now = Instant::now();
        let mut window = PendingWindow::opened(now, WINDOW);
        let (edit, _rx) = queued(1);
        window.push(edit);
        let released = window.release(now + WINDOW, 2, WINDOW);
        assert_eq!(released.len(), 1);
        assert!(!window.has_backlog());
        assert_eq!(window.state(2), WindowState::Open { sent: 1 });
    }

    #[test]
    fn held_head_blocks_release_until_unheld() {
        let now = Instant::now();
        let mut window = PendingWindow::opened(now, WINDOW);
        window.try_take_slot(now, 2, WINDOW);
        let (mut first, _rx1) = queued(3);
        first.held = true;
        let first_id = first.request.id;
        window.push(first);
        let (second, _rx2) = queued(3);
        window.push(second);

        assert!(window.release(now + WINDOW, 2, WINDOW).is_empty());
        assert_eq!(window.sent(), 2);
        assert_eq!(window.queued(), 2);

        assert!(window.unhold(first_id));
        let released = window.release(now + WINDOW, 2, WINDOW);
        assert_eq!(released.len(), 2);
        assert_eq!(released[0].request.id, first_id);
    }

    #[test]
    fn removed_edit_leaves_the_rest_in_order() {
        let now = Instant::now();
        let mut window = PendingWindow::opened(now, WINDOW);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (edit, _rx) = queued(5);
            ids.push(edit.request.id);
            window.push(edit);
        }
        assert!(window.remove(ids[1]).is_some());
        assert!(window.remove(ids[1]).is_none());
        assert!(!window.unhold(ids[1]));

        let released = window.release(now + WINDOW, 2, WINDOW);
        let released_ids: Vec<_> = released.iter().map(|edit| edit.request.id).collect();
        assert_eq!(released_ids, vec![ids[0], ids[2]]);
    }
}
