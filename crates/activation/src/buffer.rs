//! Micro-batch accumulator for incoming-data notifications.
//!
//! Producers continuously record (label, subject, timestamp) events; once
//! per interval the scheduler takes the whole accumulated batch in one
//! atomic swap. This trades per-event dispatch for interval-bounded
//! batching — the micro-batching principle.

use std::collections::HashMap;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use vigil_core::{EventNotifier, Evidence, RawData, Subject};

/// label → subject → latest-seen timestamp for the current interval.
pub type PendingEvents<S> = HashMap<String, HashMap<S, i64>>;

/// Concurrency-safe event accumulator.
///
/// Holds at most one timestamp per (label, subject) at any instant; a later
/// notification replaces it only if strictly greater, so the visible value
/// is the monotonic max regardless of arrival order. One mutex guards both
/// the per-entry updates and the drain swap, making them linearizable.
pub struct EventBuffer<S: Subject> {
    events: Mutex<PendingEvents<S>>,
}

impl<S: Subject> EventBuffer<S> {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Record that data labeled `label` was seen for `subject` at `time`.
    pub fn notify(&self, label: &str, subject: &S, time: i64) {
        let mut events = self.lock();
        let entry = events
            .entry(label.to_string())
            .or_default()
            .entry(subject.clone())
            .or_insert(time);
        if *entry < time {
            *entry = time;
        }
    }

    /// Atomically swap the accumulated events for an empty buffer and
    /// return the previous batch as a frozen snapshot.
    ///
    /// Notifications arriving during or after the swap land in the new
    /// buffer — never lost, never double-counted.
    pub fn drain(&self) -> PendingEvents<S> {
        mem::take(&mut *self.lock())
    }

    /// Number of pending (label, subject) pairs.
    pub fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, PendingEvents<S>> {
        // A poisoned lock only means some producer panicked mid-insert; the
        // map itself is still consistent.
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Subject> Default for EventBuffer<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Subject> EventNotifier<S> for EventBuffer<S> {
    fn notify_raw_data(&self, data: &RawData<S>) {
        self.notify(&data.label, &data.subject, data.time);
    }

    fn notify_evidence(&self, evidence: &Evidence<S>) {
        self.notify(&evidence.label, &evidence.subject, evidence.time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vigil_core::Link;

    fn link(n: usize) -> Link {
        Link::new(format!("client-{n}"), "server")
    }

    #[test]
    fn keeps_one_timestamp_per_pair() {
        let buffer: EventBuffer<Link> = EventBuffer::new();
        buffer.notify("data", &link(0), 10);
        buffer.notify("data", &link(0), 30);
        buffer.notify("data", &link(0), 20);

        let snapshot = buffer.drain();
        assert_eq!(snapshot["data"].len(), 1);
        assert_eq!(snapshot["data"][&link(0)], 30);
    }

    #[test]
    fn max_is_order_independent() {
        let forward: EventBuffer<Link> = EventBuffer::new();
        let backward: EventBuffer<Link> = EventBuffer::new();
        for t in [1, 2, 3] {
            forward.notify("data", &link(0), t);
        }
        for t in [3, 2, 1] {
            backward.notify("data", &link(0), t);
        }
        assert_eq!(forward.drain()["data"][&link(0)], 3);
        assert_eq!(backward.drain()["data"][&link(0)], 3);
    }

    #[test]
    fn distinct_pairs_are_independent() {
        let buffer: EventBuffer<Link> = EventBuffer::new();
        buffer.notify("data.http", &link(0), 1);
        buffer.notify("data.http", &link(1), 2);
        buffer.notify("data.dns", &link(0), 3);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn drain_resets_the_buffer() {
        let buffer: EventBuffer<Link> = EventBuffer::new();
        buffer.notify("data", &link(0), 1);
        let snapshot = buffer.drain();
        assert_eq!(snapshot.len(), 1);
        assert!(buffer.is_empty());

        // Later notifications land in the fresh buffer.
        buffer.notify("data", &link(1), 2);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn concurrent_notify_visible_max() {
        let buffer: Arc<EventBuffer<Link>> = Arc::new(EventBuffer::new());
        let subject = link(0);

        let handles: Vec<_> = (1..=32)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                let subject = subject.clone();
                std::thread::spawn(move || buffer.notify("data", &subject, t))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.drain()["data"][&subject], 32);
    }

    #[test]
    fn notifier_impl_feeds_the_buffer() {
        let buffer: EventBuffer<Link> = EventBuffer::new();
        buffer.notify_raw_data(&RawData::new("data.http", link(0), 5, "GET /"));
        buffer.notify_evidence(&Evidence::new("detection.scan", link(0), 7, 0.9));

        let snapshot = buffer.drain();
        assert_eq!(snapshot["data.http"][&link(0)], 5);
        assert_eq!(snapshot["detection.scan"][&link(0)], 7);
    }
}
