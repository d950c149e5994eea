//! Change batching for property notifications.
//!
//! Mutations are merged by path into a pending batch. A flush happens at
//! most once per window and always sends the whole pending batch, so a
//! path changed several times inside one window is reported once with its
//! latest value.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Default batch window
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(50);

/// One flushed batch: latest value per path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeBatch<V> {
    /// Changed paths and their latest values
    pub changes: BTreeMap<String, V>,
    /// Flush sequence number, starting at 1
    pub sequence: u64,
}

/// Counters for batch activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Mutations observed
    pub changes_observed: u64,
    /// Mutations that overwrote a pending value for the same path
    pub changes_coalesced: u64,
    /// Batches sent
    pub batches_flushed: u64,
}

/// Receiving end of a subscription
pub type ChangeReceiver<V> = mpsc::UnboundedReceiver<Arc<ChangeBatch<V>>>;

/// Rate-limits change notifications to one batch per window.
#[derive(Debug)]
pub struct ChangeBatcher<V> {
    window: Duration,
    pending: BTreeMap<String, V>,
    last_flush: Instant,
    subscribers: Vec<mpsc::UnboundedSender<Arc<ChangeBatch<V>>>>,
    stats: BatchStats,
}

impl<V: Clone> ChangeBatcher<V> {
    /// Batcher with the given window; the window starts now.
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    /// Batcher whose first window starts at `start`.
    pub fn starting_at(window: Duration, start: Instant) -> Self {
        Self {
            window,
            pending: BTreeMap::new(),
            last_flush: start,
            subscribers: Vec::new(),
            stats: BatchStats::default(),
        }
    }

    /// Batch window
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Register a subscriber for future flushes.
    pub fn subscribe(&mut self) -> ChangeReceiver<V> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().filter(|s| !s.is_closed()).count()
    }

    /// Paths waiting for the next flush
    pub fn pending(&self) -> &BTreeMap<String, V> {
        &self.pending
    }

    /// Activity counters
    pub const fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Record mutations observed now. Returns whether a flush happened.
    pub fn observe<I>(&mut self, changes: I) -> bool
    where
        I: IntoIterator<Item = (String, V)>,
    {
        self.observe_at(changes, Instant::now())
    }

    /// Record mutations observed at `now`.
    ///
    /// The mutations are merged first; if the window since the last flush
    /// has elapsed, the whole pending batch is then flushed.
    ///
    /// The window is measured from the last flush, not from the first
    /// pending mutation. After an idle stretch longer than the window, the
    /// first mutation is flushed on its own straight away and anything that
    /// follows within the next window goes into the next batch.
    pub fn observe_at<I>(&mut self, changes: I, now: Instant) -> bool
    where
        I: IntoIterator<Item = (String, V)>,
    {
        for (path, value) in changes {
            self.stats.changes_observed += 1;
            if self.pending.insert(path, value).is_some() {
                self.stats.changes_coalesced += 1;
            }
        }

        self.flush_due(now)
    }

    /// Flush if something is pending and the window has elapsed.
    ///
    /// Lets a timer deliver a batch when no further mutation arrives.
    pub fn flush_due(&mut self, now: Instant) -> bool {
        if self.pending.is_empty() || now.saturating_duration_since(self.last_flush) < self.window
        {
            return false;
        }
        self.flush_at(now)
    }

    /// Flush whatever is pending, ignoring the window.
    pub fn flush(&mut self) -> bool {
        self.flush_at(Instant::now())
    }

    fn flush_at(&mut self, now: Instant) -> bool {
        if self.pending.is_empty() {
            return false;
        }

        self.stats.batches_flushed += 1;
        let batch = Arc::new(ChangeBatch {
            changes: std::mem::take(&mut self.pending),
            sequence: self.stats.batches_flushed,
        });
        self.last_flush = now;

        self.subscribers
            .retain(|subscriber| subscriber.send(Arc::clone(&batch)).is_ok());

        tracing::trace!(
            "Flushed {} changes to {} subscribers",
            batch.changes.len(),
            self.subscribers.len()
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn change(path: &str, value: i32) -> (String, i32) {
        (path.to_string(), value)
    }

    #[test]
    fn test_first_change_after_idle_flushes_alone() {
        let start = Instant::now();
        let mut batcher = ChangeBatcher::starting_at(DEFAULT_BATCH_WINDOW, start);
        let mut rx = batcher.subscribe();

        assert!(batcher.observe_at(
            [change("party.0.hp", 10)],
            start + Duration::from_millis(60)
        ));
        assert!(!batcher.observe_at(
            [change("party.0.hp", 7)],
            start + Duration::from_millis(65)
        ));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.changes, BTreeMap::from([("party.0.hp".to_string(), 10)]));
        assert!(rx.try_recv().is_err());

        assert!(!batcher.flush_due(start + Duration::from_millis(100)));
        assert!(batcher.flush_due(start + Duration::from_millis(110)));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(second.changes, BTreeMap::from([("party.0.hp".to_string(), 7)]));
    }

    #[test]
    fn test_merge_within_window() {
        let start = Instant::now();
        let mut batcher = ChangeBatcher::starting_at(DEFAULT_BATCH_WINDOW, start);
        let mut rx = batcher.subscribe();

        assert!(!batcher.observe_at([change("party.0.hp", 10)], start));
        assert!(!batcher.observe_at(
            [change("party.0.hp", 7)],
            start + Duration::from_millis(5)
        ));
        assert!(rx.try_recv().is_err());

        assert!(batcher.flush_due(start + Duration::from_millis(60)));
        let batch = rx.try_recv().unwrap();
        assert_eq!(
            batch.changes,
            BTreeMap::from([("party.0.hp".to_string(), 7)])
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(batcher.stats().changes_coalesced, 1);
    }

    #[test]
    fn test_flush_sends_whole_batch() {
        let start = Instant::now();
        let mut batcher = ChangeBatcher::starting_at(DEFAULT_BATCH_WINDOW, start);
        let mut rx = batcher.subscribe();

        batcher.observe_at([change("a", 1)], start + Duration::from_millis(10));
        let flushed =
            batcher.observe_at([change("b", 2)], start + Duration::from_millis(50));
        assert!(flushed);

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.changes.len(), 2);
        assert_eq!(batch.sequence, 1);
        assert!(batcher.pending().is_empty());
    }

    #[test]
    fn test_window_restarts_after_flush() {
        let start = Instant::now();
        let mut batcher = ChangeBatcher::starting_at(DEFAULT_BATCH_WINDOW, start);
        let mut rx = batcher.subscribe();

        let t1 = start + Duration::from_millis(50);
        assert!(batcher.observe_at([change("a", 1)], t1));
        assert!(!batcher.observe_at([change("a", 2)], t1 + Duration::from_millis(10)));
        assert!(!batcher.flush_due(t1 + Duration::from_millis(49)));
        assert!(batcher.flush_due(t1 + Duration::from_millis(50)));

        assert_eq!(rx.try_recv().unwrap().changes["a"], 1);
        assert_eq!(rx.try_recv().unwrap().changes["a"], 2);
    }

    #[test]
    fn test_every_subscriber_gets_the_batch() {
        let mut batcher = ChangeBatcher::new(DEFAULT_BATCH_WINDOW);
        let mut first = batcher.subscribe();
        let second = batcher.subscribe();
        drop(second);

        batcher.observe([change("x", 1)]);
        assert!(batcher.flush());
        assert_eq!(first.try_recv().unwrap().changes["x"], 1);
        assert_eq!(batcher.subscriber_count(), 1);
    }

    #[test]
    fn test_nothing_to_flush() {
        let mut batcher: ChangeBatcher<i32> = ChangeBatcher::new(Duration::ZERO);
        assert!(!batcher.flush());
        assert!(!batcher.flush_due(Instant::now()));
        assert_eq!(batcher.stats().batches_flushed, 0);
    }
}
