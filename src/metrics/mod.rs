//! Receive outcome reporting.

pub mod cloudwatch;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Told about the outcome of every transmission.
pub trait Observer: Send + Sync {
    /// A transmission was decomposed and stored by every sink.
    fn on_receive_success(&self, elapsed: Duration);

    /// A transmission was rejected. Error details are logged separately.
    fn on_receive_error(&self);
}

/// Point-in-time copy of [`ReceiveStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub failed: u64,
    pub total_latency_ms: u64,
}

impl StatsSnapshot {
    /// Mean latency of successful receives, in milliseconds.
    pub fn mean_latency_ms(&self) -> Option<u64> {
        self.total_latency_ms.checked_div(self.received)
    }
}

/// Lock-free counters of receive outcomes.
#[derive(Debug, Default)]
pub struct ReceiveStats {
    received: AtomicU64,
    failed: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl ReceiveStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
        }
    }
}

impl Observer for ReceiveStats {
    fn on_receive_success(&self, elapsed: Duration) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.total_latency_ms.fetch_add(ms, Ordering::Relaxed);
    }

    fn on_receive_error(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counts outcomes and logs each one with the running totals.
#[derive(Debug, Default)]
pub struct TracingObserver {
    stats: ReceiveStats,
}

impl Observer for TracingObserver {
    fn on_receive_success(&self, elapsed: Duration) {
        self.stats.on_receive_success(elapsed);
        let totals = self.stats.snapshot();
        tracing::info!(
            target: "inbound::metrics",
            latency_ms = elapsed.as_millis() as u64,
            mean_latency_ms = totals.mean_latency_ms().unwrap_or_default(),
            received = totals.received,
            failed = totals.failed,
            "Receive success"
        );
    }

    fn on_receive_error(&self) {
        self.stats.on_receive_error();
        let totals = self.stats.snapshot();
        tracing::warn!(
            target: "inbound::metrics",
            received = totals.received,
            failed = totals.failed,
            "Receive error"
        );
    }
}

/// Forwards every outcome to each observer in order.
#[derive(Default)]
pub struct ObserverSet {
    observers: Vec<Box<dyn Observer>>,
}

impl ObserverSet {
    pub fn new(observers: Vec<Box<dyn Observer>>) -> Self {
        Self { observers }
    }
}

impl Observer for ObserverSet {
    fn on_receive_success(&self, elapsed: Duration) {
        for observer in &self.observers {
            observer.on_receive_success(elapsed);
        }
    }

    fn on_receive_error(&self) {
        for observer in &self.observers {
            observer.on_receive_error();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counts_outcomes() {
        let stats = ReceiveStats::default();
        stats.on_receive_success(Duration::from_millis(30));
        stats.on_receive_success(Duration::from_millis(10));
        stats.on_receive_error();

        let snap = stats.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.total_latency_ms, 40);
        assert_eq!(snap.mean_latency_ms(), Some(20));
    }

    #[test]
    fn test_mean_latency_without_receives() {
        assert_eq!(StatsSnapshot::default().mean_latency_ms(), None);
    }

    #[test]
    fn test_tracing_observer_keeps_totals() {
        let observer = TracingObserver::default();
        observer.on_receive_error();
        observer.on_receive_success(Duration::from_millis(5));
        let totals = observer.stats.snapshot();
        assert_eq!(totals.received, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.mean_latency_ms(), Some(5));
    }

    struct Shared(Arc<ReceiveStats>);

    impl Observer for Shared {
        fn on_receive_success(&self, elapsed: Duration) {
            self.0.on_receive_success(elapsed);
        }

        fn on_receive_error(&self) {
            self.0.on_receive_error();
        }
    }

    #[test]
    fn test_observer_set_forwards_to_all() {
        let first = Arc::new(ReceiveStats::default());
        let second = Arc::new(ReceiveStats::default());
        let set = ObserverSet::new(vec![
            Box::new(Shared(first.clone())),
            Box::new(Shared(second.clone())),
        ]);

        set.on_receive_success(Duration::from_millis(7));
        set.on_receive_error();
        for stats in [&first, &second] {
            assert_eq!(stats.snapshot().received, 1);
            assert_eq!(stats.snapshot().failed, 1);
            assert_eq!(stats.snapshot().total_latency_ms, 7);
        }
        ObserverSet::default().on_receive_error();
    }
}
