//! Rolling-window request latency.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Gauge carrying the rolling average, refreshed by the sweeper.
pub const ROLLING_AVERAGE_GAUGE: &str = "http_request_duration_rolling_avg_seconds";

/// Snapshot of the samples inside the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSummary {
    pub average: f64,
    pub samples: usize,
}

/// Mean request duration over a trailing time window.
///
/// Samples older than the window are ignored by [`average`](Self::average)
/// and removed by [`sweep`](Self::sweep); neither depends on the other
/// having run.
#[derive(Debug)]
pub struct LatencyAggregator {
    window: Duration,
    samples: Mutex<VecDeque<(Instant, f64)>>,
}

impl LatencyAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records a request that took `duration_seconds`, observed now.
    pub fn record(&self, duration_seconds: f64) {
        self.record_at(Instant::now(), duration_seconds);
    }

    pub fn record_at(&self, observed_at: Instant, duration_seconds: f64) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((observed_at, duration_seconds));
    }

    /// Mean duration of samples inside the window, or 0 when there are none.
    pub fn average(&self) -> f64 {
        self.average_at(Instant::now())
    }

    pub fn average_at(&self, now: Instant) -> f64 {
        self.summary_at(now).average
    }

    /// Average and sample count over the same in-window samples.
    pub fn summary(&self) -> WindowSummary {
        self.summary_at(Instant::now())
    }

    pub fn summary_at(&self, now: Instant) -> WindowSummary {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let (sum, count) = samples
            .iter()
            .filter(|(observed_at, _)| self.in_window(*observed_at, now))
            .fold((0.0, 0usize), |(sum, count), (_, d)| (sum + d, count + 1));

        WindowSummary {
            average: if count == 0 { 0.0 } else { sum / count as f64 },
            samples: count,
        }
    }

    /// Drops samples that have left the window. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let before = samples.len();
        samples.retain(|(observed_at, _)| self.in_window(*observed_at, now));
        before - samples.len()
    }

    pub fn len(&self) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn in_window(&self, observed_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(observed_at) <= self.window
    }

    /// Sweeps every `interval` and publishes the average as a gauge, until
    /// cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = aggregator.sweep();
                        let average = aggregator.average();
                        metrics::gauge!(ROLLING_AVERAGE_GAUGE).set(average);
                        tracing::trace!(purged, average, "latency window swept");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_average_only_counts_samples_inside_window() {
        let aggregator = LatencyAggregator::new(secs(30));
        let t0 = Instant::now();

        aggregator.record_at(t0, 1.0);
        aggregator.record_at(t0 + secs(10), 2.0);
        aggregator.record_at(t0 + secs(35), 3.0);

        assert_eq!(aggregator.average_at(t0 + secs(36)), 2.5);
    }

    #[test]
    fn test_empty_window_averages_zero() {
        let aggregator = LatencyAggregator::new(secs(30));
        assert_eq!(aggregator.average(), 0.0);

        let t0 = Instant::now();
        aggregator.record_at(t0, 4.0);
        assert_eq!(aggregator.average_at(t0 + secs(31)), 0.0);
    }

    #[test]
    fn test_average_does_not_depend_on_sweep() {
        let aggregator = LatencyAggregator::new(secs(30));
        let t0 = Instant::now();
        aggregator.record_at(t0, 10.0);
        aggregator.record_at(t0 + secs(40), 1.0);

        assert_eq!(aggregator.average_at(t0 + secs(41)), 1.0);
        assert_eq!(aggregator.len(), 2);

        assert_eq!(aggregator.sweep_at(t0 + secs(41)), 1);
        assert_eq!(aggregator.len(), 1);
        assert_eq!(aggregator.average_at(t0 + secs(41)), 1.0);
    }

    #[test]
    fn test_summary_counts_only_unexpired_samples() {
        let aggregator = LatencyAggregator::new(secs(30));
        let t0 = Instant::now();
        aggregator.record_at(t0, 9.0);
        aggregator.record_at(t0 + secs(20), 1.0);
        aggregator.record_at(t0 + secs(25), 3.0);

        let summary = aggregator.summary_at(t0 + secs(40));
        assert_eq!(summary, WindowSummary { average: 2.0, samples: 2 });
        // The expired sample is still held until the next sweep.
        assert_eq!(aggregator.len(), 3);

        let later = aggregator.summary_at(t0 + secs(60));
        assert_eq!(later, WindowSummary { average: 0.0, samples: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_and_stops_on_shutdown() {
        let aggregator = Arc::new(LatencyAggregator::new(secs(30)));
        aggregator.record(0.5);
        let shutdown = CancellationToken::new();
        let handle = aggregator.spawn_sweeper(secs(5), shutdown.clone());

        tokio::time::sleep(secs(20)).await;
        assert_eq!(aggregator.len(), 1);

        tokio::time::sleep(secs(16)).await;
        assert!(aggregator.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
