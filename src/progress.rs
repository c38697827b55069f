//! Periodic throughput reporting for a running download
//!
//! The copy loop bumps an atomic counter; a separate task samples it on a
//! fixed interval and prints a progress line. The two share nothing else.

use crate::logging::Logger;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const REPORT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    /// Absolute position including the resume offset
    pub current: u64,
    pub percent: u64,
    pub bytes_per_sec: u64,
}

impl ProgressSample {
    pub fn compute(total: u64, current: u64, previous: u64, elapsed: Duration) -> Self {
        let delta = current.saturating_sub(previous);
        let speed = delta as f64 / (elapsed.as_secs_f64() + 1e-6);
        Self {
            current,
            percent: current.saturating_mul(100) / total.saturating_add(1),
            bytes_per_sec: speed as u64,
        }
    }
}

pub struct ProgressReporter {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<u64>,
}

impl ProgressReporter {
    pub fn start(
        name: &str,
        total: u64,
        start_offset: u64,
        counter: Arc<AtomicU64>,
        output: Logger,
        cancel: CancellationToken,
    ) -> Self {
        Self::start_with_interval(name, total, start_offset, counter, output, cancel, REPORT_INTERVAL)
    }

    pub fn start_with_interval(
        name: &str,
        total: u64,
        start_offset: u64,
        counter: Arc<AtomicU64>,
        output: Logger,
        cancel: CancellationToken,
        period: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_bytes = start_offset;
            let mut last_time = Instant::now();
            let mut reports = 0u64;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let current = start_offset + counter.load(Ordering::Relaxed);
                        let sample = ProgressSample::compute(total, current, last_bytes, last_time.elapsed());
                        output.progress(&format!(
                            "Downloading {}: {:02}%, {}",
                            name,
                            sample.percent,
                            output.format_speed(sample.bytes_per_sec)
                        ));
                        last_bytes = current;
                        last_time = Instant::now();
                        reports += 1;
                    }
                }
            }
            reports
        });

        Self {
            stop: Some(stop_tx),
            handle,
        }
    }

    /// Signal the reporter and wait for it; returns how many lines it printed
    pub async fn stop(mut self) -> u64 {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.handle).await.unwrap_or(0)
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_percent_and_speed() {
        let sample = ProgressSample::compute(100, 40, 0, Duration::from_secs(10));
        assert_eq!(sample.percent, 39);
        assert_eq!(sample.bytes_per_sec, 3);

        let unknown_total = ProgressSample::compute(0, 0, 0, Duration::ZERO);
        assert_eq!(unknown_total.percent, 0);
        assert_eq!(unknown_total.bytes_per_sec, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_on_interval_until_stopped() {
        let counter = Arc::new(AtomicU64::new(0));
        let reporter = ProgressReporter::start(
            "win.iso",
            1000,
            100,
            counter.clone(),
            Logger::new_quiet(),
            CancellationToken::new(),
        );

        counter.fetch_add(50, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(reporter.stop().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_reporter() {
        let cancel = CancellationToken::new();
        let reporter = ProgressReporter::start(
            "win.iso",
            1000,
            0,
            Arc::new(AtomicU64::new(0)),
            Logger::new_quiet(),
            cancel.clone(),
        );
        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(reporter.stop().await, 0);
    }
}
