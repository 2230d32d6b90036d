//! Dispatch latency: how long work handed to the loop waits before it runs.
//!
//! Throughput numbers from criterion hide the tail; these helpers keep every
//! sample so percentiles can be reported alongside.

use std::time::{Duration, Instant};

use uibridge::{BridgeError, LoopHandle, Worker};

/// Summary of a set of latency samples.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub samples: usize,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
    sorted: Vec<Duration>,
}

impl LatencyStats {
    pub fn from_samples(samples: Vec<Duration>) -> Self {
        let count = samples.len();
        let total: Duration = samples.iter().sum();
        let min = samples.iter().min().copied().unwrap_or(Duration::ZERO);
        let max = samples.iter().max().copied().unwrap_or(Duration::ZERO);

        let mut sorted = samples;
        sorted.sort();

        Self {
            samples: count,
            total,
            min,
            max,
            sorted,
        }
    }

    pub fn average(&self) -> Duration {
        if self.samples == 0 {
            Duration::ZERO
        } else {
            self.total / self.samples as u32
        }
    }

    pub fn median(&self) -> Duration {
        self.percentile(50)
    }

    /// `p` is clamped to 0..=100.
    pub fn percentile(&self, p: usize) -> Duration {
        if self.sorted.is_empty() {
            return Duration::ZERO;
        }
        let p = p.min(100);
        let index = (self.sorted.len() * p / 100).min(self.sorted.len() - 1);
        self.sorted[index]
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99)
    }
}

impl std::fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} samples, avg: {:.1}us, p50: {:.1}us, p99: {:.1}us, max: {:.1}us",
            self.samples,
            self.average().as_secs_f64() * 1e6,
            self.median().as_secs_f64() * 1e6,
            self.p99().as_secs_f64() * 1e6,
            self.max.as_secs_f64() * 1e6,
        )
    }
}

/// Round trips through the loop: post a closure, block until it has run.
pub fn measure_round_trips(handle: &LoopHandle, samples: usize) -> Result<LatencyStats, BridgeError> {
    let mut times = Vec::with_capacity(samples);
    for _ in 0..samples {
        let start = Instant::now();
        handle.run_and_wait(|| ())?;
        times.push(start.elapsed());
    }
    Ok(LatencyStats::from_samples(times))
}

/// Time from `Worker::schedule` on this thread until the action starts on
/// the consumer thread. The caller must not be the consumer thread.
pub fn measure_schedule_latency(
    worker: &Worker,
    handle: &LoopHandle,
    samples: usize,
) -> Result<LatencyStats, BridgeError> {
    let mut times = Vec::with_capacity(samples);
    for _ in 0..samples {
        let start = Instant::now();
        let (tx, rx) = crossbeam::channel::bounded(1);
        worker.schedule(move || {
            let _ = tx.send(start.elapsed());
        });
        // The action ran once the loop has processed anything posted after it.
        handle.run_and_wait(|| ())?;
        times.push(rx.recv().map_err(|_| BridgeError::LoopClosed)?);
    }
    Ok(LatencyStats::from_samples(times))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uibridge::{EventLoop, EventLoopConfig};

    #[test]
    fn latency_stats_calculations() {
        let times = vec![
            Duration::from_micros(10),
            Duration::from_micros(12),
            Duration::from_micros(11),
            Duration::from_micros(15),
            Duration::from_micros(10),
        ];
        let stats = LatencyStats::from_samples(times);

        assert_eq!(stats.samples, 5);
        assert_eq!(stats.min, Duration::from_micros(10));
        assert_eq!(stats.max, Duration::from_micros(15));
        assert_eq!(stats.median(), Duration::from_micros(11));
        assert_eq!(stats.p99(), Duration::from_micros(15));
    }

    #[test]
    fn empty_stats_are_zero() {
        let stats = LatencyStats::from_samples(Vec::new());

        assert_eq!(stats.average(), Duration::ZERO);
        assert_eq!(stats.percentile(90), Duration::ZERO);
    }

    #[test]
    fn round_trips_and_schedule_latency_on_a_live_loop() {
        let event_loop = EventLoop::spawn(EventLoopConfig::default().with_name("latency-test")).unwrap();
        let handle = event_loop.handle();
        let worker = event_loop.scheduler().create_worker();

        let trips = measure_round_trips(&handle, 10).unwrap();
        let scheduled = measure_schedule_latency(&worker, &handle, 10).unwrap();

        assert_eq!(trips.samples, 10);
        assert_eq!(scheduled.samples, 10);
        assert!(scheduled.max >= scheduled.min);
    }
}
