//! Many producer threads feeding one worker.
//!
//! Every producer schedules `actions_per_producer` small actions onto the same
//! worker while the loop thread drains. This stresses the lock-free enqueue
//! path and the single wake-up per empty-to-non-empty transition.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use uibridge::{EventLoop, EventLoopConfig, Worker};

use crate::scenarios::Scenario;

pub struct ProducerConfig {
    pub producer_count: usize,
    pub actions_per_producer: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            producer_count: 4,
            actions_per_producer: 10_000,
        }
    }
}

pub struct ProducerScenario {
    config: ProducerConfig,
    event_loop: Option<EventLoop>,
    worker: Option<Worker>,
    executed: Arc<AtomicUsize>,
}

impl ProducerScenario {
    pub fn new() -> Self {
        Self::with_config(ProducerConfig::default())
    }

    pub fn with_config(config: ProducerConfig) -> Self {
        Self {
            config,
            event_loop: None,
            worker: None,
            executed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Actions that have run on the loop thread since setup.
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Acquire)
    }
}

impl Default for ProducerScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for ProducerScenario {
    fn name(&self) -> &'static str {
        "producers"
    }

    fn description(&self) -> &'static str {
        "N producer threads scheduling onto one worker of a live event loop"
    }

    fn operation_count(&self) -> usize {
        self.config.producer_count * self.config.actions_per_producer
    }

    /// # Panics
    ///
    /// If the loop thread cannot be spawned.
    fn setup(&mut self) {
        let event_loop = match EventLoop::spawn(EventLoopConfig::default().with_name("bench-producers")) {
            Ok(event_loop) => event_loop,
            Err(e) => panic!("benchmark loop unavailable: {e}"),
        };
        self.worker = Some(event_loop.scheduler().create_worker());
        self.event_loop = Some(event_loop);
        self.executed.store(0, Ordering::Release);
    }

    fn run(&mut self) {
        let (Some(event_loop), Some(worker)) = (&self.event_loop, &self.worker) else {
            return;
        };
        let per_producer = self.config.actions_per_producer;

        thread::scope(|scope| {
            for _ in 0..self.config.producer_count {
                scope.spawn(|| {
                    for _ in 0..per_producer {
                        let executed = Arc::clone(&self.executed);
                        worker.schedule(move || {
                            executed.fetch_add(1, Ordering::Release);
                        });
                    }
                });
            }
        });

        // Anything posted now runs after the drain the producers triggered.
        let _ = event_loop.handle().run_and_wait(|| ());
    }

    fn teardown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.dispose();
        }
        self.event_loop.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_scheduled_action_runs() {
        let mut scenario = ProducerScenario::with_config(ProducerConfig {
            producer_count: 3,
            actions_per_producer: 500,
        });
        scenario.setup();

        scenario.run();
        assert_eq!(scenario.executed(), 1_500);

        scenario.run();
        assert_eq!(scenario.executed(), 3_000);

        scenario.teardown();
    }

    #[test]
    fn run_before_setup_does_nothing() {
        let mut scenario = ProducerScenario::new();

        scenario.run();

        assert_eq!(scenario.executed(), 0);
        assert_eq!(scenario.operation_count(), 40_000);
    }
}
