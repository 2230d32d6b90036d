//! Workload scenarios shared by the scenario benchmarks.
//!
//! # Scenarios
//!
//! - **Producers**: many threads feeding one worker on a live event loop
//! - **Listener churn**: bindings whose listeners are added and removed at
//!   random between fires, driven by a seeded RNG so runs are reproducible

pub mod listener_churn;
pub mod producers;

pub use listener_churn::{ChurnConfig, ListenerChurnScenario};
pub use producers::{ProducerConfig, ProducerScenario};

/// Common shape of a benchmark scenario.
pub trait Scenario {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Operations performed by one call to [`run`](Self::run), for throughput.
    fn operation_count(&self) -> usize;

    fn setup(&mut self);

    /// One measured iteration.
    fn run(&mut self);

    fn teardown(&mut self);
}
