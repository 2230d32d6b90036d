//! Benchmark utilities for uibridge.
//!
//! This crate provides the benchmarking infrastructure for the scheduler and
//! the listener hub:
//!
//! - **Microbenchmarks**: single operations in isolation (schedule, fire, add/remove)
//! - **Scenario benchmarks**: many producers against one loop, seeded listener churn
//! - **Memory tracking**: Heap allocation profiling via dhat
//! - **Dispatch latency**: time from handing work to the loop until it runs
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p uibridge_bench
//!
//! # Run specific benchmark group
//! cargo bench -p uibridge_bench -- fire
//!
//! # Run with memory profiling (slower)
//! cargo bench -p uibridge_bench --features memory_profiling
//! ```
//!
//! # Benchmark Results
//!
//! Results are written to `target/criterion/` with HTML reports for visualization.
//! Memory profiling results are written to `dhat-heap.json` for viewing with
//! DHAT's viewer.

pub mod latency;
pub mod memory;
pub mod scenarios;
