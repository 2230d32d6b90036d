//! Heap accounting for listener storage and queued actions, using dhat.
//!
//! Profiling is compiled in only with the `memory_profiling` feature; without
//! it every measurement reports zeros and costs nothing:
//!
//! ```bash
//! cargo bench -p uibridge_bench --features memory_profiling
//! ```
//!
//! Load the generated `dhat-heap.json` into
//! <https://nnethercote.github.io/dh_view/dh_view.html> for the full profile.

use std::rc::Rc;

use uibridge::{ChangeListener, InvalidationListener, ValueBinding};

/// Allocation totals for one measurement.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub bytes_allocated: u64,
    pub allocation_count: u64,
    pub peak_bytes: u64,
}

impl MemoryStats {
    /// Bytes allocated per listener (or per action, or per whatever `count`
    /// counts).
    pub fn bytes_per(&self, count: usize) -> f64 {
        if count == 0 {
            0.0
        } else {
            self.bytes_allocated as f64 / count as f64
        }
    }

    pub fn allocations_per(&self, count: usize) -> f64 {
        if count == 0 {
            0.0
        } else {
            self.allocation_count as f64 / count as f64
        }
    }
}

impl std::fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "allocated: {} bytes ({} allocs), peak: {} bytes",
            self.bytes_allocated, self.allocation_count, self.peak_bytes
        )
    }
}

/// Captures heap statistics between `start` and `finish`.
///
/// Only one profiler can be active at a time.
#[cfg(feature = "memory_profiling")]
pub struct MemoryProfiler {
    _profiler: dhat::Profiler,
}

#[cfg(feature = "memory_profiling")]
impl MemoryProfiler {
    pub fn start() -> Self {
        Self {
            _profiler: dhat::Profiler::new_heap(),
        }
    }

    /// Also writes the detailed profile to `dhat-heap.json` when dropped.
    pub fn finish(self) -> MemoryStats {
        let stats = dhat::HeapStats::get();
        MemoryStats {
            bytes_allocated: stats.total_bytes,
            allocation_count: stats.total_blocks,
            peak_bytes: stats.max_bytes as u64,
        }
    }
}

#[cfg(not(feature = "memory_profiling"))]
pub struct MemoryProfiler;

#[cfg(not(feature = "memory_profiling"))]
impl MemoryProfiler {
    pub fn start() -> Self {
        Self
    }

    pub fn finish(self) -> MemoryStats {
        MemoryStats::default()
    }
}

/// Run `f` under the profiler.
pub fn measure_memory<F, R>(f: F) -> (R, MemoryStats)
where
    F: FnOnce() -> R,
{
    let profiler = MemoryProfiler::start();
    let result = f();
    let stats = profiler.finish();
    (result, stats)
}

/// Build a binding carrying `invalidation` invalidation listeners and
/// `change` change listeners, and report what it cost.
///
/// Small listener counts are the interesting case: zero and one listener
/// should not allocate any list at all.
pub fn measure_binding_footprint(invalidation: usize, change: usize) -> (ValueBinding<u64>, MemoryStats) {
    measure_memory(|| {
        let binding = ValueBinding::new(0u64);
        for _ in 0..invalidation {
            let listener: InvalidationListener = Rc::new(|| {});
            binding.add_invalidation_listener(listener);
        }
        for _ in 0..change {
            let listener: ChangeListener<u64> = Rc::new(|_: &u64, _: &u64| {});
            binding.add_change_listener(listener);
        }
        binding
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stats_display() {
        let stats = MemoryStats {
            bytes_allocated: 1024,
            allocation_count: 10,
            peak_bytes: 512,
        };
        let display = format!("{}", stats);
        assert!(display.contains("1024 bytes"));
        assert!(display.contains("10 allocs"));
        assert!(display.contains("peak: 512"));
    }

    #[test]
    fn per_item_ratios() {
        let stats = MemoryStats {
            bytes_allocated: 6400,
            allocation_count: 64,
            peak_bytes: 5000,
        };
        assert!((stats.bytes_per(64) - 100.0).abs() < f64::EPSILON);
        assert!((stats.allocations_per(64) - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.bytes_per(0), 0.0);
    }

    #[test]
    fn footprint_binding_holds_the_requested_listeners() {
        let (binding, _) = measure_binding_footprint(3, 2);

        assert_eq!(binding.hub().invalidation_len(), 3);
        assert_eq!(binding.hub().change_len(), 2);
        assert_eq!(binding.hub().cached_value(), Some(0));
    }
}
