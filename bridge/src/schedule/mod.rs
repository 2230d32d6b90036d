//! Single-consumer task scheduling.
//!
//! Any number of producer threads submit actions through a [`Worker`]; every
//! action then runs, in submission order, on the one consumer thread owned by
//! an [`ExecutionContext`]. Delayed actions go through a one-shot [`Timer`]
//! that fires on that same thread.
//!
//! # Overview
//!
//! - [`Scheduler`] is the factory: it holds the execution context, the timer
//!   and the error sink, and hands out independent [`Worker`]s.
//! - [`Worker`] owns a lock-free singly linked queue. The producer that moves
//!   the queue from empty to non-empty posts exactly one drain callback to the
//!   consumer thread (or drains in place when it already is that thread).
//! - [`EventLoop`] is a ready-made consumer thread implementing both
//!   collaborator traits.
//!
//! # Example
//!
//! ```rust,ignore
//! let event_loop = EventLoop::spawn(EventLoopConfig::default())?;
//! let scheduler = Scheduler::new(event_loop.handle());
//! let worker = scheduler.create_worker();
//!
//! worker.schedule(|| println!("on the loop thread"));
//! worker.schedule_with_delay(|| println!("a bit later"), 250, TimeUnit::Milliseconds)?;
//! ```

pub mod event_loop;
pub(crate) mod node;
pub mod scheduler;
pub mod worker;

use std::time::Duration;

use crate::error::{BridgeError, Result};

pub use event_loop::{EventLoop, EventLoopConfig, LoopHandle, TaskFuture};
pub use scheduler::Scheduler;
pub use worker::{PeriodicAction, ScheduledAction, Worker};

/// A unit of work handed to the consumer thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Largest delay a timer accepts unless it says otherwise.
pub const DEFAULT_MAX_TIMER_DELAY: Duration = Duration::from_millis(i32::MAX as u64);

/// A handle that can cancel whatever it was returned for.
pub trait Disposable: Send + Sync {
    /// Cancel. Idempotent.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// The consumer thread's dispatcher, e.g. a UI toolkit's main loop.
pub trait ExecutionContext: Send + Sync {
    /// Is the calling thread the designated consumer thread?
    fn is_consumer_thread(&self) -> bool;

    /// Run `task` later, exactly once, on the consumer thread.
    fn post(&self, task: Task);
}

/// A one-shot timer whose callbacks run on the consumer thread.
pub trait Timer: Send + Sync {
    /// Invoke `callback` once after `delay`. Disposing the returned handle
    /// before it fires prevents the callback from running.
    fn start(&self, delay: Duration, callback: Task) -> Box<dyn Disposable>;

    /// Longest delay this timer can represent.
    fn max_delay(&self) -> Duration {
        DEFAULT_MAX_TIMER_DELAY
    }
}

/// Unit for a signed delay, as accepted by the delayed scheduling operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Convert `amount` of this unit to milliseconds, truncating toward zero
    /// and saturating on overflow.
    pub fn to_millis(self, amount: i64) -> i64 {
        match self {
            TimeUnit::Nanoseconds => amount / 1_000_000,
            TimeUnit::Microseconds => amount / 1_000,
            TimeUnit::Milliseconds => amount,
            TimeUnit::Seconds => amount.saturating_mul(1_000),
            TimeUnit::Minutes => amount.saturating_mul(60_000),
            TimeUnit::Hours => amount.saturating_mul(3_600_000),
            TimeUnit::Days => amount.saturating_mul(86_400_000),
        }
    }
}

/// Check a delay against the timer's range and convert it to a [`Duration`]
/// with millisecond resolution.
pub(crate) fn validate_delay(delay: i64, unit: TimeUnit, max: Duration) -> Result<Duration> {
    let max_millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    let invalid = || BridgeError::InvalidDelay {
        delay,
        unit,
        max_millis,
    };

    if delay < 0 {
        return Err(invalid());
    }
    let millis = u64::try_from(unit.to_millis(delay)).map_err(|_| invalid())?;
    if millis > max_millis {
        return Err(invalid());
    }
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== TimeUnit ====================

    #[test]
    fn to_millis_truncates_sub_millisecond_units() {
        assert_eq!(TimeUnit::Nanoseconds.to_millis(1_999_999), 1);
        assert_eq!(TimeUnit::Microseconds.to_millis(999), 0);
    }

    #[test]
    fn to_millis_scales_coarse_units() {
        assert_eq!(TimeUnit::Seconds.to_millis(2), 2_000);
        assert_eq!(TimeUnit::Minutes.to_millis(1), 60_000);
        assert_eq!(TimeUnit::Hours.to_millis(1), 3_600_000);
        assert_eq!(TimeUnit::Days.to_millis(1), 86_400_000);
    }

    #[test]
    fn to_millis_saturates() {
        assert_eq!(TimeUnit::Days.to_millis(i64::MAX), i64::MAX);
    }

    // ==================== Delay validation ====================

    #[test]
    fn negative_delay_is_rejected() {
        let err = validate_delay(-1, TimeUnit::Milliseconds, DEFAULT_MAX_TIMER_DELAY).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidDelay { delay: -1, .. }));
    }

    #[test]
    fn negative_nanoseconds_are_rejected_before_truncation() {
        assert!(validate_delay(-1, TimeUnit::Nanoseconds, DEFAULT_MAX_TIMER_DELAY).is_err());
    }

    #[test]
    fn delay_past_timer_range_is_rejected() {
        let max = i32::MAX as i64;
        assert!(validate_delay(max, TimeUnit::Milliseconds, DEFAULT_MAX_TIMER_DELAY).is_ok());

        let err = validate_delay(max + 1, TimeUnit::Milliseconds, DEFAULT_MAX_TIMER_DELAY).unwrap_err();
        assert_eq!(
            err,
            BridgeError::InvalidDelay {
                delay: max + 1,
                unit: TimeUnit::Milliseconds,
                max_millis: i32::MAX as u64,
            }
        );
    }

    #[test]
    fn valid_delay_converts_to_duration() {
        let d = validate_delay(3, TimeUnit::Seconds, DEFAULT_MAX_TIMER_DELAY).unwrap();
        assert_eq!(d, Duration::from_secs(3));
    }

    #[test]
    fn custom_timer_range_is_honored() {
        let max = Duration::from_millis(100);
        assert!(validate_delay(100, TimeUnit::Milliseconds, max).is_ok());
        assert!(validate_delay(101, TimeUnit::Milliseconds, max).is_err());
    }
}
