//! Thread-confinement plumbing for a single-consumer UI thread.
//!
//! Two independent pieces live here:
//!
//! - [`schedule`]: a lock-free, many-producer queue per [`Worker`] that hands
//!   work to one consumer thread, in order, with delayed and periodic
//!   variants and an [`EventLoop`] to host the consumer.
//! - [`listener`]: a compact [`ListenerHub`] that stores invalidation and
//!   change listeners for one observable value and tolerates listeners that
//!   reshape the hub while it is notifying them.
//!
//! Panics escaping user callbacks never unwind through either piece; they are
//! reported to an [`ErrorSink`], which by default logs them through the `log`
//! facade.

pub mod error;
pub mod listener;
pub mod logging;
pub mod schedule;
pub mod sink;

pub use error::{BridgeError, Result};
pub use listener::{ChangeListener, InvalidationListener, ListenerHub, ValueBinding, ValueSource};
pub use schedule::{
    Disposable, EventLoop, EventLoopConfig, ExecutionContext, LoopHandle, PeriodicAction, ScheduledAction, Scheduler,
    TaskFuture, TimeUnit, Timer, Worker,
};
pub use sink::{ErrorSink, LogErrorSink};
