//! The lock-free single-consumer queue behind every [`Worker`].
//!
//! # Layout
//!
//! The queue always holds at least one node. `head` is the node that was run
//! last (initially an empty starter node) and is only ever advanced by the
//! consumer thread. `tail` points at the last linked node and is swapped to
//! null when the worker is disposed, so "tail is null" doubles as the disposed
//! flag.
//!
//! Producers append with a compare-and-swap on `tail.next`, the
//! single-consumer half of a Michael-Scott queue. The producer whose node
//! lands directly behind `head` moved the queue from empty to non-empty and
//! is the only one that wakes the consumer. Nested scheduling from inside a
//! running action never sees `tail == head`, so it simply appends and the
//! current drain picks it up in FIFO order.
//!
//! # Reclamation
//!
//! Nodes are managed with `crossbeam::epoch`: the consumer defers destruction
//! of the old head each time it advances, and producers only dereference
//! nodes while pinned. Before advancing past a node the consumer makes sure
//! `tail` no longer points at it, so a retired node is never reachable from
//! `tail`.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam::{
    atomic::AtomicCell,
    epoch::{self, Atomic, Owned, Shared},
};
use log::{debug, trace};

use super::{
    node::{ActionCell, Node},
    validate_delay, Disposable, ExecutionContext, Task, TimeUnit, Timer,
};
use crate::{
    error::{panic_message, BridgeError, Result},
    sink::ErrorSink,
};

/// Collaborators shared by every worker of a [`Scheduler`](super::Scheduler).
#[derive(Clone)]
pub(crate) struct Services {
    pub(crate) context: Arc<dyn ExecutionContext>,
    pub(crate) timer: Arc<dyn Timer>,
    pub(crate) sink: Arc<dyn ErrorSink>,
}

struct Inner {
    /// Last completed node. Written by the consumer thread only.
    head: Atomic<Node>,
    /// Last linked node, null once disposed.
    tail: Atomic<Node>,
    services: Services,
}

/// Serializes actions from any thread onto the consumer thread.
///
/// `Worker` is a cheap handle; clones share the same queue and disposing any
/// of them disposes the worker.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<Inner>,
}

impl Worker {
    pub(crate) fn new(services: Services) -> Self {
        let starter = Atomic::new(Node::new(Arc::new(ActionCell::empty())));
        // SAFETY: the node was just allocated and is not shared yet.
        let first = starter.load(Ordering::Relaxed, unsafe { epoch::unprotected() });
        Self {
            inner: Arc::new(Inner {
                head: starter,
                tail: Atomic::from(first),
                services,
            }),
        }
    }

    /// Queue `action` to run on the consumer thread after everything already
    /// queued.
    ///
    /// Scheduling on a disposed worker is silently dropped; the returned
    /// handle reports itself disposed.
    pub fn schedule<F>(&self, action: F) -> ScheduledAction
    where
        F: FnOnce() + Send + 'static,
    {
        let cell = Arc::new(ActionCell::new(Box::new(action)));
        self.inner.enqueue(Arc::clone(&cell));
        ScheduledAction {
            action: cell,
            timer: None,
        }
    }

    /// Queue `action` once `delay` of `unit` has elapsed.
    ///
    /// Fails with [`BridgeError::InvalidDelay`] for negative delays or delays
    /// beyond the timer's range, before anything is queued or started. A delay
    /// that rounds down to zero milliseconds takes the immediate path.
    pub fn schedule_with_delay<F>(&self, action: F, delay: i64, unit: TimeUnit) -> Result<ScheduledAction>
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = validate_delay(delay, unit, self.inner.services.timer.max_delay())?;
        Ok(self.schedule_validated(Box::new(action), delay))
    }

    /// [`schedule_with_delay`](Self::schedule_with_delay) taking a `Duration`.
    pub fn schedule_after<F>(&self, action: F, delay: Duration) -> Result<ScheduledAction>
    where
        F: FnOnce() + Send + 'static,
    {
        let millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        self.schedule_with_delay(action, millis, TimeUnit::Milliseconds)
    }

    /// Run `action` after `initial_delay`, then every `period`.
    ///
    /// Each run is scheduled relative to the first start so slow runs do not
    /// accumulate drift. The repetition stops when the returned handle or the
    /// worker is disposed, or when `action` panics.
    pub fn schedule_periodically<F>(
        &self,
        action: F,
        initial_delay: i64,
        period: i64,
        unit: TimeUnit,
    ) -> Result<PeriodicAction>
    where
        F: FnMut() + Send + 'static,
    {
        let max = self.inner.services.timer.max_delay();
        let initial_delay = validate_delay(initial_delay, unit, max)?;
        let period = validate_delay(period, unit, max)?;

        let state = Arc::new(PeriodicState {
            cancelled: AtomicBool::new(false),
            current: AtomicCell::new(None),
        });
        let run = PeriodicRun {
            worker: self.clone(),
            action,
            first_run: Instant::now() + initial_delay,
            period,
            runs: 0,
            state: Arc::clone(&state),
        };
        let scheduled = self.schedule_validated(Box::new(move || run.run()), initial_delay);
        state.replace(scheduled);

        Ok(PeriodicAction { state })
    }

    /// Stop accepting work and release every pending action. Idempotent.
    ///
    /// An action that is already running finishes; nothing queued behind it
    /// runs afterwards.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Handles plus pending timer callbacks keeping the queue alive.
    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    fn schedule_validated(&self, action: Task, delay: Duration) -> ScheduledAction {
        let cell = Arc::new(ActionCell::new(action));
        if delay.is_zero() {
            self.inner.enqueue(Arc::clone(&cell));
            return ScheduledAction {
                action: cell,
                timer: None,
            };
        }

        let inner = Arc::clone(&self.inner);
        let pending = Arc::clone(&cell);
        let timer = self.inner.services.timer.start(
            delay,
            Box::new(move || {
                if !pending.is_disposed() {
                    inner.enqueue(pending);
                }
            }),
        );
        ScheduledAction {
            action: cell,
            timer: Some(timer),
        }
    }
}

impl Disposable for Worker {
    fn dispose(&self) {
        Worker::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        Worker::is_disposed(self)
    }
}

impl Inner {
    fn is_disposed(&self) -> bool {
        let guard = epoch::pin();
        self.tail.load(Ordering::SeqCst, &guard).is_null()
    }

    /// Link `action` behind the current tail, waking the consumer if the
    /// queue was empty.
    fn enqueue(self: &Arc<Self>, action: Arc<ActionCell>) {
        let guard = epoch::pin();
        let mut node = Owned::new(Node::new(Arc::clone(&action)));

        let (pivot, linked) = loop {
            let tail = self.tail.load(Ordering::SeqCst, &guard);
            if tail.is_null() {
                action.dispose();
                return;
            }
            // SAFETY: `tail` is non-null and only retired once it is behind
            // both head and tail, which cannot happen while we are pinned.
            let tail_node = unsafe { tail.deref() };
            match tail_node.next.compare_exchange(
                Shared::null(),
                node,
                Ordering::SeqCst,
                Ordering::SeqCst,
                &guard,
            ) {
                Ok(linked) => break (tail, linked),
                Err(err) => {
                    node = err.new;
                    // Another producer linked first but has not moved tail yet.
                    let _ = self.tail.compare_exchange(
                        tail,
                        err.current,
                        Ordering::SeqCst,
                        Ordering::Relaxed,
                        &guard,
                    );
                }
            }
        };

        // Fails on a concurrent dispose or when someone already helped.
        let _ = self
            .tail
            .compare_exchange(pivot, linked, Ordering::SeqCst, Ordering::Relaxed, &guard);

        if self.tail.load(Ordering::SeqCst, &guard).is_null() {
            action.dispose();
            return;
        }

        let was_empty = pivot == self.head.load(Ordering::SeqCst, &guard);
        drop(guard);

        if was_empty {
            self.wake();
        }
    }

    fn wake(self: &Arc<Self>) {
        if self.services.context.is_consumer_thread() {
            self.drain();
        } else {
            trace!("posting drain to the consumer thread");
            let inner = Arc::clone(self);
            self.services.context.post(Box::new(move || inner.drain()));
        }
    }

    /// Run queued actions until caught up. Consumer thread only.
    ///
    /// Actions run unpinned. Head does not advance until the action returns;
    /// producers compare against it to decide who wakes the consumer.
    fn drain(&self) {
        loop {
            let action = {
                let guard = epoch::pin();
                if self.tail.load(Ordering::SeqCst, &guard).is_null() {
                    break;
                }

                let head = self.head.load(Ordering::SeqCst, &guard);
                // SAFETY: head is never null and is only retired by this thread.
                let next = unsafe { head.deref() }.next.load(Ordering::SeqCst, &guard);
                // SAFETY: a linked node stays alive until it becomes the old head.
                let Some(node) = (unsafe { next.as_ref() }) else {
                    break;
                };

                // Keep tail ahead of the node about to be retired.
                let _ = self
                    .tail
                    .compare_exchange(head, next, Ordering::SeqCst, Ordering::Relaxed, &guard);
                Arc::clone(&node.action)
            };

            self.run_action(&action);

            let guard = epoch::pin();
            let head = self.head.load(Ordering::SeqCst, &guard);
            // SAFETY: only this thread retires head, and it has not moved
            // since the action was taken from `head.next`, which is set once.
            let next = unsafe { head.deref() }.next.load(Ordering::SeqCst, &guard);
            self.head.store(next, Ordering::SeqCst);
            // SAFETY: `head` is unreachable from both head and tail now.
            unsafe { guard.defer_destroy(head) };
        }
    }

    fn run_action(&self, action: &ActionCell) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| action.run())) {
            self.services.sink.uncaught(BridgeError::ActionPanicked {
                message: panic_message(payload.as_ref()),
            });
        }
    }

    fn dispose(&self) {
        let guard = epoch::pin();
        if self.tail.swap(Shared::null(), Ordering::SeqCst, &guard).is_null() {
            return;
        }
        debug!("worker disposed, releasing pending actions");

        let mut current = self.head.load(Ordering::SeqCst, &guard);
        // SAFETY: nodes reachable from head are alive while we are pinned.
        while let Some(node) = unsafe { current.as_ref() } {
            node.action.dispose();
            current = node.next.load(Ordering::SeqCst, &guard);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // SAFETY: we are the last owner, no other thread can reach the chain.
        unsafe {
            let guard = epoch::unprotected();
            let mut current = self.head.load(Ordering::Relaxed, guard);
            while !current.is_null() {
                let next = current.deref().next.load(Ordering::Relaxed, guard);
                drop(current.into_owned());
                current = next;
            }
        }
    }
}

/// Handle to a single scheduled action.
///
/// Disposing before the action starts guarantees it never runs; disposing
/// after it started has no effect. The handle also reports itself disposed
/// once the action has run.
pub struct ScheduledAction {
    action: Arc<ActionCell>,
    timer: Option<Box<dyn Disposable>>,
}

impl Disposable for ScheduledAction {
    fn dispose(&self) {
        self.action.dispose();
        if let Some(timer) = &self.timer {
            timer.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.action.is_disposed()
    }
}

struct PeriodicState {
    cancelled: AtomicBool,
    current: AtomicCell<Option<ScheduledAction>>,
}

impl PeriodicState {
    fn replace(&self, next: ScheduledAction) {
        drop(self.current.swap(Some(next)));
        // A dispose racing with the swap may have missed the new handle.
        if self.cancelled.load(Ordering::SeqCst) {
            self.cancel_current();
        }
    }

    fn cancel_current(&self) {
        if let Some(current) = self.current.take() {
            current.dispose();
        }
    }
}

/// Handle to a repeating action from [`Worker::schedule_periodically`].
pub struct PeriodicAction {
    state: Arc<PeriodicState>,
}

impl Disposable for PeriodicAction {
    fn dispose(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.cancel_current();
    }

    fn is_disposed(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

/// Marks a periodic action disposed when its run unwinds.
struct StopOnPanic<'a>(&'a PeriodicState);

impl Drop for StopOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

struct PeriodicRun<F> {
    worker: Worker,
    action: F,
    first_run: Instant,
    period: Duration,
    runs: u32,
    state: Arc<PeriodicState>,
}

impl<F> PeriodicRun<F>
where
    F: FnMut() + Send + 'static,
{
    fn run(mut self) {
        if self.state.cancelled.load(Ordering::SeqCst) {
            return;
        }
        {
            let _stop = StopOnPanic(&self.state);
            (self.action)();
        }
        if self.state.cancelled.load(Ordering::SeqCst) || self.worker.is_disposed() {
            return;
        }

        self.runs = self.runs.saturating_add(1);
        let now = Instant::now();
        let delay = self
            .first_run
            .checked_add(self.period.saturating_mul(self.runs))
            .map_or(Duration::ZERO, |due| due.saturating_duration_since(now));

        let worker = self.worker.clone();
        let state = Arc::clone(&self.state);
        let next = worker.schedule_validated(Box::new(move || self.run()), delay);
        state.replace(next);
    }
}
