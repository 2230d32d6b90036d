//! A dedicated consumer thread.
//!
//! [`EventLoop`] plays the part a UI toolkit's main loop plays for the
//! scheduler: it owns one thread, runs posted callbacks on it in order, and
//! fires one-shot timers on it. Its [`LoopHandle`] implements both
//! [`ExecutionContext`] and [`Timer`], so it can back a
//! [`Scheduler`](super::Scheduler) directly.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant},
};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, warn};

use super::{Disposable, ExecutionContext, Scheduler, Task, Timer, DEFAULT_MAX_TIMER_DELAY};
use crate::error::{panic_message, BridgeError, Result};

/// Settings for [`EventLoop::spawn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLoopConfig {
    /// Name of the loop thread.
    pub name: String,
    /// Longest delay the loop's timer accepts.
    pub max_timer_delay: Duration,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            name: "uibridge-loop".to_string(),
            max_timer_delay: DEFAULT_MAX_TIMER_DELAY,
        }
    }
}

impl EventLoopConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_timer_delay(mut self, max_timer_delay: Duration) -> Self {
        self.max_timer_delay = max_timer_delay;
        self
    }
}

enum Message {
    Post(Task),
    Timer {
        id: u64,
        deadline: Instant,
        callback: Task,
    },
    CancelTimer(u64),
    Shutdown,
}

/// Owns the loop thread. Dropping it runs whatever was posted before the drop,
/// discards pending timers, and joins the thread.
pub struct EventLoop {
    handle: LoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    pub fn spawn(config: EventLoopConfig) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let thread = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || run_loop(receiver))
            .map_err(|e| BridgeError::LoopSpawn {
                name: config.name.clone(),
                message: e.to_string(),
            })?;
        debug!("event loop {:?} started", config.name);

        Ok(Self {
            handle: LoopHandle {
                sender,
                thread: thread.thread().id(),
                max_timer_delay: config.max_timer_delay,
                next_timer: Arc::new(AtomicU64::new(0)),
            },
            thread: Some(thread),
        })
    }

    /// Returns a handle that posts to this loop. Clone it freely.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// A scheduler whose workers drain on this loop.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.handle())
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let _ = self.handle.sender.send(Message::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("event loop thread panicked");
            }
        }
        debug!("event loop stopped");
    }
}

/// Cloneable access to an [`EventLoop`] from any thread.
#[derive(Clone)]
pub struct LoopHandle {
    sender: Sender<Message>,
    thread: ThreadId,
    max_timer_delay: Duration,
    next_timer: Arc<AtomicU64>,
}

impl LoopHandle {
    /// Run `f` on the loop and return a future for its result.
    pub fn spawn<F, T>(&self, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = crossbeam::channel::bounded(1);
        self.post(Box::new(move || {
            let _ = tx.send(f());
        }));
        TaskFuture { receiver: rx }
    }

    /// Run `f` on the loop and block until it returns. Runs inline when
    /// called from the loop thread itself.
    ///
    /// Everything posted before this call has run by the time it returns.
    pub fn run_and_wait<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_consumer_thread() {
            Ok(f())
        } else {
            self.spawn(f).wait()
        }
    }
}

impl ExecutionContext for LoopHandle {
    fn is_consumer_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    fn post(&self, task: Task) {
        if self.sender.send(Message::Post(task)).is_err() {
            warn!("event loop closed, dropping posted task");
        }
    }
}

impl Timer for LoopHandle {
    fn start(&self, delay: Duration, callback: Task) -> Box<dyn Disposable> {
        let handle = TimerHandle {
            id: self.next_timer.fetch_add(1, Ordering::Relaxed),
            sender: self.sender.clone(),
            cancelled: AtomicBool::new(false),
        };
        // A deadline past the end of `Instant` never comes due.
        let Some(deadline) = Instant::now().checked_add(delay) else {
            return Box::new(handle);
        };
        let message = Message::Timer {
            id: handle.id,
            deadline,
            callback,
        };
        if self.sender.send(message).is_err() {
            warn!("event loop closed, timer will never fire");
            handle.cancelled.store(true, Ordering::SeqCst);
        }
        Box::new(handle)
    }

    fn max_delay(&self) -> Duration {
        self.max_timer_delay
    }
}

/// Cancels by asking the loop to drop the pending callback, so whatever the
/// callback captured is released without waiting for the deadline.
struct TimerHandle {
    id: u64,
    sender: Sender<Message>,
    cancelled: AtomicBool,
}

impl Disposable for TimerHandle {
    fn dispose(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            let _ = self.sender.send(Message::CancelTimer(self.id));
        }
    }

    fn is_disposed(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A future representing the result of a task run on the loop.
pub struct TaskFuture<T> {
    receiver: Receiver<T>,
}

impl<T> TaskFuture<T> {
    /// Block until the task has run and return its result.
    pub fn wait(self) -> Result<T> {
        self.receiver.recv().map_err(|_| BridgeError::LoopClosed)
    }

    /// `Ok(None)` while the task has not run yet.
    pub fn try_wait(&self) -> Result<Option<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Ok(Some(result)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BridgeError::LoopClosed),
        }
    }
}

/// Timer bookkeeping owned by the loop thread. Ids come from the handle's
/// counter, so they also order timers sharing a deadline by start time.
#[derive(Default)]
struct Timers {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    pending: HashMap<u64, Task>,
}

impl Timers {
    fn insert(&mut self, id: u64, deadline: Instant, callback: Task) {
        self.heap.push(Reverse((deadline, id)));
        self.pending.insert(id, callback);
    }

    /// Drop a cancelled timer's callback now. Its heap slot is skipped when
    /// it comes due, or swept once stale slots outnumber live ones.
    fn cancel(&mut self, id: u64) {
        if self.pending.remove(&id).is_some() && self.heap.len() > 2 * self.pending.len() + 64 {
            let pending = &self.pending;
            self.heap.retain(|Reverse((_, id))| pending.contains_key(id));
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Pop every timer due at `now`, in deadline order.
    fn take_due(&mut self, now: Instant) -> Vec<Task> {
        let mut due = Vec::new();
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(callback) = self.pending.remove(&id) {
                due.push(callback);
            }
        }
        due
    }
}

fn run_loop(receiver: Receiver<Message>) {
    let mut timers = Timers::default();
    loop {
        let message = match timers.next_deadline() {
            Some(deadline) => match receiver.recv_deadline(deadline) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match receiver.recv() {
                Ok(message) => Some(message),
                Err(_) => break,
            },
        };

        match message {
            Some(Message::Post(task)) => run_guarded(task),
            Some(Message::Timer {
                id,
                deadline,
                callback,
            }) => timers.insert(id, deadline, callback),
            Some(Message::CancelTimer(id)) => timers.cancel(id),
            Some(Message::Shutdown) => break,
            None => {}
        }

        for callback in timers.take_due(Instant::now()) {
            run_guarded(callback);
        }
    }
}

fn run_guarded(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!(
            "task panicked on the event loop: {}",
            panic_message(payload.as_ref())
        );
    }
}
