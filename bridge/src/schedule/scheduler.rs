use std::sync::Arc;

use super::{
    worker::{ScheduledAction, Services},
    ExecutionContext, TimeUnit, Timer, Worker,
};
use crate::{
    error::Result,
    sink::{ErrorSink, LogErrorSink},
};

/// Factory for [`Worker`]s that all target the same consumer thread.
///
/// A `Scheduler` is an ordinary value: build one per consumer thread (or per
/// test) and pass it to whoever needs to schedule work.
#[derive(Clone)]
pub struct Scheduler {
    services: Services,
}

impl Scheduler {
    /// Build a scheduler around something that is both the execution context
    /// and the timer, such as a [`LoopHandle`](super::LoopHandle).
    pub fn new<C>(context: C) -> Self
    where
        C: ExecutionContext + Timer + 'static,
    {
        let context = Arc::new(context);
        Self::with_parts(context.clone(), context)
    }

    /// Build a scheduler from separate collaborators.
    pub fn with_parts(context: Arc<dyn ExecutionContext>, timer: Arc<dyn Timer>) -> Self {
        Self {
            services: Services {
                context,
                timer,
                sink: Arc::new(LogErrorSink),
            },
        }
    }

    /// Route panics escaping scheduled actions to `sink` instead of the log.
    pub fn with_error_sink<S>(mut self, sink: S) -> Self
    where
        S: ErrorSink + 'static,
    {
        self.services.sink = Arc::new(sink);
        self
    }

    /// Create an independent worker with its own queue.
    pub fn create_worker(&self) -> Worker {
        Worker::new(self.services.clone())
    }

    /// Run `action` once on the consumer thread, on a worker of its own that
    /// is disposed afterwards.
    pub fn schedule_direct<F>(&self, action: F) -> ScheduledAction
    where
        F: FnOnce() + Send + 'static,
    {
        let worker = self.create_worker();
        let guard = DisposeOnDrop(worker.clone());
        worker.schedule(move || {
            let _guard = guard;
            action();
        })
    }

    /// Delayed variant of [`schedule_direct`](Self::schedule_direct).
    pub fn schedule_direct_with_delay<F>(&self, action: F, delay: i64, unit: TimeUnit) -> Result<ScheduledAction>
    where
        F: FnOnce() + Send + 'static,
    {
        let worker = self.create_worker();
        let guard = DisposeOnDrop(worker.clone());
        worker.schedule_with_delay(
            move || {
                let _guard = guard;
                action();
            },
            delay,
            unit,
        )
    }
}

/// Disposes the worker once the action has run or was dropped unrun.
struct DisposeOnDrop(Worker);

impl Drop for DisposeOnDrop {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::BridgeError,
        schedule::{
            worker::tests::{ManualContext, ManualTimer},
            Disposable,
        },
    };
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        thread,
    };

    fn manual_scheduler() -> (Scheduler, Arc<ManualContext>, Arc<ManualTimer>) {
        let context = ManualContext::new();
        let timer = ManualTimer::new();
        (Scheduler::with_parts(context.clone(), timer.clone()), context, timer)
    }

    #[test]
    fn workers_are_independent() {
        let (scheduler, _, _) = manual_scheduler();
        let first = scheduler.create_worker();
        let second = scheduler.create_worker();

        first.dispose();

        assert!(first.is_disposed());
        assert!(!second.is_disposed());
    }

    #[test]
    fn workers_share_the_consumer_thread() {
        let (scheduler, context, _) = manual_scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));

        let workers = (scheduler.create_worker(), scheduler.create_worker());
        let log_clone = Arc::clone(&log);
        thread::spawn(move || {
            let (a, b) = workers;
            let log_a = Arc::clone(&log_clone);
            a.schedule(move || log_a.lock().unwrap().push(thread::current().id()));
            let log_b = Arc::clone(&log_clone);
            b.schedule(move || log_b.lock().unwrap().push(thread::current().id()));
        })
        .join()
        .unwrap();

        assert_eq!(context.posted(), 2);
        context.pump();

        let me = thread::current().id();
        assert_eq!(*log.lock().unwrap(), vec![me, me]);
    }

    #[test]
    fn schedule_direct_runs_once() {
        let (scheduler, _, _) = manual_scheduler();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let handle = scheduler.schedule_direct(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(handle.is_disposed());
    }

    #[test]
    fn schedule_direct_with_delay_waits_for_the_timer() {
        let (scheduler, _, timer) = manual_scheduler();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        scheduler
            .schedule_direct_with_delay(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                100,
                TimeUnit::Milliseconds,
            )
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        timer.fire_all();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn schedule_direct_with_invalid_delay_fails() {
        let (scheduler, _, timer) = manual_scheduler();

        let result = scheduler.schedule_direct_with_delay(|| {}, -10, TimeUnit::Seconds);

        assert!(matches!(result, Err(BridgeError::InvalidDelay { .. })));
        assert_eq!(timer.started(), 0);
    }

    #[test]
    fn error_sink_is_shared_by_workers() {
        let (scheduler, _, _) = manual_scheduler();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        let scheduler = scheduler.with_error_sink(move |_: BridgeError| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.create_worker().schedule(|| panic!("first"));
        scheduler.create_worker().schedule(|| panic!("second"));

        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }
}
