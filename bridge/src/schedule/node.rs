use std::{
    ptr,
    sync::{
        atomic::{AtomicPtr, Ordering},
        Arc,
    },
};

use crossbeam::epoch::Atomic;

use super::Task;

/// The pending action of one queue entry.
///
/// The action leaves the cell at most once: whichever of [`run`](Self::run)
/// and [`dispose`](Self::dispose) swaps it out first wins, and the other
/// becomes a no-op. The cell is shared between the queue and the
/// [`ScheduledAction`](super::ScheduledAction) returned to the caller.
pub(crate) struct ActionCell {
    action: AtomicPtr<Task>,
}

impl ActionCell {
    pub(crate) fn new(task: Task) -> Self {
        Self {
            action: AtomicPtr::new(Box::into_raw(Box::new(task))),
        }
    }

    /// A cell with nothing to run, used for the queue's starter node.
    pub(crate) fn empty() -> Self {
        Self {
            action: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn take(&self) -> Option<Task> {
        let raw = self.action.swap(ptr::null_mut(), Ordering::AcqRel);
        if raw.is_null() {
            None
        } else {
            // SAFETY: non-null pointers in the cell always come from
            // `Box::into_raw` and the swap above hands ownership to exactly
            // one caller.
            Some(*unsafe { Box::from_raw(raw) })
        }
    }

    /// Run the action if it is still pending. Returns whether it ran.
    pub(crate) fn run(&self) -> bool {
        match self.take() {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Drop the action without running it.
    pub(crate) fn dispose(&self) {
        drop(self.take());
    }

    /// True once the action has either run or been disposed.
    pub(crate) fn is_disposed(&self) -> bool {
        self.action.load(Ordering::Acquire).is_null()
    }
}

impl Drop for ActionCell {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A link in the worker's queue.
pub(crate) struct Node {
    pub(crate) action: Arc<ActionCell>,
    pub(crate) next: Atomic<Node>,
}

impl Node {
    pub(crate) fn new(action: Arc<ActionCell>) -> Self {
        Self {
            action,
            next: Atomic::null(),
        }
    }
}
