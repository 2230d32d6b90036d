//! Compact registry of invalidation and change listeners for one value.
//!
//! # Storage
//!
//! Most values have zero, one or two listeners, so the registry avoids a
//! heap-allocated list until it needs one:
//!
//! - `Empty`: nobody is listening.
//! - `One`: a single listener held inline.
//! - `Many`: a shared vector partitioned at `invalidation`; entries before
//!   the split are invalidation listeners, entries from the split on are
//!   change listeners, each group in registration order.
//!
//! # Mutation during dispatch
//!
//! [`ListenerHub::fire_change`] iterates a snapshot of the storage (an extra
//! reference to the `Many` vector). A listener that adds or removes listeners
//! from inside its callback therefore finds the vector shared and mutates a
//! fresh copy, while the dispatch in progress finishes on the snapshot it
//! started with. Nothing is locked; the hub is meant to be used from one
//! thread.

use std::{
    cell::{Cell, RefCell},
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::Arc,
};

use log::trace;

use crate::{
    error::{panic_message, BridgeError},
    sink::{ErrorSink, LogErrorSink},
};

/// Notified that the value changed, without the value itself.
pub type InvalidationListener = Rc<dyn Fn()>;

/// Notified with `(old, new)` on every change.
pub type ChangeListener<T> = Rc<dyn Fn(&T, &T)>;

/// The owner side of a hub: where the current value is read from.
pub trait ValueSource<T> {
    fn current_value(&self) -> T;
}

enum Entry<T> {
    Invalidation(InvalidationListener),
    Change(ChangeListener<T>),
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        match self {
            Entry::Invalidation(l) => Entry::Invalidation(Rc::clone(l)),
            Entry::Change(l) => Entry::Change(Rc::clone(l)),
        }
    }
}

enum Storage<T> {
    Empty,
    One(Entry<T>),
    Many {
        listeners: Rc<Vec<Entry<T>>>,
        invalidation: usize,
    },
}

impl<T> Storage<T> {
    /// A view that stays valid while the hub is mutated.
    fn snapshot(&self) -> Self {
        match self {
            Storage::Empty => Storage::Empty,
            Storage::One(entry) => Storage::One(entry.clone()),
            Storage::Many {
                listeners,
                invalidation,
            } => Storage::Many {
                listeners: Rc::clone(listeners),
                invalidation: *invalidation,
            },
        }
    }
}

/// Registry of invalidation and change listeners for one observable value.
///
/// The hub never reads the value on its own; the owner passes itself as a
/// [`ValueSource`] whenever the hub may need the current value.
pub struct ListenerHub<T> {
    storage: RefCell<Storage<T>>,
    /// Last value reported to change listeners. Only held while at least one
    /// change listener is registered.
    cached: RefCell<Option<T>>,
    dispatching: Cell<bool>,
    sink: Arc<dyn ErrorSink>,
}

impl<T: Clone> ListenerHub<T> {
    pub fn new() -> Self {
        Self::with_error_sink(Arc::new(LogErrorSink))
    }

    /// Route panics escaping listeners to `sink`.
    pub fn with_error_sink(sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            storage: RefCell::new(Storage::Empty),
            cached: RefCell::new(None),
            dispatching: Cell::new(false),
            sink,
        }
    }

    /// Total number of registered listeners.
    pub fn len(&self) -> usize {
        match &*self.storage.borrow() {
            Storage::Empty => 0,
            Storage::One(_) => 1,
            Storage::Many { listeners, .. } => listeners.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidation_len(&self) -> usize {
        match &*self.storage.borrow() {
            Storage::Empty | Storage::One(Entry::Change(_)) => 0,
            Storage::One(Entry::Invalidation(_)) => 1,
            Storage::Many { invalidation, .. } => *invalidation,
        }
    }

    pub fn change_len(&self) -> usize {
        self.len() - self.invalidation_len()
    }

    /// True while [`fire_change`](Self::fire_change) is notifying listeners.
    pub fn is_dispatching(&self) -> bool {
        self.dispatching.get()
    }

    /// The value change listeners will see as `old` on the next fire.
    pub fn cached_value(&self) -> Option<T> {
        self.cached.borrow().clone()
    }

    pub fn add_invalidation_listener(&self, listener: InvalidationListener) {
        let entry = Entry::Invalidation(listener);
        let mut storage = self.storage.borrow_mut();
        match &mut *storage {
            Storage::Empty => *storage = Storage::One(entry),
            Storage::One(existing) => {
                let existing = existing.clone();
                let (listeners, invalidation) = match existing {
                    Entry::Invalidation(_) => (vec![existing, entry], 2),
                    Entry::Change(_) => (vec![entry, existing], 1),
                };
                *storage = Storage::Many {
                    listeners: Rc::new(listeners),
                    invalidation,
                };
            }
            Storage::Many {
                listeners,
                invalidation,
            } => {
                let listeners = self.make_mut(listeners);
                reserve_one(listeners);
                listeners.insert(*invalidation, entry);
                *invalidation += 1;
            }
        }
    }

    /// Removes the first registration of `listener`. Unknown listeners are
    /// ignored.
    pub fn remove_invalidation_listener(&self, listener: &InvalidationListener) {
        let mut storage = self.storage.borrow_mut();
        let replacement = match &mut *storage {
            Storage::Empty | Storage::One(Entry::Change(_)) => return,
            Storage::One(Entry::Invalidation(existing)) => {
                if !same_listener(existing, listener) {
                    return;
                }
                Storage::Empty
            }
            Storage::Many {
                listeners,
                invalidation,
            } => {
                let Some(index) = listeners[..*invalidation]
                    .iter()
                    .position(|e| matches!(e, Entry::Invalidation(l) if same_listener(l, listener)))
                else {
                    return;
                };
                if listeners.len() == 2 {
                    Storage::One(listeners[1 - index].clone())
                } else {
                    self.make_mut(listeners).remove(index);
                    *invalidation -= 1;
                    return;
                }
            }
        };
        *storage = replacement;
    }

    /// Register a change listener. The first one seeds the cached value from
    /// `source` so the next change reports a correct `old` value.
    pub fn add_change_listener<S>(&self, source: &S, listener: ChangeListener<T>)
    where
        S: ValueSource<T> + ?Sized,
    {
        if self.change_len() == 0 {
            let value = source.current_value();
            *self.cached.borrow_mut() = Some(value);
        }

        let entry = Entry::Change(listener);
        let mut storage = self.storage.borrow_mut();
        match &mut *storage {
            Storage::Empty => *storage = Storage::One(entry),
            Storage::One(existing) => {
                let invalidation = usize::from(matches!(existing, Entry::Invalidation(_)));
                *storage = Storage::Many {
                    listeners: Rc::new(vec![existing.clone(), entry]),
                    invalidation,
                };
            }
            Storage::Many { listeners, .. } => {
                let listeners = self.make_mut(listeners);
                reserve_one(listeners);
                listeners.push(entry);
            }
        }
    }

    /// Removes the first registration of `listener`. Removing the last change
    /// listener releases the cached value.
    pub fn remove_change_listener(&self, listener: &ChangeListener<T>) {
        {
            let mut storage = self.storage.borrow_mut();
            let replacement = match &mut *storage {
                Storage::Empty | Storage::One(Entry::Invalidation(_)) => return,
                Storage::One(Entry::Change(existing)) => {
                    if !same_listener(existing, listener) {
                        return;
                    }
                    Some(Storage::Empty)
                }
                Storage::Many {
                    listeners,
                    invalidation,
                } => {
                    let split = *invalidation;
                    let Some(offset) = listeners[split..]
                        .iter()
                        .position(|e| matches!(e, Entry::Change(l) if same_listener(l, listener)))
                    else {
                        return;
                    };
                    let index = split + offset;
                    if listeners.len() == 2 {
                        Some(Storage::One(listeners[1 - index].clone()))
                    } else {
                        self.make_mut(listeners).remove(index);
                        None
                    }
                }
            };
            if let Some(replacement) = replacement {
                *storage = replacement;
            }
        }

        if self.change_len() == 0 {
            self.cached.borrow_mut().take();
        }
    }

    /// Notify every listener that the owner's value changed.
    ///
    /// Invalidation listeners run first, then change listeners, each group in
    /// registration order. The new value is read from `source` once and every
    /// change listener sees the same `(old, new)` pair. A panicking listener
    /// is reported to the error sink and does not stop the others.
    pub fn fire_change<S>(&self, source: &S)
    where
        S: ValueSource<T> + ?Sized,
    {
        let snapshot = self.storage.borrow().snapshot();
        // Taken before any listener runs: a listener removing the last change
        // listener clears the cache, but the snapshot still reports from it.
        let old = self.cached.borrow().clone();
        let _dispatch = DispatchGuard::enter(&self.dispatching);

        match snapshot {
            Storage::Empty => {}
            Storage::One(Entry::Invalidation(listener)) => self.notify(|| listener()),
            Storage::One(Entry::Change(listener)) => {
                let (old, new) = self.advance(source, old);
                self.notify(|| listener(&old, &new));
            }
            Storage::Many {
                listeners,
                invalidation,
            } => {
                for entry in &listeners[..invalidation] {
                    if let Entry::Invalidation(listener) = entry {
                        self.notify(|| listener());
                    }
                }
                if invalidation < listeners.len() {
                    let (old, new) = self.advance(source, old);
                    for entry in &listeners[invalidation..] {
                        if let Entry::Change(listener) = entry {
                            self.notify(|| listener(&old, &new));
                        }
                    }
                }
            }
        }
    }

    /// Read the new value and cache it while change listeners remain,
    /// returning `(old, new)`.
    fn advance<S>(&self, source: &S, old: Option<T>) -> (T, T)
    where
        S: ValueSource<T> + ?Sized,
    {
        let new = source.current_value();
        if self.change_len() > 0 {
            *self.cached.borrow_mut() = Some(new.clone());
        }
        let old = old.unwrap_or_else(|| new.clone());
        (old, new)
    }

    fn notify(&self, call: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
            self.sink.uncaught(BridgeError::ListenerPanicked {
                message: panic_message(payload.as_ref()),
            });
        }
    }

    fn make_mut<'a>(&self, listeners: &'a mut Rc<Vec<Entry<T>>>) -> &'a mut Vec<Entry<T>> {
        if self.dispatching.get() && Rc::strong_count(listeners) > 1 {
            trace!("listeners changed during dispatch, copying storage");
        }
        Rc::make_mut(listeners)
    }
}

impl<T: Clone> Default for ListenerHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Grow by 1.5x + 1 rather than doubling.
fn reserve_one<E>(listeners: &mut Vec<E>) {
    if listeners.len() == listeners.capacity() {
        let target = listeners.capacity() * 3 / 2 + 1;
        listeners.reserve_exact(target - listeners.len());
    }
}

fn same_listener<F: ?Sized>(a: &Rc<F>, b: &Rc<F>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

/// Sets the dispatch flag for the lifetime of one `fire_change`, restoring
/// the outer state for nested fires.
struct DispatchGuard<'a> {
    flag: &'a Cell<bool>,
    outer: bool,
}

impl<'a> DispatchGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        let outer = flag.replace(true);
        Self { flag, outer }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.outer);
    }
}
