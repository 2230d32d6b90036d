use std::{cell::RefCell, sync::Arc};

use super::hub::{ChangeListener, InvalidationListener, ListenerHub, ValueSource};
use crate::sink::ErrorSink;

/// A settable value that notifies its listeners on every [`set`](Self::set).
///
/// Owns a [`ListenerHub`] and acts as its [`ValueSource`].
pub struct ValueBinding<T> {
    value: RefCell<T>,
    hub: ListenerHub<T>,
}

impl<T: Clone> ValueBinding<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: RefCell::new(initial),
            hub: ListenerHub::new(),
        }
    }

    pub fn with_error_sink(initial: T, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            value: RefCell::new(initial),
            hub: ListenerHub::with_error_sink(sink),
        }
    }

    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Store `value` and notify every listener, even if it equals the
    /// previous value.
    pub fn set(&self, value: T) {
        *self.value.borrow_mut() = value;
        self.hub.fire_change(self);
    }

    pub fn add_invalidation_listener(&self, listener: InvalidationListener) {
        self.hub.add_invalidation_listener(listener);
    }

    pub fn remove_invalidation_listener(&self, listener: &InvalidationListener) {
        self.hub.remove_invalidation_listener(listener);
    }

    pub fn add_change_listener(&self, listener: ChangeListener<T>) {
        self.hub.add_change_listener(self, listener);
    }

    pub fn remove_change_listener(&self, listener: &ChangeListener<T>) {
        self.hub.remove_change_listener(listener);
    }

    pub fn hub(&self) -> &ListenerHub<T> {
        &self.hub
    }
}

impl<T: Clone> ValueSource<T> for ValueBinding<T> {
    fn current_value(&self) -> T {
        self.get()
    }
}

impl<T: Clone + Default> Default for ValueBinding<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn set_notifies_with_old_and_new() {
        let binding = ValueBinding::new(String::from("a"));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&seen);
        binding.add_change_listener(Rc::new(move |old: &String, new: &String| {
            log.borrow_mut().push(format!("{old}->{new}"))
        }));
        binding.set("b".into());
        binding.set("c".into());

        assert_eq!(*seen.borrow(), vec!["a->b", "b->c"]);
        assert_eq!(binding.get(), "c");
    }

    #[test]
    fn listener_can_read_the_binding() {
        let binding = Rc::new(ValueBinding::new(1));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let weak = Rc::downgrade(&binding);
        let log = Rc::clone(&seen);
        binding.add_invalidation_listener(Rc::new(move || {
            if let Some(binding) = weak.upgrade() {
                log.borrow_mut().push(binding.get());
            }
        }));
        binding.set(2);
        binding.set(3);

        assert_eq!(*seen.borrow(), vec![2, 3]);
    }

    #[test]
    fn removed_listeners_stop_hearing() {
        let binding = ValueBinding::new(0);
        let hits = Rc::new(RefCell::new(0));

        let counter = Rc::clone(&hits);
        let listener: InvalidationListener = Rc::new(move || *counter.borrow_mut() += 1);
        binding.add_invalidation_listener(Rc::clone(&listener));
        binding.set(1);
        binding.remove_invalidation_listener(&listener);
        binding.set(2);

        assert_eq!(*hits.borrow(), 1);
        assert!(binding.hub().is_empty());
    }

    #[test]
    fn setting_the_same_value_still_fires() {
        let binding = ValueBinding::new(5);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&seen);
        binding.add_change_listener(Rc::new(move |old: &i32, new: &i32| {
            log.borrow_mut().push((*old, *new))
        }));
        binding.set(5);

        assert_eq!(*seen.borrow(), vec![(5, 5)]);
    }

    #[test]
    fn cache_follows_change_listener_lifetime() {
        let binding = ValueBinding::new(1);
        let listener: ChangeListener<i32> = Rc::new(|_: &i32, _: &i32| {});

        binding.add_change_listener(Rc::clone(&listener));
        assert_eq!(binding.hub().cached_value(), Some(1));

        binding.remove_change_listener(&listener);
        assert_eq!(binding.hub().cached_value(), None);

        binding.set(7);
        binding.add_change_listener(listener);
        assert_eq!(binding.hub().cached_value(), Some(7));
    }

    #[test]
    fn nested_set_reports_each_step() {
        let binding = Rc::new(ValueBinding::new(0));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let weak = Rc::downgrade(&binding);
        binding.add_change_listener(Rc::new(move |_: &i32, new: &i32| {
            if *new == 1 {
                if let Some(binding) = weak.upgrade() {
                    binding.set(2);
                }
            }
        }));
        let log = Rc::clone(&seen);
        binding.add_change_listener(Rc::new(move |old: &i32, new: &i32| {
            log.borrow_mut().push((*old, *new))
        }));

        binding.set(1);

        // The inner set completes before the outer fire reaches the second
        // listener, which then sees the outer pair.
        assert_eq!(*seen.borrow(), vec![(1, 2), (0, 1)]);
        assert_eq!(binding.get(), 2);
        assert_eq!(binding.hub().cached_value(), Some(2));
    }
}
