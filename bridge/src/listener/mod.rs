//! Listener registries for observable values.
//!
//! [`ListenerHub`] stores the listeners of one value and fans out change
//! notifications. [`ValueBinding`] is the simplest owner of a hub: a cell that
//! fires on every write.

mod binding;
mod hub;

pub use binding::ValueBinding;
pub use hub::{ChangeListener, InvalidationListener, ListenerHub, ValueSource};
