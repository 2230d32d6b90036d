//! Destination for failures nobody else handled.
//!
//! Listener callbacks and scheduled actions run on the consumer thread with no
//! caller to report back to. When one of them panics the panic is caught and
//! turned into a [`BridgeError`], which is then handed to an [`ErrorSink`].

use log::error;

use crate::error::BridgeError;

/// Receives errors escaping listener callbacks or scheduled actions.
pub trait ErrorSink: Send + Sync {
    fn uncaught(&self, error: BridgeError);
}

/// The default sink: writes every uncaught error to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn uncaught(&self, error: BridgeError) {
        error!("uncaught error on consumer thread: {error}");
    }
}

impl<F> ErrorSink for F
where
    F: Fn(BridgeError) + Send + Sync,
{
    fn uncaught(&self, error: BridgeError) {
        self(error)
    }
}
