use std::any::Any;

use crate::schedule::TimeUnit;

/// Errors raised by the scheduler, the listener hub and the event loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// A delay was negative or beyond what the timer can represent.
    #[error("invalid delay {delay} {unit:?}: the timer only accepts non-negative delays up to {max_millis} milliseconds")]
    InvalidDelay {
        delay: i64,
        unit: TimeUnit,
        max_millis: u64,
    },

    /// A listener panicked while being notified.
    #[error("listener panicked: {message}")]
    ListenerPanicked { message: String },

    /// A scheduled action panicked while the worker was draining.
    #[error("scheduled action panicked: {message}")]
    ActionPanicked { message: String },

    /// The event loop's thread could not be started.
    #[error("failed to spawn event loop thread {name:?}: {message}")]
    LoopSpawn { name: String, message: String },

    /// The event loop shut down before the task could run.
    #[error("event loop closed before the task completed")]
    LoopClosed,
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Best effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_from_str_payload() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }

    #[test]
    fn panic_message_from_string_payload() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("formatted boom"));
        assert_eq!(panic_message(payload.as_ref()), "formatted boom");
    }

    #[test]
    fn panic_message_from_other_payload() {
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "<non-string panic payload>");
    }

    #[test]
    fn invalid_delay_display_names_the_limit() {
        let err = BridgeError::InvalidDelay {
            delay: -1,
            unit: TimeUnit::Milliseconds,
            max_millis: 10,
        };
        let text = err.to_string();
        assert!(text.contains("-1"));
        assert!(text.contains("up to 10 milliseconds"));
    }
}
