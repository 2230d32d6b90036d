use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

/// A log record captured by [`ChannelLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// A `log::Log` that forwards records over a channel so another thread (a UI
/// console, a test) can drain them.
pub struct ChannelLogger {
    sender: Sender<LogMessage>,
    max_level: LevelFilter,
}

impl log::Log for ChannelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = self.sender.try_send(LogMessage {
                level: record.metadata().level(),
                target: record.target().to_string(),
                message: format!("{}", record.args()),
            });
        }
    }

    fn flush(&self) {}
}

impl ChannelLogger {
    pub fn new(sender: Sender<LogMessage>) -> Self {
        Self {
            sender,
            max_level: LevelFilter::Info,
        }
    }

    pub fn with_receiver() -> (Self, Receiver<LogMessage>) {
        let (sender, receiver) = unbounded();
        (Self::new(sender), receiver)
    }

    pub fn with_max_level(mut self, max_level: LevelFilter) -> Self {
        self.max_level = max_level;
        self
    }

    /// Install as the process-wide logger. Fails if one is already installed.
    pub fn install(self) -> Result<(), SetLoggerError> {
        let max_level = self.max_level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use log::Log;
    use std::sync::{Mutex, OnceLock};

    static CAPTURED: OnceLock<(Receiver<LogMessage>, Mutex<Vec<LogMessage>>)> = OnceLock::new();

    /// Everything logged at info and above since the first call, through a
    /// `ChannelLogger` installed as the process logger for this test binary.
    pub(crate) fn captured_logs() -> Vec<LogMessage> {
        let (receiver, seen) = CAPTURED.get_or_init(|| {
            let (logger, receiver) = ChannelLogger::with_receiver();
            logger.install().unwrap();
            (receiver, Mutex::new(Vec::new()))
        });
        let mut seen = seen.lock().unwrap();
        seen.extend(receiver.try_iter());
        seen.clone()
    }

    fn record_at(level: Level, logger: &ChannelLogger, message: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .target("uibridge::test")
                .args(format_args!("{message}"))
                .build(),
        );
    }

    #[test]
    fn forwards_enabled_records() {
        let (logger, receiver) = ChannelLogger::with_receiver();

        record_at(Level::Error, &logger, "listener panicked");

        let msg = receiver.try_recv().unwrap();
        assert_eq!(msg.level, Level::Error);
        assert_eq!(msg.target, "uibridge::test");
        assert_eq!(msg.message, "listener panicked");
    }

    #[test]
    fn drops_records_above_max_level() {
        let (logger, receiver) = ChannelLogger::with_receiver();

        record_at(Level::Debug, &logger, "too chatty");

        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn max_level_is_configurable() {
        let (logger, receiver) = ChannelLogger::with_receiver();
        let logger = logger.with_max_level(LevelFilter::Trace);

        record_at(Level::Trace, &logger, "wake-up posted");

        assert_eq!(receiver.try_recv().unwrap().message, "wake-up posted");
    }

    #[test]
    fn disconnected_receiver_is_ignored() {
        let (logger, receiver) = ChannelLogger::with_receiver();
        drop(receiver);

        record_at(Level::Warn, &logger, "nobody listening");
    }
}
