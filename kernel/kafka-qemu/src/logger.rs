use crate::qemu_trace;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// A [`log::Log`] backend that routes records to the QEMU debug console.
pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Install this logger. Call once during early init.
    ///
    /// # Errors
    /// Fails if a logger has already been installed.
    pub fn init(self) -> Result<(), SetLoggerError> {
        // `log::set_logger` wants a `&'static dyn Log`; in a no-alloc
        // kernel the instance lives in a static.
        static mut LOGGER: Option<QemuLogger> = None;

        let max_level = self.max_level;
        unsafe {
            let slot = &raw mut LOGGER;
            *slot = Some(self);
            match (*slot).as_ref() {
                Some(logger) => log::set_logger(logger as &'static dyn Log)?,
                None => unreachable!(),
            }
        }
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // "[LEVEL] target: message" — formatted straight into the sink.
        qemu_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        // no-op for the debug port
    }
}
