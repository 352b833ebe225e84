//! Log sink handed to the server.
//!
//! The server writes through a [`Logger`] it was given, using the `logger:` form of the `log`
//! macros with structured key-values, so every instance can report to its own sink. Records
//! still pass the global [`log::max_level`] filter. [`global`] forwards to whichever backend
//! the process installed (`env_logger` in the binaries).

use std::sync::Arc;

use log::{Log, Metadata, Record};

pub type Logger = Arc<dyn Log>;

pub fn global() -> Logger {
    Arc::new(GlobalLogger)
}

struct GlobalLogger;

impl Log for GlobalLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        log::logger().log(record)
    }

    fn flush(&self) {
        log::logger().flush()
    }
}
