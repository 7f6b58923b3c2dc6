//! Logging facade for the secrets management core
//!
//! The core logs every failure at the cryptographic boundary with the
//! provider id and key id involved, never with key material. By default
//! logging is disabled and uses a no-op implementation; embedders install
//! their own sink with [`set_logger`].

use std::sync::RwLock;

/// Logger interface for the secrets management core
pub trait Logger: Send + Sync {
    /// Log a debug message
    fn debug(&self, message: &str);

    /// Log an informational message
    fn info(&self, message: &str);

    /// Log a warning
    fn warn(&self, message: &str);

    /// Log an error
    fn error(&self, message: &str);
}

/// A no-op logger that discards all messages
#[derive(Debug, Default)]
pub struct NoopLogger;

impl NoopLogger {
    /// Create a new no-op logger
    pub fn new() -> Self {
        Self
    }

    /// Create a boxed instance ready for use with set_logger
    pub fn boxed() -> Box<dyn Logger> {
        Box::new(Self::new())
    }
}

impl Logger for NoopLogger {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// A simple logger that writes level-prefixed lines to standard output
#[derive(Debug, Default)]
pub struct StdoutLogger;

impl StdoutLogger {
    /// Create a new stdout logger
    pub fn new() -> Self {
        Self
    }

    /// Create a boxed instance ready for use with set_logger
    pub fn boxed() -> Box<dyn Logger> {
        Box::new(Self::new())
    }
}

impl Logger for StdoutLogger {
    fn debug(&self, message: &str) {
        println!("[DEBUG] {}", message);
    }

    fn info(&self, message: &str) {
        println!("[INFO] {}", message);
    }

    fn warn(&self, message: &str) {
        println!("[WARN] {}", message);
    }

    fn error(&self, message: &str) {
        println!("[ERROR] {}", message);
    }
}

// Global logger (default to noop)
static LOGGER: RwLock<Option<Box<dyn Logger>>> = RwLock::new(None);

/// Set the logger for the secrets management core
pub fn set_logger(logger: Box<dyn Logger>) {
    let mut global_logger = LOGGER.write().unwrap();
    *global_logger = Some(logger);
}

/// Check if a logger is installed
pub fn logging_enabled() -> bool {
    LOGGER.read().unwrap().is_some()
}

/// Log a debug message
pub fn debug(message: &str) {
    if let Some(logger) = LOGGER.read().unwrap().as_ref() {
        logger.debug(message);
    }
}

/// Log an informational message
pub fn info(message: &str) {
    if let Some(logger) = LOGGER.read().unwrap().as_ref() {
        logger.info(message);
    }
}

/// Log a warning
pub fn warn(message: &str) {
    if let Some(logger) = LOGGER.read().unwrap().as_ref() {
        logger.warn(message);
    }
}

/// Log an error
pub fn error(message: &str) {
    if let Some(logger) = LOGGER.read().unwrap().as_ref() {
        logger.error(message);
    }
}

/// Installs a logger for the duration of a scope, restoring the previous
/// logger on drop
pub struct LoggingGuard {
    previous_logger: Option<Box<dyn Logger>>,
}

impl LoggingGuard {
    /// Create a new logging guard with the given logger
    pub fn new(logger: Box<dyn Logger>) -> Self {
        let previous_logger = {
            let mut global_logger = LOGGER.write().unwrap();
            std::mem::replace(&mut *global_logger, Some(logger))
        };

        Self { previous_logger }
    }
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        let mut global_logger = LOGGER.write().unwrap();
        *global_logger = self.previous_logger.take();
    }
}
