//! Log records returned by the state machines.
//!
//! State machines never log directly. They return a [`LogRecord`] inside their
//! action list and the driver forwards it to its logging backend.

use std::fmt;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Something unexpected that was tolerated
    Warn,
    /// Something failed
    Error,
}

/// A message the driver should log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Severity
    pub level: LogLevel,
    /// Message text
    pub message: String,
}

impl LogRecord {
    /// Record at debug level.
    pub fn debug(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Debug, message: message.into() }
    }

    /// Record at info level.
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Info, message: message.into() }
    }

    /// Record at warn level.
    pub fn warn(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Warn, message: message.into() }
    }

    /// Record at error level.
    pub fn error(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Error, message: message.into() }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.level, self.message)
    }
}
