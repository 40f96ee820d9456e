use thiserror::Error;

use crate::event::EventType;

/// Errors raised by the scan core.
///
/// Module handlers return `anyhow::Result`; anything they bubble up that
/// downcasts to one of these variants is classified by `Scan::catch`.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Malformed event data. The offending event is dropped, its parent carries on.
    #[error("invalid {event_type} \"{value}\": {reason}")]
    Validation {
        event_type: EventType,
        value: String,
        reason: String,
    },
    /// Cooperative cancellation. Unwinds silently.
    #[error("scan cancelled")]
    Cancelled,
    #[error("task pool \"{0}\" is shut down")]
    PoolShutdown(&'static str),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub fn validation(event_type: EventType, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ScanError::Validation {
            event_type,
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, ScanError::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe)
    }
}
