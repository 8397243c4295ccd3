use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReactorError {
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("descriptor {fd} is already registered")]
    AlreadyRegistered { fd: i32 },

    #[error("transport {id} is not registered")]
    NotRegistered { id: u64 },

    #[error("endpoint '{name}' is already running")]
    AlreadyRunning { name: String },

    #[error("endpoint '{name}' is shutting down")]
    ShuttingDown { name: String },

    #[error("timer {id} is not registered")]
    UnknownTimer { id: u64 },

    #[error("invalid timer period: {reason}")]
    InvalidPeriod { reason: String },
}

impl ReactorError {
    pub fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }

    pub fn last_os_error(op: &'static str) -> Self {
        Self::Io { op, source: io::Error::last_os_error() }
    }

    pub fn invalid_period<S: ToString>(str: S) -> Self {
        Self::InvalidPeriod { reason: str.to_string() }
    }

    /// The raw OS error code, if this error came from a failed syscall.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
