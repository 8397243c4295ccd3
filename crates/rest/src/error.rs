use std::error::Error;
use std::io;

use micro_http::protocol::SocketError;
use micro_reactor::ReactorError;
use thiserror::Error;

/// The error a route handler or object extractor may return.
///
/// The router answers it with a 500 response.
pub type HandlerError = Box<dyn Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("can't add a sub-route to a terminal route")]
    TerminalRouter,

    #[error("invalid path regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("no object at index {index}, the context holds {len}")]
    InvalidObject { index: isize, len: usize },

    #[error("object at index {index} is a {actual}, not a {expected}")]
    ObjectType { index: isize, expected: &'static str, actual: &'static str },

    #[error("refusing to serve path '{path}'")]
    ForbiddenPath { path: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl RouterError {
    pub fn invalid_regex<S: ToString>(pattern: S, source: regex::Error) -> Self {
        Self::InvalidRegex { pattern: pattern.to_string(), source }
    }

    pub fn forbidden_path<S: ToString>(path: S) -> Self {
        Self::ForbiddenPath { path: path.to_string() }
    }
}

/// A bound handler argument could not be taken from the request. Answered with 400.
#[derive(Error, Debug)]
pub enum BindingError {
    #[error("missing query parameter '{name}'")]
    MissingParam { name: String },

    #[error("no path resource at index {index}, the request has {len}")]
    MissingResource { index: isize, len: usize },

    #[error("cannot decode {location} '{name}': {reason}")]
    Decode { location: &'static str, name: String, reason: String },
}

impl BindingError {
    pub fn decode<N: ToString, S: ToString>(location: &'static str, name: N, reason: S) -> Self {
        Self::Decode { location, name: name.to_string(), reason: reason.to_string() }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("router must be set")]
    MissingRouter,

    #[error("reactor error: {source}")]
    Reactor {
        #[from]
        source: ReactorError,
    },

    #[error("socket error: {source}")]
    Socket {
        #[from]
        source: SocketError,
    },
}
