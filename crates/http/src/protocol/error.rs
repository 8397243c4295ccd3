use std::io;
use micro_reactor::ReactorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid start line: {reason}")]
    InvalidStartLine { reason: String },

    #[error("invalid http version: {version}")]
    InvalidVersion { version: String },

    #[error("invalid status code: {code}")]
    InvalidStatusCode { code: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("expected \\n")]
    ExpectedLineFeed,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid chunk size: {reason}")]
    InvalidChunkSize { reason: String },
}

impl ParseError {
    pub fn invalid_start_line<S: ToString>(str: S) -> Self {
        Self::InvalidStartLine { reason: str.to_string() }
    }

    pub fn invalid_version(version: &[u8]) -> Self {
        Self::InvalidVersion { version: String::from_utf8_lossy(version).into_owned() }
    }

    pub fn invalid_status_code(code: &[u8]) -> Self {
        Self::InvalidStatusCode { code: String::from_utf8_lossy(code).into_owned() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn invalid_chunk_size<S: ToString>(str: S) -> Self {
        Self::InvalidChunkSize { reason: str.to_string() }
    }
}

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme '{scheme}'")]
    UnsupportedScheme { scheme: String },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("cannot encode query parameters: {source}")]
    Query {
        #[from]
        source: serde_urlencoded::ser::Error,
    },
}

impl RequestError {
    pub fn invalid_url<U: ToString, S: ToString>(url: U, reason: S) -> Self {
        Self::InvalidUrl { url: url.to_string(), reason: reason.to_string() }
    }

    pub fn invalid_header<N: ToString, S: ToString>(name: N, reason: S) -> Self {
        Self::InvalidHeader { name: name.to_string(), reason: reason.to_string() }
    }
}

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("invalid socket state: expected {expected}, was {actual}")]
    InvalidState { expected: &'static str, actual: &'static str },

    #[error("socket is not connected")]
    NotConnected,

    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("reactor error: {source}")]
    Reactor {
        #[from]
        source: ReactorError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SocketError {
    pub fn invalid_address<A: ToString, S: ToString>(address: A, reason: S) -> Self {
        Self::InvalidAddress { address: address.to_string(), reason: reason.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
