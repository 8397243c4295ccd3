use std::fmt;

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use thiserror::Error;

use super::HttpRequest;
use crate::protocol::split_header;
use crate::socket::ConnectionResult;

/// Completion code of a client request, `None` on success.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HttpClientError {
    #[error("no error")]
    None = 0,

    #[error("unknown error")]
    Unknown = 1,

    #[error("request timed out")]
    Timeout = 2,

    #[error("host not found")]
    HostNotFound = 3,

    #[error("could not connect")]
    CouldNotConnect = 4,

    #[error("failed to send the request")]
    SendFailed = 5,

    #[error("invalid response")]
    ParseFailed = 6,
}

impl HttpClientError {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == HttpClientError::None
    }
}

impl From<ConnectionResult> for HttpClientError {
    fn from(result: ConnectionResult) -> Self {
        match result {
            ConnectionResult::Success => HttpClientError::None,
            ConnectionResult::UnknownError => HttpClientError::Unknown,
            ConnectionResult::CouldNotConnect => HttpClientError::CouldNotConnect,
            ConnectionResult::HostUnknown => HttpClientError::HostNotFound,
            ConnectionResult::Timeout => HttpClientError::Timeout,
        }
    }
}

/// Receives the response to one request.
///
/// Every method runs on the worker thread handling the connection. `on_done` is called exactly
/// once per request, on success as well as on failure.
pub trait HttpClientCallbacks: Send {
    fn on_response_start(&mut self, _request: &HttpRequest, _version: &str, _code: u16) {}

    /// One raw header line, e.g. `Content-Type: text/plain`.
    fn on_header(&mut self, _request: &HttpRequest, _line: &[u8]) {}

    fn on_data(&mut self, _request: &HttpRequest, _data: &[u8]) {}

    fn on_done(&mut self, request: &HttpRequest, error: HttpClientError);
}

/// The collected response handed to [`SimpleCallbacks`].
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Collects status, headers and body, then calls one closure when the request completes.
pub struct SimpleCallbacks<F> {
    on_response: Option<F>,
    status: u16,
    headers: HeaderMap,
    body: BytesMut,
}

impl<F> SimpleCallbacks<F>
where
    F: FnOnce(&HttpRequest, HttpClientError, HttpResponse) + Send,
{
    pub fn new(on_response: F) -> Self {
        Self { on_response: Some(on_response), status: 0, headers: HeaderMap::new(), body: BytesMut::new() }
    }
}

impl<F> HttpClientCallbacks for SimpleCallbacks<F>
where
    F: FnOnce(&HttpRequest, HttpClientError, HttpResponse) + Send,
{
    fn on_response_start(&mut self, _request: &HttpRequest, _version: &str, code: u16) {
        self.status = code;
    }

    fn on_header(&mut self, _request: &HttpRequest, line: &[u8]) {
        let Some((name, value)) = split_header(line) else {
            return;
        };
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name), HeaderValue::from_bytes(value)) {
            self.headers.append(name, value);
        }
    }

    fn on_data(&mut self, _request: &HttpRequest, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    fn on_done(&mut self, request: &HttpRequest, error: HttpClientError) {
        let response = HttpResponse {
            status: self.status,
            headers: std::mem::take(&mut self.headers),
            body: self.body.split().freeze(),
        };
        if let Some(on_response) = self.on_response.take() {
            on_response(request, error, response);
        }
    }
}

impl<F> fmt::Debug for SimpleCallbacks<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleCallbacks").field("status", &self.status).field("body_len", &self.body.len()).finish_non_exhaustive()
    }
}
