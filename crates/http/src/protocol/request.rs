//! Assembling parsed requests.
//!
//! The streaming parser reports a request piece by piece. [`RequestAssembler`] is the
//! [`RequestEvents`] implementation used by the server connection: it keeps the start line and
//! the headers of the request in flight, buffers its body and, on `on_done`, pushes the
//! complete `http::Request<Bytes>` onto its list of finished requests.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Uri, Version};
use tracing::warn;

use crate::parser::{MessageEvents, RequestEvents};

/// Splits a raw header line into its trimmed name and value.
pub fn split_header(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let colon = line.iter().position(|b| *b == b':')?;
    Some((line[..colon].trim_ascii(), line[colon + 1..].trim_ascii()))
}

#[derive(Debug)]
struct RequestHead {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
}

/// A request together with the close requirement of its connection.
pub type Assembled = (Request<Bytes>, bool);

#[derive(Debug, Default)]
pub struct RequestAssembler {
    head: Option<RequestHead>,
    body: BytesMut,
    invalid: Option<String>,
    finished: Vec<Assembled>,
}

impl RequestAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the requests completed so far, each with its `Connection: close` flag.
    pub fn take_finished(&mut self) -> Vec<Assembled> {
        std::mem::take(&mut self.finished)
    }

    /// The reason the last request could not be converted, if any.
    pub fn take_invalid(&mut self) -> Option<String> {
        self.invalid.take()
    }
}

fn parse_version(version: &str) -> Option<Version> {
    match version {
        "HTTP/1.1" => Some(Version::HTTP_11),
        "HTTP/1.0" => Some(Version::HTTP_10),
        "HTTP/0.9" => Some(Version::HTTP_09),
        _ => None,
    }
}

impl RequestEvents for RequestAssembler {
    fn on_request_start(&mut self, method: &str, target: &str, version: &str) {
        self.body.clear();

        let method = Method::from_bytes(method.as_bytes());
        let uri = target.parse::<Uri>();
        match (method, uri, parse_version(version)) {
            (Ok(method), Ok(uri), Some(version)) => {
                self.head = Some(RequestHead { method, uri, version, headers: HeaderMap::new() });
            }
            _ => {
                warn!(%target, %version, "unsupported request line");
                self.head = None;
                self.invalid = Some(format!("unsupported request line '{target}' {version}"));
            }
        }
    }
}

impl MessageEvents for RequestAssembler {
    fn on_header(&mut self, line: &[u8]) {
        let Some(head) = self.head.as_mut() else {
            return;
        };
        let Some((name, value)) = split_header(line) else {
            return;
        };

        match (HeaderName::from_bytes(name), HeaderValue::from_bytes(value)) {
            (Ok(name), Ok(value)) => {
                head.headers.append(name, value);
            }
            _ => {
                warn!(header = %String::from_utf8_lossy(line), "dropping invalid header");
            }
        }
    }

    fn on_data(&mut self, data: &[u8]) {
        if self.head.is_some() {
            self.body.extend_from_slice(data);
        }
    }

    fn on_done(&mut self, require_close: bool) {
        let Some(head) = self.head.take() else {
            return;
        };

        let mut request = Request::new(self.body.split().freeze());
        *request.method_mut() = head.method;
        *request.uri_mut() = head.uri;
        *request.version_mut() = head.version;
        *request.headers_mut() = head.headers;

        let require_close = require_close || head.version == Version::HTTP_10;
        self.finished.push((request, require_close));
    }
}
