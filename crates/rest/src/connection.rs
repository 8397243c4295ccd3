use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::error;

use crate::request::RestParams;

/// Where a request handler writes its single response.
///
/// Only [`send_http_response`](RestConnection::send_http_response) has to be implemented, the
/// other senders are expressed through it. Implementations are shared between threads, so a
/// handler answering later keeps a [`capture`](RestConnection::capture)d handle.
pub trait RestConnection: Send + Sync {
    fn send_http_response(&self, code: StatusCode, body: Bytes, content_type: &str, headers: RestParams);

    fn response_sent(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// A handle to the same connection that outlives the handler call.
    fn capture(&self) -> Arc<dyn RestConnection>;

    fn send_response(&self, code: StatusCode, body: Bytes, content_type: &str) {
        self.send_http_response(code, body, content_type, RestParams::new());
    }

    fn send_json_response(&self, code: StatusCode, value: &Value) {
        self.send_http_response(code, Bytes::from(value.to_string()), mime::APPLICATION_JSON.as_ref(), RestParams::new());
    }

    fn send_error_response(&self, code: StatusCode, error: &str) {
        self.send_http_response(code, Bytes::from(error.to_string()), mime::TEXT_PLAIN.as_ref(), RestParams::new());
    }

    fn send_redirect(&self, code: StatusCode, location: &str) {
        let headers = [("Location", location)].into_iter().collect();
        self.send_http_response(code, Bytes::new(), "", headers);
    }
}

#[derive(Debug, Default)]
struct Recorded {
    code: Option<StatusCode>,
    body: Bytes,
    content_type: String,
    headers: RestParams,
}

/// A connection that keeps the response in memory, for calling a router without a socket.
///
/// Clones and captured handles share the recorded response.
#[derive(Clone, Default)]
pub struct InProcessRestConnection {
    recorded: Arc<Mutex<Recorded>>,
}

impl InProcessRestConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until a response was sent.
    pub fn response_code(&self) -> Option<StatusCode> {
        self.recorded.lock().code
    }

    pub fn body(&self) -> Bytes {
        self.recorded.lock().body.clone()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.recorded.lock().body).into_owned()
    }

    pub fn content_type(&self) -> String {
        self.recorded.lock().content_type.clone()
    }

    pub fn headers(&self) -> RestParams {
        self.recorded.lock().headers.clone()
    }
}

impl RestConnection for InProcessRestConnection {
    fn send_http_response(&self, code: StatusCode, body: Bytes, content_type: &str, headers: RestParams) {
        let mut recorded = self.recorded.lock();
        if let Some(previous) = recorded.code {
            error!(%previous, %code, "response already sent, ignoring the second one");
            return;
        }
        *recorded = Recorded { code: Some(code), body, content_type: content_type.to_string(), headers };
    }

    fn response_sent(&self) -> bool {
        self.recorded.lock().code.is_some()
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn capture(&self) -> Arc<dyn RestConnection> {
        Arc::new(self.clone())
    }
}

impl fmt::Debug for InProcessRestConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let recorded = self.recorded.lock();
        f.debug_struct("InProcessRestConnection").field("code", &recorded.code).field("content_type", &recorded.content_type).finish_non_exhaustive()
    }
}
