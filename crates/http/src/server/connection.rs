use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderValue, Request, Response, StatusCode, header};
use micro_reactor::{Interest, Readiness, Transport, TransportCore};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::RequestHandler;
use crate::parser::RequestParser;
use crate::protocol::{RequestAssembler, SocketError, encode_response};

const STREAM_TOKEN: u64 = 1;
const READ_BUFFER_SIZE: usize = 16 * 1024;

struct Inbound {
    parser: RequestParser,
    assembler: RequestAssembler,
}

#[derive(Default)]
struct Outbox {
    pending: BytesMut,
    /// Requests handed to the handler and not answered yet.
    outstanding: usize,
    close_after_flush: bool,
}

/// One accepted peer: parses its requests and writes back the responses.
///
/// Requests are handed to the [`RequestHandler`] with no lock held. Responses come back
/// through a [`ResponseSender`] which posts them to the connection with `do_async`, so the
/// socket is only ever written from the worker thread handling this transport.
pub struct ServerConnection {
    core: TransportCore,
    weak_self: Weak<ServerConnection>,
    stream: TcpStream,
    handler: Arc<dyn RequestHandler>,
    inbound: Mutex<Inbound>,
    outbox: Mutex<Outbox>,
    closing: AtomicBool,
}

impl ServerConnection {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr, handler: Arc<dyn RequestHandler>) -> Result<Arc<Self>, SocketError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;

        let core = TransportCore::new(peer.to_string())?;
        core.poller().add_fd_one_shot(stream.as_raw_fd(), STREAM_TOKEN, Interest::READABLE)?;

        Ok(Arc::new_cyclic(|weak_self| Self {
            core,
            weak_self: Weak::clone(weak_self),
            stream,
            handler,
            inbound: Mutex::new(Inbound { parser: RequestParser::new(), assembler: RequestAssembler::new() }),
            outbox: Mutex::new(Outbox::default()),
            closing: AtomicBool::new(false),
        }))
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            debug!(peer = %self.core.peer_name(), "closing server connection");
            self.core.close_when_handler_finished();
        }
    }

    fn handle_stream_event(&self, readiness: Readiness, requests: &mut Vec<(Request<Bytes>, bool)>) -> Result<(), SocketError> {
        if readiness.is_writable() {
            self.flush()?;
        }
        if readiness.is_readable() {
            self.read_requests(requests)?;
        }
        if readiness.is_error() || (readiness.is_hup() && !readiness.is_readable()) {
            trace!(peer = %self.core.peer_name(), ?readiness, "peer hung up");
            self.close();
        }
        Ok(())
    }

    fn read_requests(&self, requests: &mut Vec<(Request<Bytes>, bool)>) -> Result<(), SocketError> {
        let mut buffer = [0u8; READ_BUFFER_SIZE];

        while !self.is_closing() {
            let len = match (&self.stream).read(&mut buffer) {
                Ok(0) => {
                    self.handle_peer_closed();
                    return Ok(());
                }
                Ok(len) => len,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    self.close();
                    return Ok(());
                }
                Err(e) => return Err(SocketError::io(e)),
            };

            let mut inbound = self.inbound.lock();
            let Inbound { parser, assembler } = &mut *inbound;
            let parsed = parser.feed(&buffer[..len], assembler);
            requests.extend(assembler.take_finished());

            let invalid = match parsed {
                Ok(()) => assembler.take_invalid(),
                Err(e) => Some(e.to_string()),
            };
            if let Some(reason) = invalid {
                drop(inbound);
                warn!(peer = %self.core.peer_name(), %reason, "bad request");
                self.reject(&reason)?;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Answers a malformed request with 400 and closes once it is written.
    fn reject(&self, reason: &str) -> Result<(), SocketError> {
        let response = Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header(header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.as_ref())
            .header(header::CONNECTION, "close")
            .body(Bytes::from(reason.to_string()));
        match response {
            Ok(response) => {
                let mut outbox = self.outbox.lock();
                encode_response(response, &mut outbox.pending);
                outbox.close_after_flush = true;
            }
            Err(e) => {
                error!(cause = %e, "cannot build bad request response");
                self.close();
            }
        }
        self.flush()
    }

    fn handle_peer_closed(&self) {
        let idle = {
            let mut outbox = self.outbox.lock();
            outbox.close_after_flush = true;
            outbox.outstanding == 0 && outbox.pending.is_empty()
        };
        trace!(peer = %self.core.peer_name(), idle, "peer closed its side");
        if idle {
            self.close();
        }
    }

    /// Hands freshly parsed requests to the handler.
    fn dispatch_requests(&self, requests: Vec<(Request<Bytes>, bool)>) {
        if requests.is_empty() {
            return;
        }
        self.outbox.lock().outstanding += requests.len();

        for (request, require_close) in requests {
            trace!(peer = %self.core.peer_name(), method = %request.method(), uri = %request.uri(), "request");
            let sender = ResponseSender { connection: Weak::clone(&self.weak_self), require_close, sent: false };
            self.handler.handle(request, sender);
        }
    }

    fn queue_response(&self, mut response: Response<Bytes>, require_close: bool) {
        if self.is_closing() {
            trace!(peer = %self.core.peer_name(), "dropping response for a closing connection");
            return;
        }
        if require_close {
            response.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        {
            let mut outbox = self.outbox.lock();
            encode_response(response, &mut outbox.pending);
            outbox.outstanding = outbox.outstanding.saturating_sub(1);
            outbox.close_after_flush |= require_close;
        }
        if let Err(e) = self.flush() {
            warn!(peer = %self.core.peer_name(), cause = %e, "cannot send response");
            self.close();
        }
    }

    /// Writes as much of the outbox as the socket accepts.
    fn flush(&self) -> Result<(), SocketError> {
        let mut outbox = self.outbox.lock();
        while !outbox.pending.is_empty() {
            match (&self.stream).write(&outbox.pending) {
                Ok(0) => {
                    drop(outbox);
                    self.close();
                    return Ok(());
                }
                Ok(sent) => outbox.pending.advance(sent),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if matches!(e.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) => {
                    drop(outbox);
                    debug!(peer = %self.core.peer_name(), cause = %e, "peer went away");
                    self.close();
                    return Ok(());
                }
                Err(e) => return Err(SocketError::io(e)),
            }
        }

        let done = outbox.close_after_flush && outbox.outstanding == 0;
        drop(outbox);
        if done {
            self.close();
        }
        Ok(())
    }

    fn rearm(&self) -> Result<(), SocketError> {
        let interest = if self.outbox.lock().pending.is_empty() { Interest::READABLE } else { Interest::BOTH };
        self.core.poller().restart_fd_one_shot(self.stream.as_raw_fd(), STREAM_TOKEN, interest)?;
        Ok(())
    }
}

impl Transport for ServerConnection {
    fn core(&self) -> &TransportCore {
        &self.core
    }

    fn handle_events(&self) {
        let mut requests = Vec::new();
        let mut failures: Vec<SocketError> = Vec::new();

        let result = self.core.dispatch(|token, readiness| {
            if token != STREAM_TOKEN {
                warn!(token, ?readiness, "unexpected token");
                return;
            }
            if let Err(e) = self.handle_stream_event(readiness, &mut requests) {
                failures.push(e);
            }
        });
        if let Err(e) = result {
            failures.push(e.into());
        }

        self.dispatch_requests(requests);

        if !failures.is_empty() {
            for failure in failures {
                warn!(peer = %self.core.peer_name(), cause = %failure, "server connection failure");
            }
            self.close();
        }

        if !self.is_closing() {
            if let Err(e) = self.rearm() {
                warn!(peer = %self.core.peer_name(), cause = %e, "cannot re-arm connection");
                self.close();
            }
        }
    }

    fn close_peer(&self) {
        if let Err(e) = self.core.poller().remove_fd(self.stream.as_raw_fd()) {
            trace!(cause = %e, "stream already deregistered");
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            trace!(cause = %e, "stream already shut down");
        }
    }

    fn status(&self) -> String {
        let (pending, outstanding) = self.outbox.try_lock().map_or((0, 0), |outbox| (outbox.pending.len(), outbox.outstanding));
        format!("server connection {} pending {} outstanding {} closing {}", self.core.peer_name(), pending, outstanding, self.is_closing())
    }
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection").field("core", &self.core).field("closing", &self.is_closing()).finish_non_exhaustive()
    }
}

/// Sends the response to one request, from any thread.
///
/// A sender dropped without sending answers the request with 500.
pub struct ResponseSender {
    connection: Weak<ServerConnection>,
    require_close: bool,
    sent: bool,
}

impl ResponseSender {
    /// Queues `response` on the connection. Returns `false` when the connection is gone.
    pub fn send(mut self, response: Response<Bytes>) -> bool {
        self.sent = true;
        self.post(response)
    }

    /// Whether the peer asked to close the connection after this response.
    pub fn require_close(&self) -> bool {
        self.require_close
    }

    pub fn is_connected(&self) -> bool {
        self.connection.upgrade().is_some_and(|connection| !connection.is_closing())
    }

    fn post(&self, response: Response<Bytes>) -> bool {
        let Some(connection) = self.connection.upgrade() else {
            return false;
        };
        let target = Arc::clone(&connection);
        let require_close = self.require_close;
        match connection.core.do_async("send response", move || target.queue_response(response, require_close)) {
            Ok(()) => true,
            Err(e) => {
                warn!(peer = %connection.core.peer_name(), cause = %e, "cannot post response");
                false
            }
        }
    }
}

impl Drop for ResponseSender {
    fn drop(&mut self) {
        if self.sent {
            return;
        }
        warn!("request dropped without a response");
        let mut response = Response::new(Bytes::new());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        self.post(response);
    }
}

impl fmt::Debug for ResponseSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSender").field("require_close", &self.require_close).field("sent", &self.sent).finish_non_exhaustive()
    }
}
