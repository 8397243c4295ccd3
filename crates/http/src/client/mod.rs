//! A pooled HTTP/1.1 client driven by a reactor endpoint.
//!
//! [`HttpClient`] keeps a fixed number of keep-alive connections to one base url. Requests
//! are pushed onto a bounded queue without blocking; a queue transport hands them to the next
//! free connection, or appends them to a FIFO backlog that connections drain as they finish.
//!
//! ```no_run
//! use micro_http::client::{HttpClient, HttpClientConfig, SimpleCallbacks};
//! use micro_reactor::{Endpoint, EndpointConfig};
//!
//! let endpoint = Endpoint::new(EndpointConfig::new("client").num_threads(2)).unwrap();
//! endpoint.spinup_with_config().unwrap();
//!
//! let client = HttpClient::new(&endpoint.handle(), "http://localhost:8080", HttpClientConfig::new()).unwrap();
//! let accepted = client
//!     .get("/items", &[("page", "2")], SimpleCallbacks::new(|_request, error, response| {
//!         println!("{error}: {} {:?}", response.status, response.body);
//!     }))
//!     .unwrap();
//! assert!(accepted);
//! ```

mod callbacks;
mod connection;
mod queue;
mod request;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use http::{Method, Uri};
use micro_reactor::{EndpointHandle, TimerId, Transport};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

pub use callbacks::{HttpClientCallbacks, HttpClientError, HttpResponse, SimpleCallbacks};
pub use connection::SEND_SIZE;
pub use request::{HttpContent, HttpRequest, build_request_head};

use crate::ensure;
use crate::protocol::{RequestError, SocketError};
use crate::socket::ClientSocketConfig;
use connection::{HttpConnection, PendingRequest};
use queue::RequestQueue;

/// How often in-flight requests are checked against their deadline.
const TIMEOUT_CHECK_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    num_parallel: usize,
    queue_size: usize,
    timeout: Option<Duration>,
}

impl HttpClientConfig {
    pub fn new() -> Self {
        Self { num_parallel: 4, queue_size: 32, timeout: None }
    }

    /// Number of pooled connections.
    pub fn num_parallel(mut self, num_parallel: usize) -> Self {
        self.num_parallel = num_parallel.max(1);
        self
    }

    /// Capacity of the request queue, beyond which `enqueue_request` is refused.
    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size.max(1);
        self
    }

    /// Timeout applied to requests that do not carry their own.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct PoolState {
    /// Indexes of idle connections, the most recently released last.
    free: Vec<usize>,
    backlog: VecDeque<PendingRequest>,
}

/// Connections plus the scheduling state shared by the queue and the connections.
pub(crate) struct Pool {
    state: Mutex<PoolState>,
    connections: OnceCell<Vec<HttpConnection>>,
    closing: AtomicBool,
}

impl Pool {
    fn new() -> Self {
        Self { state: Mutex::new(PoolState::default()), connections: OnceCell::new(), closing: AtomicBool::new(false) }
    }

    fn connections(&self) -> &[HttpConnection] {
        self.connections.get().map_or(&[], Vec::as_slice)
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Starts `pending` on a free connection, or appends it to the backlog.
    pub(crate) fn handle_queue_event(&self, pending: PendingRequest) {
        if self.is_closing() {
            pending.fail(HttpClientError::Unknown);
            return;
        }

        let index = {
            let mut state = self.state.lock();
            match state.free.pop() {
                Some(index) => index,
                None => {
                    trace!(backlog = state.backlog.len() + 1, "no free connection");
                    state.backlog.push_back(pending);
                    return;
                }
            }
        };
        self.perform(index, pending);
    }

    /// A connection finished its request: it takes the oldest backlogged request or becomes
    /// free again.
    pub(crate) fn connection_done(&self, index: usize) {
        let next = {
            let mut state = self.state.lock();
            let next = state.backlog.pop_front();
            if next.is_none() {
                state.free.push(index);
            }
            next
        };

        if let Some(pending) = next {
            if self.is_closing() {
                pending.fail(HttpClientError::Unknown);
            } else {
                self.perform(index, pending);
            }
        }
    }

    fn perform(&self, index: usize, pending: PendingRequest) {
        match self.connections().get(index) {
            Some(connection) => connection.perform(pending),
            None => {
                warn!(index, "no such connection");
                pending.fail(HttpClientError::Unknown);
            }
        }
    }

    fn check_timeouts(&self, now: Instant) {
        for connection in self.connections() {
            connection.check_timeout(now);
        }
    }

    fn backlog_len(&self) -> usize {
        self.state.lock().backlog.len()
    }

    fn drain_backlog(&self) -> Vec<PendingRequest> {
        self.state.lock().backlog.drain(..).collect()
    }
}

/// A pooled client for one `http://host[:port]` base url.
pub struct HttpClient {
    base_url: String,
    config: HttpClientConfig,
    pool: Arc<Pool>,
    queue: Arc<RequestQueue>,
    endpoint: EndpointHandle,
    timeout_timer: TimerId,
}

impl HttpClient {
    /// Creates the pooled connections and registers them with `endpoint`.
    ///
    /// Connections are opened lazily by the first request each one serves.
    pub fn new(endpoint: &EndpointHandle, base_url: &str, config: HttpClientConfig) -> Result<Self, SocketError> {
        let uri = base_url.parse::<Uri>().map_err(|e| SocketError::invalid_address(base_url, e))?;
        ensure!(uri.scheme_str() == Some("http"), SocketError::invalid_address(base_url, "only http:// is supported"));
        let host = match uri.host() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(SocketError::invalid_address(base_url, "missing host")),
        };
        let port = uri.port_u16().unwrap_or(80);

        let pool = Arc::new(Pool::new());
        let mut connections = Vec::with_capacity(config.num_parallel);
        for index in 0..config.num_parallel {
            connections.push(HttpConnection::new(index, Arc::downgrade(&pool), &host, port, ClientSocketConfig::new())?);
        }
        for connection in &connections {
            endpoint.notify_new_transport(Arc::clone(connection.socket()) as Arc<dyn Transport>)?;
        }
        // the highest index sits on top of the free list and serves first
        pool.state.lock().free = (0..connections.len()).collect();
        if pool.connections.set(connections).is_err() {
            return Err(SocketError::InvalidState { expected: "new pool", actual: "initialized pool" });
        }

        let queue = Arc::new(RequestQueue::new(&format!("{host}:{port}"), config.queue_size, Arc::downgrade(&pool))?);
        endpoint.notify_new_transport(Arc::clone(&queue) as Arc<dyn Transport>)?;

        let watched: Weak<Pool> = Arc::downgrade(&pool);
        let timeout_timer = endpoint.add_periodic(TIMEOUT_CHECK_PERIOD, move |_| {
            if let Some(pool) = watched.upgrade() {
                pool.check_timeouts(Instant::now());
            }
        })?;

        info!(%host, port, num_parallel = config.num_parallel, queue_size = config.queue_size, "http client created");
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), config, pool, queue, endpoint: endpoint.clone(), timeout_timer })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds a request for `resource` below the base url.
    pub fn request<K: AsRef<str>, V: AsRef<str>>(&self, verb: Method, resource: &str, query: &[(K, V)]) -> Result<HttpRequest, RequestError> {
        let separator = if resource.starts_with('/') { "" } else { "/" };
        let request = HttpRequest::new(verb, &format!("{}{separator}{resource}", self.base_url))?.with_query(query)?;
        Ok(match self.config.timeout {
            Some(timeout) => request.with_timeout(timeout),
            None => request,
        })
    }

    /// Queues `request` without blocking. Returns `false` when the queue is full or the client
    /// is closing; `callbacks` is dropped in that case and never called.
    pub fn enqueue_request(&self, request: HttpRequest, callbacks: impl HttpClientCallbacks + 'static) -> bool {
        if self.pool.is_closing() {
            return false;
        }
        let pending = PendingRequest { request, callbacks: Box::new(callbacks) };
        match self.queue.push(pending) {
            Ok(()) => true,
            Err(rejected) => {
                debug!(url = %rejected.request.url(), "request queue full");
                false
            }
        }
    }

    pub fn get<K: AsRef<str>, V: AsRef<str>>(
        &self,
        resource: &str,
        query: &[(K, V)],
        callbacks: impl HttpClientCallbacks + 'static,
    ) -> Result<bool, RequestError> {
        let request = self.request(Method::GET, resource, query)?;
        Ok(self.enqueue_request(request, callbacks))
    }

    pub fn post(&self, resource: &str, content: HttpContent, callbacks: impl HttpClientCallbacks + 'static) -> Result<bool, RequestError> {
        let request = self.request::<&str, &str>(Method::POST, resource, &[])?.with_content(content);
        Ok(self.enqueue_request(request, callbacks))
    }

    pub fn put(&self, resource: &str, content: HttpContent, callbacks: impl HttpClientCallbacks + 'static) -> Result<bool, RequestError> {
        let request = self.request::<&str, &str>(Method::PUT, resource, &[])?.with_content(content);
        Ok(self.enqueue_request(request, callbacks))
    }

    pub fn delete(&self, resource: &str, callbacks: impl HttpClientCallbacks + 'static) -> Result<bool, RequestError> {
        let request = self.request::<&str, &str>(Method::DELETE, resource, &[])?;
        Ok(self.enqueue_request(request, callbacks))
    }

    /// Requests waiting in the queue or the backlog.
    pub fn queued_requests(&self) -> usize {
        self.queue.len() + self.pool.backlog_len()
    }

    /// Requests currently owned by a connection.
    pub fn active_requests(&self) -> usize {
        self.pool.connections().iter().filter(|connection| connection.is_busy()).count()
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        self.pool.closing.store(true, Ordering::Release);
        if let Err(e) = self.endpoint.remove_periodic(self.timeout_timer) {
            // the endpoint already stopped its timers
            debug!(cause = %e, "timeout timer already gone");
        }

        let abandoned: Vec<PendingRequest> = self.queue.drain().into_iter().chain(self.pool.drain_backlog()).collect();
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "failing queued requests");
        }
        for pending in abandoned {
            pending.fail(HttpClientError::Unknown);
        }

        // in-flight requests fail from close_peer once the endpoint drops the sockets
        let queue: Arc<dyn Transport> = Arc::clone(&self.queue) as Arc<dyn Transport>;
        let transports =
            self.pool.connections().iter().map(|connection| Arc::clone(connection.socket()) as Arc<dyn Transport>).chain(std::iter::once(queue));
        for transport in transports {
            let target = Arc::clone(&transport);
            if let Err(e) = transport.core().do_async("close client", move || target.core().close_when_handler_finished()) {
                warn!(peer = %transport.core().peer_name(), cause = %e, "failed to post client close");
            }
        }
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("config", &self.config)
            .field("queued_requests", &self.queued_requests())
            .finish()
    }
}
