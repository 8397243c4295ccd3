use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Request, Response, StatusCode, header};
use micro_http::server::{HttpListener, ResponseSender};
use micro_reactor::{Endpoint, EndpointConfig};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::connection::RestConnection;
use crate::error::ServiceError;
use crate::request::{RestParams, RestRequest};
use crate::router::Router;

/// A [`RestConnection`] answering through the HTTP server transport.
///
/// Clones share the underlying sender; the first response wins.
#[derive(Clone)]
pub struct HttpRestConnection {
    sender: Arc<Mutex<Option<ResponseSender>>>,
}

impl HttpRestConnection {
    pub fn new(sender: ResponseSender) -> Self {
        Self { sender: Arc::new(Mutex::new(Some(sender))) }
    }
}

fn build_response(code: StatusCode, body: Bytes, content_type: &str, headers: &RestParams) -> Response<Bytes> {
    let mut response = Response::new(body);
    *response.status_mut() = code;
    if !content_type.is_empty() {
        match HeaderValue::from_str(content_type) {
            Ok(value) => {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            Err(e) => warn!(content_type, cause = %e, "skipping invalid content type"),
        }
    }
    for (name, value) in headers.iter() {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => warn!(name, value, "skipping invalid response header"),
        }
    }
    response
}

impl RestConnection for HttpRestConnection {
    fn send_http_response(&self, code: StatusCode, body: Bytes, content_type: &str, headers: RestParams) {
        let Some(sender) = self.sender.lock().take() else {
            error!(%code, "response already sent, ignoring the second one");
            return;
        };
        if !sender.send(build_response(code, body, content_type, &headers)) {
            debug!(%code, "peer went away before the response");
        }
    }

    fn response_sent(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Whether the peer is still there; always `false` once the response is sent.
    fn is_connected(&self) -> bool {
        self.sender.lock().as_ref().is_some_and(ResponseSender::is_connected)
    }

    fn capture(&self) -> Arc<dyn RestConnection> {
        Arc::new(self.clone())
    }
}

impl fmt::Debug for HttpRestConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRestConnection").field("sent", &self.response_sent()).finish()
    }
}

/// Configuration of a [`RestServiceEndpoint`].
#[derive(Debug, Clone)]
pub struct RestServiceConfig {
    pub name: String,
    pub address: Vec<SocketAddr>,
    pub num_threads: usize,
}

impl Default for RestServiceConfig {
    fn default() -> Self {
        Self { name: "rest".to_string(), address: vec![SocketAddr::from(([127, 0, 0, 1], 0))], num_threads: 1 }
    }
}

pub struct RestServiceEndpointBuilder {
    config: RestServiceConfig,
    router: Option<Router>,
}

impl RestServiceEndpointBuilder {
    fn new() -> Self {
        Self { config: RestServiceConfig::default(), router: None }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// The address to listen on. Addresses that do not resolve are logged and the default
    /// (`127.0.0.1`, any port) is kept.
    #[must_use]
    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        match address.to_socket_addrs() {
            Ok(resolved) => self.config.address = resolved.collect(),
            Err(e) => error!(cause = %e, "cannot resolve the listen address"),
        }
        self
    }

    #[must_use]
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.config.num_threads = num_threads;
        self
    }

    #[must_use]
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Starts the reactor threads and the listener.
    pub fn build(self) -> Result<RestServiceEndpoint, ServiceError> {
        let router = Arc::new(self.router.ok_or(ServiceError::MissingRouter)?);
        RestServiceEndpoint::start(self.config, router)
    }
}

impl fmt::Debug for RestServiceEndpointBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestServiceEndpointBuilder").field("config", &self.config).field("router", &self.router).finish()
    }
}

/// Serves a [`Router`] over HTTP on its own reactor endpoint.
///
/// Every request is turned into a [`RestRequest`] and handed to
/// [`Router::handle_request`] on the worker thread that parsed it.
///
/// ```no_run
/// use http::StatusCode;
/// use micro_rest::{MatchResult, RestConnection, RestServiceEndpoint, Router};
///
/// let mut router = Router::new();
/// router
///     .add_terminal_route("/ping", "GET", "liveness", |connection, _, _| {
///         connection.send_response(StatusCode::OK, "pong".into(), "text/plain");
///         Ok(MatchResult::Yes)
///     })
///     .unwrap();
///
/// let service = RestServiceEndpoint::builder().address("127.0.0.1:8080").num_threads(2).router(router).build().unwrap();
/// println!("listening on {}", service.local_addr());
/// ```
pub struct RestServiceEndpoint {
    config: RestServiceConfig,
    router: Arc<Router>,
    endpoint: Endpoint,
    listener: Arc<HttpListener>,
}

impl RestServiceEndpoint {
    pub fn builder() -> RestServiceEndpointBuilder {
        RestServiceEndpointBuilder::new()
    }

    fn start(config: RestServiceConfig, router: Arc<Router>) -> Result<Self, ServiceError> {
        let endpoint = Endpoint::new(EndpointConfig::new(config.name.clone()).num_threads(config.num_threads))?;
        endpoint.spinup_with_config()?;

        let serving = Arc::clone(&router);
        let handler = move |request: Request<Bytes>, sender: ResponseSender| {
            let request = RestRequest::from(request);
            let connection = HttpRestConnection::new(sender);
            serving.handle_request(&connection, &request);
        };
        let listener = HttpListener::bind(&endpoint.handle(), config.address.as_slice(), Arc::new(handler))?;

        info!(name = %config.name, address = %listener.local_addr(), threads = config.num_threads, "rest service started");
        Ok(Self { config, router, endpoint, listener })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn num_connections(&self) -> usize {
        self.endpoint.num_connections()
    }

    /// Stops listening and shuts the reactor down, waiting for open connections to close.
    pub fn shutdown(&self) {
        info!(name = %self.config.name, "shutting down rest service");
        if let Err(e) = self.listener.close() {
            warn!(cause = %e, "cannot close the listener");
        }
        self.endpoint.shutdown();
    }
}

impl fmt::Debug for RestServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestServiceEndpoint").field("config", &self.config).field("local_addr", &self.local_addr()).finish_non_exhaustive()
    }
}
