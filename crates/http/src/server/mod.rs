//! The server side: accepting peers and answering their requests.
//!
//! An [`HttpListener`] accepts connections on an endpoint. Each [`ServerConnection`] parses
//! requests with the streaming [`crate::parser::RequestParser`] and hands every complete
//! `http::Request<Bytes>` to the [`RequestHandler`]. The handler answers through the
//! [`ResponseSender`] it receives, right away or later from another thread. Connections are
//! kept alive unless the request asked for `Connection: close` or used HTTP/1.0.
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use micro_http::server::{HttpListener, ResponseSender};
//! use micro_reactor::{Endpoint, EndpointConfig};
//!
//! let endpoint = Endpoint::new(EndpointConfig::new("server").num_threads(4)).unwrap();
//! endpoint.spinup_with_config().unwrap();
//!
//! let handler = |request: Request<Bytes>, sender: ResponseSender| {
//!     sender.send(Response::new(Bytes::from(format!("hello {}", request.uri().path()))));
//! };
//! let listener = HttpListener::bind(&endpoint.handle(), "127.0.0.1:8080", Arc::new(handler)).unwrap();
//! println!("listening on {}", listener.local_addr());
//! ```

mod connection;
mod listener;

use bytes::Bytes;
use http::Request;

pub use connection::{ResponseSender, ServerConnection};
pub use listener::HttpListener;

/// Answers the requests of every connection accepted by a listener.
///
/// Called on the worker thread that parsed the request. Each request must be answered
/// exactly once through its sender.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: Request<Bytes>, sender: ResponseSender);
}

impl<F> RequestHandler for F
where
    F: Fn(Request<Bytes>, ResponseSender) + Send + Sync,
{
    fn handle(&self, request: Request<Bytes>, sender: ResponseSender) {
        self(request, sender);
    }
}
