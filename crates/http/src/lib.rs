//! Streaming HTTP/1.1 on top of the micro reactor
//!
//! This crate holds the HTTP layer of the micro stack: resumable parsers that accept the byte
//! stream in chunks of any size, a non-blocking client socket, a pooled HTTP client and a small
//! server transport. Everything runs on the worker threads of a [`micro_reactor::Endpoint`];
//! nothing in here blocks except the explicit wait helpers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use micro_http::client::{HttpClient, HttpClientConfig, SimpleCallbacks};
//! use micro_http::server::{HttpListener, ResponseSender};
//! use micro_reactor::{Endpoint, EndpointConfig};
//! use tracing::{Level, info};
//! use tracing_subscriber::FmtSubscriber;
//!
//! let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//! tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//! let endpoint = Endpoint::new(EndpointConfig::new("hello").num_threads(2)).unwrap();
//! endpoint.spinup_with_config().unwrap();
//!
//! let hello = |_request: Request<Bytes>, sender: ResponseSender| {
//!     sender.send(Response::new(Bytes::from_static(b"Hello World!\r\n")));
//! };
//! let listener = HttpListener::bind(&endpoint.handle(), "127.0.0.1:0", Arc::new(hello)).unwrap();
//!
//! let base_url = format!("http://{}", listener.local_addr());
//! let client = HttpClient::new(&endpoint.handle(), &base_url, HttpClientConfig::new()).unwrap();
//! client
//!     .get::<&str, &str>("/", &[], SimpleCallbacks::new(|_request, error, response| {
//!         info!(%error, status = response.status, "response");
//!     }))
//!     .unwrap();
//! ```
//!
//! # Architecture
//!
//! - [`parser`]: the response and request parsers and their event traits
//! - [`protocol`]: request assembly, response encoding and the error types
//! - [`socket`]: [`socket::ClientTcpSocket`], the connect/write/read/close state machine
//! - [`client`]: [`client::HttpClient`] with its connection pool, queue and backlog
//! - [`server`]: [`server::HttpListener`] and the per-peer [`server::ServerConnection`]
//!
//! # Error Handling
//!
//! - [`protocol::ParseError`]: malformed messages, fatal for the connection
//! - [`protocol::SocketError`]: invalid socket use and failed syscalls
//! - [`protocol::RequestError`]: invalid client request urls
//! - [`client::HttpClientError`]: the completion code handed to every client callback
//!
//! # Limitations
//!
//! - HTTP/1.1 only, no TLS
//! - bodies delimited by closing the connection are not supported
//! - responses to pipelined requests are written in the order the handler answers them

pub mod client;
pub mod parser;
pub mod protocol;
pub mod server;
pub mod socket;

mod utils;
pub(crate) use utils::ensure;
