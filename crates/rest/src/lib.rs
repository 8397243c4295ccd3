//! REST routing on top of the micro HTTP server
//!
//! Requests are matched against a tree of [`Router`]s: each level consumes a prefix of the path
//! with a literal or regex [`PathSpec`], checks the verb and parameter [`RequestFilter`], and
//! either answers through a handler or hands the rest of the path to a child router. Handlers
//! write their response to a [`RestConnection`], which is the HTTP transport in a
//! [`RestServiceEndpoint`] and an in-memory recorder in an [`InProcessRestConnection`].
//!
//! Handlers with typed arguments are bound with [`Router::add_route_sync`],
//! [`Router::add_route_sync_return`] and [`Router::add_route_return_status`]; see [`RestArgument`].
//!
//! # Example
//!
//! ```no_run
//! use http::StatusCode;
//! use micro_rest::{MatchResult, PathSpec, RestConnection, RestServiceEndpoint, Router};
//! use tracing::Level;
//! use tracing_subscriber::FmtSubscriber;
//!
//! let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//! tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//! let mut router = Router::with_description("greeter");
//! router.add_help_route("/help", "GET").unwrap();
//! router
//!     .add_terminal_route(PathSpec::rx("/hello/([a-z]+)", "/hello/<name>").unwrap(), "GET", "greets", |connection, _, context| {
//!         let name = &context.resources()[1];
//!         connection.send_response(StatusCode::OK, format!("hello {name}").into(), "text/plain");
//!         Ok(MatchResult::Yes)
//!     })
//!     .unwrap();
//!
//! let service = RestServiceEndpoint::builder().address("127.0.0.1:8080").num_threads(4).router(router).build().unwrap();
//! ```
//!
//! # Error Handling
//!
//! - [`RouterError`]: invalid route construction, bad object access, refused static paths
//! - [`HandlerError`]: anything a handler fails with; answered with 500
//! - [`BindingError`]: a bound route could not decode a handler argument; answered with 400
//! - [`ServiceError`]: starting a [`RestServiceEndpoint`] failed
//!
//! Unknown resources are answered with 404, and `OPTIONS` on a path nothing accepts with 400.

mod binding;
mod connection;
mod context;
mod error;
mod files;
mod filter;
mod path;
mod request;
mod router;
mod server;

pub mod value_description;

pub use binding::{BindFn, JsonParam, RequestParam, RestArgument, RestParam, RestParamDefault, RestParamJson, StringPayload};
pub use connection::{InProcessRestConnection, RestConnection};
pub use context::{ParsingContext, StateGuard};
pub use error::{BindingError, HandlerError, RouterError, ServiceError};
pub use files::mime_for;
pub use filter::{FilterLocation, ParamFilter, RequestFilter};
pub use path::PathSpec;
pub use request::{RestParams, RestRequest};
pub use router::{HandlerResult, MatchResult, Router};
pub use server::{HttpRestConnection, RestServiceConfig, RestServiceEndpoint, RestServiceEndpointBuilder};
pub use value_description::{Describe, RouteArguments, ValueDescription};
