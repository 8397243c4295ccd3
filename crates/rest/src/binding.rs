//! Typed handler arguments bound to parts of the request.
//!
//! A bound route declares where each argument of its handler comes from: a query parameter
//! ([`RestParam`], [`RestParamDefault`], [`RestParamJson`]), a matched path resource
//! ([`RequestParam`]), the JSON payload or one of its fields ([`JsonParam`]) or the raw payload
//! ([`StringPayload`]). The selectors are passed as a tuple in the order of the handler's
//! parameters and document themselves in the route's help. A request whose arguments cannot be
//! decoded, or whose handler fails, is answered with 400 and the error message.
//!
//! ```
//! use http::{Method, StatusCode};
//! use micro_rest::{HandlerError, InProcessRestConnection, PathSpec, RequestParam, RestParamDefault, RestRequest, Router};
//! use serde_json::json;
//!
//! let mut router = Router::new();
//! router
//!     .add_route_sync_return(
//!         PathSpec::rx("/items/([0-9]+)", "/items/<id>").unwrap(),
//!         "GET",
//!         "get one item",
//!         "the item",
//!         (RequestParam::<u64>::new(-1, "id", "item id"), RestParamDefault::new("verbose", "with details", false)),
//!         |id: u64, verbose: bool| Ok::<_, HandlerError>(json!({ "id": id, "verbose": verbose })),
//!     )
//!     .unwrap();
//!
//! let connection = InProcessRestConnection::new();
//! router.handle_request(&connection, &RestRequest::new(Method::GET, "/items/7").with_param("verbose", "true"));
//! assert_eq!(connection.response_code(), Some(StatusCode::OK));
//! assert_eq!(connection.body_text(), r#"{"id":7,"verbose":true}"#);
//! ```

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::connection::RestConnection;
use crate::context::ParsingContext;
use crate::error::{BindingError, HandlerError, RouterError};
use crate::filter::RequestFilter;
use crate::path::PathSpec;
use crate::request::RestRequest;
use crate::router::{MatchResult, Router};
use crate::value_description::{self, RouteArguments, ValueDescription};

/// Produces one handler argument from a request.
pub trait RestArgument: Send + Sync + 'static {
    type Output;

    fn extract(&self, request: &RestRequest, context: &ParsingContext) -> Result<Self::Output, BindingError>;

    /// Adds this argument to the route's documented arguments.
    fn document(&self, arguments: &mut RouteArguments);
}

/// A handler callable with the values of a tuple of [`RestArgument`]s.
pub trait BindFn<Args>: Send + Sync + 'static {
    type Output;

    fn call(&self, args: Args) -> Self::Output;
}

macro_rules! impl_bind_fn_for_fn ({ $($param:ident)* } => {
    impl<Func, Out, $($param,)*> BindFn<($($param,)*)> for Func
    where
        Func: Fn($($param),*) -> Out + Send + Sync + 'static,
    {
        type Output = Out;

        #[inline]
        #[allow(non_snake_case)]
        fn call(&self, ($($param,)*): ($($param,)*)) -> Out {
            (self)($($param,)*)
        }
    }
});

impl_bind_fn_for_fn! {}
impl_bind_fn_for_fn! { A }
impl_bind_fn_for_fn! { A B }
impl_bind_fn_for_fn! { A B C }
impl_bind_fn_for_fn! { A B C D }
impl_bind_fn_for_fn! { A B C D E }
impl_bind_fn_for_fn! { A B C D E F }

macro_rules! impl_rest_argument_for_tuple ({ $($param:ident)* } => {
    impl<$($param,)*> RestArgument for ($($param,)*)
    where
        $($param: RestArgument,)*
    {
        type Output = ($($param::Output,)*);

        #[allow(non_snake_case, unused_variables)]
        fn extract(&self, request: &RestRequest, context: &ParsingContext) -> Result<Self::Output, BindingError> {
            let ($($param,)*) = self;
            Ok(($($param.extract(request, context)?,)*))
        }

        #[allow(non_snake_case, unused_variables)]
        fn document(&self, arguments: &mut RouteArguments) {
            let ($($param,)*) = self;
            $($param.document(arguments);)*
        }
    }
});

impl_rest_argument_for_tuple! {}
impl_rest_argument_for_tuple! { A }
impl_rest_argument_for_tuple! { A B }
impl_rest_argument_for_tuple! { A B C }
impl_rest_argument_for_tuple! { A B C D }
impl_rest_argument_for_tuple! { A B C D E }
impl_rest_argument_for_tuple! { A B C D E F }

fn parse_text<T>(location: &'static str, name: &str, text: &str) -> Result<T, BindingError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    text.parse::<T>().map_err(|e| BindingError::decode(location, name, e))
}

fn query_value<'r>(request: &'r RestRequest, name: &str) -> Result<&'r str, BindingError> {
    request.params.get_value(name).ok_or_else(|| BindingError::MissingParam { name: name.to_string() })
}

fn query_help(name: &str, description: &str, type_name: &str, encoding: &str) -> Value {
    json!({ "name": name, "description": description, "type": type_name, "encoding": encoding, "location": "query string" })
}

/// A required query parameter, parsed with [`FromStr`].
#[derive(Debug)]
pub struct RestParam<T> {
    name: String,
    description: String,
    marker: PhantomData<fn() -> T>,
}

impl<T> RestParam<T> {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), marker: PhantomData }
    }
}

impl<T> RestArgument for RestParam<T>
where
    T: FromStr + 'static,
    T::Err: fmt::Display,
{
    type Output = T;

    fn extract(&self, request: &RestRequest, _context: &ParsingContext) -> Result<T, BindingError> {
        parse_text("query parameter", &self.name, query_value(request, &self.name)?)
    }

    fn document(&self, arguments: &mut RouteArguments) {
        arguments.request_params.push(query_help(&self.name, &self.description, type_name::<T>(), "URI encoded"));
    }
}

/// A query parameter parsed with [`FromStr`], falling back to a default when absent.
#[derive(Debug)]
pub struct RestParamDefault<T> {
    name: String,
    description: String,
    default: T,
}

impl<T: fmt::Display> RestParamDefault<T> {
    pub fn new(name: impl Into<String>, description: impl Into<String>, default: T) -> Self {
        Self { name: name.into(), description: description.into(), default }
    }
}

impl<T> RestArgument for RestParamDefault<T>
where
    T: FromStr + fmt::Display + Clone + Send + Sync + 'static,
    T::Err: fmt::Display,
{
    type Output = T;

    fn extract(&self, request: &RestRequest, _context: &ParsingContext) -> Result<T, BindingError> {
        match request.params.get_value(&self.name) {
            Some(text) => parse_text("query parameter", &self.name, text),
            None => Ok(self.default.clone()),
        }
    }

    fn document(&self, arguments: &mut RouteArguments) {
        let mut help = query_help(&self.name, &self.description, type_name::<T>(), "URI encoded");
        help["defaultValue"] = json!(self.default.to_string());
        arguments.request_params.push(help);
    }
}

/// A required query parameter holding JSON text.
#[derive(Debug)]
pub struct RestParamJson<T> {
    name: String,
    description: String,
    marker: PhantomData<fn() -> T>,
}

impl<T> RestParamJson<T> {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), marker: PhantomData }
    }
}

impl<T: DeserializeOwned + 'static> RestArgument for RestParamJson<T> {
    type Output = T;

    fn extract(&self, request: &RestRequest, _context: &ParsingContext) -> Result<T, BindingError> {
        let text = query_value(request, &self.name)?;
        serde_json::from_str(text).map_err(|e| BindingError::decode("query parameter", &self.name, e))
    }

    fn document(&self, arguments: &mut RouteArguments) {
        arguments.request_params.push(query_help(&self.name, &self.description, type_name::<T>(), "JSON"));
    }
}

/// The JSON payload, or the field `name` of it when `name` is not empty.
///
/// A missing field decodes from `null`, so an `Option` field is simply `None`.
#[derive(Debug)]
pub struct JsonParam<T> {
    name: String,
    description: String,
    marker: PhantomData<fn() -> T>,
}

impl<T> JsonParam<T> {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), marker: PhantomData }
    }
}

impl<T: DeserializeOwned + 'static> RestArgument for JsonParam<T> {
    type Output = T;

    fn extract(&self, request: &RestRequest, _context: &ParsingContext) -> Result<T, BindingError> {
        let mut parsed: Value = serde_json::from_slice(&request.payload).map_err(|e| BindingError::decode("JSON payload", &self.name, e))?;
        let value = if self.name.is_empty() { parsed } else { parsed.get_mut(&self.name).map(Value::take).unwrap_or_default() };
        serde_json::from_value(value).map_err(|e| BindingError::decode("JSON payload", &self.name, e))
    }

    fn document(&self, arguments: &mut RouteArguments) {
        arguments.json_params.push(value_description::JsonParam {
            name: self.name.clone(),
            description: self.description.clone(),
            type_name: type_name::<T>(),
            value: ValueDescription::Any,
        });
    }
}

/// A resource matched by the route's path, counted from the end when `index` is negative.
#[derive(Debug)]
pub struct RequestParam<T> {
    index: isize,
    name: String,
    description: String,
    marker: PhantomData<fn() -> T>,
}

impl<T> RequestParam<T> {
    pub fn new(index: isize, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { index, name: name.into(), description: description.into(), marker: PhantomData }
    }
}

impl<T> RestArgument for RequestParam<T>
where
    T: FromStr + 'static,
    T::Err: fmt::Display,
{
    type Output = T;

    fn extract(&self, _request: &RestRequest, context: &ParsingContext) -> Result<T, BindingError> {
        let resources = context.resources();
        let missing = || BindingError::MissingResource { index: self.index, len: resources.len() };
        let position = if self.index < 0 { resources.len().checked_sub(self.index.unsigned_abs()) } else { usize::try_from(self.index).ok() };
        let resource = position.and_then(|position| resources.get(position)).ok_or_else(missing)?;
        parse_text("path resource", &self.name, resource)
    }

    fn document(&self, arguments: &mut RouteArguments) {
        arguments.resource_params.push(json!({
            "name": self.name,
            "description": self.description,
            "type": type_name::<T>(),
            "encoding": "URI encoded",
            "location": "URI",
        }));
    }
}

/// The payload as text.
#[derive(Debug)]
pub struct StringPayload {
    description: String,
}

impl StringPayload {
    pub fn new(description: impl Into<String>) -> Self {
        Self { description: description.into() }
    }
}

impl RestArgument for StringPayload {
    type Output = String;

    fn extract(&self, request: &RestRequest, _context: &ParsingContext) -> Result<String, BindingError> {
        String::from_utf8(request.payload.to_vec()).map_err(|e| BindingError::decode("payload", "", e))
    }

    fn document(&self, arguments: &mut RouteArguments) {
        arguments.payload = Some(self.description.clone());
    }
}

impl Router {
    /// Binds `handler` to a route answering an empty 200 when it succeeds.
    pub fn add_route_sync<P, F, E>(
        &mut self,
        path: impl Into<PathSpec>,
        filter: impl Into<RequestFilter>,
        description: impl Into<String>,
        params: P,
        handler: F,
    ) -> Result<(), RouterError>
    where
        P: RestArgument,
        F: BindFn<P::Output, Output = Result<(), E>>,
        E: Into<HandlerError>,
    {
        self.add_bound_route(path, filter, description, None, params, handler, |connection, ()| {
            connection.send_response(StatusCode::OK, Bytes::new(), "");
            Ok(())
        })
    }

    /// Binds `handler` to a route answering 200 with the JSON of its result.
    pub fn add_route_sync_return<P, F, T, E>(
        &mut self,
        path: impl Into<PathSpec>,
        filter: impl Into<RequestFilter>,
        description: impl Into<String>,
        result_description: impl Into<String>,
        params: P,
        handler: F,
    ) -> Result<(), RouterError>
    where
        P: RestArgument,
        F: BindFn<P::Output, Output = Result<T, E>>,
        T: Serialize,
        E: Into<HandlerError>,
    {
        self.add_bound_route(path, filter, description, Some(result_description.into()), params, handler, |connection, result: T| {
            connection.send_json_response(StatusCode::OK, &serde_json::to_value(result)?);
            Ok(())
        })
    }

    /// Binds `handler` to a route answering with the status and the JSON body it returns.
    pub fn add_route_return_status<P, F, T, E>(
        &mut self,
        path: impl Into<PathSpec>,
        filter: impl Into<RequestFilter>,
        description: impl Into<String>,
        result_description: impl Into<String>,
        params: P,
        handler: F,
    ) -> Result<(), RouterError>
    where
        P: RestArgument,
        F: BindFn<P::Output, Output = Result<(StatusCode, T), E>>,
        T: Serialize,
        E: Into<HandlerError>,
    {
        self.add_bound_route(path, filter, description, Some(result_description.into()), params, handler, |connection, (code, body): (StatusCode, T)| {
            connection.send_json_response(code, &serde_json::to_value(body)?);
            Ok(())
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn add_bound_route<P, F, T, E, S>(
        &mut self,
        path: impl Into<PathSpec>,
        filter: impl Into<RequestFilter>,
        description: impl Into<String>,
        result_description: Option<String>,
        params: P,
        handler: F,
        send: S,
    ) -> Result<(), RouterError>
    where
        P: RestArgument,
        F: BindFn<P::Output, Output = Result<T, E>>,
        E: Into<HandlerError>,
        S: Fn(&dyn RestConnection, T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let mut arguments = RouteArguments::new();
        params.document(&mut arguments);
        arguments.result = result_description;

        let router = Router::terminal(
            move |connection, request, context| {
                let args = match params.extract(request, context) {
                    Ok(args) => args,
                    Err(e) => {
                        debug!(cause = %e, "rejecting {request}");
                        connection.send_error_response(StatusCode::BAD_REQUEST, &e.to_string());
                        return Ok(MatchResult::Error);
                    }
                };
                match handler.call(args) {
                    Ok(result) => {
                        send(connection, result)?;
                        Ok(MatchResult::Yes)
                    }
                    Err(e) => {
                        let e: HandlerError = e.into();
                        debug!(cause = %e, "bound handler failed for {request}");
                        connection.send_error_response(StatusCode::BAD_REQUEST, &e.to_string());
                        Ok(MatchResult::Error)
                    }
                }
            },
            description,
        );
        self.add_route(path, filter, router.with_arguments(arguments))
    }
}
