//! The REST request router.
//!
//! A [`Router`] holds an ordered list of routes. Each route pairs a [`PathSpec`] and a
//! [`RequestFilter`] with a child router; a router built with [`Router::terminal`] holds a
//! handler instead of children. A request walks the tree consuming its path: at every level
//! the routes are tried in insertion order and the first one that matches and does not answer
//! [`MatchResult::No`] wins. There is no backtracking once a handler has accepted a request.
//!
//! ```
//! use http::{Method, StatusCode};
//! use micro_rest::{InProcessRestConnection, MatchResult, PathSpec, RestConnection, RestRequest, Router};
//!
//! let mut router = Router::new();
//! let items = router.add_sub_router("/items", "the items").unwrap();
//! items
//!     .add_terminal_route(PathSpec::rx("/([0-9]+)", "/<id>").unwrap(), "GET", "get one item", |connection, _request, context| {
//!         let id = &context.resources()[2];
//!         connection.send_response(StatusCode::OK, format!("item {id}").into(), "text/plain");
//!         Ok(MatchResult::Yes)
//!     })
//!     .unwrap();
//!
//! let connection = InProcessRestConnection::new();
//! router.handle_request(&connection, &RestRequest::new(Method::GET, "/items/42"));
//! assert_eq!(connection.body_text(), "item 42");
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use bytes::Bytes;
use http::{Method, StatusCode};
use serde_json::{Value, json};
use tracing::{error, trace, warn};

use crate::connection::RestConnection;
use crate::context::ParsingContext;
use crate::error::{HandlerError, RouterError};
use crate::files::{relative_path, send_file};
use crate::filter::{RequestFilter, join_verbs};
use crate::path::PathSpec;
use crate::request::{RestParams, RestRequest};
use crate::value_description::RouteArguments;

/// The outcome of offering a request to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// Not for this route, the caller tries the next one.
    No,
    /// Handled, a response was sent.
    Yes,
    /// Handled, and an error response was already sent.
    Error,
    /// Accepted, the response will be sent later through a captured connection.
    Async,
}

pub type HandlerResult = Result<MatchResult, HandlerError>;

type ProcessFn = Box<dyn Fn(&dyn RestConnection, &RestRequest, &mut ParsingContext) -> HandlerResult + Send + Sync>;
type ExtractFn = Box<dyn Fn(&dyn RestConnection, &RestRequest, &mut ParsingContext) -> Result<(), HandlerError> + Send + Sync>;

enum RootHandler {
    Process(ProcessFn),
    /// Answers with the help of the router owning the route.
    Help,
}

struct Route {
    path: PathSpec,
    filter: RequestFilter,
    router: Router,
    extract: Option<ExtractFn>,
}

/// A node of the route tree.
#[derive(Default)]
pub struct Router {
    root: Option<RootHandler>,
    routes: Vec<Route>,
    description: String,
    terminal: bool,
    arguments: Option<RouteArguments>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_description(description: impl Into<String>) -> Self {
        Self { description: description.into(), ..Self::default() }
    }

    /// A leaf router: `handler` runs when the whole path has been consumed.
    pub fn terminal<F>(handler: F, description: impl Into<String>) -> Self
    where
        F: Fn(&dyn RestConnection, &RestRequest, &mut ParsingContext) -> HandlerResult + Send + Sync + 'static,
    {
        Self { root: Some(RootHandler::Process(Box::new(handler))), description: description.into(), terminal: true, ..Self::default() }
    }

    /// A router whose `handler` takes every request reaching it, whatever path is left.
    pub fn catch_all<F>(handler: F, description: impl Into<String>) -> Self
    where
        F: Fn(&dyn RestConnection, &RestRequest, &mut ParsingContext) -> HandlerResult + Send + Sync + 'static,
    {
        Self { root: Some(RootHandler::Process(Box::new(handler))), description: description.into(), terminal: false, ..Self::default() }
    }

    /// Documents the arguments of this router's handler.
    #[must_use]
    pub fn with_arguments(mut self, arguments: RouteArguments) -> Self {
        self.arguments = Some(arguments);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn num_routes(&self) -> usize {
        self.routes.len()
    }

    fn push_route(&mut self, path: PathSpec, filter: RequestFilter, router: Router, extract: Option<ExtractFn>) -> Result<&mut Router, RouterError> {
        if self.root.is_some() {
            return Err(RouterError::TerminalRouter);
        }
        self.routes.push(Route { path, filter, router, extract });
        let index = self.routes.len() - 1;
        Ok(&mut self.routes[index].router)
    }

    pub fn add_route(&mut self, path: impl Into<PathSpec>, filter: impl Into<RequestFilter>, router: Router) -> Result<(), RouterError> {
        self.push_route(path.into(), filter.into(), router, None).map(|_| ())
    }

    /// Like [`add_route`](Self::add_route), running `extract` once the path matched.
    ///
    /// The extractor usually pushes an object onto the context for the handlers below. When it
    /// sends a response itself, processing stops there with [`MatchResult::Yes`].
    pub fn add_extracting_route<E>(&mut self, path: impl Into<PathSpec>, filter: impl Into<RequestFilter>, router: Router, extract: E) -> Result<(), RouterError>
    where
        E: Fn(&dyn RestConnection, &RestRequest, &mut ParsingContext) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.push_route(path.into(), filter.into(), router, Some(Box::new(extract))).map(|_| ())
    }

    pub fn add_terminal_route<F>(&mut self, path: impl Into<PathSpec>, filter: impl Into<RequestFilter>, description: impl Into<String>, handler: F) -> Result<(), RouterError>
    where
        F: Fn(&dyn RestConnection, &RestRequest, &mut ParsingContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(path, filter, Self::terminal(handler, description))
    }

    /// Adds an empty child router accepting every verb and returns it for filling in.
    pub fn add_sub_router(&mut self, path: impl Into<PathSpec>, description: impl Into<String>) -> Result<&mut Router, RouterError> {
        self.push_route(path.into(), RequestFilter::any(), Self::with_description(description), None)
    }

    pub fn add_extracting_sub_router<E>(&mut self, path: impl Into<PathSpec>, description: impl Into<String>, extract: E) -> Result<&mut Router, RouterError>
    where
        E: Fn(&dyn RestConnection, &RestRequest, &mut ParsingContext) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.push_route(path.into(), RequestFilter::any(), Self::with_description(description), Some(Box::new(extract)))
    }

    /// Serves the help of this router; with an `autodoc` query parameter, the autodoc document.
    pub fn add_help_route(&mut self, path: impl Into<PathSpec>, filter: impl Into<RequestFilter>) -> Result<(), RouterError> {
        let help = Self { root: Some(RootHandler::Help), description: "Get help on the available API commands".to_string(), terminal: true, ..Self::default() };
        self.add_route(path, filter, help)
    }

    /// Serves an API documentation browser from `files_dir` under `autodoc_path`.
    ///
    /// `autodoc_path` itself redirects to its `index.html`, and `<autodoc_path>/autodoc`
    /// redirects to the autodoc document served by the help route at `help_path`.
    pub fn add_autodoc_route(&mut self, autodoc_path: &str, help_path: &str, files_dir: impl Into<PathBuf>) -> Result<(), RouterError> {
        let index = format!("{autodoc_path}/index.html");
        self.add_terminal_route(autodoc_path, "GET", "Main autodoc page", redirect(index.clone()))?;
        self.add_terminal_route(format!("{autodoc_path}/"), "GET", "Main autodoc page", redirect(index))?;

        let prefix = autodoc_path.to_string();
        let autodoc = format!("{help_path}?autodoc");
        let files_dir = files_dir.into();
        let static_content = move |connection: &dyn RestConnection, _request: &RestRequest, context: &mut ParsingContext| -> HandlerResult {
            let resource = context.last_resource().unwrap_or_default();
            let Some(filename) = relative_path(resource)?.strip_prefix(prefix.trim_start_matches('/')) else {
                return Err(RouterError::forbidden_path(resource).into());
            };
            let filename = filename.trim_start_matches('/');
            if filename == "autodoc" {
                connection.send_redirect(StatusCode::FOUND, &autodoc);
                return Ok(MatchResult::Yes);
            }
            send_file(connection, &files_dir.join(relative_path(filename)?))
        };
        let path = PathSpec::rx(format!("{}/.*", regex::escape(autodoc_path)), "<resource>")?;
        self.add_terminal_route(path, "GET", "Static content", static_content)
    }

    /// Serves the files below `dir` for `GET <route>/<file>`.
    pub fn serve_static_directory(&mut self, route: &str, dir: impl Into<PathBuf>) -> Result<(), RouterError> {
        let dir = dir.into();
        let static_content = move |connection: &dyn RestConnection, _request: &RestRequest, context: &mut ParsingContext| -> HandlerResult {
            let resource = context.last_resource().unwrap_or_default();
            send_file(connection, &dir.join(relative_path(resource)?))
        };
        let path = PathSpec::rx(format!("{}/(.*)", regex::escape(route)), "<resource>")?;
        self.add_terminal_route(path, "GET", "Static content", static_content)
    }

    /// Routes a request from the top of the tree, answering 404 when nothing matches.
    pub fn handle_request(&self, connection: &dyn RestConnection, request: &RestRequest) -> MatchResult {
        let mut context = ParsingContext::new(request);
        let result = self.process_request(connection, request, &mut context);
        if result == MatchResult::No {
            connection.send_error_response(StatusCode::NOT_FOUND, &format!("unknown resource {} {}", request.verb, request.resource));
        }
        result
    }

    /// Offers the request to this router.
    ///
    /// `OPTIONS` requests are answered here with the accepted verbs and the help of every route
    /// matching the whole path; no handler runs for them. Handler errors and panics become a
    /// 500 response.
    pub fn process_request(&self, connection: &dyn RestConnection, request: &RestRequest, context: &mut ParsingContext) -> MatchResult {
        if request.verb == Method::OPTIONS {
            self.answer_options(connection, request, context);
            return MatchResult::Yes;
        }
        guarded(connection, || self.route(connection, request, context, None))
    }

    fn route(&self, connection: &dyn RestConnection, request: &RestRequest, context: &mut ParsingContext, owner: Option<&Router>) -> HandlerResult {
        trace!(description = %self.description, remaining = context.remaining(), routes = self.routes.len(), "processing {request}");

        if let Some(root) = &self.root
            && (!self.terminal || context.remaining().is_empty())
        {
            return match root {
                RootHandler::Process(handler) => handler(connection, request, context),
                RootHandler::Help => {
                    owner.unwrap_or(self).answer_help(connection, request);
                    Ok(MatchResult::Yes)
                }
            };
        }

        for route in &self.routes {
            trace!(path = %route.path, verbs = %route.filter.verbs_str(), "trying route");
            let result = guarded(connection, || route.process(connection, request, context, self));
            if result != MatchResult::No {
                return Ok(result);
            }
        }
        Ok(MatchResult::No)
    }

    fn answer_options(&self, connection: &dyn RestConnection, request: &RestRequest, context: &mut ParsingContext) {
        let mut verbs = BTreeSet::new();
        let mut help = json!({});
        self.options(&mut verbs, &mut help, request, context);

        let headers: RestParams = [("Allow", join_verbs(&verbs))].into_iter().collect();
        if verbs.is_empty() {
            connection.send_http_response(StatusCode::BAD_REQUEST, Bytes::new(), "", headers);
        } else {
            let body = serde_json::to_string_pretty(&help).unwrap_or_else(|_| help.to_string());
            connection.send_http_response(StatusCode::OK, Bytes::from(body), mime::APPLICATION_JSON.as_ref(), headers);
        }
    }

    fn answer_help(&self, connection: &dyn RestConnection, request: &RestRequest) {
        let help = if request.params.has_value("autodoc") { self.autodoc_help() } else { self.help() };
        connection.send_json_response(StatusCode::OK, &help);
    }

    /// Collects the verbs accepted by routes matching the whole remaining path, with their help.
    pub fn options(&self, verbs: &mut BTreeSet<String>, help: &mut Value, request: &RestRequest, context: &mut ParsingContext) {
        for route in &self.routes {
            route.options(verbs, help, request, context);
        }
    }

    /// The help document of the tree below this router, keyed by `"<path> <verbs>"`.
    pub fn help(&self) -> Value {
        let mut result = json!({});
        self.help_into(&mut result, "", &BTreeSet::new());
        result
    }

    fn help_into(&self, result: &mut Value, current_path: &str, verbs: &BTreeSet<String>) {
        let key = help_key(current_path, verbs);
        result[key.as_str()]["description"] = json!(self.description);
        if let Some(arguments) = &self.arguments {
            result[key.as_str()]["arguments"] = arguments.help();
        }

        for route in &self.routes {
            let path = format!("{current_path}{}", route.path.path_desc());
            let entry = &mut result[help_key(&path, route.filter.verbs()).as_str()];
            route.path.help(entry);
            route.filter.help(entry);
            route.router.help_into(result, &path, route.filter.verbs());
        }
    }

    /// The help reshaped for API documentation browsers: one `[ "<VERB> <path>", { in, out, .. } ]`
    /// entry per route with a single `GET`, `POST`, `PUT` or `DELETE` verb.
    pub fn autodoc_help(&self) -> Value {
        let mut docs = BTreeMap::new();
        self.collect_docs("", &BTreeSet::new(), &mut docs);

        let routes: Vec<Value> = docs
            .iter()
            .filter_map(|(key, doc)| {
                let parts: Vec<&str> = key.split_whitespace().collect();
                let [path, verb] = parts.as_slice() else {
                    return None;
                };
                if !matches!(*verb, "GET" | "POST" | "PUT" | "DELETE") {
                    return None;
                }
                let properties = doc.arguments.map(RouteArguments::autodoc_properties).unwrap_or_default();
                Some(json!([
                    format!("{verb} {path}"),
                    {
                        "out": { "required": [], "type": "object", "properties": {} },
                        "required_role": null,
                        "docstring": doc.description,
                        "in": { "required": [], "type": "object", "properties": properties }
                    }
                ]))
            })
            .collect();

        json!({ "routes": routes, "literate": [], "config": {} })
    }

    fn collect_docs<'a>(&'a self, current_path: &str, verbs: &BTreeSet<String>, docs: &mut BTreeMap<String, RouteDoc<'a>>) {
        docs.insert(help_key(current_path, verbs), RouteDoc { description: &self.description, arguments: self.arguments.as_ref() });
        for route in &self.routes {
            let path = format!("{current_path}{}", route.path.path_desc());
            route.router.collect_docs(&path, route.filter.verbs(), docs);
        }
    }
}

struct RouteDoc<'a> {
    description: &'a str,
    arguments: Option<&'a RouteArguments>,
}

impl Route {
    fn process(&self, connection: &dyn RestConnection, request: &RestRequest, context: &mut ParsingContext, owner: &Router) -> HandlerResult {
        if !self.filter.check(request) {
            return Ok(MatchResult::No);
        }

        let mut context = context.guard();
        let Some((resources, consumed)) = self.path.match_prefix(context.remaining()) else {
            return Ok(MatchResult::No);
        };
        context.consume(resources, consumed);

        if let Some(extract) = &self.extract {
            extract(connection, request, &mut context)?;
            if connection.response_sent() {
                return Ok(MatchResult::Yes);
            }
        }

        self.router.route(connection, request, &mut context, Some(owner))
    }

    fn options(&self, verbs: &mut BTreeSet<String>, help: &mut Value, request: &RestRequest, context: &mut ParsingContext) {
        let mut context = context.guard();
        let Some((resources, consumed)) = self.path.match_prefix(context.remaining()) else {
            return;
        };
        context.consume(resources, consumed);

        if context.remaining().is_empty() {
            verbs.extend(self.filter.verbs().iter().cloned());
            let entry = &mut help[self.filter.verbs_str().as_str()];
            self.path.help(entry);
            self.filter.help(entry);
            self.router.help_into(help, "", self.filter.verbs());
        }
        self.router.options(verbs, help, request, &mut context);
    }
}

fn help_key(path: &str, verbs: &BTreeSet<String>) -> String {
    if path.is_empty() { join_verbs(verbs) } else { format!("{path} {}", join_verbs(verbs)) }
}

fn redirect(location: String) -> impl Fn(&dyn RestConnection, &RestRequest, &mut ParsingContext) -> HandlerResult + Send + Sync + 'static {
    move |connection, _request, _context| {
        connection.send_redirect(StatusCode::FOUND, &location);
        Ok(MatchResult::Yes)
    }
}

/// Runs one route attempt, turning a handler error or panic into a 500 response.
fn guarded(connection: &dyn RestConnection, attempt: impl FnOnce() -> HandlerResult) -> MatchResult {
    let failure = match panic::catch_unwind(AssertUnwindSafe(attempt)) {
        Ok(Ok(result)) => return result,
        Ok(Err(e)) => format!("handler failed: {e}"),
        Err(payload) => match (payload.downcast_ref::<&str>(), payload.downcast_ref::<String>()) {
            (Some(message), _) => format!("handler panicked: {message}"),
            (None, Some(message)) => format!("handler panicked: {message}"),
            (None, None) => "handler panicked".to_string(),
        },
    };

    error!(%failure, "request failed");
    if connection.response_sent() {
        warn!("response already sent, not sending the error");
    } else {
        connection.send_error_response(StatusCode::INTERNAL_SERVER_ERROR, &failure);
    }
    MatchResult::Yes
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes: Vec<String> = self.routes.iter().map(|route| format!("{} {}", route.path, route.filter.verbs_str())).collect();
        f.debug_struct("Router")
            .field("description", &self.description)
            .field("terminal", &self.terminal)
            .field("has_handler", &self.root.is_some())
            .field("routes", &routes)
            .finish_non_exhaustive()
    }
}
