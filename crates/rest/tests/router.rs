use std::fs;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{Method, StatusCode};
use micro_rest::value_description::StructureDescription;
use micro_rest::{
    Describe, HandlerResult, InProcessRestConnection, MatchResult, ParsingContext, PathSpec, RestConnection, RestParams, RestRequest, RouteArguments, Router,
    ValueDescription,
};
use mockall::mock;
use serde_json::{Value, json};

mock! {
    pub Connection {}

    impl RestConnection for Connection {
        fn send_http_response(&self, code: StatusCode, body: Bytes, content_type: &str, headers: RestParams);
        fn response_sent(&self) -> bool;
        fn is_connected(&self) -> bool;
        fn capture(&self) -> Arc<dyn RestConnection>;
    }
}

fn reply(connection: &dyn RestConnection, body: &str) -> HandlerResult {
    connection.send_response(StatusCode::OK, Bytes::from(body.to_string()), "text/plain");
    Ok(MatchResult::Yes)
}

fn call(router: &Router, request: &RestRequest) -> (MatchResult, InProcessRestConnection) {
    let connection = InProcessRestConnection::new();
    let result = router.handle_request(&connection, request);
    (result, connection)
}

fn get(resource: &str) -> RestRequest {
    RestRequest::new(Method::GET, resource)
}

#[derive(Debug, PartialEq)]
struct User {
    id: u64,
}

#[test]
fn test_regex_route_wins_over_literal_prefix() {
    let mut router = Router::new();
    router.add_terminal_route("/items", "GET", "all items", |connection, _, _| reply(connection, "A")).unwrap();
    router
        .add_terminal_route(PathSpec::rx("/items/([0-9]+)", "/items/<id>").unwrap(), "GET", "one item", |connection, _, context| {
            let captured = context.resources().join("|");
            reply(connection, &format!("B {captured}"))
        })
        .unwrap();

    let (result, connection) = call(&router, &get("/items/42"));
    assert_eq!(result, MatchResult::Yes);
    assert_eq!(connection.body_text(), "B /items/42|42");

    let (_, connection) = call(&router, &get("/items"));
    assert_eq!(connection.body_text(), "A");

    // the same tree answers the same request the same way every time
    for _ in 0..3 {
        let (result, connection) = call(&router, &get("/items/42"));
        assert_eq!(result, MatchResult::Yes);
        assert_eq!(connection.body_text(), "B /items/42|42");
    }
}

#[test]
fn test_header_filter_selects_route() {
    let mut router = Router::new();
    router.add_terminal_route("/test", ["GET", "header:async=true"], "Async route", |connection, _, _| reply(connection, "async")).unwrap();
    router.add_terminal_route("/test", "GET", "Sync route", |connection, _, _| reply(connection, "sync")).unwrap();

    let (_, connection) = call(&router, &get("/test").with_header("async", "true"));
    assert_eq!(connection.body_text(), "async");

    let (_, connection) = call(&router, &get("/test"));
    assert_eq!(connection.body_text(), "sync");
}

#[test]
fn test_query_filter_and_verbs() {
    let mut router = Router::new();
    router.add_terminal_route("/search", ["GET", "format=csv"], "csv", |connection, _, _| reply(connection, "csv")).unwrap();
    router.add_terminal_route("/search", "GET", "json", |connection, _, _| reply(connection, "json")).unwrap();

    let (_, connection) = call(&router, &get("/search").with_param("format", "csv"));
    assert_eq!(connection.body_text(), "csv");

    let (_, connection) = call(&router, &get("/search").with_param("format", "xml"));
    assert_eq!(connection.body_text(), "json");

    let (result, connection) = call(&router, &RestRequest::new(Method::DELETE, "/search"));
    assert_eq!(result, MatchResult::No);
    assert_eq!(connection.response_code(), Some(StatusCode::NOT_FOUND));
    assert_eq!(connection.body_text(), "unknown resource DELETE /search");
}

#[test]
fn test_options_lists_sibling_verbs() {
    let mut router = Router::new();
    router.add_terminal_route("/items", "GET", "list items", |connection, _, _| reply(connection, "list")).unwrap();
    router.add_terminal_route("/items", "POST", "create an item", |_, _, _| panic!("OPTIONS must not run handlers")).unwrap();
    router.add_terminal_route("/other", "PUT", "unrelated", |connection, _, _| reply(connection, "other")).unwrap();

    let (result, connection) = call(&router, &RestRequest::new(Method::OPTIONS, "/items"));

    assert_eq!(result, MatchResult::Yes);
    assert_eq!(connection.response_code(), Some(StatusCode::OK));
    assert_eq!(connection.headers().get_value("Allow"), Some("GET,POST"));
    assert_eq!(connection.content_type(), "application/json");

    let help: Value = serde_json::from_slice(&connection.body()).unwrap();
    assert_eq!(help["GET"]["description"], "list items");
    assert_eq!(help["GET"]["path"], "/items");
    assert_eq!(help["POST"]["description"], "create an item");
    assert!(help.get("PUT").is_none());
}

#[test]
fn test_extracted_object_reaches_handler() {
    let mut router = Router::new();
    let users = router
        .add_extracting_sub_router(PathSpec::rx("/users/([0-9]+)", "/users/<id>").unwrap(), "one user", |_, _, context: &mut ParsingContext| {
            let id = context.resources()[1].parse::<u64>()?;
            context.add_object(User { id });
            Ok(())
        })
        .unwrap();
    users
        .add_terminal_route("/profile", "GET", "profile", |connection, _, context| {
            let user = context.object_as::<User>(-1)?;
            reply(connection, &format!("profile of {}", user.id))
        })
        .unwrap();

    let (_, connection) = call(&router, &get("/users/17/profile"));
    assert_eq!(connection.body_text(), "profile of 17");
}

#[test]
fn test_failed_attempt_leaves_no_residue() {
    let mut router = Router::new();
    let users = router
        .add_extracting_sub_router(PathSpec::rx("/users/([0-9]+)", "/users/<id>").unwrap(), "one user", |_, _, context| {
            context.add_object(User { id: 1 });
            Ok(())
        })
        .unwrap();
    users.add_terminal_route("/profile", "GET", "profile", |connection, _, _| reply(connection, "profile")).unwrap();
    router
        .add_terminal_route(PathSpec::rx("/users/(.*)", "/users/<anything>").unwrap(), "GET", "fallback", |connection, _, context| {
            reply(connection, &format!("{:?} {} {:?}", context.resources(), context.num_objects(), context.remaining()))
        })
        .unwrap();

    let (_, connection) = call(&router, &get("/users/5/settings"));
    assert_eq!(connection.body_text(), r#"["/users/5/settings", "5/settings"] 0 """#);
}

#[test]
fn test_extractor_response_stops_processing() {
    let mut router = Router::new();
    router
        .add_extracting_route(
            "/admin",
            "GET",
            Router::terminal(|_, _, _| panic!("the extractor already answered"), "admin"),
            |connection, _, _| {
                connection.send_error_response(StatusCode::FORBIDDEN, "not allowed");
                Ok(())
            },
        )
        .unwrap();

    let mut connection = MockConnection::new();
    connection
        .expect_send_http_response()
        .times(1)
        .withf(|code, body, content_type, _| *code == StatusCode::FORBIDDEN && body == &Bytes::from_static(b"not allowed") && content_type == "text/plain")
        .return_const(());
    connection.expect_response_sent().return_const(true);

    assert_eq!(router.handle_request(&connection, &get("/admin")), MatchResult::Yes);
}

#[test]
fn test_unknown_resource_sends_one_404() {
    let router = Router::new();

    let mut connection = MockConnection::new();
    connection.expect_send_http_response().times(1).withf(|code, _, _, _| *code == StatusCode::NOT_FOUND).return_const(());
    connection.expect_response_sent().never();

    assert_eq!(router.handle_request(&connection, &get("/nowhere")), MatchResult::No);
}

#[test]
fn test_async_response_through_captured_connection() {
    let parked: Arc<Mutex<Vec<Arc<dyn RestConnection>>>> = Arc::new(Mutex::new(Vec::new()));
    let stash = Arc::clone(&parked);

    let mut router = Router::new();
    router
        .add_terminal_route("/later", "POST", "answers later", move |connection, _, _| {
            stash.lock().unwrap().push(connection.capture());
            Ok(MatchResult::Async)
        })
        .unwrap();

    let (result, connection) = call(&router, &RestRequest::new(Method::POST, "/later"));
    assert_eq!(result, MatchResult::Async);
    assert!(!connection.response_sent());

    let captured = parked.lock().unwrap().pop().unwrap();
    std::thread::spawn(move || captured.send_response(StatusCode::ACCEPTED, Bytes::from_static(b"done"), "text/plain")).join().unwrap();

    assert_eq!(connection.response_code(), Some(StatusCode::ACCEPTED));
    assert_eq!(connection.body_text(), "done");
}

struct Item;

impl Describe for Item {
    fn describe() -> ValueDescription {
        StructureDescription::new("Item").field::<String>("name", "display name").field::<Vec<String>>("tags", "labels").into()
    }
}

fn documented_router() -> Router {
    let mut router = Router::with_description("inventory");
    router.add_help_route("/help", "GET").unwrap();
    let items = router.add_sub_router("/items", "the items").unwrap();
    items
        .add_route(
            "",
            "POST",
            Router::terminal(|connection, _, _| reply(connection, "created"), "create an item").with_arguments(
                RouteArguments::new()
                    .json_param::<Item>("item", "the new item")
                    .json_param::<bool>("dryRun", "validate only"),
            ),
        )
        .unwrap();
    items.add_terminal_route("", ["GET", "POST"], "ambiguous", |connection, _, _| reply(connection, "x")).unwrap();
    router
}

#[test]
fn test_help_route() {
    let router = documented_router();

    let (_, connection) = call(&router, &get("/help"));
    assert_eq!(connection.response_code(), Some(StatusCode::OK));
    let help: Value = serde_json::from_slice(&connection.body()).unwrap();

    assert_eq!(help[""]["description"], "inventory");
    assert_eq!(help["/help GET"]["description"], "Get help on the available API commands");
    assert_eq!(help["/items POST"]["description"], "create an item");
    assert_eq!(help["/items POST"]["arguments"]["jsonParams"][1], json!({ "name": "dryRun", "description": "validate only", "type": "bool" }));
    assert_eq!(help["/items GET,POST"]["verbs"], json!(["GET", "POST"]));
}

#[test]
fn test_autodoc_help() {
    let router = documented_router();

    let (_, connection) = call(&router, &get("/help").with_param("autodoc", ""));
    let autodoc: Value = serde_json::from_slice(&connection.body()).unwrap();

    assert_eq!(autodoc["literate"], json!([]));
    assert_eq!(autodoc["config"], json!({}));
    let routes = autodoc["routes"].as_array().unwrap();
    let names: Vec<&str> = routes.iter().map(|route| route[0].as_str().unwrap()).collect();
    assert_eq!(names, vec!["GET /help", "POST /items"]);

    let create = &routes[1][1];
    assert_eq!(create["docstring"], "create an item");
    assert_eq!(create["required_role"], Value::Null);
    assert_eq!(
        create["in"]["properties"],
        json!({
            "name": { "description": "display name", "type": "string" },
            "tags": { "description": "labels", "type": "array", "items": { "type": "string" } },
            "dryRun": { "description": "validate only", "type": "boolean" }
        })
    );
    assert_eq!(create["out"], json!({ "required": [], "type": "object", "properties": {} }));
}

#[test]
fn test_serve_static_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
    fs::create_dir(dir.path().join("css")).unwrap();
    fs::write(dir.path().join("css").join("site.css"), "h1 { color: red }").unwrap();

    let mut router = Router::new();
    router.serve_static_directory("/static", dir.path()).unwrap();

    let (_, connection) = call(&router, &get("/static/index.html"));
    assert_eq!(connection.response_code(), Some(StatusCode::OK));
    assert_eq!(connection.content_type(), "text/html");
    assert_eq!(connection.body_text(), "<h1>hi</h1>");

    let (_, connection) = call(&router, &get("/static/css/site.css"));
    assert_eq!(connection.content_type(), "text/css");

    let (_, connection) = call(&router, &get("/static/missing.txt"));
    assert_eq!(connection.response_code(), Some(StatusCode::NOT_FOUND));
    assert!(connection.body_text().ends_with("missing.txt' doesn't exist"));

    let (_, connection) = call(&router, &get("/static/../secret"));
    assert_eq!(connection.response_code(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert!(connection.body_text().contains("refusing to serve path"));
}

#[test]
fn test_autodoc_route() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<html>autodoc</html>").unwrap();
    fs::write(dir.path().join("app.js"), "render()").unwrap();

    let mut router = documented_router();
    router.add_autodoc_route("/autodoc", "/help", dir.path()).unwrap();

    for path in ["/autodoc", "/autodoc/"] {
        let (_, connection) = call(&router, &get(path));
        assert_eq!(connection.response_code(), Some(StatusCode::FOUND), "{path}");
        assert_eq!(connection.headers().get_value("Location"), Some("/autodoc/index.html"));
    }

    let (_, connection) = call(&router, &get("/autodoc/autodoc"));
    assert_eq!(connection.headers().get_value("Location"), Some("/help?autodoc"));

    let (_, connection) = call(&router, &get("/autodoc/index.html"));
    assert_eq!(connection.body_text(), "<html>autodoc</html>");

    let (_, connection) = call(&router, &get("/autodoc/app.js"));
    assert_eq!(connection.content_type(), "application/javascript");
}
