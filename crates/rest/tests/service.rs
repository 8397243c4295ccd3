use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use micro_http::client::{HttpClient, HttpClientConfig, HttpClientError, HttpContent, HttpRequest, HttpResponse, SimpleCallbacks};
use micro_reactor::{Endpoint, EndpointConfig};
use micro_rest::{HandlerError, MatchResult, PathSpec, RestConnection, RestParam, RestParamDefault, RestServiceEndpoint, Router, ServiceError};
use serde::Deserialize;
use serde_json::{Value, json};

const WAIT: Duration = Duration::from_secs(10);

type Completion = (HttpClientError, HttpResponse);

#[derive(Debug, Deserialize)]
struct NewItem {
    name: String,
    quantity: u32,
}

fn router() -> Router {
    let mut router = Router::with_description("inventory");
    router
        .add_terminal_route("/ping", "GET", "liveness", |connection, _, _| {
            connection.send_response(StatusCode::OK, Bytes::from_static(b"pong"), "text/plain");
            Ok(MatchResult::Yes)
        })
        .unwrap();
    let items = router.add_sub_router("/items", "the items").unwrap();
    items
        .add_terminal_route("", "GET", "list items", |connection, request, _| {
            let page = request.params.get_value("page").unwrap_or("1");
            connection.send_json_response(StatusCode::OK, &json!({ "page": page, "items": [] }));
            Ok(MatchResult::Yes)
        })
        .unwrap();
    items
        .add_terminal_route("", "POST", "create an item", |connection, request, _| {
            let item: NewItem = request.json()?;
            connection.send_json_response(StatusCode::CREATED, &json!({ "created": item.name, "quantity": item.quantity }));
            Ok(MatchResult::Yes)
        })
        .unwrap();
    items
        .add_terminal_route(PathSpec::rx("/([0-9]+)", "/<id>").unwrap(), "DELETE", "delete an item", |connection, _, context| {
            let id = context.last_resource().unwrap_or_default().to_string();
            connection.send_response(StatusCode::OK, Bytes::from(format!("deleted {id}")), "text/plain");
            Ok(MatchResult::Yes)
        })
        .unwrap();
    router
        .add_route_sync_return(
            "/restock",
            "POST",
            "restock an item",
            "the new quantity",
            (RestParam::<u64>::new("id", "item id"), RestParamDefault::new("amount", "how many to add", 1_u32)),
            |id: u64, amount: u32| Ok::<_, HandlerError>(json!({ "id": id, "quantity": 10 + amount })),
        )
        .unwrap();
    router
}

struct Fixture {
    service: RestServiceEndpoint,
    _client_endpoint: Endpoint,
    client: HttpClient,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl Fixture {
    fn start() -> Self {
        let service = RestServiceEndpoint::builder().name("rest-it").address("127.0.0.1:0").num_threads(2).router(router()).build().unwrap();

        let client_endpoint = Endpoint::new(EndpointConfig::new("rest-client").num_threads(1)).unwrap();
        client_endpoint.spinup_with_config().unwrap();
        let client = HttpClient::new(&client_endpoint.handle(), &format!("http://{}", service.local_addr()), HttpClientConfig::new()).unwrap();

        let (tx, rx) = mpsc::channel();
        Self { service, _client_endpoint: client_endpoint, client, tx, rx }
    }

    fn callbacks(&self) -> SimpleCallbacks<impl FnOnce(&HttpRequest, HttpClientError, HttpResponse) + Send + use<>> {
        let tx = self.tx.clone();
        SimpleCallbacks::new(move |_request: &HttpRequest, error, response| {
            tx.send((error, response)).unwrap();
        })
    }

    fn wait(&self) -> HttpResponse {
        let (error, response) = self.rx.recv_timeout(WAIT).unwrap();
        assert_eq!(error, HttpClientError::None);
        response
    }
}

#[test]
fn test_get_routes_and_404() {
    let fixture = Fixture::start();

    assert!(fixture.client.get("/ping", &[] as &[(&str, &str)], fixture.callbacks()).unwrap());
    let response = fixture.wait();
    assert_eq!(response.status, 200);
    assert_eq!(response.headers["content-type"], "text/plain");
    assert_eq!(response.body, Bytes::from_static(b"pong"));

    assert!(fixture.client.get("/items", &[("page", "3")], fixture.callbacks()).unwrap());
    let response = fixture.wait();
    assert_eq!(response.status, 200);
    let listing: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(listing, json!({ "page": "3", "items": [] }));

    assert!(fixture.client.get("/missing", &[] as &[(&str, &str)], fixture.callbacks()).unwrap());
    let response = fixture.wait();
    assert_eq!(response.status, 404);
    assert_eq!(response.body, Bytes::from_static(b"unknown resource GET /missing"));

    fixture.service.shutdown();
}

#[test]
fn test_post_json_and_delete() {
    let fixture = Fixture::start();

    let content = HttpContent::json(r#"{"name":"bolt","quantity":12}"#);
    assert!(fixture.client.post("/items", content, fixture.callbacks()).unwrap());
    let response = fixture.wait();
    assert_eq!(response.status, 201);
    let created: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(created, json!({ "created": "bolt", "quantity": 12 }));

    assert!(fixture.client.post("/items", HttpContent::json("not json"), fixture.callbacks()).unwrap());
    let response = fixture.wait();
    assert_eq!(response.status, 500);
    assert!(String::from_utf8_lossy(&response.body).starts_with("handler failed:"));

    assert!(fixture.client.delete("/items/7", fixture.callbacks()).unwrap());
    let response = fixture.wait();
    assert_eq!(response.body, Bytes::from_static(b"deleted 7"));

    fixture.service.shutdown();
}

#[test]
fn test_options_allow_header() {
    let fixture = Fixture::start();

    let request = fixture.client.request(Method::OPTIONS, "/items", &[] as &[(&str, &str)]).unwrap();
    assert!(fixture.client.enqueue_request(request, fixture.callbacks()));
    let response = fixture.wait();

    assert_eq!(response.status, 200);
    assert_eq!(response.headers["allow"], "GET,POST");
    let help: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(help["POST"]["description"], "create an item");

    fixture.service.shutdown();
}

#[test]
fn test_bound_route_rejects_bad_params() {
    let fixture = Fixture::start();

    let request = fixture.client.request(Method::POST, "/restock", &[("id", "4"), ("amount", "5")]).unwrap();
    assert!(fixture.client.enqueue_request(request, fixture.callbacks()));
    let response = fixture.wait();
    assert_eq!(response.status, 200);
    let restocked: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(restocked, json!({ "id": 4, "quantity": 15 }));

    let request = fixture.client.request(Method::POST, "/restock", &[("id", "four")]).unwrap();
    assert!(fixture.client.enqueue_request(request, fixture.callbacks()));
    let response = fixture.wait();
    assert_eq!(response.status, 400);
    assert!(String::from_utf8_lossy(&response.body).starts_with("cannot decode query parameter 'id'"));

    fixture.service.shutdown();
}

#[test]
fn test_builder_needs_router() {
    let result = RestServiceEndpoint::builder().address("127.0.0.1:0").build();
    assert!(matches!(result, Err(ServiceError::MissingRouter)));
}
