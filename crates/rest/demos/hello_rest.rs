//! A small inventory service.
//!
//! ```text
//! cargo run -p micro-rest --example hello_rest -- ./autodoc
//! curl localhost:8080/items
//! curl -X POST -d '{"name":"bolt","quantity":12}' localhost:8080/items
//! curl -X OPTIONS localhost:8080/items
//! curl localhost:8080/help
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::{env, thread};

use http::StatusCode;
use micro_rest::value_description::StructureDescription;
use micro_rest::{Describe, MatchResult, PathSpec, RestConnection, RestServiceEndpoint, RouteArguments, Router, ValueDescription};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Item {
    name: String,
    quantity: u32,
}

impl Describe for Item {
    fn describe() -> ValueDescription {
        StructureDescription::new("Item").field::<String>("name", "what the item is").field::<u32>("quantity", "how many are in stock").into()
    }
}

type Inventory = Arc<Mutex<BTreeMap<u64, Item>>>;

fn item_routes(router: &mut Router, inventory: &Inventory) {
    let items = router.add_sub_router("/items", "the inventory").expect("fresh router");

    let listing = Arc::clone(inventory);
    items
        .add_terminal_route("", "GET", "list every item", move |connection, _, _| {
            connection.send_json_response(StatusCode::OK, &json!(*listing.lock()));
            Ok(MatchResult::Yes)
        })
        .expect("fresh router");

    let creating = Arc::clone(inventory);
    items
        .add_route(
            "",
            "POST",
            Router::terminal(
                move |connection, request, _| {
                    let item: Item = request.json()?;
                    let mut inventory = creating.lock();
                    let id = inventory.keys().next_back().map_or(1, |last| last + 1);
                    inventory.insert(id, item);
                    connection.send_json_response(StatusCode::CREATED, &json!({ "id": id }));
                    Ok(MatchResult::Yes)
                },
                "add an item",
            )
            .with_arguments(RouteArguments::new().json_param::<Item>("item", "the item to add")),
        )
        .expect("fresh router");

    let single = Arc::clone(inventory);
    items
        .add_terminal_route(PathSpec::rx("/([0-9]+)", "/<id>").expect("valid regex"), "GET", "get one item", move |connection, _, context| {
            let id: u64 = context.last_resource().unwrap_or_default().parse()?;
            match single.lock().get(&id) {
                Some(item) => connection.send_json_response(StatusCode::OK, &json!(item)),
                None => connection.send_error_response(StatusCode::NOT_FOUND, &format!("no item {id}")),
            }
            Ok(MatchResult::Yes)
        })
        .expect("fresh router");
}

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let inventory = Inventory::default();
    let mut router = Router::with_description("inventory service");
    router.add_help_route("/help", "GET").expect("fresh router");
    if let Some(dir) = env::args().nth(1) {
        router.add_autodoc_route("/autodoc", "/help", dir).expect("fresh router");
    }
    item_routes(&mut router, &inventory);

    let service = RestServiceEndpoint::builder().name("hello-rest").address("127.0.0.1:8080").num_threads(4).router(router).build().expect("cannot start the service");
    info!(address = %service.local_addr(), "serving, press ctrl-c to stop");

    loop {
        thread::park();
    }
}
