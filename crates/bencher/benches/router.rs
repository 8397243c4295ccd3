use std::hint::black_box;

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use http::{Method, StatusCode};
use micro_rest::{InProcessRestConnection, MatchResult, PathSpec, RestConnection, RestRequest, Router};

fn answer(connection: &dyn RestConnection) -> micro_rest::HandlerResult {
    connection.send_response(StatusCode::OK, Bytes::from_static(b"ok"), "text/plain");
    Ok(MatchResult::Yes)
}

/// `/api/v1/<collection>` with a listing, a lookup by id and a few sub resources each.
fn build_router(collections: usize) -> Router {
    let mut router = Router::with_description("bench");
    router.add_help_route("/help", "GET").expect("fresh router");
    let api = router.add_sub_router("/api/v1", "api").expect("fresh router");
    for index in 0..collections {
        let collection = api.add_sub_router(format!("/collection{index}"), "collection").expect("fresh router");
        collection.add_terminal_route("", "GET", "list", |connection, _, _| answer(connection)).expect("fresh router");
        collection.add_terminal_route("", "POST", "create", |connection, _, _| answer(connection)).expect("fresh router");
        let item = collection
            .add_extracting_sub_router(PathSpec::rx("/([0-9]+)", "/<id>").expect("valid regex"), "one item", |_, _, context| {
                let id = context.last_resource().unwrap_or_default().parse::<u64>()?;
                context.add_object(id);
                Ok(())
            })
            .expect("fresh router");
        item.add_terminal_route("", "GET", "get", |connection, _, _| answer(connection)).expect("fresh router");
        item.add_terminal_route("/history", "GET", "history", |connection, _, _| answer(connection)).expect("fresh router");
    }
    router
}

fn benchmark_router(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("router");

    for collections in [4, 32] {
        let router = build_router(collections);
        let last = collections - 1;
        let requests = [
            ("first_listing", RestRequest::new(Method::GET, "/api/v1/collection0")),
            ("last_item_history", RestRequest::new(Method::GET, &format!("/api/v1/collection{last}/17/history"))),
            ("not_found", RestRequest::new(Method::GET, "/api/v2/nothing")),
            ("options", RestRequest::new(Method::OPTIONS, &format!("/api/v1/collection{last}"))),
        ];

        for (name, request) in &requests {
            group.bench_with_input(BenchmarkId::new(*name, collections), request, |b, request| {
                b.iter(|| {
                    let connection = InProcessRestConnection::new();
                    black_box(router.handle_request(&connection, request))
                });
            });
        }
    }

    group.finish();
}

fn benchmark_help(criterion: &mut Criterion) {
    let router = build_router(32);
    criterion.bench_function("help_document", |b| b.iter(|| black_box(router.help())));
}

criterion_group!(router, benchmark_router, benchmark_help);
criterion_main!(router);
