use std::hint::black_box;

use bencher::{EventCounter, TestCase, TestFile};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use micro_http::parser::{RequestParser, ResponseParser};

static SMALL_HEADER: TestFile = TestFile::new("get_small.txt", include_str!("../resources/request/get_small.txt"));
static LARGE_HEADER: TestFile = TestFile::new("get_large.txt", include_str!("../resources/request/get_large.txt"));
static CHUNKED_POST: TestFile = TestFile::new("post_chunked.txt", include_str!("../resources/request/post_chunked.txt"));
static JSON_RESPONSE: TestFile = TestFile::new("json_fixed.txt", include_str!("../resources/response/json_fixed.txt"));

fn request_cases() -> Vec<TestCase> {
    vec![
        TestCase::whole("small_header", SMALL_HEADER),
        TestCase::whole("large_header", LARGE_HEADER),
        TestCase::chunked("large_header_by_64", LARGE_HEADER, 64),
        TestCase::whole("chunked_post", CHUNKED_POST),
        TestCase::chunked("chunked_post_by_7", CHUNKED_POST, 7),
    ]
}

fn response_cases() -> Vec<TestCase> {
    vec![TestCase::whole("json_fixed", JSON_RESPONSE), TestCase::chunked("json_fixed_by_16", JSON_RESPONSE, 16)]
}

fn benchmark_request_parser(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("request_parser");

    for case in request_cases() {
        group.throughput(Throughput::Bytes(case.file().content().len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(case.name()), &case, |b, case| {
            let mut parser = RequestParser::new();
            b.iter(|| {
                let mut events = EventCounter::default();
                for piece in case.pieces() {
                    parser.feed(piece, &mut events).expect("input should be a valid http request");
                }
                assert_eq!(events.messages, 1, "{} should hold one request", case.file_name());
                black_box(events)
            });
        });
    }

    group.finish();
}

fn benchmark_response_parser(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("response_parser");

    for case in response_cases() {
        group.throughput(Throughput::Bytes(case.file().content().len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(case.name()), &case, |b, case| {
            let mut parser = ResponseParser::new();
            b.iter(|| {
                let mut events = EventCounter::default();
                for piece in case.pieces() {
                    parser.feed(piece, &mut events).expect("input should be a valid http response");
                }
                black_box(events)
            });
        });
    }

    group.finish();
}

criterion_group!(parser, benchmark_request_parser, benchmark_response_parser);
criterion_main!(parser);
