use http::Method;
use indoc::indoc;
use micro_http::client::{HttpContent, HttpRequest, build_request_head};
use micro_http::parser::{MessageEvents, RequestEvents, RequestParser, ResponseEvents, ResponseParser};
use micro_http::protocol::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Start(String),
    Header(String),
    Data(Vec<u8>),
    Done(bool),
}

/// Records events, merging adjacent body slices so that runs fed in different pieces compare
/// equal.
#[derive(Debug, Default)]
struct Recorder {
    events: Vec<Event>,
}

impl MessageEvents for Recorder {
    fn on_header(&mut self, line: &[u8]) {
        self.events.push(Event::Header(String::from_utf8_lossy(line).into_owned()));
    }

    fn on_data(&mut self, data: &[u8]) {
        assert!(!data.is_empty(), "empty data event");
        if let Some(Event::Data(body)) = self.events.last_mut() {
            body.extend_from_slice(data);
        } else {
            self.events.push(Event::Data(data.to_vec()));
        }
    }

    fn on_done(&mut self, require_close: bool) {
        self.events.push(Event::Done(require_close));
    }
}

impl ResponseEvents for Recorder {
    fn on_response_start(&mut self, version: &str, code: u16) {
        self.events.push(Event::Start(format!("{version} {code}")));
    }
}

impl RequestEvents for Recorder {
    fn on_request_start(&mut self, method: &str, target: &str, version: &str) {
        self.events.push(Event::Start(format!("{method} {target} {version}")));
    }
}

fn crlf(text: &str) -> Vec<u8> {
    text.replace('\n', "\r\n").into_bytes()
}

fn parse_response(chunks: &[&[u8]]) -> Vec<Event> {
    let mut parser = ResponseParser::new();
    let mut recorder = Recorder::default();
    for chunk in chunks {
        parser.feed(chunk, &mut recorder).unwrap();
    }
    recorder.events
}

fn parse_request(chunks: &[&[u8]]) -> Vec<Event> {
    let mut parser = RequestParser::new();
    let mut recorder = Recorder::default();
    for chunk in chunks {
        parser.feed(chunk, &mut recorder).unwrap();
    }
    recorder.events
}

fn responses() -> Vec<Vec<u8>> {
    vec![
        crlf(indoc! {r"
            HTTP/1.1 200 OK
            Content-Length: 5

            hello"}),
        crlf(indoc! {r"
            HTTP/1.1 200 OK
            Transfer-Encoding: chunked
            X-Folded: first
              second

            4;ext=1
            Wiki
            5
            pedia
            0
            Trailer: yes

            HTTP/1.1 204 No Content
            Connection: close

            "}),
        crlf(indoc! {r"
            HTTP/1.0 301 Moved Permanently
            Location: /elsewhere
            content-length: 3
            Connection: Close

            abcHTTP/1.1 404 Not Found
            Content-Length: 0

            "}),
    ]
}

#[test]
fn test_response_scenario_split() {
    let expected = vec![
        Event::Start("HTTP/1.1 200".to_string()),
        Event::Header("Content-Length: 5".to_string()),
        Event::Data(b"hello".to_vec()),
        Event::Done(false),
    ];

    assert_eq!(parse_response(&[b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"]), expected);
    assert_eq!(parse_response(&[b"HTTP/1.1 200 O", b"K\r\nContent-Length: 5\r\n\r\nhel", b"lo"]), expected);
}

#[test]
fn test_response_chunk_invariance_two_pieces() {
    for message in responses() {
        let whole = parse_response(&[&message]);
        for split in 1..message.len() {
            let (head, tail) = message.split_at(split);
            assert_eq!(parse_response(&[head, tail]), whole, "split at {split}");
        }
    }
}

#[test]
fn test_response_chunk_invariance_three_pieces() {
    for message in responses() {
        let whole = parse_response(&[&message]);
        for first in 1..message.len() {
            for second in first + 1..message.len() {
                let chunks = [&message[..first], &message[first..second], &message[second..]];
                assert_eq!(parse_response(&chunks), whole, "split at {first} and {second}");
            }
        }
    }
}

#[test]
fn test_response_byte_by_byte() {
    for message in responses() {
        let chunks: Vec<&[u8]> = message.chunks(1).collect();
        assert_eq!(parse_response(&chunks), parse_response(&[&message]));
    }
}

#[test]
fn test_chunked_and_folded_response() {
    let message = &responses()[1];
    let events = parse_response(&[message]);

    assert_eq!(
        events,
        vec![
            Event::Start("HTTP/1.1 200".to_string()),
            Event::Header("Transfer-Encoding: chunked".to_string()),
            Event::Header("X-Folded: first second".to_string()),
            Event::Data(b"Wikipedia".to_vec()),
            Event::Done(false),
            Event::Start("HTTP/1.1 204".to_string()),
            Event::Header("Connection: close".to_string()),
            Event::Done(true),
        ]
    );
}

#[test]
fn test_folded_header_variants() {
    let message: &[u8] = b"HTTP/1.1 200 OK\r\n\
        X-Tabbed: one\r\n\ttwo\r\n\
        X-Blank: value\r\n   \r\n\
        Content-Length: 0\r\n\r\n";
    let events = parse_response(&[message]);

    assert_eq!(
        events,
        vec![
            Event::Start("HTTP/1.1 200".to_string()),
            Event::Header("X-Tabbed: one two".to_string()),
            Event::Header("X-Blank: value".to_string()),
            Event::Header("Content-Length: 0".to_string()),
            Event::Done(false),
        ]
    );

    for split in 1..message.len() {
        let (head, tail) = message.split_at(split);
        assert_eq!(parse_response(&[head, tail]), events, "split at {split}");
    }
}

#[test]
fn test_missing_line_feed_is_fatal() {
    let mut parser = ResponseParser::new();
    let mut recorder = Recorder::default();

    parser.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r", &mut recorder).unwrap();
    let result = parser.feed(b"X", &mut recorder);

    assert!(matches!(result, Err(ParseError::ExpectedLineFeed)));
}

#[test]
fn test_request_chunk_invariance() {
    let message = crlf(indoc! {r#"
        PUT /items/7?force=true HTTP/1.1
        Host: localhost:8080
        Content-Type: application/json
        Content-Length: 13

        {"name":"a7"}GET /health HTTP/1.1
        Host: localhost:8080
        Connection: close

        "#});

    let whole = parse_request(&[&message]);
    assert_eq!(whole.iter().filter(|event| matches!(event, Event::Done(_))).count(), 2);
    assert_eq!(whole.last(), Some(&Event::Done(true)));

    for split in 1..message.len() {
        let (head, tail) = message.split_at(split);
        assert_eq!(parse_request(&[head, tail]), whole, "split at {split}");
    }
}

#[test]
fn test_request_head_round_trip() {
    let request = HttpRequest::new(Method::POST, "http://localhost:9000/users/create")
        .unwrap()
        .with_query(&[("notify", "yes")])
        .unwrap()
        .with_header("X-Request-Id", "42")
        .with_content(HttpContent::json(r#"{"name":"bob"}"#));

    let mut wire = build_request_head(&request).unwrap().into_bytes();
    wire.extend_from_slice(request.content().unwrap().body());

    assert_eq!(
        parse_request(&[&wire]),
        vec![
            Event::Start("POST /users/create?notify=yes HTTP/1.1".to_string()),
            Event::Header("Host: localhost:9000".to_string()),
            Event::Header("Accept: */*".to_string()),
            Event::Header("X-Request-Id: 42".to_string()),
            Event::Header("Content-Length: 14".to_string()),
            Event::Header("Content-Type: application/json".to_string()),
            Event::Data(br#"{"name":"bob"}"#.to_vec()),
            Event::Done(false),
        ]
    );
}
