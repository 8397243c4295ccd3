use super::{Framing, ResponseEvents};
use crate::ensure;
use crate::protocol::ParseError;

/// Parser for the responses of one connection.
///
/// ```
/// use micro_http::parser::{MessageEvents, ResponseEvents, ResponseParser};
///
/// #[derive(Default)]
/// struct Status(u16, bool);
///
/// impl MessageEvents for Status {
///     fn on_header(&mut self, _line: &[u8]) {}
///     fn on_data(&mut self, _data: &[u8]) {}
///     fn on_done(&mut self, _require_close: bool) {
///         self.1 = true;
///     }
/// }
///
/// impl ResponseEvents for Status {
///     fn on_response_start(&mut self, _version: &str, code: u16) {
///         self.0 = code;
///     }
/// }
///
/// let mut parser = ResponseParser::new();
/// let mut status = Status::default();
/// parser.feed(b"HTTP/1.1 204 No Content\r\n\r\n", &mut status).unwrap();
/// assert_eq!(status.0, 204);
/// assert!(status.1);
/// ```
#[derive(Debug)]
pub struct ResponseParser {
    framing: Framing,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self { framing: Framing::new() }
    }

    pub fn feed<H: ResponseEvents>(&mut self, data: &[u8], handler: &mut H) -> Result<(), ParseError> {
        self.framing.feed(data, handler, parse_status_line::<H>)
    }

    /// Whether the next responses carry a body; set to `false` while waiting for the answer
    /// to a HEAD request.
    pub fn set_expect_body(&mut self, expect_body: bool) {
        self.framing.set_expect_body(expect_body);
    }

    pub fn remaining_body(&self) -> u64 {
        self.framing.remaining_body()
    }

    pub fn use_chunked_encoding(&self) -> bool {
        self.framing.use_chunked_encoding()
    }

    pub fn require_close(&self) -> bool {
        self.framing.require_close()
    }

    /// True between messages with nothing buffered.
    pub fn is_idle(&self) -> bool {
        self.framing.is_idle()
    }

    pub fn clear(&mut self) {
        self.framing.clear();
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// `HTTP/<version> <code>[ <reason>]`, the reason phrase is skipped.
fn parse_status_line<H: ResponseEvents>(line: &[u8], handler: &mut H) -> Result<(), ParseError> {
    ensure!(line.starts_with(b"HTTP/"), ParseError::invalid_start_line("version must start with 'HTTP/'"));

    let Some(version_end) = line.iter().position(|b| *b == b' ') else {
        return Err(ParseError::invalid_start_line("missing status code"));
    };
    let version = std::str::from_utf8(&line[..version_end]).map_err(|_| ParseError::invalid_version(&line[..version_end]))?;

    let rest = &line[version_end + 1..];
    let code_end = rest.iter().position(|b| *b == b' ').unwrap_or(rest.len());
    let code = &rest[..code_end];
    ensure!(code.len() == 3 && code.iter().all(u8::is_ascii_digit), ParseError::invalid_status_code(code));

    let code = code.iter().fold(0u16, |acc, digit| acc * 10 + u16::from(digit - b'0'));
    handler.on_response_start(version, code);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::MessageEvents;
    use indoc::indoc;

    fn crlf(text: &str) -> String {
        text.replace('\n', "\r\n")
    }

    #[derive(Debug, Default, PartialEq)]
    struct Recorder {
        start: Option<(String, u16)>,
        headers: Vec<String>,
        body: Vec<u8>,
        data_events: usize,
        done: Vec<bool>,
    }

    impl MessageEvents for Recorder {
        fn on_header(&mut self, line: &[u8]) {
            self.headers.push(String::from_utf8_lossy(line).into_owned());
        }

        fn on_data(&mut self, data: &[u8]) {
            assert!(!data.is_empty());
            self.data_events += 1;
            self.body.extend_from_slice(data);
        }

        fn on_done(&mut self, require_close: bool) {
            self.done.push(require_close);
        }
    }

    impl ResponseEvents for Recorder {
        fn on_response_start(&mut self, version: &str, code: u16) {
            self.start = Some((version.to_string(), code));
        }
    }

    #[test]
    fn test_simple_response() {
        let mut parser = ResponseParser::new();
        let mut recorder = Recorder::default();

        parser.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello", &mut recorder).unwrap();

        assert_eq!(recorder.start, Some(("HTTP/1.1".to_string(), 200)));
        assert_eq!(recorder.headers, vec!["Content-Length: 5"]);
        assert_eq!(recorder.body, b"hello");
        assert_eq!(recorder.data_events, 1);
        assert_eq!(recorder.done, vec![false]);
        assert!(parser.is_idle());
    }

    #[test]
    fn test_split_status_line() {
        let mut parser = ResponseParser::new();
        let mut recorder = Recorder::default();

        parser.feed(b"HTTP/1.1 200 O", &mut recorder).unwrap();
        assert_eq!(recorder.start, None);

        parser.feed(b"K\r\nContent-Length: 5\r\n\r\nhel", &mut recorder).unwrap();
        assert_eq!(recorder.headers, vec!["Content-Length: 5"]);
        assert_eq!(parser.remaining_body(), 2);

        parser.feed(b"lo", &mut recorder).unwrap();
        assert_eq!(recorder.body, b"hello");
        assert_eq!(recorder.done, vec![false]);
    }

    #[test]
    fn test_status_without_reason() {
        let mut parser = ResponseParser::new();
        let mut recorder = Recorder::default();
        parser.feed(b"HTTP/1.0 404\r\n\r\n", &mut recorder).unwrap();
        assert_eq!(recorder.start, Some(("HTTP/1.0".to_string(), 404)));
        assert_eq!(recorder.done, vec![false]);
    }

    #[test]
    fn test_invalid_status_lines() {
        let mut recorder = Recorder::default();

        let result = ResponseParser::new().feed(b"HTTQ/1.1 200 OK\r\n", &mut recorder);
        assert!(matches!(result, Err(ParseError::InvalidStartLine { .. })));

        let result = ResponseParser::new().feed(b"HTTP/1.1 2x0 OK\r\n", &mut recorder);
        assert!(matches!(result, Err(ParseError::InvalidStatusCode { .. })));

        let result = ResponseParser::new().feed(b"HTTP/1.1 200 OK\rX", &mut recorder);
        assert!(matches!(result, Err(ParseError::ExpectedLineFeed)));
    }

    #[test]
    fn test_connection_close() {
        let mut parser = ResponseParser::new();
        let mut recorder = Recorder::default();

        let response = indoc! {r##"
            HTTP/1.1 200 OK
            connection: Close
            Content-Length: 0

        "##};
        parser.feed(crlf(response).as_bytes(), &mut recorder).unwrap();

        assert_eq!(recorder.done, vec![true]);
        assert!(!parser.require_close());
    }

    #[test]
    fn test_head_response_has_no_body() {
        let mut parser = ResponseParser::new();
        parser.set_expect_body(false);
        let mut recorder = Recorder::default();

        parser.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n", &mut recorder).unwrap();

        assert_eq!(recorder.done, vec![false]);
        assert!(recorder.body.is_empty());
        assert!(parser.is_idle());
    }

    #[test]
    fn test_chunked_response() {
        let mut parser = ResponseParser::new();
        let mut recorder = Recorder::default();

        let response = indoc! {r##"
            HTTP/1.1 200 OK
            Transfer-Encoding: chunked
            
            5
            hello
            7;ext=1
            , world
            0
            Trailer: x

        "##};
        parser.feed(crlf(response).as_bytes(), &mut recorder).unwrap();

        assert_eq!(recorder.body, b"hello, world");
        assert_eq!(recorder.done, vec![false]);
        assert!(parser.is_idle());
    }

    #[test]
    fn test_keep_alive_sequence() {
        let mut parser = ResponseParser::new();
        let mut recorder = Recorder::default();

        let responses = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nabHTTP/1.1 201 Created\r\nContent-Length: 1\r\n\r\nc";
        parser.feed(responses, &mut recorder).unwrap();

        assert_eq!(recorder.start, Some(("HTTP/1.1".to_string(), 201)));
        assert_eq!(recorder.body, b"abc");
        assert_eq!(recorder.done, vec![false, false]);
    }

    #[test]
    fn test_empty_feed_is_noop() {
        let mut parser = ResponseParser::new();
        let mut recorder = Recorder::default();
        parser.feed(b"", &mut recorder).unwrap();
        assert_eq!(recorder, Recorder::default());
        assert!(parser.is_idle());
    }

    #[test]
    fn test_clear_after_fault() {
        let mut parser = ResponseParser::new();
        let mut recorder = Recorder::default();

        parser.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhe", &mut recorder).unwrap();
        assert_eq!(parser.remaining_body(), 3);
        parser.clear();
        assert_eq!(parser.remaining_body(), 0);
        assert!(parser.is_idle());

        parser.feed(b"HTTP/1.1 204 No Content\r\n\r\n", &mut recorder).unwrap();
        assert_eq!(recorder.start, Some(("HTTP/1.1".to_string(), 204)));
    }
}
