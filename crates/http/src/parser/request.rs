use super::{Framing, RequestEvents};
use crate::ensure;
use crate::protocol::ParseError;

/// Parser for the requests arriving on one server connection.
#[derive(Debug)]
pub struct RequestParser {
    framing: Framing,
}

impl RequestParser {
    pub fn new() -> Self {
        Self { framing: Framing::new() }
    }

    pub fn feed<H: RequestEvents>(&mut self, data: &[u8], handler: &mut H) -> Result<(), ParseError> {
        self.framing.feed(data, handler, parse_request_line::<H>)
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

    pub fn is_idle(&self) -> bool {
        self.framing.is_idle()
    }

    pub fn clear(&mut self) {
        self.framing.clear();
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// `<method> <target> HTTP/<version>`
fn parse_request_line<H: RequestEvents>(line: &[u8], handler: &mut H) -> Result<(), ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::invalid_start_line("request line is not utf-8"))?;

    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return Err(ParseError::invalid_start_line(format!("expected '<method> <target> <version>', got '{line}'")));
    };

    ensure!(!method.is_empty() && method.bytes().all(|b| b.is_ascii_alphabetic()), ParseError::invalid_start_line(format!("invalid method '{method}'")));
    ensure!(!target.is_empty(), ParseError::invalid_start_line("empty request target"));
    ensure!(version.starts_with("HTTP/"), ParseError::invalid_version(version.as_bytes()));

    handler.on_request_start(method, target, version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::MessageEvents;
    use indoc::indoc;

    #[derive(Debug, Default)]
    struct Recorder {
        start: Vec<(String, String, String)>,
        headers: Vec<String>,
        body: Vec<u8>,
        done: Vec<bool>,
    }

    impl MessageEvents for Recorder {
        fn on_header(&mut self, line: &[u8]) {
            self.headers.push(String::from_utf8_lossy(line).into_owned());
        }

        fn on_data(&mut self, data: &[u8]) {
            self.body.extend_from_slice(data);
        }

        fn on_done(&mut self, require_close: bool) {
            self.done.push(require_close);
        }
    }

    impl RequestEvents for Recorder {
        fn on_request_start(&mut self, method: &str, target: &str, version: &str) {
            self.start.push((method.to_string(), target.to_string(), version.to_string()));
        }
    }

    #[test]
    fn test_get_request() {
        let request = indoc! {r##"
        GET /index/?a=1&b=2 HTTP/1.1
        Host: 127.0.0.1:8080
        Accept: */*

        "##}
        .replace('\n', "\r\n");

        let mut parser = RequestParser::new();
        let mut recorder = Recorder::default();
        parser.feed(request.as_bytes(), &mut recorder).unwrap();

        assert_eq!(recorder.start, vec![("GET".into(), "/index/?a=1&b=2".into(), "HTTP/1.1".into())]);
        assert_eq!(recorder.headers, vec!["Host: 127.0.0.1:8080", "Accept: */*"]);
        assert!(recorder.body.is_empty());
        assert_eq!(recorder.done, vec![false]);
    }

    #[test]
    fn test_post_request_byte_by_byte() {
        let request = b"POST /items HTTP/1.1\r\nContent-Length: 7\r\nConnection: close\r\n\r\n{\"a\":1}";

        let mut parser = RequestParser::new();
        let mut recorder = Recorder::default();
        for byte in request {
            parser.feed(std::slice::from_ref(byte), &mut recorder).unwrap();
        }

        assert_eq!(recorder.start.len(), 1);
        assert_eq!(recorder.body, b"{\"a\":1}");
        assert_eq!(recorder.done, vec![true]);
    }

    #[test]
    fn test_invalid_request_lines() {
        let mut recorder = Recorder::default();

        for line in ["GET /\r\n", "GET / HTTP/1.1 extra\r\n", "G3T / HTTP/1.1\r\n", "GET / FTP/1.0\r\n"] {
            let result = RequestParser::new().feed(line.as_bytes(), &mut recorder);
            assert!(result.is_err(), "{line:?} should be rejected");
        }
        assert!(recorder.start.is_empty());
    }
}
