//! Shared fixtures of the benchmarks.

use micro_http::parser::{MessageEvents, RequestEvents, ResponseEvents};

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    file: TestFile,
    chunk_size: Option<usize>,
}

impl TestCase {
    /// A case feeding the whole message in one call.
    pub fn whole(name: &'static str, file: TestFile) -> Self {
        Self { name, file, chunk_size: None }
    }

    /// A case feeding the message `chunk_size` bytes at a time, as a slow socket would.
    pub fn chunked(name: &'static str, file: TestFile, chunk_size: usize) -> Self {
        Self { name, file, chunk_size: Some(chunk_size) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn file(&self) -> &TestFile {
        &self.file
    }

    pub fn file_name(&self) -> &'static str {
        self.file().file_name
    }

    /// The pieces the message is fed in.
    pub fn pieces(&self) -> impl Iterator<Item = &'static [u8]> + use<> {
        let content = self.file.content.as_bytes();
        content.chunks(self.chunk_size.unwrap_or(content.len()).max(1))
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TestFile {
    file_name: &'static str,
    content: &'static str,
}

impl TestFile {
    pub const fn new(file_name: &'static str, content: &'static str) -> Self {
        Self { file_name, content }
    }

    pub fn content(&self) -> &'static str {
        self.content
    }

    pub fn file_name(&self) -> &'static str {
        self.file_name
    }
}

/// Parser events that only count what they see.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EventCounter {
    pub starts: usize,
    pub headers: usize,
    pub body_bytes: usize,
    pub messages: usize,
}

impl MessageEvents for EventCounter {
    fn on_header(&mut self, _line: &[u8]) {
        self.headers += 1;
    }

    fn on_data(&mut self, data: &[u8]) {
        self.body_bytes += data.len();
    }

    fn on_done(&mut self, _require_close: bool) {
        self.messages += 1;
    }
}

impl RequestEvents for EventCounter {
    fn on_request_start(&mut self, _method: &str, _target: &str, _version: &str) {
        self.starts += 1;
    }
}

impl ResponseEvents for EventCounter {
    fn on_response_start(&mut self, _version: &str, _code: u16) {
        self.starts += 1;
    }
}
