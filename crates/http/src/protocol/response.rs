//! Serialization of server responses.

use std::io::{self, Write};

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderValue, Response, header};

const INIT_HEADER_SIZE: usize = 1024;

/// Writes `response` as an HTTP/1.1 message with a `Content-Length` framed body.
///
/// A `Content-Length` header already present is replaced by the size of the body, a
/// `Transfer-Encoding` header is dropped.
pub fn encode_response(response: Response<Bytes>, dst: &mut BytesMut) {
    let (mut parts, body) = response.into_parts();

    dst.reserve(INIT_HEADER_SIZE + body.len());
    let reason = parts.status.canonical_reason().unwrap_or("Unknown");
    // writing into a BytesMut never fails
    let _ = write!(BytesWriter(dst), "HTTP/1.1 {} {}\r\n", parts.status.as_str(), reason);

    parts.headers.remove(header::TRANSFER_ENCODING);
    parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

    for (name, value) in &parts.headers {
        dst.put_slice(name.as_ref());
        dst.put_slice(b": ");
        dst.put_slice(value.as_ref());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
    dst.put_slice(&body);
}

struct BytesWriter<'a>(&'a mut BytesMut);

impl Write for BytesWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
