//! Client requests and their wire format.

use std::fmt::Write;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method, Uri};

use crate::ensure;
use crate::protocol::RequestError;

/// A request body with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpContent {
    body: Bytes,
    content_type: String,
}

impl HttpContent {
    pub fn new(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self { body: body.into(), content_type: content_type.into() }
    }

    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::new(body, mime::APPLICATION_JSON.as_ref())
    }

    pub fn text(body: impl Into<Bytes>) -> Self {
        Self::new(body, mime::TEXT_PLAIN_UTF_8.as_ref())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// One outgoing request, immutable once handed to the client.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    verb: Method,
    url: Uri,
    headers: Vec<(String, String)>,
    content: Option<HttpContent>,
    timeout: Option<Duration>,
}

impl HttpRequest {
    /// Creates a request for an absolute `http://` url.
    pub fn new(verb: Method, url: &str) -> Result<Self, RequestError> {
        let url = url.parse::<Uri>().map_err(|e| RequestError::invalid_url(url, e))?;
        match url.scheme_str() {
            Some("http") => {}
            Some(scheme) => return Err(RequestError::UnsupportedScheme { scheme: scheme.to_string() }),
            None => return Err(RequestError::invalid_url(&url, "missing scheme")),
        }
        ensure!(url.host().is_some_and(|host| !host.is_empty()), RequestError::invalid_url(&url, "missing host"));

        Ok(Self { verb, url, headers: Vec::new(), content: None, timeout: None })
    }

    /// Appends url-encoded query parameters to the url.
    pub fn with_query<K: AsRef<str>, V: AsRef<str>>(mut self, params: &[(K, V)]) -> Result<Self, RequestError> {
        if params.is_empty() {
            return Ok(self);
        }
        let pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_ref(), v.as_ref())).collect();
        let encoded = serde_urlencoded::to_string(pairs)?;

        let mut url = self.url.to_string();
        url.push(if self.url.query().is_some() { '&' } else { '?' });
        url.push_str(&encoded);
        self.url = url.parse::<Uri>().map_err(|e| RequestError::invalid_url(&url, e))?;
        Ok(self)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_content(mut self, content: HttpContent) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn verb(&self) -> &Method {
        &self.verb
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn content(&self) -> Option<&HttpContent> {
        self.content.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Responses to HEAD carry no body whatever their headers say.
    pub fn expect_response_body(&self) -> bool {
        self.verb != Method::HEAD
    }
}

/// Rejects names and values that would break the header block, such as embedded line breaks.
fn check_header(name: &str, value: &str) -> Result<(), RequestError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| RequestError::invalid_header(name, e))?;
    HeaderValue::from_str(value).map_err(|e| RequestError::invalid_header(name, e))?;
    Ok(())
}

/// Builds the request line and headers, up to and including the empty line.
///
/// ```
/// use http::Method;
/// use micro_http::client::{HttpRequest, build_request_head};
///
/// let request = HttpRequest::new(Method::GET, "http://localhost:8080/items?id=3").unwrap();
/// assert_eq!(build_request_head(&request).unwrap(), "GET /items?id=3 HTTP/1.1\r\nHost: localhost:8080\r\nAccept: */*\r\n\r\n");
/// ```
pub fn build_request_head(request: &HttpRequest) -> Result<String, RequestError> {
    let url = request.url();
    let mut head = String::with_capacity(256);

    head.push_str(request.verb().as_str());
    head.push(' ');
    head.push_str(if url.path().is_empty() { "/" } else { url.path() });
    if let Some(query) = url.query().filter(|query| !query.is_empty()) {
        head.push('?');
        head.push_str(query);
    }
    head.push_str(" HTTP/1.1\r\n");

    head.push_str("Host: ");
    head.push_str(url.host().unwrap_or_default());
    if let Some(port) = url.port_u16() {
        // writing to a String never fails
        let _ = write!(head, ":{port}");
    }
    head.push_str("\r\nAccept: */*\r\n");

    for (name, value) in request.headers() {
        check_header(name, value)?;
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }

    if let Some(content) = request.content() {
        check_header("Content-Type", content.content_type())?;
        let _ = write!(head, "Content-Length: {}\r\nContent-Type: {}\r\n", content.len(), content.content_type());
    }
    head.push_str("\r\n");
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_head() {
        let request = HttpRequest::new(Method::POST, "http://example.com/items")
            .unwrap()
            .with_header("X-Trace", "abc")
            .with_content(HttpContent::json("{\"a\":1}"));

        assert_eq!(
            build_request_head(&request).unwrap(),
            "POST /items HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\nX-Trace: abc\r\nContent-Length: 7\r\nContent-Type: application/json\r\n\r\n"
        );
    }

    #[test]
    fn test_root_path() {
        let request = HttpRequest::new(Method::GET, "http://example.com").unwrap();
        assert!(build_request_head(&request).unwrap().starts_with("GET / HTTP/1.1\r\n"));
    }

    #[test]
    fn test_header_line_breaks_are_rejected() {
        let base = || HttpRequest::new(Method::GET, "http://example.com/").unwrap();

        let smuggled = base().with_header("X-Trace", "abc\r\nX-Admin: 1");
        assert!(matches!(build_request_head(&smuggled), Err(RequestError::InvalidHeader { name, .. }) if name == "X-Trace"));
        assert!(matches!(build_request_head(&base().with_header("X-Bad\nName", "1")), Err(RequestError::InvalidHeader { .. })));
        assert!(matches!(build_request_head(&base().with_header("", "1")), Err(RequestError::InvalidHeader { .. })));

        let content = base().with_content(HttpContent::new("x", "text/plain\r\nX-Admin: 1"));
        assert!(matches!(build_request_head(&content), Err(RequestError::InvalidHeader { .. })));

        let tabbed = base().with_header("X-Note", "a\tb");
        assert!(build_request_head(&tabbed).unwrap().contains("X-Note: a\tb\r\n"));
    }

    #[test]
    fn test_query_encoding() {
        let request = HttpRequest::new(Method::GET, "http://example.com/search?page=2")
            .unwrap()
            .with_query(&[("q", "a b&c"), ("lang", "en")])
            .unwrap();

        assert_eq!(request.url().query(), Some("page=2&q=a+b%26c&lang=en"));
    }

    #[test]
    fn test_invalid_urls() {
        assert!(matches!(HttpRequest::new(Method::GET, "https://example.com/"), Err(RequestError::UnsupportedScheme { .. })));
        assert!(matches!(HttpRequest::new(Method::GET, "/relative"), Err(RequestError::InvalidUrl { .. })));
        assert!(matches!(HttpRequest::new(Method::GET, "http://exa mple.com/"), Err(RequestError::InvalidUrl { .. })));
    }

    #[test]
    fn test_head_expects_no_body() {
        assert!(!HttpRequest::new(Method::HEAD, "http://example.com/").unwrap().expect_response_body());
        assert!(HttpRequest::new(Method::GET, "http://example.com/").unwrap().expect_response_body());
    }
}
