use std::fmt;

use bytes::Bytes;
use http::{HeaderMap, Method, Request};
use serde::de::DeserializeOwned;
use tracing::warn;

/// Ordered `key = value` pairs, used for query parameters and extra response headers.
///
/// Keys may repeat; lookups return the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestParams(Vec<(String, String)>);

impl RestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes an `application/x-www-form-urlencoded` query string.
    pub fn from_query(query: &str) -> Result<Self, serde_urlencoded::de::Error> {
        serde_urlencoded::from_str::<Vec<(String, String)>>(query).map(Self)
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn has_value(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RestParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for RestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (key, value)) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

/// One request as the router sees it.
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub verb: Method,
    pub resource: String,
    pub params: RestParams,
    pub headers: HeaderMap,
    pub payload: Bytes,
}

impl RestRequest {
    pub fn new(verb: Method, resource: impl Into<String>) -> Self {
        Self { verb, resource: resource.into(), params: RestParams::new(), headers: HeaderMap::new(), payload: Bytes::new() }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(key, value);
        self
    }

    /// Adds a header; names or values that are not valid HTTP are skipped.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (name.parse::<http::HeaderName>(), value.parse::<http::HeaderValue>()) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!(name, value, "skipping invalid header"),
        }
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// The value of header `name`, or `""` when it is absent or not valid text.
    pub fn header(&self, name: &str) -> &str {
        self.headers.get(name).and_then(|value| value.to_str().ok()).unwrap_or_default()
    }

    /// Deserializes the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

impl From<Request<Bytes>> for RestRequest {
    fn from(request: Request<Bytes>) -> Self {
        let (parts, payload) = request.into_parts();
        let params = match parts.uri.query() {
            Some(query) => RestParams::from_query(query).unwrap_or_else(|e| {
                warn!(query, cause = %e, "ignoring undecodable query string");
                RestParams::new()
            }),
            None => RestParams::new(),
        };
        Self { verb: parts.method, resource: parts.uri.path().to_string(), params, headers: parts.headers, payload }
    }
}

impl fmt::Display for RestRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.verb, self.resource, self.params)?;
        if !self.payload.is_empty() {
            write!(f, " ({} byte payload)", self.payload.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_lookup() {
        let params = RestParams::from_query("a=1&b=two%20words&a=3&flag").unwrap();

        assert_eq!(params.len(), 4);
        assert!(params.has_value("flag"));
        assert!(!params.has_value("missing"));
        assert_eq!(params.get_value("a"), Some("1"));
        assert_eq!(params.get_value("b"), Some("two words"));
        assert_eq!(params.get_value("flag"), Some(""));
    }

    #[test]
    fn test_from_http_request() {
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/items/7?force=true")
            .header("X-Trace", "abc")
            .body(Bytes::from_static(br#"{"id":7}"#))
            .unwrap();

        let request = RestRequest::from(request);

        assert_eq!(request.verb, Method::PUT);
        assert_eq!(request.resource, "/items/7");
        assert_eq!(request.params.get_value("force"), Some("true"));
        assert_eq!(request.header("x-trace"), "abc");
        assert_eq!(request.header("missing"), "");
        let body: serde_json::Value = request.json().unwrap();
        assert_eq!(body["id"], 7);
        assert_eq!(request.to_string(), "PUT /items/7 {force=true} (8 byte payload)");
    }
}
