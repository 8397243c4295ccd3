use std::collections::BTreeSet;
use std::fmt;

use http::Method;
use serde_json::{Value, json};

use crate::request::RestRequest;

/// Where a [`ParamFilter`] looks for its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterLocation {
    Query,
    Header,
}

/// Requires a query parameter or header to carry an exact value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamFilter {
    pub location: FilterLocation,
    pub param: String,
    pub value: String,
}

impl ParamFilter {
    /// Whether the request satisfies this filter.
    ///
    /// An absent header reads as the empty string.
    pub fn check(&self, request: &RestRequest) -> bool {
        match self.location {
            FilterLocation::Query => request.params.iter().any(|(key, value)| key == self.param && value == self.value),
            FilterLocation::Header => request.header(&self.param) == self.value,
        }
    }
}

impl fmt::Display for ParamFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location == FilterLocation::Header {
            f.write_str("header:")?;
        }
        write!(f, "{}={}", self.param, self.value)
    }
}

/// Accepted verbs plus parameter filters for one route.
///
/// Built from strings: a plain entry is a verb, `key=value` requires a query parameter and
/// `header:key=value` requires a header.
///
/// ```
/// use micro_rest::RequestFilter;
///
/// let filter = RequestFilter::from(["GET", "header:async=true", "format=json"]);
/// assert_eq!(filter.verbs_str(), "GET");
/// assert_eq!(filter.filters().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    verbs: BTreeSet<String>,
    filters: Vec<ParamFilter>,
}

impl RequestFilter {
    /// Accepts every verb.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn parse<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::default();
        for entry in entries {
            filter.add(entry.as_ref());
        }
        filter
    }

    fn add(&mut self, entry: &str) {
        let Some((key, value)) = entry.split_once('=') else {
            self.verbs.insert(entry.to_string());
            return;
        };
        let (location, param) = match key.strip_prefix("header:") {
            Some(header) => (FilterLocation::Header, header),
            None => (FilterLocation::Query, key),
        };
        self.filters.push(ParamFilter { location, param: param.to_string(), value: value.to_string() });
    }

    pub fn verbs(&self) -> &BTreeSet<String> {
        &self.verbs
    }

    pub fn filters(&self) -> &[ParamFilter] {
        &self.filters
    }

    /// The verbs joined with `,`, in sorted order.
    pub fn verbs_str(&self) -> String {
        join_verbs(&self.verbs)
    }

    /// Whether the verb is accepted and every parameter filter holds.
    pub fn check(&self, request: &RestRequest) -> bool {
        (self.verbs.is_empty() || self.verbs.contains(request.verb.as_str())) && self.filters.iter().all(|filter| filter.check(request))
    }

    /// Writes the `verbs` and `filters` entries of a help document.
    pub fn help(&self, entry: &mut Value) {
        if !self.verbs.is_empty() {
            entry["verbs"] = json!(self.verbs);
        }
        if !self.filters.is_empty() {
            entry["filters"] = self.filters.iter().map(ToString::to_string).collect();
        }
    }
}

pub(crate) fn join_verbs(verbs: &BTreeSet<String>) -> String {
    verbs.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

impl From<&str> for RequestFilter {
    fn from(entry: &str) -> Self {
        Self::parse([entry])
    }
}

impl<const N: usize> From<[&str; N]> for RequestFilter {
    fn from(entries: [&str; N]) -> Self {
        Self::parse(entries)
    }
}

impl From<Method> for RequestFilter {
    fn from(method: Method) -> Self {
        Self::parse([method.as_str()])
    }
}
