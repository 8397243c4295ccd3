use std::cmp::Ordering;
use std::fmt;

use regex::Regex;
use serde_json::{Value, json};

use crate::error::RouterError;

/// Matches a prefix of the unmatched part of a request path.
#[derive(Clone)]
pub enum PathSpec {
    /// An exact literal prefix.
    String(String),
    /// A regex that must match at the start of the unmatched path.
    Regex { pattern: String, desc: String, anchored: Regex },
}

impl PathSpec {
    /// A regex path with a human readable description for the help output.
    ///
    /// ```
    /// use micro_rest::PathSpec;
    ///
    /// let spec = PathSpec::rx("/([0-9]+)", "/<id>").unwrap();
    /// assert_eq!(spec.num_captured_elements(), 2);
    /// assert_eq!(spec.path_desc(), "/<id>");
    /// ```
    pub fn rx(pattern: impl Into<String>, desc: impl Into<String>) -> Result<Self, RouterError> {
        let pattern = pattern.into();
        let anchored = Regex::new(&format!("^(?:{pattern})")).map_err(|e| RouterError::invalid_regex(&pattern, e))?;
        Ok(Self::Regex { pattern, desc: desc.into(), anchored })
    }

    /// The pattern or literal this spec was built from.
    pub fn path(&self) -> &str {
        match self {
            Self::String(path) => path,
            Self::Regex { pattern, .. } => pattern,
        }
    }

    /// The description if one was given, otherwise the path itself.
    pub fn path_desc(&self) -> &str {
        match self {
            Self::Regex { desc, .. } if !desc.is_empty() => desc,
            _ => self.path(),
        }
    }

    /// How many resources a match pushes: the whole match plus one per capture group.
    pub fn num_captured_elements(&self) -> usize {
        match self {
            Self::String(_) => 1,
            Self::Regex { anchored, .. } => anchored.captures_len(),
        }
    }

    /// Matches the start of `remaining`, returning the captured resources and the match length.
    pub(crate) fn match_prefix(&self, remaining: &str) -> Option<(Vec<String>, usize)> {
        match self {
            Self::String(path) => remaining.starts_with(path.as_str()).then(|| (vec![path.clone()], path.len())),
            Self::Regex { anchored, .. } => {
                let captures = anchored.captures(remaining)?;
                let consumed = captures.get(0).map_or(0, |whole| whole.end());
                let resources = captures.iter().map(|group| group.map_or_else(String::new, |m| m.as_str().to_string())).collect();
                Some((resources, consumed))
            }
        }
    }

    /// Writes the `path` entry of a help document.
    pub fn help(&self, entry: &mut Value) {
        entry["path"] = match self {
            Self::String(path) => json!(path),
            Self::Regex { pattern, desc, .. } => json!({ "regex": pattern, "desc": desc }),
        };
    }
}

impl From<&str> for PathSpec {
    fn from(path: &str) -> Self {
        Self::String(path.to_string())
    }
}

impl From<String> for PathSpec {
    fn from(path: String) -> Self {
        Self::String(path)
    }
}

impl PartialEq for PathSpec {
    fn eq(&self, other: &Self) -> bool {
        self.path() == other.path()
    }
}

impl Eq for PathSpec {}

impl PartialOrd for PathSpec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathSpec {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path().cmp(other.path())
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl fmt::Debug for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(path) => f.debug_tuple("String").field(path).finish(),
            Self::Regex { pattern, desc, .. } => f.debug_struct("Regex").field("pattern", pattern).field("desc", desc).finish_non_exhaustive(),
        }
    }
}
