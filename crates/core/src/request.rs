//! Normalized views over inbound request data.
//!
//! Adapters hand the engine whatever their server gives them — a parsed
//! [`Uri`] or a raw request-target string, single or repeated header and
//! query values. These types normalize both so every validation stage sees
//! one shape.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use http::Uri;
use tracing::debug;

/// The request URL as supplied by the adapter, either already parsed or as
/// the raw request target. Both normalize to the same path/query view.
#[derive(Debug, Clone)]
pub enum RequestUrl {
    Parsed(Uri),
    Raw(String),
}

impl RequestUrl {
    /// The path component, with any query string or fragment stripped.
    pub fn path(&self) -> &str {
        match self {
            Self::Parsed(uri) => uri.path(),
            Self::Raw(raw) => match raw.find(['?', '#']) {
                Some(end) => &raw[..end],
                None => raw,
            },
        }
    }

    /// The query component without the leading `?`, if any.
    pub fn query(&self) -> Option<&str> {
        match self {
            Self::Parsed(uri) => uri.query(),
            Self::Raw(raw) => {
                let start = raw.find('?')? + 1;
                let rest = &raw[start..];
                Some(match rest.find('#') {
                    Some(end) => &rest[..end],
                    None => rest,
                })
            }
        }
    }
}

impl From<Uri> for RequestUrl {
    fn from(uri: Uri) -> Self {
        Self::Parsed(uri)
    }
}

impl From<String> for RequestUrl {
    fn from(raw: String) -> Self {
        Self::Raw(raw)
    }
}

impl From<&str> for RequestUrl {
    fn from(raw: &str) -> Self {
        Self::Raw(raw.to_owned())
    }
}

/// One query parameter: a single value or every value of a repeated key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    One(String),
    Many(Vec<String>),
}

impl QueryValue {
    /// The first value; repeated keys keep their order of appearance.
    pub fn first(&self) -> &str {
        match self {
            Self::One(value) => value,
            Self::Many(values) => values.first().map_or("", String::as_str),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            Self::One(value) => std::slice::from_ref(value).iter().map(String::as_str),
            Self::Many(values) => values.iter().map(String::as_str),
        }
    }
}

/// Parses a query string into the normalized name to one-or-many view.
/// Percent decoding follows the urlencoded rules; a malformed query yields
/// an empty view rather than an error, validators then see missing keys.
pub fn parse_query(query: &str) -> HashMap<String, QueryValue> {
    let pairs = serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .map_err(|e| debug!("cannot parse query string '{}': {}", query, e))
        .unwrap_or_default();

    let mut view = HashMap::new();
    for (name, value) in pairs {
        match view.entry(name) {
            Entry::Vacant(entry) => {
                entry.insert(QueryValue::One(value));
            }
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                match slot {
                    QueryValue::One(first) => {
                        let first = std::mem::take(first);
                        *slot = QueryValue::Many(vec![first, value]);
                    }
                    QueryValue::Many(values) => values.push(value),
                }
            }
        }
    }
    view
}

/// One request header as seen through the adapter: a single value or every
/// value of a repeated header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderInput {
    One(String),
    Many(Vec<String>),
}

impl HeaderInput {
    pub fn first(&self) -> &str {
        match self {
            Self::One(value) => value,
            Self::Many(values) => values.first().map_or("", String::as_str),
        }
    }
}

impl From<&str> for HeaderInput {
    fn from(value: &str) -> Self {
        Self::One(value.to_owned())
    }
}

impl From<String> for HeaderInput {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl From<Vec<String>> for HeaderInput {
    fn from(values: Vec<String>) -> Self {
        Self::Many(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_and_parsed_urls_normalize_identically() {
        let raw = RequestUrl::from("/users/42?sort=asc&page=2#top");
        let parsed = RequestUrl::from("/users/42?sort=asc&page=2".parse::<Uri>().unwrap());

        assert_eq!(raw.path(), "/users/42");
        assert_eq!(parsed.path(), "/users/42");
        assert_eq!(raw.query(), Some("sort=asc&page=2"));
        assert_eq!(parsed.query(), Some("sort=asc&page=2"));
    }

    #[test]
    fn bare_path_has_no_query() {
        let url = RequestUrl::from("/health");
        assert_eq!(url.path(), "/health");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn repeated_query_keys_collect_in_order() {
        let view = parse_query("a=1&b=x&a=2&a=3");
        assert_eq!(view["a"], QueryValue::Many(vec!["1".into(), "2".into(), "3".into()]));
        assert_eq!(view["b"], QueryValue::One("x".into()));
        assert_eq!(view["a"].first(), "1");
        assert_eq!(view["a"].iter().collect::<Vec<_>>(), vec!["1", "2", "3"]);
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let view = parse_query("name=hello%20world");
        assert_eq!(view["name"], QueryValue::One("hello world".into()));
    }
}
