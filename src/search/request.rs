use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered mapping of search parameter name to raw value.
///
/// Order does not affect matching but is kept for building the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    params: IndexMap<String, String>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a parameter, keeping its original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parameters that constrain the result set: everything except the
    /// result-control parameters. `_id` and other `_`-prefixed filters stay.
    pub fn matching_params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(name, _)| !is_result_control(name))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Query pairs in insertion order.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for SearchRequest
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut request = Self::new();
        for (k, v) in iter {
            request.insert(k, v);
        }
        request
    }
}

impl fmt::Display for SearchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&rendered.join("&"))
    }
}

/// Parameters that shape the reply rather than select resources.
pub const RESULT_CONTROL_PARAMS: &[&str] = &[
    "_include",
    "_revinclude",
    "_count",
    "_sort",
    "_summary",
    "_elements",
    "_total",
    "_contained",
    "_containedType",
    "_format",
];

/// `_include:iterate` and similar modifiers count as their base parameter.
pub fn is_result_control(name: &str) -> bool {
    let base = name.split_once(':').map_or(name, |(base, _)| base);
    RESULT_CONTROL_PARAMS.contains(&base)
}

/// Split a comma-joined multi-value (logical OR), honouring `\,` as a literal
/// comma. Empty alternatives are dropped.
pub fn split_multi_value(raw: &str) -> Vec<String> {
    split_escaped(raw, ',')
}

/// Split a composite value into its `$`-separated components, honouring `\$`.
pub fn split_composite(raw: &str) -> Vec<String> {
    split_escaped(raw, '$')
}

fn split_escaped(raw: &str, separator: char) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&separator) => {
                current.push(separator);
                chars.next();
            }
            c if c == separator => {
                values.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    values.push(current);

    values.retain(|v| !v.is_empty());
    values
}

/// Join values into a multi-value parameter, escaping literal commas.
pub fn join_multi_value<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| v.as_ref().replace(',', "\\,"))
        .collect::<Vec<_>>()
        .join(",")
}
