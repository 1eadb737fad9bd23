//! A case-insensitive header multimap.

use std::fmt;

/// HTTP headers: a multimap with case-insensitive keys.
///
/// Names are collapsed to lowercase for storage. Values keep their insertion
/// order per key; [`get`] returns the first value, [`get_all`] the full
/// sequence.
///
/// ```
/// let mut headers = nett::http::Headers::new();
/// headers.add("Accept", "text/html");
/// headers.add("Accept", "application/json");
///
/// assert_eq!(headers.get("ACCEPT"), Some("text/html"));
/// assert_eq!(headers.get_all("accept").count(), 2);
/// ```
///
/// [`get`]: Headers::get
/// [`get_all`]: Headers::get_all
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// An empty set.
    pub fn new() -> Self {
        Headers::default()
    }

    /// Replaces every value of `name` with `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = lower(name);
        self.entries.retain(|(n, _)| *n != name);
        self.entries.push((name, value.into()));
        self
    }

    /// Appends `value` under `name`, keeping existing values.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((lower(name), value.into()));
        self
    }

    /// The first value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether any value exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes every value of `name`, reporting whether any existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    /// All `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of stored values (not distinct names).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

fn lower(name: impl Into<String>) -> String {
    let mut name = name.into();
    name.make_ascii_lowercase();
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/plain");

        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(headers.get("content-length"), None);
    }

    #[test]
    fn add_keeps_order_and_get_returns_first() {
        let mut headers = Headers::new();
        headers.add("Accept", "text/html");
        headers.add("accept", "application/json");

        assert_eq!(headers.get("Accept"), Some("text/html"));
        let all: Vec<_> = headers.get_all("accept").collect();
        assert_eq!(all, ["text/html", "application/json"]);
    }

    #[test]
    fn set_replaces_every_value() {
        let mut headers = Headers::new();
        headers.add("x-tag", "one");
        headers.add("X-Tag", "two");
        headers.set("X-TAG", "three");

        assert_eq!(headers.get_all("x-tag").count(), 1);
        assert_eq!(headers.get("x-tag"), Some("three"));
    }

    #[test]
    fn names_are_stored_lowercased() {
        let mut headers = Headers::new();
        headers.add("Host", "example.com");
        assert_eq!(headers.iter().next(), Some(("host", "example.com")));
    }
}
