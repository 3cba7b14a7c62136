//! Ordered, case-preserving header multimap.
//!
//! Names compare case-insensitively, values are kept verbatim and
//! duplicates are allowed, which is what both scripted responses and
//! recorded requests need: assertions see headers exactly as they were
//! sent, in the order they were sent.

use std::fmt;

pub const CONTENT_LENGTH: &str = "Content-Length";
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const CONNECTION: &str = "Connection";
pub const EXPECT: &str = "Expect";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header, keeping any existing entries with the same name.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// Parses a raw `Name: value` line and appends it.
    ///
    /// Returns `None` when the line has no colon or an empty name.
    pub fn add_line(&mut self, line: &str) -> Option<&mut Self> {
        let (name, value) = split_header_line(line)?;
        Some(self.add(name, value))
    }

    /// Replaces every entry named `name` with a single new entry appended
    /// at the end.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.remove(&name);
        self.add(name, value)
    }

    /// Removes all entries whose name matches case-insensitively.
    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// First value recorded under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True when any comma separated token of any `name` entry equals
    /// `token`, ignoring case.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).iter().any(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Renders each entry as a `Name: value` line, in insertion order.
    #[must_use]
    pub fn to_lines(&self) -> Vec<String> {
        self.iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect()
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_lines()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
    }
}

pub(crate) fn split_header_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_keeps_duplicates_in_order() {
        let mut headers = Headers::new();
        headers
            .add("Cookie", "s=square")
            .add("Cookie", "a=android");
        assert_eq!(headers.to_lines(), vec!["Cookie: s=square", "Cookie: a=android"]);
        assert_eq!(headers.get_all("cookie"), vec!["s=square", "a=android"]);
    }

    #[test]
    fn test_set_replaces_case_insensitively_and_appends() {
        let mut headers = Headers::new();
        headers.add_line("Cookie: s=square").unwrap();
        headers.add_line("Cookie: a=android").unwrap();
        headers.add_line("Cookies: delicious").unwrap();
        headers.set("cookie", "r=robot");
        assert_eq!(headers.to_lines(), vec!["Cookies: delicious", "cookie: r=robot"]);
    }

    #[test]
    fn test_add_line_rejects_missing_colon() {
        let mut headers = Headers::new();
        assert!(headers.add_line("no colon here").is_none());
        assert!(headers.add_line(": empty").is_none());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_has_token() {
        let headers: Headers = [("Connection", "Keep-Alive, Upgrade")].into_iter().collect();
        assert!(headers.has_token("connection", "upgrade"));
        assert!(!headers.has_token("connection", "close"));
    }
}
