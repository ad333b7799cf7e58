//! Host header collection.
//!
//! Mirrors the semantics of the host's `Headers` object: names are stored
//! lower-cased, appending to an existing name combines the values with
//! `", "`, and iteration yields entries sorted by name.

use crate::error::HostError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    list: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap header entries exactly as they arrived on the wire, without
    /// validation or normalisation.
    pub fn from_raw(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            list: entries.into_iter().collect(),
        }
    }

    /// Append a header value, rejecting names and values the host would
    /// refuse with a `TypeError`.
    pub fn append(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        validate(name, value)?;
        self.list.push((name.to_ascii_lowercase(), value.trim().to_string()));
        Ok(())
    }

    /// Replace every value for `name` with `value`.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        validate(name, value)?;
        self.list.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.list.push((name.to_ascii_lowercase(), value.trim().to_string()));
        Ok(())
    }

    /// The combined value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .list
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.list.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Iterate entries the way the host does: one entry per lower-cased
    /// name, sorted, with repeated values combined. `set-cookie` values are
    /// never combined.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut names: Vec<String> = self
            .list
            .iter()
            .map(|(n, _)| n.to_ascii_lowercase())
            .collect();
        names.sort();
        names.dedup();

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            if name == "set-cookie" {
                for (n, v) in &self.list {
                    if n.eq_ignore_ascii_case(&name) {
                        out.push((name.clone(), v.clone()));
                    }
                }
            } else if let Some(value) = self.get(&name) {
                out.push((name, value));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

fn validate(name: &str, value: &str) -> Result<(), HostError> {
    if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
        return Err(HostError::type_error(format!("invalid header name: {name:?}")));
    }
    if http::HeaderValue::from_str(value.trim()).is_err() {
        return Err(HostError::type_error(format!(
            "invalid header value for {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_lowercases_and_combines() {
        let mut headers = Headers::new();
        headers.append("Accept", "text/html").unwrap();
        headers.append("accept", "application/json").unwrap();
        assert_eq!(
            headers.get("ACCEPT").as_deref(),
            Some("text/html, application/json")
        );
    }

    #[test]
    fn entries_are_sorted_and_combined() {
        let mut headers = Headers::new();
        headers.append("X-Zeta", "1").unwrap();
        headers.append("Content-Type", "text/plain").unwrap();
        headers.append("x-zeta", "2").unwrap();

        assert_eq!(
            headers.entries(),
            vec![
                ("content-type".to_string(), "text/plain".to_string()),
                ("x-zeta".to_string(), "1, 2".to_string()),
            ]
        );
    }

    #[test]
    fn set_cookie_is_never_combined() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1").unwrap();
        headers.append("Set-Cookie", "b=2").unwrap();
        assert_eq!(headers.entries().len(), 2);
    }

    #[test]
    fn set_replaces_values() {
        let mut headers = Headers::new();
        headers.append("X-Test", "1").unwrap();
        headers.append("X-Test", "2").unwrap();
        headers.set("x-test", "3").unwrap();
        assert_eq!(headers.get("X-Test").as_deref(), Some("3"));
    }

    #[test]
    fn invalid_name_is_a_type_error() {
        let mut headers = Headers::new();
        let err = headers.append("bad header", "x").unwrap_err();
        assert_eq!(err.name(), "TypeError");
        assert!(headers.is_empty());
    }

    #[test]
    fn raw_entries_skip_validation() {
        let headers = Headers::from_raw(vec![("bad header".to_string(), "x".to_string())]);
        assert_eq!(headers.len(), 1);
        assert!(headers.has("bad header"));
    }
}
