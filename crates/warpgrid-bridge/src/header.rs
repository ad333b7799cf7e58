//! Header multimaps and line-oriented header blocks.

use std::fmt::Write as _;

use crate::error::{BridgeError, BridgeResult};

/// An HTTP header as a name-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An ordered collection of HTTP headers.
///
/// Preserves insertion order and supports duplicate header names
/// (e.g., multiple `Set-Cookie` headers). Lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<Header>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a value, keeping any existing values for `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header::new(name, value));
    }

    /// Replace every value for `name` with `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push(Header::new(name, value));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|h| !h.name.eq_ignore_ascii_case(name));
    }

    /// Get the first header value matching `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Get all header values matching `name` (case-insensitive).
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|h| h.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    /// Distinct names in first-seen order, as they were inserted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for h in &self.entries {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&h.name)) {
                names.push(&h.name);
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Header> {
        self.entries
    }
}

impl FromIterator<Header> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl FromIterator<(String, String)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| Header::new(n, v))
                .collect(),
        }
    }
}

/// Canonical form of a header name: the first letter and any letter after
/// a hyphen upper-cased, the rest lower-cased. Names containing bytes that
/// are not valid in a header token are returned unchanged.
pub fn canonical_name(name: &str) -> String {
    if !name.bytes().all(is_token_byte) {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Serialise header pairs as `Name: value` lines terminated by a blank line.
pub fn write_header_block<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut block = String::new();
    for (name, value) in entries {
        let _ = write!(block, "{name}: {value}\r\n");
    }
    block.push_str("\r\n");
    block
}

/// Parse a header block under standard header-field rules.
///
/// Lines may end in CRLF or LF and the block ends at the first empty line.
/// A line starting with a space or tab continues the previous value. Names
/// are validated as tokens and canonicalised; values are trimmed and must
/// be valid header values.
pub fn parse_header_block(block: &str) -> BridgeResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut current: Option<(String, String)> = None;

    for line in block.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            match current.as_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim());
                    continue;
                }
                None => {
                    return Err(BridgeError::MalformedHeader(format!(
                        "continuation before first header: {line:?}"
                    )));
                }
            }
        }
        if let Some((name, value)) = current.take() {
            push_validated(&mut headers, name, value)?;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(BridgeError::MalformedHeader(format!(
                "missing colon in line: {line:?}"
            )));
        };
        if name.is_empty() || name.ends_with(' ') || name.ends_with('\t') {
            return Err(BridgeError::MalformedHeader(format!(
                "invalid header name: {name:?}"
            )));
        }
        current = Some((name.to_string(), value.trim().to_string()));
    }
    if let Some((name, value)) = current.take() {
        push_validated(&mut headers, name, value)?;
    }
    Ok(headers)
}

fn push_validated(headers: &mut HeaderMap, name: String, value: String) -> BridgeResult<()> {
    if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
        return Err(BridgeError::MalformedHeader(format!(
            "invalid header name: {name:?}"
        )));
    }
    if http::HeaderValue::from_str(&value).is_err() {
        return Err(BridgeError::MalformedHeader(format!(
            "invalid value for header {name:?}"
        )));
    }
    headers.insert(canonical_name(&name), value);
    Ok(())
}
