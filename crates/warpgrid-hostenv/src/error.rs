use std::fmt;

/// An exception value raised or rejected by the host environment.
///
/// Carries the host-side error name (`Error`, `TypeError`, `InvalidStateError`,
/// ...) and an optional message. Rejections without a reason carry no message,
/// which lets callers tell "the host said why" apart from "the host gave up".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    name: String,
    message: Option<String>,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: Some(message.into()),
        }
    }

    /// A rejection that carries no reason at all.
    pub fn opaque() -> Self {
        Self {
            name: "Error".to_string(),
            message: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::named("TypeError", message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::named("InvalidStateError", message)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl std::error::Error for HostError {}

impl From<String> for HostError {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for HostError {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_from_str() {
        let err = HostError::from("test error");
        assert_eq!(err.message(), Some("test error"));
        assert_eq!(err.name(), "Error");
    }

    #[test]
    fn error_display_includes_name() {
        let err = HostError::type_error("Failed to fetch");
        assert_eq!(format!("{err}"), "TypeError: Failed to fetch");
    }

    #[test]
    fn opaque_error_has_no_message() {
        let err = HostError::opaque();
        assert_eq!(err.message(), None);
        assert_eq!(format!("{err}"), "Error");
    }

    #[test]
    fn error_is_std_error() {
        let err = HostError::new("test");
        let _: &dyn std::error::Error = &err;
    }
}
