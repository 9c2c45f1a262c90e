//! Opaque notification payload.

use std::fmt;
use std::sync::Arc;

/// A notification payload as published upstream.
///
/// The contents are never interpreted: the text is forwarded to every
/// client of a tenant exactly as it arrived. Cloning is cheap, so a single
/// payload can be fanned out to many clients without copying.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Payload(Arc<str>);

impl Payload {
    /// Creates a payload from text.
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    /// Returns the payload text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.as_str()).finish()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_clone_shares_buffer() {
        let payload = Payload::from("{\"event_name\":\"CREATE_PIZZA\"}");
        let copy = payload.clone();
        assert!(Arc::ptr_eq(&payload.0, &copy.0));
        assert_eq!(copy.as_str(), payload.as_str());
    }

    #[test]
    fn test_payload_len() {
        assert!(Payload::from("").is_empty());
        assert_eq!(Payload::from("X").len(), 1);
        assert_eq!(Payload::from("X").as_bytes(), b"X");
    }
}
