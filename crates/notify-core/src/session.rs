//! Connection keys, client identities and the session they resolve to.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DomainError, DomainResult, TenantId};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// One-time credential presented in the WebSocket handshake.
///
/// Created by an upstream service (stored in the key store with a short
/// expiry) and consumed exactly once by the gateway.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    /// Creates a key, rejecting empty or whitespace-only input.
    pub fn parse(key: impl Into<String>) -> DomainResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(DomainError::EmptyKey);
        }
        Ok(Self(key))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form safe to put in logs.
    #[must_use]
    pub fn redacted(&self) -> String {
        let head = self.0.get(..4).unwrap_or(&self.0);
        format!("{head}…")
    }
}

// Keys are credentials until consumed: keep them out of debug output.
impl fmt::Debug for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionKey").field(&self.redacted()).finish()
    }
}

/// Identity of a client inside its hub.
///
/// Derived from the connection key, which is unique per connection, so two
/// tabs of the same user are two distinct members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a new ClientId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&ConnectionKey> for ClientId {
    fn from(key: &ConnectionKey) -> Self {
        Self(key.0.clone())
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Session Descriptor
// ============================================================================

/// What a connection key resolves to in the key store.
///
/// Stored upstream as `{"token": ..., "user_uuid": ..., "store_id": ...}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Tenant the connection belongs to
    #[serde(rename = "store_id")]
    pub tenant_id: TenantId,

    /// User that requested the key
    #[serde(rename = "user_uuid", alias = "user_id")]
    pub user_id: String,

    /// Upstream access token the key was issued against
    pub token: String,
}

impl SessionDescriptor {
    /// Creates a descriptor.
    pub fn new(tenant_id: TenantId, user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            tenant_id,
            user_id: user_id.into(),
            token: token.into(),
        }
    }

    /// Parses the JSON ticket stored in the key store.
    pub fn from_json(raw: &str) -> DomainResult<Self> {
        serde_json::from_str(raw).map_err(|e| DomainError::parse("session descriptor", e))
    }

    /// Serializes to the JSON ticket format.
    pub fn to_json(&self) -> DomainResult<String> {
        serde_json::to_string(self).map_err(|e| DomainError::parse("session descriptor", e))
    }
}

impl fmt::Debug for SessionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDescriptor")
            .field("tenant_id", &self.tenant_id)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_key_rejects_empty() {
        assert_eq!(ConnectionKey::parse(""), Err(DomainError::EmptyKey));
        assert_eq!(ConnectionKey::parse("   "), Err(DomainError::EmptyKey));
        assert_eq!(ConnectionKey::parse("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_connection_key_debug_is_redacted() {
        let key = ConnectionKey::parse("supersecretkey").unwrap();
        let debug = format!("{key:?}");
        assert!(!debug.contains("supersecretkey"));
        assert!(debug.contains("supe"));
    }

    #[test]
    fn test_client_id_from_key() {
        let key = ConnectionKey::parse("k-1").unwrap();
        assert_eq!(ClientId::from(&key).as_str(), "k-1");
    }

    #[test]
    fn test_descriptor_parses_upstream_ticket() {
        let raw = r#"{"token":"jwt","user_uuid":"u-1","store_id":7}"#;
        let desc = SessionDescriptor::from_json(raw).unwrap();
        assert_eq!(desc.tenant_id, TenantId::new(7));
        assert_eq!(desc.user_id, "u-1");
        assert_eq!(desc.token, "jwt");
    }

    #[test]
    fn test_descriptor_accepts_user_id_alias() {
        let raw = r#"{"token":"t","user_id":"u-2","store_id":9}"#;
        let desc = SessionDescriptor::from_json(raw).unwrap();
        assert_eq!(desc.user_id, "u-2");
    }

    #[test]
    fn test_descriptor_rejects_missing_store() {
        let err = SessionDescriptor::from_json(r#"{"token":"t","user_uuid":"u"}"#).unwrap_err();
        assert!(err.to_string().contains("session descriptor"));
    }

    #[test]
    fn test_descriptor_debug_hides_token() {
        let desc = SessionDescriptor::new(TenantId::new(1), "u", "secret-token");
        assert!(!format!("{desc:?}").contains("secret-token"));
    }

    #[test]
    fn test_descriptor_json_uses_upstream_names() {
        let desc = SessionDescriptor::new(TenantId::new(3), "u", "t");
        let json = desc.to_json().unwrap();
        assert!(json.contains("\"store_id\":3"));
        assert!(json.contains("\"user_uuid\":\"u\""));
    }
}
