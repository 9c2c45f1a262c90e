//! Notification envelope published by upstream services.
//!
//! Upstream publishes JSON of the form
//! `{"store_id": 7, "payload": {"event_name": "CREATE_PIZZA", "data": {...}}}`
//! on the [`NOTIFICATION_CHANNEL`] channel. The payload is kept as raw JSON
//! text and forwarded to browsers untouched.

use notify_core::{Payload, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

/// Pub/sub channel notifications are published on.
pub const NOTIFICATION_CHANNEL: &str = "NOTIFICATION";

/// A decoded notification: which tenant, and what to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEnvelope {
    pub tenant_id: TenantId,
    pub payload: Payload,
}

#[derive(Deserialize)]
struct RawEnvelope<'a> {
    store_id: TenantId,
    #[serde(borrow)]
    payload: &'a RawValue,
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a> {
    store_id: TenantId,
    payload: &'a RawValue,
}

impl NotificationEnvelope {
    /// Creates an envelope.
    pub fn new(tenant_id: TenantId, payload: impl Into<Payload>) -> Self {
        Self {
            tenant_id,
            payload: payload.into(),
        }
    }

    /// Decodes a raw event received from the pub/sub transport.
    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: RawEnvelope<'_> = serde_json::from_slice(raw).map_err(ProtocolError::decode)?;

        Ok(Self {
            tenant_id: envelope.store_id,
            payload: Payload::new(envelope.payload.get()),
        })
    }

    /// Encodes in the upstream publish format.
    ///
    /// Fails if the payload is not itself valid JSON.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let payload: &RawValue =
            serde_json::from_str(self.payload.as_str()).map_err(ProtocolError::encode)?;
        serde_json::to_string(&OutgoingEnvelope {
            store_id: self.tenant_id,
            payload,
        })
        .map_err(ProtocolError::encode)
    }
}

/// Errors converting envelopes to and from the wire.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("malformed notification envelope: {0}")]
    Decode(String),

    #[error("cannot encode notification envelope: {0}")]
    Encode(String),
}

impl ProtocolError {
    fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    fn encode(err: impl std::fmt::Display) -> Self {
        Self::Encode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_keeps_payload_verbatim() {
        let raw = br#"{"store_id":7,"payload":{"event_name":"CREATE_PIZZA","data":{"id": 1}}}"#;
        let envelope = NotificationEnvelope::decode(raw).unwrap();
        assert_eq!(envelope.tenant_id, TenantId::new(7));
        // Whitespace inside the payload is preserved, not re-serialized.
        assert_eq!(
            envelope.payload.as_str(),
            r#"{"event_name":"CREATE_PIZZA","data":{"id": 1}}"#
        );
    }

    #[test]
    fn test_decode_string_payload() {
        let envelope = NotificationEnvelope::decode(br#"{"store_id":7,"payload":"X"}"#).unwrap();
        assert_eq!(envelope.payload.as_str(), "\"X\"");
    }

    #[test]
    fn test_decode_rejects_missing_store_id() {
        let err = NotificationEnvelope::decode(br#"{"payload":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_non_integer_store_id() {
        assert!(NotificationEnvelope::decode(br#"{"store_id":"7","payload":{}}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_missing_payload() {
        assert!(NotificationEnvelope::decode(br#"{"store_id":7}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = NotificationEnvelope::decode(b"not json").unwrap_err();
        assert!(err.to_string().starts_with("malformed notification envelope"));
    }

    #[test]
    fn test_encode_matches_upstream_shape() {
        let envelope = NotificationEnvelope::new(TenantId::new(9), r#"{"event_name":"ACCEPT_PIZZA"}"#);
        let json = envelope.encode().unwrap();
        assert_eq!(json, r#"{"store_id":9,"payload":{"event_name":"ACCEPT_PIZZA"}}"#);
        assert_eq!(NotificationEnvelope::decode(json.as_bytes()).unwrap(), envelope);
    }

    #[test]
    fn test_encode_rejects_non_json_payload() {
        let envelope = NotificationEnvelope::new(TenantId::new(1), "not json");
        assert!(matches!(envelope.encode(), Err(ProtocolError::Encode(_))));
    }
}
