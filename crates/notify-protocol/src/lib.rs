//! Notify Protocol - Wire formats at the notification service boundary
//!
//! This crate provides the notification envelope published by upstream
//! services and the WebSocket close codes the gateway sends to browsers.

pub mod close;
pub mod envelope;

pub use close::{CloseReason, CLOSE_BAD_REQUEST, CLOSE_NORMAL};
pub use envelope::{NotificationEnvelope, ProtocolError, NOTIFICATION_CHANNEL};
