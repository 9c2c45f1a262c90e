//! Notify Core - Shared types for store notifications
//!
//! This crate provides the domain types shared between the wire
//! protocol crate and the notification daemon (notifyd).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod payload;
pub mod session;
pub mod tenant;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use payload::Payload;
pub use session::{ClientId, ConnectionKey, SessionDescriptor};
pub use tenant::TenantId;
