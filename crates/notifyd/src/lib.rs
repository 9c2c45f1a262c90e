//! Notify Daemon - Per-store WebSocket push notifications
//!
//! This crate provides the core infrastructure for the notification daemon:
//! - `room` - Cluster, hub and client actors that route payloads to sockets
//! - `publisher` - Bridge from the pub/sub channel into the cluster
//! - `server` - WebSocket gateway with key check, keepalive and shutdown
//! - `store` - Key store and pub/sub contracts with Redis and in-memory backends
//! - `config` - Layered configuration (defaults, TOML file, environment)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      notifyd daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  NotifyServer   │────▶│       ClusterActor          │   │
//! │  │  (axum, /ws)    │     │  (tenant → hub registry)    │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ emit              │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│◀────│  HubActor (one per tenant)  │   │
//! │  │ + ClientActor   │     │                             │   │
//! │  └─────────────────┘     └──────────────▲──────────────┘   │
//! │                                         │                   │
//! │                          ┌──────────────┴──────────────┐   │
//! │                          │  Publisher (pub/sub bridge) │   │
//! │                          └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod app;
pub mod config;
pub mod publisher;
pub mod room;
pub mod server;
pub mod store;

pub use app::AppContext;
pub use config::{Backend, Config, ConfigError, SeedKey};
