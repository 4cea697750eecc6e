//! beacon daemon - presence registry and notification dispatcher
//!
//! This crate provides the core infrastructure for the registry daemon:
//! - `registry` - Presence registry actor, handle and expiry sweeper
//! - `snapshot` - Pluggable persistence for the membership map
//! - `dispatch` - Fan-out of notifications to registered clients
//! - `server` - HTTP routes for clients and operators
//! - `config` - TOML configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        beacond                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ RegistryServer  │────▶│     RegistryActor           │   │
//! │  │    (axum)       │     │  (membership state owner)   │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ dispatch                    │ snapshots         │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   Dispatcher    │     │   Persister → SnapshotStore │   │
//! │  │ (HttpNotifier)  │     │                             │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod dispatch;
pub mod registry;
pub mod server;
pub mod snapshot;
