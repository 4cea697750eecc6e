//! Beacon Core - Shared types for the presence registry
//!
//! This crate provides the domain types shared between the registry
//! daemon (beacond) and the client agent (beacon-agent).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod client;
pub mod clock;
pub mod dispatch;
pub mod error;

// Re-exports for convenience
pub use client::{ClientId, LivenessRecord, MembershipMap, LABEL_SEPARATOR};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::DispatchResult;
pub use error::{DomainError, DomainResult};
