//! Beacon Protocol - HTTP wire types
//!
//! This crate provides the JSON bodies exchanged between client agents,
//! operators and the registry daemon, plus the client-side notify call
//! the registry makes when dispatching.

pub mod message;
pub mod routes;

pub use message::{
    ClientEntry, ClientsResponse, DispatchRequest, DispatchResponse, HeartbeatRequest,
    IdentitiesResponse, NotifyRequest, RegisterRequest, ResponseStatus, StatusResponse,
    DEFAULT_NOTIFICATION,
};
pub use routes::{DispatchTarget, ALL_CLIENTS};
