//! Endpoint paths and dispatch targets.

use std::fmt;

use beacon_core::{ClientId, DomainResult};

/// Registry: register or re-register a client.
pub const REGISTER: &str = "/register";
/// Registry: refresh a client's liveness.
pub const HEARTBEAT: &str = "/heartbeat";
/// Registry: send a message to one client or to everyone.
pub const DISPATCH: &str = "/dispatch";
/// Registry: older name for [`DISPATCH`], still served.
pub const SEND: &str = "/send";
/// Registry: list live identities.
pub const IDENTITIES: &str = "/identities";
/// Registry: list live clients with their records.
pub const CLIENTS: &str = "/clients";
/// Registry: liveness probe.
pub const HEALTH: &str = "/health";
/// Client: receive a notification.
pub const NOTIFY: &str = "/notify";

/// Wire sentinel that addresses every live client.
pub const ALL_CLIENTS: &str = "__ALL__";

/// Who a dispatch is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DispatchTarget {
    /// A single registered client
    Client(ClientId),
    /// Every client currently in the registry
    All,
}

impl DispatchTarget {
    /// Parses the wire `target` field.
    ///
    /// [`ALL_CLIENTS`] selects broadcast; anything else must be a non-blank
    /// identity.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        if raw.trim() == ALL_CLIENTS {
            return Ok(Self::All);
        }
        ClientId::parse(raw).map(Self::Client)
    }

    /// Returns the wire form of this target.
    pub fn as_wire(&self) -> &str {
        match self {
            Self::Client(id) => id.as_str(),
            Self::All => ALL_CLIENTS,
        }
    }

    /// Returns true for broadcast.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl fmt::Display for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(id) => write!(f, "{id}"),
            Self::All => write!(f, "all clients"),
        }
    }
}

impl From<ClientId> for DispatchTarget {
    fn from(id: ClientId) -> Self {
        Self::Client(id)
    }
}
