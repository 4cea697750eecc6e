//! Aggregated outcome of a notification dispatch.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ClientId;

/// Per-target outcome of one dispatch call.
///
/// Produced once per dispatch and never persisted. Sets are ordered so the
/// failed list reads the same on every response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Targets whose notify endpoint accepted the message
    pub succeeded: BTreeSet<ClientId>,

    /// Targets that could not be reached or answered with a non-2xx status
    pub failed: BTreeSet<ClientId>,
}

impl DispatchResult {
    /// Creates an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful delivery.
    pub fn record_success(&mut self, client_id: ClientId) {
        self.failed.remove(&client_id);
        self.succeeded.insert(client_id);
    }

    /// Records a failed delivery.
    pub fn record_failure(&mut self, client_id: ClientId) {
        self.succeeded.remove(&client_id);
        self.failed.insert(client_id);
    }

    /// Returns true if at least one target failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Number of targets attempted.
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}
