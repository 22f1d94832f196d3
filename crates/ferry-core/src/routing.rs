//! Outcomes of offering a message to a router

use serde::{Deserialize, Serialize};

/// Answer of a receiving router to a transfer offer
///
/// These are ordinary negative results, never errors. The sender reacts to
/// them: `TryLaterBusy` moves on to the next connection, everything else moves
/// on to the next message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReceiveOutcome {
    /// Transfer accepted and started
    Ok,
    /// Host or connection is busy with another transfer
    TryLaterBusy,
    /// Message already buffered, delivered here, or blacklisted
    DeniedOld,
    /// Not enough buffer space even after eviction
    DeniedNoSpace,
    /// TTL ran out and this host is not a recipient
    DeniedTtl,
    /// Host is low on some other resource
    DeniedLowResources,
    /// Forwarding strategy refused the message
    DeniedPolicy,
    /// Refused for an unspecified reason
    DeniedUnspecified,
}

impl ReceiveOutcome {
    /// Whether the transfer was accepted
    pub fn is_ok(self) -> bool {
        self == ReceiveOutcome::Ok
    }

    /// Whether the sender should retry on another connection
    pub fn is_try_later(self) -> bool {
        self == ReceiveOutcome::TryLaterBusy
    }

    /// Whether the offer was refused outright
    pub fn is_denied(self) -> bool {
        !self.is_ok() && !self.is_try_later()
    }
}
