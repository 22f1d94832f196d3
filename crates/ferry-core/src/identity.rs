//! Host identity
//!
//! Every simulated node is addressed by a small integer, the index the world
//! assigns when it creates the host. [`HostId`] is that address.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Address of a simulated host
///
/// Hosts are numbered densely from zero, so the address doubles as the index
/// of the host's router in the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(pub u32);

impl HostId {
    /// Create a host address
    pub fn new(address: u32) -> Self {
        Self(address)
    }

    /// Generate the addresses `0..count`
    pub fn range(count: u32) -> Vec<Self> {
        (0..count).map(Self).collect()
    }

    /// Get the address as an arena index
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Get a short display form (for logging)
    pub fn short_id(&self) -> String {
        format!("n{}", self.0)
    }
}

impl Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<u32> for HostId {
    fn from(address: u32) -> Self {
        Self(address)
    }
}
