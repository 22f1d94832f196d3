//! Messages for store-and-forward delivery
//!
//! A [`Message`] is the unit routers buffer and push over contacts. The same
//! message may live in many buffers at once; every buffer holds its own copy
//! with its own hop list and receive time.

use std::collections::BTreeSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::clock::SimTime;
use crate::identity::HostId;

/// Globally unique message identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a message ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Who a message is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipients {
    /// One-to-one
    Unicast(HostId),
    /// A fixed group of hosts
    Multicast(BTreeSet<HostId>),
    /// Every host except the sender
    Broadcast,
}

/// Time-to-live of a message, in simulated minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Ttl {
    /// Not chosen by the creator; the creating router stamps its default
    #[default]
    Unset,
    /// Expires this many minutes after creation
    Minutes(u32),
    /// Never expires
    Infinite,
}

/// A message travelling through the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: MessageId,
    /// Original sender
    pub from: HostId,
    /// Final recipient(s)
    pub to: Recipients,
    /// Payload size in bytes
    pub size: u64,
    /// When the message was created
    pub created_at: SimTime,
    /// When the holder of this copy received (or created) it
    pub receive_time: SimTime,
    /// Time-to-live
    pub ttl: Ttl,
    /// Priority, `None` when unset
    pub priority: Option<i32>,
    /// Size of the response the recipient should send back (0 = none)
    pub response_size: u64,
    /// Precomputed utility carried by data-relay messages
    pub utility: Option<f64>,
    /// Application that handles this message at the recipient
    pub app_id: Option<String>,
    /// Hosts this copy has visited, creator first, current holder last
    hops: Vec<HostId>,
}

impl Message {
    /// Create a new message at its source
    pub fn new(
        id: impl Into<MessageId>,
        from: HostId,
        to: Recipients,
        size: u64,
        created_at: SimTime,
    ) -> Self {
        Self {
            id: id.into(),
            from,
            to,
            size,
            created_at,
            receive_time: created_at,
            ttl: Ttl::Unset,
            priority: None,
            response_size: 0,
            utility: None,
            app_id: None,
            hops: vec![from],
        }
    }

    /// Create a one-to-one message
    pub fn unicast(
        id: impl Into<MessageId>,
        from: HostId,
        to: HostId,
        size: u64,
        created_at: SimTime,
    ) -> Self {
        Self::new(id, from, Recipients::Unicast(to), size, created_at)
    }

    /// Create a message with an explicit TTL in minutes
    pub fn with_ttl(mut self, minutes: u32) -> Self {
        self.ttl = Ttl::Minutes(minutes);
        self
    }

    /// Create a message that never expires
    pub fn with_infinite_ttl(mut self) -> Self {
        self.ttl = Ttl::Infinite;
        self
    }

    /// Create a message with a priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Create a data message carrying a precomputed utility
    pub fn with_utility(mut self, utility: f64) -> Self {
        self.utility = Some(utility.clamp(0.0, 1.0));
        self
    }

    /// Request a response of the given size from the recipient
    pub fn with_response_size(mut self, size: u64) -> Self {
        self.response_size = size;
        self
    }

    /// Route the message to a local application at the recipient
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Hosts this copy has visited
    pub fn hops(&self) -> &[HostId] {
        &self.hops
    }

    /// Number of hops taken (the creator is hop zero)
    pub fn hop_count(&self) -> usize {
        self.hops.len().saturating_sub(1)
    }

    /// The host currently holding this copy
    pub fn current_holder(&self) -> HostId {
        self.hops.last().copied().unwrap_or(self.from)
    }

    /// Record that `host` now holds this copy
    pub fn add_node_on_path(&mut self, host: HostId) {
        self.hops.push(host);
    }

    /// Whether this copy has already passed through `host`
    pub fn has_visited(&self, host: HostId) -> bool {
        self.hops.contains(&host)
    }

    /// Remaining TTL in whole minutes, `None` when the message never expires
    ///
    /// An unset TTL counts as infinite until a router stamps it.
    pub fn ttl_remaining(&self, now: SimTime) -> Option<i64> {
        match self.ttl {
            Ttl::Minutes(initial) => {
                let elapsed_minutes = (now - self.created_at) / 60.0;
                Some((initial as f64 - elapsed_minutes).trunc() as i64)
            }
            Ttl::Unset | Ttl::Infinite => None,
        }
    }

    /// Whether the TTL has run out
    pub fn is_expired(&self, now: SimTime) -> bool {
        matches!(self.ttl_remaining(now), Some(ttl) if ttl <= 0)
    }

    /// Whether `host` is one of the message's final recipients
    pub fn is_recipient(&self, host: HostId) -> bool {
        match &self.to {
            Recipients::Unicast(to) => *to == host,
            Recipients::Multicast(group) => group.contains(&host),
            Recipients::Broadcast => host != self.from,
        }
    }

    /// Whether the message has more than one final recipient
    pub fn is_group_message(&self) -> bool {
        !matches!(self.to, Recipients::Unicast(_))
    }

    /// The single destination of a one-to-one message
    pub fn unicast_destination(&self) -> Option<HostId> {
        match self.to {
            Recipients::Unicast(to) => Some(to),
            _ => None,
        }
    }

    /// Recipients this copy has not reached yet
    ///
    /// Broadcast messages have no enumerable recipients and return an empty
    /// list; they are spread by direct delivery to every peer.
    pub fn pending_recipients(&self) -> Vec<HostId> {
        match &self.to {
            Recipients::Unicast(to) => vec![*to],
            Recipients::Multicast(group) => group
                .iter()
                .filter(|h| !self.hops.contains(h))
                .copied()
                .collect(),
            Recipients::Broadcast => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(n: u32) -> HostId {
        HostId(n)
    }

    #[test]
    fn test_message_creation() {
        let m = Message::unicast("M1", host(0), host(2), 100, 5.0);
        assert_eq!(m.hops(), &[host(0)]);
        assert_eq!(m.hop_count(), 0);
        assert_eq!(m.current_holder(), host(0));
        assert_eq!(m.receive_time, 5.0);
        assert_eq!(m.ttl, Ttl::Unset);
        assert!(m.is_recipient(host(2)));
        assert!(!m.is_recipient(host(1)));
    }

    #[test]
    fn test_hop_list_is_append_only() {
        let mut m = Message::unicast("M1", host(0), host(2), 100, 0.0);
        m.add_node_on_path(host(1));
        m.add_node_on_path(host(2));
        assert_eq!(m.hops(), &[host(0), host(1), host(2)]);
        assert_eq!(m.hop_count(), 2);
        assert_eq!(m.current_holder(), host(2));
        assert!(m.has_visited(host(1)));
    }

    #[test]
    fn test_ttl_in_minutes() {
        let m = Message::unicast("M1", host(0), host(1), 10, 0.0).with_ttl(2);
        assert_eq!(m.ttl_remaining(0.0), Some(2));
        assert_eq!(m.ttl_remaining(61.0), Some(0));
        assert!(!m.is_expired(59.0));
        assert!(m.is_expired(120.0));
        // partial minutes are dropped toward zero on both sides of expiry
        assert_eq!(m.ttl_remaining(150.0), Some(0));
        assert_eq!(m.ttl_remaining(210.0), Some(-1));

        let forever = Message::unicast("M2", host(0), host(1), 10, 0.0).with_infinite_ttl();
        assert_eq!(forever.ttl_remaining(1e9), None);
        assert!(!forever.is_expired(1e9));
    }

    #[test]
    fn test_multicast_pending_recipients() {
        let group: BTreeSet<_> = [host(2), host(3), host(4)].into_iter().collect();
        let mut m = Message::new("G1", host(0), Recipients::Multicast(group), 10, 0.0);
        m.add_node_on_path(host(3));
        assert_eq!(m.pending_recipients(), vec![host(2), host(4)]);
        assert!(m.is_group_message());
        assert_eq!(m.unicast_destination(), None);
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let m = Message::new("B1", host(0), Recipients::Broadcast, 10, 0.0);
        assert!(!m.is_recipient(host(0)));
        assert!(m.is_recipient(host(9)));
        assert!(m.pending_recipients().is_empty());
    }

    #[test]
    fn test_utility_is_clamped() {
        let m = Message::unicast("D1", host(0), host(1), 10, 0.0).with_utility(1.7);
        assert_eq!(m.utility, Some(1.0));
    }
}
