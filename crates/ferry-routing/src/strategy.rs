//! Forwarding strategies
//!
//! A [`ForwardingStrategy`] decides which buffered messages a router pushes to
//! which connected peer, keeps the per-node state those decisions need, and
//! exchanges that state with peers when a contact comes up. The router owns
//! the buffer and the transfer protocol; the strategy only ranks and reacts.
//!
//! Strategies read peers through [`Peers`], which hands out shared references
//! only. During a contact each side receives a [`ForwardingStrategy::Snapshot`]
//! of the other taken before either side mutates, so the exchange does not
//! depend on which side is processed first.

use std::collections::HashSet;

use ferry_core::{ConnectionId, HostId, Message, MessageId, SimTime};

use crate::queue::QueueOrder;
use crate::report::StrategyMetrics;

/// Read-only access to the routers of other hosts
pub trait Peers<S> {
    /// Strategy state of `host`, if that host runs a compatible strategy
    fn strategy(&self, host: HostId) -> Option<&S>;

    /// Whether `host` already buffers the message
    fn has_message(&self, host: HostId, id: &MessageId) -> bool;
}

/// An up connection as seen from one of its ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub connection: ConnectionId,
    pub peer: HostId,
}

/// A message to offer over a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub message: MessageId,
    pub connection: ConnectionId,
}

/// Everything a strategy may look at when choosing relay candidates
pub struct ForwardView<'a, P> {
    /// Host making the decision
    pub host: HostId,
    /// Current simulation time
    pub now: SimTime,
    /// Buffer capacity in bytes
    pub capacity: u64,
    /// Buffered messages in queue order
    pub messages: &'a [&'a Message],
    /// Up connections in the order they came up
    pub links: &'a [Link],
    /// Queue ordering in effect
    pub queue: QueueOrder,
    /// The routers at the other ends
    pub peers: &'a P,
}

impl<'a, P> ForwardView<'a, P> {
    /// Same view with a different peer lookup
    pub fn with_peers<'b, Q>(&'b self, peers: &'b Q) -> ForwardView<'b, Q> {
        ForwardView {
            host: self.host,
            now: self.now,
            capacity: self.capacity,
            messages: self.messages,
            links: self.links,
            queue: self.queue,
            peers,
        }
    }

    /// Cartesian product of links and messages, link-major
    pub fn all_pairs(&self) -> impl Iterator<Item = (&'a Message, Link)> + '_ {
        self.links
            .iter()
            .flat_map(move |link| self.messages.iter().map(move |m| (*m, *link)))
    }
}

/// What a strategy may look at when choosing a message to evict
pub struct BufferView<'a> {
    pub host: HostId,
    pub now: SimTime,
    pub capacity: u64,
    /// Every buffered message
    pub messages: &'a [&'a Message],
    /// Messages currently being sent, which must not be evicted
    pub sending: &'a HashSet<MessageId>,
    pub queue: QueueOrder,
}

impl BufferView<'_> {
    /// Buffered messages that may be evicted
    pub fn evictable(&self) -> impl Iterator<Item = &Message> + '_ {
        self.messages
            .iter()
            .copied()
            .filter(|m| !self.sending.contains(&m.id))
    }
}

/// A contact as seen from one of its ends
#[derive(Debug, Clone, Copy)]
pub struct Contact {
    /// The host whose strategy is being updated
    pub host: HostId,
    /// The other end
    pub peer: HostId,
    pub connection: ConnectionId,
    pub now: SimTime,
}

impl Contact {
    /// The same contact seen from the other end
    pub fn reversed(&self) -> Self {
        Self {
            host: self.peer,
            peer: self.host,
            ..*self
        }
    }
}

/// Pluggable forwarding decision logic
pub trait ForwardingStrategy: Sized {
    /// State handed to the peer during a contact exchange
    type Snapshot: Clone + std::fmt::Debug;

    /// Short name used in logs and reports
    fn name(&self) -> &'static str;

    /// Fresh instance sharing configuration, with empty runtime state
    fn replicate(&self) -> Self;

    /// Copy of the state the peer needs during a contact exchange
    fn snapshot(&self, host: HostId, now: SimTime) -> Self::Snapshot;

    /// Apply a new contact, given the peer's pre-contact snapshot
    fn contact_up(&mut self, contact: &Contact, peer: &Self::Snapshot);

    /// A contact ended after `bytes_transferred` bytes of completed transfers
    fn contact_down(&mut self, _contact: &Contact, _bytes_transferred: u64) {}

    /// Whether a buffered message is known to be delivered and can be purged
    fn is_acknowledged(&self, _id: &MessageId) -> bool {
        false
    }

    /// Whether to accept an offered message
    fn accept_message(&self, _message: &Message, _from: HostId) -> bool {
        true
    }

    /// A message entered the buffer
    fn on_new_message(&mut self, _message: &Message) {}

    /// A message reached this host as one of its final recipients
    fn on_delivered(&mut self, _message: &Message) {}

    /// Ordered list of messages to offer to which peers
    fn relay_candidates<P: Peers<Self>>(&mut self, view: &ForwardView<'_, P>) -> Vec<Candidate>;

    /// A transfer to `peer` completed; returns whether to delete the local copy
    fn on_transfer_done<P: Peers<Self>>(
        &mut self,
        _host: HostId,
        _message: &Message,
        _peer: HostId,
        _peers: &P,
    ) -> bool {
        false
    }

    /// Message to drop when the buffer needs room
    fn next_to_evict(&mut self, buffer: &BufferView<'_>) -> Option<MessageId> {
        oldest_first(buffer)
    }

    /// Introspection for reports
    fn metrics(&self, host: HostId, now: SimTime) -> StrategyMetrics;
}

/// Oldest received message that is not being sent
pub fn oldest_first(buffer: &BufferView<'_>) -> Option<MessageId> {
    buffer
        .evictable()
        .min_by(|a, b| {
            a.receive_time
                .total_cmp(&b.receive_time)
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|m| m.id.clone())
}
