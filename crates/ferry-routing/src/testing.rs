//! Helpers shared by unit tests

use std::collections::{HashMap, HashSet};

use ferry_core::{ConnectionId, HostId, Message, MessageId, SimTime};

use crate::queue::{QueueMode, QueueOrder};
use crate::strategy::{Contact, ForwardView, Link, Peers};

/// Peer lookup backed by plain maps
pub struct MapPeers<S> {
    pub strategies: HashMap<HostId, S>,
    pub holdings: HashSet<(HostId, MessageId)>,
}

impl<S> MapPeers<S> {
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
            holdings: HashSet::new(),
        }
    }

    pub fn with(mut self, host: HostId, strategy: S) -> Self {
        self.strategies.insert(host, strategy);
        self
    }
}

impl<S> Peers<S> for MapPeers<S> {
    fn strategy(&self, host: HostId) -> Option<&S> {
        self.strategies.get(&host)
    }

    fn has_message(&self, host: HostId, id: &MessageId) -> bool {
        self.holdings.contains(&(host, id.clone()))
    }
}

pub fn host(n: u32) -> HostId {
    HostId(n)
}

/// Unicast message of 100 bytes
pub fn msg(id: &str, from: u32, to: u32) -> Message {
    Message::unicast(id, host(from), host(to), 100, 0.0)
}

/// Message that has travelled along `path` after its source
pub fn msg_via(id: &str, from: u32, to: u32, path: &[u32]) -> Message {
    let mut m = msg(id, from, to);
    for hop in path {
        m.add_node_on_path(host(*hop));
    }
    m
}

pub fn contact(me: u32, peer: u32, now: SimTime) -> Contact {
    Contact {
        host: host(me),
        peer: host(peer),
        connection: ConnectionId(0),
        now,
    }
}

pub fn link(connection: u32, peer: u32) -> Link {
    Link {
        connection: ConnectionId(connection),
        peer: host(peer),
    }
}

/// View from host 0 at time `now` with FIFO ordering
pub fn view<'a, P>(
    now: SimTime,
    messages: &'a [&'a Message],
    links: &'a [Link],
    peers: &'a P,
) -> ForwardView<'a, P> {
    ForwardView {
        host: host(0),
        now,
        capacity: u64::MAX,
        messages,
        links,
        queue: QueueOrder::new(QueueMode::Fifo, now),
        peers,
    }
}
