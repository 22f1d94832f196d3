//! Epidemic flooding
//!
//! Every buffered message is offered to every connected peer that does not
//! have it yet. Connections are tried in the order they came up and messages
//! in queue order; the router stops at the first accepted transfer and skips
//! to the next connection when a peer answers "try later".

use ferry_core::{HostId, SimTime};
use tracing::trace;

use crate::report::StrategyMetrics;
use crate::strategy::{Candidate, Contact, ForwardView, ForwardingStrategy, Peers};

/// Flood-everything strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Epidemic;

impl Epidemic {
    pub fn new() -> Self {
        Self
    }
}

impl ForwardingStrategy for Epidemic {
    type Snapshot = ();

    fn name(&self) -> &'static str {
        "epidemic"
    }

    fn replicate(&self) -> Self {
        Self
    }

    fn snapshot(&self, _host: HostId, _now: SimTime) -> Self::Snapshot {}

    fn contact_up(&mut self, contact: &Contact, _peer: &Self::Snapshot) {
        trace!(host = %contact.host, peer = %contact.peer, "Epidemic contact");
    }

    fn relay_candidates<P: Peers<Self>>(&mut self, view: &ForwardView<'_, P>) -> Vec<Candidate> {
        view.all_pairs()
            .filter(|(m, link)| !view.peers.has_message(link.peer, &m.id))
            .map(|(m, link)| Candidate {
                message: m.id.clone(),
                connection: link.connection,
            })
            .collect()
    }

    fn metrics(&self, _host: HostId, _now: SimTime) -> StrategyMetrics {
        StrategyMetrics::Epidemic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn test_offers_every_message_on_every_link() {
        let (a, b) = (msg("A", 0, 5), msg("B", 0, 6));
        let messages = [&a, &b];
        let links = [link(0, 1), link(1, 2)];
        let mut peers = MapPeers::<Epidemic>::new();
        peers.holdings.insert((host(2), a.id.clone()));

        let candidates = Epidemic.relay_candidates(&view(0.0, &messages, &links, &peers));
        let pairs: Vec<_> = candidates
            .iter()
            .map(|c| (c.message.as_str(), c.connection.0))
            .collect();
        assert_eq!(pairs, vec![("A", 0), ("B", 0), ("B", 1)]);
    }
}
