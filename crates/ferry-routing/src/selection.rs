//! Strategy selection
//!
//! Each strategy is a separate type, so a network built from settings runs
//! [`AnyStrategy`], which wraps whichever strategy was configured and
//! forwards every call to it. Peers are seen through a projection onto the
//! same variant; a peer running a different strategy looks like a host
//! without compatible routing state.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ferry_core::{ConfigResult, HostId, Message, MessageId, Settings, SimTime};
use tracing::warn;

use crate::community::{BubbleRap, BubbleRapConfig, CommunitySnapshot};
use crate::epidemic::Epidemic;
use crate::maxprop::{MaxProp, MaxPropConfig, MaxPropSnapshot};
use crate::prophet::{Prophet, ProphetConfig, ProphetSnapshot};
use crate::report::StrategyMetrics;
use crate::strategy::{BufferView, Candidate, Contact, ForwardView, ForwardingStrategy, Peers};

/// Available forwarding strategies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StrategyKind {
    /// Flood every message to every peer
    #[default]
    Epidemic,

    /// Forward to peers with higher delivery predictability
    Prophet,

    /// Rank by probabilistic shortest path cost, protect young messages
    MaxProp,

    /// Follow global then local centrality into the destination community
    BubbleRap,
}

impl StrategyKind {
    /// Settings namespace holding the strategy's parameters
    pub fn namespace(&self) -> &'static str {
        match self {
            StrategyKind::Epidemic => "epidemic",
            StrategyKind::Prophet => "prophet",
            StrategyKind::MaxProp => "maxprop",
            StrategyKind::BubbleRap => "bubble_rap",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "epidemic" => Ok(Self::Epidemic),
            "prophet" => Ok(Self::Prophet),
            "maxprop" => Ok(Self::MaxProp),
            "bubble_rap" | "bubblerap" | "bubble" => Ok(Self::BubbleRap),
            other => Err(format!("unknown router '{other}'")),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Configuration of the selected strategy
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StrategyConfig {
    #[default]
    Epidemic,
    Prophet(ProphetConfig),
    MaxProp(MaxPropConfig),
    BubbleRap(BubbleRapConfig),
}

impl StrategyConfig {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyConfig::Epidemic => StrategyKind::Epidemic,
            StrategyConfig::Prophet(_) => StrategyKind::Prophet,
            StrategyConfig::MaxProp(_) => StrategyKind::MaxProp,
            StrategyConfig::BubbleRap(_) => StrategyKind::BubbleRap,
        }
    }

    /// Read the parameters of `kind` from its namespace, falling back to `group`
    pub fn from_settings(settings: &Settings, kind: StrategyKind) -> ConfigResult<Self> {
        let view = settings.namespace(kind.namespace());
        Ok(match kind {
            StrategyKind::Epidemic => StrategyConfig::Epidemic,
            StrategyKind::Prophet => StrategyConfig::Prophet(ProphetConfig::from_settings(&view)?),
            StrategyKind::MaxProp => StrategyConfig::MaxProp(MaxPropConfig::from_settings(&view)?),
            StrategyKind::BubbleRap => {
                StrategyConfig::BubbleRap(BubbleRapConfig::from_settings(&view)?)
            }
        })
    }

    /// Read the strategy named by `router` in the given namespace
    pub fn from_router_setting(settings: &Settings, namespace: &str) -> ConfigResult<Self> {
        let view = settings.namespace(namespace);
        let raw = view.require_str("router")?;
        let kind = raw
            .parse::<StrategyKind>()
            .map_err(|reason| view.invalid("router", raw, &reason))?;
        Self::from_settings(settings, kind)
    }

    /// Prototype strategy; replicate it for each host
    pub fn build(&self) -> AnyStrategy {
        match self {
            StrategyConfig::Epidemic => AnyStrategy::Epidemic(Epidemic::new()),
            StrategyConfig::Prophet(c) => AnyStrategy::Prophet(Prophet::new(Arc::new(c.clone()))),
            StrategyConfig::MaxProp(c) => AnyStrategy::MaxProp(MaxProp::new(Arc::new(c.clone()))),
            StrategyConfig::BubbleRap(c) => {
                AnyStrategy::BubbleRap(BubbleRap::new(Arc::new(c.clone())))
            }
        }
    }
}

/// Any of the built-in strategies
#[derive(Debug)]
pub enum AnyStrategy {
    Epidemic(Epidemic),
    Prophet(Prophet),
    MaxProp(MaxProp),
    BubbleRap(BubbleRap),
}

/// Contact snapshot of any of the built-in strategies
#[derive(Debug, Clone)]
pub enum AnySnapshot {
    Epidemic,
    Prophet(ProphetSnapshot),
    MaxProp(MaxPropSnapshot),
    BubbleRap(CommunitySnapshot),
}

impl AnyStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            AnyStrategy::Epidemic(_) => StrategyKind::Epidemic,
            AnyStrategy::Prophet(_) => StrategyKind::Prophet,
            AnyStrategy::MaxProp(_) => StrategyKind::MaxProp,
            AnyStrategy::BubbleRap(_) => StrategyKind::BubbleRap,
        }
    }

    pub fn as_epidemic(&self) -> Option<&Epidemic> {
        match self {
            AnyStrategy::Epidemic(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_prophet(&self) -> Option<&Prophet> {
        match self {
            AnyStrategy::Prophet(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_maxprop(&self) -> Option<&MaxProp> {
        match self {
            AnyStrategy::MaxProp(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bubble_rap(&self) -> Option<&BubbleRap> {
        match self {
            AnyStrategy::BubbleRap(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Epidemic> for AnyStrategy {
    fn from(s: Epidemic) -> Self {
        AnyStrategy::Epidemic(s)
    }
}

impl From<Prophet> for AnyStrategy {
    fn from(s: Prophet) -> Self {
        AnyStrategy::Prophet(s)
    }
}

impl From<MaxProp> for AnyStrategy {
    fn from(s: MaxProp) -> Self {
        AnyStrategy::MaxProp(s)
    }
}

impl From<BubbleRap> for AnyStrategy {
    fn from(s: BubbleRap) -> Self {
        AnyStrategy::BubbleRap(s)
    }
}

/// Peers of an [`AnyStrategy`] network seen as peers of one concrete strategy
struct Projected<'a, P, T> {
    inner: &'a P,
    project: fn(&AnyStrategy) -> Option<&T>,
}

impl<P: Peers<AnyStrategy>, T> Peers<T> for Projected<'_, P, T> {
    fn strategy(&self, host: HostId) -> Option<&T> {
        self.inner.strategy(host).and_then(self.project)
    }

    fn has_message(&self, host: HostId, id: &MessageId) -> bool {
        self.inner.has_message(host, id)
    }
}

macro_rules! each_strategy {
    ($value:expr, $s:ident => $body:expr) => {
        match $value {
            AnyStrategy::Epidemic($s) => $body,
            AnyStrategy::Prophet($s) => $body,
            AnyStrategy::MaxProp($s) => $body,
            AnyStrategy::BubbleRap($s) => $body,
        }
    };
}

impl ForwardingStrategy for AnyStrategy {
    type Snapshot = AnySnapshot;

    fn name(&self) -> &'static str {
        each_strategy!(self, s => s.name())
    }

    fn replicate(&self) -> Self {
        each_strategy!(self, s => s.replicate().into())
    }

    fn snapshot(&self, host: HostId, now: SimTime) -> Self::Snapshot {
        match self {
            AnyStrategy::Epidemic(_) => AnySnapshot::Epidemic,
            AnyStrategy::Prophet(s) => AnySnapshot::Prophet(s.snapshot(host, now)),
            AnyStrategy::MaxProp(s) => AnySnapshot::MaxProp(s.snapshot(host, now)),
            AnyStrategy::BubbleRap(s) => AnySnapshot::BubbleRap(s.snapshot(host, now)),
        }
    }

    fn contact_up(&mut self, contact: &Contact, peer: &Self::Snapshot) {
        match (self, peer) {
            (AnyStrategy::Epidemic(s), AnySnapshot::Epidemic) => s.contact_up(contact, &()),
            (AnyStrategy::Prophet(s), AnySnapshot::Prophet(p)) => s.contact_up(contact, p),
            (AnyStrategy::MaxProp(s), AnySnapshot::MaxProp(p)) => s.contact_up(contact, p),
            (AnyStrategy::BubbleRap(s), AnySnapshot::BubbleRap(p)) => s.contact_up(contact, p),
            (mine, _) => warn!(
                host = %contact.host,
                peer = %contact.peer,
                strategy = mine.name(),
                "Peer runs a different strategy, ignoring its state"
            ),
        }
    }

    fn contact_down(&mut self, contact: &Contact, bytes_transferred: u64) {
        each_strategy!(self, s => s.contact_down(contact, bytes_transferred))
    }

    fn is_acknowledged(&self, id: &MessageId) -> bool {
        each_strategy!(self, s => s.is_acknowledged(id))
    }

    fn accept_message(&self, message: &Message, from: HostId) -> bool {
        each_strategy!(self, s => s.accept_message(message, from))
    }

    fn on_new_message(&mut self, message: &Message) {
        each_strategy!(self, s => s.on_new_message(message))
    }

    fn on_delivered(&mut self, message: &Message) {
        each_strategy!(self, s => s.on_delivered(message))
    }

    fn relay_candidates<P: Peers<Self>>(&mut self, view: &ForwardView<'_, P>) -> Vec<Candidate> {
        match self {
            AnyStrategy::Epidemic(s) => {
                let peers = Projected {
                    inner: view.peers,
                    project: AnyStrategy::as_epidemic,
                };
                s.relay_candidates(&view.with_peers(&peers))
            }
            AnyStrategy::Prophet(s) => {
                let peers = Projected {
                    inner: view.peers,
                    project: AnyStrategy::as_prophet,
                };
                s.relay_candidates(&view.with_peers(&peers))
            }
            AnyStrategy::MaxProp(s) => {
                let peers = Projected {
                    inner: view.peers,
                    project: AnyStrategy::as_maxprop,
                };
                s.relay_candidates(&view.with_peers(&peers))
            }
            AnyStrategy::BubbleRap(s) => {
                let peers = Projected {
                    inner: view.peers,
                    project: AnyStrategy::as_bubble_rap,
                };
                s.relay_candidates(&view.with_peers(&peers))
            }
        }
    }

    fn on_transfer_done<P: Peers<Self>>(
        &mut self,
        host: HostId,
        message: &Message,
        peer: HostId,
        peers: &P,
    ) -> bool {
        match self {
            AnyStrategy::Epidemic(s) => {
                let peers = Projected {
                    inner: peers,
                    project: AnyStrategy::as_epidemic,
                };
                s.on_transfer_done(host, message, peer, &peers)
            }
            AnyStrategy::Prophet(s) => {
                let peers = Projected {
                    inner: peers,
                    project: AnyStrategy::as_prophet,
                };
                s.on_transfer_done(host, message, peer, &peers)
            }
            AnyStrategy::MaxProp(s) => {
                let peers = Projected {
                    inner: peers,
                    project: AnyStrategy::as_maxprop,
                };
                s.on_transfer_done(host, message, peer, &peers)
            }
            AnyStrategy::BubbleRap(s) => {
                let peers = Projected {
                    inner: peers,
                    project: AnyStrategy::as_bubble_rap,
                };
                s.on_transfer_done(host, message, peer, &peers)
            }
        }
    }

    fn next_to_evict(&mut self, buffer: &BufferView<'_>) -> Option<MessageId> {
        each_strategy!(self, s => s.next_to_evict(buffer))
    }

    fn metrics(&self, host: HostId, now: SimTime) -> StrategyMetrics {
        each_strategy!(self, s => s.metrics(host, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("MaxProp".parse::<StrategyKind>(), Ok(StrategyKind::MaxProp));
        assert_eq!("bubble_rap".parse::<StrategyKind>(), Ok(StrategyKind::BubbleRap));
        assert!("spray".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_from_router_setting() {
        let settings = Settings::new()
            .with("group", "router", "prophet")
            .with("prophet", "seconds_in_time_unit", "45");
        let config = StrategyConfig::from_router_setting(&settings, "group").unwrap();
        assert_eq!(config.kind(), StrategyKind::Prophet);
        let StrategyConfig::Prophet(prophet) = config else {
            panic!("expected prophet config");
        };
        assert_eq!(prophet.seconds_in_time_unit, 45.0);
    }

    #[test]
    fn test_prophet_requires_time_unit() {
        let settings = Settings::new().with("group", "router", "prophet");
        assert!(StrategyConfig::from_router_setting(&settings, "group").is_err());
    }

    #[test]
    fn test_delegates_through_projection() {
        let prototype = StrategyConfig::Epidemic.build();
        let mut me = prototype.replicate();
        let peers = MapPeers::new().with(host(1), prototype.replicate());
        let m = msg("M1", 0, 5);
        let messages = [&m];
        let links = [link(0, 1)];
        let candidates = me.relay_candidates(&view(0.0, &messages, &links, &peers));
        assert_eq!(candidates.len(), 1);
        assert_eq!(me.name(), "epidemic");
    }

    #[test]
    fn test_mismatched_peer_state_is_ignored() {
        let mut prophet: AnyStrategy =
            StrategyConfig::Prophet(ProphetConfig::default()).build();
        prophet.contact_up(&contact(0, 1, 0.0), &AnySnapshot::Epidemic);
        let StrategyMetrics::Prophet { predictabilities } = prophet.metrics(host(0), 0.0) else {
            panic!("expected prophet metrics");
        };
        assert!(predictabilities.is_empty());
    }

    #[test]
    fn test_prophet_sees_only_prophet_peers() {
        let config = StrategyConfig::Prophet(ProphetConfig::default());
        let mut me = config.build();
        let peers = MapPeers::new().with(host(1), StrategyConfig::Epidemic.build());
        let m = msg("M1", 0, 5);
        let messages = [&m];
        let links = [link(0, 1)];
        assert!(
            me.relay_candidates(&view(0.0, &messages, &links, &peers))
                .is_empty()
        );
    }
}
