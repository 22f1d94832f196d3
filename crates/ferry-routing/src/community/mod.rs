//! Bubble Rap: community and centrality based forwarding
//!
//! Messages bubble up the global centrality ranking until they reach a host
//! in the destination's community, then bubble up the local ranking inside
//! that community until they meet the destination.
//!
//! Both the community detection and the centrality measure are pluggable:
//! - [`SimpleCommunity`] and [`KCliqueCommunity`] for detection
//! - [`SWindowCentrality`], [`CWindowCentrality`] and [`DegreeCentrality`]

pub mod centrality;
pub mod detection;
pub mod history;

use std::str::FromStr;
use std::sync::Arc;

use ferry_core::{ConfigResult, HostId, Message, SettingsView, SimTime};
use tracing::debug;

pub use centrality::{Centrality, CWindowCentrality, DegreeCentrality, SWindowCentrality};
pub use detection::{CommunityDetection, CommunitySnapshot, KCliqueCommunity, SimpleCommunity};
pub use history::{ContactHistory, ContactRecord};

use crate::report::StrategyMetrics;
use crate::strategy::{Candidate, Contact, ForwardView, ForwardingStrategy, Peers};

/// Community detection algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommunityKind {
    #[default]
    Simple,
    KClique,
}

impl FromStr for CommunityKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "kclique" | "k-clique" => Ok(Self::KClique),
            other => Err(format!("unknown community detection '{other}'")),
        }
    }
}

/// Centrality measure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CentralityKind {
    #[default]
    SWindow,
    CWindow,
    Degree,
}

impl FromStr for CentralityKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "swindow" => Ok(Self::SWindow),
            "cwindow" => Ok(Self::CWindow),
            "degree" => Ok(Self::Degree),
            other => Err(format!("unknown centrality '{other}'")),
        }
    }
}

/// Bubble Rap configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BubbleRapConfig {
    /// Default: simple
    pub community: CommunityKind,

    /// Share of a peer's familiars that must be in our community (simple)
    /// Default: 0.5
    pub lambda: f64,

    /// Clique size (kclique)
    /// Default: 5
    pub k: usize,

    /// Seconds of cumulative contact after which a peer becomes familiar
    /// Default: 700
    pub familiar_threshold: f64,

    /// Default: swindow
    pub centrality: CentralityKind,

    /// Window length in seconds
    /// Default: 21600 (6 hours)
    pub time_window: f64,

    /// Seconds between centrality recomputations
    /// Default: 600
    pub compute_interval: f64,

    /// Most windows averaged (cwindow)
    /// Default: 5
    pub epoch_count: u32,
}

impl Default for BubbleRapConfig {
    fn default() -> Self {
        Self {
            community: CommunityKind::default(),
            lambda: 0.5,
            k: 5,
            familiar_threshold: 700.0,
            centrality: CentralityKind::default(),
            time_window: 21_600.0,
            compute_interval: 600.0,
            epoch_count: 5,
        }
    }
}

impl BubbleRapConfig {
    /// Read Bubble Rap settings
    pub fn from_settings(view: &SettingsView<'_>) -> ConfigResult<Self> {
        let defaults = Self::default();
        let community = match view.get_str("community") {
            Some(raw) => raw
                .parse::<CommunityKind>()
                .map_err(|reason: String| view.invalid("community", raw, &reason))?,
            None => defaults.community,
        };
        let centrality = match view.get_str("centrality") {
            Some(raw) => raw
                .parse::<CentralityKind>()
                .map_err(|reason: String| view.invalid("centrality", raw, &reason))?,
            None => defaults.centrality,
        };
        let config = Self {
            community,
            lambda: view.get_or("lambda", defaults.lambda)?,
            k: view.get_or("k", defaults.k)?,
            familiar_threshold: view.get_or("familiar_threshold", defaults.familiar_threshold)?,
            centrality,
            time_window: view.get_or("time_window", defaults.time_window)?,
            compute_interval: view.get_or("compute_interval", defaults.compute_interval)?,
            epoch_count: view.get_or("epoch_count", defaults.epoch_count)?,
        };
        if config.time_window <= 0.0 {
            return Err(view.invalid(
                "time_window",
                &config.time_window.to_string(),
                "must be positive",
            ));
        }
        if config.compute_interval < 0.0 {
            return Err(view.invalid(
                "compute_interval",
                &config.compute_interval.to_string(),
                "must not be negative",
            ));
        }
        Ok(config)
    }

    fn build_detection(&self) -> Box<dyn CommunityDetection> {
        match self.community {
            CommunityKind::Simple => Box::new(SimpleCommunity::new(self.lambda, self.familiar_threshold)),
            CommunityKind::KClique => Box::new(KCliqueCommunity::new(self.k, self.familiar_threshold)),
        }
    }

    fn build_centrality(&self) -> Box<dyn Centrality> {
        match self.centrality {
            CentralityKind::SWindow => Box::new(SWindowCentrality {
                time_window: self.time_window,
            }),
            CentralityKind::CWindow => Box::new(CWindowCentrality {
                time_window: self.time_window,
                epoch_count: self.epoch_count,
            }),
            CentralityKind::Degree => Box::new(DegreeCentrality),
        }
    }
}

/// Bubble Rap state of one node
#[derive(Debug)]
pub struct BubbleRap {
    config: Arc<BubbleRapConfig>,
    detection: Box<dyn CommunityDetection>,
    centrality: Box<dyn Centrality>,
    history: ContactHistory,
}

impl BubbleRap {
    /// Create Bubble Rap state
    pub fn new(config: Arc<BubbleRapConfig>) -> Self {
        let detection = config.build_detection();
        let centrality = config.build_centrality();
        Self {
            config,
            detection,
            centrality,
            history: ContactHistory::new(),
        }
    }

    pub fn config(&self) -> &BubbleRapConfig {
        &self.config
    }

    pub fn detection(&self) -> &dyn CommunityDetection {
        self.detection.as_ref()
    }

    pub fn history(&self) -> &ContactHistory {
        &self.history
    }

    /// Whether `host` is in this node's local community
    pub fn in_community(&self, host: HostId) -> bool {
        self.detection.is_member(host)
    }

    /// Last recomputation time at or before `now`
    fn computed_at(&self, now: SimTime) -> SimTime {
        let interval = self.config.compute_interval;
        if interval > 0.0 {
            (now / interval).floor() * interval
        } else {
            now
        }
    }

    pub fn global_centrality(&self, now: SimTime) -> f64 {
        self.centrality.global(&self.history, self.computed_at(now))
    }

    pub fn local_centrality(&self, now: SimTime) -> f64 {
        self.centrality
            .local(&self.history, self.detection.community(), self.computed_at(now))
    }

    /// Whether `peer` is a better carrier towards `destination`
    fn should_forward(&self, peer: &BubbleRap, destination: HostId, now: SimTime) -> bool {
        match (peer.in_community(destination), self.in_community(destination)) {
            (true, false) => true,
            (false, true) => false,
            (true, true) => peer.local_centrality(now) > self.local_centrality(now),
            (false, false) => peer.global_centrality(now) > self.global_centrality(now),
        }
    }
}

impl ForwardingStrategy for BubbleRap {
    type Snapshot = CommunitySnapshot;

    fn name(&self) -> &'static str {
        "bubble_rap"
    }

    fn replicate(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            detection: self.detection.replicate(),
            centrality: self.config.build_centrality(),
            history: ContactHistory::new(),
        }
    }

    fn snapshot(&self, host: HostId, _now: SimTime) -> Self::Snapshot {
        self.detection.snapshot(host)
    }

    fn contact_up(&mut self, contact: &Contact, peer: &Self::Snapshot) {
        self.history.contact_started(contact.peer, contact.now);
        self.detection.contact_up(contact.host, contact.peer, peer);
    }

    fn contact_down(&mut self, contact: &Contact, _bytes_transferred: u64) {
        self.history.contact_ended(contact.peer, contact.now);
        let total = self.history.cumulative_duration(contact.peer);
        self.detection.contact_down(contact.host, contact.peer, total);
    }

    fn relay_candidates<P: Peers<Self>>(&mut self, view: &ForwardView<'_, P>) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for (message, link) in view.all_pairs() {
            if view.peers.has_message(link.peer, &message.id) || message.has_visited(link.peer) {
                continue;
            }
            let Some(peer) = view.peers.strategy(link.peer) else {
                continue;
            };
            let forward = message.is_recipient(link.peer)
                || message
                    .pending_recipients()
                    .into_iter()
                    .any(|d| self.should_forward(peer, d, view.now));
            if forward {
                candidates.push(Candidate {
                    message: message.id.clone(),
                    connection: link.connection,
                });
            }
        }
        candidates
    }

    fn on_transfer_done<P: Peers<Self>>(
        &mut self,
        host: HostId,
        message: &Message,
        peer: HostId,
        peers: &P,
    ) -> bool {
        let Some(destination) = message.unicast_destination() else {
            return false;
        };
        let handed_over = peers
            .strategy(peer)
            .is_some_and(|p| p.in_community(destination))
            && !self.in_community(destination);
        if handed_over {
            debug!(
                host = %host,
                peer = %peer,
                message = %message.id,
                "Handed message to destination community"
            );
        }
        handed_over
    }

    fn metrics(&self, _host: HostId, now: SimTime) -> StrategyMetrics {
        StrategyMetrics::BubbleRap {
            community: self.detection.community().iter().copied().collect(),
            familiars: self.detection.familiars().iter().copied().collect(),
            global_centrality: self.global_centrality(now),
            local_centrality: self.local_centrality(now),
        }
    }
}
