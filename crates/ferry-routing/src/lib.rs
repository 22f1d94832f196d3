//! # Ferry Routing
//!
//! Store-and-forward message routing for opportunistic networks.
//!
//! Nodes in an opportunistic network have no end-to-end path. They carry
//! messages in a bounded buffer and hand them over during short contacts
//! with other nodes. This crate implements the router every node runs and
//! the forwarding strategies that decide what to hand over to whom.
//!
//! ## Features
//!
//! - **Router base**: buffer, delivered set, blacklist, in-flight receptions
//!   and the admission checks that keep the buffer within its capacity.
//!
//! - **Active transfer protocol**: one transfer per connection, final
//!   recipients first, strategy-ranked relays after that, eviction when
//!   space runs out.
//!
//! - **Strategies**: Epidemic flooding, PRoPHET, MaxProp and Bubble Rap,
//!   behind the [`ForwardingStrategy`] trait.
//!
//! - **Network context**: [`Network`] owns the routers, connections and clock
//!   and turns contact and message events into router calls.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ferry_core::{HostId, Message};
//! use ferry_routing::NetworkConfig;
//!
//! let mut network = NetworkConfig::challenged_network().build_network(3);
//! network.create_message(Message::unicast("M1", HostId(0), HostId(2), 1_000, 0.0))?;
//! network.connection_up(HostId(0), HostId(1), 250_000.0)?;
//! network.run_until(60.0, 1.0)?;
//! ```
//!
//! ## Architecture
//!
//! - [`router`]: per-host buffer and message bookkeeping
//! - [`active`]: the transfer protocol driven by contacts and ticks
//! - [`strategy`]: the strategy trait and the views strategies decide on
//! - [`epidemic`], [`prophet`], [`maxprop`], [`community`]: the strategies
//! - [`selection`]: strategy chosen from settings
//! - [`network`]: the arena of routers
//! - [`report`]: serializable router reports

pub mod active;
pub mod community;
pub mod epidemic;
pub mod handler;
pub mod maxprop;
pub mod network;
pub mod prophet;
pub mod queue;
pub mod report;
pub mod router;
pub mod selection;
pub mod strategy;

#[cfg(test)]
mod testing;

// Re-export main types
pub use active::start_transfer;
pub use community::{BubbleRap, BubbleRapConfig, CentralityKind, CommunityKind};
pub use epidemic::Epidemic;
pub use handler::MessageHandler;
pub use maxprop::{MaxProp, MaxPropConfig};
pub use network::{ArenaPeers, Network, SimContext};
pub use prophet::{Prophet, ProphetConfig};
pub use queue::{QueueMode, QueueOrder};
pub use report::{BufferedMessage, RouterReport, StrategyMetrics};
pub use router::{Env, RESPONSE_PREFIX, Router, RouterConfig};
pub use selection::{AnySnapshot, AnyStrategy, StrategyConfig, StrategyKind};
pub use strategy::{BufferView, Candidate, Contact, ForwardView, ForwardingStrategy, Link, Peers};

use std::sync::Arc;

use ferry_core::{ConfigResult, HostId, Settings};

/// Configuration of a simulated network
///
/// Combines the router settings every host shares with the strategy they run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkConfig {
    pub router: RouterConfig,
    pub strategy: StrategyConfig,
}

impl NetworkConfig {
    /// Sparse, long-delay network: MaxProp over a bounded buffer
    pub fn challenged_network() -> Self {
        Self {
            router: RouterConfig::default()
                .with_buffer_size(50_000_000)
                .with_default_ttl(300),
            strategy: StrategyConfig::MaxProp(MaxPropConfig::default()),
        }
    }

    /// Small buffers: PRoPHET, FIFO queue, drop copies already delivered
    pub fn resource_constrained() -> Self {
        let mut router = RouterConfig::default()
            .with_buffer_size(5_000_000)
            .with_default_ttl(120)
            .with_queue_mode(QueueMode::Fifo);
        router.delete_delivered = true;
        Self {
            router,
            strategy: StrategyConfig::Prophet(ProphetConfig::default()),
        }
    }

    /// Human contact patterns: Bubble Rap
    pub fn social_network() -> Self {
        Self {
            router: RouterConfig::default()
                .with_buffer_size(20_000_000)
                .with_default_ttl(1_440),
            strategy: StrategyConfig::BubbleRap(BubbleRapConfig::default()),
        }
    }

    /// Read router and strategy settings
    ///
    /// `namespace` holds the router settings and the `router` key naming the
    /// strategy; both fall back to the `group` namespace.
    pub fn from_settings(settings: &Settings, namespace: &str) -> ConfigResult<Self> {
        let view = settings.namespace(namespace);
        Ok(Self {
            router: RouterConfig::from_settings(&view)?,
            strategy: StrategyConfig::from_router_setting(settings, namespace)?,
        })
    }

    /// Prototype strategy for the configured kind
    pub fn build_strategy(&self) -> AnyStrategy {
        self.strategy.build()
    }

    /// Prototype router; replicate it for each host
    pub fn build_router(&self) -> Router<AnyStrategy> {
        Router::new(HostId(0), Arc::new(self.router.clone()), self.build_strategy())
    }

    /// Network of `hosts` routers sharing this configuration
    pub fn build_network(&self, hosts: u32) -> Network<AnyStrategy> {
        Network::new(&self.build_router(), hosts)
    }

    /// Validate configuration invariants
    ///
    /// Returns a list of warnings if the configuration has potential issues.
    /// An empty list means the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.router.ttl_check_interval < 1.0 {
            warnings.push(ConfigWarning::TtlCheckIntervalTooShort);
        }
        if self.router.buffer_size == 0 {
            warnings.push(ConfigWarning::ZeroBufferSize);
        }

        match &self.strategy {
            StrategyConfig::Epidemic => {}
            StrategyConfig::Prophet(prophet) => {
                if !(0.0..=1.0).contains(&prophet.p_init) {
                    warnings.push(ConfigWarning::ProbabilityOutOfRange("p_init"));
                }
                if !(0.0..=1.0).contains(&prophet.beta) {
                    warnings.push(ConfigWarning::ProbabilityOutOfRange("beta"));
                }
                if !(0.0..=1.0).contains(&prophet.gamma) {
                    warnings.push(ConfigWarning::ProbabilityOutOfRange("gamma"));
                }
            }
            StrategyConfig::MaxProp(maxprop) => {
                if let Some(max) = maxprop.prob_set_max_size
                    && max < 2
                {
                    warnings.push(ConfigWarning::ProbabilitySetTooSmall);
                }
            }
            StrategyConfig::BubbleRap(bubble) => {
                if !(0.0..=1.0).contains(&bubble.lambda) {
                    warnings.push(ConfigWarning::ProbabilityOutOfRange("lambda"));
                }
                if bubble.community == CommunityKind::KClique && bubble.k < 2 {
                    warnings.push(ConfigWarning::CliqueTooSmall);
                }
                if bubble.compute_interval > bubble.time_window {
                    warnings.push(ConfigWarning::ComputeIntervalExceedsWindow);
                }
            }
        }

        warnings
    }

    /// Check if the configuration is valid (no warnings)
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Configuration warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Expired messages are swept more than once a second
    TtlCheckIntervalTooShort,
    /// No message fits in the buffer
    ZeroBufferSize,
    /// A strategy parameter that is a probability lies outside [0, 1]
    ProbabilityOutOfRange(&'static str),
    /// MaxProp probability sets keep fewer than two neighbors
    ProbabilitySetTooSmall,
    /// k-clique detection with k below 2
    CliqueTooSmall,
    /// Centrality is recomputed less often than its window slides
    ComputeIntervalExceedsWindow,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::TtlCheckIntervalTooShort => {
                write!(f, "ttl_check_interval is very short (< 1s)")
            }
            ConfigWarning::ZeroBufferSize => write!(f, "buffer_size is zero"),
            ConfigWarning::ProbabilityOutOfRange(key) => {
                write!(f, "{key} is outside [0, 1]")
            }
            ConfigWarning::ProbabilitySetTooSmall => {
                write!(f, "prob_set_max_size keeps fewer than 2 neighbors")
            }
            ConfigWarning::CliqueTooSmall => write!(f, "k is below 2"),
            ConfigWarning::ComputeIntervalExceedsWindow => {
                write!(f, "compute_interval exceeds time_window")
            }
        }
    }
}
