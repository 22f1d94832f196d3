//! Trace-driven simulation engine
//!
//! Replays a [`Trace`] against a [`Network`] in fixed time steps. Each step
//! first applies every trace event that is due, then updates all routers
//! once and advances the clock.

use std::sync::Arc;

use ferry_core::{ConfigError, FerryResult, RouterResult, SimTime};
use ferry_routing::{AnyStrategy, Network, NetworkConfig, RouterReport};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::stats::{SimStats, StatsCollector};
use crate::trace::{Trace, TraceEvent};

/// Transfer rate of contacts whose trace line does not name one (bytes/s)
pub const DEFAULT_RATE: f64 = 250_000.0;

/// Configuration for a simulation run
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Seconds between router updates
    pub step: SimTime,
    /// Stop time, `None` to stop one step after the last trace event
    pub end: Option<SimTime>,
    /// Rate of contacts without an explicit rate
    pub default_rate: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            step: 1.0,
            end: None,
            default_rate: DEFAULT_RATE,
        }
    }
}

/// Final state of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimReport {
    pub run_id: String,
    pub strategy: String,
    pub hosts: usize,
    pub end_time: SimTime,
    pub stats: SimStats,
    pub routers: Vec<RouterReport>,
}

/// A network of routers driven by trace events
pub struct Simulation {
    config: SimConfig,
    strategy: String,
    network: Network<AnyStrategy>,
    stats: Arc<StatsCollector>,
}

impl Simulation {
    /// Create a simulation of `hosts` routers built from `network_config`
    pub fn new(network_config: &NetworkConfig, hosts: u32, config: SimConfig) -> Self {
        let mut network = network_config.build_network(hosts);
        let stats = Arc::new(StatsCollector::new());
        network.add_listener(stats.clone());
        Self {
            config,
            strategy: network_config.strategy.kind().to_string(),
            network,
            stats,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn network(&self) -> &Network<AnyStrategy> {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network<AnyStrategy> {
        &mut self.network
    }

    /// Statistics gathered so far
    pub fn stats(&self) -> SimStats {
        self.stats.snapshot()
    }

    /// Apply one trace event at the current time
    pub fn apply(&mut self, event: &TraceEvent) -> RouterResult<()> {
        match event {
            TraceEvent::Connection {
                a, b, up: true, rate, ..
            } => {
                self.network
                    .connection_up(*a, *b, rate.unwrap_or(self.config.default_rate))?;
            }
            TraceEvent::Connection { a, b, up: false, .. } => {
                self.network.connection_down(*a, *b)?;
            }
            TraceEvent::Create { .. } => {
                let Some(message) = event.to_message() else {
                    return Ok(());
                };
                let id = message.id.clone();
                let from = message.from;
                if !self.network.create_message(message)? {
                    warn!(host = %from, message = %id, "Message does not fit in the buffer");
                }
            }
        }
        Ok(())
    }

    /// Replay `trace` until the configured end time
    pub fn run(&mut self, trace: &Trace) -> FerryResult<()> {
        let step = self.config.step;
        if !(step > 0.0 && step.is_finite()) {
            return Err(ConfigError::Invalid {
                namespace: "simulation".to_string(),
                key: "step".to_string(),
                value: step.to_string(),
                reason: "must be a positive number of seconds".to_string(),
            }
            .into());
        }
        let end = self.config.end.unwrap_or(trace.end_time() + step);
        info!(
            strategy = %self.strategy,
            hosts = self.network.host_count(),
            events = trace.len(),
            end,
            step,
            "Starting run"
        );

        let mut pending = trace.events().iter().peekable();
        while self.network.now() < end {
            let now = self.network.now();
            while let Some(event) = pending.next_if(|e| e.time() <= now) {
                self.apply(event)?;
            }
            self.network.update()?;
            self.network.advance(step);
        }

        let stats = self.stats();
        info!(
            created = stats.created,
            delivered = stats.delivered,
            relayed = stats.relayed,
            dropped = stats.dropped,
            "Run complete"
        );
        Ok(())
    }

    /// Statistics and router reports at the current time
    pub fn report(&self) -> SimReport {
        SimReport {
            run_id: ferry_logging::run_id().to_string(),
            strategy: self.strategy.clone(),
            hosts: self.network.host_count(),
            end_time: self.network.now(),
            stats: self.stats(),
            routers: self.network.reports(),
        }
    }
}
