//! PRoPHET (Probabilistic Routing Protocol using History of Encounters)
//!
//! PRoPHET uses encounter history to estimate delivery predictabilities.
//! Nodes that are frequently encountered are more likely to be good
//! intermediaries for message delivery.
//!
//! Key concepts:
//! - **Delivery Predictability (P)**: Likelihood that this node can deliver to a destination
//! - **Encounter Updates**: When two nodes meet, their predictability for each other grows
//! - **Transitivity**: If A meets B often and B meets C often, A is a good carrier for C
//! - **Aging**: Predictabilities decay with simulated time between encounters

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ferry_core::{ConfigResult, HostId, Message, SettingsView, SimTime};
use tracing::debug;

use crate::report::StrategyMetrics;
use crate::strategy::{Candidate, Contact, ForwardView, ForwardingStrategy, Peers};

/// PRoPHET protocol configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ProphetConfig {
    /// Seconds of simulated time per aging step
    /// Required in settings; default: 30
    pub seconds_in_time_unit: f64,

    /// Initial predictability gained per encounter (P_init)
    /// Default: 0.75
    pub p_init: f64,

    /// Transitivity scaling factor (beta)
    /// Default: 0.25
    pub beta: f64,

    /// Aging constant (gamma), applied once per time unit
    /// Default: 0.98
    pub gamma: f64,
}

impl Default for ProphetConfig {
    fn default() -> Self {
        Self {
            seconds_in_time_unit: 30.0,
            p_init: 0.75,
            beta: 0.25,
            gamma: 0.98,
        }
    }
}

impl ProphetConfig {
    /// Create a config with the given aging time unit
    pub fn new(seconds_in_time_unit: f64) -> Self {
        Self {
            seconds_in_time_unit,
            ..Default::default()
        }
    }

    /// Read PRoPHET settings; `seconds_in_time_unit` is mandatory
    pub fn from_settings(view: &SettingsView<'_>) -> ConfigResult<Self> {
        let defaults = Self::default();
        let seconds_in_time_unit: f64 = view.require("seconds_in_time_unit")?;
        if seconds_in_time_unit <= 0.0 {
            return Err(view.invalid(
                "seconds_in_time_unit",
                &seconds_in_time_unit.to_string(),
                "must be positive",
            ));
        }
        Ok(Self {
            seconds_in_time_unit,
            p_init: view.get_or("p_init", defaults.p_init)?,
            beta: view.get_or("beta", defaults.beta)?,
            gamma: view.get_or("gamma", defaults.gamma)?,
        })
    }

    /// Aging multiplier for `elapsed` seconds
    fn aging_factor(&self, elapsed: SimTime) -> f64 {
        self.gamma.powf(elapsed / self.seconds_in_time_unit)
    }
}

/// PRoPHET state of one node
#[derive(Debug, Clone)]
pub struct Prophet {
    config: Arc<ProphetConfig>,
    /// Delivery predictability per destination, as of `last_aged`
    preds: HashMap<HostId, f64>,
    last_aged: SimTime,
}

/// Delivery predictabilities of a node, aged to the snapshot time
#[derive(Debug, Clone, Default)]
pub struct ProphetSnapshot {
    pub preds: HashMap<HostId, f64>,
}

impl Prophet {
    /// Create PRoPHET state
    pub fn new(config: Arc<ProphetConfig>) -> Self {
        Self {
            config,
            preds: HashMap::new(),
            last_aged: 0.0,
        }
    }

    pub fn config(&self) -> &ProphetConfig {
        &self.config
    }

    /// Predictability for `destination` aged to `now`
    ///
    /// Returns 0.0 if the destination is unknown.
    pub fn predictability(&self, destination: HostId, now: SimTime) -> f64 {
        let stored = self.preds.get(&destination).copied().unwrap_or(0.0);
        stored * self.config.aging_factor(now - self.last_aged)
    }

    /// All predictabilities aged to `now`
    pub fn aged_predictabilities(&self, now: SimTime) -> HashMap<HostId, f64> {
        let factor = self.config.aging_factor(now - self.last_aged);
        self.preds.iter().map(|(h, p)| (*h, p * factor)).collect()
    }

    /// Age the table in place to `now`
    pub fn age(&mut self, now: SimTime) {
        let elapsed = now - self.last_aged;
        if elapsed <= 0.0 {
            return;
        }
        let factor = self.config.aging_factor(elapsed);
        for p in self.preds.values_mut() {
            *p *= factor;
        }
        self.last_aged = now;
    }

    /// Record a direct encounter with `peer`
    ///
    /// P_new = P_old + (1 - P_old) * P_init
    pub fn encounter(&mut self, peer: HostId, now: SimTime) {
        self.age(now);
        let p_old = self.preds.get(&peer).copied().unwrap_or(0.0);
        let p_new = p_old + (1.0 - p_old) * self.config.p_init;
        self.preds.insert(peer, p_new);
    }

    /// Apply the transitive update through `intermediary`
    ///
    /// For each destination Z that the intermediary knows:
    ///   P(Z) = P(Z) + (1 - P(Z)) * P(intermediary) * P(intermediary, Z) * beta
    pub fn transitive_update(
        &mut self,
        host: HostId,
        intermediary: HostId,
        intermediary_preds: &HashMap<HostId, f64>,
        now: SimTime,
    ) {
        self.age(now);
        let p_intermediary = self.preds.get(&intermediary).copied().unwrap_or(0.0);
        for (destination, p_int_dest) in intermediary_preds {
            if *destination == host {
                continue;
            }
            let p_old = self.preds.get(destination).copied().unwrap_or(0.0);
            let p_new = p_old + (1.0 - p_old) * p_intermediary * p_int_dest * self.config.beta;
            self.preds.insert(*destination, p_new);
        }
    }

    /// Best predictability over the recipients a message still has to reach
    fn best_for(&self, message: &Message, now: SimTime) -> f64 {
        message
            .pending_recipients()
            .into_iter()
            .map(|d| self.predictability(d, now))
            .fold(0.0, f64::max)
    }
}

impl ForwardingStrategy for Prophet {
    type Snapshot = ProphetSnapshot;

    fn name(&self) -> &'static str {
        "prophet"
    }

    fn replicate(&self) -> Self {
        Self::new(Arc::clone(&self.config))
    }

    fn snapshot(&self, _host: HostId, now: SimTime) -> Self::Snapshot {
        ProphetSnapshot {
            preds: self.aged_predictabilities(now),
        }
    }

    fn contact_up(&mut self, contact: &Contact, peer: &Self::Snapshot) {
        self.encounter(contact.peer, contact.now);
        self.transitive_update(contact.host, contact.peer, &peer.preds, contact.now);
        debug!(
            host = %contact.host,
            peer = %contact.peer,
            p = self.preds.get(&contact.peer).copied().unwrap_or(0.0),
            known = self.preds.len(),
            "PRoPHET encounter"
        );
    }

    fn relay_candidates<P: Peers<Self>>(&mut self, view: &ForwardView<'_, P>) -> Vec<Candidate> {
        let mut ranked: Vec<(&Message, Candidate, f64)> = Vec::new();
        for (message, link) in view.all_pairs() {
            if view.peers.has_message(link.peer, &message.id) {
                continue;
            }
            let Some(peer) = view.peers.strategy(link.peer) else {
                continue;
            };
            let theirs = peer.best_for(message, view.now);
            if theirs > self.best_for(message, view.now) {
                ranked.push((
                    message,
                    Candidate {
                        message: message.id.clone(),
                        connection: link.connection,
                    },
                    theirs,
                ));
            }
        }

        ranked.sort_by(|(m1, _, p1), (m2, _, p2)| {
            p2.total_cmp(p1)
                .then_with(|| compare_utility(m1, m2))
                .then_with(|| view.queue.compare(m1, m2))
        });
        ranked.into_iter().map(|(_, c, _)| c).collect()
    }

    fn metrics(&self, _host: HostId, now: SimTime) -> StrategyMetrics {
        StrategyMetrics::Prophet {
            predictabilities: self
                .aged_predictabilities(now)
                .into_iter()
                .collect::<BTreeMap<_, _>>(),
        }
    }
}

/// Higher utility first; messages without utility tie
fn compare_utility(a: &Message, b: &Message) -> Ordering {
    match (a.utility, b.utility) {
        (Some(ua), Some(ub)) => ub.total_cmp(&ua),
        _ => Ordering::Equal,
    }
}
