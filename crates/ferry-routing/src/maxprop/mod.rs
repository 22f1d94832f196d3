//! MaxProp routing
//!
//! MaxProp ranks buffered messages by how likely they are to be delivered.
//! Every node learns the probability of meeting each neighbor next and
//! shares those sets transitively, which turns the network into a graph
//! whose edge weights are `1 - p`. The delivery cost of a message through a
//! peer is the cheapest path from that peer to the destination.
//!
//! New messages (few hops) are protected: messages below a hop-count
//! threshold, derived from how many bytes a contact usually carries, are
//! sent first and dropped last.
//!
//! Delivered messages are acknowledged and the acknowledgments flood with
//! every contact so that carriers can purge stale copies.

pub mod estimation;
pub mod path;
pub mod probability;

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use ferry_core::{ConfigResult, HostId, Message, MessageId, Recipients, SettingsView, SimTime};
use tracing::{debug, trace};

pub use estimation::{ESTIMATION_TARGET_WEIGHT, EncounterEstimator};
pub use path::ProbabilityGraph;
pub use probability::{MeetingProbabilitySet, ProbabilityTables, merge_transitive};

use crate::queue::QueueOrder;
use crate::report::StrategyMetrics;
use crate::strategy::{BufferView, Candidate, Contact, ForwardView, ForwardingStrategy, Peers};

/// Contacts averaged when estimating the bytes a contact carries
pub const BYTES_TRANSFERRED_AVG_SAMPLES: usize = 10;

/// MaxProp configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MaxPropConfig {
    /// Weight of a new meeting in the probability sets
    /// Default: 1.0
    pub alpha: f64,

    /// Most neighbors kept per probability set
    /// Default: unlimited
    pub prob_set_max_size: Option<usize>,

    /// Estimate alpha so an encounter fades within this many seconds
    /// Default: disabled
    pub time_scale: Option<f64>,
}

impl Default for MaxPropConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            prob_set_max_size: None,
            time_scale: None,
        }
    }
}

impl MaxPropConfig {
    /// Read MaxProp settings
    pub fn from_settings(view: &SettingsView<'_>) -> ConfigResult<Self> {
        let alpha: f64 = view.get_or("alpha", 1.0)?;
        if alpha <= 0.0 {
            return Err(view.invalid("alpha", &alpha.to_string(), "must be positive"));
        }
        let time_scale: Option<f64> = view.get("time_scale")?;
        if let Some(scale) = time_scale
            && scale <= 0.0
        {
            return Err(view.invalid("time_scale", &scale.to_string(), "must be positive"));
        }
        Ok(Self {
            alpha,
            prob_set_max_size: view.get("prob_set_max_size")?,
            time_scale,
        })
    }

    /// Enable alpha estimation over `seconds`
    pub fn with_time_scale(mut self, seconds: f64) -> Self {
        self.time_scale = Some(seconds);
        self
    }
}

/// MaxProp state of one node
#[derive(Debug, Clone)]
pub struct MaxProp {
    config: Arc<MaxPropConfig>,
    /// Own meeting probabilities
    probs: MeetingProbabilitySet,
    /// Meeting probabilities learned from others
    all_probs: ProbabilityTables,
    /// Messages known to be delivered
    acked: HashSet<MessageId>,
    /// Peers each message was already handed to
    sent: HashMap<MessageId, HashSet<HostId>>,
    /// Bytes carried by recent contacts, newest last
    transferred: VecDeque<u64>,
    estimator: Option<EncounterEstimator>,
    /// Path costs by source host
    cost_cache: HashMap<HostId, HashMap<HostId, f64>>,
    /// Destinations the cached costs cover
    cost_targets: BTreeSet<HostId>,
}

/// What a MaxProp node shows its peer during a contact
#[derive(Debug, Clone)]
pub struct MaxPropSnapshot {
    pub probs: MeetingProbabilitySet,
    pub all_probs: ProbabilityTables,
    pub acked: HashSet<MessageId>,
}

/// A message and what it costs to deliver through some host
struct Ranked<'a> {
    message: &'a Message,
    cost: f64,
}

impl MaxProp {
    /// Create MaxProp state
    pub fn new(config: Arc<MaxPropConfig>) -> Self {
        let probs = MeetingProbabilitySet::new(config.alpha, config.prob_set_max_size);
        let estimator = config.time_scale.map(EncounterEstimator::new);
        Self {
            config,
            probs,
            all_probs: ProbabilityTables::new(),
            acked: HashSet::new(),
            sent: HashMap::new(),
            transferred: VecDeque::with_capacity(BYTES_TRANSFERRED_AVG_SAMPLES),
            estimator,
            cost_cache: HashMap::new(),
            cost_targets: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &MaxPropConfig {
        &self.config
    }

    /// Own meeting probabilities
    pub fn probabilities(&self) -> &MeetingProbabilitySet {
        &self.probs
    }

    /// Meeting probabilities learned from other hosts
    pub fn known_tables(&self) -> &ProbabilityTables {
        &self.all_probs
    }

    /// Mark a message as delivered
    pub fn acknowledge(&mut self, id: MessageId) {
        self.sent.remove(&id);
        self.acked.insert(id);
    }

    /// Average bytes carried per contact over the recent samples
    pub fn avg_transferred_bytes(&self) -> u64 {
        if self.transferred.is_empty() {
            return 0;
        }
        self.transferred.iter().sum::<u64>() / self.transferred.len() as u64
    }

    fn record_transferred_bytes(&mut self, bytes: u64) {
        if self.transferred.len() == BYTES_TRANSFERRED_AVG_SAMPLES {
            self.transferred.pop_front();
        }
        self.transferred.push_back(bytes);
    }

    fn already_sent(&self, id: &MessageId, peer: HostId) -> bool {
        self.sent.get(id).is_some_and(|peers| peers.contains(&peer))
    }

    /// Drop cached costs when the buffered destinations changed
    fn refresh_cost_targets(&mut self, messages: &[&Message]) {
        let targets: BTreeSet<HostId> = messages
            .iter()
            .flat_map(|m| m.pending_recipients())
            .collect();
        if targets != self.cost_targets {
            self.cost_cache.clear();
            self.cost_targets = targets;
        }
    }

    /// Cost of delivering `message` starting from `source`
    ///
    /// Group messages cost the cheapest pending recipient; broadcasts and
    /// unknown destinations cost infinity.
    fn delivery_cost(&mut self, host: HostId, source: HostId, message: &Message) -> f64 {
        if matches!(message.to, Recipients::Broadcast) {
            return f64::INFINITY;
        }
        let probs = &self.probs;
        let all_probs = &self.all_probs;
        let targets = &self.cost_targets;
        let costs = self.cost_cache.entry(source).or_insert_with(|| {
            ProbabilityGraph::new(host, probs, all_probs).costs(source, targets)
        });
        message
            .pending_recipients()
            .into_iter()
            .filter_map(|d| costs.get(&d).copied())
            .fold(f64::INFINITY, f64::min)
    }

    /// Hop-count threshold for the current buffer
    pub fn threshold(&self, messages: &[&Message], buffer_size: u64) -> usize {
        calc_threshold(messages, buffer_size, self.avg_transferred_bytes())
    }
}

/// Hop count below which messages get priority
///
/// `avg_bytes` is what a contact usually carries. The messages with the
/// fewest hops that fit in that budget are protected; the threshold is one
/// above the largest hop count among them. Without any sample the threshold
/// is 0 and every message is ranked by cost alone.
pub fn calc_threshold(messages: &[&Message], buffer_size: u64, avg_bytes: u64) -> usize {
    if avg_bytes == 0 || messages.is_empty() {
        return 0;
    }
    let budget = if avg_bytes < buffer_size / 2 {
        avg_bytes
    } else if avg_bytes < buffer_size {
        avg_bytes.min(buffer_size - avg_bytes)
    } else {
        0
    };

    let mut by_hops: Vec<(usize, u64)> = messages.iter().map(|m| (m.hop_count(), m.size)).collect();
    by_hops.sort_by_key(|(hops, _)| *hops);

    let mut remaining = i128::from(budget);
    let mut last_included = None;
    for (hops, size) in by_hops {
        if remaining <= 0 {
            break;
        }
        remaining -= i128::from(size);
        last_included = Some(hops);
    }
    last_included.map_or(0, |hops| hops + 1)
}

/// Priority order of two ranked messages, higher priority first
fn compare_ranked(a: &Ranked<'_>, b: &Ranked<'_>, threshold: usize, queue: &QueueOrder) -> Ordering {
    let (hops_a, hops_b) = (a.message.hop_count(), b.message.hop_count());
    match (hops_a < threshold, hops_b < threshold) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => hops_a
            .cmp(&hops_b)
            .then_with(|| queue.compare(a.message, b.message)),
        (false, false) => a
            .cost
            .total_cmp(&b.cost)
            .then_with(|| hops_a.cmp(&hops_b))
            .then_with(|| queue.compare(a.message, b.message)),
    }
}

impl ForwardingStrategy for MaxProp {
    type Snapshot = MaxPropSnapshot;

    fn name(&self) -> &'static str {
        "maxprop"
    }

    fn replicate(&self) -> Self {
        Self::new(Arc::clone(&self.config))
    }

    fn snapshot(&self, _host: HostId, _now: SimTime) -> Self::Snapshot {
        MaxPropSnapshot {
            probs: self.probs.clone(),
            all_probs: self.all_probs.clone(),
            acked: self.acked.clone(),
        }
    }

    fn contact_up(&mut self, contact: &Contact, peer: &Self::Snapshot) {
        self.cost_cache.clear();
        for id in &peer.acked {
            self.sent.remove(id);
        }
        self.acked.extend(peer.acked.iter().cloned());

        self.probs.update_meeting_prob_for(contact.peer, contact.now);
        let mut peer_probs = peer.probs.clone();
        peer_probs.update_meeting_prob_for(contact.host, contact.now);
        self.all_probs = merge_transitive(
            std::mem::take(&mut self.all_probs),
            &peer.all_probs,
            contact.host,
        );
        self.all_probs.insert(contact.peer, peer_probs);

        if let Some(estimator) = self.estimator.as_mut() {
            estimator.record_encounter(contact.peer, contact.now);
            if let Some(alpha) = estimator.estimate_alpha() {
                trace!(host = %contact.host, alpha, "Re-estimated MaxProp alpha");
                self.probs.set_alpha(alpha);
            }
        }

        debug!(
            host = %contact.host,
            peer = %contact.peer,
            p = self.probs.prob_for(contact.peer),
            known = self.all_probs.len(),
            acked = self.acked.len(),
            "MaxProp encounter"
        );
    }

    fn contact_down(&mut self, _contact: &Contact, bytes_transferred: u64) {
        self.record_transferred_bytes(bytes_transferred);
    }

    fn is_acknowledged(&self, id: &MessageId) -> bool {
        self.acked.contains(id)
    }

    fn accept_message(&self, message: &Message, _from: HostId) -> bool {
        !self.acked.contains(&message.id)
    }

    fn on_new_message(&mut self, _message: &Message) {
        self.cost_cache.clear();
    }

    fn on_delivered(&mut self, message: &Message) {
        if message.unicast_destination().is_some() {
            self.acknowledge(message.id.clone());
        }
    }

    fn relay_candidates<P: Peers<Self>>(&mut self, view: &ForwardView<'_, P>) -> Vec<Candidate> {
        let threshold = self.threshold(view.messages, view.capacity);
        self.refresh_cost_targets(view.messages);

        let mut ranked: Vec<(Ranked<'_>, Candidate)> = Vec::new();
        for (message, link) in view.all_pairs() {
            if view.peers.has_message(link.peer, &message.id)
                || message.has_visited(link.peer)
                || self.already_sent(&message.id, link.peer)
            {
                continue;
            }
            let cost = self.delivery_cost(view.host, link.peer, message);
            ranked.push((
                Ranked { message, cost },
                Candidate {
                    message: message.id.clone(),
                    connection: link.connection,
                },
            ));
        }

        ranked.sort_by(|(a, _), (b, _)| compare_ranked(a, b, threshold, &view.queue));
        ranked.into_iter().map(|(_, c)| c).collect()
    }

    fn on_transfer_done<P: Peers<Self>>(
        &mut self,
        _host: HostId,
        message: &Message,
        peer: HostId,
        _peers: &P,
    ) -> bool {
        if message.unicast_destination() == Some(peer) {
            self.acknowledge(message.id.clone());
            return true;
        }
        self.sent.entry(message.id.clone()).or_default().insert(peer);
        false
    }

    fn next_to_evict(&mut self, buffer: &BufferView<'_>) -> Option<MessageId> {
        let threshold = self.threshold(buffer.messages, buffer.capacity);
        self.refresh_cost_targets(buffer.messages);

        let evictable: Vec<&Message> = buffer.evictable().collect();
        let mut ranked: Vec<Ranked<'_>> = Vec::with_capacity(evictable.len());
        for message in evictable {
            let cost = self.delivery_cost(buffer.host, buffer.host, message);
            ranked.push(Ranked { message, cost });
        }
        ranked.sort_by(|a, b| compare_ranked(a, b, threshold, &buffer.queue));
        ranked.last().map(|r| r.message.id.clone())
    }

    fn metrics(&self, _host: HostId, _now: SimTime) -> StrategyMetrics {
        StrategyMetrics::MaxProp {
            meeting_probabilities: self.probs.entries().clone(),
            known_tables: self.all_probs.len(),
            acknowledged: self.acked.len(),
            avg_transferred_bytes: self.avg_transferred_bytes(),
            alpha: self.probs.alpha(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueMode;
    use crate::testing::*;

    const EPS: f64 = 1e-12;

    fn make_maxprop() -> MaxProp {
        MaxProp::new(Arc::new(MaxPropConfig::default()))
    }

    fn set_with(entries: &[(u32, f64)]) -> MeetingProbabilitySet {
        MeetingProbabilitySet::new(1.0, None)
            .with_entries(entries.iter().map(|(h, p)| (host(*h), *p)), 0.0)
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.message.as_str()).collect()
    }

    #[test]
    fn test_cold_start_threshold_is_zero() {
        let mut state = make_maxprop();
        state.probs = set_with(&[(1, 0.3), (2, 0.6)]);
        let m = msg("M1", 0, 5);
        assert_eq!(state.avg_transferred_bytes(), 0);
        assert_eq!(state.threshold(&[&m], 10_000), 0);
    }

    #[test]
    fn test_threshold_covers_the_average_contact() {
        let mut state = make_maxprop();
        state.contact_down(&contact(0, 1, 10.0), 200);

        let a = msg_via("A", 0, 5, &[7]);
        let b = msg_via("B", 0, 5, &[7, 8, 9]);
        let c = msg_via("C", 0, 5, &[7, 8, 9, 10, 11]);
        assert_eq!((a.hop_count(), b.hop_count(), c.hop_count()), (1, 3, 5));
        assert_eq!(state.threshold(&[&c, &a, &b], u64::MAX), 4);
    }

    #[test]
    fn test_threshold_budget_near_buffer_size() {
        let a = msg_via("A", 0, 5, &[7]);
        let b = msg_via("B", 0, 5, &[7, 8]);
        // x = 300 of b = 400: budget min(300, 100) covers only A
        assert_eq!(calc_threshold(&[&a, &b], 400, 300), 2);
        // x >= b: nothing protected
        assert_eq!(calc_threshold(&[&a, &b], 400, 400), 0);
    }

    #[test]
    fn test_average_keeps_last_samples() {
        let mut state = make_maxprop();
        state.contact_down(&contact(0, 1, 0.0), 10_000);
        for _ in 0..BYTES_TRANSFERRED_AVG_SAMPLES {
            state.contact_down(&contact(0, 1, 0.0), 100);
        }
        assert_eq!(state.avg_transferred_bytes(), 100);
    }

    #[test]
    fn test_contact_exchanges_acks_and_tables() {
        let mut me = make_maxprop();
        let mut peer = make_maxprop();
        peer.acknowledge(MessageId::from("X"));
        peer.all_probs.insert(host(9), set_with(&[(3, 1.0)]));

        let theirs = peer.snapshot(host(1), 0.0);
        me.contact_up(&contact(0, 1, 5.0), &theirs);

        assert!(me.is_acknowledged(&MessageId::from("X")));
        assert!((me.probs.prob_for(host(1)) - 1.0).abs() < EPS);
        let learned = &me.all_probs[&host(1)];
        assert!((learned.prob_for(host(0)) - 1.0).abs() < EPS);
        assert_eq!(learned.last_update(), 5.0);
        assert!(me.all_probs.contains_key(&host(9)));
    }

    #[test]
    fn test_candidates_ranked_by_cost_through_peer() {
        let mut me = make_maxprop();
        me.all_probs.insert(host(1), set_with(&[(5, 0.9), (6, 0.2)]));
        let peers = MapPeers::<MaxProp>::new();

        let far = msg("FAR", 0, 6);
        let near = msg("NEAR", 0, 5);
        let messages = [&far, &near];
        let links = [link(0, 1)];
        let candidates = me.relay_candidates(&view(0.0, &messages, &links, &peers));
        assert_eq!(ids(&candidates), vec!["NEAR", "FAR"]);
    }

    #[test]
    fn test_new_messages_go_first() {
        let mut me = make_maxprop();
        me.contact_down(&contact(0, 1, 0.0), 200);
        me.all_probs.insert(host(1), set_with(&[(6, 1.0)]));
        let peers = MapPeers::<MaxProp>::new();

        let a = msg_via("A", 0, 5, &[7]);
        let b = msg_via("B", 0, 5, &[7, 8, 9]);
        let cheap_but_old = msg_via("C", 0, 6, &[7, 8, 9, 10, 11]);
        let messages = [&cheap_but_old, &b, &a];
        let links = [link(0, 1)];
        let candidates = me.relay_candidates(&view(0.0, &messages, &links, &peers));
        assert_eq!(ids(&candidates), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_skips_peers_that_carried_or_received_the_message() {
        let mut me = make_maxprop();
        let peers = MapPeers::<MaxProp>::new();
        let carried = msg_via("CARRIED", 0, 5, &[1]);
        let sent = msg("SENT", 0, 5);
        me.on_transfer_done(host(0), &sent, host(1), &peers);

        let messages = [&carried, &sent];
        let links = [link(0, 1), link(1, 2)];
        let candidates = me.relay_candidates(&view(0.0, &messages, &links, &peers));
        assert!(candidates.iter().all(|c| c.connection.0 == 1));
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_transfer_to_destination_acknowledges() {
        let mut me = make_maxprop();
        let peers = MapPeers::<MaxProp>::new();
        let m = msg("M1", 0, 1);
        assert!(me.on_transfer_done(host(0), &m, host(1), &peers));
        assert!(me.is_acknowledged(&m.id));
        assert!(!me.accept_message(&m, host(2)));

        let relayed = msg("M2", 0, 5);
        assert!(!me.on_transfer_done(host(0), &relayed, host(1), &peers));
        assert!(!me.is_acknowledged(&relayed.id));
    }

    #[test]
    fn test_evicts_lowest_priority_not_being_sent() {
        let mut me = make_maxprop();
        me.contact_down(&contact(0, 1, 0.0), 200);
        let a = msg_via("A", 0, 5, &[7]);
        let b = msg_via("B", 0, 5, &[7, 8, 9]);
        let c = msg_via("C", 0, 5, &[7, 8, 9, 10, 11]);
        let messages = [&a, &b, &c];
        let mut sending = HashSet::new();
        let queue = QueueOrder::new(QueueMode::Fifo, 0.0);

        let victim = me.next_to_evict(&BufferView {
            host: host(0),
            now: 0.0,
            capacity: u64::MAX,
            messages: &messages,
            sending: &sending,
            queue,
        });
        assert_eq!(victim, Some(MessageId::from("C")));

        sending.insert(MessageId::from("C"));
        let victim = me.next_to_evict(&BufferView {
            host: host(0),
            now: 0.0,
            capacity: u64::MAX,
            messages: &messages,
            sending: &sending,
            queue,
        });
        assert_eq!(victim, Some(MessageId::from("B")));
    }

    #[test]
    fn test_alpha_estimation_after_contacts() {
        let config = MaxPropConfig::default().with_time_scale(400.0);
        let mut me = MaxProp::new(Arc::new(config));
        let empty = make_maxprop().snapshot(host(1), 0.0);

        me.contact_up(&contact(0, 1, 0.0), &empty);
        me.contact_up(&contact(0, 2, 50.0), &empty);
        assert_eq!(me.probs.alpha(), 1.0);
        me.contact_up(&contact(0, 1, 100.0), &empty);

        let zeta = ESTIMATION_TARGET_WEIGHT.powf(1.0 / 4.0);
        assert!((me.probs.alpha() - (1.0 / zeta - 1.0)).abs() < EPS);
    }

    #[test]
    fn test_replicate_resets_state() {
        let mut me = make_maxprop();
        me.acknowledge(MessageId::from("X"));
        me.contact_down(&contact(0, 1, 0.0), 50);
        let fresh = me.replicate();
        assert!(!fresh.is_acknowledged(&MessageId::from("X")));
        assert_eq!(fresh.avg_transferred_bytes(), 0);
    }
}
