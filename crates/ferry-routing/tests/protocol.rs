//! Transfer Protocol Tests
//!
//! Drives small networks of routers through contact sequences and checks the
//! store-and-forward bookkeeping:
//! - Relaying over consecutive contacts
//! - Repeated connection notifications
//! - Aborted transfers and buffer eviction
//! - Receive outcomes and bookkeeping errors

use std::sync::{Arc, Mutex};

use ferry_core::{
    ConnectionTable, EventLog, HostId, Message, MessageEvent, MessageId, ReceiveOutcome,
    RouterError, SimTime,
};
use ferry_routing::{
    Candidate, Contact, Env, Epidemic, ForwardView, ForwardingStrategy, MessageHandler, Network,
    Peers, Router, RouterConfig, StrategyMetrics, start_transfer,
};

// ============================================================================
// Helpers
// ============================================================================

/// Fast enough that any test message arrives within one tick
const FAST: f64 = 1_000_000.0;

fn host(n: u32) -> HostId {
    HostId(n)
}

fn id(raw: &str) -> MessageId {
    MessageId::from(raw)
}

fn epidemic_network(hosts: u32, config: RouterConfig) -> Network<Epidemic> {
    let prototype = Router::new(host(0), Arc::new(config), Epidemic::new());
    Network::new(&prototype, hosts)
}

fn with_log<S: ForwardingStrategy>(network: &mut Network<S>) -> Arc<EventLog> {
    let log = Arc::new(EventLog::new());
    network.add_listener(log.clone());
    log
}

fn tick<S: ForwardingStrategy>(network: &mut Network<S>) {
    network.update().unwrap();
    network.advance(1.0);
}

fn ticks<S: ForwardingStrategy>(network: &mut Network<S>, count: usize) {
    for _ in 0..count {
        tick(network);
    }
}

/// Handler recording the hop list of every message arriving at its host
#[derive(Clone, Default)]
struct HopRecorder {
    seen: Arc<Mutex<Vec<Vec<HostId>>>>,
}

impl MessageHandler for HopRecorder {
    fn handle(&mut self, message: Message, _host: HostId) -> Option<Message> {
        self.seen.lock().unwrap().push(message.hops().to_vec());
        Some(message)
    }

    fn replicate(&self) -> Box<dyn MessageHandler> {
        Box::new(self.clone())
    }
}

/// Handler that consumes every message
struct Swallow;

impl MessageHandler for Swallow {
    fn handle(&mut self, _message: Message, _host: HostId) -> Option<Message> {
        None
    }

    fn replicate(&self) -> Box<dyn MessageHandler> {
        Box::new(Swallow)
    }
}

/// Flooding strategy that refuses messages whose ID starts with "spam"
#[derive(Debug, Clone, Copy, Default)]
struct NoSpam;

impl ForwardingStrategy for NoSpam {
    type Snapshot = ();

    fn name(&self) -> &'static str {
        "no_spam"
    }

    fn replicate(&self) -> Self {
        NoSpam
    }

    fn snapshot(&self, _host: HostId, _now: SimTime) -> Self::Snapshot {}

    fn contact_up(&mut self, _contact: &Contact, _peer: &Self::Snapshot) {}

    fn accept_message(&self, message: &Message, _from: HostId) -> bool {
        !message.id.as_str().starts_with("spam")
    }

    fn relay_candidates<P: Peers<Self>>(&mut self, view: &ForwardView<'_, P>) -> Vec<Candidate> {
        view.all_pairs()
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

// ============================================================================
// Relaying
// ============================================================================

#[test]
fn test_relay_over_consecutive_contacts() {
    let mut network = epidemic_network(3, RouterConfig::default());
    let log = with_log(&mut network);
    let recorder = HopRecorder::default();
    network
        .router_mut(host(2))
        .unwrap()
        .add_handler(Box::new(recorder.clone()));

    let message = Message::unicast("M1", host(0), host(2), 100, 0.0).with_ttl(60);
    assert!(network.create_message(message).unwrap());

    network.connection_up(host(0), host(1), FAST).unwrap();
    ticks(&mut network, 2);
    let relayed = network.router(host(1)).unwrap().message(&id("M1")).unwrap();
    assert_eq!(relayed.hops(), &[host(0), host(1)]);
    network.connection_down(host(0), host(1)).unwrap();

    network.connection_up(host(1), host(2), FAST).unwrap();
    ticks(&mut network, 2);

    let destination = network.router(host(2)).unwrap();
    assert_eq!(destination.delivered_ids(), vec![id("M1")]);
    assert!(!destination.has_message(&id("M1")));
    assert_eq!(
        *recorder.seen.lock().unwrap(),
        vec![vec![host(0), host(1), host(2)]]
    );

    // The relay keeps its copy; further offers are refused as old
    ticks(&mut network, 3);
    assert!(network.router(host(1)).unwrap().has_message(&id("M1")));
    assert_eq!(log.deliveries(), 1);
}

#[test]
fn test_multicast_reaches_every_recipient() {
    let mut network = epidemic_network(3, RouterConfig::default());
    let log = with_log(&mut network);
    let group = [host(1), host(2)].into_iter().collect();
    let message = Message::new("G1", host(0), ferry_core::Recipients::Multicast(group), 100, 0.0);
    network.create_message(message).unwrap();

    network.connection_up(host(0), host(1), FAST).unwrap();
    ticks(&mut network, 2);
    network.connection_down(host(0), host(1)).unwrap();

    // Host 1 is a recipient but keeps relaying for host 2
    let carrier = network.router(host(1)).unwrap();
    assert!(carrier.is_delivered(&id("G1")));
    assert!(carrier.has_message(&id("G1")));

    network.connection_up(host(1), host(2), FAST).unwrap();
    ticks(&mut network, 2);
    assert!(network.router(host(2)).unwrap().is_delivered(&id("G1")));
    assert_eq!(log.deliveries(), 2);
}

#[test]
fn test_response_travels_back_to_sender() {
    let mut network = epidemic_network(2, RouterConfig::default());
    let message = Message::unicast("Q1", host(0), host(1), 100, 0.0).with_response_size(40);
    network.create_message(message).unwrap();

    network.connection_up(host(0), host(1), FAST).unwrap();
    ticks(&mut network, 4);

    assert!(network.router(host(1)).unwrap().is_delivered(&id("Q1")));
    assert!(network.router(host(0)).unwrap().is_delivered(&id("R_Q1")));
}

#[test]
fn test_swallowed_message_is_blacklisted() {
    let mut network = epidemic_network(3, RouterConfig::default());
    network.router_mut(host(1)).unwrap().add_handler(Box::new(Swallow));
    network
        .create_message(Message::unicast("M1", host(0), host(2), 100, 0.0))
        .unwrap();

    network.connection_up(host(0), host(1), FAST).unwrap();
    ticks(&mut network, 3);

    let relay = network.router(host(1)).unwrap();
    assert!(!relay.has_message(&id("M1")));
    assert!(relay.is_blacklisted(&id("M1")));
}

// ============================================================================
// Contacts
// ============================================================================

#[test]
fn test_repeated_connection_up_is_ignored() {
    let mut network = epidemic_network(2, RouterConfig::default());
    let first = network.connection_up(host(0), host(1), FAST).unwrap();
    let second = network.connection_up(host(1), host(0), FAST).unwrap();
    assert_eq!(first, second);
    assert_eq!(network.connections().len(), 1);

    let report = network.router(host(0)).unwrap().report(Env {
        now: network.now(),
        connections: network.connections(),
    });
    assert_eq!(report.connections, vec![host(1)]);
}

#[test]
fn test_connection_down_aborts_transfer() {
    let mut network = epidemic_network(2, RouterConfig::default());
    let log = with_log(&mut network);
    network
        .create_message(Message::unicast("M1", host(0), host(1), 1_000, 0.0))
        .unwrap();

    // 10 bytes per second: the transfer needs 100 seconds
    network.connection_up(host(0), host(1), 10.0).unwrap();
    ticks(&mut network, 3);
    assert!(network.router(host(1)).unwrap().is_receiving(&id("M1"), host(0)));
    assert_eq!(network.router(host(1)).unwrap().incoming_bytes(), 1_000);

    network.connection_down(host(0), host(1)).unwrap();
    let receiver = network.router(host(1)).unwrap();
    assert!(!receiver.is_receiving(&id("M1"), host(0)));
    assert_eq!(receiver.incoming_bytes(), 0);
    assert!(!receiver.is_delivered(&id("M1")));
    assert!(network.router(host(0)).unwrap().has_message(&id("M1")));
    assert!(
        log.events()
            .iter()
            .any(|e| matches!(e, MessageEvent::Aborted { .. }))
    );

    // A later contact starts over from zero
    network.connection_up(host(0), host(1), FAST).unwrap();
    ticks(&mut network, 2);
    assert!(network.router(host(1)).unwrap().is_delivered(&id("M1")));
}

#[test]
fn test_connection_down_without_contact_is_harmless() {
    let mut network = epidemic_network(2, RouterConfig::default());
    network.connection_down(host(0), host(1)).unwrap();
    assert!(network.connections().is_empty());
}

#[test]
fn test_delete_delivered_drops_redundant_copies() {
    let mut config = RouterConfig::default();
    config.delete_delivered = true;
    let mut network = epidemic_network(3, config);
    network
        .create_message(Message::unicast("M1", host(0), host(2), 100, 0.0))
        .unwrap();

    network.connection_up(host(0), host(1), FAST).unwrap();
    ticks(&mut network, 2);
    network.connection_down(host(0), host(1)).unwrap();

    network.connection_up(host(1), host(2), FAST).unwrap();
    ticks(&mut network, 2);
    network.connection_down(host(1), host(2)).unwrap();
    assert!(network.router(host(2)).unwrap().is_delivered(&id("M1")));
    assert!(!network.router(host(1)).unwrap().has_message(&id("M1")));

    network.connection_up(host(0), host(2), FAST).unwrap();
    tick(&mut network);
    assert!(!network.router(host(0)).unwrap().has_message(&id("M1")));
}

// ============================================================================
// Buffer management
// ============================================================================

#[test]
fn test_full_buffer_evicts_oldest() {
    let mut network = epidemic_network(2, RouterConfig::default().with_buffer_size(250));
    let log = with_log(&mut network);

    for (n, name) in ["M0", "M1", "M2"].into_iter().enumerate() {
        network.advance_to(n as SimTime);
        let message = Message::unicast(name, host(0), host(1), 100, n as SimTime);
        assert!(network.create_message(message).unwrap());
    }

    let router = network.router(host(0)).unwrap();
    assert!(!router.has_message(&id("M0")));
    assert!(router.has_message(&id("M1")));
    assert!(router.has_message(&id("M2")));
    assert_eq!(router.buffer_occupancy(), 200);
    assert!(log.events().iter().any(|e| matches!(
        e,
        MessageEvent::Deleted { dropped: true, message, .. } if message.as_str() == "M0"
    )));

    // Larger than the whole buffer: refused without evicting anything
    let huge = Message::unicast("BIG", host(0), host(1), 300, 3.0);
    assert!(!network.create_message(huge).unwrap());
    assert_eq!(network.router(host(0)).unwrap().message_count(), 2);
}

#[test]
fn test_message_being_sent_is_never_evicted() {
    let mut network = epidemic_network(3, RouterConfig::default().with_buffer_size(500));
    let log = with_log(&mut network);
    network
        .create_message(Message::unicast("A", host(0), host(2), 400, 0.0))
        .unwrap();

    // 400 bytes at 100 B/s: still in flight for four seconds
    network.connection_up(host(0), host(1), 100.0).unwrap();
    tick(&mut network);
    assert!(network.router(host(1)).unwrap().is_receiving(&id("A"), host(0)));

    // The only victim is on the wire, so there is no room to make
    let blocked = Message::unicast("B", host(0), host(2), 300, 1.0);
    assert!(!network.create_message(blocked).unwrap());
    let origin = network.router(host(0)).unwrap();
    assert!(origin.has_message(&id("A")));
    assert!(!origin.has_message(&id("B")));
    assert!(!log
        .events()
        .iter()
        .any(|e| matches!(e, MessageEvent::Deleted { dropped: true, .. })));

    ticks(&mut network, 5);
    assert!(network.router(host(1)).unwrap().has_message(&id("A")));

    // Once the transfer is done the same message makes room as usual
    let now = network.now();
    let retry = Message::unicast("B", host(0), host(2), 300, now);
    assert!(network.create_message(retry).unwrap());
    let origin = network.router(host(0)).unwrap();
    assert!(!origin.has_message(&id("A")));
    assert!(origin.has_message(&id("B")));
}

#[test]
fn test_expired_messages_are_dropped() {
    let mut network = epidemic_network(2, RouterConfig::default().with_default_ttl(1));
    network
        .create_message(Message::unicast("M1", host(0), host(1), 100, 0.0))
        .unwrap();
    assert_eq!(
        network.router(host(0)).unwrap().message(&id("M1")).unwrap().ttl,
        ferry_core::Ttl::Minutes(1)
    );

    network.advance_to(30.0);
    network.update().unwrap();
    assert!(network.router(host(0)).unwrap().has_message(&id("M1")));

    network.advance_to(60.0);
    network.update().unwrap();
    assert!(!network.router(host(0)).unwrap().has_message(&id("M1")));
}

// ============================================================================
// Receive outcomes
// ============================================================================

struct Pair<S> {
    sender: Router<S>,
    receiver: Router<S>,
    table: ConnectionTable,
}

impl<S: ForwardingStrategy> Pair<S> {
    fn new(strategy: S, receiver_config: RouterConfig) -> Self {
        let mut table = ConnectionTable::new();
        table.open(host(0), host(1), 10.0, 0.0);
        Self {
            sender: Router::new(host(0), Arc::new(RouterConfig::default()), strategy.replicate()),
            receiver: Router::new(host(1), Arc::new(receiver_config), strategy),
            table,
        }
    }

    fn create(&mut self, message: Message) {
        let env = Env {
            now: 0.0,
            connections: &self.table,
        };
        assert!(self.sender.create_new_message(message, env).unwrap());
    }

    fn offer(&mut self, message: &str, now: SimTime) -> ReceiveOutcome {
        let connection = self.table.find(host(0), host(1)).unwrap();
        start_transfer(
            &mut self.sender,
            &mut self.receiver,
            &mut self.table,
            connection,
            &id(message),
            now,
        )
        .unwrap()
    }
}

#[test]
fn test_receive_outcomes() {
    let mut pair = Pair::new(NoSpam, RouterConfig::default().with_buffer_size(500));
    pair.create(Message::unicast("spam-1", host(0), host(2), 100, 0.0));
    pair.create(Message::unicast("big", host(0), host(2), 600, 0.0));
    pair.create(Message::unicast("old", host(0), host(2), 100, 0.0).with_ttl(1));
    pair.create(Message::unicast("ok", host(0), host(2), 100, 0.0));
    pair.create(Message::unicast("next", host(0), host(2), 100, 0.0));

    assert_eq!(pair.offer("spam-1", 0.0), ReceiveOutcome::DeniedPolicy);
    assert_eq!(pair.offer("big", 0.0), ReceiveOutcome::DeniedNoSpace);
    assert_eq!(pair.offer("old", 120.0), ReceiveOutcome::DeniedTtl);
    assert_eq!(pair.offer("ok", 0.0), ReceiveOutcome::Ok);
    assert!(pair.receiver.is_receiving(&id("ok"), host(0)));
    assert_eq!(pair.offer("next", 0.0), ReceiveOutcome::TryLaterBusy);
}

#[test]
fn test_offering_a_held_message_is_denied_as_old() {
    let mut pair = Pair::new(Epidemic::new(), RouterConfig::default());
    pair.create(Message::unicast("M1", host(0), host(2), 100, 0.0));
    let env = Env {
        now: 0.0,
        connections: &pair.table,
    };
    let copy = Message::unicast("M1", host(0), host(2), 100, 0.0);
    assert!(pair.receiver.create_new_message(copy, env).unwrap());

    assert_eq!(pair.offer("M1", 0.0), ReceiveOutcome::DeniedOld);
}

// ============================================================================
// Bookkeeping errors
// ============================================================================

#[test]
fn test_bookkeeping_errors() {
    let mut network = epidemic_network(2, RouterConfig::default());

    let stray = Message::unicast("M1", host(7), host(0), 10, 0.0);
    assert!(matches!(
        network.create_message(stray),
        Err(RouterError::UnknownHost(h)) if h == host(7)
    ));
    assert!(matches!(
        network.connection_up(host(0), host(9), FAST),
        Err(RouterError::UnknownHost(_))
    ));

    let router = network.router_mut(host(0)).unwrap();
    assert!(matches!(
        router.delete_message(&id("nope"), true, 0.0),
        Err(RouterError::UnknownMessage { .. })
    ));
    assert!(matches!(
        router.message_aborted(&id("nope"), host(1), 0.0),
        Err(RouterError::NoIncomingTransfer { .. })
    ));
}
