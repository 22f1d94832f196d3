//! Buffer capacity property tests
//!
//! Random sequences of message creation, contacts and ticks must never push
//! a router past its buffer capacity, whatever strategy it runs.

use ferry_core::{HostId, Message};
use ferry_routing::{
    BubbleRapConfig, MaxPropConfig, NetworkConfig, ProphetConfig, RouterConfig, StrategyConfig,
};
use proptest::prelude::*;

const HOSTS: u32 = 4;
const CAPACITY: u64 = 1_000;

#[derive(Debug, Clone)]
enum Op {
    Create { host: u32, size: u64 },
    Up { a: u32, b: u32, rate: f64 },
    Down { a: u32, b: u32 },
    Tick,
}

fn distinct_pair() -> impl Strategy<Value = (u32, u32)> {
    (0..HOSTS, 1..HOSTS).prop_map(|(a, offset)| (a, (a + offset) % HOSTS))
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..HOSTS, 1..=600u64).prop_map(|(host, size)| Op::Create { host, size }),
        2 => (distinct_pair(), prop_oneof![Just(50.0), Just(500.0), Just(1e6)])
            .prop_map(|((a, b), rate)| Op::Up { a, b, rate }),
        1 => distinct_pair().prop_map(|(a, b)| Op::Down { a, b }),
        4 => Just(Op::Tick),
    ]
}

fn strategy_config() -> impl Strategy<Value = StrategyConfig> {
    prop_oneof![
        Just(StrategyConfig::Epidemic),
        Just(StrategyConfig::Prophet(ProphetConfig::default())),
        Just(StrategyConfig::MaxProp(MaxPropConfig::default())),
        Just(StrategyConfig::BubbleRap(BubbleRapConfig::default())),
    ]
}

proptest! {
    #[test]
    fn buffer_never_exceeds_capacity(
        strategy in strategy_config(),
        ops in prop::collection::vec(op(), 1..120),
    ) {
        let config = NetworkConfig {
            router: RouterConfig::default().with_buffer_size(CAPACITY),
            strategy,
        };
        let mut network = config.build_network(HOSTS);

        for (n, op) in ops.into_iter().enumerate() {
            match op {
                Op::Create { host, size } => {
                    let to = HostId((host + 1) % HOSTS);
                    let message = Message::unicast(
                        format!("M{n}"),
                        HostId(host),
                        to,
                        size,
                        network.now(),
                    );
                    network.create_message(message).unwrap();
                }
                Op::Up { a, b, rate } => {
                    network.connection_up(HostId(a), HostId(b), rate).unwrap();
                }
                Op::Down { a, b } => network.connection_down(HostId(a), HostId(b)).unwrap(),
                Op::Tick => {
                    network.update().unwrap();
                    network.advance(1.0);
                }
            }

            for router in network.routers() {
                prop_assert!(
                    router.buffer_occupancy() + router.incoming_bytes() <= CAPACITY,
                    "{} holds {} bytes and receives {}",
                    router.host(),
                    router.buffer_occupancy(),
                    router.incoming_bytes()
                );
            }
        }
    }

    #[test]
    fn delivered_messages_are_never_delivered_twice(
        ops in prop::collection::vec(op(), 1..120),
    ) {
        let mut network = NetworkConfig::default().build_network(HOSTS);
        let log = std::sync::Arc::new(ferry_core::EventLog::new());
        network.add_listener(log.clone());

        for (n, op) in ops.into_iter().enumerate() {
            match op {
                Op::Create { host, size } => {
                    let to = HostId((host + 1) % HOSTS);
                    let message = Message::unicast(format!("M{n}"), HostId(host), to, size, network.now());
                    network.create_message(message).unwrap();
                }
                Op::Up { a, b, rate } => {
                    network.connection_up(HostId(a), HostId(b), rate).unwrap();
                }
                Op::Down { a, b } => network.connection_down(HostId(a), HostId(b)).unwrap(),
                Op::Tick => {
                    network.update().unwrap();
                    network.advance(1.0);
                }
            }
        }

        let mut delivered: Vec<_> = log
            .events()
            .into_iter()
            .filter(|e| e.is_delivery())
            .map(|e| e.message_id().clone())
            .collect();
        let total = delivered.len();
        delivered.sort();
        delivered.dedup();
        prop_assert_eq!(delivered.len(), total);
    }
}
