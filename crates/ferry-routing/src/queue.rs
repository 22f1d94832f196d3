//! Send-queue ordering
//!
//! Routers try their messages in one of two orders. In random mode the list
//! is shuffled with a generator seeded by the integer simulation time, so the
//! order is stable within one simulated second and changes between seconds.
//! In FIFO mode the oldest received message goes first.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use ferry_core::{ConfigError, Message, MessageId, SimTime};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Ordering mode of the send queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueueMode {
    /// Uniformly random, reshuffled every simulated second
    #[default]
    Random,
    /// By ascending receive time
    Fifo,
}

impl QueueMode {
    /// Parse a `send_queue` setting (`random`, `fifo`, `1` or `2`)
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "random" | "1" => Ok(QueueMode::Random),
            "fifo" | "2" => Ok(QueueMode::Fifo),
            other => Err(ConfigError::Invalid {
                namespace: String::new(),
                key: "send_queue".into(),
                value: other.to_string(),
                reason: "expected random, fifo, 1 or 2".into(),
            }),
        }
    }
}

/// Queue ordering at one instant
#[derive(Debug, Clone, Copy)]
pub struct QueueOrder {
    mode: QueueMode,
    int_time: u64,
}

impl QueueOrder {
    /// Ordering for `mode` at simulation time `now`
    pub fn new(mode: QueueMode, now: SimTime) -> Self {
        Self {
            mode,
            int_time: now.max(0.0).floor() as u64,
        }
    }

    /// The ordering mode
    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    /// Sort items whose message is given by `message_of`
    pub fn sort_by_key<T>(&self, items: &mut [T], message_of: impl Fn(&T) -> &Message) {
        match self.mode {
            QueueMode::Random => {
                let mut rng = StdRng::seed_from_u64(self.int_time);
                items.shuffle(&mut rng);
            }
            QueueMode::Fifo => items.sort_by(|a, b| {
                let (a, b) = (message_of(a), message_of(b));
                a.receive_time
                    .total_cmp(&b.receive_time)
                    .then_with(|| a.id.cmp(&b.id))
            }),
        }
    }

    /// Sort a list of messages
    pub fn sort(&self, messages: &mut [&Message]) {
        self.sort_by_key(messages, |m| m);
    }

    /// Pairwise tie-break between two messages
    ///
    /// Random mode compares stable hashes of the message IDs.
    pub fn compare(&self, a: &Message, b: &Message) -> Ordering {
        match self.mode {
            QueueMode::Random => id_hash(&a.id).cmp(&id_hash(&b.id)),
            QueueMode::Fifo => a.receive_time.total_cmp(&b.receive_time),
        }
    }
}

fn id_hash(id: &MessageId) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::HostId;

    fn msg(id: &str, received: SimTime) -> Message {
        let mut m = Message::unicast(id, HostId(0), HostId(1), 10, 0.0);
        m.receive_time = received;
        m
    }

    #[test]
    fn test_parse_queue_mode() {
        assert_eq!(QueueMode::parse("random").unwrap(), QueueMode::Random);
        assert_eq!(QueueMode::parse("FIFO").unwrap(), QueueMode::Fifo);
        assert_eq!(QueueMode::parse("2").unwrap(), QueueMode::Fifo);
        assert!(QueueMode::parse("lifo").is_err());
    }

    #[test]
    fn test_fifo_orders_by_receive_time() {
        let (a, b, c) = (msg("A", 30.0), msg("B", 10.0), msg("C", 20.0));
        let mut list = vec![&a, &b, &c];
        QueueOrder::new(QueueMode::Fifo, 100.0).sort(&mut list);
        let ids: Vec<_> = list.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C", "A"]);
    }

    #[test]
    fn test_random_is_stable_within_a_second() {
        let messages: Vec<_> = (0..20).map(|i| msg(&format!("M{i}"), 0.0)).collect();
        let order_at = |t: SimTime| {
            let mut list: Vec<_> = messages.iter().collect();
            QueueOrder::new(QueueMode::Random, t).sort(&mut list);
            list.iter().map(|m| m.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(order_at(5.1), order_at(5.9));
        assert_ne!(order_at(5.0), order_at(6.0));
    }

    #[test]
    fn test_random_compare_is_consistent() {
        let (a, b) = (msg("A", 0.0), msg("B", 0.0));
        let order = QueueOrder::new(QueueMode::Random, 0.0);
        assert_eq!(order.compare(&a, &b), order.compare(&b, &a).reverse());
        assert_eq!(order.compare(&a, &a), Ordering::Equal);
    }
}
