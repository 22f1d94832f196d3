//! Delivery statistics gathered from router events

use std::collections::HashMap;

use ferry_core::{MessageEvent, MessageId, MessageListener, SimTime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Summary of a run's message traffic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimStats {
    /// Messages created, including responses
    pub created: u64,
    /// Transfers started
    pub started: u64,
    /// Transfers completed
    pub relayed: u64,
    /// Transfers aborted by a contact going down
    pub aborted: u64,
    /// Buffered copies dropped by buffer management or TTL
    pub dropped: u64,
    /// Buffered copies removed after a delivery
    pub removed: u64,
    /// First deliveries to a final recipient
    pub delivered: u64,
    /// Delivered over created
    pub delivery_probability: f64,
    /// Extra relays per delivery, `None` before the first delivery
    pub overhead_ratio: Option<f64>,
    /// Mean creation-to-delivery time in seconds
    pub latency_avg: Option<f64>,
    pub latency_median: Option<f64>,
}

#[derive(Debug, Default)]
struct Counters {
    stats: SimStats,
    created_at: HashMap<MessageId, SimTime>,
    latencies: Vec<f64>,
}

/// Listener that turns message events into [`SimStats`]
#[derive(Debug, Default)]
pub struct StatsCollector {
    counters: Mutex<Counters>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current statistics
    pub fn snapshot(&self) -> SimStats {
        let counters = self.counters.lock();
        let mut stats = counters.stats.clone();

        if stats.created > 0 {
            stats.delivery_probability = stats.delivered as f64 / stats.created as f64;
        }
        if stats.delivered > 0 {
            stats.overhead_ratio =
                Some((stats.relayed as f64 - stats.delivered as f64) / stats.delivered as f64);
        }

        let mut latencies = counters.latencies.clone();
        if !latencies.is_empty() {
            latencies.sort_by(f64::total_cmp);
            stats.latency_avg = Some(latencies.iter().sum::<f64>() / latencies.len() as f64);
            let mid = latencies.len() / 2;
            stats.latency_median = Some(if latencies.len() % 2 == 0 {
                (latencies[mid - 1] + latencies[mid]) / 2.0
            } else {
                latencies[mid]
            });
        }
        stats
    }
}

impl MessageListener for StatsCollector {
    fn on_event(&self, event: &MessageEvent) {
        let mut counters = self.counters.lock();
        match event {
            MessageEvent::Created { message, time, .. } => {
                counters.stats.created += 1;
                counters.created_at.insert(message.clone(), *time);
            }
            MessageEvent::TransferStarted { .. } => counters.stats.started += 1,
            MessageEvent::Transferred {
                message,
                first_delivery,
                time,
                ..
            } => {
                counters.stats.relayed += 1;
                if *first_delivery {
                    counters.stats.delivered += 1;
                    if let Some(created) = counters.created_at.get(message).copied() {
                        counters.latencies.push(time - created);
                    }
                }
            }
            MessageEvent::Aborted { .. } => counters.stats.aborted += 1,
            MessageEvent::Deleted { dropped: true, .. } => counters.stats.dropped += 1,
            MessageEvent::Deleted { dropped: false, .. } => counters.stats.removed += 1,
        }
    }
}
