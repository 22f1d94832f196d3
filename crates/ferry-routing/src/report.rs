//! Router introspection reports

use std::collections::BTreeMap;

use ferry_core::{HostId, MessageId, SimTime};
use serde::{Deserialize, Serialize};

/// Snapshot of one router for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterReport {
    pub host: HostId,
    pub time: SimTime,
    /// Strategy name
    pub strategy: String,
    /// Buffer capacity in bytes
    pub buffer_size: u64,
    /// Bytes held by buffered messages
    pub buffer_occupancy: u64,
    /// Bytes reserved by receptions in flight
    pub incoming_bytes: u64,
    /// Buffered messages, oldest first
    pub buffer: Vec<BufferedMessage>,
    /// Messages delivered to this host, sorted by ID
    pub delivered: Vec<MessageId>,
    /// Hosts with an up connection to this one
    pub connections: Vec<HostId>,
    pub metrics: StrategyMetrics,
}

/// Summary of one buffered message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub id: MessageId,
    pub size: u64,
    pub hop_count: usize,
    pub receive_time: SimTime,
    /// Remaining TTL in minutes, `None` when infinite
    pub ttl: Option<i64>,
}

/// Strategy-specific state exposed in reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyMetrics {
    Epidemic,
    Prophet {
        /// Delivery predictability per destination, aged to the report time
        predictabilities: BTreeMap<HostId, f64>,
    },
    MaxProp {
        /// Own meeting probability per neighbor
        meeting_probabilities: BTreeMap<HostId, f64>,
        /// Hosts whose meeting probabilities are known
        known_tables: usize,
        acknowledged: usize,
        avg_transferred_bytes: u64,
        alpha: f64,
    },
    BubbleRap {
        community: Vec<HostId>,
        familiars: Vec<HostId>,
        global_centrality: f64,
        local_centrality: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_serialize_with_kind_tag() {
        let metrics = StrategyMetrics::Prophet {
            predictabilities: [(HostId(2), 0.75)].into_iter().collect(),
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["kind"], "prophet");
        assert_eq!(json["predictabilities"]["2"], 0.75);
    }
}
