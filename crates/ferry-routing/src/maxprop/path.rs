//! Delivery cost over meeting probabilities
//!
//! The cost of a path is the sum of `1 - p` over its hops, where `p` is the
//! meeting probability of each hop. The cheapest path from a neighbor to a
//! destination is found with Dijkstra's algorithm over the known sets.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use ferry_core::HostId;

use super::probability::{MeetingProbabilitySet, ProbabilityTables};

/// Graph of meeting probabilities as known by one host
pub struct ProbabilityGraph<'a> {
    host: HostId,
    own: &'a MeetingProbabilitySet,
    others: &'a ProbabilityTables,
}

#[derive(Debug, PartialEq)]
struct Visit {
    cost: f64,
    node: HostId,
}

impl Eq for Visit {}

impl Ord for Visit {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on cost
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Visit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> ProbabilityGraph<'a> {
    /// Graph from `host`'s own set and the sets it learned from others
    pub fn new(
        host: HostId,
        own: &'a MeetingProbabilitySet,
        others: &'a ProbabilityTables,
    ) -> Self {
        Self { host, own, others }
    }

    fn neighbors(&self, node: HostId) -> Option<&'a MeetingProbabilitySet> {
        if node == self.host {
            Some(self.own)
        } else {
            self.others.get(&node)
        }
    }

    /// Cheapest path cost from `source` to each reachable target
    ///
    /// Stops once every target is settled. Unreachable targets are absent.
    pub fn costs(&self, source: HostId, targets: &BTreeSet<HostId>) -> HashMap<HostId, f64> {
        let mut dist: HashMap<HostId, f64> = HashMap::new();
        let mut settled: HashMap<HostId, f64> = HashMap::new();
        let mut remaining: HashSet<HostId> = targets.iter().copied().collect();
        let mut heap = BinaryHeap::new();

        dist.insert(source, 0.0);
        heap.push(Visit {
            cost: 0.0,
            node: source,
        });

        while let Some(Visit { cost, node }) = heap.pop() {
            if settled.contains_key(&node) {
                continue;
            }
            settled.insert(node, cost);
            remaining.remove(&node);
            if remaining.is_empty() {
                break;
            }

            let Some(set) = self.neighbors(node) else {
                continue;
            };
            for (next, p) in set.entries() {
                if settled.contains_key(next) {
                    continue;
                }
                let candidate = cost + (1.0 - p);
                let better = dist.get(next).is_none_or(|d| candidate < *d);
                if better {
                    dist.insert(*next, candidate);
                    heap.push(Visit {
                        cost: candidate,
                        node: *next,
                    });
                }
            }
        }
        settled
    }
}
