//! Meeting probability sets
//!
//! Each MaxProp node keeps the probability of meeting each neighbor next.
//! Probabilities of all neighbors sum to one. Nodes also keep the sets of
//! every other node they heard of, and those tables travel transitively from
//! contact to contact.

use std::collections::{BTreeMap, HashMap};

use ferry_core::{HostId, SimTime};
use serde::{Deserialize, Serialize};

/// Meeting probability sets of other hosts, by host
pub type ProbabilityTables = HashMap<HostId, MeetingProbabilitySet>;

/// Normalized probabilities of meeting each neighbor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingProbabilitySet {
    probs: BTreeMap<HostId, f64>,
    /// Weight given to a new meeting
    alpha: f64,
    /// Most entries kept, `None` for unlimited
    max_size: Option<usize>,
    /// When the set last changed
    last_update: SimTime,
}

impl MeetingProbabilitySet {
    /// Create an empty set
    pub fn new(alpha: f64, max_size: Option<usize>) -> Self {
        Self {
            probs: BTreeMap::new(),
            alpha,
            max_size,
            last_update: 0.0,
        }
    }

    /// Set with preset entries, as if last updated at `last_update`
    pub fn with_entries(
        mut self,
        entries: impl IntoIterator<Item = (HostId, f64)>,
        last_update: SimTime,
    ) -> Self {
        self.probs = entries.into_iter().collect();
        self.last_update = last_update;
        self
    }

    /// Probability of meeting `host`, 0.0 if unknown
    pub fn prob_for(&self, host: HostId) -> f64 {
        self.probs.get(&host).copied().unwrap_or(0.0)
    }

    /// All entries
    pub fn entries(&self) -> &BTreeMap<HostId, f64> {
        &self.probs
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Change the weight of future meetings
    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha;
    }

    /// When the set last changed
    pub fn last_update(&self) -> SimTime {
        self.last_update
    }

    /// Record a meeting with `host`
    ///
    /// The first meeting ever gets probability 1. Afterwards the met host
    /// gains `alpha` and every entry is divided by `1 + alpha`, which keeps
    /// the sum at one. A full set then loses its smallest entry.
    pub fn update_meeting_prob_for(&mut self, host: HostId, now: SimTime) {
        self.last_update = now;
        if self.probs.is_empty() {
            self.probs.insert(host, 1.0);
            return;
        }

        let boosted = self.prob_for(host) + self.alpha;
        self.probs.insert(host, boosted);
        let norm = 1.0 + self.alpha;
        for p in self.probs.values_mut() {
            *p /= norm;
        }

        if let Some(max) = self.max_size
            && self.probs.len() > max
        {
            let smallest = self
                .probs
                .iter()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(h, _)| *h);
            if let Some(smallest) = smallest {
                self.probs.remove(&smallest);
            }
        }
    }
}

/// Merge another node's tables into ours
///
/// For every host except `me`, the more recently updated set wins. Magnitudes
/// are never compared.
pub fn merge_transitive(
    mut mine: ProbabilityTables,
    theirs: &ProbabilityTables,
    me: HostId,
) -> ProbabilityTables {
    for (host, their_set) in theirs {
        if *host == me {
            continue;
        }
        let newer = mine
            .get(host)
            .is_none_or(|my_set| their_set.last_update() > my_set.last_update());
        if newer {
            mine.insert(*host, their_set.clone());
        }
    }
    mine
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    fn host(n: u32) -> HostId {
        HostId(n)
    }

    #[test]
    fn test_first_meeting_is_certain() {
        let mut set = MeetingProbabilitySet::new(1.0, None);
        set.update_meeting_prob_for(host(1), 5.0);
        assert_eq!(set.prob_for(host(1)), 1.0);
        assert_eq!(set.last_update(), 5.0);
    }

    #[test]
    fn test_update_normalizes() {
        let mut set = MeetingProbabilitySet::new(1.0, None);
        set.update_meeting_prob_for(host(1), 0.0);
        set.update_meeting_prob_for(host(2), 1.0);
        // {1: 1.0, 2: 1.0} / 2
        assert!((set.prob_for(host(1)) - 0.5).abs() < EPS);
        assert!((set.prob_for(host(2)) - 0.5).abs() < EPS);

        set.update_meeting_prob_for(host(1), 2.0);
        assert!((set.prob_for(host(1)) - 0.75).abs() < EPS);
        assert!((set.prob_for(host(2)) - 0.25).abs() < EPS);
        let sum: f64 = set.entries().values().sum();
        assert!((sum - 1.0).abs() < EPS);
    }

    #[test]
    fn test_size_limit_evicts_smallest() {
        let mut set = MeetingProbabilitySet::new(1.0, Some(2));
        set.update_meeting_prob_for(host(1), 0.0);
        set.update_meeting_prob_for(host(2), 1.0);
        set.update_meeting_prob_for(host(1), 2.0);
        // {1: 0.375, 2: 0.125, 3: 0.5} before the limit applies
        set.update_meeting_prob_for(host(3), 3.0);
        assert_eq!(set.len(), 2);
        assert!(set.prob_for(host(3)) > 0.0);
        assert_eq!(set.prob_for(host(2)), 0.0);
    }

    #[test]
    fn test_merge_is_last_writer_wins() {
        let mut old = MeetingProbabilitySet::new(1.0, None);
        old.update_meeting_prob_for(host(7), 1.0);
        let mut newer = MeetingProbabilitySet::new(1.0, None);
        newer.update_meeting_prob_for(host(8), 2.0);
        newer.update_meeting_prob_for(host(7), 3.0);

        let mine: ProbabilityTables = [(host(5), newer.clone())].into_iter().collect();
        let theirs: ProbabilityTables = [
            (host(5), old.clone()),
            (host(6), old.clone()),
            (host(0), old.clone()),
        ]
        .into_iter()
        .collect();

        let merged = merge_transitive(mine, &theirs, host(0));
        assert_eq!(merged[&host(5)], newer);
        assert_eq!(merged[&host(6)], old);
        assert!(!merged.contains_key(&host(0)));
    }
}
