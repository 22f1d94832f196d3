//! Centrality measures
//!
//! Every measure is a pure function of the contact history evaluated at a
//! point in time. [`super::BubbleRap`] evaluates them at the last multiple of
//! its compute interval, so a value stays fixed between recomputations and
//! does not depend on when a host happens to ask.

use std::collections::{BTreeSet, HashSet};
use std::fmt::Debug;

use ferry_core::{HostId, SimTime};

use super::history::ContactHistory;

/// How important a node is to the hosts around it
pub trait Centrality: Debug + Send + Sync {
    /// Centrality over every neighbor, counting contacts ended by `at`
    fn global(&self, history: &ContactHistory, at: SimTime) -> f64 {
        self.measure(history, None, at)
    }

    /// Centrality over the members of `community` only
    fn local(&self, history: &ContactHistory, community: &BTreeSet<HostId>, at: SimTime) -> f64 {
        self.measure(history, Some(community), at)
    }

    /// Centrality counting only neighbors in `within`, if given
    fn measure(
        &self,
        history: &ContactHistory,
        within: Option<&BTreeSet<HostId>>,
        at: SimTime,
    ) -> f64;
}

fn counted(within: Option<&BTreeSet<HostId>>, peer: HostId) -> bool {
    within.is_none_or(|c| c.contains(&peer))
}

/// Distinct neighbors met in the last window
#[derive(Debug, Clone, PartialEq)]
pub struct SWindowCentrality {
    pub time_window: f64,
}

impl Centrality for SWindowCentrality {
    fn measure(
        &self,
        history: &ContactHistory,
        within: Option<&BTreeSet<HostId>>,
        at: SimTime,
    ) -> f64 {
        let since = at - self.time_window;
        history
            .iter()
            .filter(|(peer, r)| r.end > since && r.end <= at && counted(within, *peer))
            .map(|(peer, _)| peer)
            .collect::<HashSet<_>>()
            .len() as f64
    }
}

/// Average distinct neighbors per window over past epochs
///
/// Epoch `i` covers contacts ending in `[i * time_window, (i + 1) * time_window)`,
/// counted from time zero. Only completed epochs count: the one `at` falls in
/// is ignored, and at most the last `epoch_count` completed ones are averaged.
#[derive(Debug, Clone, PartialEq)]
pub struct CWindowCentrality {
    pub time_window: f64,
    /// Most epochs averaged
    pub epoch_count: u32,
}

impl Centrality for CWindowCentrality {
    fn measure(
        &self,
        history: &ContactHistory,
        within: Option<&BTreeSet<HostId>>,
        at: SimTime,
    ) -> f64 {
        if self.time_window <= 0.0 {
            return 0.0;
        }
        let current = (at / self.time_window).floor().max(0.0) as u64;
        let epochs = current.min(u64::from(self.epoch_count));
        if epochs == 0 {
            return 0.0;
        }
        let first = current - epochs;

        let mut met: HashSet<(HostId, u64)> = HashSet::new();
        for (peer, record) in history.iter() {
            if record.end > at || record.end < 0.0 || !counted(within, peer) {
                continue;
            }
            let epoch = (record.end / self.time_window).floor() as u64;
            if (first..current).contains(&epoch) {
                met.insert((peer, epoch));
            }
        }
        met.len() as f64 / epochs as f64
    }
}

/// Distinct neighbors ever met
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DegreeCentrality;

impl Centrality for DegreeCentrality {
    fn measure(
        &self,
        history: &ContactHistory,
        within: Option<&BTreeSet<HostId>>,
        at: SimTime,
    ) -> f64 {
        history
            .iter()
            .filter(|(peer, r)| r.end <= at && counted(within, *peer))
            .map(|(peer, _)| peer)
            .collect::<HashSet<_>>()
            .len() as f64
    }
}
