//! Per-neighbor contact history

use std::collections::{BTreeMap, HashMap};

use ferry_core::{HostId, SimTime};

/// One completed contact
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactRecord {
    pub start: SimTime,
    pub end: SimTime,
}

impl ContactRecord {
    pub fn duration(&self) -> SimTime {
        self.end - self.start
    }
}

/// Completed contacts by neighbor, plus the contacts still open
#[derive(Debug, Clone, Default)]
pub struct ContactHistory {
    records: BTreeMap<HostId, Vec<ContactRecord>>,
    open: HashMap<HostId, SimTime>,
}

impl ContactHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A contact with `peer` started
    pub fn contact_started(&mut self, peer: HostId, now: SimTime) {
        self.open.insert(peer, now);
    }

    /// A contact with `peer` ended
    ///
    /// Recorded once, and only when it lasted a positive time.
    pub fn contact_ended(&mut self, peer: HostId, now: SimTime) {
        let Some(start) = self.open.remove(&peer) else {
            return;
        };
        if now > start {
            self.records
                .entry(peer)
                .or_default()
                .push(ContactRecord { start, end: now });
        }
    }

    /// Total time spent in completed contacts with `peer`
    pub fn cumulative_duration(&self, peer: HostId) -> SimTime {
        self.records
            .get(&peer)
            .map_or(0.0, |r| r.iter().map(ContactRecord::duration).sum())
    }

    /// Completed contacts with every neighbor
    pub fn iter(&self) -> impl Iterator<Item = (HostId, &ContactRecord)> + '_ {
        self.records
            .iter()
            .flat_map(|(peer, records)| records.iter().map(move |r| (*peer, r)))
    }

    /// Completed contacts with `peer`
    pub fn records(&self, peer: HostId) -> &[ContactRecord] {
        self.records.get(&peer).map_or(&[], Vec::as_slice)
    }
}
