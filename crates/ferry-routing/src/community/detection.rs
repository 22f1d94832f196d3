//! Distributed community detection
//!
//! A node learns its *familiar set* (neighbors it spent long enough with) and
//! its *local community* (hosts it considers part of its group, itself
//! included) from its own contacts and from what peers show it during a
//! contact.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;

use ferry_core::{HostId, SimTime};
use tracing::debug;

/// What a node shows its peer about its community
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommunitySnapshot {
    pub familiars: BTreeSet<HostId>,
    pub community: BTreeSet<HostId>,
    /// Familiar sets of community members, where known
    pub familiars_of_community: BTreeMap<HostId, BTreeSet<HostId>>,
}

/// Pluggable community detection
pub trait CommunityDetection: Debug + Send + Sync {
    /// A contact with `peer` came up; `theirs` is the peer's state before it
    fn contact_up(&mut self, me: HostId, peer: HostId, theirs: &CommunitySnapshot);

    /// A contact ended; `total_duration` covers every completed contact so far
    fn contact_down(&mut self, me: HostId, peer: HostId, total_duration: SimTime);

    fn familiars(&self) -> &BTreeSet<HostId>;

    /// Local community, containing this node once it had a contact
    fn community(&self) -> &BTreeSet<HostId>;

    fn snapshot(&self, me: HostId) -> CommunitySnapshot;

    /// Fresh detector with the same parameters
    fn replicate(&self) -> Box<dyn CommunityDetection>;

    fn is_member(&self, host: HostId) -> bool {
        self.community().contains(&host)
    }
}

/// Familiar and community sets shared by both detectors
#[derive(Debug, Clone, Default)]
struct Sets {
    familiars: BTreeSet<HostId>,
    community: BTreeSet<HostId>,
}

impl Sets {
    fn snapshot(&self, me: HostId) -> CommunitySnapshot {
        let mut community = self.community.clone();
        community.insert(me);
        CommunitySnapshot {
            familiars: self.familiars.clone(),
            community,
            familiars_of_community: BTreeMap::new(),
        }
    }

    /// Make `peer` familiar once enough contact time was accumulated
    fn promote_familiar(&mut self, peer: HostId, total_duration: SimTime, threshold: SimTime) -> bool {
        if self.familiars.contains(&peer) || total_duration <= threshold {
            return false;
        }
        self.familiars.insert(peer);
        self.community.insert(peer);
        true
    }
}

/// Hosts in `set` that are also members of `community`
fn overlap(set: &BTreeSet<HostId>, community: &BTreeSet<HostId>) -> usize {
    set.intersection(community).count()
}

/// Admission by the share of the peer's familiars that are in our community
#[derive(Debug, Clone)]
pub struct SimpleCommunity {
    lambda: f64,
    familiar_threshold: SimTime,
    sets: Sets,
}

impl SimpleCommunity {
    pub fn new(lambda: f64, familiar_threshold: SimTime) -> Self {
        Self {
            lambda,
            familiar_threshold,
            sets: Sets::default(),
        }
    }
}

impl CommunityDetection for SimpleCommunity {
    fn contact_up(&mut self, me: HostId, peer: HostId, theirs: &CommunitySnapshot) {
        self.sets.community.insert(me);
        if self.sets.community.contains(&peer) || theirs.familiars.is_empty() {
            return;
        }
        let share = overlap(&theirs.familiars, &self.sets.community) as f64
            / theirs.familiars.len() as f64;
        if share > self.lambda {
            self.sets.community.insert(peer);
            debug!(host = %me, peer = %peer, share, "Peer joined local community");
        }
    }

    fn contact_down(&mut self, me: HostId, peer: HostId, total_duration: SimTime) {
        self.sets.community.insert(me);
        if self
            .sets
            .promote_familiar(peer, total_duration, self.familiar_threshold)
        {
            debug!(host = %me, peer = %peer, total_duration, "Peer became familiar");
        }
    }

    fn familiars(&self) -> &BTreeSet<HostId> {
        &self.sets.familiars
    }

    fn community(&self) -> &BTreeSet<HostId> {
        &self.sets.community
    }

    fn snapshot(&self, me: HostId) -> CommunitySnapshot {
        self.sets.snapshot(me)
    }

    fn replicate(&self) -> Box<dyn CommunityDetection> {
        Box::new(Self::new(self.lambda, self.familiar_threshold))
    }
}

/// Admission by k-clique percolation over familiar sets
#[derive(Debug, Clone)]
pub struct KCliqueCommunity {
    k: usize,
    familiar_threshold: SimTime,
    sets: Sets,
    familiars_of_community: BTreeMap<HostId, BTreeSet<HostId>>,
    /// Familiar sets peers showed at their last contact
    seen_familiars: HashMap<HostId, BTreeSet<HostId>>,
}

impl KCliqueCommunity {
    pub fn new(k: usize, familiar_threshold: SimTime) -> Self {
        Self {
            k,
            familiar_threshold,
            sets: Sets::default(),
            familiars_of_community: BTreeMap::new(),
            seen_familiars: HashMap::new(),
        }
    }

    fn qualifies(&self, familiars: &BTreeSet<HostId>) -> bool {
        overlap(familiars, &self.sets.community) >= self.k.saturating_sub(1)
    }

    fn admit(&mut self, host: HostId, familiars: BTreeSet<HostId>) {
        self.sets.community.insert(host);
        self.familiars_of_community.insert(host, familiars);
    }
}

impl CommunityDetection for KCliqueCommunity {
    fn contact_up(&mut self, me: HostId, peer: HostId, theirs: &CommunitySnapshot) {
        self.sets.community.insert(me);
        self.seen_familiars.insert(peer, theirs.familiars.clone());

        if self.sets.community.contains(&peer) {
            self.familiars_of_community
                .insert(peer, theirs.familiars.clone());
        } else if self.qualifies(&theirs.familiars) {
            self.admit(peer, theirs.familiars.clone());
            debug!(host = %me, peer = %peer, "Peer joined local community");
        }

        if !self.sets.community.contains(&peer) {
            return;
        }
        for (member, familiars) in &theirs.familiars_of_community {
            if *member == me
                || self.sets.community.contains(member)
                || !theirs.community.contains(member)
            {
                continue;
            }
            if self.qualifies(familiars) {
                self.admit(*member, familiars.clone());
                debug!(host = %me, via = %peer, member = %member, "Merged community member");
            }
        }
    }

    fn contact_down(&mut self, me: HostId, peer: HostId, total_duration: SimTime) {
        self.sets.community.insert(me);
        if self
            .sets
            .promote_familiar(peer, total_duration, self.familiar_threshold)
        {
            let familiars = self.seen_familiars.get(&peer).cloned().unwrap_or_default();
            self.familiars_of_community.insert(peer, familiars);
            debug!(host = %me, peer = %peer, total_duration, "Peer became familiar");
        }
    }

    fn familiars(&self) -> &BTreeSet<HostId> {
        &self.sets.familiars
    }

    fn community(&self) -> &BTreeSet<HostId> {
        &self.sets.community
    }

    fn snapshot(&self, me: HostId) -> CommunitySnapshot {
        let mut snapshot = self.sets.snapshot(me);
        snapshot.familiars_of_community = self.familiars_of_community.clone();
        snapshot.familiars_of_community.insert(me, self.sets.familiars.clone());
        snapshot
    }

    fn replicate(&self) -> Box<dyn CommunityDetection> {
        Box::new(Self::new(self.k, self.familiar_threshold))
    }
}
