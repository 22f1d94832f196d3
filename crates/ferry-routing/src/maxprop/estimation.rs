//! Estimation of the MaxProp update weight
//!
//! Instead of a fixed `alpha`, a node can derive it from what it observes:
//! the mean inter-encounter time with the same peer (IET) and the mean number
//! of other encounters between two meetings of the same peer (ENC). Alpha is
//! chosen so that the weight of one encounter decays to
//! [`ESTIMATION_TARGET_WEIGHT`] after `time_scale` seconds.

use std::collections::HashMap;

use ferry_core::{HostId, SimTime};

/// Weight an encounter should have left after `time_scale` seconds
pub const ESTIMATION_TARGET_WEIGHT: f64 = 0.01;

/// Running encounter statistics of one node
#[derive(Debug, Clone)]
pub struct EncounterEstimator {
    time_scale: f64,
    last_meeting: HashMap<HostId, SimTime>,
    /// Encounters with anyone since the last meeting of each peer
    encounters_since: HashMap<HostId, u64>,
    iet_sum: f64,
    iet_samples: u64,
    enc_sum: u64,
    enc_samples: u64,
}

impl EncounterEstimator {
    /// Create an estimator for the given time scale in seconds
    pub fn new(time_scale: f64) -> Self {
        Self {
            time_scale,
            last_meeting: HashMap::new(),
            encounters_since: HashMap::new(),
            iet_sum: 0.0,
            iet_samples: 0,
            enc_sum: 0,
            enc_samples: 0,
        }
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Record an encounter with `peer`
    pub fn record_encounter(&mut self, peer: HostId, now: SimTime) {
        if let Some(last) = self.last_meeting.insert(peer, now) {
            self.iet_sum += now - last;
            self.iet_samples += 1;
        }

        for (other, count) in self.encounters_since.iter_mut() {
            if *other != peer {
                *count += 1;
            }
        }
        if let Some(between) = self.encounters_since.insert(peer, 0) {
            self.enc_sum += between;
            self.enc_samples += 1;
        }
    }

    /// Mean inter-encounter time, 0 without samples
    pub fn mean_iet(&self) -> f64 {
        if self.iet_samples == 0 {
            0.0
        } else {
            self.iet_sum / self.iet_samples as f64
        }
    }

    /// Mean encounters between two meetings of the same peer, 0 without samples
    pub fn mean_enc(&self) -> f64 {
        if self.enc_samples == 0 {
            0.0
        } else {
            self.enc_sum as f64 / self.enc_samples as f64
        }
    }

    /// Alpha that makes an encounter decay to the target weight in time
    ///
    /// `None` while the statistics cannot support an estimate.
    pub fn estimate_alpha(&self) -> Option<f64> {
        let iet = self.mean_iet();
        let enc = self.mean_enc();
        if iet <= 0.0 || enc <= 0.0 || iet > self.time_scale {
            return None;
        }
        let ntarg = (self.time_scale / iet).ceil();
        let zeta = ESTIMATION_TARGET_WEIGHT.powf(1.0 / (ntarg * enc));
        Some(1.0 / zeta - 1.0)
    }
}
