//! Per-cluster summaries of the nearest-pair cache.

use serde::{Deserialize, Serialize};

use crate::cache::NearestPair;

/// Aggregates over the members of one cluster.
///
/// Maintained values must always equal a fresh recomputation from the cache;
/// the evaluator's cluster elimination tests are only sound under that
/// condition. An empty cluster has every field at zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterStatistics {
    /// `M`: largest energy margin of any member.
    pub max_margin: f64,
    /// `M*`: sum of member margins, the energy increase if the center vanished.
    pub sum_margin: f64,
    /// `R1`: largest primary distance (cluster radius).
    pub r1: f64,
    /// `R2`: largest alternative distance.
    pub r2: f64,
    /// `m`: `M` divided by the member count.
    pub mean_max_margin: f64,
    /// `m*`: `M*` divided by the member count.
    pub mean_sum_margin: f64,
    /// Sum of member primary energies.
    pub energy: f64,
}

impl ClusterStatistics {
    pub fn set_to_zero(&mut self) {
        *self = Self::default();
    }

    /// Fold one member into the running maxima and sums.
    pub fn increment(&mut self, pair: &NearestPair) {
        let margin = pair.alternative.energy - pair.primary.energy;
        self.max_margin = self.max_margin.max(margin);
        self.sum_margin += margin;
        self.r1 = self.r1.max(pair.primary.distance);
        self.r2 = self.r2.max(pair.alternative.distance);
        self.energy += pair.primary.energy;
    }

    pub fn normalize(&mut self, ndata: usize) {
        self.mean_max_margin = 0.0;
        self.mean_sum_margin = 0.0;
        if ndata > 0 {
            self.mean_max_margin = self.max_margin / ndata as f64;
            self.mean_sum_margin = self.sum_margin / ndata as f64;
        }
    }

    /// Derive the statistics of a cluster from scratch.
    pub fn recompute<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = &'a NearestPair>,
    {
        let mut stats = Self::default();
        let mut ndata = 0usize;
        for pair in pairs {
            stats.increment(pair);
            ndata += 1;
        }
        stats.normalize(ndata);
        stats
    }
}
