//! Per-item nearest-pair cache and the cluster arena that owns it.
//!
//! Every non-center item lives in exactly one cluster and carries two records:
//! its *primary* (own center) and its *alternative* (nearest other center).
//! Clusters are growable sequences addressed by position; removal is always a
//! tail swap so it never shifts the remaining members.

use crate::stats::ClusterStatistics;

/// `(center index, distance, energy)` record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestInfo {
    pub index: usize,
    pub distance: f64,
    pub energy: f64,
}

impl NearestInfo {
    pub fn new(index: usize, distance: f64, energy: f64) -> Self {
        Self {
            index,
            distance,
            energy,
        }
    }
}

/// Primary and alternative records of one item plus their energy margin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPair {
    pub primary: NearestInfo,
    pub alternative: NearestInfo,
    margin: f64,
}

impl NearestPair {
    pub fn new(primary: NearestInfo, alternative: NearestInfo) -> Self {
        Self {
            primary,
            alternative,
            margin: alternative.energy - primary.energy,
        }
    }

    /// `energy(alternative) - energy(primary)`.
    #[inline]
    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// Overwrite the primary record. Returns whether anything changed.
    pub fn reset_primary(&mut self, info: NearestInfo) -> bool {
        let changed = self.primary != info;
        self.primary = info;
        self.margin = self.alternative.energy - self.primary.energy;
        changed
    }

    /// Overwrite the alternative record. Returns whether its index or
    /// distance changed.
    pub fn reset_alternative(&mut self, info: NearestInfo) -> bool {
        let changed =
            self.alternative.index != info.index || self.alternative.distance != info.distance;
        self.alternative = info;
        self.margin = self.alternative.energy - self.primary.energy;
        changed
    }

    /// Overwrite both records.
    pub fn reset(&mut self, primary: NearestInfo, alternative: NearestInfo) -> bool {
        let a = self.reset_primary(primary);
        let b = self.reset_alternative(alternative);
        a || b
    }
}

/// A non-center item of a cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Member {
    /// Index of the item in the dataset.
    pub item: usize,
    pub pair: NearestPair,
}

/// Read access the evaluator needs from the cluster datastore.
pub trait ClusterView: Sync {
    fn num_clusters(&self) -> usize;

    /// Members of cluster `k`, excluding its center.
    fn ndata(&self, k: usize) -> usize;

    /// Dataset index of the center of cluster `k`.
    fn center(&self, k: usize) -> usize;

    /// Dataset index of member `j` of cluster `k`.
    fn item(&self, k: usize, j: usize) -> usize;

    fn primary(&self, k: usize, j: usize) -> &NearestInfo;

    fn alternative(&self, k: usize, j: usize) -> &NearestInfo;

    fn energy_margin(&self, k: usize, j: usize) -> f64;

    fn statistics(&self, k: usize) -> &ClusterStatistics;

    /// Non-center items across all clusters.
    fn total_members(&self) -> usize {
        (0..self.num_clusters()).map(|k| self.ndata(k)).sum()
    }
}

/// Arena of clusters: centers, member sequences, statistics and staleness flags.
///
/// Fields are split so update routines can borrow member slices mutably while
/// reading centers.
#[derive(Debug, Clone)]
pub struct ClusterStore {
    pub(crate) centers: Vec<usize>,
    pub(crate) members: Vec<Vec<Member>>,
    pub(crate) stats: Vec<ClusterStatistics>,
    pub(crate) stale: Vec<bool>,
}

impl ClusterStore {
    /// Empty clusters around the given centers.
    pub fn new(centers: Vec<usize>) -> Self {
        let k = centers.len();
        Self {
            centers,
            members: vec![Vec::new(); k],
            stats: vec![ClusterStatistics::default(); k],
            stale: vec![true; k],
        }
    }

    pub fn centers(&self) -> &[usize] {
        &self.centers
    }

    pub fn members(&self, k: usize) -> &[Member] {
        &self.members[k]
    }

    /// Append a member to cluster `k`.
    pub fn append(&mut self, k: usize, member: Member) {
        self.members[k].push(member);
        self.stale[k] = true;
    }

    /// Remove member `j` of cluster `k`; the last member takes its slot.
    pub fn swap_remove(&mut self, k: usize, j: usize) -> Member {
        self.stale[k] = true;
        self.members[k].swap_remove(j)
    }

    /// Replace the center of cluster `k`, returning the previous one.
    pub fn set_center(&mut self, k: usize, item: usize) -> usize {
        std::mem::replace(&mut self.centers[k], item)
    }

    pub fn reset_primary(&mut self, k: usize, j: usize, info: NearestInfo) {
        if self.members[k][j].pair.reset_primary(info) {
            self.stale[k] = true;
        }
    }

    pub fn reset_alternative(&mut self, k: usize, j: usize, info: NearestInfo) {
        if self.members[k][j].pair.reset_alternative(info) {
            self.stale[k] = true;
        }
    }

    pub fn mark_stale(&mut self, k: usize) {
        self.stale[k] = true;
    }

    pub fn is_stale(&self, k: usize) -> bool {
        self.stale[k]
    }

    /// Recompute statistics of every stale cluster; returns how many were refreshed.
    pub fn refresh_statistics(&mut self) -> usize {
        let mut refreshed = 0;
        for k in 0..self.centers.len() {
            if self.stale[k] {
                let stats = &mut self.stats[k];
                stats.set_to_zero();
                for member in &self.members[k] {
                    stats.increment(&member.pair);
                }
                stats.normalize(self.members[k].len());
                self.stale[k] = false;
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Sum of member primary energies over all clusters.
    pub fn total_energy(&self) -> f64 {
        self.stats.iter().map(|s| s.energy).sum()
    }

    /// Cluster label of every item in `0..n_items`; centers carry their own cluster.
    pub fn labels(&self, n_items: usize) -> Vec<usize> {
        let mut labels = vec![usize::MAX; n_items];
        for (k, &center) in self.centers.iter().enumerate() {
            labels[center] = k;
            for member in &self.members[k] {
                labels[member.item] = k;
            }
        }
        labels
    }
}

impl ClusterView for ClusterStore {
    #[inline]
    fn num_clusters(&self) -> usize {
        self.centers.len()
    }

    #[inline]
    fn ndata(&self, k: usize) -> usize {
        self.members[k].len()
    }

    #[inline]
    fn center(&self, k: usize) -> usize {
        self.centers[k]
    }

    #[inline]
    fn item(&self, k: usize, j: usize) -> usize {
        self.members[k][j].item
    }

    #[inline]
    fn primary(&self, k: usize, j: usize) -> &NearestInfo {
        &self.members[k][j].pair.primary
    }

    #[inline]
    fn alternative(&self, k: usize, j: usize) -> &NearestInfo {
        &self.members[k][j].pair.alternative
    }

    #[inline]
    fn energy_margin(&self, k: usize, j: usize) -> f64 {
        self.members[k][j].pair.margin()
    }

    #[inline]
    fn statistics(&self, k: usize) -> &ClusterStatistics {
        &self.stats[k]
    }
}
