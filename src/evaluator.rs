//! Tiered evaluation of the energy change caused by a proposal.
//!
//! For a proposal `(k1, k2, j2)` the change splits into three parts:
//!
//! * the old center of `k1` becomes an ordinary item, assigned to the nearer of
//!   its nearest other center and the candidate;
//! * every member of `k1` loses its center and moves to the nearer of its
//!   alternative and the candidate;
//! * every member of every other cluster moves to the candidate if it is
//!   strictly closer than its current center.
//!
//! Levels 0 to 2 compute that sum exactly with increasing pruning. Level 3
//! samples growing prefixes of the surviving clusters and may reject early; its
//! last round covers every survivor, so any value it returns is exact.

use rand::Rng;
use std::ops::Range;
use std::thread;

use crate::cache::ClusterView;
use crate::centers::CenterGeometry;
use crate::config::{L3Settings, L3Variant, Level};
use crate::metric::{Metric, Oracle};
use crate::parallel::chunk_range;
use crate::sampler::Proposal;

/// Outcome of a proposal evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delta {
    /// Energy change if the proposal were committed.
    Value(f64),
    /// Rejected before the change was fully computed.
    NonImproving,
}

impl Delta {
    /// Whether committing strictly lowers the energy.
    pub fn is_improving(&self) -> bool {
        matches!(self, Delta::Value(v) if *v < 0.0)
    }

    /// Energy change, `+inf` for an early rejection.
    pub fn value(&self) -> f64 {
        match self {
            Delta::Value(v) => *v,
            Delta::NonImproving => f64::INFINITY,
        }
    }
}

/// Read-only view of the optimiser state needed to score proposals.
///
/// Evaluation never mutates the caches, so several evaluators may run
/// concurrently between two acceptance phases.
pub(crate) struct Evaluator<'a, S: ClusterView, M: Metric> {
    pub(crate) store: &'a S,
    pub(crate) geometry: &'a CenterGeometry,
    pub(crate) oracle: Oracle<'a, M>,
    pub(crate) l3_variant: L3Variant,
    pub(crate) l3: &'a L3Settings,
    pub(crate) threads: usize,
}

impl<S: ClusterView, M: Metric> Evaluator<'_, S, M> {
    /// Evaluate at `level`. With `serial` every scan stays on the calling thread.
    pub(crate) fn evaluate(&self, level: Level, proposal: &Proposal, serial: bool) -> Delta {
        match level {
            Level::L0 => Delta::Value(self.delta_l0(proposal)),
            Level::L1 => Delta::Value(self.delta_l1(proposal, serial)),
            Level::L2 => Delta::Value(self.delta_l2(proposal, serial)),
            Level::L3 => self.delta_l3(proposal),
        }
    }

    fn candidate(&self, proposal: &Proposal) -> usize {
        self.store.item(proposal.k2, proposal.j2)
    }

    /// Distance from the center of `k1` to its nearest other center.
    fn nearest_to_center(&self, k1: usize) -> f64 {
        match self.geometry.nearest_other(k1) {
            Some(info) => info.distance,
            None => {
                let center = self.store.center(k1);
                (0..self.store.num_clusters())
                    .filter(|&k| k != k1)
                    .map(|k| self.oracle.distance(self.store.center(k), center))
                    .fold(f64::INFINITY, f64::min)
            }
        }
    }

    /// Sum `scan(k, range)` over contiguous slices of each listed cluster,
    /// one slice per worker thread.
    fn scan_clusters<F>(&self, clusters: &[usize], serial: bool, scan: F) -> f64
    where
        F: Fn(usize, Range<usize>) -> f64 + Sync,
    {
        let nthreads = if serial { 1 } else { self.threads.max(1) };
        if nthreads == 1 {
            return clusters
                .iter()
                .map(|&k| scan(k, 0..self.store.ndata(k)))
                .sum();
        }
        let scan = &scan;
        thread::scope(|scope| {
            let handles: Vec<_> = (0..nthreads)
                .map(|ti| {
                    scope.spawn(move || {
                        clusters
                            .iter()
                            .map(|&k| scan(k, chunk_range(ti, nthreads, self.store.ndata(k))))
                            .sum::<f64>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .sum()
        })
    }

    /// Change for members `range` of `k1` when its center is replaced by
    /// `candidate`, with no pruning.
    fn k1_member_delta(&self, k1: usize, range: Range<usize>, candidate: usize) -> f64 {
        let mut delta = 0.0;
        for j in range {
            let d2 = self.store.alternative(k1, j).distance;
            let d = self.oracle.distance(self.store.item(k1, j), candidate);
            if d < d2 {
                delta += self.oracle.energy(d) - self.store.primary(k1, j).energy;
            } else {
                delta += self.store.energy_margin(k1, j);
            }
        }
        delta
    }

    /// Change for members `range` of `k1`, skipping the distance whenever
    /// `d1 + d2 <= dist(center k1, candidate)` proves the alternative wins.
    fn k1_member_delta_pruned(
        &self,
        k1: usize,
        range: Range<usize>,
        candidate: usize,
        dist_k1_candidate: f64,
    ) -> f64 {
        let mut delta = 0.0;
        for j in range {
            let primary = self.store.primary(k1, j);
            let d2 = self.store.alternative(k1, j).distance;
            if primary.distance + d2 <= dist_k1_candidate {
                delta += self.store.energy_margin(k1, j);
            } else {
                let d = self
                    .oracle
                    .distance_bounded(self.store.item(k1, j), candidate, d2);
                if d < d2 {
                    delta += self.oracle.energy(d) - primary.energy;
                } else {
                    delta += self.store.energy_margin(k1, j);
                }
            }
        }
        delta
    }

    /// Change for members `range` of a cluster other than `k1`: an item moves
    /// only if the candidate beats its own center, impossible when
    /// `dist(center k, candidate) >= 2 d1`.
    fn other_member_delta(
        &self,
        k: usize,
        range: Range<usize>,
        candidate: usize,
        dist_k_candidate: f64,
    ) -> f64 {
        let mut delta = 0.0;
        for j in range {
            let primary = self.store.primary(k, j);
            if 0.5 * dist_k_candidate < primary.distance {
                let d = self
                    .oracle
                    .distance_bounded(candidate, self.store.item(k, j), primary.distance);
                if d < primary.distance {
                    delta += self.oracle.energy(d) - primary.energy;
                }
            }
        }
        delta
    }

    /// Level 0: every item is compared with the candidate.
    pub(crate) fn delta_l0(&self, proposal: &Proposal) -> f64 {
        let Proposal { k1, .. } = *proposal;
        let candidate = self.candidate(proposal);
        let n_clusters = self.store.num_clusters();

        let mut delta = self.k1_member_delta(k1, 0..self.store.ndata(k1), candidate);

        let old_center = self.store.center(k1);
        let mut post = self.oracle.distance(old_center, candidate);
        for k in (0..n_clusters).filter(|&k| k != k1) {
            post = post.min(self.oracle.distance(self.store.center(k), old_center));
        }
        delta += self.oracle.energy(post);

        for k in (0..n_clusters).filter(|&k| k != k1) {
            for j in 0..self.store.ndata(k) {
                let primary = self.store.primary(k, j);
                let d = self.oracle.distance(self.store.item(k, j), candidate);
                if d < primary.distance {
                    delta += self.oracle.energy(d) - primary.energy;
                }
            }
        }
        delta
    }

    /// Level 1: candidate-to-center distances prune whole clusters and items.
    pub(crate) fn delta_l1(&self, proposal: &Proposal, serial: bool) -> f64 {
        let Proposal { k1, .. } = *proposal;
        let candidate = self.candidate(proposal);
        let dists: Vec<f64> = (0..self.store.num_clusters())
            .map(|k| self.oracle.distance(self.store.center(k), candidate))
            .collect();

        let mut delta = self.oracle.energy(self.nearest_to_center(k1).min(dists[k1]));
        delta += self.k1_delta(k1, candidate, dists[k1], serial);

        let survivors: Vec<usize> = (0..self.store.num_clusters())
            .filter(|&k| k != k1 && 0.5 * dists[k] < self.store.statistics(k).r1)
            .collect();
        delta += self.scan_clusters(&survivors, serial, |k, range| {
            self.other_member_delta(k, range, candidate, dists[k])
        });
        delta
    }

    /// Level 2: as level 1, but clusters are first eliminated through the
    /// center-center matrix so most candidate-to-center distances are skipped.
    pub(crate) fn delta_l2(&self, proposal: &Proposal, serial: bool) -> f64 {
        let Proposal { k1, .. } = *proposal;
        let candidate = self.candidate(proposal);
        let dist_k1 = self.oracle.distance(self.store.center(k1), candidate);

        let mut delta = self.oracle.energy(self.nearest_to_center(k1).min(dist_k1));
        delta += self.k1_delta(k1, candidate, dist_k1, serial);

        let (survivors, dists) = self.matrix_survivors(proposal, candidate);
        delta += self.scan_clusters(&survivors, serial, |k, range| {
            self.other_member_delta(k, range, candidate, dists[k])
        });
        delta
    }

    /// Members of `k1`, or `M*` of `k1` when `R1 + R2` bounds every member.
    fn k1_delta(&self, k1: usize, candidate: usize, dist_k1: f64, serial: bool) -> f64 {
        let stats = self.store.statistics(k1);
        if stats.r1 + stats.r2 <= dist_k1 {
            return stats.sum_margin;
        }
        self.scan_clusters(&[k1], serial, |k, range| {
            self.k1_member_delta_pruned(k, range, candidate, dist_k1)
        })
    }

    /// Clusters other than `k1` whose members might move to the candidate,
    /// with the candidate-to-center distance of each (zero when never computed).
    fn matrix_survivors(&self, proposal: &Proposal, candidate: usize) -> (Vec<usize>, Vec<f64>) {
        let Proposal { k1, k2, j2, .. } = *proposal;
        let n_clusters = self.store.num_clusters();
        let d_candidate_own = self.store.primary(k2, j2).distance;
        let mut dists = vec![0.0; n_clusters];
        let mut survivors = Vec::new();
        for k in (0..n_clusters).filter(|&k| k != k1) {
            let r1 = self.store.statistics(k).r1;
            if self.center_distance(k2, k) - d_candidate_own < 2.0 * r1 {
                dists[k] = self.oracle.distance(self.store.center(k), candidate);
                if 0.5 * dists[k] < r1 {
                    survivors.push(k);
                }
            }
        }
        (survivors, dists)
    }

    fn center_distance(&self, a: usize, b: usize) -> f64 {
        match self.geometry.matrix() {
            Some(matrix) => matrix.get(a, b),
            // Without a matrix no cluster can be ruled out by this test.
            None => 0.0,
        }
    }

    /// Level 3: elimination as in level 2, then rounds over doubling samples.
    pub(crate) fn delta_l3(&self, proposal: &Proposal) -> Delta {
        let Proposal { k1, .. } = *proposal;
        let candidate = self.candidate(proposal);
        let n_total = self.store.total_members();
        let n_per_cluster = n_total as f64 / self.store.num_clusters() as f64;
        let n_rounds = match self.l3_variant {
            L3Variant::Heuristic => self.l3.heuristic_rounds(n_per_cluster),
            L3Variant::Hoeffding => self.l3.hoeffding_rounds(n_per_cluster),
        }
        .max(1);

        let (survivors, dists) = self.matrix_survivors(proposal, candidate);
        let mut pending: Vec<SampledCluster> = survivors
            .into_iter()
            .filter(|&k| self.store.ndata(k) > 0)
            .map(|k| SampledCluster::new(k, dists[k], false, self.store.ndata(k)))
            .collect();

        let dist_k1 = self.oracle.distance(self.store.center(k1), candidate);
        let mut known = self.oracle.energy(self.nearest_to_center(k1).min(dist_k1));
        let k1_stats = self.store.statistics(k1);
        if k1_stats.r1 + k1_stats.r2 <= dist_k1 {
            known += k1_stats.sum_margin;
        } else if self.store.ndata(k1) > 0 {
            pending.push(SampledCluster::new(k1, dist_k1, true, self.store.ndata(k1)));
        }

        let mut rng = proposal.phase_rng();
        for cluster in pending.iter_mut() {
            cluster.phase = rng.gen_range(0..cluster.ndata);
        }

        let weights = self.sample_weights(&pending, n_total);
        let p_round_reject = if n_rounds > 1 {
            1.0 - self.l3.p_null_accept.powf(1.0 / (n_rounds - 1) as f64)
        } else {
            1.0
        };

        let mut delta_hat = known;
        for round in 0..n_rounds {
            let last = round + 1 == n_rounds;
            let budget = pending_total(&pending) as f64
                * 2f64.powi(round as i32 + 1 - n_rounds as i32);
            delta_hat = known;
            for (cluster, &weight) in pending.iter_mut().zip(&weights) {
                cluster.active_old = cluster.active;
                cluster.active = if last {
                    cluster.ndata
                } else {
                    cluster
                        .ndata
                        .min(1 + (budget * weight).ceil() as usize)
                        .max(cluster.active_old)
                };
                if cluster.active_old < cluster.ndata {
                    for range in cluster.new_segments() {
                        self.sample_segment(cluster, range, candidate);
                    }
                }
                delta_hat += cluster.sum * cluster.ndata as f64 / cluster.active as f64;
            }

            let reject = match self.l3_variant {
                L3Variant::Heuristic => delta_hat >= 0.0,
                L3Variant::Hoeffding => {
                    let spread: f64 = pending
                        .iter()
                        .filter(|c| c.active != c.ndata)
                        .map(|c| {
                            let p_margin = c.ndata as f64
                                * self.store.statistics(c.k).max_margin
                                / n_total as f64;
                            let active = c.active as f64;
                            p_margin * p_margin * c.non_zero as f64 / (active * active)
                        })
                        .sum();
                    let threshold = 2.0 * ((2.0 / p_round_reject).ln() * spread).sqrt();
                    delta_hat / n_total as f64 > threshold
                }
            };
            if reject {
                tracing::trace!(round, delta_hat, "level-3 early rejection");
                return Delta::NonImproving;
            }
        }
        Delta::Value(delta_hat)
    }

    /// Share of each round's budget given to each pending cluster: by size for
    /// the heuristic variant, by size times maximum margin for Hoeffding.
    fn sample_weights(&self, pending: &[SampledCluster], n_total: usize) -> Vec<f64> {
        match self.l3_variant {
            L3Variant::Heuristic => pending
                .iter()
                .map(|c| c.ndata as f64 / n_total as f64)
                .collect(),
            L3Variant::Hoeffding => {
                let masses: Vec<f64> = pending
                    .iter()
                    .map(|c| c.ndata as f64 * self.store.statistics(c.k).max_margin)
                    .collect();
                let z: f64 = masses.iter().sum();
                if z > 0.0 {
                    masses.iter().map(|m| m / z).collect()
                } else {
                    let total = pending_total(pending) as f64;
                    pending.iter().map(|c| c.ndata as f64 / total).collect()
                }
            }
        }
    }

    fn sample_segment(&self, cluster: &mut SampledCluster, range: Range<usize>, candidate: usize) {
        let k = cluster.k;
        if cluster.is_k1 {
            cluster.non_zero += range.len();
            cluster.sum += self.k1_member_delta_pruned(k, range, candidate, cluster.dist);
        } else {
            for j in range {
                let part = self.other_member_delta(k, j..j + 1, candidate, cluster.dist);
                if part != 0.0 {
                    cluster.non_zero += 1;
                }
                cluster.sum += part;
            }
        }
    }
}

/// Sampling state of one non-eliminated cluster at level 3.
#[derive(Debug, Clone)]
struct SampledCluster {
    k: usize,
    /// Distance from the cluster's center to the candidate.
    dist: f64,
    is_k1: bool,
    ndata: usize,
    /// Random start; samples are the contiguous (wrapping) run after it.
    phase: usize,
    active: usize,
    active_old: usize,
    non_zero: usize,
    sum: f64,
}

impl SampledCluster {
    fn new(k: usize, dist: f64, is_k1: bool, ndata: usize) -> Self {
        Self {
            k,
            dist,
            is_k1,
            ndata,
            phase: 0,
            active: 0,
            active_old: 0,
            non_zero: 0,
            sum: 0.0,
        }
    }

    /// Member ranges added between `active_old` and `active`.
    fn new_segments(&self) -> Vec<Range<usize>> {
        if self.active_old == 0 && self.active == self.ndata {
            return vec![0..self.ndata];
        }
        let start = (self.phase + self.active_old) % self.ndata;
        let end = (self.phase + self.active) % self.ndata;
        if start > end || (start == end && self.active > self.active_old) {
            vec![start..self.ndata, 0..end]
        } else {
            vec![start..end]
        }
    }
}

fn pending_total(pending: &[SampledCluster]) -> usize {
    pending.iter().map(|c| c.ndata).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ClusterStore;
    use crate::config::ClaransConfig;
    use crate::data::generate_clustered_points;
    use crate::energy::Energy;
    use crate::metric::{DenseMetric, Norm};
    use crate::optimizer::Clarans;
    use crate::sampler::ProposalSampler;
    use ndarray::{Array2, array};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn line(points: &[f64]) -> DenseMetric {
        let data = Array2::from_shape_vec((points.len(), 1), points.to_vec()).unwrap();
        DenseMetric::new(data, Norm::L2)
    }

    fn two_clusters(level: Level) -> Clarans<DenseMetric> {
        let metric = line(&[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
        let config = ClaransConfig {
            k: 2,
            level,
            ..ClaransConfig::default()
        };
        let mut clarans = Clarans::new(metric, config).unwrap();
        clarans.initialize(&[0, 3]).unwrap();
        clarans
    }

    fn position(store: &ClusterStore, k: usize, item: usize) -> usize {
        store
            .members(k)
            .iter()
            .position(|m| m.item == item)
            .unwrap()
    }

    #[test]
    fn moving_a_center_inside_its_cluster_can_be_neutral() {
        for level in [Level::L0, Level::L1, Level::L2, Level::L3] {
            let clarans = two_clusters(level);
            let j2 = position(clarans.store(), 0, 2);
            let delta = clarans.evaluate(&Proposal::new(0, 0, j2), level).unwrap();
            match delta {
                Delta::Value(v) => assert!(v.abs() < 1e-12, "level {level}: {v}"),
                Delta::NonImproving => assert!(level == Level::L3),
            }
            assert!(!delta.is_improving());
        }
    }

    #[test]
    fn recentering_the_second_cluster_improves_by_one() {
        for level in [Level::L0, Level::L1, Level::L2, Level::L3] {
            let clarans = two_clusters(level);
            let j2 = position(clarans.store(), 1, 4);
            let delta = clarans.evaluate(&Proposal::new(1, 1, j2), level).unwrap();
            assert!((delta.value() + 1.0).abs() < 1e-12, "level {level}: {delta:?}");
            assert!(delta.is_improving());
        }
    }

    #[test]
    fn proposal_far_from_everything_is_rejected_without_item_scans() {
        let metric = DenseMetric::new(
            array![[0.0, 0.0], [0.5, 0.0], [100.0, 0.0], [100.5, 0.0], [100.0, 0.7]],
            Norm::L2,
        );
        let config = ClaransConfig {
            k: 2,
            level: Level::L2,
            ..ClaransConfig::default()
        };
        let mut clarans = Clarans::new(metric, config).unwrap();
        clarans.initialize(&[0, 2]).unwrap();
        // Move cluster 0's center onto a member of cluster 1.
        let j2 = position(clarans.store(), 1, 4);
        let delta = clarans.evaluate(&Proposal::new(0, 1, j2), Level::L2).unwrap();
        assert!(delta.value() > 0.0);
        let exact = clarans.evaluate(&Proposal::new(0, 1, j2), Level::L0).unwrap();
        assert!((delta.value() - exact.value()).abs() < 1e-9);
    }

    fn blob_state(n_per_blob: usize, config: ClaransConfig) -> Clarans<DenseMetric> {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let means = array![[0.0, 0.0], [6.0, 0.0], [0.0, 6.0], [6.0, 6.0], [3.0, 3.0]];
        let points = generate_clustered_points(n_per_blob, &means, 1.0, &mut rng).unwrap();
        let config = ClaransConfig { k: 5, ..config };
        let mut clarans = Clarans::new(DenseMetric::new(points, Norm::L2), config).unwrap();
        clarans.initialize(&[0, 1, 2, 3, 4]).unwrap();
        clarans
    }

    fn small_blobs(level: Level, energy: Energy, threads: usize) -> Clarans<DenseMetric> {
        let config = ClaransConfig {
            level,
            energy,
            threads,
            ..ClaransConfig::default()
        };
        blob_state(12, config)
    }

    #[test]
    fn exact_levels_agree_with_naive_evaluation() {
        for energy in [Energy::Identity, Energy::Quadratic, Energy::Log] {
            for threads in [1, 3] {
                let clarans = small_blobs(Level::L2, energy, threads);
                let mut sampler = ProposalSampler::new(17);
                for _ in 0..200 {
                    let p = sampler.draw(clarans.store()).unwrap();
                    let l0 = clarans.evaluate(&p, Level::L0).unwrap().value();
                    for level in [Level::L1, Level::L2] {
                        let v = clarans.evaluate(&p, level).unwrap().value();
                        assert!(
                            (v - l0).abs() <= 1e-9 * (1.0 + l0.abs()),
                            "{energy} level {level} threads {threads}: {v} vs {l0} for {p:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn level_three_values_are_exact() {
        // 2500 points over 5 clusters: several sampling rounds for both variants.
        for variant in [L3Variant::Heuristic, L3Variant::Hoeffding] {
            let config = ClaransConfig {
                level: Level::L3,
                l3_variant: variant,
                ..ClaransConfig::default()
            };
            let clarans = blob_state(500, config);
            let mut sampler = ProposalSampler::new(23);
            for _ in 0..150 {
                let p = sampler.draw(clarans.store()).unwrap();
                let l0 = clarans.evaluate(&p, Level::L0).unwrap().value();
                if let Delta::Value(v) = clarans.evaluate(&p, Level::L3).unwrap() {
                    assert!(
                        (v - l0).abs() <= 1e-9 * (1.0 + l0.abs()),
                        "{variant}: {v} vs {l0}"
                    );
                }
            }
        }
    }

    #[test]
    fn hoeffding_rarely_rejects_improving_proposals() {
        let config = ClaransConfig {
            level: Level::L3,
            l3_variant: L3Variant::Hoeffding,
            ..ClaransConfig::default()
        };
        let p_null_accept = config.l3.p_null_accept;
        // All five centers start in the first blob, so most moves improve.
        let clarans = blob_state(500, config);
        let mut sampler = ProposalSampler::new(41);
        let (mut improving, mut rejected) = (0usize, 0usize);
        for _ in 0..300 {
            let p = sampler.draw(clarans.store()).unwrap();
            if clarans.evaluate(&p, Level::L0).unwrap().value() >= 0.0 {
                continue;
            }
            improving += 1;
            if clarans.evaluate(&p, Level::L3).unwrap() == Delta::NonImproving {
                rejected += 1;
            }
        }
        assert!(improving >= 20, "only {improving} improving proposals");
        let rate = rejected as f64 / improving as f64;
        assert!(rate <= 1.0 - p_null_accept, "{rejected}/{improving} rejected");
    }

    #[test]
    fn single_round_level_three_rejects_exactly() {
        // 55 members over 5 clusters: one exhaustive round.
        let clarans = small_blobs(Level::L3, Energy::Identity, 1);
        let mut sampler = ProposalSampler::new(31);
        for _ in 0..200 {
            let p = sampler.draw(clarans.store()).unwrap();
            let l0 = clarans.evaluate(&p, Level::L0).unwrap().value();
            match clarans.evaluate(&p, Level::L3).unwrap() {
                Delta::Value(v) => assert!((v - l0).abs() <= 1e-9 * (1.0 + l0.abs())),
                Delta::NonImproving => assert!(l0 >= -1e-9 * (1.0 + l0.abs())),
            }
        }
    }

    #[test]
    fn pruning_saves_distance_evaluations() {
        let mut sampler = ProposalSampler::new(29);
        let proposals: Vec<Proposal> = {
            let clarans = small_blobs(Level::L2, Energy::Identity, 1);
            (0..100).map(|_| sampler.draw(clarans.store()).unwrap()).collect()
        };
        let mut calls = Vec::new();
        for level in [Level::L0, Level::L1, Level::L2] {
            let clarans = small_blobs(level, Energy::Identity, 1);
            let before = clarans.distance_calls();
            for p in &proposals {
                clarans.evaluate(p, level).unwrap();
            }
            calls.push(clarans.distance_calls() - before);
        }
        assert!(calls[1] < calls[0], "{calls:?}");
        assert!(calls[2] <= calls[1], "{calls:?}");
    }

    #[test]
    fn wrapped_segments_cover_each_member_once() {
        let mut cluster = SampledCluster::new(0, 0.0, false, 10);
        cluster.phase = 7;
        let mut seen = vec![0usize; 10];
        for active in [3usize, 6, 10] {
            cluster.active_old = cluster.active;
            cluster.active = active;
            for range in cluster.new_segments() {
                for j in range {
                    seen[j] += 1;
                }
            }
        }
        assert!(seen.iter().all(|&count| count == 1), "{seen:?}");
    }
}
