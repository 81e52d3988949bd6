//! Committing an accepted proposal and repairing the caches it invalidates.
//!
//! The commit itself is three arena operations: the old center of `k_to`
//! becomes a member of its own cluster, the promoted item becomes the center,
//! and its old slot in `k_from` is filled by a tail swap. Afterwards the
//! nearest pairs are repaired with the level's pruning, members whose primary
//! now points elsewhere are moved, and stale statistics are recomputed.

use std::thread;

use crate::cache::{ClusterStore, ClusterView, Member, NearestInfo, NearestPair};
use crate::centers::{
    distances_to_centers, nearest_excluding, nearest_two, CenterGeometry, CenterMatrix,
};
use crate::config::Level;
use crate::metric::{Metric, Oracle};
use crate::parallel::split_chunks_mut;
use crate::sampler::Proposal;

/// Guards the center-distance elimination against rounding in `d1 + d2`.
const ELIMINATION_SHRINK: f64 = 1.0 - 1e-6;

/// Counters describing one committed proposal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Clusters whose members were scanned.
    pub scanned_clusters: usize,
    /// Members moved to another cluster after the repair.
    pub redistributed: usize,
    /// Clusters whose statistics were recomputed.
    pub refreshed: usize,
}

/// Commit `proposal` (`k1` receives item `j2` of `k2` as its center) and bring
/// every cache back in line with the new centers.
pub(crate) fn accept<M: Metric>(
    store: &mut ClusterStore,
    geometry: &mut CenterGeometry,
    oracle: Oracle<'_, M>,
    level: Level,
    threads: usize,
    proposal: &Proposal,
) -> UpdateReport {
    let Proposal {
        k1: k_to,
        k2: k_from,
        j2: j_from,
        ..
    } = *proposal;
    let new_center = store.item(k_from, j_from);
    let old_center = store.center(k_to);

    // Rows against the centers before the move; entry k_to is patched below.
    let mut old_row = geometry.center_row(k_to, store.centers(), &oracle);
    let mut new_row = distances_to_centers(new_center, store.centers(), &oracle);
    let d_old_new = new_row[k_to];
    new_row[k_to] = 0.0;
    old_row[k_to] = d_old_new;

    let alternative = match geometry.nearest_other(k_to) {
        Some(info) => *info,
        None => nearest_excluding(&old_row, k_to, &oracle),
    };
    let primary = NearestInfo::new(k_to, d_old_new, oracle.energy(d_old_new));
    store.append(
        k_to,
        Member {
            item: old_center,
            pair: NearestPair::new(primary, alternative),
        },
    );
    store.set_center(k_to, new_center);
    store.swap_remove(k_from, j_from);

    geometry.update_on_accept(k_to, &new_row, store.centers(), &oracle);

    let repair = Repair {
        oracle,
        k_to,
        new_center,
        threads: threads.max(1),
    };
    let scanned_clusters = match (level, geometry.matrix()) {
        (Level::L0, _) => repair.exhaustive(store),
        (Level::L2 | Level::L3, Some(matrix)) => repair.with_matrix(store, matrix, &old_row),
        _ => repair.with_center_rows(store, &old_row, &new_row),
    };

    let redistributed = redistribute(store, k_to);
    let refreshed = store.refresh_statistics();
    tracing::trace!(
        k_to,
        k_from,
        scanned_clusters,
        redistributed,
        refreshed,
        "caches repaired"
    );
    UpdateReport {
        scanned_clusters,
        redistributed,
        refreshed,
    }
}

/// Per-item repair after center `k_to` moved to `new_center`.
struct Repair<'a, M: Metric> {
    oracle: Oracle<'a, M>,
    k_to: usize,
    new_center: usize,
    threads: usize,
}

impl<M: Metric> Repair<'_, M> {
    /// No pruning: `k_to` is rebuilt, every other member is compared with
    /// the new center.
    fn exhaustive(&self, store: &mut ClusterStore) -> usize {
        let clusters: Vec<usize> = (0..store.num_clusters()).collect();
        let ClusterStore {
            centers, members, ..
        } = store;
        let centers: &[usize] = centers;
        let changed = for_each_member(members, &clusters, self.threads, |k, member| {
            if k == self.k_to || member.pair.alternative.index == self.k_to {
                self.rebuild(member, centers)
            } else {
                self.offer_new_center(member, member.pair.alternative.distance)
            }
        });
        mark_changed(store, &changed);
        clusters.len()
    }

    /// Skip clusters, then items, that lie too far from both the old and new
    /// positions of center `k_to` to be affected.
    fn with_center_rows(&self, store: &mut ClusterStore, old_row: &[f64], new_row: &[f64]) -> usize {
        let min_row = shrunk_min_row(old_row, new_row);
        let clusters = self.affected_clusters(store, &min_row);
        let ClusterStore {
            centers, members, ..
        } = store;
        let centers: &[usize] = centers;
        let changed = for_each_member(members, &clusters, self.threads, |k, member| {
            if k == self.k_to {
                return self.rebuild(member, centers);
            }
            let pair = member.pair;
            if min_row[k] > pair.primary.distance + pair.alternative.distance {
                false
            } else if pair.alternative.index == self.k_to {
                self.rebuild(member, centers)
            } else {
                self.offer_new_center(member, pair.alternative.distance)
            }
        });
        mark_changed(store, &changed);
        clusters.len()
    }

    /// As [`Repair::with_center_rows`], with full rebuilds replaced by a warm
    /// started search that skips centers ruled out through the matrix.
    fn with_matrix(&self, store: &mut ClusterStore, matrix: &CenterMatrix, old_row: &[f64]) -> usize {
        let min_row = shrunk_min_row(old_row, matrix.row(self.k_to));
        let clusters = self.affected_clusters(store, &min_row);
        let ClusterStore {
            centers, members, ..
        } = store;
        let centers: &[usize] = centers;
        let changed = for_each_member(members, &clusters, self.threads, |k, member| {
            let pair = member.pair;
            if k == self.k_to {
                let d1 = self.oracle.distance(self.new_center, member.item);
                let mut best = Best::new(
                    (self.k_to, d1),
                    (pair.alternative.index, pair.alternative.distance),
                );
                best.warmstart(member.item, centers, matrix, &self.oracle);
                return best.write(member, &self.oracle);
            }
            if min_row[k] > pair.primary.distance + pair.alternative.distance {
                return false;
            }
            let d = self.oracle.distance(self.new_center, member.item);
            if pair.alternative.index == self.k_to {
                let mut best = Best::new((k, pair.primary.distance), (self.k_to, d));
                best.warmstart(member.item, centers, matrix, &self.oracle);
                best.write(member, &self.oracle)
            } else {
                self.apply_new_center_distance(member, d)
            }
        });
        mark_changed(store, &changed);
        clusters.len()
    }

    /// `k_to` followed by every other cluster whose `R1 + R2` reaches `min_row`.
    fn affected_clusters(&self, store: &ClusterStore, min_row: &[f64]) -> Vec<usize> {
        std::iter::once(self.k_to)
            .chain((0..store.num_clusters()).filter(|&k| {
                let stats = store.statistics(k);
                k != self.k_to && min_row[k] <= stats.r1 + stats.r2
            }))
            .collect()
    }

    /// Recompute both records of `member` from every center.
    fn rebuild(&self, member: &mut Member, centers: &[usize]) -> bool {
        let fresh = nearest_two(member.item, centers, &self.oracle);
        member.pair.reset(fresh.primary, fresh.alternative)
    }

    /// The new center only matters if it beats the alternative.
    fn offer_new_center(&self, member: &mut Member, d2: f64) -> bool {
        let d = self.oracle.distance_bounded(self.new_center, member.item, d2);
        self.apply_new_center_distance(member, d)
    }

    fn apply_new_center_distance(&self, member: &mut Member, d: f64) -> bool {
        let pair = &mut member.pair;
        let info = NearestInfo::new(self.k_to, d, self.oracle.energy(d));
        if d < pair.primary.distance {
            let demoted = pair.primary;
            pair.reset(info, demoted)
        } else if d < pair.alternative.distance {
            pair.reset_alternative(info)
        } else {
            false
        }
    }
}

/// Two nearest centers found so far, as `(cluster, distance)`.
struct Best {
    first: (usize, f64),
    second: (usize, f64),
    known: [usize; 2],
}

impl Best {
    /// Start from two known centers, in either order.
    fn new(a: (usize, f64), b: (usize, f64)) -> Self {
        let (first, second) = if a.1 > b.1 { (b, a) } else { (a, b) };
        Self {
            first,
            second,
            known: [a.0, b.0],
        }
    }

    /// Visit the remaining centers, skipping any that the triangle inequality
    /// places beyond the current second nearest.
    fn warmstart<M: Metric>(
        &mut self,
        item: usize,
        centers: &[usize],
        matrix: &CenterMatrix,
        oracle: &Oracle<'_, M>,
    ) {
        for (k, &center) in centers.iter().enumerate() {
            if self.known.contains(&k) {
                continue;
            }
            let lower = (matrix.get(k, self.first.0) - self.first.1)
                .max(matrix.get(k, self.second.0) - self.second.1);
            if lower >= self.second.1 {
                continue;
            }
            let d = oracle.distance_bounded(center, item, self.second.1);
            if d < self.first.1 {
                self.second = self.first;
                self.first = (k, d);
            } else if d < self.second.1 {
                self.second = (k, d);
            }
        }
    }

    fn write<M: Metric>(&self, member: &mut Member, oracle: &Oracle<'_, M>) -> bool {
        member.pair.reset(
            NearestInfo::new(self.first.0, self.first.1, oracle.energy(self.first.1)),
            NearestInfo::new(self.second.0, self.second.1, oracle.energy(self.second.1)),
        )
    }
}

fn shrunk_min_row(old_row: &[f64], new_row: &[f64]) -> Vec<f64> {
    old_row
        .iter()
        .zip(new_row)
        .map(|(a, b)| a.min(*b) * ELIMINATION_SHRINK)
        .collect()
}

fn mark_changed(store: &mut ClusterStore, changed: &[usize]) {
    for &k in changed {
        store.mark_stale(k);
    }
}

/// Apply `update` to every member of the listed clusters, each cluster split
/// into one contiguous chunk per worker. Returns the clusters in which some
/// member changed.
fn for_each_member<F>(
    members: &mut [Vec<Member>],
    clusters: &[usize],
    nthreads: usize,
    update: F,
) -> Vec<usize>
where
    F: Fn(usize, &mut Member) -> bool + Sync,
{
    let mut selected = vec![false; members.len()];
    for &k in clusters {
        selected[k] = true;
    }

    let mut work: Vec<Vec<(usize, &mut [Member])>> = (0..nthreads).map(|_| Vec::new()).collect();
    for (k, cluster) in members.iter_mut().enumerate() {
        if !selected[k] {
            continue;
        }
        for (ti, chunk) in split_chunks_mut(cluster, nthreads).into_iter().enumerate() {
            work[ti].push((k, chunk));
        }
    }

    let update = &update;
    let per_thread: Vec<Vec<usize>> = if nthreads == 1 {
        work.into_iter().map(|w| run_chunks(w, update)).collect()
    } else {
        thread::scope(|scope| {
            let handles: Vec<_> = work
                .into_iter()
                .map(|w| scope.spawn(move || run_chunks(w, update)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    };

    let mut touched = vec![false; members.len()];
    for k in per_thread.into_iter().flatten() {
        touched[k] = true;
    }
    (0..members.len()).filter(|&k| touched[k]).collect()
}

fn run_chunks<F>(work: Vec<(usize, &mut [Member])>, update: &F) -> Vec<usize>
where
    F: Fn(usize, &mut Member) -> bool,
{
    let mut changed = Vec::new();
    for (k, chunk) in work {
        let mut any = false;
        for member in chunk.iter_mut() {
            any |= update(k, member);
        }
        if any {
            changed.push(k);
        }
    }
    changed
}

/// Move every member whose primary names another cluster into that cluster,
/// visiting `k_to` first. Returns the number of moves.
fn redistribute(store: &mut ClusterStore, k_to: usize) -> usize {
    let order = std::iter::once(k_to).chain((0..store.num_clusters()).filter(|&k| k != k_to));
    let mut moved = 0;
    for k in order {
        let mut j = 0;
        while j < store.ndata(k) {
            let owner = store.primary(k, j).index;
            if owner == k {
                j += 1;
            } else {
                let member = store.swap_remove(k, j);
                store.append(owner, member);
                moved += 1;
            }
        }
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClaransConfig;
    use crate::data::generate_clustered_points;
    use crate::energy::Energy;
    use crate::metric::{DenseMetric, Norm};
    use crate::optimizer::Clarans;
    use crate::sampler::ProposalSampler;
    use ndarray::{array, Array2};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn line(points: &[f64]) -> DenseMetric {
        let data = Array2::from_shape_vec((points.len(), 1), points.to_vec()).unwrap();
        DenseMetric::new(data, Norm::L2)
    }

    #[test]
    fn old_center_joins_its_cluster_and_slot_is_tail_filled() {
        for level in [Level::L0, Level::L1, Level::L2, Level::L3] {
            let config = ClaransConfig {
                k: 2,
                level,
                ..ClaransConfig::default()
            };
            let mut clarans = Clarans::new(line(&[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]), config).unwrap();
            clarans.initialize(&[0, 3]).unwrap();
            let j2 = clarans
                .store()
                .members(1)
                .iter()
                .position(|m| m.item == 4)
                .unwrap();
            clarans.commit(&Proposal::new(1, 1, j2)).unwrap();

            assert_eq!(clarans.centers(), &[0, 4]);
            let mut items: Vec<usize> = clarans.store().members(1).iter().map(|m| m.item).collect();
            items.sort_unstable();
            assert_eq!(items, vec![3, 5]);
            assert!((clarans.current_energy() - 5.0).abs() < 1e-12, "level {level}");
            clarans.run_all_tests().unwrap();
        }
    }

    #[test]
    fn members_follow_a_center_that_moved_closer() {
        // Cluster 0's center jumps next to cluster 1's members.
        let config = ClaransConfig {
            k: 2,
            level: Level::L2,
            ..ClaransConfig::default()
        };
        let metric = line(&[0.0, 1.0, 9.0, 20.0, 10.2, 10.5]);
        let mut clarans = Clarans::new(metric, config).unwrap();
        clarans.initialize(&[0, 3]).unwrap();
        assert_eq!(clarans.final_assignment(), vec![0, 0, 0, 1, 1, 1]);
        let j2 = clarans
            .store()
            .members(0)
            .iter()
            .position(|m| m.item == 2)
            .unwrap();
        let report = clarans.commit(&Proposal::new(0, 0, j2)).unwrap();
        assert!(report.redistributed >= 1);
        clarans.run_all_tests().unwrap();
        assert_eq!(clarans.final_assignment(), vec![0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn repeated_accepts_keep_every_cache_consistent() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let means = array![[0.0, 0.0], [5.0, 0.0], [0.0, 5.0], [5.0, 5.0]];
        let points = generate_clustered_points(50, &means, 1.2, &mut rng).unwrap();
        for level in [Level::L0, Level::L1, Level::L2, Level::L3] {
            for threads in [1, 4] {
                let config = ClaransConfig {
                    k: 6,
                    level,
                    threads,
                    energy: Energy::Quadratic,
                    ..ClaransConfig::default()
                };
                let mut clarans =
                    Clarans::new(DenseMetric::new(points.clone(), Norm::L2), config).unwrap();
                clarans.initialize(&[0, 1, 2, 3, 4, 5]).unwrap();
                let mut sampler = ProposalSampler::new(41);
                let mut accepted = 0;
                for _ in 0..400 {
                    let p = sampler.draw(clarans.store()).unwrap();
                    let delta = clarans.evaluate(&p, Level::L0).unwrap().value();
                    if delta < 0.0 {
                        let before = clarans.energy_from_scratch();
                        clarans.commit(&p).unwrap();
                        let after = clarans.energy_from_scratch();
                        assert!(
                            (after - before - delta).abs() <= 1e-8 * (1.0 + before),
                            "level {level}: {before} + {delta} != {after}"
                        );
                        assert!((clarans.current_energy() - after).abs() <= 1e-8 * (1.0 + after));
                        clarans.run_all_tests().unwrap();
                        accepted += 1;
                    }
                }
                assert!(accepted > 0, "level {level} threads {threads}");
            }
        }
    }

    #[test]
    fn warm_start_finds_the_two_nearest() {
        let metric = line(&[0.0, 3.0, 7.0, 12.0, 5.0]);
        let calls = std::sync::atomic::AtomicU64::new(0);
        let oracle = Oracle::new(&metric, Energy::Identity, &calls);
        let centers = [0, 1, 2, 3];
        let matrix = CenterMatrix::rebuild(&centers, &oracle);
        // item 4 at 5.0, starting from centers 0 (5.0) and 3 (7.0)
        let mut best = Best::new((3, 7.0), (0, 5.0));
        best.warmstart(4, &centers, &matrix, &oracle);
        assert_eq!(best.first, (1, 2.0));
        assert_eq!(best.second, (2, 2.0));
    }
}
