//! Self-checks comparing every maintained cache with a fresh recomputation.
//!
//! They are expensive (at least `N·K` metric calls) and only run
//! automatically when `with_tests` is set. Fresh distances here bypass the
//! call counter.

use crate::cache::ClusterView;
use crate::metric::Metric;
use crate::optimizer::Clarans;
use crate::stats::ClusterStatistics;
use crate::{ClaransError, Result};

fn close(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs()))
}

impl<M: Metric> Clarans<M> {
    /// Every item is a center or a member exactly once and the member
    /// counts add up to `N - K`.
    pub fn run_size_test(&self) -> Result<()> {
        let store = self.store();
        let n = self.metric().len();
        let k = store.num_clusters();
        let mut seen = vec![0u32; n];
        for cluster in 0..k {
            seen[store.center(cluster)] += 1;
            for member in store.members(cluster) {
                seen[member.item] += 1;
            }
        }
        if let Some(item) = seen.iter().position(|&count| count != 1) {
            return Err(ClaransError::SizeMismatch(format!(
                "item {item} appears {} times",
                seen[item]
            )));
        }
        let members = store.total_members();
        if members + k != n {
            return Err(ClaransError::SizeMismatch(format!(
                "{members} members and {k} centers for {n} items"
            )));
        }
        Ok(())
    }

    /// Primary records name the owning cluster and hold the true distance
    /// to its center.
    pub fn run_primary_test(&self) -> Result<()> {
        let store = self.store();
        let energy = self.config().energy;
        for k in 0..store.num_clusters() {
            let center = store.center(k);
            for (j, member) in store.members(k).iter().enumerate() {
                let primary = member.pair.primary;
                let fresh = self.metric().distance(center, member.item);
                if primary.index != k
                    || !close(primary.distance, fresh)
                    || !close(primary.energy, energy.apply(fresh))
                {
                    return Err(ClaransError::StaleCache(format!(
                        "primary of ({k}, {j}) is {primary:?}, expected cluster {k} at {fresh}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Alternative records hold the nearest other center, and margins equal
    /// `energy(alternative) - energy(primary) >= 0`.
    pub fn run_margin_test(&self) -> Result<()> {
        let store = self.store();
        let energy = self.config().energy;
        for k in 0..store.num_clusters() {
            for (j, member) in store.members(k).iter().enumerate() {
                let pair = member.pair;
                let fresh = (0..store.num_clusters())
                    .filter(|&other| other != k)
                    .map(|other| self.metric().distance(store.center(other), member.item))
                    .fold(f64::INFINITY, f64::min);
                if pair.alternative.index == k
                    || !close(pair.alternative.distance, fresh)
                    || !close(pair.alternative.energy, energy.apply(fresh))
                {
                    return Err(ClaransError::StaleCache(format!(
                        "alternative of ({k}, {j}) is {:?}, expected distance {fresh}",
                        pair.alternative
                    )));
                }
                let expected = pair.alternative.energy - pair.primary.energy;
                if pair.margin() != expected || expected < 0.0 {
                    return Err(ClaransError::StaleCache(format!(
                        "margin of ({k}, {j}) is {}, expected non-negative {expected}",
                        pair.margin()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Maintained statistics equal a recomputation from the cache.
    pub fn run_statistics_test(&self) -> Result<()> {
        let store = self.store();
        for k in 0..store.num_clusters() {
            let fresh = ClusterStatistics::recompute(store.members(k).iter().map(|m| &m.pair));
            if store.is_stale(k) || *store.statistics(k) != fresh {
                return Err(ClaransError::StaleCache(format!(
                    "statistics of cluster {k} are {:?}, expected {fresh:?}",
                    store.statistics(k)
                )));
            }
        }
        Ok(())
    }

    /// The center-center matrix is symmetric, zero on the diagonal and exact.
    /// Passes trivially below level 2.
    pub fn run_center_matrix_test(&self) -> Result<()> {
        let Some(matrix) = self.geometry().matrix() else {
            return Ok(());
        };
        let centers = self.centers();
        if matrix.size() != centers.len() {
            return Err(ClaransError::AsymmetricMatrix(format!(
                "matrix is {0}x{0} for {1} centers",
                matrix.size(),
                centers.len()
            )));
        }
        for a in 0..centers.len() {
            if matrix.get(a, a) != 0.0 {
                return Err(ClaransError::AsymmetricMatrix(format!(
                    "diagonal entry {a} is {}",
                    matrix.get(a, a)
                )));
            }
            for b in (a + 1)..centers.len() {
                let fresh = self.metric().distance(centers[a], centers[b]);
                if matrix.get(a, b) != matrix.get(b, a) || !close(matrix.get(a, b), fresh) {
                    return Err(ClaransError::AsymmetricMatrix(format!(
                        "entries ({a}, {b}) = {} and ({b}, {a}) = {}, expected {fresh}",
                        matrix.get(a, b),
                        matrix.get(b, a)
                    )));
                }
            }
        }
        Ok(())
    }

    /// Nearest-other-center records match a recomputation. Passes trivially
    /// at level 0.
    pub fn run_center_nearest_test(&self) -> Result<()> {
        let geometry = self.geometry();
        if !geometry.tracks_nearest() {
            return Ok(());
        }
        let centers = self.centers();
        let energy = self.config().energy;
        for (k, &center) in centers.iter().enumerate() {
            let fresh = centers
                .iter()
                .enumerate()
                .filter(|&(other, _)| other != k)
                .map(|(_, &c)| self.metric().distance(c, center))
                .fold(f64::INFINITY, f64::min);
            let maintained = geometry.nearest_other(k).copied();
            let matches = maintained.is_some_and(|info| {
                info.index != k && close(info.distance, fresh) && close(info.energy, energy.apply(fresh))
            });
            if !matches {
                return Err(ClaransError::StaleCache(format!(
                    "nearest center of {k} is {maintained:?}, expected distance {fresh}"
                )));
            }
        }
        Ok(())
    }

    /// Run every self-check, stopping at the first failure.
    pub fn run_all_tests(&self) -> Result<()> {
        self.run_size_test()?;
        self.run_primary_test()?;
        self.run_margin_test()?;
        self.run_statistics_test()?;
        self.run_center_matrix_test()?;
        self.run_center_nearest_test()?;
        tracing::trace!("self-tests passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ClaransConfig, Level};
    use crate::metric::{DenseMetric, Norm};
    use crate::optimizer::Clarans;
    use crate::ClaransError;
    use ndarray::Array2;

    fn clarans(level: Level) -> Clarans<DenseMetric> {
        let data = Array2::from_shape_vec((6, 1), vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0]).unwrap();
        let config = ClaransConfig {
            k: 2,
            level,
            ..ClaransConfig::default()
        };
        let mut clarans = Clarans::new(DenseMetric::new(data, Norm::L2), config).unwrap();
        clarans.initialize(&[0, 3]).unwrap();
        clarans
    }

    #[test]
    fn fresh_state_passes_every_level() {
        for level in [Level::L0, Level::L1, Level::L2, Level::L3] {
            clarans(level).run_all_tests().unwrap();
        }
    }

    #[test]
    fn corrupted_primary_is_reported() {
        let mut clarans = clarans(Level::L2);
        clarans.store_mut().members[0][0].pair.primary.distance += 0.5;
        assert!(matches!(
            clarans.run_primary_test(),
            Err(ClaransError::StaleCache(_))
        ));
    }

    #[test]
    fn stale_statistics_are_reported() {
        let mut clarans = clarans(Level::L1);
        clarans.store_mut().stats[1].r1 = 0.0;
        assert!(matches!(
            clarans.run_statistics_test(),
            Err(ClaransError::StaleCache(_))
        ));
    }

    #[test]
    fn misplaced_item_fails_the_size_test() {
        let mut clarans = clarans(Level::L0);
        let member = clarans.store_mut().members[1].pop().unwrap();
        clarans.store_mut().members[0].push(member);
        clarans.store_mut().members[0].push(member);
        assert!(matches!(
            clarans.run_size_test(),
            Err(ClaransError::SizeMismatch(_))
        ));
    }
}
