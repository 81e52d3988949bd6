//! Center-to-center geometry: the K×K distance matrix and, per center, the
//! nearest other center.

use crate::cache::{NearestInfo, NearestPair};
use crate::metric::{Metric, Oracle};

/// Symmetric K×K matrix of inter-center distances with a zero diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct CenterMatrix {
    k: usize,
    values: Vec<f64>,
}

impl CenterMatrix {
    /// Evaluate all pairwise center distances (`K(K-1)/2` metric calls).
    pub(crate) fn rebuild<M: Metric>(centers: &[usize], oracle: &Oracle<'_, M>) -> Self {
        let k = centers.len();
        let mut values = vec![0.0; k * k];
        for a in 0..k {
            for b in (a + 1)..k {
                let d = oracle.distance(centers[a], centers[b]);
                values[a * k + b] = d;
                values[b * k + a] = d;
            }
        }
        Self { k, values }
    }

    #[inline]
    pub fn get(&self, a: usize, b: usize) -> f64 {
        self.values[a * self.k + b]
    }

    #[inline]
    pub fn row(&self, a: usize) -> &[f64] {
        &self.values[a * self.k..(a + 1) * self.k]
    }

    pub fn size(&self) -> usize {
        self.k
    }

    /// Overwrite row and column `k_to` with `new_row`, forcing a zero diagonal.
    /// Returns the previous row.
    pub fn update_on_accept(&mut self, k_to: usize, new_row: &[f64]) -> Vec<f64> {
        let old = self.row(k_to).to_vec();
        for (k, &d) in new_row.iter().enumerate() {
            let d = if k == k_to { 0.0 } else { d };
            self.values[k_to * self.k + k] = d;
            self.values[k * self.k + k_to] = d;
        }
        old
    }
}

/// Geometry kept for the active pruning level.
///
/// Level 0 keeps nothing, level 1 keeps the nearest-other-center records,
/// levels 2 and 3 additionally keep the full matrix.
#[derive(Debug, Clone, Default)]
pub struct CenterGeometry {
    matrix: Option<CenterMatrix>,
    nearest: Vec<NearestInfo>,
}

impl CenterGeometry {
    pub(crate) fn build<M: Metric>(
        centers: &[usize],
        with_nearest: bool,
        with_matrix: bool,
        oracle: &Oracle<'_, M>,
    ) -> Self {
        let matrix = with_matrix.then(|| CenterMatrix::rebuild(centers, oracle));
        let mut geometry = Self {
            matrix,
            nearest: Vec::new(),
        };
        if with_nearest || with_matrix {
            geometry.nearest = (0..centers.len())
                .map(|k| {
                    let row = geometry.center_row(k, centers, oracle);
                    nearest_excluding(&row, k, oracle)
                })
                .collect();
        }
        geometry
    }

    pub fn matrix(&self) -> Option<&CenterMatrix> {
        self.matrix.as_ref()
    }

    /// Nearest other center of center `k`, when maintained.
    pub fn nearest_other(&self, k: usize) -> Option<&NearestInfo> {
        self.nearest.get(k)
    }

    pub fn tracks_nearest(&self) -> bool {
        !self.nearest.is_empty()
    }

    /// Distances from center `k` to every center, from the matrix when present.
    pub(crate) fn center_row<M: Metric>(
        &self,
        k: usize,
        centers: &[usize],
        oracle: &Oracle<'_, M>,
    ) -> Vec<f64> {
        match &self.matrix {
            Some(matrix) => matrix.row(k).to_vec(),
            None => distances_to_centers(centers[k], centers, oracle),
        }
    }

    /// Refresh after center `k_to` was replaced; `new_row` holds the distances
    /// from the new center to every center.
    pub(crate) fn update_on_accept<M: Metric>(
        &mut self,
        k_to: usize,
        new_row: &[f64],
        centers: &[usize],
        oracle: &Oracle<'_, M>,
    ) {
        if let Some(matrix) = self.matrix.as_mut() {
            matrix.update_on_accept(k_to, new_row);
        }
        if self.nearest.is_empty() {
            return;
        }

        self.nearest[k_to] = nearest_excluding(new_row, k_to, oracle);
        for k in 0..centers.len() {
            if k == k_to {
                continue;
            }
            let current = self.nearest[k];
            if new_row[k] < current.distance {
                self.nearest[k] = NearestInfo::new(k_to, new_row[k], oracle.energy(new_row[k]));
            } else if current.index == k_to {
                // k_to moved away; someone else may now be nearest.
                let row = self.center_row(k, centers, oracle);
                self.nearest[k] = nearest_excluding(&row, k, oracle);
            }
        }
    }
}

/// Distances from `item` to every center.
pub(crate) fn distances_to_centers<M: Metric>(
    item: usize,
    centers: &[usize],
    oracle: &Oracle<'_, M>,
) -> Vec<f64> {
    centers
        .iter()
        .map(|&center| {
            if center == item {
                0.0
            } else {
                oracle.distance(center, item)
            }
        })
        .collect()
}

/// Nearest and second nearest center of `item`. Distances to centers that
/// cannot enter the top two are abandoned early.
pub(crate) fn nearest_two<M: Metric>(
    item: usize,
    centers: &[usize],
    oracle: &Oracle<'_, M>,
) -> NearestPair {
    let mut first = (0, f64::INFINITY);
    let mut second = (0, f64::INFINITY);
    for (k, &center) in centers.iter().enumerate() {
        let d = oracle.distance_bounded(center, item, second.1);
        if d < first.1 {
            second = first;
            first = (k, d);
        } else if d < second.1 {
            second = (k, d);
        }
    }
    NearestPair::new(
        NearestInfo::new(first.0, first.1, oracle.energy(first.1)),
        NearestInfo::new(second.0, second.1, oracle.energy(second.1)),
    )
}

/// Smallest entry of `distances` other than position `excluded`.
pub(crate) fn nearest_excluding<M: Metric>(
    distances: &[f64],
    excluded: usize,
    oracle: &Oracle<'_, M>,
) -> NearestInfo {
    let mut best = NearestInfo::new(0, f64::INFINITY, f64::INFINITY);
    for (k, &d) in distances.iter().enumerate() {
        if k != excluded && d < best.distance {
            best.index = k;
            best.distance = d;
        }
    }
    best.energy = oracle.energy(best.distance);
    best
}
