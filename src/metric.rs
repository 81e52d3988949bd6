//! Metric oracles consumed by the optimiser.
//!
//! The optimiser only ever asks for distances between two items, addressed by
//! their index in the dataset. Any implementation must be symmetric,
//! non-negative and satisfy the triangle inequality: every elimination test in
//! the evaluator relies on it.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::energy::Energy;
use crate::{ClaransError, DataMatrix, Result};

/// Distance oracle over items `0..len()`.
pub trait Metric: Sync {
    /// Number of items the oracle can address.
    fn len(&self) -> usize;

    /// Whether the oracle addresses no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact distance between items `a` and `b`.
    fn distance(&self, a: usize, b: usize) -> f64;

    /// Distance between `a` and `b` when it is below `threshold`; otherwise any
    /// value `>= threshold`. Below the threshold the result must be bit-identical
    /// to [`Metric::distance`].
    fn distance_bounded(&self, a: usize, b: usize, _threshold: f64) -> f64 {
        self.distance(a, b)
    }
}

/// Norm used by [`DenseMetric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Norm {
    /// Manhattan distance.
    L1,
    /// Euclidean distance.
    #[default]
    L2,
    /// Chebyshev distance.
    LInf,
}

impl fmt::Display for Norm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Norm::L1 => write!(f, "l1"),
            Norm::L2 => write!(f, "l2"),
            Norm::LInf => write!(f, "li"),
        }
    }
}

impl std::str::FromStr for Norm {
    type Err = ClaransError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "l1" => Ok(Self::L1),
            "l2" => Ok(Self::L2),
            "li" | "linf" | "l-inf" => Ok(Self::LInf),
            other => Err(ClaransError::InvalidConfig(format!(
                "unsupported metric '{other}'"
            ))),
        }
    }
}

/// Dense vectors stored as matrix rows.
#[derive(Debug, Clone)]
pub struct DenseMetric {
    data: DataMatrix,
    norm: Norm,
}

impl DenseMetric {
    /// Wrap a dataset (rows are items).
    pub fn new(data: DataMatrix, norm: Norm) -> Self {
        Self { data, norm }
    }

    /// Underlying rows.
    pub fn data(&self) -> &DataMatrix {
        &self.data
    }

    /// Norm in use.
    pub fn norm(&self) -> Norm {
        self.norm
    }

    /// Bounded distance between two row views; see [`Metric::distance_bounded`].
    pub fn rows_bounded(&self, a: &ArrayView1<f64>, b: &ArrayView1<f64>, threshold: f64) -> f64 {
        match self.norm {
            Norm::L1 => {
                let mut sum = 0.0;
                for (x, y) in a.iter().zip(b.iter()) {
                    sum += (x - y).abs();
                    if sum >= threshold {
                        return sum;
                    }
                }
                sum
            }
            Norm::L2 => {
                // Squares are only a pre-filter; rounding in `threshold * threshold`
                // can admit a sum whose root is still below the threshold.
                let squared_threshold = if threshold.is_finite() {
                    threshold * threshold
                } else {
                    f64::INFINITY
                };
                let mut sum = 0.0;
                for (x, y) in a.iter().zip(b.iter()) {
                    let diff = x - y;
                    sum += diff * diff;
                    if sum >= squared_threshold {
                        let d = sum.sqrt();
                        if d >= threshold {
                            return d;
                        }
                    }
                }
                sum.sqrt()
            }
            Norm::LInf => {
                let mut max = 0.0f64;
                for (x, y) in a.iter().zip(b.iter()) {
                    max = max.max((x - y).abs());
                    if max >= threshold {
                        return max;
                    }
                }
                max
            }
        }
    }
}

impl Metric for DenseMetric {
    fn len(&self) -> usize {
        self.data.nrows()
    }

    fn distance(&self, a: usize, b: usize) -> f64 {
        self.rows_bounded(&self.data.row(a), &self.data.row(b), f64::INFINITY)
    }

    fn distance_bounded(&self, a: usize, b: usize, threshold: f64) -> f64 {
        self.rows_bounded(&self.data.row(a), &self.data.row(b), threshold)
    }
}

/// Metric plus energy transform, counting every distance evaluation.
pub(crate) struct Oracle<'a, M: Metric> {
    metric: &'a M,
    energy: Energy,
    calls: &'a AtomicU64,
}

impl<M: Metric> Clone for Oracle<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Metric> Copy for Oracle<'_, M> {}

impl<'a, M: Metric> Oracle<'a, M> {
    pub(crate) fn new(metric: &'a M, energy: Energy, calls: &'a AtomicU64) -> Self {
        Self {
            metric,
            energy,
            calls,
        }
    }

    #[inline]
    pub(crate) fn distance(&self, a: usize, b: usize) -> f64 {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.metric.distance(a, b)
    }

    #[inline]
    pub(crate) fn distance_bounded(&self, a: usize, b: usize, threshold: f64) -> f64 {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.metric.distance_bounded(a, b, threshold)
    }

    #[inline]
    pub(crate) fn energy(&self, distance: f64) -> f64 {
        self.energy.apply(distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn metric(norm: Norm) -> DenseMetric {
        DenseMetric::new(array![[0.0, 0.0], [3.0, 4.0], [1.0, 1.0]], norm)
    }

    #[test]
    fn norms_match_hand_computed_values() {
        assert_eq!(metric(Norm::L2).distance(0, 1), 5.0);
        assert_eq!(metric(Norm::L1).distance(0, 1), 7.0);
        assert_eq!(metric(Norm::LInf).distance(0, 1), 4.0);
    }

    #[test]
    fn bounded_distance_is_exact_below_threshold() {
        for norm in [Norm::L1, Norm::L2, Norm::LInf] {
            let m = metric(norm);
            let exact = m.distance(1, 2);
            assert_eq!(m.distance_bounded(1, 2, exact + 1.0), exact);
            assert!(m.distance_bounded(0, 1, 0.5) >= 0.5);
        }
    }

    #[test]
    fn bounded_l2_is_bit_identical_just_above_exact() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(17);
        let data = DataMatrix::from_shape_fn((400, 3), |_| rng.gen_range(-10.0..10.0));
        let m = DenseMetric::new(data, Norm::L2);
        for a in 0..200 {
            let b = a + 200;
            let exact = m.distance(a, b);
            let just_above = f64::from_bits(exact.to_bits() + 1);
            assert_eq!(
                m.distance_bounded(a, b, just_above).to_bits(),
                exact.to_bits(),
                "pair ({a}, {b})"
            );
            assert!(m.distance_bounded(a, b, exact) >= exact);
        }
    }

    #[test]
    fn oracle_counts_evaluations() {
        let m = metric(Norm::L2);
        let calls = AtomicU64::new(0);
        let oracle = Oracle::new(&m, Energy::Quadratic, &calls);
        assert_eq!(oracle.energy(oracle.distance(0, 1)), 25.0);
        oracle.distance_bounded(0, 2, 0.1);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn default_bounded_distance_ignores_the_threshold() {
        struct Gaps;
        impl Metric for Gaps {
            fn len(&self) -> usize {
                4
            }
            fn distance(&self, a: usize, b: usize) -> f64 {
                a.abs_diff(b) as f64
            }
        }
        assert_eq!(Gaps.distance_bounded(0, 3, 1.0), 3.0);
        assert_eq!(Gaps.distance_bounded(3, 1, f64::INFINITY), 2.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let m = metric(Norm::L2);
        assert_eq!(m.distance(1, 2), m.distance(2, 1));
        assert_eq!(m.distance(2, 2), 0.0);
    }
}
