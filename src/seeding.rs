//! Initial medoid selection.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::sync::atomic::AtomicU64;

use crate::energy::Energy;
use crate::metric::{Metric, Oracle};
use crate::{ClaransError, Result};

fn check_k(n: usize, k: usize) -> Result<()> {
    if k == 0 || k > n {
        return Err(ClaransError::InvalidConfig(format!(
            "initialisation requires 0 < k <= n (k={k}, n={n})"
        )));
    }
    Ok(())
}

/// `k` distinct items chosen uniformly.
pub fn uniform_medoids(n: usize, k: usize, rng: &mut ChaCha8Rng) -> Result<Vec<usize>> {
    check_k(n, k)?;
    let mut idxs: Vec<usize> = (0..n).collect();
    idxs.shuffle(rng);
    idxs.truncate(k);
    Ok(idxs)
}

/// k-means++ over items: each new medoid is drawn with probability
/// proportional to the energy of its distance to the nearest medoid so far.
pub fn kmeans_plus_plus<M: Metric>(
    metric: &M,
    energy: Energy,
    k: usize,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<usize>> {
    let calls = AtomicU64::new(0);
    kmeans_plus_plus_counted(&Oracle::new(metric, energy, &calls), metric.len(), k, rng)
}

/// [`kmeans_plus_plus`] through a counting oracle; costs `(k - 1) * n`
/// distance calls.
pub(crate) fn kmeans_plus_plus_counted<M: Metric>(
    oracle: &Oracle<'_, M>,
    n: usize,
    k: usize,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<usize>> {
    check_k(n, k)?;

    let first = rng.gen_range(0..n);
    if k == 1 {
        return Ok(vec![first]);
    }
    let mut chosen = vec![first];
    let mut is_chosen = vec![false; n];
    is_chosen[first] = true;

    let mut nearest: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| oracle.distance(i, first))
        .collect();

    while chosen.len() < k {
        let weights: Vec<f64> = nearest
            .iter()
            .zip(&is_chosen)
            .map(|(&d, &taken)| if taken { 0.0 } else { oracle.energy(d) })
            .collect();
        let sum: f64 = weights.iter().sum();
        let next = if sum > 0.0 && sum.is_finite() {
            let mut pick = rng.gen::<f64>() * sum;
            let mut idx = 0usize;
            while idx + 1 < n && (is_chosen[idx] || pick >= weights[idx]) {
                pick -= weights[idx];
                idx += 1;
            }
            idx
        } else {
            // Every remaining item coincides with a medoid.
            let remaining: Vec<usize> = (0..n).filter(|&i| !is_chosen[i]).collect();
            remaining[rng.gen_range(0..remaining.len())]
        };
        let next = if is_chosen[next] {
            (0..n).find(|&i| !is_chosen[i]).unwrap_or(next)
        } else {
            next
        };

        chosen.push(next);
        is_chosen[next] = true;
        if chosen.len() == k {
            break;
        }
        nearest.par_iter_mut().enumerate().for_each(|(i, slot)| {
            let d = oracle.distance(i, next);
            if d < *slot {
                *slot = d;
            }
        });
    }
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{DenseMetric, Norm};
    use ndarray::Array2;

    fn line(points: &[f64]) -> DenseMetric {
        let data = Array2::from_shape_vec((points.len(), 1), points.to_vec()).unwrap();
        DenseMetric::new(data, Norm::L2)
    }

    #[test]
    fn uniform_medoids_are_distinct() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut medoids = uniform_medoids(50, 10, &mut rng).unwrap();
        medoids.sort_unstable();
        medoids.dedup();
        assert_eq!(medoids.len(), 10);
        assert!(medoids.iter().all(|&m| m < 50));
    }

    #[test]
    fn kmeans_plus_plus_spreads_over_separated_groups() {
        let metric = line(&[0.0, 0.1, 0.2, 100.0, 100.1, 100.2, 200.0, 200.1]);
        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let medoids = kmeans_plus_plus(&metric, Energy::Quadratic, 3, &mut rng).unwrap();
            let mut groups: Vec<usize> = medoids.iter().map(|&m| m / 3).collect();
            groups.sort_unstable();
            groups.dedup();
            assert_eq!(groups.len(), 3, "seed {seed}: {medoids:?}");
        }
    }

    #[test]
    fn duplicates_still_yield_distinct_indices() {
        let metric = line(&[1.0, 1.0, 1.0, 1.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut medoids = kmeans_plus_plus(&metric, Energy::Identity, 4, &mut rng).unwrap();
        medoids.sort_unstable();
        assert_eq!(medoids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn counted_seeding_skips_the_final_refresh() {
        let metric = line(&[0.0, 0.1, 0.2, 100.0, 100.1, 100.2, 200.0, 200.1]);
        let calls = AtomicU64::new(0);
        let oracle = Oracle::new(&metric, Energy::Quadratic, &calls);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let medoids = kmeans_plus_plus_counted(&oracle, metric.len(), 3, &mut rng).unwrap();
        assert_eq!(medoids.len(), 3);
        assert_eq!(calls.into_inner(), 2 * 8);
    }

    #[test]
    fn k_larger_than_n_is_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        assert!(uniform_medoids(3, 4, &mut rng).is_err());
    }
}
