//! Synthetic datasets and CSV loading.

use csv::ReaderBuilder;
use ndarray::{Array2, ArrayView1, ArrayViewMut1};
use ndarray_rand::rand_distr::{Distribution, Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::path::Path;

use crate::{ClaransError, DataMatrix, Result};

/// Generate random data matrix (n rows, dim columns) using a reproducible RNG.
pub fn generate_points(n: usize, dim: usize, rng: &mut ChaCha8Rng) -> DataMatrix {
    Array2::random_using((n, dim), Uniform::new(0.0, 1.0), rng)
}

/// Gaussian blobs: `n_per_cluster` rows around each row of `means`, emitted
/// blob by blob.
pub fn generate_clustered_points(
    n_per_cluster: usize,
    means: &DataMatrix,
    spread: f64,
    rng: &mut ChaCha8Rng,
) -> Result<DataMatrix> {
    if !(spread.is_finite() && spread >= 0.0) {
        return Err(ClaransError::InvalidConfig(format!(
            "spread must be finite and non-negative, got {spread}"
        )));
    }
    let normal = Normal::new(0.0, spread).map_err(|err| {
        ClaransError::InvalidConfig(format!("invalid spread {spread}: {err}"))
    })?;
    let mut points = Array2::zeros((n_per_cluster * means.nrows(), means.ncols()));
    for (blob, mean) in means.outer_iter().enumerate() {
        for sample in 0..n_per_cluster {
            let row = points.row_mut(blob * n_per_cluster + sample);
            jitter_around(&mean, row, &normal, rng);
        }
    }
    Ok(points)
}

/// `n_blobs` blob means drawn uniformly from `[0, scale)^dim`.
pub fn random_means(n_blobs: usize, dim: usize, scale: f64, rng: &mut ChaCha8Rng) -> DataMatrix {
    Array2::random_using((n_blobs, dim), Uniform::new(0.0, scale), rng)
}

fn jitter_around<R: Rng + ?Sized>(
    mean: &ArrayView1<f64>,
    mut row: ArrayViewMut1<'_, f64>,
    normal: &Normal<f64>,
    rng: &mut R,
) {
    for (value, &centre) in row.iter_mut().zip(mean.iter()) {
        *value = centre + normal.sample(rng);
    }
}

/// Loads datasets into a [`DataMatrix`], one item per row.
pub struct DataLoader;

impl DataLoader {
    /// Load a CSV file with a header row and numeric columns.
    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<DataMatrix> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_path(path)?;
        let mut values = Vec::new();
        let mut width = None;
        let mut rows = 0usize;
        for record in rdr.records() {
            let record = record?;
            match width {
                Some(expected) if expected != record.len() => {
                    return Err(ClaransError::InvalidData(format!(
                        "row {rows} has {} fields, expected {expected}",
                        record.len()
                    )));
                }
                Some(_) => {}
                None => width = Some(record.len()),
            }
            for field in record.iter() {
                values.push(field.trim().parse::<f64>()?);
            }
            rows += 1;
        }
        let Some(dim) = width else {
            return Ok(Array2::zeros((0, 0)));
        };
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ClaransError::InvalidData(
                "dataset contains non-finite values".into(),
            ));
        }
        Array2::from_shape_vec((rows, dim), values)
            .map_err(|err| ClaransError::InvalidData(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use std::io::Write;

    #[test]
    fn blobs_stay_near_their_means() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let means = array![[0.0, 0.0], [100.0, 100.0]];
        let points = generate_clustered_points(50, &means, 0.5, &mut rng).unwrap();
        assert_eq!(points.dim(), (100, 2));
        assert!(points.row(10).iter().all(|v| v.abs() < 5.0));
        assert!(points.row(60).iter().all(|v| (v - 100.0).abs() < 5.0));
    }

    #[test]
    fn negative_spread_is_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let means = array![[0.0]];
        for spread in [-1.0, f64::NAN, f64::INFINITY] {
            let err = generate_clustered_points(5, &means, spread, &mut rng).unwrap_err();
            assert!(matches!(err, ClaransError::InvalidConfig(_)), "spread {spread}");
        }
        assert!(generate_clustered_points(5, &means, 0.0, &mut rng).is_ok());
    }

    #[test]
    fn uniform_points_are_reproducible() {
        let a = generate_points(20, 3, &mut ChaCha8Rng::seed_from_u64(8));
        let b = generate_points(20, 3, &mut ChaCha8Rng::seed_from_u64(8));
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn csv_round_trip_and_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("points.csv");
        let mut file = std::fs::File::create(&good).unwrap();
        writeln!(file, "x,y\n1.0,2.0\n3.5, 4\n").unwrap();
        drop(file);
        let data = DataLoader::load_csv(&good).unwrap();
        assert_eq!(data, array![[1.0, 2.0], [3.5, 4.0]]);

        let bad = dir.path().join("ragged.csv");
        std::fs::write(&bad, "x,y\n1,2\n3\n").unwrap();
        let err = DataLoader::load_csv(&bad).unwrap_err();
        assert!(matches!(err, ClaransError::InvalidData(_) | ClaransError::Csv(_)));
    }
}
