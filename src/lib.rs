//! Parallel CLARANS k-medoids with tiered, triangle-inequality accelerated
//! proposal evaluation.
//!
//! A run keeps `K` medoids ("centers") drawn from the dataset and repeatedly
//! evaluates swap proposals: replace the center of one cluster with a member
//! of another. Four levels trade bookkeeping for fewer distance
//! evaluations; every level commits exactly the same energy change.
//! Level 0 scans every item, level 1 skips clusters using per-cluster margin
//! statistics, level 2 adds a center-to-center distance matrix, and level 3
//! first estimates the change on a sample and rejects hopeless proposals
//! early.
//!
//! Any [`Metric`] can drive the optimiser; [`DenseMetric`] covers row-major
//! vectors under L1, L2 and L-infinity norms.

use ndarray::Array2;
use thiserror::Error;

pub mod cache;
pub mod centers;
pub mod config;
pub mod data;
pub mod diagnostics;
pub mod energy;
pub mod evaluator;
pub mod metric;
pub mod optimizer;
pub mod parallel;
pub mod sampler;
mod scheduler;
pub mod seeding;
pub mod stats;
pub mod update;

pub use cache::{ClusterStore, ClusterView, Member, NearestInfo, NearestPair};
pub use centers::{CenterGeometry, CenterMatrix};
pub use config::{ClaransConfig, InitStrategy, L3Settings, L3Variant, Level, SearchStrategy};
pub use data::{generate_clustered_points, generate_points, random_means, DataLoader};
pub use energy::Energy;
pub use evaluator::Delta;
pub use metric::{DenseMetric, Metric, Norm};
pub use optimizer::{Clarans, RunOutcome, StopReason};
pub use parallel::chunk_range;
pub use sampler::{Proposal, ProposalSampler};
pub use seeding::{kmeans_plus_plus, uniform_medoids};
pub use stats::ClusterStatistics;
pub use update::UpdateReport;

/// Dense data representation used across the crate (rows = items, columns = features).
pub type DataMatrix = Array2<f64>;

/// Error type used by operations in this crate.
#[derive(Debug, Error)]
pub enum ClaransError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Seeding or datastore sizes disagree with `N` and `K`.
    #[error("size mismatch: {0}")]
    SizeMismatch(String),
    /// A maintained cache or statistic differs from its recomputation.
    #[error("stale cache: {0}")]
    StaleCache(String),
    #[error("center distance matrix is inconsistent: {0}")]
    AsymmetricMatrix(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    ParseFloat(#[from] std::num::ParseFloatError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Convenient alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, ClaransError>;
