//! Run configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::energy::Energy;
use crate::{ClaransError, Result};

/// Strategy used to seed initial centers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InitStrategy {
    /// Choose centers uniformly at random from the dataset.
    Random,
    /// K-Means++ seeding over the configured energy.
    #[default]
    #[serde(alias = "kmeans++", alias = "k-means++")]
    KMeansPlusPlus,
}

impl fmt::Display for InitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStrategy::Random => write!(f, "random"),
            InitStrategy::KMeansPlusPlus => write!(f, "kmeans++"),
        }
    }
}

impl std::str::FromStr for InitStrategy {
    type Err = ClaransError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "random" | "uniform" => Ok(Self::Random),
            "kmeans++" | "k-means++" => Ok(Self::KMeansPlusPlus),
            other => Err(ClaransError::InvalidConfig(format!(
                "unsupported init strategy '{other}'"
            ))),
        }
    }
}

/// How much pruning the proposal evaluator applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    /// Exact, no pruning: every item is tested against the candidate.
    L0,
    /// Exact, pruned with cached distances and candidate-to-center distances.
    L1,
    /// Exact, additionally pruned with the center-center matrix.
    #[default]
    L2,
    /// Matrix pruning plus early rejection from partial samples.
    L3,
}

impl Level {
    /// Whether nearest-other-center records are maintained.
    pub fn tracks_nearest_center(self) -> bool {
        self >= Level::L1
    }

    /// Whether the center-center matrix is maintained.
    pub fn tracks_matrix(self) -> bool {
        self >= Level::L2
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            Level::L0 => 0,
            Level::L1 => 1,
            Level::L2 => 2,
            Level::L3 => 3,
        };
        write!(f, "{level}")
    }
}

impl std::str::FromStr for Level {
    type Err = ClaransError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().trim_start_matches('l') {
            "0" => Ok(Self::L0),
            "1" => Ok(Self::L1),
            "2" => Ok(Self::L2),
            "3" => Ok(Self::L3),
            other => Err(ClaransError::InvalidConfig(format!(
                "unsupported level '{other}' (expected 0..=3)"
            ))),
        }
    }
}

/// Early-abort rule used at level 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum L3Variant {
    /// Abort as soon as the extrapolated change is non-negative.
    #[default]
    Heuristic,
    /// Abort once the extrapolated change exceeds a Hoeffding threshold.
    Hoeffding,
}

impl fmt::Display for L3Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L3Variant::Heuristic => write!(f, "heuristic"),
            L3Variant::Hoeffding => write!(f, "hoeffding"),
        }
    }
}

impl std::str::FromStr for L3Variant {
    type Err = ClaransError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "heuristic" => Ok(Self::Heuristic),
            "hoeffding" => Ok(Self::Hoeffding),
            other => Err(ClaransError::InvalidConfig(format!(
                "unsupported level-3 variant '{other}'"
            ))),
        }
    }
}

/// Tuning constants for level-3 sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L3Settings {
    /// Heuristic variant: smallest mean sample per cluster in the first round.
    pub min_mean_per_cluster: f64,
    /// Hoeffding variant: targeted sample per cluster in the first round.
    pub hoeffding_per_cluster: f64,
    /// Hoeffding variant: lower bound on the probability that an improving
    /// proposal survives every round.
    pub p_null_accept: f64,
}

impl Default for L3Settings {
    fn default() -> Self {
        Self {
            min_mean_per_cluster: 24.0,
            hoeffding_per_cluster: 200.0,
            p_null_accept: 0.01,
        }
    }
}

impl L3Settings {
    fn validate(&self) -> Result<()> {
        if !(self.min_mean_per_cluster.is_finite() && self.min_mean_per_cluster > 0.0) {
            return Err(ClaransError::InvalidConfig(
                "l3.min_mean_per_cluster must be finite and > 0".into(),
            ));
        }
        if !(self.hoeffding_per_cluster.is_finite() && self.hoeffding_per_cluster > 0.0) {
            return Err(ClaransError::InvalidConfig(
                "l3.hoeffding_per_cluster must be finite and > 0".into(),
            ));
        }
        if !(0.0 < self.p_null_accept && self.p_null_accept < 1.0) {
            return Err(ClaransError::InvalidConfig(
                "l3.p_null_accept must be in (0, 1)".into(),
            ));
        }
        Ok(())
    }

    /// Number of sampling rounds for the heuristic variant.
    pub fn heuristic_rounds(&self, n_per_cluster: f64) -> usize {
        if n_per_cluster <= self.min_mean_per_cluster {
            1
        } else {
            (1.0 - (self.min_mean_per_cluster / n_per_cluster).log2()).floor() as usize
        }
    }

    /// Number of sampling rounds for the Hoeffding variant.
    pub fn hoeffding_rounds(&self, n_per_cluster: f64) -> usize {
        let rounds = (n_per_cluster / self.hoeffding_per_cluster).log2().ceil();
        if rounds.is_finite() && rounds >= 1.0 {
            rounds as usize
        } else {
            1
        }
    }
}

/// Proposal scheduling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SearchStrategy {
    /// Serial: the first improving proposal wins.
    #[default]
    Greedy,
    /// Worker threads: best improving proposal within a time budget wins.
    Patient,
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchStrategy::Greedy => write!(f, "greedy"),
            SearchStrategy::Patient => write!(f, "patient"),
        }
    }
}

/// Configurable knobs for a CLARANS run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClaransConfig {
    /// Number of clusters (centers).
    pub k: usize,
    /// Evaluator pruning level.
    pub level: Level,
    /// Early-abort rule at level 3.
    pub l3_variant: L3Variant,
    /// Level-3 sampling constants.
    pub l3: L3Settings,
    /// Proposal scheduling.
    pub strategy: SearchStrategy,
    /// Worker threads per parallel phase.
    pub threads: usize,
    /// Maximum proposals evaluated in one round.
    pub max_proposals: usize,
    /// Maximum number of rounds.
    pub max_rounds: usize,
    /// Wall-clock budget for the whole run, in seconds.
    pub max_time_secs: f64,
    /// Stop once the mean energy per item falls to this value.
    pub min_mean_energy: f64,
    /// Distance-to-energy transform.
    pub energy: Energy,
    /// Seed for initialisation and proposals.
    pub seed: u64,
    /// Center initialisation strategy.
    pub init: InitStrategy,
    /// Run every self-test after initialisation and after each accepted round.
    pub with_tests: bool,
}

impl Default for ClaransConfig {
    fn default() -> Self {
        Self {
            k: 8,
            level: Level::default(),
            l3_variant: L3Variant::default(),
            l3: L3Settings::default(),
            strategy: SearchStrategy::default(),
            threads: 1,
            max_proposals: 10_000,
            max_rounds: 10_000,
            max_time_secs: 10.0,
            min_mean_energy: 0.0,
            energy: Energy::default(),
            seed: 42,
            init: InitStrategy::default(),
            with_tests: false,
        }
    }
}

impl ClaransConfig {
    /// Validate configuration parameters for a dataset of `n_items`.
    pub fn validate(&self, n_items: usize) -> Result<()> {
        if self.k < 2 {
            return Err(ClaransError::InvalidConfig(
                "k must be at least 2".into(),
            ));
        }
        if n_items < self.k {
            return Err(ClaransError::InvalidConfig(format!(
                "dataset has {n_items} items but k = {}; add more data or decrease k",
                self.k
            )));
        }
        if self.threads == 0 {
            return Err(ClaransError::InvalidConfig(
                "threads must be at least 1".into(),
            ));
        }
        if self.max_proposals == 0 {
            return Err(ClaransError::InvalidConfig(
                "max_proposals must be greater than zero".into(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(ClaransError::InvalidConfig(
                "max_rounds must be greater than zero".into(),
            ));
        }
        if !(self.max_time_secs.is_finite() && self.max_time_secs > 0.0) {
            return Err(ClaransError::InvalidConfig(
                "max_time_secs must be finite and > 0".into(),
            ));
        }
        if self.min_mean_energy.is_nan() {
            return Err(ClaransError::InvalidConfig(
                "min_mean_energy must not be NaN".into(),
            ));
        }
        self.energy.validate()?;
        if self.level == Level::L3 {
            self.l3.validate()?;
        }
        Ok(())
    }
}
