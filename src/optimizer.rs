//! The CLARANS driver: initialisation, rounds and stopping rules.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cache::{ClusterStore, ClusterView, Member};
use crate::centers::{nearest_two, CenterGeometry};
use crate::config::{ClaransConfig, InitStrategy, Level, SearchStrategy};
use crate::evaluator::{Delta, Evaluator};
use crate::metric::{Metric, Oracle};
use crate::sampler::{Proposal, ProposalSampler};
use crate::scheduler::{self, SearchBudget};
use crate::seeding;
use crate::update::{self, UpdateReport};
use crate::{ClaransError, Result};

/// Why [`Clarans::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// A round found no improving proposal.
    NoImprovement,
    MaxRounds,
    TimeLimit,
    /// Mean energy reached `min_mean_energy`.
    EnergyTarget,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::NoImprovement => write!(f, "no-improvement"),
            StopReason::MaxRounds => write!(f, "max-rounds"),
            StopReason::TimeLimit => write!(f, "time-limit"),
            StopReason::EnergyTarget => write!(f, "energy-target"),
        }
    }
}

/// Summary of a completed [`Clarans::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub rounds: usize,
    pub accepted: usize,
    pub proposals: usize,
    pub distance_calls: u64,
    pub energy: f64,
    pub mean_energy: f64,
    pub elapsed_secs: f64,
    pub stop_reason: StopReason,
}

/// CLARANS k-medoids over any [`Metric`].
///
/// ```no_run
/// use clarans_parallel::{Clarans, ClaransConfig, DenseMetric, Norm};
/// # fn main() -> clarans_parallel::Result<()> {
/// let data = ndarray::array![[0.0], [1.0], [2.0], [10.0], [11.0], [12.0]];
/// let config = ClaransConfig { k: 2, ..ClaransConfig::default() };
/// let mut clarans = Clarans::new(DenseMetric::new(data, Norm::L2), config)?;
/// clarans.initialize(&[0, 3])?;
/// let outcome = clarans.run()?;
/// println!("{} -> {:?}", outcome.energy, clarans.final_assignment());
/// # Ok(())
/// # }
/// ```
pub struct Clarans<M: Metric> {
    metric: M,
    config: ClaransConfig,
    store: ClusterStore,
    geometry: CenterGeometry,
    sampler: ProposalSampler,
    calls: AtomicU64,
    started: Option<Instant>,
    rounds: usize,
    accepted: usize,
    proposals: usize,
    time_in_proposals: Duration,
    time_in_updates: Duration,
}

impl<M: Metric> Clarans<M> {
    /// Validate `config` against the metric's item count.
    pub fn new(metric: M, config: ClaransConfig) -> Result<Self> {
        config.validate(metric.len())?;
        let seed = config.seed;
        Ok(Self {
            metric,
            config,
            store: ClusterStore::new(Vec::new()),
            geometry: CenterGeometry::default(),
            sampler: ProposalSampler::new(seed),
            calls: AtomicU64::new(0),
            started: None,
            rounds: 0,
            accepted: 0,
            proposals: 0,
            time_in_proposals: Duration::ZERO,
            time_in_updates: Duration::ZERO,
        })
    }

    pub fn config(&self) -> &ClaransConfig {
        &self.config
    }

    pub fn metric(&self) -> &M {
        &self.metric
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    pub fn geometry(&self) -> &CenterGeometry {
        &self.geometry
    }

    #[cfg(test)]
    pub(crate) fn store_mut(&mut self) -> &mut ClusterStore {
        &mut self.store
    }

    /// Center item of each cluster.
    pub fn centers(&self) -> &[usize] {
        self.store.centers()
    }

    /// Metric evaluations performed by the optimiser so far.
    pub fn distance_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Cumulative time spent searching for proposals.
    pub fn time_in_proposals(&self) -> Duration {
        self.time_in_proposals
    }

    /// Cumulative time spent committing proposals and repairing caches.
    pub fn time_in_updates(&self) -> Duration {
        self.time_in_updates
    }

    fn oracle(&self) -> Oracle<'_, M> {
        Oracle::new(&self.metric, self.config.energy, &self.calls)
    }

    /// Seed with the caller's `centers` (one distinct item per cluster) and
    /// build every cache from scratch.
    pub fn initialize(&mut self, centers: &[usize]) -> Result<()> {
        let n = self.metric.len();
        if centers.len() != self.config.k {
            return Err(ClaransError::SizeMismatch(format!(
                "expected {} centers, got {}",
                self.config.k,
                centers.len()
            )));
        }
        let mut is_center = vec![false; n];
        for &c in centers {
            if c >= n {
                return Err(ClaransError::SizeMismatch(format!(
                    "center {c} is out of range for {n} items"
                )));
            }
            if std::mem::replace(&mut is_center[c], true) {
                return Err(ClaransError::SizeMismatch(format!(
                    "center {c} appears more than once"
                )));
            }
        }

        let oracle = Oracle::new(&self.metric, self.config.energy, &self.calls);
        let pairs: Vec<Member> = (0..n)
            .into_par_iter()
            .filter(|&i| !is_center[i])
            .map(|item| Member {
                item,
                pair: nearest_two(item, centers, &oracle),
            })
            .collect();

        let mut store = ClusterStore::new(centers.to_vec());
        for member in pairs {
            store.append(member.pair.primary.index, member);
        }
        store.refresh_statistics();
        self.geometry = CenterGeometry::build(
            centers,
            self.config.level.tracks_nearest_center(),
            self.config.level.tracks_matrix(),
            &oracle,
        );
        self.store = store;
        self.sampler = ProposalSampler::new(self.config.seed);
        self.started = Some(Instant::now());
        self.rounds = 0;
        self.accepted = 0;
        self.proposals = 0;
        self.time_in_proposals = Duration::ZERO;
        self.time_in_updates = Duration::ZERO;

        info!(
            k = self.config.k,
            n,
            level = %self.config.level,
            energy = self.current_energy(),
            distance_calls = self.distance_calls(),
            "initialised clusters"
        );
        if self.config.with_tests {
            self.run_all_tests()?;
        }
        Ok(())
    }

    /// Seed with the configured [`InitStrategy`].
    pub fn initialize_with_strategy(&mut self) -> Result<()> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let centers = match self.config.init {
            InitStrategy::Random => {
                seeding::uniform_medoids(self.metric.len(), self.config.k, &mut rng)?
            }
            InitStrategy::KMeansPlusPlus => {
                let oracle = self.oracle();
                seeding::kmeans_plus_plus_counted(
                    &oracle,
                    self.metric.len(),
                    self.config.k,
                    &mut rng,
                )?
            }
        };
        self.initialize(&centers)
    }

    fn ensure_initialized(&self) -> Result<Instant> {
        self.started.ok_or_else(|| {
            ClaransError::InvalidConfig("initialize must be called before running".into())
        })
    }

    fn check_proposal(&self, proposal: &Proposal) -> Result<()> {
        let n_clusters = self.store.num_clusters();
        let Proposal { k1, k2, j2, .. } = *proposal;
        if k1 >= n_clusters || k2 >= n_clusters {
            return Err(ClaransError::SizeMismatch(format!(
                "proposal ({k1}, {k2}, {j2}) names a cluster outside 0..{n_clusters}"
            )));
        }
        let ndata = self.store.ndata(k2);
        if j2 >= ndata {
            return Err(ClaransError::SizeMismatch(format!(
                "proposal ({k1}, {k2}, {j2}) names member {j2} of a cluster with {ndata} members"
            )));
        }
        Ok(())
    }

    /// Energy change of `proposal` at `level`, without committing it.
    pub fn evaluate(&self, proposal: &Proposal, level: Level) -> Result<Delta> {
        self.check_proposal(proposal)?;
        let evaluator = Evaluator {
            store: &self.store,
            geometry: &self.geometry,
            oracle: self.oracle(),
            l3_variant: self.config.l3_variant,
            l3: &self.config.l3,
            threads: self.config.threads,
        };
        Ok(evaluator.evaluate(level, proposal, false))
    }

    /// Commit `proposal` regardless of its energy change.
    pub fn commit(&mut self, proposal: &Proposal) -> Result<UpdateReport> {
        self.check_proposal(proposal)?;
        Ok(self.accept(proposal))
    }

    fn accept(&mut self, proposal: &Proposal) -> UpdateReport {
        let oracle = Oracle::new(&self.metric, self.config.energy, &self.calls);
        update::accept(
            &mut self.store,
            &mut self.geometry,
            oracle,
            self.config.level,
            self.config.threads,
            proposal,
        )
    }

    /// Search for an improving proposal and commit it. Returns whether one
    /// was accepted.
    pub fn run_round(&mut self) -> Result<bool> {
        let started = self.ensure_initialized()?;
        let budget = SearchBudget {
            max_proposals: self.config.max_proposals,
            deadline: started + Duration::from_secs_f64(self.config.max_time_secs),
        };

        let t0 = Instant::now();
        let outcome = {
            let evaluator = Evaluator {
                store: &self.store,
                geometry: &self.geometry,
                oracle: Oracle::new(&self.metric, self.config.energy, &self.calls),
                l3_variant: self.config.l3_variant,
                l3: &self.config.l3,
                threads: self.config.threads,
            };
            match self.config.strategy {
                SearchStrategy::Greedy => {
                    scheduler::greedy(&evaluator, self.config.level, &mut self.sampler, budget)
                }
                SearchStrategy::Patient => {
                    let time_limit = self.time_in_updates.saturating_sub(self.time_in_proposals);
                    scheduler::patient(
                        &evaluator,
                        self.config.level,
                        &mut self.sampler,
                        self.config.threads,
                        time_limit,
                        budget,
                    )
                }
            }
        };
        self.time_in_proposals += t0.elapsed();
        self.proposals += outcome.proposals;
        self.rounds += 1;

        let Some((proposal, delta)) = outcome.best else {
            debug!(
                round = self.rounds,
                proposals = outcome.proposals,
                "no improving proposal"
            );
            return Ok(false);
        };

        let t1 = Instant::now();
        let report = self.accept(&proposal);
        self.time_in_updates += t1.elapsed();
        self.accepted += 1;
        debug!(
            round = self.rounds,
            k_to = proposal.k1,
            k_from = proposal.k2,
            delta,
            energy = self.current_energy(),
            proposals = outcome.proposals,
            redistributed = report.redistributed,
            "accepted proposal"
        );
        if self.config.with_tests {
            self.run_all_tests()?;
        }
        Ok(true)
    }

    /// Repeat rounds until a stopping rule fires.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let started = self.ensure_initialized()?;
        let clock = Instant::now();
        info!(
            k = self.config.k,
            level = %self.config.level,
            strategy = %self.config.strategy,
            threads = self.config.threads,
            "starting clarans"
        );

        let max_time = Duration::from_secs_f64(self.config.max_time_secs);
        let stop_reason = loop {
            if self.mean_energy() <= self.config.min_mean_energy {
                break StopReason::EnergyTarget;
            }
            if self.rounds >= self.config.max_rounds {
                break StopReason::MaxRounds;
            }
            if started.elapsed() >= max_time {
                break StopReason::TimeLimit;
            }
            if !self.run_round()? {
                break if started.elapsed() >= max_time {
                    StopReason::TimeLimit
                } else {
                    StopReason::NoImprovement
                };
            }
        };

        let outcome = RunOutcome {
            rounds: self.rounds,
            accepted: self.accepted,
            proposals: self.proposals,
            distance_calls: self.distance_calls(),
            energy: self.current_energy(),
            mean_energy: self.mean_energy(),
            elapsed_secs: clock.elapsed().as_secs_f64(),
            stop_reason,
        };
        info!(
            energy = outcome.energy,
            rounds = outcome.rounds,
            accepted = outcome.accepted,
            proposals = outcome.proposals,
            distance_calls = outcome.distance_calls,
            took_seconds = outcome.elapsed_secs,
            stop_reason = %outcome.stop_reason,
            "clarans finished"
        );
        Ok(outcome)
    }

    /// Total energy from the maintained statistics.
    pub fn current_energy(&self) -> f64 {
        self.store.total_energy()
    }

    /// Energy per item.
    pub fn mean_energy(&self) -> f64 {
        let n = self.metric.len();
        if n == 0 {
            0.0
        } else {
            self.current_energy() / n as f64
        }
    }

    /// Total energy with every item assigned to its nearest center, computed
    /// without any cache. Not counted in [`Clarans::distance_calls`].
    pub fn energy_from_scratch(&self) -> f64 {
        let centers = self.store.centers();
        let energy = self.config.energy;
        let mut per_item: Vec<f64> = (0..self.metric.len())
            .into_par_iter()
            .map(|item| {
                if centers.contains(&item) {
                    return 0.0;
                }
                let d = centers
                    .iter()
                    .map(|&c| self.metric.distance(c, item))
                    .fold(f64::INFINITY, f64::min);
                energy.apply(d)
            })
            .collect();
        per_item.sort_by(f64::total_cmp);
        per_item.iter().sum()
    }

    /// Cluster label for every item; centers carry their own cluster.
    pub fn final_assignment(&self) -> Vec<usize> {
        self.store.labels(self.metric.len())
    }
}

impl<M: Metric> fmt::Debug for Clarans<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clarans")
            .field("config", &self.config)
            .field("centers", &self.store.centers())
            .field("rounds", &self.rounds)
            .field("accepted", &self.accepted)
            .field("energy", &self.current_energy())
            .finish()
    }
}
