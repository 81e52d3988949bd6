//! Proposal search strategies for one round.

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::cache::ClusterView;
use crate::config::Level;
use crate::evaluator::Evaluator;
use crate::metric::Metric;
use crate::sampler::{Proposal, ProposalSampler};

/// Result of searching for an improving proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SearchOutcome {
    /// Proposal to commit and its energy change, if one improves.
    pub(crate) best: Option<(Proposal, f64)>,
    /// Proposals drawn and evaluated.
    pub(crate) proposals: usize,
}

/// Limits shared by both strategies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchBudget {
    pub(crate) max_proposals: usize,
    /// Hard wall-clock limit of the whole run.
    pub(crate) deadline: Instant,
}

impl SearchBudget {
    fn time_remaining(&self) -> bool {
        Instant::now() < self.deadline
    }
}

/// Evaluate proposals one at a time and stop at the first improving one.
/// Scans inside each evaluation use the evaluator's worker threads.
pub(crate) fn greedy<S: ClusterView, M: Metric>(
    evaluator: &Evaluator<'_, S, M>,
    level: Level,
    sampler: &mut ProposalSampler,
    budget: SearchBudget,
) -> SearchOutcome {
    let mut proposals = 0;
    while proposals < budget.max_proposals && budget.time_remaining() {
        let Some(proposal) = sampler.draw(evaluator.store) else {
            break;
        };
        proposals += 1;
        let delta = evaluator.evaluate(level, &proposal, false);
        tracing::trace!(?proposal, ?delta, "greedy proposal");
        if delta.is_improving() {
            return SearchOutcome {
                best: Some((proposal, delta.value())),
                proposals,
            };
        }
    }
    SearchOutcome {
        best: None,
        proposals,
    }
}

struct SharedSearch<'s> {
    sampler: &'s mut ProposalSampler,
    best: Option<(Proposal, f64)>,
    proposals: usize,
}

/// Evaluate proposals on `threads` workers for at least `time_limit`, then
/// keep going until something improves or the proposal/time budget runs out.
/// The most improving proposal seen by any worker wins.
pub(crate) fn patient<S: ClusterView, M: Metric>(
    evaluator: &Evaluator<'_, S, M>,
    level: Level,
    sampler: &mut ProposalSampler,
    threads: usize,
    time_limit: Duration,
    budget: SearchBudget,
) -> SearchOutcome {
    let shared = Mutex::new(SharedSearch {
        sampler,
        best: None,
        proposals: 0,
    });
    let started = Instant::now();

    thread::scope(|scope| {
        for _ in 0..threads.max(1) {
            scope.spawn(|| patient_worker(evaluator, level, &shared, started, time_limit, budget));
        }
    });

    let shared = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
    SearchOutcome {
        best: shared.best,
        proposals: shared.proposals,
    }
}

fn patient_worker<S: ClusterView, M: Metric>(
    evaluator: &Evaluator<'_, S, M>,
    level: Level,
    shared: &Mutex<SharedSearch<'_>>,
    started: Instant,
    time_limit: Duration,
    budget: SearchBudget,
) {
    let mut local = 0usize;
    loop {
        let proposal = {
            let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
            let keep_going = local == 0
                || started.elapsed() < time_limit
                || (guard.best.is_none()
                    && guard.proposals < budget.max_proposals
                    && budget.time_remaining());
            if !keep_going {
                return;
            }
            match guard.sampler.draw(evaluator.store) {
                Some(proposal) => {
                    guard.proposals += 1;
                    proposal
                }
                None => return,
            }
        };

        let delta = evaluator.evaluate(level, &proposal, true);
        local += 1;
        if delta.is_improving() {
            let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
            let value = delta.value();
            if guard.best.map_or(true, |(_, best)| value < best) {
                guard.best = Some((proposal, value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ClusterStore;
    use crate::centers::CenterGeometry;
    use crate::config::{ClaransConfig, L3Settings, L3Variant};
    use crate::energy::Energy;
    use crate::metric::{DenseMetric, Norm, Oracle};
    use crate::optimizer::Clarans;
    use ndarray::Array2;
    use std::sync::atomic::AtomicU64;

    fn state() -> (DenseMetric, ClusterStore, CenterGeometry) {
        let data = Array2::from_shape_vec((6, 1), vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0]).unwrap();
        let metric = DenseMetric::new(data, Norm::L2);
        let config = ClaransConfig {
            k: 2,
            ..ClaransConfig::default()
        };
        let mut clarans = Clarans::new(metric.clone(), config).unwrap();
        // Both centers start at cluster edges so several moves improve.
        clarans.initialize(&[0, 5]).unwrap();
        (metric, clarans.store().clone(), clarans.geometry().clone())
    }

    fn budget(max_proposals: usize) -> SearchBudget {
        SearchBudget {
            max_proposals,
            deadline: Instant::now() + Duration::from_secs(60),
        }
    }

    #[test]
    fn greedy_stops_at_first_improvement() {
        let (metric, store, geometry) = state();
        let calls = AtomicU64::new(0);
        let l3 = L3Settings::default();
        let evaluator = Evaluator {
            store: &store,
            geometry: &geometry,
            oracle: Oracle::new(&metric, Energy::Identity, &calls),
            l3_variant: L3Variant::Heuristic,
            l3: &l3,
            threads: 1,
        };
        let mut sampler = ProposalSampler::new(3);
        let outcome = greedy(&evaluator, Level::L2, &mut sampler, budget(1000));
        let (_, delta) = outcome.best.unwrap();
        assert!(delta < 0.0);
        assert!(outcome.proposals >= 1);
    }

    #[test]
    fn greedy_respects_the_proposal_cap() {
        let (metric, store, geometry) = state();
        let calls = AtomicU64::new(0);
        let l3 = L3Settings::default();
        let evaluator = Evaluator {
            store: &store,
            geometry: &geometry,
            oracle: Oracle::new(&metric, Energy::Identity, &calls),
            l3_variant: L3Variant::Heuristic,
            l3: &l3,
            threads: 1,
        };
        let mut sampler = ProposalSampler::new(3);
        let outcome = greedy(&evaluator, Level::L2, &mut sampler, budget(0));
        assert_eq!(outcome, SearchOutcome { best: None, proposals: 0 });
    }

    #[test]
    fn patient_returns_the_best_seen() {
        let (metric, store, geometry) = state();
        let calls = AtomicU64::new(0);
        let l3 = L3Settings::default();
        let evaluator = Evaluator {
            store: &store,
            geometry: &geometry,
            oracle: Oracle::new(&metric, Energy::Identity, &calls),
            l3_variant: L3Variant::Heuristic,
            l3: &l3,
            threads: 3,
        };
        let mut sampler = ProposalSampler::new(5);
        let outcome = patient(
            &evaluator,
            Level::L1,
            &mut sampler,
            3,
            Duration::from_millis(20),
            budget(10_000),
        );
        let (proposal, delta) = outcome.best.unwrap();
        assert!(outcome.proposals >= 3);
        let exact = evaluator.evaluate(Level::L0, &proposal, true).value();
        assert!((exact - delta).abs() < 1e-12);
        // Moving both centers to the middle items is the best possible single move: -1 each.
        assert!((delta + 1.0).abs() < 1e-12, "{delta}");
    }
}
