//! Random center-swap proposals.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::cache::ClusterView;

/// "Make member `j2` of cluster `k2` the new center of cluster `k1`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub k1: usize,
    pub k2: usize,
    pub j2: usize,
    /// Seed for randomness consumed while evaluating this proposal, so that
    /// evaluation never touches the shared generator.
    pub phase_seed: u64,
}

impl Proposal {
    pub fn new(k1: usize, k2: usize, j2: usize) -> Self {
        Self {
            k1,
            k2,
            j2,
            phase_seed: 0,
        }
    }

    /// Thread-local generator for evaluation-time sampling.
    pub fn phase_rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.phase_seed)
    }
}

/// Seeded proposal generator.
#[derive(Debug, Clone)]
pub struct ProposalSampler {
    rng: ChaCha8Rng,
}

impl ProposalSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Draw `k1` uniformly, `k2` proportionally to member count and `j2`
    /// uniformly inside `k2`. `k1 == k2` is allowed. Returns `None` when no
    /// cluster has any member to promote.
    pub fn draw<S: ClusterView + ?Sized>(&mut self, store: &S) -> Option<Proposal> {
        let n_clusters = store.num_clusters();
        let total = store.total_members();
        if n_clusters == 0 || total == 0 {
            return None;
        }
        let k1 = self.rng.gen_range(0..n_clusters);
        let k2 = self.draw_k_by_size(store, total);
        let j2 = self.rng.gen_range(0..store.ndata(k2));
        Some(Proposal {
            k1,
            k2,
            j2,
            phase_seed: self.rng.next_u64(),
        })
    }

    fn draw_k_by_size<S: ClusterView + ?Sized>(&mut self, store: &S, total: usize) -> usize {
        let mut pick = self.rng.gen_range(0..total);
        for k in 0..store.num_clusters() {
            let ndata = store.ndata(k);
            if pick < ndata {
                return k;
            }
            pick -= ndata;
        }
        unreachable!("pick is bounded by the total member count")
    }
}
