//! Committee selection over blockchain-based list snapshots.
//!
//! Disqualification checks cross-validate their signer and target sets
//! against committees drawn from a historical list snapshot. The sampler is a
//! seam: implementations must be pure functions of the seed and the snapshot
//! so every node derives identical committees.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::config::{ProtocolConfig, TIERS};
use crate::crypto::{self, PublicKey};
use crate::errors::{StakeError, StakeResult};
use crate::types::{Hash, SupernodeTierArray};

/// Position of a supernode inside a tier array: `(tier, index in tier)`.
pub type TierIndex = (usize, usize);

/// Per-tier index lists covering one list snapshot.
pub type TierIndexArray = [Vec<TierIndex>; TIERS];

/// Index lists addressing every entry of `tiers`.
pub fn make_tier_indexes(tiers: &SupernodeTierArray) -> TierIndexArray {
    let mut indexes: TierIndexArray = Default::default();
    for (tier, entries) in tiers.iter().enumerate() {
        indexes[tier] = (0..entries.len()).map(|idx| (tier, idx)).collect();
    }
    indexes
}

/// Resolves sampled indexes back to supernode identity keys.
pub fn ids_from_indexes(
    tiers: &SupernodeTierArray,
    indexes: &[TierIndex],
) -> StakeResult<Vec<PublicKey>> {
    indexes
        .iter()
        .map(|(tier, idx)| {
            let entry = tiers
                .get(*tier)
                .and_then(|entries| entries.get(*idx))
                .ok_or_else(|| {
                    StakeError::Config(format!("tier index ({tier}, {idx}) is out of range"))
                })?;
            PublicKey::from_hex(&entry.supernode_public_id)
        })
        .collect()
}

/// Deterministic committee selection from a list snapshot.
pub trait CommitteeSampler: Send + Sync {
    /// Draws the disjoint BBQS and QCL committees for a block-hash seed.
    fn select_bbqs_qcl(
        &self,
        seed: &Hash,
        tiers: &TierIndexArray,
    ) -> (Vec<TierIndex>, Vec<TierIndex>);

    /// Draws the auth sample committee for a payment id.
    fn select_auth_sample(&self, payment_id: &str, tiers: &TierIndexArray) -> Vec<TierIndex>;
}

/// Default sampler: a seeded shuffle over the flattened snapshot. BBQS and
/// QCL are disjoint prefixes of the same permutation.
pub struct DeterministicSampler {
    bbqs_size: usize,
    qcl_size: usize,
    auth_sample_size: usize,
}

impl DeterministicSampler {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            bbqs_size: config.bbqs_size,
            qcl_size: config.qcl_size,
            auth_sample_size: config.auth_sample_size,
        }
    }
}

fn flatten(tiers: &TierIndexArray) -> Vec<TierIndex> {
    tiers.iter().flatten().copied().collect()
}

fn seeded_rng(domain: &[u8], seed: &[u8]) -> ChaCha20Rng {
    let mut data = Vec::with_capacity(domain.len() + seed.len());
    data.extend_from_slice(domain);
    data.extend_from_slice(seed);
    ChaCha20Rng::from_seed(crypto::cn_fast_hash(&data).0)
}

impl CommitteeSampler for DeterministicSampler {
    fn select_bbqs_qcl(
        &self,
        seed: &Hash,
        tiers: &TierIndexArray,
    ) -> (Vec<TierIndex>, Vec<TierIndex>) {
        let mut pool = flatten(tiers);
        let mut rng = seeded_rng(b"supernode-bbqs-qcl", seed.as_bytes());
        pool.shuffle(&mut rng);
        let bbqs_len = self.bbqs_size.min(pool.len());
        let qcl_len = self.qcl_size.min(pool.len() - bbqs_len);
        let qcl = pool.split_off(bbqs_len);
        (pool, qcl[..qcl_len].to_vec())
    }

    fn select_auth_sample(&self, payment_id: &str, tiers: &TierIndexArray) -> Vec<TierIndex> {
        let mut pool = flatten(tiers);
        let mut rng = seeded_rng(b"supernode-auth-sample", payment_id.as_bytes());
        pool.shuffle(&mut rng);
        pool.truncate(self.auth_sample_size);
        pool
    }
}
