use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{StakeError, StakeResult};

/// Number of stake tiers a supernode can qualify for.
pub const TIERS: usize = 4;

/// Atomic units per coin.
pub const COIN: u64 = 10_000_000_000;

/// On-disk artifact holding the accepted stake transaction log.
pub const STAKE_STORAGE_FILE_NAME: &str = "stake_transactions.v2.bin";

/// On-disk artifact holding the rolling blockchain-based list history.
pub const BLOCKCHAIN_BASED_LIST_FILE_NAME: &str = "blockchain_based_list.v5.bin";

/// Protocol parameters for stake processing and supernode list building.
///
/// Defaults carry the network values; test networks override individual
/// fields. All heights and periods are counted in blocks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Minimum aggregated stake for each tier, in atomic units, ascending.
    pub tier_amounts: [u64; TIERS],
    pub stake_min_unlock_time: u64,
    pub stake_max_unlock_time: u64,
    /// Blocks after mining before a stake becomes effective.
    pub stake_validation_period: u64,
    /// Grace window past unlock during which a stake still counts.
    pub trusted_restaking_period: u64,
    /// Number of per-block list snapshots retained for committee lookups.
    pub supernode_history_size: usize,
    pub required_bbqs_votes: usize,
    pub required_disqual2_votes: usize,
    /// Hard-fork version at which stake transaction processing activates.
    pub stake_processing_fork_version: u8,
    /// Blocks a quorum disqualification stays in force.
    pub disqualification_duration: u64,
    /// Blocks a per-payment disqualification stays in force.
    pub disqualification2_duration: u64,
    #[serde(default = "default_bbqs_size")]
    pub bbqs_size: usize,
    #[serde(default = "default_qcl_size")]
    pub qcl_size: usize,
    #[serde(default = "default_auth_sample_size")]
    pub auth_sample_size: usize,
}

fn default_bbqs_size() -> usize {
    8
}

fn default_qcl_size() -> usize {
    8
}

fn default_auth_sample_size() -> usize {
    8
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            tier_amounts: [
                50_000 * COIN,
                90_000 * COIN,
                150_000 * COIN,
                250_000 * COIN,
            ],
            stake_min_unlock_time: 50,
            stake_max_unlock_time: 500_000,
            stake_validation_period: 6,
            trusted_restaking_period: 6,
            supernode_history_size: 1_000,
            required_bbqs_votes: 8,
            required_disqual2_votes: 6,
            stake_processing_fork_version: 13,
            disqualification_duration: 720,
            disqualification2_duration: 20,
            bbqs_size: default_bbqs_size(),
            qcl_size: default_qcl_size(),
            auth_sample_size: default_auth_sample_size(),
        }
    }
}

impl ProtocolConfig {
    pub fn load(path: &Path) -> StakeResult<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| StakeError::Config(format!("unable to parse protocol config: {err}")))
    }

    pub fn save(&self, path: &Path) -> StakeResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| StakeError::Config(format!("unable to encode protocol config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    /// Tier obtained by an aggregated stake amount: `1..=TIERS`, or `0` when
    /// the amount is below the first tier threshold.
    pub fn tier_of(&self, amount: u64) -> usize {
        self.tier_amounts
            .iter()
            .take_while(|threshold| amount >= **threshold)
            .count()
    }
}
