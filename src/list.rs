//! Rolling, depth-bounded history of tiered supernode lists.
//!
//! Every processed block appends one snapshot recomputed deterministically
//! from the live stakes the storage reports for that height. Snapshots older
//! than the configured history size are dropped from the front; reorgs pop
//! from the back.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProtocolConfig;
use crate::errors::{StakeError, StakeResult};
use crate::storage::{atomic_write, load_snapshot, StakeTransactionStorage};
use crate::types::{Hash, SupernodeTierArray, TierEntry};

pub const BLOCKCHAIN_BASED_LIST_FORMAT_VERSION: u32 = 5;

/// Tier list computed for one block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListSnapshot {
    pub block_height: u64,
    pub block_hash: Hash,
    pub tiers: SupernodeTierArray,
}

#[derive(Serialize, Deserialize)]
struct ListFile {
    version: u32,
    block_height: u64,
    history: VecDeque<ListSnapshot>,
}

pub struct BlockchainBasedList {
    path: Option<PathBuf>,
    block_height: u64,
    history: VecDeque<ListSnapshot>,
    need_store: bool,
    config: ProtocolConfig,
}

impl BlockchainBasedList {
    /// Opens the list, loading the snapshot history at `path` when one
    /// exists; a foreign or unreadable snapshot restarts from `first_block`.
    pub fn new(
        path: Option<PathBuf>,
        first_block: u64,
        config: ProtocolConfig,
    ) -> StakeResult<Self> {
        let mut list = Self {
            path,
            block_height: first_block,
            history: VecDeque::new(),
            need_store: false,
            config,
        };
        if let Some(path) = list.path.clone() {
            match load_snapshot::<ListFile>(&path, BLOCKCHAIN_BASED_LIST_FORMAT_VERSION, |f| {
                f.version
            }) {
                Ok(Some(file)) => {
                    list.block_height = file.block_height;
                    list.history = file.history;
                    debug!(
                        path = %path.display(),
                        block_height = list.block_height,
                        history_depth = list.history.len(),
                        "loaded blockchain based list"
                    );
                }
                Ok(None) => {}
                Err(err @ StakeError::VersionMismatch { .. })
                | Err(err @ StakeError::Serialization(_)) => {
                    warn!(
                        path = %path.display(),
                        %err,
                        "discarding blockchain based list snapshot, rebuilding from scratch"
                    );
                    list.need_store = true;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(list)
    }

    /// Recomputes the tier list for `block_index` from the storage's live
    /// stakes and pushes it onto the history. Already-applied heights are
    /// skipped; a height gap is a logic error.
    pub fn apply_block(
        &mut self,
        block_index: u64,
        block_hash: Hash,
        storage: &mut StakeTransactionStorage,
    ) -> StakeResult<()> {
        if block_index <= self.block_height {
            return Ok(());
        }
        if block_index != self.block_height + 1 {
            return Err(StakeError::Config(format!(
                "blockchain based list cannot skip from block {} to {block_index}",
                self.block_height
            )));
        }

        let mut tiers: SupernodeTierArray = Default::default();
        for stake in storage.get_supernode_stakes(block_index) {
            if stake.tier == 0 {
                continue;
            }
            tiers[stake.tier - 1].push(TierEntry {
                supernode_public_id: stake.supernode_public_id.clone(),
                amount: stake.amount,
            });
        }
        for tier in tiers.iter_mut() {
            tier.sort_by(|a, b| {
                b.amount
                    .cmp(&a.amount)
                    .then_with(|| a.supernode_public_id.cmp(&b.supernode_public_id))
            });
        }

        self.history.push_back(ListSnapshot {
            block_height: block_index,
            block_hash,
            tiers,
        });
        while self.history.len() > self.config.supernode_history_size {
            self.history.pop_front();
        }
        self.block_height = block_index;
        self.need_store = true;
        Ok(())
    }

    /// Pops the latest snapshot for reorg handling. A no-op once the history
    /// is exhausted.
    pub fn remove_latest_block(&mut self) {
        if self.history.pop_back().is_some() {
            self.block_height -= 1;
            self.need_store = true;
        }
    }

    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    pub fn history_depth(&self) -> usize {
        self.history.len()
    }

    /// Snapshot `depth` blocks behind the latest; `depth == 0` is current.
    pub fn snapshot(&self, depth: usize) -> Option<&ListSnapshot> {
        self.history
            .len()
            .checked_sub(depth + 1)
            .and_then(|idx| self.history.get(idx))
    }

    pub fn tiers(&self, depth: usize) -> Option<&SupernodeTierArray> {
        self.snapshot(depth).map(|snapshot| &snapshot.tiers)
    }

    pub fn need_store(&self) -> bool {
        self.need_store
    }

    pub fn store(&mut self) -> StakeResult<()> {
        if let Some(path) = &self.path {
            let file = ListFile {
                version: BLOCKCHAIN_BASED_LIST_FORMAT_VERSION,
                block_height: self.block_height,
                history: self.history.clone(),
            };
            atomic_write(path, &bincode::serialize(&file)?)?;
        }
        self.need_store = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::COIN;
    use crate::crypto;
    use crate::types::{AccountPublicAddress, StakeTransaction};
    use std::fs;
    use tempfile::tempdir;

    fn stake(id: &str, amount_coins: u64) -> StakeTransaction {
        let (public, secret) = crypto::generate_keypair();
        StakeTransaction {
            hash: crypto::cn_fast_hash(id.as_bytes()),
            amount: amount_coins * COIN,
            block_height: 0,
            unlock_time: 100_000,
            supernode_public_id: id.to_string(),
            supernode_public_address: AccountPublicAddress {
                view_public_key: public,
                spend_public_key: public,
            },
            supernode_signature: crypto::generate_signature(&Hash::default(), &public, &secret)
                .expect("signature"),
            tx_secret_key: secret,
        }
    }

    fn small_config() -> ProtocolConfig {
        let mut config = ProtocolConfig::default();
        config.supernode_history_size = 3;
        // Make the height-0 fixture stakes live from the first block.
        config.stake_validation_period = 0;
        config
    }

    fn list_and_storage(config: &ProtocolConfig) -> (BlockchainBasedList, StakeTransactionStorage) {
        let list = BlockchainBasedList::new(None, 0, config.clone()).expect("list");
        let storage =
            StakeTransactionStorage::new(None, 0, config.clone()).expect("storage");
        (list, storage)
    }

    #[test]
    fn entries_are_partitioned_and_ranked() {
        let config = small_config();
        let (mut list, mut storage) = list_and_storage(&config);
        storage.add_tx(stake("cc", 60_000));
        storage.add_tx(stake("aa", 60_000));
        storage.add_tx(stake("bb", 95_000));
        storage.add_tx(stake("dd", 260_000));
        storage.add_tx(stake("ee", 10_000));

        list.apply_block(1, Hash([1; 32]), &mut storage)
            .expect("apply");

        let tiers = list.tiers(0).expect("current tiers");
        // Tier 1 holds the two equal stakes in id order.
        assert_eq!(
            tiers[0]
                .iter()
                .map(|e| e.supernode_public_id.as_str())
                .collect::<Vec<_>>(),
            vec!["aa", "cc"]
        );
        assert_eq!(tiers[1].len(), 1);
        assert_eq!(tiers[1][0].supernode_public_id, "bb");
        assert!(tiers[2].is_empty());
        assert_eq!(tiers[3][0].supernode_public_id, "dd");
    }

    #[test]
    fn history_is_bounded() {
        let config = small_config();
        let (mut list, mut storage) = list_and_storage(&config);
        for height in 1..=5 {
            list.apply_block(height, Hash([height as u8; 32]), &mut storage)
                .expect("apply");
        }
        assert_eq!(list.history_depth(), 3);
        assert_eq!(list.block_height(), 5);
        assert_eq!(list.snapshot(0).expect("top").block_height, 5);
        assert_eq!(list.snapshot(2).expect("oldest").block_height, 3);
        assert!(list.snapshot(3).is_none());
    }

    #[test]
    fn apply_is_idempotent_and_rejects_gaps() {
        let config = small_config();
        let (mut list, mut storage) = list_and_storage(&config);
        list.apply_block(1, Hash([1; 32]), &mut storage)
            .expect("apply");
        // Re-applying an old height is a silent no-op.
        list.apply_block(1, Hash([9; 32]), &mut storage)
            .expect("idempotent apply");
        assert_eq!(list.history_depth(), 1);
        assert!(list.apply_block(3, Hash([3; 32]), &mut storage).is_err());
    }

    #[test]
    fn remove_latest_block_unwinds() {
        let config = small_config();
        let (mut list, mut storage) = list_and_storage(&config);
        for height in 1..=3 {
            list.apply_block(height, Hash([height as u8; 32]), &mut storage)
                .expect("apply");
        }
        list.remove_latest_block();
        assert_eq!(list.block_height(), 2);
        assert_eq!(list.history_depth(), 2);
        list.remove_latest_block();
        list.remove_latest_block();
        assert_eq!(list.history_depth(), 0);
        // Exhausted history leaves the cursor untouched.
        list.remove_latest_block();
        assert_eq!(list.block_height(), 0);
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempdir().expect("temp dir");
        let path = dir
            .path()
            .join(crate::config::BLOCKCHAIN_BASED_LIST_FILE_NAME);
        let config = small_config();

        let mut list =
            BlockchainBasedList::new(Some(path.clone()), 0, config.clone()).expect("list");
        let mut storage =
            StakeTransactionStorage::new(None, 0, config.clone()).expect("storage");
        storage.add_tx(stake("aa", 60_000));
        for height in 1..=2 {
            list.apply_block(height, Hash([height as u8; 32]), &mut storage)
                .expect("apply");
        }
        list.store().expect("store");

        let reopened = BlockchainBasedList::new(Some(path), 0, config).expect("reopen");
        assert_eq!(reopened.block_height(), 2);
        assert_eq!(reopened.history_depth(), 2);
        assert_eq!(
            reopened.tiers(0).expect("tiers")[0][0].supernode_public_id,
            "aa"
        );
    }

    #[test]
    fn foreign_version_triggers_rebuild() {
        let dir = tempdir().expect("temp dir");
        let path = dir
            .path()
            .join(crate::config::BLOCKCHAIN_BASED_LIST_FILE_NAME);
        let file = ListFile {
            version: BLOCKCHAIN_BASED_LIST_FORMAT_VERSION + 1,
            block_height: 10,
            history: VecDeque::new(),
        };
        fs::write(&path, bincode::serialize(&file).expect("encode")).expect("write");

        let list =
            BlockchainBasedList::new(Some(path), 4, ProtocolConfig::default()).expect("open");
        assert_eq!(list.block_height(), 4);
        assert_eq!(list.history_depth(), 0);
        assert!(list.need_store());
    }
}
