//! Persistent log of accepted stake transactions and disqualifications.
//!
//! The storage appends per-block results as the processor ingests the chain
//! and can undo exactly one block at a time for reorg handling. From the raw
//! log it materializes, per queried height, the aggregated live-stake and
//! live-disqualification views consumed by the blockchain-based list and by
//! subscribers.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProtocolConfig;
use crate::errors::{StakeError, StakeResult};
use crate::types::{
    Disqualification, Disqualification2Record, Hash, StakeTransaction, SupernodeDisqualification,
    SupernodeStake,
};

pub const STAKE_STORAGE_FORMAT_VERSION: u32 = 2;

/// A block the processor has fully ingested.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessedBlock {
    pub index: u64,
    pub hash: Hash,
}

#[derive(Serialize, Deserialize)]
struct StorageSnapshot {
    version: u32,
    first_block: u64,
    stake_txs: Vec<StakeTransaction>,
    blocks: Vec<ProcessedBlock>,
    disqualifications: Vec<Disqualification>,
    disqualifications2: Vec<Disqualification2Record>,
}

pub struct StakeTransactionStorage {
    path: Option<PathBuf>,
    first_block: u64,
    stake_txs: Vec<StakeTransaction>,
    blocks: Vec<ProcessedBlock>,
    disqualifications: Vec<Disqualification>,
    disqualifications2: Vec<Disqualification2Record>,
    // Per-height views, rebuilt lazily for the height in `view_block`.
    supernode_stakes: Vec<SupernodeStake>,
    supernode_disqualifications: Vec<SupernodeDisqualification>,
    view_block: Option<u64>,
    need_store: bool,
    config: ProtocolConfig,
}

impl StakeTransactionStorage {
    /// Opens the storage, loading the snapshot at `path` when one exists. A
    /// snapshot with a foreign format version (or one that no longer parses)
    /// is discarded and the log restarts from `first_block`.
    pub fn new(
        path: Option<PathBuf>,
        first_block: u64,
        config: ProtocolConfig,
    ) -> StakeResult<Self> {
        let mut storage = Self {
            path,
            first_block,
            stake_txs: Vec::new(),
            blocks: Vec::new(),
            disqualifications: Vec::new(),
            disqualifications2: Vec::new(),
            supernode_stakes: Vec::new(),
            supernode_disqualifications: Vec::new(),
            view_block: None,
            need_store: false,
            config,
        };
        if let Some(path) = storage.path.clone() {
            match load_snapshot::<StorageSnapshot>(&path, STAKE_STORAGE_FORMAT_VERSION, |s| {
                s.version
            }) {
                Ok(Some(snapshot)) => {
                    storage.first_block = snapshot.first_block;
                    storage.stake_txs = snapshot.stake_txs;
                    storage.blocks = snapshot.blocks;
                    storage.disqualifications = snapshot.disqualifications;
                    storage.disqualifications2 = snapshot.disqualifications2;
                    debug!(
                        path = %path.display(),
                        last_processed = storage.last_processed_block_index(),
                        tx_count = storage.stake_txs.len(),
                        "loaded stake transaction storage"
                    );
                }
                Ok(None) => {}
                Err(err @ StakeError::VersionMismatch { .. })
                | Err(err @ StakeError::Serialization(_)) => {
                    warn!(
                        path = %path.display(),
                        %err,
                        "discarding stake transaction snapshot, rebuilding from scratch"
                    );
                    storage.need_store = true;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(storage)
    }

    pub fn first_block(&self) -> u64 {
        self.first_block
    }

    /// Appends an accepted stake transaction. Duplicate transaction ids are
    /// not filtered here; consensus admission gates them before this call.
    pub fn add_tx(&mut self, tx: StakeTransaction) {
        self.stake_txs.push(tx);
        self.view_block = None;
        self.need_store = true;
    }

    /// Appends the v1 disqualifications produced for one block.
    pub fn add_disqualifications(&mut self, items: Vec<Disqualification>) {
        if items.is_empty() {
            return;
        }
        self.disqualifications.extend(items);
        self.view_block = None;
        self.need_store = true;
    }

    /// Appends the v2 disqualifications produced for one block.
    pub fn add_disqualifications2(&mut self, items: Vec<Disqualification2Record>) {
        if items.is_empty() {
            return;
        }
        self.disqualifications2.extend(items);
        self.view_block = None;
        self.need_store = true;
    }

    pub fn has_last_processed_block(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn last_processed_block_index(&self) -> u64 {
        self.blocks
            .last()
            .map(|block| block.index)
            .unwrap_or(self.first_block)
    }

    pub fn last_processed_block_hash(&self) -> Option<&Hash> {
        self.blocks.last().map(|block| &block.hash)
    }

    /// Marks `index` fully ingested. Heights must be recorded in strictly
    /// increasing order.
    pub fn add_last_processed_block(&mut self, index: u64, hash: Hash) -> StakeResult<()> {
        if self.has_last_processed_block() && index <= self.last_processed_block_index() {
            return Err(StakeError::Config(format!(
                "processed block {index} is not past the current cursor {}",
                self.last_processed_block_index()
            )));
        }
        self.blocks.push(ProcessedBlock { index, hash });
        self.need_store = true;
        Ok(())
    }

    /// Pops the latest processed block together with every stake and
    /// disqualification mined in it. The per-height views are invalidated
    /// when the popped block carried stakes.
    pub fn remove_last_processed_block(&mut self) {
        let Some(block) = self.blocks.pop() else {
            return;
        };
        let tx_count = self.stake_txs.len();
        let disqual_count = self.disqualifications.len() + self.disqualifications2.len();
        self.stake_txs.retain(|tx| tx.block_height != block.index);
        self.disqualifications
            .retain(|d| d.block_index != block.index);
        self.disqualifications2
            .retain(|d| d.block_index != block.index);
        if tx_count != self.stake_txs.len()
            || disqual_count != self.disqualifications.len() + self.disqualifications2.len()
        {
            self.clear_supernode_stakes();
        }
        self.need_store = true;
    }

    pub fn tx_count(&self) -> usize {
        self.stake_txs.len()
    }

    pub fn clear_supernode_stakes(&mut self) {
        self.supernode_stakes.clear();
        self.supernode_disqualifications.clear();
        self.view_block = None;
    }

    /// Rebuilds the per-height views for `block_index` unless they are
    /// already current: stakes valid at that height aggregated per supernode,
    /// and disqualifications whose windows cover it.
    pub fn update_supernode_stakes(&mut self, block_index: u64) {
        if self.view_block == Some(block_index) {
            return;
        }

        let mut by_id: BTreeMap<String, SupernodeStake> = BTreeMap::new();
        for tx in &self.stake_txs {
            if !tx.is_valid_at(block_index, &self.config) {
                continue;
            }
            match by_id.entry(tx.supernode_public_id.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(SupernodeStake {
                        amount: tx.amount,
                        tier: 0,
                        block_height: tx.block_height,
                        unlock_time: tx.unlock_time,
                        supernode_public_id: tx.supernode_public_id.clone(),
                        supernode_public_address: tx.supernode_public_address,
                    });
                }
                Entry::Occupied(mut entry) => {
                    let stake = entry.get_mut();
                    stake.amount = stake.amount.saturating_add(tx.amount);
                    // The aggregate window spans the union of all stakes.
                    let end = (stake.block_height + stake.unlock_time)
                        .max(tx.block_height + tx.unlock_time);
                    stake.block_height = stake.block_height.min(tx.block_height);
                    stake.unlock_time = end - stake.block_height;
                }
            }
        }
        for stake in by_id.values_mut() {
            stake.tier = self.config.tier_of(stake.amount);
        }
        self.supernode_stakes = by_id.into_values().collect();

        let mut disquals: BTreeSet<(String, u64)> = BTreeSet::new();
        for d in &self.disqualifications {
            let active = block_index >= d.block_index
                && block_index < d.block_index + self.config.disqualification_duration;
            if active {
                disquals.insert((d.id_str.clone(), d.block_index));
            }
        }
        for d in &self.disqualifications2 {
            let active = block_index >= d.block_index
                && block_index < d.block_index + self.config.disqualification2_duration;
            if active {
                for id in &d.ids {
                    disquals.insert((id.to_hex(), d.block_index));
                }
            }
        }
        self.supernode_disqualifications = disquals
            .into_iter()
            .map(|(supernode_public_id, block_index)| SupernodeDisqualification {
                block_index,
                supernode_public_id,
            })
            .collect();

        self.view_block = Some(block_index);
    }

    /// Aggregated live stakes at `block_number`, ordered by supernode id.
    pub fn get_supernode_stakes(&mut self, block_number: u64) -> &[SupernodeStake] {
        self.update_supernode_stakes(block_number);
        &self.supernode_stakes
    }

    /// Disqualifications in force at `block_number`.
    pub fn get_supernode_disqualifications(
        &mut self,
        block_number: u64,
    ) -> &[SupernodeDisqualification] {
        self.update_supernode_stakes(block_number);
        &self.supernode_disqualifications
    }

    /// Aggregated stake of one supernode at `block_number`.
    pub fn find_supernode_stake(
        &mut self,
        block_number: u64,
        supernode_public_id: &str,
    ) -> Option<&SupernodeStake> {
        self.update_supernode_stakes(block_number);
        self.supernode_stakes
            .binary_search_by(|stake| stake.supernode_public_id.as_str().cmp(supernode_public_id))
            .ok()
            .map(|idx| &self.supernode_stakes[idx])
    }

    pub fn need_store(&self) -> bool {
        self.need_store
    }

    /// Writes the snapshot atomically (temp file plus rename). A crash
    /// between blocks leaves the previous durable snapshot intact.
    pub fn store(&mut self) -> StakeResult<()> {
        if let Some(path) = &self.path {
            let snapshot = StorageSnapshot {
                version: STAKE_STORAGE_FORMAT_VERSION,
                first_block: self.first_block,
                stake_txs: self.stake_txs.clone(),
                blocks: self.blocks.clone(),
                disqualifications: self.disqualifications.clone(),
                disqualifications2: self.disqualifications2.clone(),
            };
            atomic_write(path, &bincode::serialize(&snapshot)?)?;
        }
        self.need_store = false;
        Ok(())
    }
}

pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> StakeResult<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| StakeError::Config(format!("invalid snapshot path {}", path.display())))?;
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn load_snapshot<T: serde::de::DeserializeOwned>(
    path: &Path,
    required_version: u32,
    version_of: impl Fn(&T) -> u32,
) -> StakeResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let snapshot: T = bincode::deserialize(&bytes)?;
    let found = version_of(&snapshot);
    if found != required_version {
        return Err(StakeError::VersionMismatch {
            found,
            required: required_version,
        });
    }
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::types::AccountPublicAddress;
    use tempfile::tempdir;

    fn test_stake(id: &str, block_height: u64, amount: u64, unlock_time: u64) -> StakeTransaction {
        let (public, secret) = crypto::generate_keypair();
        StakeTransaction {
            hash: crypto::cn_fast_hash(id.as_bytes()),
            amount,
            block_height,
            unlock_time,
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

    fn storage() -> StakeTransactionStorage {
        StakeTransactionStorage::new(None, 0, ProtocolConfig::default())
            .expect("in-memory storage")
    }

    #[test]
    fn stakes_aggregate_per_supernode() {
        let config = ProtocolConfig::default();
        let mut storage = storage();
        storage.add_tx(test_stake("aa", 100, 60_000 * crate::config::COIN, 1_000));
        storage.add_tx(test_stake("aa", 110, 40_000 * crate::config::COIN, 1_000));
        storage.add_tx(test_stake("bb", 100, 10_000 * crate::config::COIN, 1_000));

        let height = 150;
        let stakes = storage.get_supernode_stakes(height).to_vec();
        assert_eq!(stakes.len(), 2);
        let aa = storage
            .find_supernode_stake(height, "aa")
            .expect("aggregated stake");
        assert_eq!(aa.amount, 100_000 * crate::config::COIN);
        assert_eq!(aa.tier, config.tier_of(aa.amount));
        assert_eq!(aa.block_height, 100);
        assert_eq!(aa.unlock_time, 1_010);
        let bb = storage.find_supernode_stake(height, "bb").expect("stake");
        assert_eq!(bb.tier, 0);
    }

    #[test]
    fn stakes_outside_their_window_are_invisible() {
        let mut storage = storage();
        storage.add_tx(test_stake("aa", 100, 50_000 * crate::config::COIN, 1_000));
        assert!(storage.find_supernode_stake(100, "aa").is_none());
        assert!(storage.find_supernode_stake(106, "aa").is_some());
        assert!(storage.find_supernode_stake(1_105, "aa").is_some());
        assert!(storage.find_supernode_stake(1_106, "aa").is_none());
    }

    #[test]
    fn unroll_discards_block_contents() {
        let mut storage = storage();
        storage
            .add_last_processed_block(1, Hash([1; 32]))
            .expect("record block");
        storage.add_tx(test_stake("aa", 2, 1, 1_000));
        storage.add_disqualifications(vec![Disqualification {
            block_index: 2,
            id: crypto::PublicKey([3; 32]),
            id_str: "03".repeat(32),
            blob: vec![1, 2, 3],
        }]);
        storage
            .add_last_processed_block(2, Hash([2; 32]))
            .expect("record block");
        assert_eq!(storage.tx_count(), 1);

        storage.remove_last_processed_block();
        assert_eq!(storage.tx_count(), 0);
        assert_eq!(storage.last_processed_block_index(), 1);
        assert!(storage.get_supernode_disqualifications(10).is_empty());

        storage.remove_last_processed_block();
        assert!(!storage.has_last_processed_block());
        assert_eq!(storage.last_processed_block_index(), 0);
    }

    #[test]
    fn out_of_order_blocks_are_refused() {
        let mut storage = storage();
        storage
            .add_last_processed_block(5, Hash([5; 32]))
            .expect("record block");
        assert!(storage.add_last_processed_block(5, Hash([5; 32])).is_err());
        assert!(storage.add_last_processed_block(4, Hash([4; 32])).is_err());
    }

    #[test]
    fn disqualification_windows_expire() {
        let config = ProtocolConfig::default();
        let mut storage = storage();
        storage.add_disqualifications(vec![Disqualification {
            block_index: 100,
            id: crypto::PublicKey([3; 32]),
            id_str: "03".repeat(32),
            blob: Vec::new(),
        }]);
        assert!(storage.get_supernode_disqualifications(99).is_empty());
        assert_eq!(storage.get_supernode_disqualifications(100).len(), 1);
        let last_active = 100 + config.disqualification_duration - 1;
        assert_eq!(storage.get_supernode_disqualifications(last_active).len(), 1);
        assert!(storage
            .get_supernode_disqualifications(last_active + 1)
            .is_empty());
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join(crate::config::STAKE_STORAGE_FILE_NAME);

        let mut storage =
            StakeTransactionStorage::new(Some(path.clone()), 7, ProtocolConfig::default())
                .expect("open storage");
        storage.add_tx(test_stake("aa", 100, 42, 1_000));
        storage
            .add_last_processed_block(100, Hash([9; 32]))
            .expect("record block");
        assert!(storage.need_store());
        storage.store().expect("store snapshot");
        assert!(!storage.need_store());

        let reopened =
            StakeTransactionStorage::new(Some(path), 0, ProtocolConfig::default())
                .expect("reopen storage");
        assert_eq!(reopened.first_block(), 7);
        assert_eq!(reopened.tx_count(), 1);
        assert_eq!(reopened.last_processed_block_index(), 100);
        assert_eq!(reopened.last_processed_block_hash(), Some(&Hash([9; 32])));
    }

    #[test]
    fn foreign_snapshot_version_triggers_rebuild() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join(crate::config::STAKE_STORAGE_FILE_NAME);

        let snapshot = StorageSnapshot {
            version: STAKE_STORAGE_FORMAT_VERSION + 1,
            first_block: 0,
            stake_txs: vec![test_stake("aa", 1, 1, 1_000)],
            blocks: Vec::new(),
            disqualifications: Vec::new(),
            disqualifications2: Vec::new(),
        };
        fs::write(&path, bincode::serialize(&snapshot).expect("encode")).expect("write");

        let storage =
            StakeTransactionStorage::new(Some(path), 3, ProtocolConfig::default())
                .expect("open storage");
        assert_eq!(storage.tx_count(), 0);
        assert_eq!(storage.first_block(), 3);
        assert!(storage.need_store());
    }

    #[test]
    fn corrupt_snapshot_triggers_rebuild() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join(crate::config::STAKE_STORAGE_FILE_NAME);
        fs::write(&path, b"not a snapshot").expect("write");

        let storage =
            StakeTransactionStorage::new(Some(path), 0, ProtocolConfig::default())
                .expect("open storage");
        assert_eq!(storage.tx_count(), 0);
        assert!(storage.need_store());
    }
}
