//! Block-by-block stake transaction processing.
//!
//! The processor scans the chain as it advances, extracts and validates
//! stake and disqualification transactions, feeds the storage and the
//! blockchain-based list, unrolls both on reorganizations, and notifies
//! subscribers whenever either view changes.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::chain::BlockchainAccess;
use crate::committee::{ids_from_indexes, make_tier_indexes, CommitteeSampler};
use crate::config::{
    ProtocolConfig, BLOCKCHAIN_BASED_LIST_FILE_NAME, STAKE_STORAGE_FILE_NAME,
};
use crate::crypto::{self, KeyDerivation, PublicKey, SecretKey};
use crate::errors::{StakeError, StakeResult};
use crate::list::BlockchainBasedList;
use crate::storage::StakeTransactionStorage;
use crate::types::{
    AccountPublicAddress, Block, Disqualification, Disqualification2Extra, Disqualification2Record,
    DisqualificationExtra, Hash, StakeTransaction, SupernodeDisqualification, SupernodeStake,
    SupernodeTierArray, Transaction, TxClass, TxOutTarget,
};

// Cooperative bound per synchronize() call; callers invoke it repeatedly
// until it reports being caught up.
const MAX_ITERATIONS_COUNT: u64 = 10_000;
const SYNC_DEBUG_LOG_STEP: u64 = 10_000;

/// Invoked with `(block_index, live stakes, live disqualifications)` after a
/// stake state change. Handlers run on the synchronizer thread while the
/// processor lock is held: keep them fast and never call back into the
/// processor.
pub type SupernodeStakesHandler =
    Box<dyn Fn(u64, &[SupernodeStake], &[SupernodeDisqualification]) -> StakeResult<()> + Send>;

/// Invoked with `(block_height, block_hash, tiers)` once per reported list
/// snapshot, newest first. The same reentrancy rules apply as for
/// [`SupernodeStakesHandler`].
pub type BlockchainBasedListHandler =
    Box<dyn Fn(u64, &Hash, &SupernodeTierArray) -> StakeResult<()> + Send>;

struct Inner {
    config_dir: Option<PathBuf>,
    storage: Option<StakeTransactionStorage>,
    list: Option<BlockchainBasedList>,
    stakes_need_update: bool,
    list_need_update: bool,
    on_stakes_update: Option<SupernodeStakesHandler>,
    on_list_update: Option<BlockchainBasedListHandler>,
}

fn storages_mut(
    inner: &mut Inner,
) -> StakeResult<(&mut StakeTransactionStorage, &mut BlockchainBasedList)> {
    match (inner.storage.as_mut(), inner.list.as_mut()) {
        (Some(storage), Some(list)) => Ok((storage, list)),
        _ => Err(StakeError::Config(
            "stake processing storages are not initialized".into(),
        )),
    }
}

pub struct StakeTransactionProcessor<C, G> {
    chain: Arc<C>,
    sampler: G,
    config: ProtocolConfig,
    // Single critical section for storage, list, flags and handler slots.
    // Lock order: this mutex first, chain reads under it; chain
    // implementations must never call back into the processor.
    inner: Mutex<Inner>,
}

impl<C: BlockchainAccess, G: CommitteeSampler> StakeTransactionProcessor<C, G> {
    pub fn new(chain: Arc<C>, sampler: G, config: ProtocolConfig) -> Self {
        Self {
            chain,
            sampler,
            config,
            inner: Mutex::new(Inner {
                config_dir: None,
                storage: None,
                list: None,
                stakes_need_update: true,
                list_need_update: true,
                on_stakes_update: None,
                on_list_update: None,
            }),
        }
    }

    /// Directs the lazily-created storages to persist under `config_dir`.
    /// Without this call the processor keeps both artifacts in memory only.
    pub fn init_storages(&self, config_dir: impl Into<PathBuf>) -> StakeResult<()> {
        let mut inner = self.inner.lock();
        if inner.config_dir.is_some() || inner.storage.is_some() || inner.list.is_some() {
            return Err(StakeError::AlreadyInitialized);
        }
        inner.config_dir = Some(config_dir.into());
        Ok(())
    }

    fn init_storages_impl(&self, inner: &mut Inner) -> StakeResult<()> {
        if inner.storage.is_some() || inner.list.is_some() {
            return Err(StakeError::AlreadyInitialized);
        }
        let mut first_block = self
            .chain
            .earliest_height_for_version(self.config.stake_processing_fork_version);
        if first_block > 0 {
            first_block -= 1;
        }
        debug!(first_block, "initializing stake processing storages");
        let (storage_path, list_path) = match &inner.config_dir {
            Some(dir) => (
                Some(dir.join(STAKE_STORAGE_FILE_NAME)),
                Some(dir.join(BLOCKCHAIN_BASED_LIST_FILE_NAME)),
            ),
            None => (None, None),
        };
        inner.storage = Some(StakeTransactionStorage::new(
            storage_path,
            first_block,
            self.config.clone(),
        )?);
        inner.list = Some(BlockchainBasedList::new(
            list_path,
            first_block,
            self.config.clone(),
        )?);
        Ok(())
    }

    /// Aggregated stake of one supernode at `block_number`, if any.
    pub fn find_supernode_stake(
        &self,
        block_number: u64,
        supernode_public_id: &str,
    ) -> Option<SupernodeStake> {
        let mut inner = self.inner.lock();
        inner
            .storage
            .as_mut()?
            .find_supernode_stake(block_number, supernode_public_id)
            .cloned()
    }

    /// Ingests one block. `update_storage` persists both artifacts right
    /// away; the synchronizer passes `false` and stores once per pass.
    pub fn process_block(
        &self,
        block_index: u64,
        block: &Block,
        block_hash: &Hash,
        update_storage: bool,
    ) -> StakeResult<()> {
        let mut inner = self.inner.lock();
        self.process_block_impl(&mut inner, block_index, block, block_hash, update_storage)
    }

    fn process_block_impl(
        &self,
        inner: &mut Inner,
        block_index: u64,
        block: &Block,
        block_hash: &Hash,
        update_storage: bool,
    ) -> StakeResult<()> {
        self.process_block_stake_transactions(inner, block_index, block, block_hash, update_storage)?;
        self.process_block_list(inner, block_index, block_hash, update_storage)?;
        Ok(())
    }

    fn process_block_stake_transactions(
        &self,
        inner: &mut Inner,
        block_index: u64,
        block: &Block,
        block_hash: &Hash,
        update_storage: bool,
    ) -> StakeResult<()> {
        let fork_active = self.chain.hard_fork_version(block_index)
            >= self.config.stake_processing_fork_version;
        {
            let (storage, list) = storages_mut(inner)?;
            if block_index <= storage.last_processed_block_index() {
                return Ok(());
            }

            if fork_active {
                let (txs, missed) = self.chain.transactions(&block.tx_hashes)?;
                for tx_hash in &missed {
                    warn!(block_index, %tx_hash, "transaction referenced by block is missing");
                }

                let mut disquals = Vec::new();
                let mut disquals2 = Vec::new();
                for tx in &txs {
                    let tx_hash = tx.prefix_hash;
                    match TxClass::from_version(tx.version) {
                        TxClass::Disqualification => {
                            match self.build_disqualification(list, tx, block_index) {
                                Ok(disqual) => {
                                    debug!(
                                        block_index,
                                        %tx_hash,
                                        supernode_public_id = %disqual.id_str,
                                        "new disqualification transaction"
                                    );
                                    disquals.push(disqual);
                                }
                                Err(err) => warn!(
                                    block_index,
                                    %tx_hash,
                                    %err,
                                    "ignoring invalid disqualification transaction"
                                ),
                            }
                        }
                        TxClass::Disqualification2 => {
                            match self.build_disqualification2(list, tx, block_index) {
                                Ok(disqual) => {
                                    debug!(
                                        block_index,
                                        %tx_hash,
                                        disqualified = disqual.ids.len(),
                                        "new disqualification2 transaction"
                                    );
                                    disquals2.push(disqual);
                                }
                                Err(err) => warn!(
                                    block_index,
                                    %tx_hash,
                                    %err,
                                    "ignoring invalid disqualification2 transaction"
                                ),
                            }
                        }
                        TxClass::Other => {
                            match self.extract_stake_transaction(block_index, tx) {
                                Ok(Some(stake_tx)) => {
                                    debug!(
                                        block_index,
                                        %tx_hash,
                                        supernode_public_id = %stake_tx.supernode_public_id,
                                        amount = stake_tx.amount,
                                        "new stake transaction"
                                    );
                                    storage.add_tx(stake_tx);
                                }
                                Ok(None) => {}
                                Err(err) => warn!(
                                    block_index,
                                    %tx_hash,
                                    %err,
                                    "ignoring stake transaction"
                                ),
                            }
                        }
                    }
                }

                storage.add_disqualifications(disquals);
                storage.add_disqualifications2(disquals2);
                storage.update_supernode_stakes(block_index);
            }

            storage.add_last_processed_block(block_index, *block_hash)?;
            if update_storage {
                storage.store()?;
            }
        }
        if fork_active {
            inner.stakes_need_update = true;
        }
        Ok(())
    }

    fn process_block_list(
        &self,
        inner: &mut Inner,
        block_index: u64,
        block_hash: &Hash,
        update_storage: bool,
    ) -> StakeResult<()> {
        let changed;
        {
            let (storage, list) = storages_mut(inner)?;
            let prev_height = list.block_height();
            list.apply_block(block_index, *block_hash, storage)?;
            changed = list.need_store() || prev_height != list.block_height();
            if changed && update_storage {
                list.store()?;
            }
        }
        if changed {
            inner.list_need_update = true;
        }
        Ok(())
    }

    /// Full validation of a potential stake transaction. `Ok(None)` means the
    /// transaction carries no stake extra and is simply not a stake.
    fn extract_stake_transaction(
        &self,
        block_index: u64,
        tx: &Transaction,
    ) -> StakeResult<Option<StakeTransaction>> {
        let Some(extra) = tx.extra.stake.as_ref() else {
            return Ok(None);
        };

        let id_key = PublicKey::from_hex(&extra.supernode_public_id).map_err(|_| {
            StakeError::Transaction(format!(
                "invalid supernode public identifier '{}'",
                extra.supernode_public_id
            ))
        })?;
        if !crypto::check_key(&id_key) {
            return Err(StakeError::Transaction(format!(
                "invalid supernode public identifier '{}'",
                extra.supernode_public_id
            )));
        }

        let address_str = extra
            .supernode_public_address
            .to_address_string(self.chain.network());
        let payload = format!("{address_str}:{}", extra.supernode_public_id);
        let digest = crypto::cn_fast_hash(payload.as_bytes());
        if !crypto::check_signature(&digest, &id_key, &extra.supernode_signature) {
            return Err(StakeError::Transaction(
                "supernode signature mismatch".into(),
            ));
        }

        let unlock_time = tx.unlock_time.saturating_sub(block_index);
        if unlock_time < self.config.stake_min_unlock_time {
            return Err(StakeError::Transaction(format!(
                "unlock time {unlock_time} is less than the minimum allowed {}",
                self.config.stake_min_unlock_time
            )));
        }
        if unlock_time > self.config.stake_max_unlock_time {
            return Err(StakeError::Transaction(format!(
                "unlock time {unlock_time} is greater than the maximum allowed {}",
                self.config.stake_max_unlock_time
            )));
        }

        let amount =
            transaction_amount(tx, &extra.supernode_public_address, &extra.tx_secret_key);
        if amount == 0 {
            return Err(StakeError::Transaction(
                "unable to recover a stake amount for the supernode address".into(),
            ));
        }

        Ok(Some(StakeTransaction {
            hash: tx.prefix_hash,
            amount,
            block_height: block_index,
            unlock_time,
            supernode_public_id: extra.supernode_public_id.clone(),
            supernode_public_address: extra.supernode_public_address,
            supernode_signature: extra.supernode_signature,
            tx_secret_key: extra.tx_secret_key.clone(),
        }))
    }

    fn build_disqualification(
        &self,
        list: &BlockchainBasedList,
        tx: &Transaction,
        block_index: u64,
    ) -> StakeResult<Disqualification> {
        let extra = tx.extra.disqualification.as_ref().ok_or_else(|| {
            StakeError::Transaction("disqualification extra is missing or malformed".into())
        })?;
        self.check_disqualification_extra(list, extra)?;
        let blob = bincode::serialize(extra)?;
        Ok(Disqualification {
            block_index,
            id: extra.item.id,
            id_str: extra.item.id.to_hex(),
            blob,
        })
    }

    fn check_disqualification_extra(
        &self,
        list: &BlockchainBasedList,
        extra: &DisqualificationExtra,
    ) -> StakeResult<()> {
        let digest = extra.item.digest()?;
        for signer in &extra.signers {
            if !crypto::check_signature(&digest, &signer.signer_id, &signer.signature) {
                return Err(StakeError::Transaction(format!(
                    "invalid signature from signer {}",
                    signer.signer_id
                )));
            }
        }

        let chain_hash = self.chain.block_id_by_height(extra.item.block_height)?;
        if chain_hash != extra.item.block_hash {
            return Err(StakeError::Transaction(format!(
                "target block hash does not match the chain at height {}",
                extra.item.block_height
            )));
        }

        let depth = self.history_depth_of(list, extra.item.block_height)?;
        if extra.signers.len() < self.config.required_bbqs_votes {
            return Err(StakeError::Transaction(format!(
                "{} signers where {} votes are required",
                extra.signers.len(),
                self.config.required_bbqs_votes
            )));
        }

        let tiers = list
            .tiers(depth)
            .ok_or_else(|| StakeError::Config("list snapshot is unavailable".into()))?;
        let indexes = make_tier_indexes(tiers);
        let (bbqs_indexes, qcl_indexes) =
            self.sampler.select_bbqs_qcl(&extra.item.block_hash, &indexes);
        let bbqs = ids_from_indexes(tiers, &bbqs_indexes)?;
        let qcl = ids_from_indexes(tiers, &qcl_indexes)?;

        if !qcl.contains(&extra.item.id) {
            return Err(StakeError::CommitteeMismatch(format!(
                "disqualified id {} is not in the qualification candidate list",
                extra.item.id
            )));
        }
        for signer in &extra.signers {
            if !bbqs.contains(&signer.signer_id) {
                return Err(StakeError::CommitteeMismatch(format!(
                    "signer {} is not in the blockchain-based quorum set",
                    signer.signer_id
                )));
            }
        }
        Ok(())
    }

    fn build_disqualification2(
        &self,
        list: &BlockchainBasedList,
        tx: &Transaction,
        block_index: u64,
    ) -> StakeResult<Disqualification2Record> {
        let extra = tx.extra.disqualification2.as_ref().ok_or_else(|| {
            StakeError::Transaction("disqualification2 extra is missing or malformed".into())
        })?;
        self.check_disqualification2_extra(list, extra)?;
        let blob = bincode::serialize(extra)?;
        Ok(Disqualification2Record {
            block_index,
            ids: extra.item.ids.clone(),
            blob,
        })
    }

    fn check_disqualification2_extra(
        &self,
        list: &BlockchainBasedList,
        extra: &Disqualification2Extra,
    ) -> StakeResult<()> {
        let digest = extra.item.digest()?;
        for signer in &extra.signers {
            if !crypto::check_signature(&digest, &signer.signer_id, &signer.signature) {
                return Err(StakeError::Transaction(format!(
                    "invalid signature from signer {}",
                    signer.signer_id
                )));
            }
        }

        let chain_hash = self.chain.block_id_by_height(extra.item.block_height)?;
        if chain_hash != extra.item.block_hash {
            return Err(StakeError::Transaction(format!(
                "target block hash does not match the chain at height {}",
                extra.item.block_height
            )));
        }

        let depth = self.history_depth_of(list, extra.item.block_height)?;
        if extra.signers.len() < self.config.required_disqual2_votes {
            return Err(StakeError::Transaction(format!(
                "{} signers where {} votes are required",
                extra.signers.len(),
                self.config.required_disqual2_votes
            )));
        }

        let tiers = list
            .tiers(depth)
            .ok_or_else(|| StakeError::Config("list snapshot is unavailable".into()))?;
        let indexes = make_tier_indexes(tiers);
        let sample_indexes = self
            .sampler
            .select_auth_sample(&extra.item.payment_id, &indexes);
        let sample = ids_from_indexes(tiers, &sample_indexes)?;

        for id in &extra.item.ids {
            if !sample.contains(id) {
                return Err(StakeError::CommitteeMismatch(format!(
                    "disqualified id {id} is not in the auth sample"
                )));
            }
        }
        for signer in &extra.signers {
            if !sample.contains(&signer.signer_id) {
                return Err(StakeError::CommitteeMismatch(format!(
                    "signer {} is not in the auth sample",
                    signer.signer_id
                )));
            }
        }
        Ok(())
    }

    /// Depth of `block_height` behind the list head, rejecting targets
    /// outside the retained history (including future heights).
    fn history_depth_of(
        &self,
        list: &BlockchainBasedList,
        block_height: u64,
    ) -> StakeResult<usize> {
        list.block_height()
            .checked_sub(block_height)
            .map(|depth| depth as usize)
            .filter(|depth| *depth < list.history_depth())
            .ok_or(StakeError::StaleHistory {
                target_height: block_height,
                history_depth: list.history_depth(),
            })
    }

    /// Brings storage and list in line with the current chain: unrolls
    /// blocks of abandoned branches, applies new blocks (bounded per call),
    /// persists dirty state, and fires pending notifications once caught up.
    pub fn synchronize(&self) -> StakeResult<()> {
        let mut inner = self.inner.lock();

        let height = self.chain.current_height();
        if height == 0
            || self.chain.hard_fork_version(height - 1) < self.config.stake_processing_fork_version
        {
            return Ok(());
        }

        if inner.storage.is_none() || inner.list.is_none() {
            self.init_storages_impl(&mut inner)?;
        }

        // Unroll blocks that are no longer part of the main branch.
        loop {
            let (storage, list) = storages_mut(&mut inner)?;
            if !storage.has_last_processed_block() {
                break;
            }
            let last_processed = storage.last_processed_block_index();
            if last_processed < height {
                match self.chain.block_id_by_height(last_processed) {
                    Ok(chain_hash) if storage.last_processed_block_hash() == Some(&chain_hash) => {
                        break;
                    }
                    Ok(_) => {}
                    // Block not received yet; retry on the next tick.
                    Err(StakeError::BlockMissing(_)) => return Ok(()),
                    Err(err) => return Err(err),
                }
            }
            warn!(
                block_index = last_processed,
                height, "unrolling processed block"
            );
            storage.remove_last_processed_block();
            if list.block_height() == last_processed {
                list.remove_latest_block();
            }
        }

        // Apply new blocks.
        let first_block_index = {
            let (storage, list) = storages_mut(&mut inner)?;
            (storage.last_processed_block_index() + 1).min(list.block_height() + 1)
        };
        let mut last_block_index = first_block_index;
        let mut sync_target = height;
        if sync_target.saturating_sub(last_block_index) > MAX_ITERATIONS_COUNT {
            sync_target = first_block_index + MAX_ITERATIONS_COUNT;
        }
        while last_block_index < sync_target {
            if last_block_index % SYNC_DEBUG_LOG_STEP == 0 || last_block_index == height - 1 {
                debug!(
                    block_index = last_block_index,
                    target = height - 1,
                    "stake transaction sync"
                );
            }
            match self.chain.block_id_by_height(last_block_index) {
                Ok(block_hash) => {
                    let block = self.chain.block_by_hash(&block_hash)?;
                    self.process_block_impl(
                        &mut inner,
                        last_block_index,
                        &block,
                        &block_hash,
                        false,
                    )?;
                }
                // Block not received yet; apply what we have and come back.
                Err(StakeError::BlockMissing(_)) => break,
                Err(err) => return Err(err),
            }
            last_block_index += 1;
        }

        {
            let (storage, list) = storages_mut(&mut inner)?;
            if list.need_store() {
                list.store()?;
            }
            if storage.need_store() {
                storage.store()?;
            }
        }

        if last_block_index == height {
            if inner.stakes_need_update && inner.on_stakes_update.is_some() {
                self.invoke_stakes_handler_impl(&mut inner, last_block_index - 1);
            }
            if inner.list_need_update && inner.on_list_update.is_some() {
                self.invoke_list_handler_impl(
                    &mut inner,
                    (last_block_index - first_block_index) as usize,
                );
            }
            if first_block_index != last_block_index {
                debug!(height, "stake transaction sync finished");
            }
        }
        Ok(())
    }

    /// Registers the stake update subscriber; the last writer wins.
    pub fn set_on_update_stakes_handler(&self, handler: SupernodeStakesHandler) {
        self.inner.lock().on_stakes_update = Some(handler);
    }

    /// Registers the list update subscriber; the last writer wins.
    pub fn set_on_update_blockchain_based_list_handler(&self, handler: BlockchainBasedListHandler) {
        self.inner.lock().on_list_update = Some(handler);
    }

    /// Fires the stake handler for the current chain tip if an update is
    /// pending or `force` is set.
    pub fn invoke_update_stakes_handler(&self, force: bool) {
        let mut inner = self.inner.lock();
        if inner.on_stakes_update.is_none() {
            return;
        }
        if !inner.stakes_need_update && !force {
            return;
        }
        let height = self.chain.db_height();
        if height == 0 {
            return;
        }
        self.invoke_stakes_handler_impl(&mut inner, height - 1);
    }

    fn invoke_stakes_handler_impl(&self, inner: &mut Inner, block_index: u64) {
        let Some(storage) = inner.storage.as_mut() else {
            return;
        };
        let Some(handler) = inner.on_stakes_update.as_ref() else {
            return;
        };
        let stakes = storage.get_supernode_stakes(block_index).to_vec();
        let disqualifications = storage.get_supernode_disqualifications(block_index).to_vec();
        match handler(block_index, &stakes, &disqualifications) {
            Ok(()) => inner.stakes_need_update = false,
            // Leave the update pending so the next pass retries.
            Err(err) => error!(block_index, %err, "stake update handler failed"),
        }
    }

    /// Fires the list handler for up to `depth` recent snapshots if an
    /// update is pending or `force` is set; `depth > 1` implies force.
    pub fn invoke_update_blockchain_based_list_handler(&self, force: bool, depth: usize) {
        let mut inner = self.inner.lock();
        if inner.on_list_update.is_none() {
            return;
        }
        let force = force || depth > 1;
        if !inner.list_need_update && !force {
            return;
        }
        self.invoke_list_handler_impl(&mut inner, depth);
    }

    fn invoke_list_handler_impl(&self, inner: &mut Inner, depth: usize) {
        let Some(list) = inner.list.as_ref() else {
            return;
        };
        let Some(handler) = inner.on_list_update.as_ref() else {
            return;
        };
        if list.history_depth() == 0 {
            return;
        }
        let depth = depth
            .min(list.history_depth())
            .min(self.config.supernode_history_size);
        for i in 0..depth {
            let Some(snapshot) = list.snapshot(i) else {
                break;
            };
            if let Err(err) = handler(snapshot.block_height, &snapshot.block_hash, &snapshot.tiers)
            {
                error!(
                    block_height = snapshot.block_height,
                    %err,
                    "blockchain based list update handler failed"
                );
                return;
            }
        }
        inner.list_need_update = false;
    }
}

/// Total amount the transaction pays to the supernode address, recovered
/// with the published transaction secret key. Outputs that fail to decode
/// contribute nothing.
fn transaction_amount(
    tx: &Transaction,
    address: &AccountPublicAddress,
    tx_key: &SecretKey,
) -> u64 {
    let derivation = match crypto::generate_key_derivation(&address.view_public_key, tx_key) {
        Ok(derivation) => derivation,
        Err(err) => {
            warn!(%err, "failed to generate key derivation from supplied parameters");
            return 0;
        }
    };

    let mut received: u64 = 0;
    for (index, out) in tx.vout.iter().enumerate() {
        let TxOutTarget::ToKey { key } = &out.target else {
            continue;
        };
        let Ok(derived) =
            crypto::derive_public_key(&derivation, index as u64, &address.spend_public_key)
        else {
            continue;
        };
        if derived != *key {
            continue;
        }
        let amount = if tx.version == 1 {
            out.amount
        } else {
            decode_rct_output(tx, index, &derivation)
        };
        received = received.saturating_add(amount);
    }
    received
}

fn decode_rct_output(tx: &Transaction, index: usize, derivation: &KeyDerivation) -> u64 {
    let Some(rct) = tx.rct.as_ref() else {
        warn!(index, "transaction has no ringct data for a matched output");
        return 0;
    };
    let (Some(ecdh), Some(out_pk)) = (rct.ecdh_info.get(index), rct.out_pk.get(index)) else {
        warn!(index, "ringct data is shorter than the output vector");
        return 0;
    };
    let shared = crypto::derivation_to_scalar(derivation, index as u64);
    match crypto::decode_rct_amount(ecdh, &shared, &out_pk.mask) {
        Some(amount) => amount,
        None => {
            warn!(index, "ringct output does not decode to a consistent amount");
            0
        }
    }
}
