use crate::errors::StakeResult;
use crate::types::{Block, Hash, NetworkType, Transaction};

/// Read access to the blockchain the processor scans.
///
/// Implementations are expected to do their own internal locking; the
/// processor always holds its storage lock before issuing chain reads and
/// implementations must not call back into it.
pub trait BlockchainAccess: Send + Sync {
    fn current_height(&self) -> u64;

    /// First height at which the given hard-fork version would ideally apply.
    fn earliest_height_for_version(&self, version: u8) -> u64;

    fn hard_fork_version(&self, height: u64) -> u8;

    /// Block id at `height`, or [`StakeError::BlockMissing`] when the chain
    /// has not received that block yet.
    ///
    /// [`StakeError::BlockMissing`]: crate::errors::StakeError::BlockMissing
    fn block_id_by_height(&self, height: u64) -> StakeResult<Hash>;

    fn block_by_hash(&self, hash: &Hash) -> StakeResult<Block>;

    /// Resolve transactions by id; unresolved ids are returned in the second
    /// position rather than failing the call.
    fn transactions(&self, hashes: &[Hash]) -> StakeResult<(Vec<Transaction>, Vec<Hash>)>;

    fn network(&self) -> NetworkType;

    /// Height as reported by the underlying database.
    fn db_height(&self) -> u64;
}
