//! Stake transaction processing for a CryptoNote-derived supernode overlay.
//!
//! The crate scans every block as the chain advances, extracts and validates
//! stake and disqualification transactions, and maintains two persistent,
//! reorg-aware indexes: the stake transaction log
//! ([`storage::StakeTransactionStorage`]) and the rolling tiered list of
//! eligible supernodes ([`list::BlockchainBasedList`]). The
//! [`processor::StakeTransactionProcessor`] orchestrates ingestion and
//! notification over a [`chain::BlockchainAccess`] collaborator, with
//! disqualification committees drawn through a [`committee::CommitteeSampler`].
//!
//! Consumers typically construct a processor with a chain handle, a sampler,
//! and a [`config::ProtocolConfig`], call `init_storages` with a data
//! directory, and drive `synchronize` from a background thread while
//! subscribing to stake and list updates.

pub mod chain;
pub mod committee;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod list;
pub mod processor;
pub mod storage;
pub mod types;

pub use chain::BlockchainAccess;
pub use committee::{CommitteeSampler, DeterministicSampler};
pub use config::ProtocolConfig;
pub use errors::{StakeError, StakeResult};
pub use list::BlockchainBasedList;
pub use processor::StakeTransactionProcessor;
pub use storage::StakeTransactionStorage;
