//! Value types shared across stake processing: protocol hashes, the stake and
//! disqualification records kept by storage, the tier entries of the
//! blockchain-based list, and the slice of the transaction model the
//! processor consumes from the chain.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ProtocolConfig;
use crate::crypto::{self, PublicKey, SecretKey, Signature};
use crate::errors::{StakeError, StakeResult};

/// 32-byte protocol hash (block ids, transaction ids, signing digests).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(data: &str) -> StakeResult<Self> {
        let bytes = hex::decode(data)
            .map_err(|err| StakeError::Config(format!("invalid hash encoding: {err}")))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StakeError::Config("hash must encode exactly 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    Mainnet,
    Testnet,
    Stagenet,
}

impl NetworkType {
    fn address_tag(self) -> u8 {
        match self {
            NetworkType::Mainnet => 0x12,
            NetworkType::Testnet => 0x35,
            NetworkType::Stagenet => 0x18,
        }
    }
}

/// View and spend public keys of a supernode wallet address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPublicAddress {
    pub view_public_key: PublicKey,
    pub spend_public_key: PublicKey,
}

impl AccountPublicAddress {
    /// Canonical string rendering entering the stake signature payload:
    /// network tag, both keys, and a 4-byte Keccak checksum, hex encoded.
    pub fn to_address_string(&self, network: NetworkType) -> String {
        let mut payload = Vec::with_capacity(65);
        payload.push(network.address_tag());
        payload.extend_from_slice(self.spend_public_key.as_bytes());
        payload.extend_from_slice(self.view_public_key.as_bytes());
        let checksum = crypto::cn_fast_hash(&payload);
        format!("{}{}", hex::encode(&payload), hex::encode(&checksum.0[..4]))
    }
}

/// An accepted stake transaction as recorded by storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakeTransaction {
    pub hash: Hash,
    /// Atomic units paid to the supernode address.
    pub amount: u64,
    pub block_height: u64,
    /// Unlock window relative to the mining height, in blocks.
    pub unlock_time: u64,
    /// Hex-encoded supernode identity key `W`.
    pub supernode_public_id: String,
    pub supernode_public_address: AccountPublicAddress,
    pub supernode_signature: Signature,
    pub tx_secret_key: SecretKey,
}

impl StakeTransaction {
    /// Whether this stake counts toward eligibility at `block_index`: it must
    /// have passed its validation period and not yet left its unlock window
    /// plus the trusted restaking grace.
    pub fn is_valid_at(&self, block_index: u64, config: &ProtocolConfig) -> bool {
        let first_valid = self.block_height + config.stake_validation_period;
        let last_valid = self.block_height + self.unlock_time + config.trusted_restaking_period;
        block_index >= first_valid && block_index < last_valid
    }
}

/// Aggregated live stake of one supernode at a particular height.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SupernodeStake {
    /// Sum over all stakes valid at the queried height.
    pub amount: u64,
    /// Obtained tier, `1..=TIERS`; `0` when below the first threshold.
    pub tier: usize,
    /// Start of the aggregate coverage window.
    pub block_height: u64,
    /// Relative end of the aggregate coverage window.
    pub unlock_time: u64,
    pub supernode_public_id: String,
    pub supernode_public_address: AccountPublicAddress,
}

/// Statement content of a quorum disqualification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisqualificationItem {
    pub id: PublicKey,
    pub block_height: u64,
    pub block_hash: Hash,
}

impl DisqualificationItem {
    /// Digest each committee member signs.
    pub fn digest(&self) -> StakeResult<Hash> {
        let blob = bincode::serialize(self)?;
        Ok(crypto::cn_fast_hash(&blob))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisqualificationSigner {
    pub signer_id: PublicKey,
    pub signature: Signature,
}

/// Extra payload of a disqualification transaction (version 123).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisqualificationExtra {
    pub item: DisqualificationItem,
    pub signers: Vec<DisqualificationSigner>,
}

/// Statement content of a per-payment disqualification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disqualification2Item {
    pub payment_id: String,
    pub block_height: u64,
    pub block_hash: Hash,
    pub ids: Vec<PublicKey>,
}

impl Disqualification2Item {
    pub fn digest(&self) -> StakeResult<Hash> {
        let blob = bincode::serialize(self)?;
        Ok(crypto::cn_fast_hash(&blob))
    }
}

/// Extra payload of a disqualification transaction (version 124).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disqualification2Extra {
    pub item: Disqualification2Item,
    pub signers: Vec<DisqualificationSigner>,
}

/// Accepted v1 disqualification as recorded by storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Disqualification {
    pub block_index: u64,
    pub id: PublicKey,
    pub id_str: String,
    /// Canonical serialized extra, kept verbatim for re-broadcast.
    pub blob: Vec<u8>,
}

/// Accepted v2 disqualification as recorded by storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Disqualification2Record {
    pub block_index: u64,
    pub ids: Vec<PublicKey>,
    pub blob: Vec<u8>,
}

/// One entry of the per-height disqualification view handed to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupernodeDisqualification {
    pub block_index: u64,
    pub supernode_public_id: String,
}

/// One ranked entry of a blockchain-based list tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierEntry {
    pub supernode_public_id: String,
    pub amount: u64,
}

/// Fixed-width tier array of one list snapshot.
pub type SupernodeTierArray = [Vec<TierEntry>; crate::config::TIERS];

// Wire versions carrying the disqualification discriminants.
pub const DISQUALIFICATION_TX_VERSION: u64 = 123;
pub const DISQUALIFICATION2_TX_VERSION: u64 = 124;

/// Transaction classification at the ingestion boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxClass {
    Disqualification,
    Disqualification2,
    Other,
}

impl TxClass {
    pub fn from_version(version: u64) -> Self {
        match version {
            DISQUALIFICATION_TX_VERSION => TxClass::Disqualification,
            DISQUALIFICATION2_TX_VERSION => TxClass::Disqualification2,
            _ => TxClass::Other,
        }
    }
}

/// Stake registration fields carried in a transaction extra.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakeExtra {
    pub supernode_public_id: String,
    pub supernode_public_address: AccountPublicAddress,
    pub supernode_signature: Signature,
    pub tx_secret_key: SecretKey,
}

/// Decoded extra fields of a transaction. The binary extra codec lives with
/// the chain; the processor receives already-structured payloads.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TxExtra {
    pub stake: Option<StakeExtra>,
    pub disqualification: Option<DisqualificationExtra>,
    pub disqualification2: Option<Disqualification2Extra>,
}

/// Masked RingCT output data for one output index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdhTuple {
    pub mask: [u8; 32],
    pub amount: [u8; 32],
}

/// Output commitment as published on chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtKey {
    pub mask: PublicKey,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RctSignatures {
    pub ecdh_info: Vec<EcdhTuple>,
    pub out_pk: Vec<CtKey>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOutTarget {
    ToKey { key: PublicKey },
    ToScriptHash { hash: Hash },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxOut {
    /// Plaintext amount; zero for RingCT outputs.
    pub amount: u64,
    pub target: TxOutTarget,
}

/// The slice of a chain transaction the processor inspects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub prefix_hash: Hash,
    pub version: u64,
    /// Absolute unlock height.
    pub unlock_time: u64,
    pub vout: Vec<TxOut>,
    pub rct: Option<RctSignatures>,
    pub extra: TxExtra,
}

/// The slice of a chain block the processor inspects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub tx_hashes: Vec<Hash>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stake_at(block_height: u64, unlock_time: u64) -> StakeTransaction {
        let (public, secret) = crypto::generate_keypair();
        StakeTransaction {
            hash: Hash::default(),
            amount: 1,
            block_height,
            unlock_time,
            supernode_public_id: public.to_hex(),
            supernode_public_address: AccountPublicAddress {
                view_public_key: public,
                spend_public_key: public,
            },
            supernode_signature: crypto::generate_signature(
                &Hash::default(),
                &public,
                &secret,
            )
            .expect("signature"),
            tx_secret_key: secret,
        }
    }

    #[test]
    fn stake_validity_window() {
        let config = ProtocolConfig::default();
        let stake = stake_at(100, 1_000);
        let first = 100 + config.stake_validation_period;
        let last = 100 + 1_000 + config.trusted_restaking_period;
        assert!(!stake.is_valid_at(first - 1, &config));
        assert!(stake.is_valid_at(first, &config));
        assert!(stake.is_valid_at(last - 1, &config));
        assert!(!stake.is_valid_at(last, &config));
    }

    #[test]
    fn tx_classification_keeps_wire_versions() {
        assert_eq!(TxClass::from_version(123), TxClass::Disqualification);
        assert_eq!(TxClass::from_version(124), TxClass::Disqualification2);
        assert_eq!(TxClass::from_version(2), TxClass::Other);
    }

    #[test]
    fn address_string_is_network_dependent() {
        let (view, _) = crypto::generate_keypair();
        let (spend, _) = crypto::generate_keypair();
        let address = AccountPublicAddress {
            view_public_key: view,
            spend_public_key: spend,
        };
        let mainnet = address.to_address_string(NetworkType::Mainnet);
        let testnet = address.to_address_string(NetworkType::Testnet);
        assert_ne!(mainnet, testnet);
        assert_eq!(mainnet, address.to_address_string(NetworkType::Mainnet));
    }

    #[test]
    fn disqualification_digest_is_stable() {
        let item = DisqualificationItem {
            id: PublicKey([7; 32]),
            block_height: 400,
            block_hash: Hash([9; 32]),
        };
        assert_eq!(item.digest().expect("digest"), item.digest().expect("digest"));
        let mut other = item.clone();
        other.block_height = 401;
        assert_ne!(item.digest().expect("digest"), other.digest().expect("digest"));
    }
}
