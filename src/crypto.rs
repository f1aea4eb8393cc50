//! Curve and hash primitives consumed by stake validation.
//!
//! Everything here is expressed over compressed 32-byte encodings so the rest
//! of the crate never touches curve internals: point validity checks, the
//! `8·r·A` key derivation used to recognize outputs paid to a supernode
//! address, Schnorr signatures over `cn_fast_hash` digests, and the ECDH
//! amount decoding with its Pedersen commitment cross-check.

use std::fmt;
use std::sync::LazyLock;

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::errors::{StakeError, StakeResult};
use crate::types::{EcdhTuple, Hash};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

#[derive(Clone, Serialize, Deserialize)]
pub struct SecretKey(pub [u8; 32]);

/// Shared-secret point produced by `generate_key_derivation`, compressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivation(pub [u8; 32]);

/// Schnorr signature `(c, r)` over a `cn_fast_hash` digest.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub c: [u8; 32],
    pub r: [u8; 32],
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(data: &str) -> StakeResult<Self> {
        let bytes = hex::decode(data)
            .map_err(|err| StakeError::Crypto(format!("invalid public key encoding: {err}")))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StakeError::Crypto("public key must encode exactly 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}{})", hex::encode(self.c), hex::encode(self.r))
    }
}

// Pedersen commitment generator H, compressed.
const H_BYTES: [u8; 32] = [
    0x8b, 0x65, 0x59, 0x70, 0x15, 0x37, 0x99, 0xaf, 0x2a, 0xea, 0xdc, 0x9f, 0xf1, 0xad, 0xd0,
    0xea, 0x6c, 0x72, 0x51, 0xd5, 0x41, 0x54, 0xcf, 0xa9, 0x2c, 0x17, 0x3a, 0x0d, 0xd3, 0x9c,
    0x1f, 0x94,
];

static H_POINT: LazyLock<EdwardsPoint> = LazyLock::new(|| {
    CompressedEdwardsY(H_BYTES)
        .decompress()
        .expect("generator H is a valid curve point")
});

/// Keccak-256 digest used for every protocol hash.
pub fn cn_fast_hash(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

fn hash_to_scalar(data: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order(cn_fast_hash(data).0)
}

fn decompress(key: &PublicKey) -> Option<EdwardsPoint> {
    CompressedEdwardsY(key.0).decompress()
}

fn canonical_scalar(secret: &SecretKey) -> StakeResult<Scalar> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(secret.0))
        .ok_or_else(|| StakeError::Crypto("secret key is not a canonical scalar".into()))
}

/// Whether the encoding denotes a point on the curve.
pub fn check_key(key: &PublicKey) -> bool {
    decompress(key).is_some()
}

pub fn random_scalar() -> SecretKey {
    let mut wide = [0u8; 64];
    OsRng.fill_bytes(&mut wide);
    SecretKey(Scalar::from_bytes_mod_order_wide(&wide).to_bytes())
}

pub fn generate_keypair() -> (PublicKey, SecretKey) {
    let secret = random_scalar();
    let scalar = Scalar::from_bytes_mod_order(secret.0);
    let public = EdwardsPoint::mul_base(&scalar).compress().to_bytes();
    (PublicKey(public), secret)
}

/// Shared secret `8·r·A` between a transaction key and a view key.
pub fn generate_key_derivation(
    public: &PublicKey,
    secret: &SecretKey,
) -> StakeResult<KeyDerivation> {
    let point = decompress(public)
        .ok_or_else(|| StakeError::Crypto("key derivation base is not a valid point".into()))?;
    let scalar = canonical_scalar(secret)?;
    let shared = (point * scalar).mul_by_cofactor();
    Ok(KeyDerivation(shared.compress().to_bytes()))
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn derivation_scalar(derivation: &KeyDerivation, output_index: u64) -> Scalar {
    let mut buf = Vec::with_capacity(40);
    buf.extend_from_slice(&derivation.0);
    write_varint(&mut buf, output_index);
    hash_to_scalar(&buf)
}

/// Per-output scalar `Hs(derivation ‖ n)` feeding one-time keys and ECDH.
pub fn derivation_to_scalar(derivation: &KeyDerivation, output_index: u64) -> SecretKey {
    SecretKey(derivation_scalar(derivation, output_index).to_bytes())
}

/// One-time output key `Hs(derivation ‖ n)·G + B` for spend key `B`.
pub fn derive_public_key(
    derivation: &KeyDerivation,
    output_index: u64,
    spend_public: &PublicKey,
) -> StakeResult<PublicKey> {
    let base = decompress(spend_public)
        .ok_or_else(|| StakeError::Crypto("spend public key is not a valid point".into()))?;
    let point = EdwardsPoint::mul_base(&derivation_scalar(derivation, output_index)) + base;
    Ok(PublicKey(point.compress().to_bytes()))
}

fn signature_challenge(prefix_hash: &Hash, public: &PublicKey, commitment: &[u8; 32]) -> Scalar {
    let mut buf = Vec::with_capacity(96);
    buf.extend_from_slice(&prefix_hash.0);
    buf.extend_from_slice(&public.0);
    buf.extend_from_slice(commitment);
    hash_to_scalar(&buf)
}

pub fn generate_signature(
    prefix_hash: &Hash,
    public: &PublicKey,
    secret: &SecretKey,
) -> StakeResult<Signature> {
    let sec = canonical_scalar(secret)?;
    let k = Scalar::from_bytes_mod_order(random_scalar().0);
    let commitment = EdwardsPoint::mul_base(&k).compress().to_bytes();
    let c = signature_challenge(prefix_hash, public, &commitment);
    let r = k - c * sec;
    Ok(Signature {
        c: c.to_bytes(),
        r: r.to_bytes(),
    })
}

pub fn check_signature(prefix_hash: &Hash, public: &PublicKey, signature: &Signature) -> bool {
    let Some(point) = decompress(public) else {
        return false;
    };
    let Some(c) = Option::<Scalar>::from(Scalar::from_canonical_bytes(signature.c)) else {
        return false;
    };
    let Some(r) = Option::<Scalar>::from(Scalar::from_canonical_bytes(signature.r)) else {
        return false;
    };
    let commitment = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &point, &r)
        .compress()
        .to_bytes();
    signature_challenge(prefix_hash, public, &commitment) == c
}

fn ecdh_hash1(shared: &SecretKey) -> Scalar {
    hash_to_scalar(&shared.0)
}

fn ecdh_hash2(shared: &SecretKey) -> Scalar {
    hash_to_scalar(&ecdh_hash1(shared).to_bytes())
}

/// Wallet-side ECDH masking of `(mask, amount)` with a per-output shared
/// scalar. The inverse of [`decode_rct_amount`].
pub fn ecdh_encode(amount: u64, mask: &SecretKey, shared: &SecretKey) -> StakeResult<EcdhTuple> {
    let mask_scalar = canonical_scalar(mask)?;
    let masked_mask = mask_scalar + ecdh_hash1(shared);
    let masked_amount = Scalar::from(amount) + ecdh_hash2(shared);
    Ok(EcdhTuple {
        mask: masked_mask.to_bytes(),
        amount: masked_amount.to_bytes(),
    })
}

/// Pedersen commitment `mask·G + amount·H`.
pub fn rct_commitment(amount: u64, mask: &SecretKey) -> StakeResult<PublicKey> {
    let mask_scalar = canonical_scalar(mask)?;
    let point = EdwardsPoint::mul_base(&mask_scalar) + *H_POINT * Scalar::from(amount);
    Ok(PublicKey(point.compress().to_bytes()))
}

/// Unmask one ECDH tuple and accept the amount only when the rebuilt
/// commitment matches the on-chain one. `None` means the output does not
/// decode to a consistent amount under this shared scalar.
pub fn decode_rct_amount(
    ecdh: &EcdhTuple,
    shared: &SecretKey,
    commitment: &PublicKey,
) -> Option<u64> {
    let mask = Scalar::from_bytes_mod_order(ecdh.mask) - ecdh_hash1(shared);
    let amount_key = Scalar::from_bytes_mod_order(ecdh.amount) - ecdh_hash2(shared);
    let rebuilt = EdwardsPoint::mul_base(&mask) + *H_POINT * amount_key;
    if rebuilt.compress().to_bytes() != commitment.0 {
        return None;
    }
    let bytes = amount_key.to_bytes();
    let mut amount = [0u8; 8];
    amount.copy_from_slice(&bytes[..8]);
    Some(u64::from_le_bytes(amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let (public, secret) = generate_keypair();
        let digest = cn_fast_hash(b"stake registration payload");
        let signature = generate_signature(&digest, &public, &secret).expect("sign");
        assert!(check_signature(&digest, &public, &signature));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let (public, secret) = generate_keypair();
        let digest = cn_fast_hash(b"stake registration payload");
        let mut signature = generate_signature(&digest, &public, &secret).expect("sign");
        signature.r[0] ^= 0x01;
        assert!(!check_signature(&digest, &public, &signature));
        let other_digest = cn_fast_hash(b"different payload");
        let signature = generate_signature(&digest, &public, &secret).expect("sign");
        assert!(!check_signature(&other_digest, &public, &signature));
    }

    #[test]
    fn derivation_matches_between_sender_and_receiver() {
        // Sender derives from the receiver view public key and the tx secret;
        // receiver derives from the tx public key and the view secret.
        let (view_public, view_secret) = generate_keypair();
        let (tx_public, tx_secret) = generate_keypair();
        let sender = generate_key_derivation(&view_public, &tx_secret).expect("sender derivation");
        let receiver =
            generate_key_derivation(&tx_public, &view_secret).expect("receiver derivation");
        assert_eq!(sender, receiver);

        let (spend_public, _) = generate_keypair();
        let one_time = derive_public_key(&sender, 3, &spend_public).expect("one-time key");
        let again = derive_public_key(&receiver, 3, &spend_public).expect("one-time key");
        assert_eq!(one_time, again);
    }

    #[test]
    fn ecdh_round_trip_with_commitment() {
        let (view_public, _) = generate_keypair();
        let (_, tx_secret) = generate_keypair();
        let derivation = generate_key_derivation(&view_public, &tx_secret).expect("derivation");
        let shared = derivation_to_scalar(&derivation, 0);
        let mask = random_scalar();
        let amount = 50 * crate::config::COIN;

        let ecdh = ecdh_encode(amount, &mask, &shared).expect("encode");
        let commitment = rct_commitment(amount, &mask).expect("commitment");
        assert_eq!(decode_rct_amount(&ecdh, &shared, &commitment), Some(amount));

        // A foreign commitment must make decoding fail outright.
        let other = rct_commitment(amount + 1, &mask).expect("commitment");
        assert_eq!(decode_rct_amount(&ecdh, &shared, &other), None);

        // So must a wrong shared scalar.
        let wrong_shared = derivation_to_scalar(&derivation, 1);
        assert_eq!(decode_rct_amount(&ecdh, &wrong_shared, &commitment), None);
    }

    #[test]
    fn check_key_rejects_non_points() {
        let (public, _) = generate_keypair();
        assert!(check_key(&public));
        // Not every 32-byte string decompresses; this one has the high bit
        // pattern of an invalid y coordinate.
        let invalid = PublicKey([0xff; 32]);
        assert!(!check_key(&invalid));
    }

    #[test]
    fn hex_round_trip() {
        let (public, _) = generate_keypair();
        let parsed = PublicKey::from_hex(&public.to_hex()).expect("parse");
        assert_eq!(parsed, public);
        assert!(PublicKey::from_hex("abcd").is_err());
    }
}
