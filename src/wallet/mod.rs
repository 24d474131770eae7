use rand::rngs::OsRng;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid private key")]
    InvalidPrivateKey,
}

/// Recoverable secp256k1 signature over `digest` (SHA-256 of the signed message).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Hex of the 32-byte message digest.
    pub digest: String,
    /// Hex of the 64-byte compact signature.
    pub signature: String,
    pub recovery_id: i32,
}

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Generate a new secp256k1 keypair and return (priv_hex, pub_hex_uncompressed, address).
pub fn generate_keypair() -> (String, String, String) {
    let secp = Secp256k1::new();
    let (sk, pk) = secp.generate_keypair(&mut OsRng);
    let sk_hex = hex::encode(sk.secret_bytes());
    let pk_hex = hex::encode(pk.serialize_uncompressed());
    let address = address_from_public_key(&pk);
    (sk_hex, pk_hex, address)
}

/// Keccak-256 of the 64-byte public key (no 0x04 tag), last 20 bytes, checksum-cased.
pub fn address_from_public_key(pk: &PublicKey) -> String {
    let uncompressed = pk.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    to_checksum(&hex::encode(&hash[12..]))
}

pub fn address_from_private_key(private_key_hex: &str) -> Result<String, CryptoError> {
    let sk = parse_private_key(private_key_hex)?;
    let secp = Secp256k1::signing_only();
    Ok(address_from_public_key(&PublicKey::from_secret_key(&secp, &sk)))
}

fn parse_private_key(private_key_hex: &str) -> Result<SecretKey, CryptoError> {
    let bytes = hex::decode(private_key_hex.trim_start_matches("0x"))
        .map_err(|_| CryptoError::InvalidPrivateKey)?;
    SecretKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPrivateKey)
}

/// Sign SHA-256(message) with the given hex private key.
pub fn sign(message: &[u8], private_key_hex: &str) -> Result<Signature, CryptoError> {
    let sk = parse_private_key(private_key_hex)?;
    let digest = sha256(message);
    let msg = Message::from_digest_slice(&digest)
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

    let secp = Secp256k1::signing_only();
    let (recovery_id, compact) = secp.sign_ecdsa_recoverable(&msg, &sk).serialize_compact();

    Ok(Signature {
        digest: hex::encode(digest),
        signature: hex::encode(compact),
        recovery_id: recovery_id.to_i32(),
    })
}

/// Recover the signer's address from `(digest, signature, recovery_id)`.
pub fn recover_address(sig: &Signature) -> Result<String, CryptoError> {
    let invalid = |what: &str| CryptoError::InvalidSignature(what.to_string());

    let digest = hex::decode(&sig.digest).map_err(|_| invalid("digest is not hex"))?;
    let msg = Message::from_digest_slice(&digest).map_err(|_| invalid("digest must be 32 bytes"))?;

    let compact = hex::decode(&sig.signature).map_err(|_| invalid("signature is not hex"))?;
    let recovery_id =
        RecoveryId::from_i32(sig.recovery_id).map_err(|_| invalid("bad recovery id"))?;
    let recoverable = RecoverableSignature::from_compact(&compact, recovery_id)
        .map_err(|_| invalid("malformed compact signature"))?;

    let secp = Secp256k1::verification_only();
    let pk = secp
        .recover_ecdsa(&msg, &recoverable)
        .map_err(|_| invalid("public key recovery failed"))?;
    Ok(address_from_public_key(&pk))
}

/// Mixed-case checksum encoding of `raw` (any case, with or without `0x`).
pub fn checksum_address(raw: &str) -> Result<String, CryptoError> {
    let body = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CryptoError::InvalidAddress(raw.to_string()));
    }
    Ok(to_checksum(&body.to_ascii_lowercase()))
}

/// An address is valid only when it is already in its exact checksum form.
pub fn is_valid_address(s: &str) -> bool {
    s.starts_with("0x") && checksum_address(s).is_ok_and(|c| c == s)
}

// `lower` is 40 lowercase hex chars without prefix.
fn to_checksum(lower: &str) -> String {
    let hash = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
