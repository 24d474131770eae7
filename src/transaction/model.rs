use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::util::u256_dec;
use crate::wallet::{self, CryptoError, Signature, sha256};

/// Closed opcode table. Adding an opcode forces every `match` to handle it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Opcode {
    /// Block reward mint; only valid as the first entry of a block.
    Coinbase,
    /// Transfer `amount` from `from` to `to`.
    Receive,
}

/// Signed value transfer submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub from: String,
    pub to: String,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub opcode: Opcode,
    /// Must equal the sender's account nonce when applied.
    pub index: u64,
    pub hash: String,
    pub sig: Signature,
}

impl Transaction {
    /// Build and sign a `receive` transfer. This is the client-side path; the
    /// sender address is derived from the key.
    pub fn signed(
        private_key_hex: &str,
        to: &str,
        amount: U256,
        index: u64,
    ) -> Result<Self, CryptoError> {
        let mut tx = Self {
            from: wallet::address_from_private_key(private_key_hex)?,
            to: to.to_string(),
            amount,
            opcode: Opcode::Receive,
            index,
            hash: String::new(),
            sig: Signature::default(),
        };
        tx.hash = tx.compute_hash();
        tx.sig = wallet::sign(&tx.signing_payload(), private_key_hex)?;
        Ok(tx)
    }

    /// Canonical body (sorted keys) without `hash` and `sig`.
    fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "from": self.from,
            "to": self.to,
            "amount": self.amount.to_string(),
            "opcode": self.opcode,
            "index": self.index,
        })
    }

    /// Hex SHA-256 of the transaction with `hash` and `sig` cleared.
    pub fn compute_hash(&self) -> String {
        hex::encode(sha256(self.body().to_string().as_bytes()))
    }

    /// Message the sender signs: the body plus its hash.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = self.body();
        payload["hash"] = serde_json::Value::from(self.hash.as_str());
        payload.to_string().into_bytes()
    }

    /// True when `sig.digest` really is the digest of this transaction's payload.
    pub fn digest_matches(&self) -> bool {
        self.sig.digest == hex::encode(sha256(&self.signing_payload()))
    }
}

/// Reward entry leading every block. Not signed; consensus alone authorizes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CoinbaseTx {
    pub from: String,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub opcode: Opcode,
}

impl CoinbaseTx {
    pub fn new(miner_address: &str, reward: U256) -> Self {
        Self {
            from: miner_address.to_string(),
            amount: reward,
            opcode: Opcode::Coinbase,
        }
    }
}

/// An entry of `Block::transactions`: the coinbase first, transfers after it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BlockTransaction {
    Coinbase(CoinbaseTx),
    Transfer(Transaction),
}
