use primitive_types::U256;
use serde::{Deserialize, Serialize};

use super::{GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP};
use crate::transaction::{BlockTransaction, CoinbaseTx, Transaction};
use crate::util::u256_dec;
use crate::wallet::sha256;

/// A single block: coinbase entry first, then transfers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub previous_hash: String,
    pub hash: String,
    pub transactions: Vec<BlockTransaction>,
    /// Proof-of-work nonce
    pub nonce: u64,
    #[serde(with = "u256_dec")]
    pub difficulty: U256,
    /// Stamped by the pool on acceptance; not part of the hash.
    #[serde(default)]
    pub state_root: String,
}

/// Everything that goes into a block hash except the nonce, pre-serialized so
/// the mining loop only formats one integer per attempt.
#[derive(Debug, Clone)]
pub struct HashInput {
    prefix: String,
    suffix: String,
}

impl HashInput {
    pub fn of(block: &Block) -> Self {
        // Only strings, integers and derived structs: serializing to a String cannot fail.
        let txs_json =
            serde_json::to_string(&block.transactions).expect("block transactions serialize");
        Self {
            prefix: format!(
                "{}:{}:{}:",
                block.index, block.timestamp, block.previous_hash
            ),
            suffix: format!(":{}:{}", block.difficulty, txs_json),
        }
    }

    /// Hex SHA-256 of `index:timestamp:previousHash:nonce:difficulty:transactions`.
    pub fn hash(&self, nonce: u64) -> String {
        let preimage = format!("{}{}{}", self.prefix, nonce, self.suffix);
        hex::encode(sha256(preimage.as_bytes()))
    }
}

impl Block {
    /// Block 0: fixed previous hash and timestamp, no transactions.
    pub fn genesis(difficulty: U256) -> Self {
        Self::new(
            0,
            GENESIS_TIMESTAMP,
            GENESIS_PREVIOUS_HASH.to_string(),
            Vec::new(),
            difficulty,
        )
    }

    /// Create a new block (not mined yet). Call `miner::mine_block` to perform PoW.
    pub fn new(
        index: u64,
        timestamp: u64,
        previous_hash: String,
        transactions: Vec<BlockTransaction>,
        difficulty: U256,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            previous_hash,
            hash: String::new(),
            transactions,
            nonce: 0,
            difficulty,
            state_root: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Hash of the block with `hash` (and `stateRoot`) left out.
    pub fn compute_hash(&self) -> String {
        HashInput::of(self).hash(self.nonce)
    }

    pub fn coinbase(&self) -> Option<&CoinbaseTx> {
        match self.transactions.first() {
            Some(BlockTransaction::Coinbase(cb)) => Some(cb),
            _ => None,
        }
    }

    /// Transfers after the coinbase; `None` marks a misplaced coinbase entry.
    pub fn transfers(&self) -> impl Iterator<Item = Option<&Transaction>> {
        self.transactions.iter().skip(1).map(|entry| match entry {
            BlockTransaction::Transfer(tx) => Some(tx),
            BlockTransaction::Coinbase(_) => None,
        })
    }
}

/// Big-endian integer value of a hex hash; `None` unless it is exactly 32 bytes.
pub fn hash_value(hash: &str) -> Option<U256> {
    let bytes = hex::decode(hash).ok()?;
    (bytes.len() == 32).then(|| U256::from_big_endian(&bytes))
}

/// Lower hash means more work: the hash must be strictly below the target.
pub fn meets_difficulty(hash: &str, difficulty: U256) -> bool {
    hash_value(hash).is_some_and(|value| value < difficulty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::INITIAL_DIFFICULTY;

    const MINER: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn sample() -> Block {
        Block::new(
            1,
            1_700_000_000_000,
            "ab".repeat(32),
            vec![BlockTransaction::Coinbase(CoinbaseTx::new(MINER, U256::from(50)))],
            INITIAL_DIFFICULTY,
        )
    }

    #[test]
    fn genesis_has_valid_hash() {
        let b = Block::genesis(INITIAL_DIFFICULTY);
        assert_eq!(b.index, 0);
        assert_eq!(b.previous_hash, "0");
        assert_eq!(b.hash, b.compute_hash());
        assert_eq!(b.hash.len(), 64);
    }

    #[test]
    fn hash_changes_with_every_covered_field() {
        let b = sample();
        let mut other = b.clone();
        other.nonce += 1;
        assert_ne!(other.compute_hash(), b.hash);

        let mut other = b.clone();
        other.difficulty = other.difficulty - 1;
        assert_ne!(other.compute_hash(), b.hash);

        let mut other = b.clone();
        other.transactions.clear();
        assert_ne!(other.compute_hash(), b.hash);

        // the state root is stamped after mining
        let mut other = b.clone();
        other.state_root = "0x00".into();
        assert_eq!(other.compute_hash(), b.hash);
    }

    #[test]
    fn difficulty_is_an_upper_bound() {
        let low = format!("{}{}", "0".repeat(63), "5");
        assert!(meets_difficulty(&low, U256::from(6)));
        assert!(!meets_difficulty(&low, U256::from(5)));
        assert!(!meets_difficulty("zz", U256::MAX));
        assert!(!meets_difficulty("00", U256::MAX));
        assert_eq!(hash_value(&"ff".repeat(32)), Some(U256::MAX));
    }

    #[test]
    fn coinbase_and_transfers_views() {
        let mut b = sample();
        assert_eq!(b.coinbase().unwrap().from, MINER);
        assert_eq!(b.transfers().count(), 0);

        b.transactions
            .push(BlockTransaction::Coinbase(CoinbaseTx::new(MINER, U256::one())));
        assert_eq!(b.transfers().collect::<Vec<_>>(), vec![None]);
    }
}
