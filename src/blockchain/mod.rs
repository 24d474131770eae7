pub mod block;
pub mod difficulty;
pub mod error;
pub mod gate;
pub mod model;

use primitive_types::U256;

pub use block::Block;
pub use error::{ChainError, ConsensusError};
pub use gate::{MutationClass, SubmissionGate};
pub use model::{Blockchain, ChainParams, GenesisConfig, MiningInfo};

/// Initial proof-of-work target, 2^240 - 1 (`0x0000ffff…ff`).
pub const INITIAL_DIFFICULTY: U256 = U256([u64::MAX, u64::MAX, u64::MAX, 0x0000_ffff_ffff_ffff]);

/// Coinbase reward, 5 * 10^19 base units.
pub const MINING_REWARD: U256 = U256([13_106_511_852_580_896_768, 2, 0, 0]);

/// Desired milliseconds between blocks.
pub const TARGET_MINE_TIME_MS: u64 = 5_000;

/// Retarget after every block whose index is a multiple of this.
pub const RETARGET_PERIOD: u64 = 10;

/// Upper bound on transfers a mining template carries.
pub const MAX_TXS_PER_BLOCK: usize = 500;

pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_TIMESTAMP: u64 = 0;

pub const CHAIN_NAME: &str = "particles";
