pub mod model;

pub use model::{BlockTransaction, CoinbaseTx, Opcode, Transaction};
