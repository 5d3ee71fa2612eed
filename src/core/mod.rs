//! Core ledger functionality
//!
//! Blocks, transactions, the Merkle engine, the wire codec, the luck oracle
//! and the consensus engine that ties them to the chain store.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_luck;
pub mod transaction;
pub mod wire;

pub use block::Block;
pub use blockchain::{BlockOutcome, Blockchain, ForkVerdict};
pub use merkle::{MerkleProof, MerkleTree, ProofElement};
pub use proof_of_luck::{LuckOracle, LuckProof, SimulatedEnclave};
pub use transaction::Transaction;
pub use wire::{decode_block, decode_transaction, encode_block, encode_transaction};

/// Fixed reward paid by every coinbase transaction
pub const MINER_REWARD: i64 = 50;

/// Seconds between block rounds
pub const ROUND_TIME: u64 = 30;

/// Recipient of the genesis reward
pub const GENESIS_MINER: &str = "GenesisMiner";

/// Timestamp of the genesis block
pub const GENESIS_TIMESTAMP: i64 = 1_523_013_300;
