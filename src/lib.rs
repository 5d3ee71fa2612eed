//! # Luck Chain - My Proof of Luck Blockchain
//!
//! A blockchain where blocks are not mined with hashing work. Each block
//! carries a lucky number attested by a trusted luck oracle, and the chain
//! with the highest total luck wins.
//!
//! ## What I Built
//! - **Consensus**: nine-check block validation, block building with change
//!   outputs, luck comparison and fork replacement
//! - **Ledger**: balances and unspent outputs derived from recorded history
//! - **Chain Store**: sled trees for the main chain and every fork, written
//!   atomically
//! - **Luck Oracle**: a software enclave that draws, waits and signs
//! - **Node**: background miner and test traffic workers
//!
//! ## How I Organized My Code
//! - `core/`: blocks, transactions, Merkle trees, the oracle, the wire codec
//!   and the consensus engine
//! - `storage/`: chain store, ledger, memory pool
//! - `wallet/`: key files and transaction signing
//! - `node/`: workers and the network-facing entry points
//! - `config/`: settings from file, environment and flags
//! - `utils/`: hashing, signatures and record encoding
//! - `cli/`: command-line arguments
//!
//! ## When I Need to Understand Something
//! 1. Start with `core/blockchain.rs` for validation and fork handling
//! 2. Look at `storage/chain_store.rs` for how forks are stored
//! 3. Check `core/proof_of_luck.rs` for how luck is drawn and attested

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod node;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    decode_block, decode_transaction, encode_block, encode_transaction, Block, BlockOutcome,
    Blockchain, ForkVerdict, LuckOracle, LuckProof, MerkleProof, MerkleTree, SimulatedEnclave,
    Transaction, GENESIS_MINER, MINER_REWARD, ROUND_TIME,
};
pub use error::{BlockchainError, Result};
pub use node::{BlockSink, LoggingSink, Node, Worker};
pub use storage::{ChainStore, CursorMode, ForkId, Ledger, LedgerEntry, MemoryPool, Utxo};
pub use utils::{current_timestamp, sha256_hex};
pub use wallet::Wallet;
