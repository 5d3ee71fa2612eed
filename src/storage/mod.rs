//! Data storage and persistence
//!
//! The sled-backed chain store with its fork namespaces, the ledger that
//! derives balances and unspent outputs from it, and the pending
//! transaction pool.

pub mod chain_store;
pub mod ledger;
pub mod memory_pool;

pub use chain_store::{BlockCursor, ChainStore, CursorMode, ForkId, LedgerEntry};
pub use ledger::{Ledger, Utxo};
pub use memory_pool::MemoryPool;
