//! Test utilities for chain and consensus testing

use crate::core::{Block, BlockOutcome, Blockchain, SimulatedEnclave, Transaction};
use crate::storage::{ChainStore, ForkId, MemoryPool};
use crate::wallet::Wallet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// An empty store in a temporary directory. Keep the directory alive as
/// long as the store is used.
pub fn test_store() -> (TempDir, ChainStore) {
    let dir = TempDir::new().unwrap();
    let store = ChainStore::open(&dir.path().join("chain")).unwrap();
    (dir, store)
}

/// Next block after `previous` with a placeholder certificate. Only for
/// storage tests; it does not pass certificate verification.
pub fn chain_block(previous: &Block, transactions: Vec<Transaction>, lucky_number: f64) -> Block {
    let mut block = Block::new_block(
        previous.get_hash().to_string(),
        &transactions,
        previous.get_index() + 1,
        previous.get_timestamp() + 10,
    )
    .unwrap();
    block.stamp_luck(lucky_number, "cert".to_string());
    block
}

/// An engine on a fresh store whose oracle is `enclave`, plus a wallet
/// for signing transfers
pub struct TestChain {
    pub blockchain: Blockchain,
    pub alice: Wallet,
    pub enclave: Arc<SimulatedEnclave>,
    pub _dir: TempDir,
}

impl TestChain {
    /// Coinbase-only block on `previous`, `offset` seconds later, attested
    /// with the chosen luck
    pub fn block_on(&self, previous: &Block, miner: &str, lucky_number: f64, offset: i64) -> Block {
        let timestamp = previous.get_timestamp() + offset;
        let mut block = Block::new_block(
            previous.get_hash().to_string(),
            &[Transaction::new_coinbase(miner, timestamp)],
            previous.get_index() + 1,
            timestamp,
        )
        .unwrap();
        let certificate = self
            .enclave
            .attest(block.get_merkle_hash(), block.get_previous_hash(), lucky_number)
            .unwrap();
        block.stamp_luck(lucky_number, certificate);
        block
    }
}

pub fn test_blockchain() -> TestChain {
    let (dir, store) = test_store();
    let enclave = Arc::new(SimulatedEnclave::new(Duration::ZERO).unwrap());
    let blockchain =
        Blockchain::new(store, enclave.clone(), Arc::new(MemoryPool::new())).unwrap();
    TestChain {
        blockchain,
        alice: Wallet::new().unwrap(),
        enclave,
        _dir: dir,
    }
}

/// Genesis plus one block whose coinbase pays alice 50
pub fn funded_chain() -> TestChain {
    let chain = test_blockchain();
    let genesis = chain.blockchain.latest_block().unwrap();
    let block = chain.block_on(&genesis, &chain.alice.get_identity(), 0.5, 30);
    let mut fork = ForkId::MAIN;
    assert_eq!(
        chain.blockchain.handle_block(&block, &mut fork).unwrap(),
        BlockOutcome::Applied
    );
    chain
}

/// Build the next block from the mempool, `offset` seconds after the tip,
/// and attest it with the chosen luck
pub fn attested_block(
    blockchain: &Blockchain,
    enclave: &SimulatedEnclave,
    miner: &str,
    lucky_number: f64,
    offset: i64,
) -> Block {
    let tip = blockchain.latest_block().unwrap();
    let mut block = blockchain
        .build_new_block_at(miner, &tip, tip.get_timestamp() + offset)
        .unwrap();
    let certificate = enclave
        .attest(block.get_merkle_hash(), block.get_previous_hash(), lucky_number)
        .unwrap();
    block.stamp_luck(lucky_number, certificate);
    block
}
