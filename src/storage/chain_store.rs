//! Persistent chain and fork storage
//!
//! The main chain and every fork live in their own namespace of three sled
//! trees: blocks keyed by index, transactions keyed by (index, position) and
//! inputs keyed by (index, position, input). Keys are big-endian so range
//! scans walk index order. A `forks` tree registers the live fork ids.
//!
//! Every public operation holds the store lock, a reentrant mutex shared by
//! all clones of the store. Multi-tree writes go through one sled
//! transaction so a crash never leaves a block without its transactions.

use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, index_key, input_key, key_index, serialize, transaction_key};
use log::{debug, info, warn};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::{Db, Transactional, Tree};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

const MAIN_BLOCKS_TREE: &str = "main/blocks";
const MAIN_TRANSACTIONS_TREE: &str = "main/transactions";
const MAIN_INPUTS_TREE: &str = "main/inputs";
const FORKS_TREE: &str = "forks";

/// Identifies the namespace a block belongs to. Zero is the main chain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ForkId(u64);

impl ForkId {
    pub const MAIN: ForkId = ForkId(0);

    pub fn new(id: u64) -> ForkId {
        ForkId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_main(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ForkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            write!(f, "main")
        } else {
            write!(f, "fork {}", self.0)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct BlockRecord {
    hash: String,
    previous_hash: String,
    merkle_hash: String,
    lucky_number: [u8; 8],
    timestamp: i64,
    transaction_count: u32,
    certificate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct TransactionRecord {
    sender: String,
    recipient: String,
    value: i64,
    hash: String,
    timestamp: i64,
    input_count: u32,
}

#[derive(Clone)]
struct Namespace {
    blocks: Tree,
    transactions: Tree,
    inputs: Tree,
}

#[derive(Default)]
struct TableWrites {
    remove: Vec<Vec<u8>>,
    insert: Vec<(Vec<u8>, Vec<u8>)>,
}

// Staged changes for one namespace, committed atomically
#[derive(Default)]
struct WriteSet {
    blocks: TableWrites,
    transactions: TableWrites,
    inputs: TableWrites,
}

/// A transaction together with the index of the block that holds it
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub block_index: u64,
    pub transaction: Transaction,
}

/// Which blocks a [`BlockCursor`] walks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// Main chain from genesis
    Main,
    /// Only the blocks stored in the fork
    ForkOnly(ForkId),
    /// Main chain up to the fork point, then the fork's blocks
    Merged(ForkId),
}

#[derive(Clone)]
pub struct ChainStore {
    db: Db,
    main: Namespace,
    forks: Tree,
    lock: Arc<ReentrantMutex<()>>,
}

impl ChainStore {
    pub fn open(path: &Path) -> Result<ChainStore> {
        let db = sled::open(path).map_err(|e| {
            BlockchainError::Database(format!("Failed to open database at {}: {e}", path.display()))
        })?;
        let main = Namespace {
            blocks: db.open_tree(MAIN_BLOCKS_TREE)?,
            transactions: db.open_tree(MAIN_TRANSACTIONS_TREE)?,
            inputs: db.open_tree(MAIN_INPUTS_TREE)?,
        };
        let forks = db.open_tree(FORKS_TREE)?;
        Ok(ChainStore {
            db,
            main,
            forks,
            lock: Arc::new(ReentrantMutex::new(())),
        })
    }

    /// Take the store lock for a multi-step sequence of calls
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| BlockchainError::Database(format!("Failed to flush database: {e}")))?;
        Ok(())
    }

    pub fn blockchain_initialized(&self) -> Result<bool> {
        let _guard = self.lock();
        Ok(!self.main.blocks.is_empty())
    }

    /// Write the genesis block if the main chain is empty
    pub fn initialize_genesis(&self) -> Result<Block> {
        let _guard = self.lock();
        let genesis = Block::generate_genesis_block()?;
        if self.main.blocks.is_empty() {
            self.add_block(&genesis, ForkId::MAIN)?;
            info!("Created genesis block {}", genesis.get_hash());
        }
        Ok(genesis)
    }

    /// Append a block to a namespace, replacing any block already stored at its index
    pub fn add_block(&self, block: &Block, fork: ForkId) -> Result<()> {
        let _guard = self.lock();
        let ns = self.namespace(fork)?;
        let mut writes = WriteSet::default();
        Self::stage_block(&ns, block, &mut writes)?;
        Self::commit(&ns, &writes)?;
        debug!("Stored block {} on {fork}", block.get_index());
        Ok(())
    }

    pub fn create_fork(&self) -> Result<ForkId> {
        let _guard = self.lock();
        // sled ids start at zero, which is taken by the main chain
        let fork = ForkId::new(self.db.generate_id()? + 1);
        self.forks.insert(index_key(fork.as_u64()), Vec::<u8>::new())?;
        info!("Created {fork}");
        Ok(fork)
    }

    pub fn fork_exists(&self, fork: ForkId) -> Result<bool> {
        if fork.is_main() {
            return Ok(true);
        }
        let _guard = self.lock();
        Ok(self.forks.contains_key(index_key(fork.as_u64()))?)
    }

    /// Live fork ids in creation order
    pub fn forks(&self) -> Result<Vec<ForkId>> {
        let _guard = self.lock();
        self.forks
            .iter()
            .keys()
            .map(|key| -> Result<ForkId> { Ok(ForkId::new(key_index(&key?)?)) })
            .collect()
    }

    pub fn delete_fork(&self, fork: ForkId) -> Result<()> {
        if fork.is_main() {
            return Err(BlockchainError::Database(
                "The main chain cannot be deleted".to_string(),
            ));
        }
        let _guard = self.lock();
        for name in Self::fork_tree_names(fork) {
            self.db.drop_tree(name)?;
        }
        self.forks.remove(index_key(fork.as_u64()))?;
        info!("Deleted {fork}");
        Ok(())
    }

    /// Copy every block of the fork into the main chain, drop main blocks
    /// above the fork's last index, then delete the fork.
    pub fn apply_fork(&self, fork: ForkId) -> Result<()> {
        let _guard = self.lock();
        let fork_ns = self.namespace(fork)?;

        let fork_blocks = Self::load_blocks(&fork_ns, 0, u64::MAX)?;
        if let Some(last) = fork_blocks.last() {
            let mut writes = WriteSet::default();
            Self::stage_truncate(&self.main, last.get_index() + 1, &mut writes)?;
            for block in &fork_blocks {
                Self::stage_block(&self.main, block, &mut writes)?;
            }
            Self::commit(&self.main, &writes)?;
            info!(
                "Applied {fork}: blocks {}..={} now on the main chain",
                fork_blocks[0].get_index(),
                last.get_index()
            );
        } else {
            warn!("Applied {fork} without blocks");
        }

        self.delete_fork(fork)
    }

    /// Delete every main-chain block at or above `index`
    pub fn clean_up_from_index(&self, index: u64) -> Result<()> {
        let _guard = self.lock();
        let mut writes = WriteSet::default();
        Self::stage_truncate(&self.main, index, &mut writes)?;
        let removed = writes.blocks.remove.len();
        Self::commit(&self.main, &writes)?;
        warn!("Removed {removed} main-chain blocks from index {index}");
        Ok(())
    }

    /// Block stored directly in the namespace
    pub fn get_block(&self, index: u64, fork: ForkId) -> Result<Option<Block>> {
        let _guard = self.lock();
        let ns = self.namespace(fork)?;
        Self::load_block(&ns, index)
    }

    /// Block at `index` as seen from `fork`: fork blocks from the fork's
    /// first index on, main-chain blocks below it.
    pub fn block_at(&self, index: u64, fork: ForkId) -> Result<Option<Block>> {
        let _guard = self.lock();
        if !fork.is_main() {
            if let Some(first) = self.first_fork_block_index(fork)? {
                if index >= first {
                    return self.get_block(index, fork);
                }
            }
        }
        self.get_block(index, ForkId::MAIN)
    }

    /// Highest index stored in the namespace, 0 when it is empty
    pub fn last_block_index(&self, fork: ForkId) -> Result<u64> {
        let _guard = self.lock();
        let ns = self.namespace(fork)?;
        match ns.blocks.last()? {
            Some((key, _)) => key_index(&key),
            None => Ok(0),
        }
    }

    pub fn first_fork_block_index(&self, fork: ForkId) -> Result<Option<u64>> {
        let _guard = self.lock();
        let ns = self.namespace(fork)?;
        match ns.blocks.first()? {
            Some((key, _)) => Ok(Some(key_index(&key)?)),
            None => Ok(None),
        }
    }

    pub fn latest_block(&self) -> Result<Option<Block>> {
        let _guard = self.lock();
        let last = self.last_block_index(ForkId::MAIN)?;
        if last == 0 {
            return Ok(None);
        }
        Self::load_block(&self.main, last)
    }

    /// Every block stored in the namespace, in index order
    pub fn fork_blocks(&self, fork: ForkId) -> Result<Vec<Block>> {
        let _guard = self.lock();
        let ns = self.namespace(fork)?;
        Self::load_blocks(&ns, 0, u64::MAX)
    }

    /// Walk blocks in index order. The cursor holds the store lock until it
    /// is dropped.
    pub fn iter_blocks(&self, mode: CursorMode) -> Result<BlockCursor<'_>> {
        let guard = self.lock();
        let (start, fork) = match mode {
            CursorMode::Main => (1, None),
            CursorMode::ForkOnly(fork) | CursorMode::Merged(fork) => {
                let ns = self.namespace(fork)?;
                let first = self.first_fork_block_index(fork)?.unwrap_or(u64::MAX);
                let start = if matches!(mode, CursorMode::ForkOnly(_)) {
                    first
                } else {
                    1
                };
                (start, Some((ns, first)))
            }
        };
        Ok(BlockCursor {
            _guard: guard,
            main: self.main.clone(),
            fork,
            next_index: start,
            done: false,
        })
    }

    /// Sum of lucky numbers over the whole main chain
    pub fn lucky_sum(&self) -> Result<f64> {
        self.main_luck_between(0, u64::MAX)
    }

    /// Sum of main-chain lucky numbers for indexes in `start..=end`
    pub fn main_luck_between(&self, start: u64, end: u64) -> Result<f64> {
        let _guard = self.lock();
        let mut sum = 0.0;
        for entry in self.main.blocks.range(Self::index_range(start, end)) {
            let (_, value) = entry?;
            let record: BlockRecord = deserialize(&value)?;
            sum += f64::from_le_bytes(record.lucky_number);
        }
        Ok(sum)
    }

    /// Transactions visible from `fork` in blocks `1..=up_to`. A fork sees
    /// main-chain history strictly below its first block plus its own records.
    pub fn transactions_in_view(&self, fork: ForkId, up_to: u64) -> Result<Vec<LedgerEntry>> {
        let _guard = self.lock();
        if fork.is_main() {
            return Self::load_transactions(&self.main, 0, up_to);
        }

        let ns = self.namespace(fork)?;
        match self.first_fork_block_index(fork)? {
            Some(first) => {
                let mut entries =
                    Self::load_transactions(&self.main, 0, up_to.min(first.saturating_sub(1)))?;
                if up_to >= first {
                    entries.extend(Self::load_transactions(&ns, first, up_to)?);
                }
                Ok(entries)
            }
            None => Self::load_transactions(&self.main, 0, up_to),
        }
    }

    pub fn transaction_value_by_hash(&self, hash: &str, fork: ForkId) -> Result<Option<i64>> {
        let entries = self.transactions_in_view(fork, u64::MAX)?;
        Ok(entries
            .iter()
            .find(|entry| entry.transaction.get_hash() == hash)
            .map(|entry| entry.transaction.get_value()))
    }

    /// Whether a transaction with this hash is recorded below `before_index`
    pub fn exists_transaction(&self, hash: &str, before_index: u64, fork: ForkId) -> Result<bool> {
        if before_index <= 1 {
            return Ok(false);
        }
        let entries = self.transactions_in_view(fork, before_index - 1)?;
        Ok(entries
            .iter()
            .any(|entry| entry.transaction.get_hash() == hash))
    }

    /// Value of the distinct inputs spent by a block, looked up in the
    /// history before it. Unknown inputs count as zero.
    pub fn input_sum_of_block(&self, block: &Block, fork: ForkId) -> Result<i64> {
        let history = self.transactions_in_view(fork, block.get_index().saturating_sub(1))?;
        let values: BTreeMap<&str, i64> = history
            .iter()
            .map(|entry| (entry.transaction.get_hash(), entry.transaction.get_value()))
            .collect();

        let inputs: BTreeSet<&str> = block
            .get_transactions()
            .iter()
            .flat_map(|tx| tx.get_inputs().iter().map(String::as_str))
            .collect();

        Ok(inputs
            .into_iter()
            .map(|input| values.get(input).copied().unwrap_or(0))
            .sum())
    }

    /// Main-chain transactions in blocks at or above `index`
    pub fn transactions_from_chain_since(&self, index: u64) -> Result<Vec<Transaction>> {
        let _guard = self.lock();
        Ok(Self::load_transactions(&self.main, index, u64::MAX)?
            .into_iter()
            .map(|entry| entry.transaction)
            .collect())
    }

    pub fn transactions_from_fork(&self, fork: ForkId) -> Result<Vec<Transaction>> {
        let _guard = self.lock();
        let ns = self.namespace(fork)?;
        Ok(Self::load_transactions(&ns, 0, u64::MAX)?
            .into_iter()
            .map(|entry| entry.transaction)
            .collect())
    }

    /// Every key that ever sent or received on the main chain, minus `exclude`
    pub fn all_participants(&self, exclude: &str) -> Result<Vec<String>> {
        let entries = self.transactions_in_view(ForkId::MAIN, u64::MAX)?;
        let mut seen = HashSet::new();
        let mut participants = Vec::new();
        for entry in entries {
            for key in [entry.transaction.get_sender(), entry.transaction.get_recipient()] {
                if !key.is_empty() && key != exclude && seen.insert(key.to_string()) {
                    participants.push(key.to_string());
                }
            }
        }
        Ok(participants)
    }

    /// Main-chain transfers sent by `key`, change outputs excluded
    pub fn transactions_sent_by(&self, key: &str) -> Result<Vec<LedgerEntry>> {
        let entries = self.transactions_in_view(ForkId::MAIN, u64::MAX)?;
        Ok(entries
            .into_iter()
            .filter(|entry| {
                entry.transaction.get_sender() == key && !entry.transaction.is_self_transfer()
            })
            .collect())
    }

    fn namespace(&self, fork: ForkId) -> Result<Namespace> {
        if fork.is_main() {
            return Ok(self.main.clone());
        }
        if !self.forks.contains_key(index_key(fork.as_u64()))? {
            return Err(BlockchainError::ForkNotFound(fork.as_u64()));
        }
        let [blocks, transactions, inputs] = Self::fork_tree_names(fork);
        Ok(Namespace {
            blocks: self.db.open_tree(blocks)?,
            transactions: self.db.open_tree(transactions)?,
            inputs: self.db.open_tree(inputs)?,
        })
    }

    fn fork_tree_names(fork: ForkId) -> [String; 3] {
        let id = fork.as_u64();
        [
            format!("fork/{id}/blocks"),
            format!("fork/{id}/transactions"),
            format!("fork/{id}/inputs"),
        ]
    }

    // Byte range covering every record key whose block index lies in start..=end
    fn index_range(start: u64, end: u64) -> std::ops::RangeInclusive<Vec<u8>> {
        let mut upper = index_key(end).to_vec();
        upper.extend([0xFF; 8]);
        index_key(start).to_vec()..=upper
    }

    fn stage_block(ns: &Namespace, block: &Block, writes: &mut WriteSet) -> Result<()> {
        let index = block.get_index();
        let transaction_count = u32::try_from(block.get_transactions().len()).map_err(|_| {
            BlockchainError::InvalidBlock(format!("Block {index} has too many transactions"))
        })?;

        // Replacing a block drops whatever was recorded at that index before
        for entry in ns.transactions.range(Self::index_range(index, index)) {
            writes.transactions.remove.push(entry?.0.to_vec());
        }
        for entry in ns.inputs.range(Self::index_range(index, index)) {
            writes.inputs.remove.push(entry?.0.to_vec());
        }

        let record = BlockRecord {
            hash: block.get_hash().to_string(),
            previous_hash: block.get_previous_hash().to_string(),
            merkle_hash: block.get_merkle_hash().to_string(),
            lucky_number: block.lucky_number_bytes(),
            timestamp: block.get_timestamp(),
            transaction_count,
            certificate: block.get_certificate().to_string(),
        };
        writes
            .blocks
            .insert
            .push((index_key(index).to_vec(), serialize(&record)?));

        for (position, tx) in (0u32..).zip(block.get_transactions()) {
            let record = TransactionRecord {
                sender: tx.get_sender().to_string(),
                recipient: tx.get_recipient().to_string(),
                value: tx.get_value(),
                hash: tx.get_hash().to_string(),
                timestamp: tx.get_timestamp(),
                input_count: tx.get_inputs().len() as u32,
            };
            writes.transactions.insert.push((
                transaction_key(index, position).to_vec(),
                serialize(&record)?,
            ));
            for (slot, input) in (0u32..).zip(tx.get_inputs()) {
                writes.inputs.insert.push((
                    input_key(index, position, slot).to_vec(),
                    serialize(input)?,
                ));
            }
        }
        Ok(())
    }

    fn stage_truncate(ns: &Namespace, from_index: u64, writes: &mut WriteSet) -> Result<()> {
        let range = Self::index_range(from_index, u64::MAX);
        for entry in ns.blocks.range(range.clone()) {
            writes.blocks.remove.push(entry?.0.to_vec());
        }
        for entry in ns.transactions.range(range.clone()) {
            writes.transactions.remove.push(entry?.0.to_vec());
        }
        for entry in ns.inputs.range(range) {
            writes.inputs.remove.push(entry?.0.to_vec());
        }
        Ok(())
    }

    fn commit(ns: &Namespace, writes: &WriteSet) -> Result<()> {
        (&ns.blocks, &ns.transactions, &ns.inputs).transaction(
            |(blocks, transactions, inputs)| {
                for (tree, table) in [
                    (blocks, &writes.blocks),
                    (transactions, &writes.transactions),
                    (inputs, &writes.inputs),
                ] {
                    for key in &table.remove {
                        tree.remove(key.as_slice())?;
                    }
                    for (key, value) in &table.insert {
                        tree.insert(key.as_slice(), value.as_slice())?;
                    }
                }
                Ok::<(), ConflictableTransactionError<BlockchainError>>(())
            },
        )?;
        Ok(())
    }

    fn load_block(ns: &Namespace, index: u64) -> Result<Option<Block>> {
        match ns.blocks.get(index_key(index))? {
            Some(bytes) => Ok(Some(Self::assemble_block(ns, index, &bytes)?)),
            None => Ok(None),
        }
    }

    fn load_blocks(ns: &Namespace, start: u64, end: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for entry in ns.blocks.range(Self::index_range(start, end)) {
            let (key, bytes) = entry?;
            blocks.push(Self::assemble_block(ns, key_index(&key)?, &bytes)?);
        }
        Ok(blocks)
    }

    fn assemble_block(ns: &Namespace, index: u64, bytes: &[u8]) -> Result<Block> {
        let record: BlockRecord = deserialize(bytes)?;
        let transactions: Vec<Transaction> = Self::load_transactions(ns, index, index)?
            .into_iter()
            .map(|entry| entry.transaction)
            .collect();
        if transactions.len() != record.transaction_count as usize {
            return Err(BlockchainError::Database(format!(
                "Block {index} lists {} transactions but {} are stored",
                record.transaction_count,
                transactions.len()
            )));
        }
        Ok(Block::from_parts(
            record.previous_hash,
            record.merkle_hash,
            transactions,
            record.timestamp,
            index,
            f64::from_le_bytes(record.lucky_number),
            record.certificate,
            record.hash,
        ))
    }

    fn load_transactions(ns: &Namespace, start: u64, end: u64) -> Result<Vec<LedgerEntry>> {
        let range = Self::index_range(start, end);

        let mut inputs: BTreeMap<Vec<u8>, Vec<String>> = BTreeMap::new();
        for entry in ns.inputs.range(range.clone()) {
            let (key, value) = entry?;
            let owner = key.get(..12).map(<[u8]>::to_vec).ok_or_else(|| {
                BlockchainError::Database(format!("Malformed input key of {} bytes", key.len()))
            })?;
            inputs.entry(owner).or_default().push(deserialize(&value)?);
        }

        let mut entries = Vec::new();
        for entry in ns.transactions.range(range) {
            let (key, value) = entry?;
            let record: TransactionRecord = deserialize(&value)?;
            let tx_inputs = inputs.remove(&key[..]).unwrap_or_default();
            if tx_inputs.len() != record.input_count as usize {
                return Err(BlockchainError::Database(format!(
                    "Transaction {} lists {} inputs but {} are stored",
                    record.hash,
                    record.input_count,
                    tx_inputs.len()
                )));
            }
            entries.push(LedgerEntry {
                block_index: key_index(&key)?,
                transaction: Transaction::new(
                    &record.sender,
                    &record.recipient,
                    record.value,
                    &record.hash,
                    tx_inputs,
                    record.timestamp,
                ),
            });
        }
        Ok(entries)
    }
}

/// Forward iterator over blocks, holding the store lock while alive
pub struct BlockCursor<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
    main: Namespace,
    // Fork namespace and the index from which blocks come from it
    fork: Option<(Namespace, u64)>,
    next_index: u64,
    done: bool,
}

impl Iterator for BlockCursor<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let ns = match &self.fork {
            Some((fork, first)) if self.next_index >= *first => fork,
            _ => &self.main,
        };
        match ChainStore::load_block(ns, self.next_index) {
            Ok(Some(block)) => {
                self.next_index += 1;
                Some(Ok(block))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::test_utils::{chain_block, test_store};

    #[test]
    fn test_genesis_initialization_is_idempotent() {
        let (_dir, store) = test_store();
        assert!(!store.blockchain_initialized().unwrap());

        let genesis = store.initialize_genesis().unwrap();
        store.initialize_genesis().unwrap();

        assert!(store.blockchain_initialized().unwrap());
        assert_eq!(store.last_block_index(ForkId::MAIN).unwrap(), 1);
        assert_eq!(store.latest_block().unwrap().unwrap(), genesis);
    }

    #[test]
    fn test_block_round_trips_through_storage() {
        let (_dir, store) = test_store();
        let genesis = store.initialize_genesis().unwrap();
        let mut coinbase = Transaction::new_coinbase("miner", 100);
        coinbase.set_inputs(vec!["x".to_string(), "y".to_string()]);
        let block = chain_block(&genesis, vec![coinbase], 0.4);

        store.add_block(&block, ForkId::MAIN).unwrap();
        let loaded = store.get_block(2, ForkId::MAIN).unwrap().unwrap();

        assert_eq!(loaded, block);
        assert_eq!(loaded.get_lucky_number().to_bits(), 0.4f64.to_bits());
    }

    #[test]
    fn test_replacing_block_drops_old_transactions() {
        let (_dir, store) = test_store();
        let genesis = store.initialize_genesis().unwrap();
        let first = chain_block(
            &genesis,
            vec![
                Transaction::new_coinbase("a", 100),
                Transaction::new("b", "b", 1, "bb", vec![], 100),
            ],
            0.2,
        );
        let second = chain_block(&genesis, vec![Transaction::new_coinbase("c", 101)], 0.3);

        store.add_block(&first, ForkId::MAIN).unwrap();
        store.add_block(&second, ForkId::MAIN).unwrap();

        assert_eq!(store.get_block(2, ForkId::MAIN).unwrap().unwrap(), second);
        assert_eq!(store.transactions_from_chain_since(2).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_fork_is_an_error() {
        let (_dir, store) = test_store();
        let err = store.get_block(1, ForkId::new(99)).unwrap_err();
        assert!(matches!(err, BlockchainError::ForkNotFound(99)));
    }

    #[test]
    fn test_fork_lifecycle() {
        let (_dir, store) = test_store();
        let genesis = store.initialize_genesis().unwrap();
        let fork = store.create_fork().unwrap();
        assert!(store.fork_exists(fork).unwrap());
        assert_ne!(fork, ForkId::MAIN);

        let block = chain_block(&genesis, vec![Transaction::new_coinbase("m", 100)], 0.9);
        store.add_block(&block, fork).unwrap();
        assert_eq!(store.first_fork_block_index(fork).unwrap(), Some(2));
        assert_eq!(store.block_at(1, fork).unwrap().unwrap(), genesis);
        assert_eq!(store.block_at(2, fork).unwrap().unwrap(), block);
        assert!(store.block_at(2, ForkId::MAIN).unwrap().is_none());

        store.delete_fork(fork).unwrap();
        assert!(!store.fork_exists(fork).unwrap());
        assert!(store.forks().unwrap().is_empty());
    }

    #[test]
    fn test_apply_fork_truncates_longer_main_suffix() {
        let (_dir, store) = test_store();
        let genesis = store.initialize_genesis().unwrap();
        let main2 = chain_block(&genesis, vec![Transaction::new_coinbase("a", 100)], 0.1);
        let main3 = chain_block(&main2, vec![Transaction::new_coinbase("a", 200)], 0.1);
        store.add_block(&main2, ForkId::MAIN).unwrap();
        store.add_block(&main3, ForkId::MAIN).unwrap();

        let fork = store.create_fork().unwrap();
        let fork2 = chain_block(&genesis, vec![Transaction::new_coinbase("b", 150)], 0.8);
        store.add_block(&fork2, fork).unwrap();
        store.apply_fork(fork).unwrap();

        assert_eq!(store.last_block_index(ForkId::MAIN).unwrap(), 2);
        assert_eq!(store.latest_block().unwrap().unwrap(), fork2);
        assert!(!store.fork_exists(fork).unwrap());
        assert!(store.transactions_from_chain_since(3).unwrap().is_empty());
    }

    #[test]
    fn test_clean_up_from_index() {
        let (_dir, store) = test_store();
        let genesis = store.initialize_genesis().unwrap();
        let b2 = chain_block(&genesis, vec![Transaction::new_coinbase("a", 100)], 0.5);
        let b3 = chain_block(&b2, vec![Transaction::new_coinbase("a", 200)], 0.5);
        store.add_block(&b2, ForkId::MAIN).unwrap();
        store.add_block(&b3, ForkId::MAIN).unwrap();

        store.clean_up_from_index(2).unwrap();

        assert_eq!(store.last_block_index(ForkId::MAIN).unwrap(), 1);
        assert_eq!(store.transactions_from_chain_since(0).unwrap().len(), 1);
    }

    #[test]
    fn test_luck_sums() {
        let (_dir, store) = test_store();
        let genesis = store.initialize_genesis().unwrap();
        let b2 = chain_block(&genesis, vec![Transaction::new_coinbase("a", 100)], 0.25);
        let b3 = chain_block(&b2, vec![Transaction::new_coinbase("a", 200)], 0.5);
        store.add_block(&b2, ForkId::MAIN).unwrap();
        store.add_block(&b3, ForkId::MAIN).unwrap();

        assert_eq!(store.lucky_sum().unwrap(), 1.75);
        assert_eq!(store.main_luck_between(2, 3).unwrap(), 0.75);
        assert_eq!(store.main_luck_between(3, 3).unwrap(), 0.5);
        assert_eq!(store.main_luck_between(4, 9).unwrap(), 0.0);
    }

    #[test]
    fn test_merged_cursor_switches_to_fork() {
        let (_dir, store) = test_store();
        let genesis = store.initialize_genesis().unwrap();
        let main2 = chain_block(&genesis, vec![Transaction::new_coinbase("a", 100)], 0.1);
        store.add_block(&main2, ForkId::MAIN).unwrap();

        let fork = store.create_fork().unwrap();
        let fork2 = chain_block(&genesis, vec![Transaction::new_coinbase("b", 110)], 0.6);
        let fork3 = chain_block(&fork2, vec![Transaction::new_coinbase("b", 120)], 0.6);
        store.add_block(&fork2, fork).unwrap();
        store.add_block(&fork3, fork).unwrap();

        let merged: Vec<Block> = store
            .iter_blocks(CursorMode::Merged(fork))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(merged, vec![genesis.clone(), fork2.clone(), fork3.clone()]);

        let fork_only: Vec<Block> = store
            .iter_blocks(CursorMode::ForkOnly(fork))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(fork_only, vec![fork2, fork3]);

        let main: Vec<Block> = store
            .iter_blocks(CursorMode::Main)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(main, vec![genesis, main2]);
    }

    #[test]
    fn test_fork_view_hides_replaced_main_history() {
        let (_dir, store) = test_store();
        let genesis = store.initialize_genesis().unwrap();
        let main2 = chain_block(&genesis, vec![Transaction::new_coinbase("a", 100)], 0.1);
        store.add_block(&main2, ForkId::MAIN).unwrap();

        let fork = store.create_fork().unwrap();
        let fork2 = chain_block(&genesis, vec![Transaction::new_coinbase("b", 110)], 0.6);
        store.add_block(&fork2, fork).unwrap();

        let view = store.transactions_in_view(fork, 2).unwrap();
        let recipients: Vec<&str> = view
            .iter()
            .map(|entry| entry.transaction.get_recipient())
            .collect();
        assert_eq!(recipients, vec!["GenesisMiner", "b"]);

        let main2_hash = main2.get_transactions()[0].get_hash();
        assert!(store.exists_transaction(main2_hash, 3, ForkId::MAIN).unwrap());
        assert!(!store.exists_transaction(main2_hash, 3, fork).unwrap());
        assert!(!store.exists_transaction(main2_hash, 2, ForkId::MAIN).unwrap());
        assert_eq!(store.transaction_value_by_hash(main2_hash, ForkId::MAIN).unwrap(), Some(50));
        assert_eq!(store.transaction_value_by_hash(main2_hash, fork).unwrap(), None);
    }

    #[test]
    fn test_input_sum_counts_distinct_inputs() {
        let (_dir, store) = test_store();
        let genesis = store.initialize_genesis().unwrap();
        let genesis_tx = genesis.get_transactions()[0].get_hash().to_string();
        let spend = vec![
            Transaction::new("x", "y", 10, "t1", vec![genesis_tx.clone()], 100),
            Transaction::new("x", "x", 40, "t2", vec![genesis_tx], 100),
            Transaction::new_coinbase("m", 100),
        ];
        let block = chain_block(&genesis, spend, 0.5);

        assert_eq!(store.input_sum_of_block(&block, ForkId::MAIN).unwrap(), 50);
    }

    #[test]
    fn test_participants_and_history() {
        let (_dir, store) = test_store();
        let genesis = store.initialize_genesis().unwrap();
        let block = chain_block(
            &genesis,
            vec![
                Transaction::new("GenesisMiner", "bob", 10, "t1", vec![], 100),
                Transaction::new("GenesisMiner", "GenesisMiner", 40, "t2", vec![], 100),
                Transaction::new_coinbase("carol", 100),
            ],
            0.5,
        );
        store.add_block(&block, ForkId::MAIN).unwrap();

        let participants = store.all_participants("carol").unwrap();
        assert_eq!(participants, vec!["GenesisMiner".to_string(), "bob".to_string()]);

        let history = store.transactions_sent_by("GenesisMiner").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].block_index, 2);
        assert_eq!(history[0].transaction.get_recipient(), "bob");
    }
}
