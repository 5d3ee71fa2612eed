// This is the consensus engine of my Proof of Luck chain
// Blocks are not mined by burning CPU: each one carries a lucky number attested by the
// luck oracle, and the chain with the highest cumulative luck wins. This file validates
// blocks, builds new ones from the mempool, and decides when a fork replaces the main chain.

use crate::core::{Block, LuckOracle, Transaction, MINER_REWARD};
use crate::error::{BlockchainError, Result};
use crate::storage::{ChainStore, CursorMode, ForkId, Ledger, MemoryPool, Utxo};
use crate::utils::current_timestamp;
use log::{error, info, warn};
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write as _};
use std::path::Path;
use std::sync::Arc;

// How many blocks print_chain shows
const PRINTED_BLOCKS: u64 = 10;

/// What happened to a block handed to [`Blockchain::handle_block`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The block (and the fork it completed) is now part of the main chain
    Applied,
    /// The block is parked in a fork; the caller should fetch this index from the peer
    NeedBlock(u64),
    /// Valid but not luckier than what the main chain already has
    NotLuckier,
    /// The branch is invalid; the caller should resynchronise with the peer
    Resync,
}

/// Result of replaying a fork
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkVerdict {
    Invalid,
    Weaker,
    Luckier,
}

// Per-sender bookkeeping while I assemble a block
#[derive(Default)]
struct SenderPass {
    selected: Vec<String>, // Outputs already consumed for this sender in this block
    surplus: i64,          // Value of those outputs not yet assigned to a transfer
}

// I share the store, the mempool and the oracle through cheap handles so the miner,
// the traffic generator and the network path all see the same state
#[derive(Clone)]
pub struct Blockchain {
    store: ChainStore,
    ledger: Ledger,
    mempool: Arc<MemoryPool>,
    oracle: Arc<dyn LuckOracle>,
}

impl Blockchain {
    // When I start a node I open (or create) the database under data_dir
    pub fn open(
        data_dir: &Path,
        oracle: Arc<dyn LuckOracle>,
        mempool: Arc<MemoryPool>,
    ) -> Result<Blockchain> {
        let store = ChainStore::open(data_dir)?;
        Self::new(store, oracle, mempool)
    }

    // I make sure the genesis block exists and throw away forks left over from a crash
    pub fn new(
        store: ChainStore,
        oracle: Arc<dyn LuckOracle>,
        mempool: Arc<MemoryPool>,
    ) -> Result<Blockchain> {
        store.initialize_genesis()?;
        for fork in store.forks()? {
            info!("Dropping stale {fork}");
            store.delete_fork(fork)?;
        }
        Ok(Blockchain {
            ledger: Ledger::new(store.clone()),
            store,
            mempool,
            oracle,
        })
    }

    pub fn get_store(&self) -> &ChainStore {
        &self.store
    }

    pub fn get_ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn get_mempool(&self) -> &Arc<MemoryPool> {
        &self.mempool
    }

    // A transaction arriving from a peer or the traffic generator goes straight to the pool
    pub fn new_transaction(
        &self,
        sender: &str,
        recipient: &str,
        hash: &str,
        value: i64,
        timestamp: i64,
    ) -> bool {
        self.add_transaction(Transaction::new(
            sender,
            recipient,
            value,
            hash,
            vec![],
            timestamp,
        ))
    }

    /// Admit a transaction to the mempool unless its hash is already pending
    pub fn add_transaction(&self, tx: Transaction) -> bool {
        let added = self.mempool.add(tx);
        if !added {
            log::debug!("Transaction already pending, ignoring");
        }
        added
    }

    pub fn latest_block(&self) -> Result<Block> {
        self.store
            .latest_block()?
            .ok_or_else(|| BlockchainError::InvalidBlock("The chain has no blocks".to_string()))
    }

    pub fn latest_block_index(&self) -> Result<u64> {
        self.store.last_block_index(ForkId::MAIN)
    }

    pub fn block(&self, index: u64, fork: ForkId) -> Result<Option<Block>> {
        self.store.block_at(index, fork)
    }

    /// Balance of `key` at the main-chain tip
    pub fn balance(&self, key: &str) -> Result<i64> {
        let height = self.latest_block_index()?;
        self.ledger.balance(key, height, ForkId::MAIN)
    }

    pub fn balance_at(&self, key: &str, height: u64, fork: ForkId) -> Result<i64> {
        self.ledger.balance(key, height, fork)
    }

    pub fn get_utxo(&self, key: &str, height: u64, fork: ForkId) -> Result<Vec<Utxo>> {
        self.ledger.get_utxo(key, height, fork)
    }

    /// Value `key` has already committed to transfers waiting in the pool
    pub fn pending_outgoing_value(&self, key: &str) -> i64 {
        self.mempool.pending_outgoing(key)
    }

    /// Check a block against the history visible from `fork`.
    ///
    /// Runs nine checks in order and stops at the first failure: Merkle root,
    /// predecessor hash, timestamp, content hash, replays and foreign or spent
    /// inputs, signatures with exactly one coinbase, sender balances, value
    /// conservation and the luck range and certificate. `Ok(false)` means the
    /// block broke a rule; `Err` means the history could not be read.
    pub fn verify_block(&self, block: &Block, fork: ForkId) -> Result<bool> {
        let index = block.get_index();
        let reject = |reason: String| -> Result<bool> {
            warn!("Block {index} on {fork} rejected: {reason}");
            Ok(false)
        };

        if index == 0 {
            return reject("index 0 is not a valid block index".to_string());
        }

        // 1. Merkle root
        if block.get_transactions().is_empty() {
            return reject("no transactions".to_string());
        }
        if !block.verify_merkle_root()? {
            return reject("merkle root does not match transactions".to_string());
        }

        // 2. and 3. I compare against the predecessor; genesis has none and must be ours
        if index == 1 {
            let genesis = Block::generate_genesis_block()?;
            if block.get_hash() != genesis.get_hash() {
                return reject("genesis block differs from the fixed genesis".to_string());
            }
        } else {
            let Some(predecessor) = self.predecessor_of(block, fork)? else {
                return reject(format!("predecessor {} not found", index - 1));
            };
            if predecessor.get_hash() != block.get_previous_hash() {
                return reject("previous hash does not match predecessor".to_string());
            }
            if block.get_timestamp() <= predecessor.get_timestamp() {
                return reject("timestamp not after predecessor".to_string());
            }
            if block.get_timestamp() > current_timestamp()? {
                return reject("timestamp in the future".to_string());
            }
        }

        // 4. Tamper check
        if !block.verify_hash() {
            return reject("hash does not match block contents".to_string());
        }

        // 5. Nothing in the block may already be recorded, and every input must be an
        // unspent output paid to the transaction's sender
        let history = self.store.transactions_in_view(fork, index - 1)?;
        let owners: HashMap<&str, &str> = history
            .iter()
            .map(|entry| (entry.transaction.get_hash(), entry.transaction.get_recipient()))
            .collect();
        let spent: HashSet<&str> = history
            .iter()
            .flat_map(|entry| entry.transaction.get_inputs().iter().map(String::as_str))
            .collect();
        let mut in_block = HashSet::new();
        for tx in block.get_transactions() {
            if owners.contains_key(tx.get_hash()) || !in_block.insert(tx.get_hash()) {
                return reject(format!("transaction {} is a replay", tx.short_hash()));
            }
            for input in tx.get_inputs() {
                let Some(owner) = owners.get(input.as_str()) else {
                    return reject(format!("input {input} does not exist"));
                };
                if *owner != tx.get_sender() {
                    return reject(format!(
                        "input {input} of {} belongs to someone else",
                        tx.short_hash()
                    ));
                }
                if spent.contains(input.as_str()) {
                    return reject(format!("input {input} was already spent"));
                }
            }
        }

        // 6. Every transfer is signed; the coinbase is the one allowed exception
        let mut coinbase_value = 0;
        let mut coinbases = 0;
        for tx in block.get_transactions() {
            if tx.is_coinbase() {
                if !tx.get_inputs().is_empty()
                    || tx.get_value() <= 0
                    || tx.get_value() > MINER_REWARD
                {
                    return reject("malformed coinbase transaction".to_string());
                }
                coinbase_value = tx.get_value();
                coinbases += 1;
            } else if !tx.verify() {
                return reject(format!("transaction {} failed verification", tx.short_hash()));
            }
        }
        if coinbases != 1 {
            return reject(format!("{coinbases} coinbase transactions"));
        }

        // 7. Senders must be able to pay for everything they send in this block together.
        // Change moves nothing, so it only has to fit the balance on its own
        let mut committed: HashMap<&str, i64> = HashMap::new();
        for tx in block.get_transactions().iter().filter(|tx| !tx.is_coinbase()) {
            if tx.get_value() <= 0 {
                return reject(format!("transaction {} has no value", tx.short_hash()));
            }
            let balance = self.ledger.balance(tx.get_sender(), index - 1, fork)?;
            let needed = if tx.get_sender() == tx.get_recipient() {
                tx.get_value()
            } else {
                let total = committed.entry(tx.get_sender()).or_insert(0);
                *total += tx.get_value();
                *total
            };
            if balance < needed {
                return reject(format!(
                    "sender of {} has {balance}, needs {needed}",
                    tx.short_hash()
                ));
            }
        }

        // 8. Inputs plus the coinbase must equal everything the block pays out
        let inputs = self.store.input_sum_of_block(block, fork)?;
        let outputs: i64 = block.get_transactions().iter().map(Transaction::get_value).sum();
        if inputs + coinbase_value != outputs {
            return reject(format!(
                "value not conserved: inputs {inputs} + coinbase {coinbase_value} != outputs {outputs}"
            ));
        }

        // 9. The luck must be a draw from [0, 1) and really come from a trusted oracle
        if index > 1 && !self.is_certified(block) {
            return reject(format!(
                "lucky number {} is out of range or not certified",
                block.get_lucky_number()
            ));
        }

        Ok(true)
    }

    // NaN and anything outside [0, 1) can't be an oracle draw, whatever the certificate says
    fn is_certified(&self, block: &Block) -> bool {
        (0.0..1.0).contains(&block.get_lucky_number())
            && self.oracle.verify_proof(
                block.get_merkle_hash(),
                block.get_previous_hash(),
                block.get_lucky_number(),
                block.get_certificate(),
            )
    }

    // The predecessor lives in the fork unless the fork starts with this very block
    fn predecessor_of(&self, block: &Block, fork: ForkId) -> Result<Option<Block>> {
        let parent_index = block.get_index() - 1;
        if !fork.is_main() {
            if let Some(first) = self.store.first_fork_block_index(fork)? {
                if first <= parent_index {
                    return self.store.get_block(parent_index, fork);
                }
            }
        }
        self.store.get_block(parent_index, ForkId::MAIN)
    }

    // When I build a block I stamp it with the current time
    pub fn build_new_block(&self, miner: &str, previous: &Block) -> Result<Block> {
        self.build_new_block_at(miner, previous, current_timestamp()?)
    }

    /// Assemble the next block on top of `previous` from the pending pool.
    ///
    /// Each sender's transfers are funded first from the remainder of outputs
    /// already consumed for them in this block, then from fresh unspent
    /// outputs. Transfers that are invalid, already confirmed or unfunded are
    /// dropped from the pool. One change transaction per sender returns the
    /// remainder, and a coinbase pays `miner`. Hash and certificate stay
    /// empty until [`Blockchain::proof_of_luck`].
    pub fn build_new_block_at(&self, miner: &str, previous: &Block, timestamp: i64) -> Result<Block> {
        let index = previous.get_index() + 1;
        let height = previous.get_index();

        let mut used: HashSet<String> = HashSet::new();
        let mut passes: HashMap<String, SenderPass> = HashMap::new();
        let mut sender_order: Vec<String> = Vec::new();
        let mut accepted: Vec<Transaction> = Vec::new();
        let mut discarded: Vec<String> = Vec::new();

        // I work on a snapshot so the pool lock is not held across database reads
        for mut tx in self.mempool.get_all() {
            if tx.is_coinbase() || tx.is_self_transfer() || !tx.verify() || tx.get_value() <= 0 {
                warn!("Dropping invalid pending transaction {}", tx.short_hash());
                discarded.push(tx.get_hash().to_string());
                continue;
            }
            if self.store.exists_transaction(tx.get_hash(), index, ForkId::MAIN)? {
                discarded.push(tx.get_hash().to_string());
                continue;
            }
            if accepted.iter().any(|a| a.get_hash() == tx.get_hash()) {
                continue;
            }

            let sender = tx.get_sender().to_string();
            let pass = passes.entry(sender.clone()).or_default();

            if pass.surplus >= tx.get_value() {
                pass.surplus -= tx.get_value();
                tx.clear_inputs();
            } else {
                let needed = tx.get_value() - pass.surplus;
                let (gathered, utxos) = self.ledger.find_spendable_outputs(
                    &sender,
                    needed,
                    height,
                    ForkId::MAIN,
                    &used,
                )?;
                if gathered < needed {
                    warn!(
                        "Dropping transaction {}: sender can cover {gathered} of {needed}",
                        tx.short_hash()
                    );
                    discarded.push(tx.get_hash().to_string());
                    continue;
                }
                let hashes: Vec<String> = utxos.into_iter().map(|utxo| utxo.hash).collect();
                used.extend(hashes.iter().cloned());
                pass.selected.extend(hashes.iter().cloned());
                pass.surplus += gathered - tx.get_value();
                tx.set_inputs(hashes);
            }

            if !sender_order.contains(&sender) {
                sender_order.push(sender);
            }
            accepted.push(tx);
        }

        self.mempool.remove_all(discarded.iter().map(String::as_str));

        for sender in &sender_order {
            if let Some(pass) = passes.get(sender) {
                if pass.surplus > 0 {
                    accepted.push(Transaction::new_change(
                        sender,
                        pass.surplus,
                        pass.selected.clone(),
                        timestamp,
                    ));
                }
            }
        }
        accepted.push(Transaction::new_coinbase(miner, timestamp));

        Block::new_block(previous.get_hash().to_string(), &accepted, index, timestamp)
    }

    // Asking the oracle blocks for longer the worse the draw is
    pub fn proof_of_luck(&self, block: &mut Block) -> Result<()> {
        let proof = self
            .oracle
            .request_proof(block.get_merkle_hash(), block.get_previous_hash())
            .map_err(|e| {
                error!("Luck oracle failed for block {}: {e}", block.get_index());
                e
            })?;
        block.stamp_luck(proof.lucky_number, proof.certificate);
        info!(
            "Block {} drew lucky number {:.6}",
            block.get_index(),
            block.get_lucky_number()
        );
        Ok(())
    }

    /// Whether adopting `block` at its index beats the main chain from there on
    pub fn is_luckier_block(&self, block: &Block) -> Result<bool> {
        self.beats_main_chain(block.get_index(), block.get_lucky_number(), block.get_hash())
    }

    // A branch starting at `start` with total luck `luck` replaces main blocks start..=tip.
    // On an exact tie the lexicographically smaller hash at `start` wins.
    fn beats_main_chain(&self, start: u64, luck: f64, start_hash: &str) -> Result<bool> {
        let main_luck = self.store.main_luck_between(start, u64::MAX)?;
        if luck > main_luck {
            return Ok(true);
        }
        if luck < main_luck {
            return Ok(false);
        }
        match self.store.get_block(start, ForkId::MAIN)? {
            Some(main_block) => Ok(start_hash < main_block.get_hash()),
            None => Ok(true),
        }
    }

    /// Replay a fork block by block and weigh it against the main chain
    pub fn check_temp_chain(&self, fork: ForkId) -> Result<ForkVerdict> {
        let mut luck = 0.0;
        let mut first: Option<(u64, String)> = None;
        let mut last_seen = None;

        for block in self.store.iter_blocks(CursorMode::ForkOnly(fork))? {
            let block = block?;
            if !self.verify_block(&block, fork)? {
                return Ok(ForkVerdict::Invalid);
            }
            luck += block.get_lucky_number();
            last_seen = Some(block.get_index());
            first.get_or_insert_with(|| (block.get_index(), block.get_hash().to_string()));
        }

        // The cursor stops at the first missing index, so a gap shows up as a short fork
        if last_seen != Some(self.store.last_block_index(fork)?) {
            warn!("{fork} is not contiguous");
            return Ok(ForkVerdict::Invalid);
        }

        let Some((start, start_hash)) = first else {
            return Ok(ForkVerdict::Invalid);
        };
        if self.beats_main_chain(start, luck, &start_hash)? {
            Ok(ForkVerdict::Luckier)
        } else {
            Ok(ForkVerdict::Weaker)
        }
    }

    /// Reconcile a block produced locally or received from a peer.
    ///
    /// `fork` carries the fork opened for this branch across the calls of a
    /// catch-up sequence; it is reset to the main chain whenever the fork is
    /// applied or dropped.
    pub fn handle_block(&self, block: &Block, fork: &mut ForkId) -> Result<BlockOutcome> {
        // I hold the store lock from the attach test until the fork is applied or dropped,
        // otherwise a second block could change the main chain under a verdict
        let _guard = self.store.lock();
        let index = block.get_index();

        if index < 2 {
            self.abandon_fork(fork)?;
            let ours = self.store.get_block(1, ForkId::MAIN)?;
            if ours.is_some_and(|genesis| genesis.get_hash() == block.get_hash()) {
                return Ok(BlockOutcome::NotLuckier);
            }
            warn!("Peer chain has a different genesis block");
            return Ok(BlockOutcome::Resync);
        }

        let attaches = self
            .store
            .get_block(index - 1, ForkId::MAIN)?
            .is_some_and(|parent| parent.get_hash() == block.get_previous_hash());

        if !attaches {
            // I can't validate the block yet, but a forged certificate is cheap to spot
            if !self.is_certified(block) {
                warn!("Block {index} has an invalid certificate");
                self.abandon_fork(fork)?;
                return Ok(BlockOutcome::Resync);
            }
            if fork.is_main() {
                *fork = self.store.create_fork()?;
            }
            self.store.add_block(block, *fork)?;
            info!("Block {index} parked in {fork}, waiting for block {}", index - 1);
            return Ok(BlockOutcome::NeedBlock(index - 1));
        }

        if fork.is_main() {
            *fork = self.store.create_fork()?;
        }
        self.store.add_block(block, *fork)?;

        match self.check_temp_chain(*fork)? {
            ForkVerdict::Luckier => {
                self.mempool_update(*fork)?;
                self.store.apply_fork(*fork)?;
                *fork = ForkId::MAIN;
                info!(
                    "Main chain now ends at block {} ({})",
                    self.latest_block_index()?,
                    block.get_hash()
                );
                Ok(BlockOutcome::Applied)
            }
            ForkVerdict::Weaker => {
                self.abandon_fork(fork)?;
                Ok(BlockOutcome::NotLuckier)
            }
            ForkVerdict::Invalid => {
                self.abandon_fork(fork)?;
                Ok(BlockOutcome::Resync)
            }
        }
    }

    fn abandon_fork(&self, fork: &mut ForkId) -> Result<()> {
        if !fork.is_main() && self.store.fork_exists(*fork)? {
            self.store.delete_fork(*fork)?;
        }
        *fork = ForkId::MAIN;
        Ok(())
    }

    /// Before a fork replaces the main chain: drop pending transactions the
    /// fork confirms and re-admit user transfers that only the replaced
    /// main-chain blocks contained.
    pub fn mempool_update(&self, fork: ForkId) -> Result<()> {
        let fork_transactions = self.store.transactions_from_fork(fork)?;
        let Some(first) = self.store.first_fork_block_index(fork)? else {
            return Ok(());
        };
        let replaced = self.store.transactions_from_chain_since(first)?;

        let confirmed: HashSet<&str> = fork_transactions
            .iter()
            .map(Transaction::get_hash)
            .collect();
        let readmit: Vec<Transaction> = replaced
            .into_iter()
            .filter(|tx| {
                !tx.is_coinbase() && !tx.is_self_transfer() && !confirmed.contains(tx.get_hash())
            })
            .map(|mut tx| {
                tx.clear_inputs();
                tx
            })
            .collect();

        self.mempool.with_lock(|pending| {
            pending.retain(|tx| !confirmed.contains(tx.get_hash()));
            for tx in readmit {
                if !pending.iter().any(|p| p.get_hash() == tx.get_hash()) {
                    pending.push(tx);
                }
            }
        });
        Ok(())
    }

    /// Replay the whole main chain through [`Blockchain::verify_block`]
    pub fn verify_blockchain(&self) -> Result<bool> {
        for block in self.store.iter_blocks(CursorMode::Main)? {
            if !self.verify_block(&block?, ForkId::MAIN)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Integrity scan: drop the main chain from its first invalid block on.
    /// Returns the index the chain was cut at, if any.
    pub fn check_database(&self) -> Result<Option<u64>> {
        let _guard = self.store.lock();
        let mut first_bad = None;
        for block in self.store.iter_blocks(CursorMode::Main)? {
            let block = block?;
            if !self.verify_block(&block, ForkId::MAIN)? {
                first_bad = Some(block.get_index());
                break;
            }
        }

        if let Some(index) = first_bad {
            error!("Main chain is corrupt from block {index}, truncating");
            self.store.clean_up_from_index(index)?;
            self.store.initialize_genesis()?;
        }
        Ok(first_bad)
    }

    /// Human-readable dump of the last blocks of the main chain
    pub fn print_chain(&self, detailed: bool) -> Result<String> {
        let tip = self.latest_block_index()?;
        let from = tip.saturating_sub(PRINTED_BLOCKS - 1).max(1);
        let mut out = String::new();

        for index in (from..=tip).rev() {
            let Some(block) = self.store.get_block(index, ForkId::MAIN)? else {
                continue;
            };
            write_block(&mut out, &block, detailed).map_err(|e| {
                BlockchainError::Serialization(format!("Cannot format block {index}: {e}"))
            })?;
        }
        Ok(out)
    }
}

fn write_block(out: &mut String, block: &Block, detailed: bool) -> fmt::Result {
    writeln!(out, "Block {}", block.get_index())?;
    writeln!(out, "  hash:          {}", block.get_hash())?;
    writeln!(out, "  previous:      {}", block.get_previous_hash())?;
    writeln!(out, "  lucky number:  {:.6}", block.get_lucky_number())?;
    writeln!(out, "  timestamp:     {}", block.get_timestamp())?;
    writeln!(out, "  transactions:  {}", block.get_transactions().len())?;
    if !detailed {
        return Ok(());
    }
    writeln!(out, "  merkle root:   {}", block.get_merkle_hash())?;
    for tx in block.get_transactions() {
        let sender = if tx.is_coinbase() {
            "<reward>"
        } else {
            tx.get_sender()
        };
        writeln!(
            out,
            "    {} -> {}: {} ({})",
            sender,
            tx.get_recipient(),
            tx.get_value(),
            tx.short_hash()
        )?;
    }
    Ok(())
}
