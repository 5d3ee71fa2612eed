//! A running node
//!
//! The node owns the consensus engine, the local wallet and two optional
//! background workers: the miner and the test traffic generator. Blocks and
//! transactions leave the node through a [`BlockSink`], which is where a
//! network transport plugs in.

pub mod miner;
pub mod traffic;

use crate::config::Config;
use crate::core::{
    encode_block, encode_transaction, Block, BlockOutcome, Blockchain, SimulatedEnclave,
    Transaction,
};
use crate::error::{BlockchainError, Result};
use crate::storage::{ForkId, MemoryPool};
use crate::utils::current_timestamp;
use crate::wallet::Wallet;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// Workers re-check their stop flag at least this often while idle
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Outbound side of the network
pub trait BlockSink: Send + Sync {
    fn broadcast_block(&self, block: &Block);
    fn broadcast_transaction(&self, tx: &Transaction);
}

/// Sink for a node without peers: logs what would have been sent
pub struct LoggingSink;

impl BlockSink for LoggingSink {
    fn broadcast_block(&self, block: &Block) {
        let record = encode_block(block, ForkId::MAIN);
        info!("Broadcast block {} ({} bytes)", block.get_index(), record.len());
        debug!("{record}");
    }

    fn broadcast_transaction(&self, tx: &Transaction) {
        debug!("Broadcast transaction {}", encode_transaction(tx));
    }
}

/// A background thread with a cooperative stop flag
pub struct Worker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn<F>(name: &str, body: F) -> Result<Worker>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))?;
        Ok(Worker {
            stop,
            handle: Some(handle),
        })
    }

    /// Ask the worker to finish its current unit of work and exit
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

/// Sleep for `duration`, waking early once `stop` is set.
/// Returns false when the sleep was cut short.
pub(crate) fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

pub struct Node {
    blockchain: Blockchain,
    wallet: Arc<Wallet>,
    config: Config,
    sink: Arc<dyn BlockSink>,
    miner: Option<Worker>,
    traffic: Option<Worker>,
}

impl Node {
    /// Open the node described by `config`: keys from `key_dir`, chain from `data_dir`
    pub fn open(config: Config) -> Result<Node> {
        let wallet = Wallet::load_or_create(&config.key_dir)?;
        let mut enclave =
            SimulatedEnclave::load_or_create(&config.key_dir, config.max_luck_wait())?;
        if let Some(path) = &config.oracle_keys_file {
            let trusted = enclave.trust_keys_from_file(path)?;
            info!("Trusting {trusted} extra attestation keys");
        }
        let blockchain = Blockchain::open(
            &config.data_dir,
            Arc::new(enclave),
            Arc::new(MemoryPool::new()),
        )?;
        info!(
            "Node {} ready at block {}",
            short_key(&wallet.get_identity()),
            blockchain.latest_block_index()?
        );
        Ok(Node::with_parts(blockchain, wallet, config, Arc::new(LoggingSink)))
    }

    pub fn with_parts(
        blockchain: Blockchain,
        wallet: Wallet,
        config: Config,
        sink: Arc<dyn BlockSink>,
    ) -> Node {
        Node {
            blockchain,
            wallet: Arc::new(wallet),
            config,
            sink,
            miner: None,
            traffic: None,
        }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn get_wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub fn identity(&self) -> String {
        self.wallet.get_identity()
    }

    pub fn is_mining(&self) -> bool {
        self.miner.as_ref().is_some_and(Worker::is_running)
    }

    pub fn start_mining(&mut self) -> Result<()> {
        if self.is_mining() {
            return Ok(());
        }
        let context = miner::MinerContext {
            blockchain: self.blockchain.clone(),
            sink: Arc::clone(&self.sink),
            miner: self.wallet.get_identity(),
            round_time: self.config.round_time_secs,
        };
        self.miner = Some(Worker::spawn("miner", move |stop| miner::run(context, stop))?);
        info!("Mining started");
        Ok(())
    }

    pub fn stop_mining(&mut self) {
        if let Some(mut worker) = self.miner.take() {
            worker.stop();
            worker.join();
            info!("Mining stopped");
        }
    }

    pub fn start_traffic(&mut self) -> Result<()> {
        if self.traffic.as_ref().is_some_and(Worker::is_running) {
            return Ok(());
        }
        let context = traffic::TrafficContext {
            blockchain: self.blockchain.clone(),
            sink: Arc::clone(&self.sink),
            wallet: Arc::clone(&self.wallet),
            wait_bounds: self.config.traffic_wait_bounds(),
        };
        self.traffic = Some(Worker::spawn("traffic", move |stop| traffic::run(context, stop))?);
        info!("Traffic generation started");
        Ok(())
    }

    pub fn stop_traffic(&mut self) {
        if let Some(mut worker) = self.traffic.take() {
            worker.stop();
            worker.join();
            info!("Traffic generation stopped");
        }
    }

    /// Stop both workers, then wait for them
    pub fn shutdown(&mut self) {
        for worker in [self.miner.as_ref(), self.traffic.as_ref()].into_iter().flatten() {
            worker.stop();
        }
        self.stop_mining();
        self.stop_traffic();
        if let Err(e) = self.blockchain.get_store().flush() {
            warn!("Flushing the chain store failed: {e}");
        }
    }

    /// Mine `rounds` blocks in the calling thread, waiting out each round
    pub fn mine_rounds(&self, rounds: u32) -> Result<Vec<BlockOutcome>> {
        let never = AtomicBool::new(false);
        let mut outcomes = Vec::new();
        for _ in 0..rounds {
            miner::wait_for_round(&self.blockchain, self.config.round_time_secs, &never)?;
            let outcome = miner::mine_block(&self.blockchain, self.sink.as_ref(), &self.identity())?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// A block from a peer. `fork` carries the fork opened for the peer's
    /// branch between calls; on `NeedBlock(i)` the transport fetches block
    /// `i` from the same peer and calls again with the same `fork`.
    pub fn receive_block(&self, block: &Block, fork: &mut ForkId) -> Result<BlockOutcome> {
        let outcome = self.blockchain.handle_block(block, fork)?;
        match outcome {
            BlockOutcome::Applied => info!("Adopted block {} from a peer", block.get_index()),
            BlockOutcome::Resync => warn!("Peer sent an invalid branch at block {}", block.get_index()),
            BlockOutcome::NeedBlock(_) | BlockOutcome::NotLuckier => {}
        }
        Ok(outcome)
    }

    /// A transaction from a peer. Relayed when it is new and verifies.
    pub fn receive_transaction(&self, tx: Transaction) -> bool {
        if tx.is_coinbase() || !tx.verify() {
            warn!("Ignoring invalid transaction {}", tx.short_hash());
            return false;
        }
        if !self.blockchain.add_transaction(tx.clone()) {
            return false;
        }
        self.sink.broadcast_transaction(&tx);
        true
    }

    /// Sign a transfer from this node's wallet and hand it to the mempool
    pub fn submit_transaction(&self, recipient: &str, value: i64) -> Result<Transaction> {
        let identity = self.identity();
        let available = self.blockchain.balance(&identity)?
            - self.blockchain.pending_outgoing_value(&identity);
        if value <= 0 || value > available {
            return Err(BlockchainError::InsufficientFunds {
                required: value,
                available,
            });
        }
        let tx = self.wallet.sign_transaction(recipient, value, current_timestamp()?)?;
        self.blockchain.add_transaction(tx.clone());
        self.sink.broadcast_transaction(&tx);
        info!("Submitted {value} to {}", short_key(recipient));
        Ok(tx)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// Identities are long base64 keys
pub(crate) fn short_key(key: &str) -> &str {
    let end = key.char_indices().nth(12).map_or(key.len(), |(i, _)| i);
    &key[..end]
}
