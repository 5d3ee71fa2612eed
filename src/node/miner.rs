// The miner loop: once per round I build a block on the current tip, wait
// for the oracle to attest its luck, and try to make it the new tip

use super::{short_key, sleep_unless_stopped, BlockSink};
use crate::core::{BlockOutcome, Blockchain};
use crate::error::Result;
use crate::storage::ForkId;
use crate::utils::current_timestamp;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// After this many rounds on the same candidate index I suspect the database
const STUCK_ROUNDS: u32 = 5;

pub struct MinerContext {
    pub blockchain: Blockchain,
    pub sink: Arc<dyn BlockSink>,
    pub miner: String,
    pub round_time: u64,
}

/// Build, attest and submit one block on the current tip
pub fn mine_block(blockchain: &Blockchain, sink: &dyn BlockSink, miner: &str) -> Result<BlockOutcome> {
    let tip = blockchain.latest_block()?;
    let mut block = blockchain.build_new_block(miner, &tip)?;
    blockchain.proof_of_luck(&mut block)?;

    // While I waited for the oracle a peer may have filled this index
    if !blockchain.is_luckier_block(&block)? {
        info!("Block {} lost to a luckier block", block.get_index());
        return Ok(BlockOutcome::NotLuckier);
    }

    let mut fork = ForkId::MAIN;
    let outcome = blockchain.handle_block(&block, &mut fork)?;
    if outcome == BlockOutcome::Applied {
        info!(
            "{} mined block {} with luck {:.6}",
            short_key(miner),
            block.get_index(),
            block.get_lucky_number()
        );
        sink.broadcast_block(&block);
    }
    Ok(outcome)
}

/// Block until the round after the current tip has started. Returns false
/// when `stop` was raised first.
pub fn wait_for_round(blockchain: &Blockchain, round_time: u64, stop: &AtomicBool) -> Result<bool> {
    loop {
        let tip = blockchain.latest_block()?;
        let round_ends = tip.get_timestamp() + round_time as i64;
        let now = current_timestamp()?;
        if now > round_ends {
            return Ok(true);
        }
        let remaining = Duration::from_secs((round_ends - now) as u64 + 1);
        if !sleep_unless_stopped(stop, remaining) {
            return Ok(false);
        }
    }
}

pub fn run(context: MinerContext, stop: Arc<AtomicBool>) {
    let mut last_candidate = 0;
    let mut repeats = 0;

    while !stop.load(Ordering::SeqCst) {
        match wait_for_round(&context.blockchain, context.round_time, &stop) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                error!("Cannot read the chain tip: {e}");
                sleep_unless_stopped(&stop, Duration::from_secs(1));
                continue;
            }
        }

        let candidate = match context.blockchain.latest_block_index() {
            Ok(index) => index + 1,
            Err(e) => {
                error!("Cannot read the chain tip: {e}");
                sleep_unless_stopped(&stop, Duration::from_secs(1));
                continue;
            }
        };
        if candidate == last_candidate {
            repeats += 1;
        } else {
            last_candidate = candidate;
            repeats = 0;
        }
        if repeats >= STUCK_ROUNDS {
            warn!("Stuck at block {candidate} for {repeats} rounds, checking the database");
            if let Err(e) = context.blockchain.check_database() {
                error!("Database check failed: {e}");
            }
            repeats = 0;
        }

        if let Err(e) = mine_block(&context.blockchain, context.sink.as_ref(), &context.miner) {
            // An oracle failure only costs this round
            error!("Mining round for block {candidate} failed: {e}");
            sleep_unless_stopped(&stop, Duration::from_secs(1));
        }
    }
}
