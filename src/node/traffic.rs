// Test traffic: every few seconds I send a random part of my balance to
// someone who already appears on the chain

use super::{short_key, sleep_unless_stopped, BlockSink};
use crate::core::{Blockchain, Transaction};
use crate::error::Result;
use crate::utils::current_timestamp;
use crate::wallet::Wallet;
use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct TrafficContext {
    pub blockchain: Blockchain,
    pub sink: Arc<dyn BlockSink>,
    pub wallet: Arc<Wallet>,
    /// Inclusive bounds in seconds for the pause between transfers
    pub wait_bounds: (u64, u64),
}

/// Issue one random transfer. Returns `None` when there is nothing to send
/// or nobody to send it to.
pub fn send_random_transfer<R: Rng>(
    blockchain: &Blockchain,
    wallet: &Wallet,
    rng: &mut R,
) -> Result<Option<Transaction>> {
    let identity = wallet.get_identity();
    let available =
        blockchain.balance(&identity)? - blockchain.pending_outgoing_value(&identity);
    if available < 1 {
        debug!("No spendable balance for test traffic");
        return Ok(None);
    }

    let participants = blockchain.get_store().all_participants(&identity)?;
    let Some(recipient) = participants.choose(rng) else {
        debug!("No participants to send test traffic to");
        return Ok(None);
    };

    let value = rng.gen_range(1..=available);
    let tx = wallet.sign_transaction(recipient, value, current_timestamp()?)?;
    if !blockchain.add_transaction(tx.clone()) {
        return Ok(None);
    }
    debug!("Test transfer of {value} to {}", short_key(recipient));
    Ok(Some(tx))
}

pub fn run(context: TrafficContext, stop: Arc<AtomicBool>) {
    let mut rng = rand::thread_rng();
    let (min_wait, max_wait) = context.wait_bounds;

    while !stop.load(Ordering::SeqCst) {
        match send_random_transfer(&context.blockchain, &context.wallet, &mut rng) {
            Ok(Some(tx)) => context.sink.broadcast_transaction(&tx),
            Ok(None) => {}
            Err(e) => warn!("Test transfer failed: {e}"),
        }
        let pause = Duration::from_secs(rng.gen_range(min_wait..=max_wait));
        sleep_unless_stopped(&stop, pause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::test_utils::{funded_chain, test_blockchain};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_transfer_stays_within_balance() {
        let chain = funded_chain();
        let mut rng = StdRng::seed_from_u64(7);
        let alice = chain.alice.get_identity();

        let mut sent = 0;
        while let Some(tx) = send_random_transfer(&chain.blockchain, &chain.alice, &mut rng).unwrap() {
            assert!(tx.verify());
            assert_eq!(tx.get_sender(), alice);
            assert_eq!(tx.get_recipient(), "GenesisMiner");
            sent += tx.get_value();
        }
        assert_eq!(sent, 50);
        assert_eq!(chain.blockchain.pending_outgoing_value(&alice), 50);
    }

    #[test]
    fn test_no_transfer_without_funds() {
        let chain = test_blockchain();
        let mut rng = StdRng::seed_from_u64(1);
        let sent = send_random_transfer(&chain.blockchain, &chain.alice, &mut rng).unwrap();
        assert!(sent.is_none());
        assert!(chain.blockchain.get_mempool().is_empty());
    }
}
