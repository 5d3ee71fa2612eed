use crate::core::Transaction;
use crate::error::Result;
use crate::storage::{ChainStore, ForkId, LedgerEntry};
use std::collections::{HashMap, HashSet};

/// An unspent output: a transaction credited to its recipient and not yet
/// referenced as an input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub hash: String,
    pub value: i64,
}

/// Balances and unspent outputs derived from the recorded history.
///
/// Nothing is cached: every query replays the transactions visible from
/// the requested fork up to the requested height.
#[derive(Clone)]
pub struct Ledger {
    store: ChainStore,
}

impl Ledger {
    pub fn new(store: ChainStore) -> Ledger {
        Ledger { store }
    }

    pub fn get_store(&self) -> &ChainStore {
        &self.store
    }

    /// Incoming minus outgoing transfers of `key` in blocks up to `height`.
    /// Self-transfers move nothing and are ignored.
    pub fn balance(&self, key: &str, height: u64, fork: ForkId) -> Result<i64> {
        let entries = self.store.transactions_in_view(fork, height)?;
        Ok(Self::balance_of(key, &entries))
    }

    /// Balances of every key that appears in the view, coinbase sender excluded
    pub fn all_balances(&self, height: u64, fork: ForkId) -> Result<HashMap<String, i64>> {
        let entries = self.store.transactions_in_view(fork, height)?;
        let mut balances: HashMap<String, i64> = HashMap::new();
        for tx in entries.iter().map(|entry| &entry.transaction) {
            if tx.is_self_transfer() {
                continue;
            }
            *balances.entry(tx.get_recipient().to_string()).or_default() += tx.get_value();
            if !tx.is_coinbase() {
                *balances.entry(tx.get_sender().to_string()).or_default() -= tx.get_value();
            }
        }
        Ok(balances)
    }

    /// Total value minted by coinbase transactions up to `height`
    pub fn total_issued(&self, height: u64, fork: ForkId) -> Result<i64> {
        let entries = self.store.transactions_in_view(fork, height)?;
        Ok(entries
            .iter()
            .filter(|entry| entry.transaction.is_coinbase())
            .map(|entry| entry.transaction.get_value())
            .sum())
    }

    /// Outputs credited to `key` up to `height` that no transaction up to
    /// `height` spends. Change outputs count: they are how a sender gets the
    /// remainder of a spent output back.
    pub fn get_utxo(&self, key: &str, height: u64, fork: ForkId) -> Result<Vec<Utxo>> {
        let entries = self.store.transactions_in_view(fork, height)?;
        let spent = Self::spent_of(&entries);
        Ok(entries
            .iter()
            .map(|entry| &entry.transaction)
            .filter(|tx| tx.get_recipient() == key && !spent.contains(tx.get_hash()))
            .map(|tx| Utxo {
                hash: tx.get_hash().to_string(),
                value: tx.get_value(),
            })
            .collect())
    }

    /// Hashes referenced as inputs in blocks up to `height`
    pub fn spent_outputs(&self, height: u64, fork: ForkId) -> Result<HashSet<String>> {
        let entries = self.store.transactions_in_view(fork, height)?;
        Ok(Self::spent_of(&entries)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Pick unspent outputs of `key`, skipping those in `used`, until their
    /// sum reaches `amount`. Returns what was gathered even when it falls short.
    pub fn find_spendable_outputs(
        &self,
        key: &str,
        amount: i64,
        height: u64,
        fork: ForkId,
        used: &HashSet<String>,
    ) -> Result<(i64, Vec<Utxo>)> {
        let mut accumulated = 0;
        let mut selected = Vec::new();
        for utxo in self.get_utxo(key, height, fork)? {
            if accumulated >= amount {
                break;
            }
            if used.contains(&utxo.hash) {
                continue;
            }
            accumulated += utxo.value;
            selected.push(utxo);
        }
        Ok((accumulated, selected))
    }

    fn balance_of(key: &str, entries: &[LedgerEntry]) -> i64 {
        entries
            .iter()
            .map(|entry| &entry.transaction)
            .filter(|tx| !tx.is_self_transfer())
            .map(|tx: &Transaction| {
                let mut delta = 0;
                if tx.get_recipient() == key {
                    delta += tx.get_value();
                }
                if tx.get_sender() == key {
                    delta -= tx.get_value();
                }
                delta
            })
            .sum()
    }

    fn spent_of(entries: &[LedgerEntry]) -> HashSet<&str> {
        entries
            .iter()
            .flat_map(|entry| entry.transaction.get_inputs().iter().map(String::as_str))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::test_utils::{chain_block, test_store};

    // Genesis pays GenesisMiner 50; block 2 moves 20 of it to bob with 30 change
    fn two_block_ledger() -> (tempfile::TempDir, Ledger, String) {
        let (dir, store) = test_store();
        let genesis = store.initialize_genesis().unwrap();
        let genesis_tx = genesis.get_transactions()[0].get_hash().to_string();
        let block = chain_block(
            &genesis,
            vec![
                Transaction::new("GenesisMiner", "bob", 20, "pay", vec![genesis_tx.clone()], 200),
                Transaction::new_change("GenesisMiner", 30, vec![genesis_tx.clone()], 200),
                Transaction::new_coinbase("carol", 200),
            ],
            0.5,
        );
        store.add_block(&block, ForkId::MAIN).unwrap();
        (dir, Ledger::new(store), genesis_tx)
    }

    #[test]
    fn test_genesis_balance() {
        let (_dir, store) = test_store();
        store.initialize_genesis().unwrap();
        let ledger = Ledger::new(store);

        assert_eq!(ledger.balance("GenesisMiner", 1, ForkId::MAIN).unwrap(), 50);
        assert_eq!(ledger.balance("nobody", 1, ForkId::MAIN).unwrap(), 0);
    }

    #[test]
    fn test_transfer_moves_balance() {
        let (_dir, ledger, _) = two_block_ledger();

        assert_eq!(ledger.balance("GenesisMiner", 2, ForkId::MAIN).unwrap(), 30);
        assert_eq!(ledger.balance("bob", 2, ForkId::MAIN).unwrap(), 20);
        assert_eq!(ledger.balance("GenesisMiner", 1, ForkId::MAIN).unwrap(), 50);
    }

    #[test]
    fn test_utxo_follows_spending() {
        let (_dir, ledger, genesis_tx) = two_block_ledger();

        let before = ledger.get_utxo("GenesisMiner", 1, ForkId::MAIN).unwrap();
        assert_eq!(before, vec![Utxo { hash: genesis_tx.clone(), value: 50 }]);

        let after = ledger.get_utxo("GenesisMiner", 2, ForkId::MAIN).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].value, 30);
        assert!(ledger
            .spent_outputs(2, ForkId::MAIN)
            .unwrap()
            .contains(&genesis_tx));
    }

    #[test]
    fn test_issued_equals_sum_of_balances() {
        let (_dir, ledger, _) = two_block_ledger();

        let issued = ledger.total_issued(2, ForkId::MAIN).unwrap();
        let balances: i64 = ledger.all_balances(2, ForkId::MAIN).unwrap().values().sum();
        assert_eq!(issued, 100);
        assert_eq!(issued, balances);
    }

    #[test]
    fn test_find_spendable_outputs_skips_used() {
        let (_dir, ledger, _) = two_block_ledger();
        let none_used = HashSet::new();
        let (total, picked) = ledger
            .find_spendable_outputs("GenesisMiner", 10, 2, ForkId::MAIN, &none_used)
            .unwrap();
        assert_eq!(total, 30);
        assert_eq!(picked.len(), 1);

        let used: HashSet<String> = picked.into_iter().map(|u| u.hash).collect();
        let (total, picked) = ledger
            .find_spendable_outputs("GenesisMiner", 10, 2, ForkId::MAIN, &used)
            .unwrap();
        assert_eq!(total, 0);
        assert!(picked.is_empty());
    }

    #[test]
    fn test_fork_balance_uses_merged_view() {
        let (_dir, ledger, _) = two_block_ledger();
        let store = ledger.get_store();
        let genesis = store.get_block(1, ForkId::MAIN).unwrap().unwrap();
        let fork = store.create_fork().unwrap();
        store
            .add_block(
                &chain_block(&genesis, vec![Transaction::new_coinbase("dave", 300)], 0.9),
                fork,
            )
            .unwrap();

        assert_eq!(ledger.balance("GenesisMiner", 2, fork).unwrap(), 50);
        assert_eq!(ledger.balance("bob", 2, fork).unwrap(), 0);
        assert_eq!(ledger.balance("dave", 2, fork).unwrap(), 50);
    }
}
