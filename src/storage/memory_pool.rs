use crate::core::Transaction;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;

/// Pending transactions in arrival order.
///
/// Submission, block building and fork reconciliation all touch the pool,
/// so each read-modify-write runs under one lock for the whole scan.
pub struct MemoryPool {
    inner: ReentrantMutex<RefCell<Vec<Transaction>>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: ReentrantMutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Run `f` on the pending list while holding the pool lock. `f` must not
    /// call back into the pool.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut Vec<Transaction>) -> R) -> R {
        let guard = self.inner.lock();
        let mut pending = guard.borrow_mut();
        f(&mut pending)
    }

    /// Add a transaction unless one with the same hash is already pending
    pub fn add(&self, tx: Transaction) -> bool {
        self.with_lock(|pending| {
            if pending.iter().any(|p| p.get_hash() == tx.get_hash()) {
                return false;
            }
            pending.push(tx);
            true
        })
    }

    pub fn get(&self, hash: &str) -> Option<Transaction> {
        self.with_lock(|pending| pending.iter().find(|tx| tx.get_hash() == hash).cloned())
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.with_lock(|pending| pending.iter().any(|tx| tx.get_hash() == hash))
    }

    pub fn remove(&self, hash: &str) {
        self.with_lock(|pending| pending.retain(|tx| tx.get_hash() != hash));
    }

    /// Drop every pending transaction whose hash is in `hashes`
    pub fn remove_all<'a>(&self, hashes: impl IntoIterator<Item = &'a str>) {
        let hashes: std::collections::HashSet<&str> = hashes.into_iter().collect();
        self.with_lock(|pending| pending.retain(|tx| !hashes.contains(tx.get_hash())));
    }

    /// Sum of the values `sender` has waiting in the pool
    pub fn pending_outgoing(&self, sender: &str) -> i64 {
        self.with_lock(|pending| {
            pending
                .iter()
                .filter(|tx| tx.get_sender() == sender)
                .map(Transaction::get_value)
                .sum()
        })
    }

    pub fn len(&self) -> usize {
        self.with_lock(|pending| pending.len())
    }

    pub fn get_all(&self) -> Vec<Transaction> {
        self.with_lock(|pending| pending.clone())
    }

    pub fn clear(&self) {
        self.with_lock(|pending| pending.clear());
    }

    pub fn is_empty(&self) -> bool {
        self.with_lock(|pending| pending.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn tx(hash: &str, sender: &str, value: i64) -> Transaction {
        Transaction::new(sender, "bob", value, hash, vec![], 1)
    }

    #[test]
    fn test_add_deduplicates_by_hash() {
        let pool = MemoryPool::new();
        assert!(pool.add(tx("a", "alice", 1)));
        assert!(!pool.add(tx("a", "alice", 1)));
        assert!(pool.add(tx("b", "alice", 2)));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_remove_and_remove_all() {
        let pool = MemoryPool::new();
        for hash in ["a", "b", "c"] {
            pool.add(tx(hash, "alice", 1));
        }
        pool.remove("b");
        assert!(!pool.contains("b"));

        pool.remove_all(["a", "zzz"]);
        let left: Vec<String> = pool.get_all().iter().map(|t| t.get_hash().to_string()).collect();
        assert_eq!(left, vec!["c".to_string()]);
    }

    #[test]
    fn test_pending_outgoing() {
        let pool = MemoryPool::new();
        pool.add(tx("a", "alice", 5));
        pool.add(tx("b", "alice", 7));
        pool.add(tx("c", "carol", 100));
        assert_eq!(pool.pending_outgoing("alice"), 12);
        assert_eq!(pool.pending_outgoing("nobody"), 0);
    }

    #[test]
    fn test_concurrent_submission() {
        let pool = Arc::new(MemoryPool::new());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..25 {
                        pool.add(tx(&format!("{worker}-{i}"), "alice", 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.len(), 100);
    }
}
