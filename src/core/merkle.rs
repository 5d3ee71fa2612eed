use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_hex;
use serde::{Deserialize, Serialize};

/// Merkle tree over a block's transaction hashes
///
/// Leaves are sorted lexicographically before the tree is built, so two
/// nodes that assemble the same transaction set in a different order agree
/// on the root. Each level is kept as a vector; an internal node is
/// `SHA256(left ‖ right)` over the hex strings, and a node without a sibling
/// moves up unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTree {
    levels: Vec<Vec<String>>,
}

/// Merkle proof for transaction inclusion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Transaction hash being proven
    pub transaction_hash: String,
    /// Merkle root hash
    pub merkle_root: String,
    /// Sibling hashes from leaf to root; lone nodes contribute nothing
    pub proof_path: Vec<ProofElement>,
    /// Position of the transaction in the sorted leaf order
    pub transaction_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofElement {
    /// Sibling hash
    pub hash: String,
    /// Direction: true if sibling is on the right, false if on the left
    pub is_right: bool,
}

impl MerkleTree {
    /// Build the tree over a block's transactions
    pub fn new(transactions: &[Transaction]) -> Result<Self> {
        let hashes: Vec<String> = transactions
            .iter()
            .map(|tx| tx.get_hash().to_string())
            .collect();
        Self::from_hashes(&hashes)
    }

    /// Build the tree from raw transaction hashes
    pub fn from_hashes(hashes: &[String]) -> Result<Self> {
        if hashes.is_empty() {
            log::error!("Merkle tree requested for a block without transactions");
            return Err(BlockchainError::InvalidBlock(
                "Cannot create Merkle tree from empty transaction list".to_string(),
            ));
        }

        let mut leaves = hashes.to_vec();
        leaves.sort();

        let mut levels = vec![leaves];
        while levels[levels.len() - 1].len() > 1 {
            let next: Vec<String> = levels[levels.len() - 1]
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => Self::hash_pair(left, right),
                    lone => lone[0].clone(),
                })
                .collect();
            levels.push(next);
        }

        Ok(MerkleTree { levels })
    }

    pub fn get_root_hash(&self) -> &str {
        // from_hashes guarantees at least one level with one node at the top
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Number of levels, `ceil(log2(n)) + 1` for `n` leaves
    pub fn height(&self) -> usize {
        self.levels.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Generate an inclusion proof for the transaction with the given hash
    pub fn generate_proof(&self, transaction_hash: &str) -> Result<MerkleProof> {
        let transaction_index = self.levels[0]
            .iter()
            .position(|leaf| leaf == transaction_hash)
            .ok_or_else(|| {
                BlockchainError::InvalidBlock(format!(
                    "Transaction {transaction_hash} is not part of this tree"
                ))
            })?;

        let mut proof_path = Vec::new();
        let mut position = transaction_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = position ^ 1;
            if let Some(hash) = level.get(sibling) {
                proof_path.push(ProofElement {
                    hash: hash.clone(),
                    is_right: sibling > position,
                });
            }
            position /= 2;
        }

        Ok(MerkleProof {
            transaction_hash: transaction_hash.to_string(),
            merkle_root: self.get_root_hash().to_string(),
            proof_path,
            transaction_index,
        })
    }

    /// Verify a Merkle proof
    pub fn verify_proof(proof: &MerkleProof) -> bool {
        let mut current_hash = proof.transaction_hash.clone();

        for element in &proof.proof_path {
            current_hash = if element.is_right {
                Self::hash_pair(&current_hash, &element.hash)
            } else {
                Self::hash_pair(&element.hash, &current_hash)
            };
        }

        current_hash == proof.merkle_root
    }

    fn hash_pair(left: &str, right: &str) -> String {
        let mut combined = String::with_capacity(left.len() + right.len());
        combined.push_str(left);
        combined.push_str(right);
        sha256_hex(combined.as_bytes())
    }
}

/// Utility functions for Merkle tree operations
impl MerkleTree {
    /// Merkle root of a transaction list without keeping the tree around
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Result<String> {
        Ok(Self::new(transactions)?.get_root_hash().to_string())
    }

    /// Verify that a list of transactions produces the expected Merkle root
    pub fn verify_transactions(transactions: &[Transaction], expected_root: &str) -> Result<bool> {
        let calculated_root = Self::calculate_merkle_root(transactions)?;
        Ok(calculated_root == expected_root)
    }
}
