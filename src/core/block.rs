use crate::core::{MerkleProof, MerkleTree, Transaction, GENESIS_TIMESTAMP};
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_hex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    previous_hash: String,
    merkle_hash: String,
    transactions: Vec<Transaction>,
    timestamp: i64,
    index: u64,
    lucky_number: f64, // Oracle draw in [0,1), the block's consensus weight
    certificate: String,
    hash: String,
}

impl Block {
    /// Assemble an unattested block. Hash and certificate stay empty until
    /// the luck oracle stamps it.
    pub fn new_block(
        previous_hash: String,
        transactions: &[Transaction],
        index: u64,
        timestamp: i64,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let merkle_hash = MerkleTree::calculate_merkle_root(transactions)?;

        Ok(Block {
            previous_hash,
            merkle_hash,
            transactions: transactions.to_vec(),
            timestamp,
            index,
            lucky_number: 0.0,
            certificate: String::new(),
            hash: String::new(),
        })
    }

    /// Rebuild a block exactly as it was recorded or received
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        previous_hash: String,
        merkle_hash: String,
        transactions: Vec<Transaction>,
        timestamp: i64,
        index: u64,
        lucky_number: f64,
        certificate: String,
        hash: String,
    ) -> Block {
        Block {
            previous_hash,
            merkle_hash,
            transactions,
            timestamp,
            index,
            lucky_number,
            certificate,
            hash,
        }
    }

    /// The fixed first block every node starts from
    pub fn generate_genesis_block() -> Result<Block> {
        let coinbase = Transaction::genesis_coinbase(GENESIS_TIMESTAMP);
        let mut block = Block::new_block("0".to_string(), &[coinbase], 1, GENESIS_TIMESTAMP)?;
        block.lucky_number = 1.0;
        block.hash = block.compute_hash();
        Ok(block)
    }

    /// `SHA256(previous_hash ‖ lucky_number bits ‖ merkle_hash ‖ timestamp)`
    pub fn compute_hash(&self) -> String {
        let mut data = Vec::new();
        data.extend(self.previous_hash.as_bytes());
        data.extend(self.lucky_number.to_bits().to_be_bytes());
        data.extend(self.merkle_hash.as_bytes());
        data.extend(self.timestamp.to_string().as_bytes());
        sha256_hex(&data)
    }

    /// Record the oracle's answer and re-derive the block identity
    pub fn stamp_luck(&mut self, lucky_number: f64, certificate: String) {
        self.lucky_number = lucky_number;
        self.certificate = certificate;
        self.hash = self.compute_hash();
    }

    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Verify that the block's Merkle root matches its transactions
    pub fn verify_merkle_root(&self) -> Result<bool> {
        MerkleTree::verify_transactions(&self.transactions, &self.merkle_hash)
    }

    /// Generate a Merkle proof for a transaction in this block
    pub fn generate_merkle_proof(&self, transaction_hash: &str) -> Result<MerkleProof> {
        let merkle_tree = MerkleTree::new(&self.transactions)?;
        merkle_tree.generate_proof(transaction_hash)
    }

    /// Verify a Merkle proof against this block's Merkle root
    pub fn verify_merkle_proof(&self, proof: &MerkleProof) -> bool {
        proof.merkle_root == self.merkle_hash && MerkleTree::verify_proof(proof)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_previous_hash(&self) -> &str {
        self.previous_hash.as_str()
    }

    pub fn get_merkle_hash(&self) -> &str {
        self.merkle_hash.as_str()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_index(&self) -> u64 {
        self.index
    }

    pub fn get_lucky_number(&self) -> f64 {
        self.lucky_number
    }

    /// Raw little-endian bytes of the lucky number, used on the wire and on disk
    pub fn lucky_number_bytes(&self) -> [u8; 8] {
        self.lucky_number.to_le_bytes()
    }

    pub fn get_certificate(&self) -> &str {
        self.certificate.as_str()
    }
}
