// This file implements value transfers on my Proof of Luck chain
// A transaction moves an integer value from one public key to another. The hash doubles
// as its id: for user transfers it is the sender's signature, so nobody can forge one
// without the private key. Inputs reference the hashes of earlier transactions being spent.

use crate::core::{GENESIS_MINER, MINER_REWARD};
use crate::error::{BlockchainError, Result};
use crate::utils::{base64_encode, ecdsa_p256_sha256_sign_digest, sha256_hex, verify_base64_signature};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    sender: String,      // Base64 public key of the payer, empty for the miner reward
    recipient: String,   // Base64 public key of the payee
    value: i64,          // Amount moved
    hash: String,        // Signature (or content hash) that identifies this transaction
    inputs: Vec<String>, // Hashes of the transactions this one spends
    timestamp: i64,      // Seconds since the Unix epoch
}

impl Transaction {
    // When I receive a transaction from somewhere else I take it exactly as given
    pub fn new(
        sender: &str,
        recipient: &str,
        value: i64,
        hash: &str,
        inputs: Vec<String>,
        timestamp: i64,
    ) -> Transaction {
        Transaction {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            value,
            hash: hash.to_string(),
            inputs,
            timestamp,
        }
    }

    // When I send money I sign (recipient, sender, value, timestamp) with my private key
    // and the base64 signature becomes the transaction hash
    pub fn new_signed(
        pkcs8: &[u8],
        sender: &str,
        recipient: &str,
        value: i64,
        timestamp: i64,
    ) -> Result<Transaction> {
        if value <= 0 {
            return Err(BlockchainError::InvalidTransaction(format!(
                "Value must be positive, got {value}"
            )));
        }

        let payload = Self::signing_payload(recipient, sender, value, timestamp);
        let signature = ecdsa_p256_sha256_sign_digest(pkcs8, &payload)?;

        Ok(Transaction {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            value,
            hash: base64_encode(&signature),
            inputs: vec![],
            timestamp,
        })
    }

    // The miner reward has no sender and no inputs
    // Its hash only has to be unique, so I hash the time together with the miner's key
    pub fn new_coinbase(miner: &str, timestamp: i64) -> Transaction {
        let hash = sha256_hex(format!("{timestamp}{miner}").as_bytes());
        Transaction {
            sender: String::new(),
            recipient: miner.to_string(),
            value: MINER_REWARD,
            hash,
            inputs: vec![],
            timestamp,
        }
    }

    // The very first reward on the chain is fixed so every node builds an identical genesis block
    pub fn genesis_coinbase(timestamp: i64) -> Transaction {
        Transaction {
            sender: String::new(),
            recipient: GENESIS_MINER.to_string(),
            value: MINER_REWARD,
            hash: sha256_hex(GENESIS_MINER.as_bytes()),
            inputs: vec![],
            timestamp,
        }
    }

    // Change goes back to the sender as a self-transfer carrying the leftover of the inputs
    // I hash the inputs in so two change outputs in the same second never collide
    pub fn new_change(sender: &str, value: i64, inputs: Vec<String>, timestamp: i64) -> Transaction {
        let hash = sha256_hex(format!("{timestamp}{sender}{}", inputs.concat()).as_bytes());
        Transaction {
            sender: sender.to_string(),
            recipient: sender.to_string(),
            value,
            hash,
            inputs,
            timestamp,
        }
    }

    fn signing_payload(recipient: &str, sender: &str, value: i64, timestamp: i64) -> Vec<u8> {
        format!("{recipient}{sender}{value}{timestamp}").into_bytes()
    }

    /// Structural and cryptographic check of a single transaction.
    ///
    /// Inputs must be distinct. A self-transfer passes without a signature;
    /// everything else needs a valid signature by `sender` over
    /// `recipient ‖ sender ‖ value ‖ timestamp`.
    pub fn verify(&self) -> bool {
        let mut seen = HashSet::new();
        for input in &self.inputs {
            if !seen.insert(input.as_str()) {
                log::warn!("Transaction {} spends input {input} twice", self.short_hash());
                return false;
            }
        }

        if self.is_self_transfer() {
            return true;
        }

        let payload =
            Self::signing_payload(&self.recipient, &self.sender, self.value, self.timestamp);
        verify_base64_signature(&self.sender, &self.hash, &payload)
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender.is_empty()
    }

    pub fn is_self_transfer(&self) -> bool {
        self.sender == self.recipient
    }

    pub fn get_sender(&self) -> &str {
        self.sender.as_str()
    }

    pub fn get_recipient(&self) -> &str {
        self.recipient.as_str()
    }

    pub fn get_value(&self) -> i64 {
        self.value
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_inputs(&self) -> &[String] {
        self.inputs.as_slice()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn set_inputs(&mut self, inputs: Vec<String>) {
        self.inputs = inputs;
    }

    pub fn clear_inputs(&mut self) {
        self.inputs.clear();
    }

    // Signatures are long, so logs only show the beginning
    pub fn short_hash(&self) -> &str {
        let end = self
            .hash
            .char_indices()
            .nth(16)
            .map(|(i, _)| i)
            .unwrap_or(self.hash.len());
        &self.hash[..end]
    }
}
