//! Text wire format for blocks and transactions
//!
//! A block travels as nine comma-terminated fields:
//! `previous,merkle,transactions,hash,index,luck,timestamp,certificate,fork,`
//! where `luck` is the base64 of the lucky number's raw little-endian bytes.
//! Every transaction in the blob ends with `;` and reads
//! `sender_recipient_value_hash_timestamp_inputs`, each input ending with `-`.
//! Base64 and hex never produce `,` `;` `_` or `-`, so no escaping is needed.

use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::ForkId;
use crate::utils::{base64_decode, base64_encode};

const BLOCK_FIELDS: usize = 9;
const TRANSACTION_FIELDS: usize = 6;

pub fn encode_transaction(tx: &Transaction) -> String {
    let mut inputs = String::new();
    for input in tx.get_inputs() {
        inputs.push_str(input);
        inputs.push('-');
    }
    format!(
        "{}_{}_{}_{}_{}_{}",
        tx.get_sender(),
        tx.get_recipient(),
        tx.get_value(),
        tx.get_hash(),
        tx.get_timestamp(),
        inputs
    )
}

pub fn decode_transaction(record: &str) -> Result<Transaction> {
    let fields: Vec<&str> = record.split('_').collect();
    if fields.len() != TRANSACTION_FIELDS {
        return Err(BlockchainError::Codec(format!(
            "Transaction record has {} fields, expected {TRANSACTION_FIELDS}",
            fields.len()
        )));
    }

    let value = parse_number::<i64>(fields[2], "transaction value")?;
    let timestamp = parse_number::<i64>(fields[4], "transaction timestamp")?;
    let inputs = fields[5]
        .split('-')
        .filter(|input| !input.is_empty())
        .map(str::to_string)
        .collect();

    Ok(Transaction::new(
        fields[0], fields[1], value, fields[3], inputs, timestamp,
    ))
}

pub fn encode_block(block: &Block, fork: ForkId) -> String {
    let mut blob = String::new();
    for tx in block.get_transactions() {
        blob.push_str(&encode_transaction(tx));
        blob.push(';');
    }

    format!(
        "{},{},{},{},{},{},{},{},{},",
        block.get_previous_hash(),
        block.get_merkle_hash(),
        blob,
        block.get_hash(),
        block.get_index(),
        base64_encode(&block.lucky_number_bytes()),
        block.get_timestamp(),
        block.get_certificate(),
        fork.as_u64()
    )
}

pub fn decode_block(record: &str) -> Result<(Block, ForkId)> {
    let mut fields: Vec<&str> = record.split(',').collect();
    if fields.len() == BLOCK_FIELDS + 1 && fields[BLOCK_FIELDS].is_empty() {
        fields.pop();
    }
    if fields.len() != BLOCK_FIELDS {
        return Err(BlockchainError::Codec(format!(
            "Block record has {} fields, expected {BLOCK_FIELDS}",
            fields.len()
        )));
    }

    let transactions = fields[2]
        .split(';')
        .filter(|tx| !tx.is_empty())
        .map(decode_transaction)
        .collect::<Result<Vec<_>>>()?;

    let luck_bytes: [u8; 8] = base64_decode(fields[5])?
        .try_into()
        .map_err(|_| BlockchainError::Codec("Lucky number must be 8 bytes".to_string()))?;

    let block = Block::from_parts(
        fields[0].to_string(),
        fields[1].to_string(),
        transactions,
        parse_number::<i64>(fields[6], "block timestamp")?,
        parse_number::<u64>(fields[4], "block index")?,
        f64::from_le_bytes(luck_bytes),
        fields[7].to_string(),
        fields[3].to_string(),
    );
    let fork = ForkId::new(parse_number::<u64>(fields[8], "fork id")?);

    Ok((block, fork))
}

fn parse_number<T: std::str::FromStr>(field: &str, what: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    field
        .parse::<T>()
        .map_err(|e| BlockchainError::Codec(format!("Bad {what} '{field}': {e}")))
}
