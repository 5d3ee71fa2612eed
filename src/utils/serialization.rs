// Binary record encoding for the sled trees
use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

/// Encode a storage record with bincode's standard configuration
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Serialization(format!("Record encoding failed: {e}")))
}

/// Decode a storage record written by [`serialize`]
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    let (data, _) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| BlockchainError::Serialization(format!("Record decoding failed: {e}")))?;
    Ok(data)
}

/// Big-endian key for a block index, so sled range scans walk index order
pub fn index_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

/// Key of the `position`-th transaction of block `index`
pub fn transaction_key(index: u64, position: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&index.to_be_bytes());
    key[8..].copy_from_slice(&position.to_be_bytes());
    key
}

/// Key of the `input`-th input of transaction `position` in block `index`
pub fn input_key(index: u64, position: u32, input: u32) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..12].copy_from_slice(&transaction_key(index, position));
    key[12..].copy_from_slice(&input.to_be_bytes());
    key
}

/// Block index stored in the first eight bytes of any record key
pub fn key_index(key: &[u8]) -> Result<u64> {
    let prefix: [u8; 8] = key
        .get(..8)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| BlockchainError::Database(format!("Malformed key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(prefix))
}
