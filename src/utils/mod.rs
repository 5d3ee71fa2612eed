//! Utility functions and helpers
//!
//! Hashing, signatures and base64 helpers, plus the bincode record codec
//! and the big-endian key layout used by the chain store.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base64_decode, base64_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, public_key_of, sha256_digest, sha256_hex,
    verify_base64_signature,
};

pub use serialization::{deserialize, index_key, input_key, key_index, serialize, transaction_key};
