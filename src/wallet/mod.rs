//! Key management
//!
//! The node's P-256 signing key pair, persisted as two base64 files.

#[allow(clippy::module_inception)]
pub mod wallet;

pub use wallet::{Wallet, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
