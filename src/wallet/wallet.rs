use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::{base64_decode, base64_encode, new_key_pair, public_key_of};
use log::info;
use std::fs;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const PUBLIC_KEY_FILE: &str = "public_key.txt";
pub const PRIVATE_KEY_FILE: &str = "private_key.txt";

/// A node's signing identity. The base64 public key is the address other
/// participants send value to.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    #[zeroize(skip)]
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = new_key_pair()?;
        Self::from_pkcs8(pkcs8)
    }

    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<Wallet> {
        let public_key = public_key_of(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    /// Load the key pair from `key_dir`, generating and saving a fresh one
    /// when either file is missing.
    pub fn load_or_create(key_dir: &Path) -> Result<Wallet> {
        let public_path = key_dir.join(PUBLIC_KEY_FILE);
        let private_path = key_dir.join(PRIVATE_KEY_FILE);

        if public_path.exists() && private_path.exists() {
            let mut encoded = fs::read_to_string(&private_path)?;
            let pkcs8 = base64_decode(encoded.trim());
            encoded.zeroize();
            let wallet = Self::from_pkcs8(pkcs8?)?;

            let stored_public = fs::read_to_string(&public_path)?;
            if stored_public.trim() != wallet.get_identity() {
                return Err(BlockchainError::Crypto(format!(
                    "{} does not match the private key",
                    public_path.display()
                )));
            }
            return Ok(wallet);
        }

        fs::create_dir_all(key_dir)?;
        let wallet = Self::new()?;
        fs::write(&private_path, base64_encode(&wallet.pkcs8))?;
        fs::write(&public_path, wallet.get_identity())?;
        info!("Generated a new key pair in {}", key_dir.display());
        Ok(wallet)
    }

    /// Base64 public key, the identity used as sender and recipient
    pub fn get_identity(&self) -> String {
        base64_encode(&self.public_key)
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    /// Sign a transfer from this wallet
    pub fn sign_transaction(
        &self,
        recipient: &str,
        value: i64,
        timestamp: i64,
    ) -> Result<Transaction> {
        Transaction::new_signed(&self.pkcs8, &self.get_identity(), recipient, value, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_or_create_persists_keys() {
        let dir = TempDir::new().unwrap();
        let first = Wallet::load_or_create(dir.path()).unwrap();
        let second = Wallet::load_or_create(dir.path()).unwrap();

        assert_eq!(first.get_identity(), second.get_identity());
        assert!(dir.path().join(PUBLIC_KEY_FILE).exists());
        assert!(dir.path().join(PRIVATE_KEY_FILE).exists());
    }

    #[test]
    fn test_missing_file_regenerates() {
        let dir = TempDir::new().unwrap();
        let first = Wallet::load_or_create(dir.path()).unwrap();
        fs::remove_file(dir.path().join(PUBLIC_KEY_FILE)).unwrap();
        let second = Wallet::load_or_create(dir.path()).unwrap();

        assert_ne!(first.get_identity(), second.get_identity());
    }

    #[test]
    fn test_mismatched_public_key_rejected() {
        let dir = TempDir::new().unwrap();
        Wallet::load_or_create(dir.path()).unwrap();
        fs::write(dir.path().join(PUBLIC_KEY_FILE), "bm90IGEga2V5").unwrap();

        assert!(Wallet::load_or_create(dir.path()).is_err());
    }

    #[test]
    fn test_signed_transaction_verifies() {
        let wallet = Wallet::new().unwrap();
        let tx = wallet.sign_transaction("bob", 5, 100).unwrap();

        assert_eq!(tx.get_sender(), wallet.get_identity());
        assert_eq!(base64_encode(wallet.get_public_key()), wallet.get_identity());
        assert!(tx.verify());
    }
}
