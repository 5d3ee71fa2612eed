//! Luck oracle
//!
//! Consensus weight comes from a lucky number drawn inside a trusted
//! environment. The engine only sees the [`LuckOracle`] trait;
//! [`SimulatedEnclave`] is the software stand-in used by the node and tests.

use crate::error::{BlockchainError, Result};
use crate::utils::{
    base64_decode, base64_encode, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    new_key_pair, public_key_of, sha256_digest,
};
use log::{debug, info};
use parking_lot::Mutex;
use rand::Rng;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;
use zeroize::Zeroizing;

pub const ENCLAVE_KEY_FILE: &str = "enclave_key.txt";

/// Attested draw for one block
#[derive(Debug, Clone, PartialEq)]
pub struct LuckProof {
    pub lucky_number: f64,
    pub certificate: String,
}

pub trait LuckOracle: Send + Sync {
    /// Draw a lucky number for a block body. Blocks for a time that grows
    /// as the draw gets worse.
    fn request_proof(&self, merkle_root: &str, previous_hash: &str) -> Result<LuckProof>;

    /// Check that `certificate` attests `lucky_number` for this block body
    fn verify_proof(
        &self,
        merkle_root: &str,
        previous_hash: &str,
        lucky_number: f64,
        certificate: &str,
    ) -> bool;
}

/// Software enclave: draws uniformly, enforces the `(1 - luck)` wait and
/// signs its answer with a P-256 attestation key.
pub struct SimulatedEnclave {
    pkcs8: Zeroizing<Vec<u8>>,
    trusted_keys: Vec<Vec<u8>>,
    max_wait: Duration,
    // Held for the whole draw so only one proof is ever in flight
    counter: Mutex<u64>,
}

impl SimulatedEnclave {
    pub fn new(max_wait: Duration) -> Result<SimulatedEnclave> {
        Self::from_pkcs8(new_key_pair()?, max_wait)
    }

    pub fn from_pkcs8(pkcs8: Vec<u8>, max_wait: Duration) -> Result<SimulatedEnclave> {
        let public_key = public_key_of(&pkcs8)?;
        Ok(SimulatedEnclave {
            pkcs8: Zeroizing::new(pkcs8),
            trusted_keys: vec![public_key],
            max_wait,
            counter: Mutex::new(0),
        })
    }

    /// Reuse the attestation key stored in `key_dir` so certificates issued
    /// by earlier runs still verify.
    pub fn load_or_create(key_dir: &Path, max_wait: Duration) -> Result<SimulatedEnclave> {
        let path = key_dir.join(ENCLAVE_KEY_FILE);
        if path.exists() {
            let encoded = Zeroizing::new(fs::read_to_string(&path)?);
            return Self::from_pkcs8(base64_decode(encoded.trim())?, max_wait);
        }

        fs::create_dir_all(key_dir)?;
        let pkcs8 = new_key_pair()?;
        fs::write(&path, base64_encode(&pkcs8))?;
        info!("Generated a new attestation key in {}", key_dir.display());
        Self::from_pkcs8(pkcs8, max_wait)
    }

    /// Trust certificates signed by another enclave (base64 public key)
    pub fn trust_key(&mut self, public_key: &str) -> Result<()> {
        let key = base64_decode(public_key.trim())?;
        if !self.trusted_keys.contains(&key) {
            self.trusted_keys.push(key);
        }
        Ok(())
    }

    /// Trust every key listed in `path`, one base64 key per line
    pub fn trust_keys_from_file(&mut self, path: &Path) -> Result<usize> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Cannot read {}: {e}", path.display()))
        })?;
        let mut count = 0;
        for line in contents.lines().filter(|line| !line.trim().is_empty()) {
            self.trust_key(line)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn public_key_base64(&self) -> String {
        // The own key is always the first trusted key
        base64_encode(&self.trusted_keys[0])
    }

    /// Number of proofs issued so far
    pub fn counter(&self) -> u64 {
        *self.counter.lock()
    }

    // Signs any luck without drawing or waiting; outside request_proof only tests use it
    pub(crate) fn attest(&self, merkle_root: &str, previous_hash: &str, lucky_number: f64) -> Result<String> {
        let message = Self::certificate_message(merkle_root, previous_hash, lucky_number);
        let signature = ecdsa_p256_sha256_sign_digest(&self.pkcs8, &message)
            .map_err(|e| BlockchainError::Oracle(format!("Attestation failed: {e}")))?;
        Ok(base64_encode(&signature))
    }

    fn certificate_message(merkle_root: &str, previous_hash: &str, lucky_number: f64) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(merkle_root.as_bytes());
        data.extend(previous_hash.as_bytes());
        data.extend(lucky_number.to_bits().to_be_bytes());
        sha256_digest(&data)
    }

    fn draw() -> f64 {
        // 53 random mantissa bits give a uniform value in [0, 1)
        let raw: u64 = rand::thread_rng().gen();
        (raw >> 11) as f64 / (1u64 << 53) as f64
    }

    fn wait_for(&self, lucky_number: f64) -> Duration {
        let seconds = ((1.0 - lucky_number) * self.max_wait.as_secs_f64()).round();
        Duration::from_secs_f64(seconds.max(0.0))
    }
}

impl LuckOracle for SimulatedEnclave {
    fn request_proof(&self, merkle_root: &str, previous_hash: &str) -> Result<LuckProof> {
        let mut counter = self.counter.lock();

        let lucky_number = Self::draw();
        let wait = self.wait_for(lucky_number);
        debug!("Drew lucky number {lucky_number:.6}, waiting {wait:?}");
        thread::sleep(wait);

        *counter += 1;
        let certificate = self.attest(merkle_root, previous_hash, lucky_number)?;
        Ok(LuckProof {
            lucky_number,
            certificate,
        })
    }

    fn verify_proof(
        &self,
        merkle_root: &str,
        previous_hash: &str,
        lucky_number: f64,
        certificate: &str,
    ) -> bool {
        let Ok(signature) = base64_decode(certificate) else {
            return false;
        };
        let message = Self::certificate_message(merkle_root, previous_hash, lucky_number);
        self.trusted_keys
            .iter()
            .any(|key| ecdsa_p256_sha256_sign_verify(key, &signature, &message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_request_proof_verifies() {
        let enclave = SimulatedEnclave::new(Duration::ZERO).unwrap();
        let proof = enclave.request_proof("merkle", "prev").unwrap();

        assert!((0.0..1.0).contains(&proof.lucky_number));
        assert!(enclave.verify_proof("merkle", "prev", proof.lucky_number, &proof.certificate));
        assert_eq!(enclave.counter(), 1);
    }

    #[test]
    fn test_certificate_binds_every_field() {
        let enclave = SimulatedEnclave::new(Duration::ZERO).unwrap();
        let cert = enclave.attest("merkle", "prev", 0.5).unwrap();

        assert!(enclave.verify_proof("merkle", "prev", 0.5, &cert));
        assert!(!enclave.verify_proof("other", "prev", 0.5, &cert));
        assert!(!enclave.verify_proof("merkle", "other", 0.5, &cert));
        assert!(!enclave.verify_proof("merkle", "prev", 0.51, &cert));
        assert!(!enclave.verify_proof("merkle", "prev", 0.5, "garbage"));
    }

    #[test]
    fn test_foreign_enclave_needs_trust() {
        let ours = SimulatedEnclave::new(Duration::ZERO).unwrap();
        let mut peer_view = SimulatedEnclave::new(Duration::ZERO).unwrap();
        let cert = ours.attest("m", "p", 0.1).unwrap();

        assert!(!peer_view.verify_proof("m", "p", 0.1, &cert));
        peer_view.trust_key(&ours.public_key_base64()).unwrap();
        assert!(peer_view.verify_proof("m", "p", 0.1, &cert));
    }

    #[test]
    fn test_wait_scales_with_bad_luck() {
        let enclave = SimulatedEnclave::new(Duration::from_secs(30)).unwrap();
        assert_eq!(enclave.wait_for(0.0), Duration::from_secs(30));
        assert_eq!(enclave.wait_for(0.5), Duration::from_secs(15));
        assert_eq!(enclave.wait_for(0.99), Duration::ZERO);
    }

    #[test]
    fn test_attestation_key_persists() {
        let dir = TempDir::new().unwrap();
        let first = SimulatedEnclave::load_or_create(dir.path(), Duration::ZERO).unwrap();
        let cert = first.attest("m", "p", 0.3).unwrap();
        let second = SimulatedEnclave::load_or_create(dir.path(), Duration::ZERO).unwrap();

        assert!(second.verify_proof("m", "p", 0.3, &cert));
    }

    #[test]
    fn test_trust_keys_from_file() {
        let dir = TempDir::new().unwrap();
        let peer = SimulatedEnclave::new(Duration::ZERO).unwrap();
        let path = dir.path().join("trusted.txt");
        fs::write(&path, format!("{}\n\n", peer.public_key_base64())).unwrap();

        let mut enclave = SimulatedEnclave::new(Duration::ZERO).unwrap();
        assert_eq!(enclave.trust_keys_from_file(&path).unwrap(), 1);
    }
}
