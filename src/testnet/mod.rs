//! Shared fixtures for unit tests
//!
//! Throwaway sled stores, an engine wired to a zero-wait simulated enclave,
//! and helpers that build attested blocks with chosen luck.

pub mod test_utils;
