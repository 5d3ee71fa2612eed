//! Command-line interface
//!
//! Argument parsing for the `luck-chain` binary.

pub mod commands;

pub use commands::{Command, Opt};
