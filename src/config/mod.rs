//! Configuration management
//!
//! Node settings: storage and key directories, round timing, oracle trust
//! and traffic pacing.

pub mod settings;

pub use settings::Config;
