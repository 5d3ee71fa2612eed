use crate::core::ROUND_TIME;
use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DATA_DIR_KEY: &str = "LUCK_DATA_DIR";
const KEY_DIR_KEY: &str = "LUCK_KEY_DIR";
const ROUND_TIME_KEY: &str = "LUCK_ROUND_TIME";
const MAX_WAIT_KEY: &str = "LUCK_MAX_WAIT";

static DEFAULT_DATA_DIR: &str = "./data";
static DEFAULT_KEY_DIR: &str = "./keys";

/// Node settings. Built from defaults, then an optional TOML file, then
/// `LUCK_*` environment variables; the binary applies its flags last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub key_dir: PathBuf,
    pub round_time_secs: u64,
    pub max_luck_wait_secs: u64,
    /// Extra trusted attestation keys, one base64 key per line
    pub oracle_keys_file: Option<PathBuf>,
    pub traffic_min_wait_secs: u64,
    pub traffic_max_wait_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            key_dir: PathBuf::from(DEFAULT_KEY_DIR),
            round_time_secs: ROUND_TIME,
            max_luck_wait_secs: ROUND_TIME,
            oracle_keys_file: None,
            traffic_min_wait_secs: ROUND_TIME / 3,
            traffic_max_wait_secs: ROUND_TIME + ROUND_TIME / 3,
        }
    }
}

impl Config {
    /// Defaults, overlaid with `path` when given, overlaid with the environment
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|e| {
                    BlockchainError::Config(format!("Cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&contents)?
            }
            None => Config::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Config> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `LUCK_*` overrides looked up through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(KEY_DIR_KEY) {
            self.key_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup(ROUND_TIME_KEY) {
            self.round_time_secs = parse_secs(ROUND_TIME_KEY, &secs)?;
        }
        if let Some(secs) = lookup(MAX_WAIT_KEY) {
            self.max_luck_wait_secs = parse_secs(MAX_WAIT_KEY, &secs)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.round_time_secs == 0 {
            return Err(BlockchainError::Config(
                "round_time_secs must be positive".to_string(),
            ));
        }
        if self.traffic_min_wait_secs > self.traffic_max_wait_secs {
            return Err(BlockchainError::Config(format!(
                "traffic wait range {}..{} is empty",
                self.traffic_min_wait_secs, self.traffic_max_wait_secs
            )));
        }
        Ok(())
    }

    pub fn round_time(&self) -> Duration {
        Duration::from_secs(self.round_time_secs)
    }

    pub fn max_luck_wait(&self) -> Duration {
        Duration::from_secs(self.max_luck_wait_secs)
    }

    pub fn traffic_wait_bounds(&self) -> (u64, u64) {
        (self.traffic_min_wait_secs, self.traffic_max_wait_secs)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| BlockchainError::Config(format!("{key}={value} is not a number of seconds: {e}")))
}
