use crate::config::Config;
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "luck-chain", about = "A Proof of Luck blockchain node")]
pub struct Opt {
    #[arg(long, global = true, help = "TOML configuration file")]
    pub config: Option<PathBuf>,
    #[arg(long, global = true, help = "Directory of the chain database")]
    pub data_dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Directory of the key files")]
    pub key_dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Seconds between blocks")]
    pub round_time: Option<u64>,
    #[command(subcommand)]
    pub command: Command,
}

impl Opt {
    /// Configuration file and environment first, then these flags
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.key_dir {
            config.key_dir = dir.clone();
        }
        if let Some(secs) = self.round_time {
            config.round_time_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "init", about = "Create the key files and the genesis block")]
    Init,
    #[command(name = "keys", about = "Print this node's identity and attestation key")]
    Keys,
    #[command(name = "balance", about = "Get the balance of an identity")]
    Balance {
        #[arg(help = "Identity to look up, this node's by default")]
        key: Option<String>,
    },
    #[command(name = "send", about = "Send value from this node's wallet")]
    Send {
        #[arg(help = "Recipient identity")]
        recipient: String,
        #[arg(help = "Value to send")]
        value: i64,
        #[arg(long, help = "Mine a block right away")]
        mine: bool,
    },
    #[command(name = "mine", about = "Mine blocks in the foreground")]
    Mine {
        #[arg(long, default_value_t = 1, help = "Number of rounds to mine")]
        rounds: u32,
    },
    #[command(name = "node", about = "Run the background miner for a while")]
    Node {
        #[arg(long, default_value_t = 300, help = "Seconds to run before shutting down")]
        duration: u64,
        #[arg(long, help = "Also generate random test transfers")]
        traffic: bool,
    },
    #[command(name = "printchain", about = "Print the last blocks of the main chain")]
    Printchain {
        #[arg(long, help = "Include transactions")]
        detailed: bool,
        #[arg(long, help = "Print the whole main chain as JSON")]
        json: bool,
    },
    #[command(name = "verify", about = "Validate every block of the main chain")]
    Verify,
    #[command(name = "participants", about = "List identities seen on the chain")]
    Participants,
    #[command(name = "history", about = "List transfers sent by this node")]
    History,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let opt = Opt::try_parse_from(["luck-chain", "send", "bob", "20", "--mine"]).unwrap();
        match opt.command {
            Command::Send { recipient, value, mine } => {
                assert_eq!(recipient, "bob");
                assert_eq!(value, 20);
                assert!(mine);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_flags_override_config() {
        let opt = Opt::try_parse_from([
            "luck-chain",
            "mine",
            "--rounds",
            "3",
            "--round-time",
            "2",
            "--data-dir",
            "/tmp/luck",
        ])
        .unwrap();
        let config = opt.load_config().unwrap();
        assert_eq!(config.round_time_secs, 2);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/luck"));
        assert!(matches!(opt.command, Command::Mine { rounds: 3 }));
    }

    #[test]
    fn test_printchain_flags() {
        let opt = Opt::try_parse_from(["luck-chain", "printchain", "--json"]).unwrap();
        assert!(matches!(
            opt.command,
            Command::Printchain { detailed: false, json: true }
        ));
    }
}
