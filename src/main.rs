// This is my entry point for the Proof of Luck node
// Every command opens the node from the configured directories, does its job and exits
use clap::Parser;
use log::{error, LevelFilter};
use luck_chain::{
    Block, BlockOutcome, Command, CursorMode, Node, Opt, SimulatedEnclave, Wallet,
};
use std::process;
use std::thread;
use std::time::Duration;

fn main() {
    // Info by default, RUST_LOG overrides it
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = opt.load_config()?;

    match opt.command {
        Command::Init => {
            let node = Node::open(config)?;
            println!(
                "Chain ready at block {}",
                node.get_blockchain().latest_block_index()?
            );
            println!("Your identity: {}", node.identity());
        }
        // Keys don't need the database, so I don't open it here
        Command::Keys => {
            let wallet = Wallet::load_or_create(&config.key_dir)?;
            let enclave = SimulatedEnclave::load_or_create(&config.key_dir, config.max_luck_wait())?;
            println!("Identity:        {}", wallet.get_identity());
            println!("Attestation key: {}", enclave.public_key_base64());
        }
        Command::Balance { key } => {
            let node = Node::open(config)?;
            let key = key.unwrap_or_else(|| node.identity());
            let balance = node.get_blockchain().balance(&key)?;
            let pending = node.get_blockchain().pending_outgoing_value(&key);
            println!("Balance of {key}: {balance}");
            if pending > 0 {
                println!("Pending outgoing: {pending}");
            }
        }
        Command::Send {
            recipient,
            value,
            mine,
        } => {
            let node = Node::open(config)?;
            let tx = node.submit_transaction(&recipient, value)?;
            println!("Submitted {}", tx.short_hash());
            // The mempool lives in this process, so without mining the transfer is only broadcast
            if mine {
                report_outcomes(&node, node.mine_rounds(1)?)?;
            }
        }
        Command::Mine { rounds } => {
            let node = Node::open(config)?;
            report_outcomes(&node, node.mine_rounds(rounds)?)?;
        }
        Command::Node { duration, traffic } => {
            let mut node = Node::open(config)?;
            node.start_mining()?;
            if traffic {
                node.start_traffic()?;
            }
            thread::sleep(Duration::from_secs(duration));
            node.shutdown();
            println!(
                "Stopped at block {}",
                node.get_blockchain().latest_block_index()?
            );
        }
        Command::Printchain { detailed, json } => {
            let node = Node::open(config)?;
            if json {
                let blocks = node
                    .get_blockchain()
                    .get_store()
                    .iter_blocks(CursorMode::Main)?
                    .collect::<luck_chain::Result<Vec<Block>>>()?;
                println!("{}", serde_json::to_string_pretty(&blocks)?);
            } else {
                print!("{}", node.get_blockchain().print_chain(detailed)?);
            }
        }
        Command::Verify => {
            let node = Node::open(config)?;
            if !node.get_blockchain().verify_blockchain()? {
                return Err("The main chain is invalid, see the log for the failing block".into());
            }
            println!("The main chain is valid");
        }
        Command::Participants => {
            let node = Node::open(config)?;
            for key in node.get_blockchain().get_store().all_participants(&node.identity())? {
                println!("{key}");
            }
        }
        Command::History => {
            let node = Node::open(config)?;
            for entry in node
                .get_blockchain()
                .get_store()
                .transactions_sent_by(&node.identity())?
            {
                let tx = &entry.transaction;
                println!(
                    "block {}: {} to {} ({})",
                    entry.block_index,
                    tx.get_value(),
                    tx.get_recipient(),
                    tx.short_hash()
                );
            }
        }
    }
    Ok(())
}

fn report_outcomes(node: &Node, outcomes: Vec<BlockOutcome>) -> Result<(), Box<dyn std::error::Error>> {
    for outcome in outcomes {
        println!("{outcome:?}");
    }
    println!(
        "Chain tip at block {}",
        node.get_blockchain().latest_block_index()?
    );
    Ok(())
}
