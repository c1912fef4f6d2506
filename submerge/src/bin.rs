// This binary is a thin stdin loop that tokenizes one line at a time and
// calls straight into the Node Controller's public `Handle`. It performs no
// validation of its own beyond what `submerge::parse_line` already does.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use submerge::{parse_line, ConsoleCmd, ConsoleReply, Handle};
use submerge_net::{NodeID, PeerConfig};

/// Five-node Paxos-replicated transfer ledger.
#[derive(Parser, Debug)]
#[command(name = "submerge")]
struct Cli {
    /// This node's id, in 1..=5.
    #[arg(long)]
    id: i64,

    /// Path to the peers.toml file naming all five nodes.
    #[arg(long)]
    config: PathBuf,

    /// Directory the per-node snapshot file is read from and written to.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let self_id = NodeID(cli.id);
    let peers = PeerConfig::load(&cli.config).expect("failed to load peer config");
    if peers.addr_of(self_id).is_none() {
        eprintln!("node id {} is not present in {}", cli.id, cli.config.display());
        std::process::exit(1);
    }

    let handle = submerge::spawn_node(self_id, peers, &cli.data_dir).expect("failed to start node");

    run_console(self_id, &handle);
}

fn run_console(self_id: NodeID, handle: &Handle) {
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            break;
        }
        match parse_line(line) {
            Ok(cmd) => print_reply(self_id, dispatch(handle, cmd)),
            Err(e) => println!("error: {e}"),
        }
    }
}

fn dispatch(handle: &Handle, cmd: ConsoleCmd) -> ConsoleReply {
    match cmd {
        ConsoleCmd::MoneyTransfer { dst, amount } => handle.submit_transfer(dst, amount),
        ConsoleCmd::FailProcess => handle.fail(),
        ConsoleCmd::FixProcess => handle.recover(),
        ConsoleCmd::PrintBlockchain => handle.read_ledger(),
        ConsoleCmd::PrintBalance => handle.read_balances(),
    }
}

fn print_reply(self_id: NodeID, reply: ConsoleReply) {
    match reply {
        ConsoleReply::Ok => println!("ok"),
        ConsoleReply::Error(msg) => println!("error: {msg}"),
        ConsoleReply::Blockchain(chain) => {
            println!("node {self_id}: depth {}", chain.len());
            for (depth, block) in chain.iter().enumerate() {
                println!(
                    "  [{depth}] {} -> {} : {}  hash={}",
                    block.sender, block.receiver, block.amount, block.hash
                );
            }
        }
        ConsoleReply::Balances(balances) => {
            println!("node {self_id}:");
            for (id, balance) in balances {
                println!("  account {id}: {balance}");
            }
        }
    }
}
