//! Entry point for `datalink-sim`.
//!
//! Builds a shared hub, attaches N stations, has every station send one
//! generated file to its neighbour and waits until every file made it
//! across.  All protocol work lives in the library; `main.rs` owns only
//! process setup (logging, argument parsing) and the completion poll.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use datalink_sim::config::Config;
use datalink_sim::medium::{Hub, Interference};
use datalink_sim::node::Node;

/// Sliding-window ARQ link-layer simulator.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Number of stations on the shared medium.
    #[arg(short = 'c', long, default_value_t = 2)]
    stations: usize,

    /// Station number of the first station (MAC addresses derive from it).
    #[arg(short, long, default_value_t = 1)]
    first: usize,

    /// Configuration file applied to every station (key=value lines).
    #[arg(short = 'g', long)]
    config: Option<PathBuf>,

    /// Size of the generated file each station transfers.
    #[arg(long, default_value_t = 4096)]
    payload_bytes: usize,

    /// Directory to store received files in (kept in memory when absent).
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

/// Locally administered unicast address derived from a station number.
fn station_mac(number: usize) -> [u8; 6] {
    [0x02, 0, 0, 0, (number >> 8) as u8, number as u8]
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    if cli.stations < 2 {
        eprintln!("at least two stations are needed for a transfer");
        return ExitCode::FAILURE;
    }

    let base = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("configuration error in {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    log::info!("starting simulator with {} station(s)", cli.stations);
    let mut hub = Hub::new(base.hub_capacity, Interference::from_config(&base));

    let mut nodes = Vec::with_capacity(cli.stations);
    for i in 0..cli.stations {
        let number = cli.first + i;
        let mut config = base.clone();
        config.mac_address = station_mac(number);
        let mut node = Node::new(&config, cli.out_dir.clone());
        node.start(&hub);
        nodes.push(node);
    }
    hub.start();

    // Every station sends one generated file to its right-hand neighbour.
    for (i, node) in nodes.iter().enumerate() {
        let number = cli.first + i;
        let to = nodes[(i + 1) % nodes.len()].address();
        let contents: Vec<u8> = (0..cli.payload_bytes)
            .map(|j| (number + j) as u8)
            .collect();
        node.send_file(to, format!("station{number}.bin"), contents);
    }

    // Same completion criterion as the classic simulator: all transfers
    // handed down and every sent file fully received somewhere.
    loop {
        let all_sent = nodes.iter().all(|n| n.sending_finished());
        let received: usize = nodes.iter().map(|n| n.received_file_count()).sum();
        if all_sent && received == nodes.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    log::info!("all transfers complete — stopping simulator");
    for node in &mut nodes {
        node.stop().await;
    }
    hub.stop().await;
    ExitCode::SUCCESS
}
