//! One complete station: network layer over link layer over physical
//! layer, attached to the shared medium.
//!
//! A [`Node`] owns the whole stack for a single hardware address and
//! wires the handoffs:
//!
//! ```text
//!   NetworkLayer ── units (mpsc) ──▶ LinkLayer ── frames (rings) ──▶
//!   PhysicalLayer ── payloads ──▶ Hub cable
//! ```
//!
//! Construction builds every layer from one [`Config`]; `start` attaches
//! to a hub and spawns every loop; `stop` tears the stack down upper
//! layer first.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::addr::MacAddr;
use crate::config::Config;
use crate::link::LinkLayer;
use crate::medium::Hub;
use crate::network::{NetworkLayer, ReceivedFile};
use crate::physical::PhysicalLayer;
use crate::wire::TransportUnit;

/// Unit-channel receiver ends, held between construction and `start`.
struct Handoffs {
    units_in_rx: mpsc::Receiver<TransportUnit>,
    units_out_rx: mpsc::Receiver<TransportUnit>,
    units_out_tx: mpsc::Sender<TransportUnit>,
}

/// A full protocol stack for one station.
pub struct Node {
    address: MacAddr,
    link: LinkLayer,
    physical: PhysicalLayer,
    network: NetworkLayer,
    handoffs: Option<Handoffs>,
}

impl Node {
    /// Build the stack described by `config`.  Received files are written
    /// under `out_dir` when given.
    pub fn new(config: &Config, out_dir: Option<PathBuf>) -> Self {
        let (units_in_tx, units_in_rx) = mpsc::channel(config.network_send_capacity);
        let (units_out_tx, units_out_rx) = mpsc::channel(config.network_recv_capacity);

        let link = LinkLayer::new(config.link_params());
        let physical = PhysicalLayer::new(
            link.port(),
            config.coder().build(),
            config.physical_recv_buffer,
        );
        let network = NetworkLayer::new(
            config.mac(),
            config.network_packet_size,
            units_in_tx,
            out_dir,
        );

        Node {
            address: config.mac(),
            link,
            physical,
            network,
            handoffs: Some(Handoffs {
                units_in_rx,
                units_out_rx,
                units_out_tx,
            }),
        }
    }

    pub fn address(&self) -> MacAddr {
        self.address
    }

    /// Attach to `hub` and spawn every layer's loops.
    ///
    /// # Panics
    ///
    /// Panics if the node was already started.
    pub fn start(&mut self, hub: &Hub) {
        let handoffs = self.handoffs.take().expect("node already started");
        let cable = hub.connect(Arc::new(self.physical.rx_port()));
        self.network.start(handoffs.units_out_rx);
        self.link
            .start(handoffs.units_in_rx, handoffs.units_out_tx);
        self.physical.start(cable);
        log::info!("[node {}] started", self.address);
    }

    /// Begin transferring one file to `to`; `false` while a previous
    /// transfer is still in progress.
    pub fn send_file(&self, to: MacAddr, name: String, contents: Vec<u8>) -> bool {
        self.network.send_file(to, name, contents)
    }

    /// `true` once the current transfer has been fully handed to the link
    /// layer.
    pub fn sending_finished(&self) -> bool {
        self.network.sending_finished()
    }

    pub fn received_file_count(&self) -> usize {
        self.network.received_file_count()
    }

    pub fn received_files(&self) -> Vec<ReceivedFile> {
        self.network.received_files()
    }

    /// Tear the stack down, upper layer first.
    pub async fn stop(&mut self) {
        self.network.stop().await;
        self.link.stop().await;
        self.physical.stop().await;
        log::info!("[node {}] stopped", self.address);
    }
}
