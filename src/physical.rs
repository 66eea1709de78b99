//! Physical layer: byte-level transmit and receive loops.
//!
//! The physical layer sits between a [`crate::link::LinkPort`] and the
//! medium:
//!
//! - the **transmit loop** drains outbound frames from the link layer,
//!   serialises them, runs them through the station's
//!   [`crate::coding::FrameCoder`] and puts the result on the cable;
//! - the **receive loop** drains raw payloads heard on the medium from
//!   its own inbound ring, reverses the coder and hands intact frames to
//!   the link layer.  Payloads the coder rejects are corrupted and are
//!   discarded here — the protocol engine never sees them.
//!
//! Bytes arriving while the inbound ring is full are forgotten, like a
//! signal nobody was listening for; retransmission recovers the frame.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::coding::FrameCoder;
use crate::link::LinkPort;
use crate::medium::{Cable, MediumSink};
use crate::ring::RingChannel;
use crate::wire::{Frame, Payload, Wire};

/// The medium-facing receive port: raw payloads land in a ring until the
/// receive loop picks them up.
#[derive(Clone)]
pub struct PhysicalRx {
    ring: Arc<RingChannel>,
}

impl MediumSink for PhysicalRx {
    fn deliver(&self, data: Payload) {
        if self.ring.can_write(&data) {
            self.ring.write(&data);
        } else {
            log::debug!("[phys] reception buffer full — data discarded");
        }
    }
}

/// One station's physical layer.
pub struct PhysicalLayer {
    port: LinkPort,
    coder: Arc<dyn FrameCoder>,
    recv_ring: Arc<RingChannel>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PhysicalLayer {
    pub fn new(port: LinkPort, coder: Box<dyn FrameCoder>, recv_buffer: usize) -> Self {
        let (stop, _) = watch::channel(false);
        PhysicalLayer {
            port,
            coder: Arc::from(coder),
            recv_ring: Arc::new(RingChannel::with_capacity(recv_buffer)),
            stop,
            tasks: Vec::new(),
        }
    }

    /// Handle the medium delivers received bytes to.
    pub fn rx_port(&self) -> PhysicalRx {
        PhysicalRx {
            ring: Arc::clone(&self.recv_ring),
        }
    }

    /// Spawn the transmit and receive loops, wired to `cable`.
    pub fn start(&mut self, cable: Cable) {
        self.tasks.push(tokio::spawn(transmit_loop(
            self.port.clone(),
            Arc::clone(&self.coder),
            cable,
            self.stop.subscribe(),
        )));
        self.tasks.push(tokio::spawn(receive_loop(
            self.port.clone(),
            Arc::clone(&self.coder),
            Arc::clone(&self.recv_ring),
            self.stop.subscribe(),
        )));
    }

    /// Stop both loops and wait for them.
    pub async fn stop(&mut self) {
        let _ = self.stop.send(true);
        self.recv_ring.wake_all();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

async fn transmit_loop(
    port: LinkPort,
    coder: Arc<dyn FrameCoder>,
    cable: Cable,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        while port.frame_ready() {
            let frame = port.next_frame();
            let coded = coder.encode(&frame.encode());
            cable.transmit(Payload(coded));
        }
        tokio::select! {
            _ = stop.changed() => break,
            _ = port.outbound_readable() => {}
        }
    }
}

async fn receive_loop(
    port: LinkPort,
    coder: Arc<dyn FrameCoder>,
    ring: Arc<RingChannel>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        while ring.can_read::<Payload>() {
            let raw = ring.read::<Payload>();
            let Some(bytes) = coder.decode(raw.as_bytes()) else {
                log::debug!("[phys] corrupted data received — discarded");
                continue;
            };
            match Frame::decode(&bytes) {
                Ok(frame) => port.accept_frame(frame),
                Err(e) => log::debug!("[phys] undecodable frame discarded: {e}"),
            }
        }
        tokio::select! {
            _ = stop.changed() => break,
            _ = ring.readable() => {}
        }
    }
}
