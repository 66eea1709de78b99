//! Shared broadcast medium.
//!
//! Every station's cable feeds one [`Hub`], which re-broadcasts each
//! transmission to every *other* attached station — the classic shared
//! segment.  Interference is applied once, at ingest, so all receivers
//! see the same (possibly damaged) bytes.
//!
//! The hub's ingest queue is bounded; a transmission arriving while it is
//! full is lost outright, exactly like a collision-damaged signal — the
//! link layer's retransmission recovers it.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::wire::Payload;

/// Receiving side of a station's attachment to the medium.
pub trait MediumSink: Send + Sync + 'static {
    /// Raw bytes arriving off the wire.  Implementations must not block.
    fn deliver(&self, data: Payload);
}

// ---------------------------------------------------------------------------
// Interference
// ---------------------------------------------------------------------------

/// Noise model applied to every payload entering the hub.
pub enum Interference {
    /// Clean medium.
    None,
    /// With probability `frequency`%, xor-flip at least one byte;
    /// `byte_error_frequency`% of the payload's bytes are hit.
    Random {
        frequency: u32,
        byte_error_frequency: u32,
        rng: StdRng,
    },
}

impl Interference {
    pub fn from_config(config: &Config) -> Interference {
        if config.hub_noise == 1 {
            Interference::Random {
                frequency: config.hub_noise_frequency,
                byte_error_frequency: config.hub_noise_byte_error_frequency,
                rng: StdRng::seed_from_u64(config.hub_noise_seed),
            }
        } else {
            Interference::None
        }
    }

    /// Damage `data` in place according to the model.
    pub fn apply(&mut self, data: &mut [u8]) {
        let Interference::Random {
            frequency,
            byte_error_frequency,
            rng,
        } = self
        else {
            return;
        };
        if data.is_empty() || rng.gen_range(0..100u32) >= *frequency {
            return;
        }
        // At least one byte is damaged whenever noise strikes.
        let error_bytes =
            ((data.len() as u64 * u64::from(*byte_error_frequency)).div_ceil(100)).max(1);
        for _ in 0..error_bytes {
            let idx = rng.gen_range(0..data.len());
            let error: u8 = rng.gen_range(1..=255);
            data[idx] ^= error;
        }
        log::debug!("[hub] noise applied ({error_bytes} byte(s))");
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

struct HubState {
    stations: Mutex<Vec<Arc<dyn MediumSink>>>,
    ingest: mpsc::Sender<(usize, Payload)>,
    noise: Mutex<Interference>,
}

/// A station's transmit handle onto the medium.
#[derive(Clone)]
pub struct Cable {
    id: usize,
    state: Arc<HubState>,
}

impl Cable {
    /// Put bytes on the wire.  Noise strikes here, once, before fan-out;
    /// a full hub loses the transmission.
    pub fn transmit(&self, mut data: Payload) {
        self.state.noise.lock().unwrap().apply(&mut data.0);
        if self.state.ingest.try_send((self.id, data)).is_err() {
            log::warn!("[hub] data lost — transmission buffer full (station {})", self.id);
        }
    }
}

/// The shared broadcast segment connecting every station.
pub struct Hub {
    state: Arc<HubState>,
    ingest_rx: Option<mpsc::Receiver<(usize, Payload)>>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Hub {
    pub fn new(capacity: usize, noise: Interference) -> Self {
        let (ingest, ingest_rx) = mpsc::channel(capacity);
        let (stop, _) = watch::channel(false);
        Hub {
            state: Arc::new(HubState {
                stations: Mutex::new(Vec::new()),
                ingest,
                noise: Mutex::new(noise),
            }),
            ingest_rx: Some(ingest_rx),
            stop,
            task: None,
        }
    }

    /// Attach a station; the returned [`Cable`] is its transmit handle.
    pub fn connect(&self, sink: Arc<dyn MediumSink>) -> Cable {
        let mut stations = self.state.stations.lock().unwrap();
        stations.push(sink);
        Cable {
            id: stations.len() - 1,
            state: Arc::clone(&self.state),
        }
    }

    /// Spawn the broadcast task.
    ///
    /// # Panics
    ///
    /// Panics if the hub was already started.
    pub fn start(&mut self) {
        let mut ingest_rx = self.ingest_rx.take().expect("hub already started");
        let state = Arc::clone(&self.state);
        let mut stop = self.stop.subscribe();
        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    item = ingest_rx.recv() => {
                        let Some((from, data)) = item else { break };
                        let stations = state.stations.lock().unwrap().clone();
                        for (id, sink) in stations.iter().enumerate() {
                            if id != from {
                                sink.deliver(data.clone());
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Stop the broadcast task and wait for it.
    pub async fn stop(&mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
