//! Network-layer collaborator: file chunking and reassembly.
//!
//! A file travels as one byte stream laid out as
//!
//! ```text
//! name_len: u32 | name | file_size: u64 | bytes
//! ```
//!
//! cut into fixed-size [`TransportUnit`]s (the final unit is padded; its
//! `count` field marks where the real bytes end).  The link layer
//! guarantees units from one source arrive in increasing sequence order
//! with no gaps or duplicates, so reassembly is a straight sequential
//! read per source.
//!
//! [`chunk_file`] and [`FileAssembler`] are pure; [`NetworkLayer`] owns
//! the tasks that feed the engine and drain delivered units, counting
//! (and optionally writing out) completed files.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::addr::MacAddr;
use crate::seq::SeqNum;
use crate::wire::{Payload, TransportUnit};

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

/// Split a named file into transport units of `packet_size` bytes.
pub fn chunk_file(
    src: MacAddr,
    dest: MacAddr,
    name: &str,
    contents: &[u8],
    packet_size: usize,
) -> Vec<TransportUnit> {
    let mut stream = Vec::with_capacity(4 + name.len() + 8 + contents.len());
    stream.extend_from_slice(&(name.len() as u32).to_be_bytes());
    stream.extend_from_slice(name.as_bytes());
    stream.extend_from_slice(&(contents.len() as u64).to_be_bytes());
    stream.extend_from_slice(contents);

    stream
        .chunks(packet_size)
        .enumerate()
        .map(|(i, chunk)| {
            let mut data = chunk.to_vec();
            data.resize(packet_size, 0);
            TransportUnit {
                dest,
                src,
                number: (i % (usize::from(SeqNum::MAX) + 1)) as SeqNum,
                count: chunk.len() as u16,
                data: Payload(data),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// A fully reassembled file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub from: MacAddr,
    pub to: MacAddr,
    pub data: Vec<u8>,
}

impl ReceivedFile {
    /// Name the file is stored under, tagged with its endpoints.
    pub fn stored_name(&self) -> String {
        format!(
            "From_{}_To_{}_{}",
            file_tag(self.from),
            file_tag(self.to),
            self.name
        )
    }
}

fn file_tag(addr: MacAddr) -> String {
    addr.to_string().replace(':', "-")
}

struct Stream {
    to: MacAddr,
    bytes: Vec<u8>,
}

/// Per-source sequential reassembler.
///
/// Feed units in delivery order; a `Some` return is one completed file.
#[derive(Default)]
pub struct FileAssembler {
    streams: HashMap<MacAddr, Stream>,
}

impl FileAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one delivered unit; returns the finished file when this
    /// unit completes its source's stream.
    pub fn push(&mut self, unit: TransportUnit) -> Option<ReceivedFile> {
        let stream = self.streams.entry(unit.src).or_insert_with(|| Stream {
            to: unit.dest,
            bytes: Vec::new(),
        });
        let used = usize::from(unit.count).min(unit.data.len());
        stream.bytes.extend_from_slice(&unit.data.as_bytes()[..used]);

        let (name, size) = parse_header(&stream.bytes)?;
        let total = 4 + name.len() + 8 + size;
        if stream.bytes.len() < total {
            return None;
        }
        let stream = self.streams.remove(&unit.src).expect("stream just touched");
        let data = stream.bytes[4 + name.len() + 8..total].to_vec();
        Some(ReceivedFile {
            name,
            from: unit.src,
            to: stream.to,
            data,
        })
    }

    /// Sources with partially received files.
    pub fn pending(&self) -> usize {
        self.streams.len()
    }
}

/// Extract `(name, file_size)` once enough header bytes accumulated.
fn parse_header(bytes: &[u8]) -> Option<(String, usize)> {
    if bytes.len() < 4 {
        return None;
    }
    let name_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() < 4 + name_len + 8 {
        return None;
    }
    let name = String::from_utf8_lossy(&bytes[4..4 + name_len]).into_owned();
    let mut size = [0u8; 8];
    size.copy_from_slice(&bytes[4 + name_len..4 + name_len + 8]);
    Some((name, u64::from_be_bytes(size) as usize))
}

// ---------------------------------------------------------------------------
// NetworkLayer
// ---------------------------------------------------------------------------

/// File-transfer endpoint above one link-layer engine.
pub struct NetworkLayer {
    address: MacAddr,
    packet_size: usize,
    units_in: mpsc::Sender<TransportUnit>,
    out_dir: Option<PathBuf>,
    sending: Arc<AtomicBool>,
    received_count: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<ReceivedFile>>>,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NetworkLayer {
    /// `units_in` feeds the engine's sender; completed inbound files are
    /// written under `out_dir` when given, and always kept in memory.
    pub fn new(
        address: MacAddr,
        packet_size: usize,
        units_in: mpsc::Sender<TransportUnit>,
        out_dir: Option<PathBuf>,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        NetworkLayer {
            address,
            packet_size,
            units_in,
            out_dir,
            sending: Arc::new(AtomicBool::new(false)),
            received_count: Arc::new(AtomicUsize::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
            stop,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the delivery task draining `units_out` from the engine.
    pub fn start(&self, mut units_out: mpsc::Receiver<TransportUnit>) {
        let received_count = Arc::clone(&self.received_count);
        let received = Arc::clone(&self.received);
        let out_dir = self.out_dir.clone();
        let address = self.address;
        let mut stop = self.stop.subscribe();
        let task = tokio::spawn(async move {
            let mut assembler = FileAssembler::new();
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    unit = units_out.recv() => {
                        let Some(unit) = unit else { break };
                        let Some(file) = assembler.push(unit) else { continue };
                        log::info!(
                            "[net {}] file `{}` received from {} ({} bytes)",
                            address,
                            file.name,
                            file.from,
                            file.data.len()
                        );
                        if let Some(dir) = &out_dir {
                            let path = dir.join(file.stored_name());
                            if let Err(e) = tokio::fs::write(&path, &file.data).await {
                                log::warn!("[net {}] cannot store {}: {e}", address, path.display());
                            }
                        }
                        received.lock().unwrap().push(file);
                        received_count.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });
        self.tasks.lock().unwrap().push(task);
    }

    /// Begin transferring one file; `false` while a previous transfer is
    /// still feeding the engine.
    pub fn send_file(&self, to: MacAddr, name: String, contents: Vec<u8>) -> bool {
        if self.sending.swap(true, Ordering::SeqCst) {
            return false;
        }
        let units = chunk_file(self.address, to, &name, &contents, self.packet_size);
        log::info!(
            "[net {}] sending `{}` to {} ({} unit(s))",
            self.address,
            name,
            to,
            units.len()
        );
        let units_in = self.units_in.clone();
        let sending = Arc::clone(&self.sending);
        let mut stop = self.stop.subscribe();
        let task = tokio::spawn(async move {
            for unit in units {
                tokio::select! {
                    _ = stop.changed() => break,
                    sent = units_in.send(unit) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            sending.store(false, Ordering::SeqCst);
        });
        self.tasks.lock().unwrap().push(task);
        true
    }

    /// `true` once the current transfer has been fully handed down.
    pub fn sending_finished(&self) -> bool {
        !self.sending.load(Ordering::SeqCst)
    }

    /// Completed inbound files so far.
    pub fn received_file_count(&self) -> usize {
        self.received_count.load(Ordering::SeqCst)
    }

    /// Copies of every completed inbound file.
    pub fn received_files(&self) -> Vec<ReceivedFile> {
        self.received.lock().unwrap().clone()
    }

    /// Stop the transfer tasks and wait for them.
    pub async fn stop(&self) {
        let _ = self.stop.send(true);
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const A: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 1]);
    const B: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 2]);
    const C: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 3]);

    fn roundtrip(name: &str, contents: &[u8], packet_size: usize) -> ReceivedFile {
        let units = chunk_file(A, B, name, contents, packet_size);
        let mut assembler = FileAssembler::new();
        let mut done = None;
        for (i, unit) in units.into_iter().enumerate() {
            assert!(done.is_none(), "file completed before unit {i}");
            done = assembler.push(unit);
        }
        done.expect("file must complete on the last unit")
    }

    #[test]
    fn chunker_pads_and_numbers_units() {
        let units = chunk_file(A, B, "x", &[0xab; 100], 64);
        // Stream: 4 + 1 + 8 + 100 = 113 bytes → 2 units of 64.
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].number, 0);
        assert_eq!(units[1].number, 1);
        assert_eq!(units[0].count, 64);
        assert_eq!(units[1].count, 49);
        assert!(units.iter().all(|u| u.data.len() == 64));
        assert!(units.iter().all(|u| u.src == A && u.dest == B));
    }

    #[test]
    fn roundtrip_small_file() {
        let file = roundtrip("hello.txt", b"hello, medium!", 32);
        assert_eq!(file.name, "hello.txt");
        assert_eq!(file.from, A);
        assert_eq!(file.to, B);
        assert_eq!(file.data, b"hello, medium!");
    }

    #[test]
    fn roundtrip_empty_file() {
        let file = roundtrip("empty.bin", b"", 16);
        assert!(file.data.is_empty());
    }

    #[test]
    fn roundtrip_exact_packet_multiple() {
        // 4 + 4 + 8 + 48 = 64 = 4 packets of 16, no padding on the last.
        let contents = vec![0x5a; 48];
        let file = roundtrip("abcd", &contents, 16);
        assert_eq!(file.data, contents);
    }

    #[test]
    fn roundtrip_name_spanning_packets() {
        let name = "a".repeat(40);
        let file = roundtrip(&name, b"payload", 16);
        assert_eq!(file.name, name);
        assert_eq!(file.data, b"payload");
    }

    #[test]
    fn interleaved_sources_reassemble_independently() {
        let from_a = chunk_file(A, C, "from_a", &[1u8; 50], 16);
        let from_b = chunk_file(B, C, "from_b", &[2u8; 50], 16);
        let mut assembler = FileAssembler::new();
        let mut done = Vec::new();

        let (mut ia, mut ib) = (from_a.into_iter(), from_b.into_iter());
        loop {
            let mut progressed = false;
            for unit in [ia.next(), ib.next()].into_iter().flatten() {
                progressed = true;
                if let Some(file) = assembler.push(unit) {
                    done.push(file);
                }
            }
            if !progressed {
                break;
            }
        }

        assert_eq!(done.len(), 2);
        assert_eq!(assembler.pending(), 0);
        let names: Vec<&str> = done.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"from_a") && names.contains(&"from_b"));
    }

    #[test]
    fn stored_name_tags_both_endpoints() {
        let file = roundtrip("data.bin", b"abc", 32);
        assert_eq!(
            file.stored_name(),
            "From_02-00-00-00-00-01_To_02-00-00-00-00-02_data.bin"
        );
    }
}
