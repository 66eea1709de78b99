//! Link-layer ARQ protocol engine.
//!
//! # Architecture
//!
//! ```text
//!  network layer
//!    │ units_in (mpsc)                     units_out (mpsc) ▲
//!    ▼                                                      │
//!  ┌───────────────┐   internal events    ┌────────────────┐
//!  │  sender loop  │◀────────────────────▶│ receiver loop  │
//!  │  SendWindow   │   (two queues)       │  RecvWindow    │
//!  └──────┬────────┘                      └──────▲─────────┘
//!         │ send_ring (frames out)               │ recv_ring (frames in)
//!         ▼                                      │
//!       physical transmit loop          physical receive loop
//! ```
//!
//! A [`LinkLayer`] runs two independent control loops plus the shared
//! [`crate::timer::TimerService`] scheduler — three schedulable units per
//! engine.  All cross-loop traffic goes through the two [`Event`] queues
//! and the two frame [`crate::ring::RingChannel`]s; nothing else is
//! shared.  Timer expiries arrive as [`TimerFired`] values on dedicated
//! queues and are mapped to [`Event::SendTimeout`] / [`Event::AckTimeout`]
//! by the loop that owns the queue.
//!
//! Both loops are `select!`s over their stop flag, their queues and their
//! data source, with the admission branch guarded by window room — no
//! branch ever spins.  Shutdown is cooperative: the stop flag flips, the
//! rings are woken, and every wait re-checks the flag.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::addr::MacAddr;
use crate::receiver::RecvWindow;
use crate::ring::RingChannel;
use crate::sender::SendWindow;
use crate::seq::SeqNum;
use crate::timer::{TimerFired, TimerHandle, TimerId, TimerService, INVALID_TIMER};
use crate::wire::{Frame, FrameKind, Payload, TransportUnit, Wire};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Session parameters for one link-layer engine.
#[derive(Debug, Clone)]
pub struct LinkParams {
    /// This station's hardware address.
    pub address: MacAddr,
    /// Window size `W`; the sequence space is `0..=2W-1`.
    pub max_buffered_frames: usize,
    /// Byte capacity of the outbound frame ring.
    pub send_ring_capacity: usize,
    /// Byte capacity of the inbound frame ring.
    pub recv_ring_capacity: usize,
    /// Retransmission timeout.
    pub timeout: Duration,
}

impl LinkParams {
    /// Forced-ACK bound: how long an acknowledgement may wait for a
    /// piggyback ride before going out standalone.
    pub fn ack_timeout(&self) -> Duration {
        self.timeout / 4
    }
}

// ---------------------------------------------------------------------------
// Internal events
// ---------------------------------------------------------------------------

/// Cross-loop protocol event.  Consumed at most once, FIFO per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    /// A frame from `peer` carried acknowledgement `ack`; `next` is the
    /// value our own receiver wants piggybacked back to `peer`.
    AckReceived {
        peer: MacAddr,
        ack: SeqNum,
        next: SeqNum,
    },
    /// `peer` rejected sequence `nak` and wants it resent now.
    NakReceived { peer: MacAddr, nak: SeqNum },
    /// Send a standalone acknowledgement of `ack` to `peer`.
    SendAck { peer: MacAddr, ack: SeqNum },
    /// Send a negative acknowledgement of `nak` to `peer`.
    SendNak { peer: MacAddr, nak: SeqNum },
    /// Retransmission timer expired for `seq`.
    SendTimeout { timer: TimerId, seq: SeqNum },
    /// Forced-ACK timer expired.
    AckTimeout { timer: TimerId, seq: SeqNum },
    /// An acknowledgement for `peer` just rode out on a DATA frame; the
    /// pending standalone one is superfluous.
    StopAckTimer { peer: MacAddr },
}

// ---------------------------------------------------------------------------
// LinkPort — the lower (physical-facing) interface
// ---------------------------------------------------------------------------

/// Cheap cloneable handle to an engine's frame rings, handed to the
/// physical layer.
#[derive(Clone)]
pub struct LinkPort {
    address: MacAddr,
    send_ring: Arc<RingChannel>,
    recv_ring: Arc<RingChannel>,
}

impl LinkPort {
    /// `true` when an outbound frame is waiting for transmission.
    pub fn frame_ready(&self) -> bool {
        self.send_ring.can_read::<Frame>()
    }

    /// Take the next outbound frame.  Only valid after
    /// [`frame_ready`](LinkPort::frame_ready) returned `true`.
    pub fn next_frame(&self) -> Frame {
        self.send_ring.read::<Frame>()
    }

    /// Wait for outbound activity; re-check
    /// [`frame_ready`](LinkPort::frame_ready) afterwards.
    pub async fn outbound_readable(&self) {
        self.send_ring.readable().await;
    }

    /// Hand a frame received from the medium to the engine.
    ///
    /// Frames addressed to another station (and not multicast) are
    /// dropped here, before the inbound ring.  A full inbound ring also
    /// drops the frame silently — sender retransmission recovers it.
    pub fn accept_frame(&self, frame: Frame) {
        if frame.dest != self.address && !frame.dest.is_multicast() {
            log::trace!("[link {}] frame for {} ignored", self.address, frame.dest);
            return;
        }
        if self.recv_ring.can_write(&frame) {
            self.recv_ring.write(&frame);
        } else {
            log::debug!(
                "[link {}] inbound ring full — frame seq={} from {} dropped",
                self.address,
                frame.seq,
                frame.src
            );
        }
    }

    /// Bytes currently buffered in the inbound ring.
    pub fn inbound_len(&self) -> usize {
        self.recv_ring.len()
    }
}

// ---------------------------------------------------------------------------
// LinkLayer
// ---------------------------------------------------------------------------

/// Queue endpoints consumed by the control loops at `start`.
struct LoopEnds {
    send_events_rx: UnboundedReceiver<Event>,
    recv_events_rx: UnboundedReceiver<Event>,
    rt_fired_tx: UnboundedSender<TimerFired>,
    rt_fired_rx: UnboundedReceiver<TimerFired>,
    ack_fired_tx: UnboundedSender<TimerFired>,
    ack_fired_rx: UnboundedReceiver<TimerFired>,
}

/// One sliding-window ARQ engine instance.
pub struct LinkLayer {
    params: LinkParams,
    send_ring: Arc<RingChannel>,
    recv_ring: Arc<RingChannel>,
    timers: TimerService,
    send_events: UnboundedSender<Event>,
    recv_events: UnboundedSender<Event>,
    ends: Option<LoopEnds>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl LinkLayer {
    pub fn new(params: LinkParams) -> Self {
        let (send_events, send_events_rx) = mpsc::unbounded_channel();
        let (recv_events, recv_events_rx) = mpsc::unbounded_channel();
        let (rt_fired_tx, rt_fired_rx) = mpsc::unbounded_channel();
        let (ack_fired_tx, ack_fired_rx) = mpsc::unbounded_channel();
        let (stop, _) = watch::channel(false);
        LinkLayer {
            send_ring: Arc::new(RingChannel::with_capacity(params.send_ring_capacity)),
            recv_ring: Arc::new(RingChannel::with_capacity(params.recv_ring_capacity)),
            timers: TimerService::new(),
            send_events,
            recv_events,
            ends: Some(LoopEnds {
                send_events_rx,
                recv_events_rx,
                rt_fired_tx,
                rt_fired_rx,
                ack_fired_tx,
                ack_fired_rx,
            }),
            stop,
            tasks: Vec::new(),
            params,
        }
    }

    pub fn address(&self) -> MacAddr {
        self.params.address
    }

    /// Handle to the physical-facing frame interface.
    pub fn port(&self) -> LinkPort {
        LinkPort {
            address: self.params.address,
            send_ring: Arc::clone(&self.send_ring),
            recv_ring: Arc::clone(&self.recv_ring),
        }
    }

    /// Spawn the sender and receiver loops.
    ///
    /// `units_in` feeds transport units to transmit; `units_out` receives
    /// reassembly-ready units in strictly increasing sequence order.
    ///
    /// # Panics
    ///
    /// Panics if the engine was already started.
    pub fn start(
        &mut self,
        units_in: mpsc::Receiver<TransportUnit>,
        units_out: mpsc::Sender<TransportUnit>,
    ) {
        let ends = self.ends.take().expect("link layer already started");
        self.timers.start();

        let sender = SenderLoop {
            address: self.params.address,
            max_seq: (2 * self.params.max_buffered_frames - 1) as SeqNum,
            timeout: self.params.timeout,
            window: SendWindow::new(self.params.max_buffered_frames),
            piggyback: HashMap::new(),
            ring: Arc::clone(&self.send_ring),
            events: ends.send_events_rx,
            recv_events: self.recv_events.clone(),
            rt_fired: ends.rt_fired_rx,
            rt_fired_tx: ends.rt_fired_tx,
            timers: self.timers.handle(),
            units_in,
            units_open: true,
            stop: self.stop.subscribe(),
        };
        let receiver = ReceiverLoop {
            address: self.params.address,
            ack_timeout: self.params.ack_timeout(),
            window: RecvWindow::new(self.params.max_buffered_frames),
            ring: Arc::clone(&self.recv_ring),
            events: ends.recv_events_rx,
            send_events: self.send_events.clone(),
            ack_fired: ends.ack_fired_rx,
            ack_fired_tx: ends.ack_fired_tx,
            timers: self.timers.handle(),
            units_out,
            ack_timer: INVALID_TIMER,
            ack_peer: None,
            stop: self.stop.subscribe(),
        };

        self.tasks.push(tokio::spawn(sender.run()));
        self.tasks.push(tokio::spawn(receiver.run()));
    }

    /// Signal both loops to stop, wake every wait, and join.
    pub async fn stop(&mut self) {
        let _ = self.stop.send(true);
        self.send_ring.wake_all();
        self.recv_ring.wake_all();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.timers.stop().await;
    }
}

// ---------------------------------------------------------------------------
// Sender loop
// ---------------------------------------------------------------------------

struct SenderLoop {
    address: MacAddr,
    max_seq: SeqNum,
    timeout: Duration,
    window: SendWindow,
    /// Last in-order sequence received from each peer — the value
    /// piggybacked onto DATA frames headed there.
    piggyback: HashMap<MacAddr, SeqNum>,
    ring: Arc<RingChannel>,
    events: UnboundedReceiver<Event>,
    recv_events: UnboundedSender<Event>,
    rt_fired: UnboundedReceiver<TimerFired>,
    rt_fired_tx: UnboundedSender<TimerFired>,
    timers: TimerHandle,
    units_in: mpsc::Receiver<TransportUnit>,
    units_open: bool,
    stop: watch::Receiver<bool>,
}

impl SenderLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.stop.changed() => break,
                Some(fired) = self.rt_fired.recv() => {
                    let ev = Event::SendTimeout { timer: fired.timer, seq: fired.seq };
                    if !self.handle_event(ev).await {
                        break;
                    }
                }
                Some(ev) = self.events.recv() => {
                    if !self.handle_event(ev).await {
                        break;
                    }
                }
                unit = self.units_in.recv(), if self.units_open && self.window.can_admit() => {
                    match unit {
                        Some(unit) => {
                            if !self.admit(unit).await {
                                break;
                            }
                        }
                        // Upper layer closed its side; keep running for
                        // acks and retransmissions.
                        None => self.units_open = false,
                    }
                }
            }
        }
        for id in self.window.armed_timers() {
            self.timers.remove(id);
        }
    }

    /// Wrap one admitted unit into a DATA frame, transmit it, park it for
    /// retransmission and arm its timer.
    async fn admit(&mut self, unit: TransportUnit) -> bool {
        let dest = unit.dest;
        let seq = self.window.next_seq();
        let ack = self.piggyback.get(&dest).copied().unwrap_or(self.max_seq);
        let frame = Frame::data(dest, self.address, ack, seq, Payload(unit.encode()));
        if !self.transmit(&frame).await {
            return false;
        }
        let timer = self.timers.add(self.timeout, seq, &self.rt_fired_tx);
        self.window.record_sent(frame, timer);
        log::debug!(
            "[link {}] → DATA seq={} ack={} to {} in_flight={}",
            self.address,
            seq,
            ack,
            dest,
            self.window.in_flight()
        );
        // The ack rode out on this frame; the standalone one is moot.
        if self.piggyback.contains_key(&dest) {
            let _ = self.recv_events.send(Event::StopAckTimer { peer: dest });
        }
        true
    }

    async fn handle_event(&mut self, ev: Event) -> bool {
        match ev {
            Event::AckReceived { peer, ack, next } => {
                self.piggyback.insert(peer, next);
                let cancelled = self.window.on_ack(peer, ack);
                if !cancelled.is_empty() {
                    log::debug!(
                        "[link {}] ← ACK {} from {} (slid {} frame(s))",
                        self.address,
                        ack,
                        peer,
                        cancelled.len()
                    );
                }
                for id in cancelled {
                    self.timers.remove(id);
                }
                true
            }
            Event::NakReceived { peer, nak } => {
                log::debug!("[link {}] ← NAK {} from {} — fast resend", self.address, nak, peer);
                // Only the station the frame was addressed to may NAK it.
                match self.window.frame_for(nak) {
                    Some(frame) if frame.dest == peer => self.resend(nak).await,
                    _ => true,
                }
            }
            Event::SendTimeout { timer, seq } => {
                log::debug!("[link {}] timeout seq={} (timer {})", self.address, seq, timer);
                self.resend(seq).await
            }
            Event::SendAck { peer, ack } => {
                self.piggyback.insert(peer, ack);
                log::debug!("[link {}] → ACK {} to {}", self.address, ack, peer);
                self.transmit(&Frame::ack(peer, self.address, ack)).await
            }
            Event::SendNak { peer, nak } => {
                log::debug!("[link {}] → NAK {} to {}", self.address, nak, peer);
                self.transmit(&Frame::nak(peer, self.address, nak)).await
            }
            // Receiver-side events never land on this queue.
            Event::AckTimeout { .. } | Event::StopAckTimer { .. } => true,
        }
    }

    /// Retransmit the buffered frame with sequence `seq`, unchanged, and
    /// arm a fresh timer for it.  A stale sequence (already acknowledged)
    /// is ignored.
    async fn resend(&mut self, seq: SeqNum) -> bool {
        let Some(frame) = self.window.frame_for(seq).cloned() else {
            log::trace!("[link {}] stale resend request seq={}", self.address, seq);
            return true;
        };
        if !self.transmit(&frame).await {
            return false;
        }
        let timer = self.timers.add(self.timeout, seq, &self.rt_fired_tx);
        match self.window.rearm(seq, timer) {
            // The previous timer may still be pending (NAK fast path).
            Some(old) => self.timers.remove(old),
            None => self.timers.remove(timer),
        }
        true
    }

    /// Write a frame to the outbound ring, waiting for room.  Returns
    /// `false` when the engine stopped mid-wait — a clean abort.
    async fn transmit(&mut self, frame: &Frame) -> bool {
        loop {
            if *self.stop.borrow() {
                return false;
            }
            if self.ring.can_write(frame) {
                self.ring.write(frame);
                return true;
            }
            tokio::select! {
                _ = self.stop.changed() => return false,
                _ = self.ring.writable() => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Receiver loop
// ---------------------------------------------------------------------------

struct ReceiverLoop {
    address: MacAddr,
    ack_timeout: Duration,
    window: RecvWindow,
    ring: Arc<RingChannel>,
    events: UnboundedReceiver<Event>,
    send_events: UnboundedSender<Event>,
    ack_fired: UnboundedReceiver<TimerFired>,
    ack_fired_tx: UnboundedSender<TimerFired>,
    timers: TimerHandle,
    units_out: mpsc::Sender<TransportUnit>,
    /// The single forced-ACK timer (invalid when disarmed).
    ack_timer: TimerId,
    /// Peer the pending standalone acknowledgement belongs to.
    ack_peer: Option<MacAddr>,
    stop: watch::Receiver<bool>,
}

impl ReceiverLoop {
    async fn run(mut self) {
        'outer: loop {
            while self.ring.can_read::<Frame>() {
                let frame = self.ring.read::<Frame>();
                if !self.handle_frame(frame).await {
                    break 'outer;
                }
            }
            tokio::select! {
                _ = self.stop.changed() => break,
                Some(fired) = self.ack_fired.recv() => {
                    let ev = Event::AckTimeout { timer: fired.timer, seq: fired.seq };
                    if !self.handle_event(ev).await {
                        break;
                    }
                }
                Some(ev) = self.events.recv() => {
                    if !self.handle_event(ev).await {
                        break;
                    }
                }
                _ = self.ring.readable() => {}
            }
        }
        if self.ack_timer != INVALID_TIMER {
            self.timers.remove(self.ack_timer);
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> bool {
        match frame.kind() {
            FrameKind::Ack => {
                log::trace!("[link {}] ← pure ACK {} from {}", self.address, frame.ack, frame.src);
                self.notify_ack(&frame);
                // Keep the standalone-ACK bound rolling while control
                // traffic flows.
                if self.ack_timer != INVALID_TIMER {
                    self.timers.restart(self.ack_timer, self.window.last_in_order());
                }
                true
            }
            FrameKind::Nak => {
                let _ = self.send_events.send(Event::NakReceived {
                    peer: frame.src,
                    nak: frame.ack,
                });
                true
            }
            FrameKind::Data(_) => self.handle_data(frame).await,
        }
    }

    async fn handle_data(&mut self, frame: Frame) -> bool {
        let peer = frame.src;
        let seq = frame.seq;
        // Piggybacked acknowledgement first, whatever the window says.
        self.notify_ack(&frame);

        if seq != self.window.frame_expected() && self.window.nak_allowed() {
            let _ = self.send_events.send(Event::SendNak { peer, nak: seq });
            self.window.mark_nak_sent();
        }

        // Any DATA arrival re-arms the forced-ACK bound: a peer still
        // transmitting (even duplicates) has not seen our newest ack yet.
        self.ack_peer = Some(peer);
        self.arm_ack_timer();

        if !self.window.in_window(seq) {
            log::trace!("[link {}] DATA seq={} outside window", self.address, seq);
            return true;
        }
        let unit = match TransportUnit::decode(frame.data.as_bytes()) {
            Ok(unit) => unit,
            Err(e) => {
                log::warn!("[link {}] undecodable unit in frame seq={}: {e}", self.address, seq);
                return true;
            }
        };
        if !self.window.store(seq, unit) {
            log::trace!("[link {}] duplicate DATA seq={}", self.address, seq);
            return true;
        }

        for (seq, unit) in self.window.take_ready() {
            log::debug!("[link {}] ← DATA seq={} from {} delivered", self.address, seq, peer);
            if self.units_out.send(unit).await.is_err() {
                log::warn!("[link {}] upper layer gone — receiver stopping", self.address);
                return false;
            }
            let _ = self.send_events.send(Event::SendAck { peer, ack: seq });
        }
        true
    }

    async fn handle_event(&mut self, ev: Event) -> bool {
        match ev {
            Event::AckTimeout { timer, seq } => {
                // The pending acknowledgement waited long enough for a
                // piggyback ride; send it standalone and keep the bound.
                if let Some(peer) = self.ack_peer {
                    let ack = self.window.last_in_order();
                    log::trace!(
                        "[link {}] forced ACK {} to {} (timer {} armed for {})",
                        self.address,
                        ack,
                        peer,
                        timer,
                        seq
                    );
                    let _ = self.send_events.send(Event::SendAck { peer, ack });
                    self.ack_timer = INVALID_TIMER;
                    self.arm_ack_timer();
                }
                true
            }
            Event::StopAckTimer { peer } => {
                if self.ack_peer == Some(peer) && self.ack_timer != INVALID_TIMER {
                    self.timers.remove(self.ack_timer);
                    self.ack_timer = INVALID_TIMER;
                }
                true
            }
            // Sender-side events never land on this queue.
            _ => true,
        }
    }

    /// Tell the sender loop about a frame's acknowledgement field, along
    /// with the value we want piggybacked back to its source.
    fn notify_ack(&self, frame: &Frame) {
        let _ = self.send_events.send(Event::AckReceived {
            peer: frame.src,
            ack: frame.ack,
            next: self.window.last_in_order(),
        });
    }

    /// Restart the forced-ACK timer, or arm a fresh one when the handle
    /// went stale (fired or never armed).
    fn arm_ack_timer(&mut self) {
        let tag = self.window.last_in_order();
        if self.ack_timer != INVALID_TIMER && self.timers.restart(self.ack_timer, tag) {
            return;
        }
        self.ack_timer = self.timers.add(self.ack_timeout, tag, &self.ack_fired_tx);
    }
}
