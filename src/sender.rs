//! Sliding-window send-side state machine.
//!
//! [`SendWindow`] tracks the sender half of the ARQ protocol: up to `W`
//! frames may be in flight at once, each parked in a retransmission slot
//! with its own timer until a (possibly piggybacked) acknowledgement
//! retires it.
//!
//! # Protocol contract
//!
//! - At most `W` frames are unacknowledged at any time, where
//!   `W = (max_seq + 1) / 2`.
//! - Acknowledgements are **cumulative and inclusive**: ack `n` retires
//!   every in-flight frame from `ack_expected` through `n` in one slide.
//! - Sequence numbers wrap modulo `max_seq + 1`; all membership checks go
//!   through [`crate::seq::between`].
//! - A retransmitted frame is the **stored frame, unchanged** — sequence
//!   number and payload are never reassigned.
//!
//! This module only manages state; building frames, transmitting them and
//! arming timers is [`crate::link`]'s responsibility.

use crate::addr::MacAddr;
use crate::seq::{between, inc, SeqNum};
use crate::timer::TimerId;
use crate::wire::Frame;

// ---------------------------------------------------------------------------
// SendSlot
// ---------------------------------------------------------------------------

/// One in-flight frame parked for possible retransmission.
#[derive(Debug, Clone)]
pub struct SendSlot {
    /// The exact frame that was transmitted (resent verbatim on timeout).
    pub frame: Frame,
    /// Retransmission timer currently armed for this frame.
    pub timer: TimerId,
    /// Total number of times this frame has been transmitted.
    pub tx_count: u32,
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Send-side sliding-window state.
///
/// # Sequence-number layout
///
/// ```text
///  ack_expected      next_to_send
///       │                 │
///  ─────┼─────────────────┼─────────────────▶ seq space (mod max_seq+1)
///       │ ◀─ in flight ─▶ │ ◀─ assignable ─▶
/// ```
#[derive(Debug)]
pub struct SendWindow {
    /// Oldest unacknowledged sequence number (left window edge).
    ack_expected: SeqNum,
    /// Sequence number the next admitted unit will receive.
    next_to_send: SeqNum,
    /// Frames currently in flight.
    buffered: usize,
    /// Largest sequence number; the space is `0..=max_seq`.
    max_seq: SeqNum,
    /// Retransmission buffer, indexed by `seq mod W`.
    slots: Vec<Option<SendSlot>>,
}

impl SendWindow {
    /// Create a window admitting at most `max_buffered` in-flight frames.
    ///
    /// The sequence space is sized accordingly: `max_seq = 2 * W - 1`.
    pub fn new(max_buffered: usize) -> Self {
        assert!(max_buffered >= 1, "window must hold at least one frame");
        SendWindow {
            ack_expected: 0,
            next_to_send: 0,
            buffered: 0,
            max_seq: (2 * max_buffered - 1) as SeqNum,
            slots: (0..max_buffered).map(|_| None).collect(),
        }
    }

    /// Window size `W`.
    pub fn window_size(&self) -> usize {
        self.slots.len()
    }

    /// Largest sequence number in the circular space.
    pub fn max_seq(&self) -> SeqNum {
        self.max_seq
    }

    /// `true` when there is room to admit one more unit.
    pub fn can_admit(&self) -> bool {
        self.buffered < self.slots.len()
    }

    /// Number of frames awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.buffered
    }

    /// `true` when at least one frame awaits acknowledgement.
    pub fn has_unacked(&self) -> bool {
        self.buffered > 0
    }

    /// Sequence number the next admitted unit will carry.
    pub fn next_seq(&self) -> SeqNum {
        self.next_to_send
    }

    /// Oldest unacknowledged sequence number.
    pub fn ack_expected(&self) -> SeqNum {
        self.ack_expected
    }

    /// Park a just-transmitted frame and advance `next_to_send`.
    ///
    /// # Panics
    ///
    /// Panics if the window is full — check
    /// [`can_admit`](SendWindow::can_admit) first.
    pub fn record_sent(&mut self, frame: Frame, timer: TimerId) {
        assert!(
            self.can_admit(),
            "record_sent on a full window ({} / {})",
            self.buffered,
            self.slots.len()
        );
        let idx = usize::from(self.next_to_send) % self.slots.len();
        debug_assert!(self.slots[idx].is_none(), "slot {idx} still occupied");
        self.slots[idx] = Some(SendSlot {
            frame,
            timer,
            tx_count: 1,
        });
        self.buffered += 1;
        self.next_to_send = inc(self.next_to_send, self.max_seq);
    }

    /// Slide the window for a cumulative acknowledgement from `peer`.
    ///
    /// While `ack` lies circularly within `[ack_expected, next_to_send)`
    /// and the oldest in-flight frame was addressed to `peer`, that frame
    /// is retired — a single piggybacked ACK may retire a whole run.  The
    /// peer check keeps an acknowledgement value that rode in from one
    /// station from retiring frames destined to another.  Returns the
    /// timer ids of every retired slot so the caller can cancel them;
    /// duplicate or out-of-window acks retire nothing.
    pub fn on_ack(&mut self, peer: MacAddr, ack: SeqNum) -> Vec<TimerId> {
        let mut cancelled = Vec::new();
        while between(self.ack_expected, ack, self.next_to_send) {
            let idx = usize::from(self.ack_expected) % self.slots.len();
            if self.slots[idx]
                .as_ref()
                .map_or(true, |slot| slot.frame.dest != peer)
            {
                break;
            }
            let slot = self.slots[idx].take().expect("slot checked above");
            cancelled.push(slot.timer);
            self.buffered -= 1;
            self.ack_expected = inc(self.ack_expected, self.max_seq);
        }
        cancelled
    }

    /// The still-buffered frame with sequence number `seq`, if any.
    ///
    /// Returns `None` once the frame has been acknowledged (a stale
    /// timeout or NAK then refers to nothing and is ignored).
    pub fn frame_for(&self, seq: SeqNum) -> Option<&Frame> {
        let idx = usize::from(seq) % self.slots.len();
        self.slots[idx]
            .as_ref()
            .filter(|slot| slot.frame.seq == seq)
            .map(|slot| &slot.frame)
    }

    /// Record a retransmission of `seq`: bump its transmission count and
    /// store the freshly armed timer.  Returns the replaced timer id so
    /// the caller can cancel it (it may still be pending on the NAK fast
    /// path), or `None` when the frame is no longer buffered.
    pub fn rearm(&mut self, seq: SeqNum, timer: TimerId) -> Option<TimerId> {
        let idx = usize::from(seq) % self.slots.len();
        match self.slots[idx].as_mut().filter(|s| s.frame.seq == seq) {
            Some(slot) => {
                let old = slot.timer;
                slot.timer = timer;
                slot.tx_count += 1;
                Some(old)
            }
            None => None,
        }
    }

    /// Timer ids of every in-flight frame (cancelled wholesale on stop).
    pub fn armed_timers(&self) -> Vec<TimerId> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.timer)
            .collect()
    }

    #[cfg(test)]
    fn tx_count(&self, seq: SeqNum) -> Option<u32> {
        let idx = usize::from(seq) % self.slots.len();
        self.slots[idx]
            .as_ref()
            .filter(|s| s.frame.seq == seq)
            .map(|s| s.tx_count)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::MacAddr;
    use crate::wire::Payload;

    const A: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 1]);
    const B: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 2]);

    fn frame(seq: SeqNum) -> Frame {
        Frame::data(B, A, 0, seq, Payload(vec![seq as u8; 4]))
    }

    /// Fill the window with `n` frames, timer ids 100, 101, ...
    fn filled(w: &mut SendWindow, n: usize) {
        for i in 0..n {
            let seq = w.next_seq();
            w.record_sent(frame(seq), 100 + i as TimerId);
        }
    }

    #[test]
    fn initial_state() {
        let w = SendWindow::new(4);
        assert_eq!(w.window_size(), 4);
        assert_eq!(w.max_seq(), 7);
        assert_eq!(w.next_seq(), 0);
        assert_eq!(w.ack_expected(), 0);
        assert!(w.can_admit());
        assert!(!w.has_unacked());
    }

    #[test]
    fn record_sent_advances_next_seq() {
        let mut w = SendWindow::new(4);
        w.record_sent(frame(0), 1);
        assert_eq!(w.next_seq(), 1);
        assert_eq!(w.ack_expected(), 0);
        assert_eq!(w.in_flight(), 1);
    }

    #[test]
    fn full_window_blocks_admission() {
        let mut w = SendWindow::new(2);
        filled(&mut w, 2);
        assert!(!w.can_admit());
        assert_eq!(w.in_flight(), 2);
    }

    #[test]
    #[should_panic(expected = "record_sent on a full window")]
    fn record_sent_past_capacity_panics() {
        let mut w = SendWindow::new(1);
        w.record_sent(frame(0), 1);
        w.record_sent(frame(1), 2);
    }

    #[test]
    fn inclusive_ack_slides_one() {
        let mut w = SendWindow::new(4);
        filled(&mut w, 1);
        let cancelled = w.on_ack(B, 0);
        assert_eq!(cancelled, vec![100]);
        assert_eq!(w.ack_expected(), 1);
        assert!(!w.has_unacked());
    }

    #[test]
    fn cumulative_ack_slides_a_run() {
        let mut w = SendWindow::new(4);
        filled(&mut w, 3);
        // Ack of 2 retires 0, 1 and 2 in one slide.
        let cancelled = w.on_ack(B, 2);
        assert_eq!(cancelled, vec![100, 101, 102]);
        assert_eq!(w.ack_expected(), 3);
        assert_eq!(w.in_flight(), 0);
    }

    #[test]
    fn duplicate_ack_retires_nothing() {
        let mut w = SendWindow::new(4);
        filled(&mut w, 1);
        assert_eq!(w.on_ack(B, 0).len(), 1);
        assert!(w.on_ack(B, 0).is_empty(), "duplicate ack must be ignored");
        assert_eq!(w.ack_expected(), 1);
    }

    #[test]
    fn ack_outside_window_retires_nothing() {
        let mut w = SendWindow::new(4);
        filled(&mut w, 2); // in flight: 0, 1
        assert!(w.on_ack(B, 5).is_empty());
        assert_eq!(w.ack_expected(), 0);
        assert_eq!(w.in_flight(), 2);
    }

    #[test]
    fn ack_from_the_wrong_peer_retires_nothing() {
        const C: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 3]);
        let mut w = SendWindow::new(4);
        filled(&mut w, 2); // both frames addressed to B
        assert!(w.on_ack(C, 1).is_empty(), "C cannot ack frames sent to B");
        assert_eq!(w.in_flight(), 2);
        assert_eq!(w.on_ack(B, 1).len(), 2);
    }

    #[test]
    fn initial_nothing_received_ack_is_ignored() {
        // Peers encode "nothing received yet" as max_seq.
        let mut w = SendWindow::new(4);
        filled(&mut w, 2);
        assert!(w.on_ack(B, w.max_seq()).is_empty());
        assert_eq!(w.in_flight(), 2);
    }

    #[test]
    fn slide_across_wrap_point() {
        let mut w = SendWindow::new(4); // space 0..=7
        // Consume sequence numbers up to the wrap.
        for round in 0..3 {
            filled(&mut w, 2);
            let base = (round * 2 + 1) as SeqNum;
            w.on_ack(B, base);
        }
        assert_eq!(w.next_seq(), 6);
        filled(&mut w, 4); // seqs 6, 7, 0, 1
        assert_eq!(w.next_seq(), 2);
        assert!(!w.can_admit());

        // Ack 0 retires 6, 7 and 0 across the wrap.
        let cancelled = w.on_ack(B, 0);
        assert_eq!(cancelled.len(), 3);
        assert_eq!(w.ack_expected(), 1);
        assert_eq!(w.in_flight(), 1);
    }

    #[test]
    fn frame_for_finds_only_live_frames() {
        let mut w = SendWindow::new(4);
        filled(&mut w, 2);
        assert_eq!(w.frame_for(1).map(|f| f.seq), Some(1));
        w.on_ack(B, 1);
        assert!(w.frame_for(0).is_none());
        assert!(w.frame_for(1).is_none(), "acked frame must not be resendable");
    }

    #[test]
    fn rearm_bumps_tx_count_and_replaces_timer() {
        let mut w = SendWindow::new(4);
        filled(&mut w, 1);
        assert_eq!(w.tx_count(0), Some(1));
        assert_eq!(w.rearm(0, 555), Some(100), "old timer id handed back");
        assert_eq!(w.tx_count(0), Some(2));
        assert_eq!(w.armed_timers(), vec![555]);
        assert_eq!(w.rearm(3, 556), None, "rearm of an absent frame must fail");
    }

    #[test]
    fn in_flight_never_exceeds_window() {
        let mut w = SendWindow::new(3);
        for _ in 0..10 {
            if w.can_admit() {
                let seq = w.next_seq();
                w.record_sent(frame(seq), 1);
            }
            assert!(w.in_flight() <= w.window_size());
            // Retire the oldest to make progress.
            w.on_ack(B, w.ack_expected());
        }
    }
}
