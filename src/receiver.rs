//! Sliding-window receive-side state machine.
//!
//! [`RecvWindow`] implements the receiver half of the ARQ protocol:
//!
//! - Frames whose sequence number falls inside the acceptance window
//!   `[frame_expected, too_far)` are **buffered** even when they arrive
//!   out of order (selective repeat — the sender only ever resends the
//!   frames that actually went missing).
//! - Duplicates and frames outside the window are rejected; the caller
//!   re-acknowledges instead of buffering.
//! - Buffered units leave through [`take_ready`](RecvWindow::take_ready)
//!   strictly in sequence order with no gaps, advancing both window
//!   edges as they go.
//! - The `no_nak` latch allows exactly one NAK per gap; it re-opens when
//!   the window next advances.
//!
//! This module only manages state; frame dispatch, NAK transmission and
//! upward delivery are [`crate::link`]'s responsibility.

use crate::seq::{between, dec, inc, SeqNum};
use crate::wire::TransportUnit;

/// Receive-side acceptance window and reassembly buffer.
#[derive(Debug)]
pub struct RecvWindow {
    /// Next in-order sequence number wanted (lower window edge).
    frame_expected: SeqNum,
    /// Upper window edge: `frame_expected + W` in the circular space.
    too_far: SeqNum,
    /// Largest sequence number; the space is `0..=max_seq`.
    max_seq: SeqNum,
    /// Arrival bitmap, indexed by `seq mod W`.
    arrived: Vec<bool>,
    /// Buffered out-of-order units, indexed by `seq mod W`.
    slots: Vec<Option<TransportUnit>>,
    /// `true` while this window may still send a NAK for the current gap.
    no_nak: bool,
}

impl RecvWindow {
    /// Create a window accepting at most `max_buffered` frames at once.
    pub fn new(max_buffered: usize) -> Self {
        assert!(max_buffered >= 1, "window must hold at least one frame");
        RecvWindow {
            frame_expected: 0,
            too_far: max_buffered as SeqNum,
            max_seq: (2 * max_buffered - 1) as SeqNum,
            arrived: vec![false; max_buffered],
            slots: (0..max_buffered).map(|_| None).collect(),
            no_nak: true,
        }
    }

    /// Window size `W`.
    pub fn window_size(&self) -> usize {
        self.slots.len()
    }

    /// Next in-order sequence number wanted.
    pub fn frame_expected(&self) -> SeqNum {
        self.frame_expected
    }

    /// Newest in-order sequence number received — the value piggybacked
    /// on outbound frames.  Before anything arrived this is `max_seq`,
    /// which the peer's window ignores.
    pub fn last_in_order(&self) -> SeqNum {
        dec(self.frame_expected, self.max_seq)
    }

    /// `true` when `seq` falls inside `[frame_expected, too_far)`.
    pub fn in_window(&self, seq: SeqNum) -> bool {
        between(self.frame_expected, seq, self.too_far)
    }

    /// `true` while a NAK may be sent for the current gap.
    pub fn nak_allowed(&self) -> bool {
        self.no_nak
    }

    /// Latch after sending a NAK so the gap is NAKed only once.
    pub fn mark_nak_sent(&mut self) {
        self.no_nak = false;
    }

    /// Buffer an accepted frame's unit.
    ///
    /// Returns `false` — and buffers nothing — for a sequence number
    /// outside the window or already arrived (duplicate).
    pub fn store(&mut self, seq: SeqNum, unit: TransportUnit) -> bool {
        if !self.in_window(seq) {
            return false;
        }
        let idx = usize::from(seq) % self.slots.len();
        if self.arrived[idx] {
            return false;
        }
        self.arrived[idx] = true;
        self.slots[idx] = Some(unit);
        true
    }

    /// Drain the in-order run starting at `frame_expected`.
    ///
    /// Each drained unit advances both window edges and re-opens the NAK
    /// latch.  Units come out in strictly increasing sequence order with
    /// no gaps; an empty result means the head of the window has not
    /// arrived yet.
    pub fn take_ready(&mut self) -> Vec<(SeqNum, TransportUnit)> {
        let mut ready = Vec::new();
        loop {
            let idx = usize::from(self.frame_expected) % self.slots.len();
            if !self.arrived[idx] {
                break;
            }
            let unit = self.slots[idx]
                .take()
                .expect("arrived slot without a buffered unit");
            self.arrived[idx] = false;
            ready.push((self.frame_expected, unit));
            self.frame_expected = inc(self.frame_expected, self.max_seq);
            self.too_far = inc(self.too_far, self.max_seq);
            self.no_nak = true;
        }
        ready
    }

    /// Number of arrived-but-undelivered frames (bounded by `W`).
    pub fn arrived_count(&self) -> usize {
        self.arrived.iter().filter(|a| **a).count()
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

    fn unit(number: SeqNum) -> TransportUnit {
        TransportUnit {
            dest: B,
            src: A,
            number,
            count: 1,
            data: Payload(vec![number as u8]),
        }
    }

    #[test]
    fn initial_state() {
        let w = RecvWindow::new(4);
        assert_eq!(w.frame_expected(), 0);
        assert_eq!(w.last_in_order(), 7);
        assert!(w.in_window(0));
        assert!(w.in_window(3));
        assert!(!w.in_window(4));
        assert!(w.nak_allowed());
    }

    #[test]
    fn in_order_frame_is_immediately_ready() {
        let mut w = RecvWindow::new(4);
        assert!(w.store(0, unit(0)));
        let ready = w.take_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, 0);
        assert_eq!(w.frame_expected(), 1);
        assert_eq!(w.last_in_order(), 0);
    }

    #[test]
    fn gap_holds_delivery_until_filled() {
        let mut w = RecvWindow::new(4);
        assert!(w.store(1, unit(1)));
        assert!(w.store(2, unit(2)));
        assert!(w.take_ready().is_empty(), "nothing in order yet");

        assert!(w.store(0, unit(0)));
        let ready = w.take_ready();
        let seqs: Vec<SeqNum> = ready.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(w.frame_expected(), 3);
    }

    #[test]
    fn duplicate_is_rejected() {
        let mut w = RecvWindow::new(4);
        assert!(w.store(1, unit(1)));
        assert!(!w.store(1, unit(1)), "second arrival must be rejected");
        assert_eq!(w.arrived_count(), 1);
    }

    #[test]
    fn out_of_window_is_rejected() {
        let mut w = RecvWindow::new(4);
        assert!(!w.store(4, unit(4)), "beyond too_far");
        assert!(!w.store(7, unit(7)), "old sequence below the window");
        assert_eq!(w.arrived_count(), 0);
    }

    #[test]
    fn already_delivered_sequence_is_outside_the_window() {
        let mut w = RecvWindow::new(4);
        w.store(0, unit(0));
        w.take_ready();
        // A late duplicate of 0 is now below frame_expected.
        assert!(!w.store(0, unit(0)));
    }

    #[test]
    fn nak_latch_reopens_on_advance() {
        let mut w = RecvWindow::new(4);
        w.store(1, unit(1)); // gap at 0
        assert!(w.nak_allowed());
        w.mark_nak_sent();
        assert!(!w.nak_allowed(), "one NAK per gap");

        w.store(0, unit(0));
        let _ = w.take_ready();
        assert!(w.nak_allowed(), "latch must reopen once the gap resolves");
    }

    #[test]
    fn window_slides_across_the_wrap_point() {
        let mut w = RecvWindow::new(4); // space 0..=7
        for seq in 0..6u16 {
            assert!(w.store(seq, unit(seq)));
            assert_eq!(w.take_ready().len(), 1);
        }
        assert_eq!(w.frame_expected(), 6);

        // Window is now [6, 2): 6, 7, 0, 1 — accept 7 and 0 out of order.
        assert!(w.store(7, unit(7)));
        assert!(w.store(0, unit(0)));
        assert!(!w.in_window(2));
        assert!(w.take_ready().is_empty());

        assert!(w.store(6, unit(6)));
        let seqs: Vec<SeqNum> = w.take_ready().iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![6, 7, 0]);
        assert_eq!(w.frame_expected(), 1);
    }

    #[test]
    fn arrived_count_never_exceeds_window() {
        let mut w = RecvWindow::new(4);
        // Fill everything but the head so nothing can drain.
        for seq in 1..4u16 {
            w.store(seq, unit(seq));
        }
        assert_eq!(w.arrived_count(), 3);
        for seq in 0..8u16 {
            w.store(seq, unit(seq));
            assert!(w.arrived_count() <= w.window_size());
        }
    }

    #[test]
    fn delivery_is_gap_free_and_unique_under_shuffled_arrival() {
        let mut w = RecvWindow::new(4);
        let mut delivered = Vec::new();
        // Arrival pattern with reordering and duplicates inside each window.
        let waves: &[&[SeqNum]] = &[&[2, 0, 0, 1, 3], &[5, 4, 5, 6, 7], &[1, 0, 0, 1]];
        for wave in waves {
            for &seq in *wave {
                w.store(seq, unit(seq));
            }
            delivered.extend(w.take_ready().into_iter().map(|(s, _)| s));
        }
        assert_eq!(delivered, vec![0, 1, 2, 3, 4, 5, 6, 7, 0, 1]);
    }
}
