//! Shared timer service driving retransmission and delayed-ACK events.
//!
//! A [`TimerService`] owns a mutex-guarded binary min-heap of pending
//! timers ordered by deadline and one background scheduler task.  Every
//! timer is **one-shot**: when its deadline passes, the scheduler pushes
//! a typed [`TimerFired`] value onto the queue registered with the timer
//! and forgets the entry — re-arming is the consumer's job.  Firing is a
//! queue push and nothing else, so no timer ever runs protocol code or
//! touches engine state.
//!
//! [`TimerHandle`] is the cheap, cloneable arming interface handed to the
//! protocol loops:
//! - [`add`](TimerHandle::add) arms a new timer and returns its id,
//! - [`restart`](TimerHandle::restart) re-arms a **live** timer with a
//!   fresh deadline and tag, returning `false` when the id is stale
//!   (already fired or removed) — the caller must `add` instead,
//! - [`remove`](TimerHandle::remove) cancels.
//!
//! Ids of fired or removed timers are invalid immediately and are never
//! reused within a service.

use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::seq::SeqNum;

/// Opaque timer identifier; [`INVALID_TIMER`] never names a live timer.
pub type TimerId = u64;

/// Id value that no timer ever receives — usable as a "no timer" mark.
pub const INVALID_TIMER: TimerId = 0;

/// Event pushed onto a timer's registered queue when it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Id of the timer that fired (now invalid).
    pub timer: TimerId,
    /// Sequence number the timer was armed with.
    pub seq: SeqNum,
}

struct Entry {
    seq: SeqNum,
    interval: Duration,
    generation: u64,
    queue: UnboundedSender<TimerFired>,
}

/// Heap node.  Restarting a timer pushes a fresh node and bumps the
/// entry's generation; superseded nodes are discarded when they surface.
struct Node {
    deadline: Instant,
    id: TimerId,
    generation: u64,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Node {}
impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Node {
    // Reversed: BinaryHeap is a max-heap, we want the earliest deadline
    // on top.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct State {
    next_id: TimerId,
    entries: HashMap<TimerId, Entry>,
    heap: BinaryHeap<Node>,
}

struct Shared {
    state: Mutex<State>,
    changed: Notify,
    running: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// TimerHandle
// ---------------------------------------------------------------------------

/// Cloneable arming interface to a [`TimerService`].
#[derive(Clone)]
pub struct TimerHandle {
    shared: Arc<Shared>,
}

impl TimerHandle {
    /// Arm a one-shot timer that fires `interval` from now, pushing a
    /// [`TimerFired`] tagged with `seq` onto `queue`.
    pub fn add(
        &self,
        interval: Duration,
        seq: SeqNum,
        queue: &UnboundedSender<TimerFired>,
    ) -> TimerId {
        let mut state = self.shared.lock();
        let id = state.next_id;
        state.next_id += 1;
        let deadline = Instant::now() + interval;
        state.entries.insert(
            id,
            Entry {
                seq,
                interval,
                generation: 0,
                queue: queue.clone(),
            },
        );
        state.heap.push(Node {
            deadline,
            id,
            generation: 0,
        });
        drop(state);
        self.shared.changed.notify_one();
        id
    }

    /// Push a live timer's deadline out by its original interval and
    /// retag it with `seq`.
    ///
    /// Returns `false` when `id` no longer names a live timer (it fired
    /// or was removed); the caller must [`add`](TimerHandle::add) a fresh
    /// one instead.
    pub fn restart(&self, id: TimerId, seq: SeqNum) -> bool {
        let mut state = self.shared.lock();
        let Some(entry) = state.entries.get_mut(&id) else {
            return false;
        };
        entry.seq = seq;
        entry.generation += 1;
        let node = Node {
            deadline: Instant::now() + entry.interval,
            id,
            generation: entry.generation,
        };
        state.heap.push(node);
        drop(state);
        self.shared.changed.notify_one();
        true
    }

    /// Cancel a timer.  A stale id is a no-op.
    pub fn remove(&self, id: TimerId) {
        let mut state = self.shared.lock();
        state.entries.remove(&id);
        drop(state);
        self.shared.changed.notify_one();
    }
}

// ---------------------------------------------------------------------------
// TimerService
// ---------------------------------------------------------------------------

/// Owns the timer heap and the scheduler task's lifecycle.
pub struct TimerService {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl TimerService {
    pub fn new() -> Self {
        TimerService {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    next_id: INVALID_TIMER + 1,
                    entries: HashMap::new(),
                    heap: BinaryHeap::new(),
                }),
                changed: Notify::new(),
                running: AtomicBool::new(false),
            }),
            task: None,
        }
    }

    /// An arming handle for the protocol loops.
    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawn the scheduler task.  Calling `start` on a running service is
    /// a no-op.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        self.task = Some(tokio::spawn(scheduler_loop(shared)));
    }

    /// Stop the scheduler and wait for it to exit.  Pending timers stay
    /// registered but cannot fire until the service is started again.
    pub async fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.changed.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

/// Pop and fire every due entry, then report the next live deadline.
fn fire_due(shared: &Shared) -> Option<Instant> {
    let mut state = shared.lock();
    let now = Instant::now();
    loop {
        let Some(top) = state.heap.peek() else {
            return None;
        };
        let (id, generation, deadline) = (top.id, top.generation, top.deadline);
        let live = state
            .entries
            .get(&id)
            .map_or(false, |e| e.generation == generation);
        if !live {
            state.heap.pop();
            continue;
        }
        if deadline > now {
            return Some(deadline);
        }
        state.heap.pop();
        let entry = state.entries.remove(&id).unwrap();
        // The consumer may already be gone during shutdown; a closed
        // queue just drops the event.
        let _ = entry.queue.send(TimerFired {
            timer: id,
            seq: entry.seq,
        });
    }
}

async fn scheduler_loop(shared: Arc<Shared>) {
    while shared.running.load(Ordering::SeqCst) {
        match fire_due(&shared) {
            Some(deadline) => {
                tokio::select! {
                    _ = shared.changed.notified() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => shared.changed.notified().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_millis(20);

    async fn recv_fired(rx: &mut mpsc::UnboundedReceiver<TimerFired>) -> Option<TimerFired> {
        timeout(Duration::from_secs(5), rx.recv()).await.ok().flatten()
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_with_its_tag() {
        let mut svc = TimerService::new();
        svc.start();
        let timers = svc.handle();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = timers.add(TICK, 7, &tx);
        let fired = recv_fired(&mut rx).await.expect("timer must fire");
        assert_eq!(fired, TimerFired { timer: id, seq: 7 });
        svc.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_deadline_fires_first() {
        let mut svc = TimerService::new();
        svc.start();
        let timers = svc.handle();
        let (tx, mut rx) = mpsc::unbounded_channel();

        timers.add(TICK * 4, 1, &tx);
        timers.add(TICK, 2, &tx);
        assert_eq!(recv_fired(&mut rx).await.unwrap().seq, 2);
        assert_eq!(recv_fired(&mut rx).await.unwrap().seq, 1);
        svc.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn removed_timer_never_fires() {
        let mut svc = TimerService::new();
        svc.start();
        let timers = svc.handle();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = timers.add(TICK, 3, &tx);
        timers.remove(id);
        tokio::time::sleep(TICK * 4).await;
        assert!(rx.try_recv().is_err(), "cancelled timer fired");
        svc.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_postpones_and_retags() {
        let mut svc = TimerService::new();
        svc.start();
        let timers = svc.handle();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = timers.add(TICK * 2, 1, &tx);
        tokio::time::sleep(TICK).await;
        assert!(timers.restart(id, 9), "live timer must restart");

        let fired = recv_fired(&mut rx).await.unwrap();
        assert_eq!(fired.seq, 9, "restart must replace the tag");
        assert_eq!(fired.timer, id);
        svc.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fired_handle_is_stale() {
        let mut svc = TimerService::new();
        svc.start();
        let timers = svc.handle();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = timers.add(TICK, 5, &tx);
        let _ = recv_fired(&mut rx).await.unwrap();
        assert!(
            !timers.restart(id, 6),
            "one-shot id must be invalid after firing"
        );
        svc.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_handle_restart_is_false() {
        let mut svc = TimerService::new();
        svc.start();
        assert!(!svc.handle().restart(12345, 0));
        svc.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_service_holds_fire() {
        let mut svc = TimerService::new();
        svc.start();
        let timers = svc.handle();
        let (tx, mut rx) = mpsc::unbounded_channel();

        svc.stop().await;
        timers.add(TICK, 1, &tx);
        tokio::time::sleep(TICK * 4).await;
        assert!(rx.try_recv().is_err());

        // Restarting the service releases the pending expiry.
        svc.start();
        assert!(recv_fired(&mut rx).await.is_some());
        svc.stop().await;
    }
}
