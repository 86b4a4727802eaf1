//! Per-flow timer set (spec.md §4.3): sender-inactivity, receiver-inactivity
//! and retransmission timers.
//!
//! Adapted from the teacher's `dtcp/src/lib.rs` `Timer` (a single
//! start/stop-with-interval timer driven by polling on send/recv)
//! generalised to three independently rearmable deadlines driven by one
//! background worker thread per flow, since spec.md §5 describes a
//! preemptive multi-threaded model with interrupt-context timer callbacks
//! rather than the teacher's async-std reactor.
#![deny(missing_docs)]
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Callback = Box<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    SenderInactivity,
    ReceiverInactivity,
    Retransmission,
}

struct State {
    sender_deadline: Option<Instant>,
    receiver_deadline: Option<Instant>,
    retransmission_deadline: Option<Instant>,
    shutdown: bool,
}

impl State {
    fn deadline(&self, kind: Kind) -> Option<Instant> {
        match kind {
            Kind::SenderInactivity => self.sender_deadline,
            Kind::ReceiverInactivity => self.receiver_deadline,
            Kind::Retransmission => self.retransmission_deadline,
        }
    }

    fn clear(&mut self, kind: Kind) {
        match kind {
            Kind::SenderInactivity => self.sender_deadline = None,
            Kind::ReceiverInactivity => self.receiver_deadline = None,
            Kind::Retransmission => self.retransmission_deadline = None,
        }
    }

    fn earliest_due(&self, now: Instant) -> Option<Kind> {
        [
            Kind::SenderInactivity,
            Kind::ReceiverInactivity,
            Kind::Retransmission,
        ]
        .into_iter()
        .filter(|k| self.deadline(*k).is_some_and(|d| d <= now))
        .min_by_key(|k| self.deadline(*k).unwrap())
    }

    fn next_wakeup(&self) -> Option<Instant> {
        [self.sender_deadline, self.receiver_deadline, self.retransmission_deadline]
            .into_iter()
            .flatten()
            .min()
    }
}

struct Shared {
    state: Mutex<State>,
    condvar: Condvar,
    on_sender_inactivity: Callback,
    on_receiver_inactivity: Callback,
    on_retransmission: Callback,
}

impl Shared {
    fn invoke(&self, kind: Kind) {
        match kind {
            Kind::SenderInactivity => (self.on_sender_inactivity)(),
            Kind::ReceiverInactivity => (self.on_receiver_inactivity)(),
            Kind::Retransmission => (self.on_retransmission)(),
        }
    }
}

/// The three timers of one flow, backed by a single worker thread.
///
/// Dropping a `TimerSet` cancels all three timers and blocks until any
/// in-flight callback has returned (spec.md §5: "flow destruction cancels
/// all three timers synchronously").
pub struct TimerSet {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl TimerSet {
    /// Installs the three timer callbacks (spec.md §4.8 "install the three
    /// timer callbacks"). Callbacks run on the worker thread with no
    /// flow lock held by this crate; the callback itself is responsible for
    /// acquiring and releasing the per-flow lock per spec.md §4.3.
    pub fn new(
        on_sender_inactivity: impl Fn() + Send + Sync + 'static,
        on_receiver_inactivity: impl Fn() + Send + Sync + 'static,
        on_retransmission: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                sender_deadline: None,
                receiver_deadline: None,
                retransmission_deadline: None,
                shutdown: false,
            }),
            condvar: Condvar::new(),
            on_sender_inactivity: Box::new(on_sender_inactivity),
            on_receiver_inactivity: Box::new(on_receiver_inactivity),
            on_retransmission: Box::new(on_retransmission),
        });
        let worker_shared = shared.clone();
        let worker = thread::spawn(move || Self::run(worker_shared));
        TimerSet {
            shared,
            worker: Some(worker),
        }
    }

    fn run(shared: Arc<Shared>) {
        let mut guard = shared.state.lock().unwrap();
        loop {
            if guard.shutdown {
                return;
            }
            let now = Instant::now();
            if let Some(kind) = guard.earliest_due(now) {
                guard.clear(kind);
                drop(guard);
                shared.invoke(kind);
                guard = shared.state.lock().unwrap();
                continue;
            }
            guard = match guard.next_wakeup() {
                None => shared.condvar.wait(guard).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        shared
                            .condvar
                            .wait_timeout(guard, deadline - now)
                            .unwrap()
                            .0
                    } else {
                        guard
                    }
                }
            };
        }
    }

    /// Rearms the sender-inactivity timer to `now + interval` (spec.md §4.3:
    /// on every data send, when DTCP is present).
    pub fn rearm_sender_inactivity(&self, interval: Duration) {
        self.arm(Kind::SenderInactivity, Instant::now() + interval);
    }

    /// Rearms the receiver-inactivity timer to `now + interval` (spec.md
    /// §4.3: on every data receive, when DTCP is present).
    pub fn rearm_receiver_inactivity(&self, interval: Duration) {
        self.arm(Kind::ReceiverInactivity, Instant::now() + interval);
    }

    /// Arms the retransmission timer at an explicit deadline (spec.md §4.3:
    /// "armed iff rtxq is non-empty... deadline equals the expiry of the
    /// earliest element").
    pub fn arm_retransmission(&self, deadline: Instant) {
        self.arm(Kind::Retransmission, deadline);
    }

    /// Cancels the retransmission timer (called when `rtxq` becomes empty).
    pub fn cancel_retransmission(&self) {
        let mut guard = self.shared.state.lock().unwrap();
        guard.clear(Kind::Retransmission);
    }

    /// `true` iff the retransmission timer is currently armed.
    pub fn retransmission_armed(&self) -> bool {
        self.shared
            .state
            .lock()
            .unwrap()
            .retransmission_deadline
            .is_some()
    }

    fn arm(&self, kind: Kind, deadline: Instant) {
        let mut guard = self.shared.state.lock().unwrap();
        match kind {
            Kind::SenderInactivity => guard.sender_deadline = Some(deadline),
            Kind::ReceiverInactivity => guard.receiver_deadline = Some(deadline),
            Kind::Retransmission => guard.retransmission_deadline = Some(deadline),
        }
        drop(guard);
        self.shared.condvar.notify_one();
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        {
            let mut guard = self.shared.state.lock().unwrap();
            guard.shutdown = true;
        }
        self.shared.condvar.notify_one();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
