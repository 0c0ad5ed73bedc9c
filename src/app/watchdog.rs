//! Per-operation deadlines backed by a dedicated timer thread
//!
//! Shell reads have no native timeout, so every bounded operation arms a
//! [`Deadline`] before it starts reading. Between channel polls the reader
//! parks on the deadline with [`Deadline::wait`]; when the timer thread
//! fires the deadline it sets the flag and wakes the parked reader, which
//! then aborts. Disarming removes the pending entry and clears the flag, so
//! nothing leaks into later work on the same thread or session.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

type TimerKey = (Instant, u64);

#[derive(Debug, Default)]
struct TimerState {
    pending: BTreeMap<TimerKey, Arc<Signal>>,
    next_id: u64,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

impl TimerShared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fired flag plus the condvar a parked reader waits on
#[derive(Debug, Default)]
struct Signal {
    fired: Mutex<bool>,
    wakeup: Condvar,
}

impl Signal {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self) {
        *self.lock() = true;
        self.wakeup.notify_all();
    }
}

/// Stops the timer thread once the last [`Watchdog`] handle is dropped
#[derive(Debug)]
struct TimerOwner {
    shared: Arc<TimerShared>,
}

impl Drop for TimerOwner {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wakeup.notify_all();
    }
}

/// Handle to the timer thread; cheap to clone and share between sessions
#[derive(Debug, Clone)]
pub struct Watchdog {
    shared: Arc<TimerShared>,
    _owner: Arc<TimerOwner>,
}

impl Watchdog {
    /// Start a new timer thread
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared::default());
        let timer = Arc::clone(&shared);

        thread::Builder::new()
            .name("dump-fetcher-watchdog".to_string())
            .spawn(move || run_timer(timer))
            .map(|_| debug!("Watchdog timer thread started"))
            .unwrap_or_else(|e| {
                // Deadlines still expire against the clock without the thread
                warn!("Failed to start watchdog thread: {}", e);
            });

        owner_guard(shared)
    }

    /// Schedule a one-shot expiry `duration` from now
    pub fn arm(&self, duration: Duration) -> Deadline {
        let signal = Arc::new(Signal::default());
        let at = Instant::now() + duration;

        let key = {
            let mut state = self.shared.lock();
            let key = (at, state.next_id);
            state.next_id += 1;
            state.pending.insert(key, Arc::clone(&signal));
            key
        };
        self.shared.wakeup.notify_all();

        trace!("Armed deadline {} for {:?}", key.1, duration);
        Deadline {
            shared: Arc::clone(&self.shared),
            key,
            duration,
            signal,
            armed: true,
        }
    }

    /// Number of deadlines that are armed and have not fired yet
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

fn owner_guard(shared: Arc<TimerShared>) -> Watchdog {
    Watchdog {
        _owner: Arc::new(TimerOwner {
            shared: Arc::clone(&shared),
        }),
        shared,
    }
}

fn run_timer(shared: Arc<TimerShared>) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            break;
        }

        let now = Instant::now();
        while let Some(key) = state.pending.keys().next().copied() {
            if key.0 > now {
                break;
            }
            if let Some(signal) = state.pending.remove(&key) {
                trace!("Deadline {} fired", key.1);
                signal.fire();
            }
        }

        let next = state.pending.keys().next().map(|key| key.0);
        state = match next {
            Some(at) => {
                let wait = at.saturating_duration_since(now);
                shared
                    .wakeup
                    .wait_timeout(state, wait)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => shared
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
    debug!("Watchdog timer thread stopped");
}

/// One armed expiry; disarmed explicitly or on drop
#[derive(Debug)]
pub struct Deadline {
    shared: Arc<TimerShared>,
    key: TimerKey,
    duration: Duration,
    signal: Arc<Signal>,
    armed: bool,
}

impl Deadline {
    /// Whether the deadline has passed
    ///
    /// Falls back to the clock when the timer thread could not be started.
    pub fn is_expired(&self) -> bool {
        *self.signal.lock() || Instant::now() >= self.key.0
    }

    /// Park for at most `max`, returning early when the timer fires
    ///
    /// Returns whether the deadline has expired.
    pub fn wait(&self, max: Duration) -> bool {
        let fired = self.signal.lock();
        let (fired, _) = self
            .signal
            .wakeup
            .wait_timeout_while(fired, max, |fired| !*fired)
            .unwrap_or_else(PoisonError::into_inner);
        let fired = *fired;
        fired || Instant::now() >= self.key.0
    }

    /// The duration this deadline was armed with
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Time left before expiry
    pub fn remaining(&self) -> Duration {
        self.key.0.saturating_duration_since(Instant::now())
    }

    /// Cancel the pending expiry and clear the flag if it already fired
    pub fn disarm(mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        self.shared.lock().pending.remove(&self.key);
        *self.signal.lock() = false;
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.clear();
    }
}
