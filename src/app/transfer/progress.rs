//! Shared progress of one transfer run
//!
//! Workers update lock-free counters; completion is a one-shot flag behind
//! a mutex and condition variable so callers can block with or without a
//! bound. A run is complete once every file has been copied, has failed,
//! or was skipped because of cancellation.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::types::TransferFailure;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub files_total: usize,
    pub files_done: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub bytes_total: u64,
    pub bytes_done: u64,
}

impl ProgressSnapshot {
    /// Files that reached a final state
    pub fn files_finished(&self) -> usize {
        self.files_done + self.files_failed + self.files_skipped
    }

    /// Completion percentage by bytes, falling back to files
    pub fn percentage(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_done as f64 / self.bytes_total as f64 * 100.0).min(100.0)
        } else if self.files_total > 0 {
            self.files_finished() as f64 / self.files_total as f64 * 100.0
        } else {
            100.0
        }
    }
}

/// Progress handle shared between the engine and its caller
#[derive(Debug)]
pub struct Progress {
    files_total: usize,
    bytes_total: u64,
    files_done: AtomicUsize,
    files_failed: AtomicUsize,
    files_skipped: AtomicUsize,
    bytes_done: AtomicU64,
    cancelled: AtomicBool,
    failures: Mutex<Vec<TransferFailure>>,
    completed: Mutex<bool>,
    completion: Condvar,
    started: Instant,
}

impl Progress {
    /// Progress for a run of `files_total` files and `bytes_total` bytes
    pub fn new(files_total: usize, bytes_total: u64) -> Self {
        Self {
            files_total,
            bytes_total,
            files_done: AtomicUsize::new(0),
            files_failed: AtomicUsize::new(0),
            files_skipped: AtomicUsize::new(0),
            bytes_done: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            failures: Mutex::new(Vec::new()),
            completed: Mutex::new(files_total == 0),
            completion: Condvar::new(),
            started: Instant::now(),
        }
    }

    pub fn files_total(&self) -> usize {
        self.files_total
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total
    }

    pub fn files_done(&self) -> usize {
        self.files_done.load(Ordering::Acquire)
    }

    pub fn files_failed(&self) -> usize {
        self.files_failed.load(Ordering::Acquire)
    }

    pub fn files_skipped(&self) -> usize {
        self.files_skipped.load(Ordering::Acquire)
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Acquire)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files_total: self.files_total,
            files_done: self.files_done(),
            files_failed: self.files_failed(),
            files_skipped: self.files_skipped(),
            bytes_total: self.bytes_total,
            bytes_done: self.bytes_done(),
        }
    }

    /// Stop dispatching files that have not started yet
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Failures recorded so far, in the order they happened
    pub fn failures(&self) -> Vec<TransferFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_completed(&self) -> bool {
        *self.completed_guard()
    }

    /// Block until the run completes
    pub fn wait(&self) {
        let mut completed = self.completed_guard();
        while !*completed {
            completed = self
                .completion
                .wait(completed)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block for at most `timeout`; returns whether the run completed
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = self.completed_guard();
        while !*completed {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            completed = self
                .completion
                .wait_timeout(completed, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *completed
    }

    /// Record a finished file together with its byte count
    pub(crate) fn file_done(&self, bytes: u64) {
        self.bytes_done.fetch_add(bytes, Ordering::AcqRel);
        self.files_done.fetch_add(1, Ordering::AcqRel);
        self.check_completion();
    }

    pub(crate) fn file_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::AcqRel);
        self.check_completion();
    }

    pub(crate) fn file_failed(&self, failure: TransferFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
        self.files_failed.fetch_add(1, Ordering::AcqRel);
        self.check_completion();
    }

    fn check_completion(&self) {
        if self.snapshot().files_finished() < self.files_total {
            return;
        }
        let mut completed = self.completed_guard();
        if !*completed {
            *completed = true;
            self.completion.notify_all();
        }
    }

    fn completed_guard(&self) -> MutexGuard<'_, bool> {
        self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
