//! Streaming literal search over a byte stream
//!
//! Shell output arrives in arbitrary chunks and is not line buffered, so
//! sentinels are detected one byte at a time with a Knuth-Morris-Pratt
//! automaton. A partial match that breaks off falls back along the failure
//! table instead of restarting, which keeps overlapping prefixes correct.

/// Incremental matcher for one sentinel
#[derive(Debug, Clone)]
pub struct SentinelMatcher {
    pattern: Vec<u8>,
    failure: Vec<usize>,
    state: usize,
}

impl SentinelMatcher {
    /// Build a matcher for `pattern`
    pub fn new(pattern: impl AsRef<[u8]>) -> Self {
        let pattern = pattern.as_ref().to_vec();
        let failure = failure_table(&pattern);
        Self {
            pattern,
            failure,
            state: 0,
        }
    }

    /// Feed one byte; returns true when the sentinel has just been completed
    ///
    /// After a match the automaton restarts from the empty state.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.pattern.is_empty() {
            return true;
        }

        while self.state > 0 && self.pattern[self.state] != byte {
            self.state = self.failure[self.state - 1];
        }
        if self.pattern[self.state] == byte {
            self.state += 1;
        }

        if self.state == self.pattern.len() {
            self.state = 0;
            true
        } else {
            false
        }
    }

    /// Forget any partial match
    pub fn reset(&mut self) {
        self.state = 0;
    }

    /// Length of the sentinel in bytes
    pub fn len(&self) -> usize {
        self.pattern.len()
    }

    /// Whether the sentinel is empty
    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    /// Number of sentinel bytes matched so far
    pub fn partial(&self) -> usize {
        self.state
    }
}

fn failure_table(pattern: &[u8]) -> Vec<usize> {
    let mut table = vec![0; pattern.len()];
    let mut k = 0;
    for i in 1..pattern.len() {
        while k > 0 && pattern[i] != pattern[k] {
            k = table[k - 1];
        }
        if pattern[i] == pattern[k] {
            k += 1;
        }
        table[i] = k;
    }
    table
}
