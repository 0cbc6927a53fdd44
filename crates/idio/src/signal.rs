//! Signal recording (spec §5): signals are recorded by a handler running
//! outside the VM's control flow and drained between opcode dispatches,
//! rather than handled re-entrantly mid-instruction.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Number of distinct signals the VM tracks. Matches the small, fixed set
/// a shell needs to notice (`SIGINT`, `SIGCHLD`, `SIGWINCH`, `SIGTERM`);
/// unlisted signals are not recorded.
pub const SIGNAL_COUNT: usize = 4;

pub const SIGINT: usize = 0;
pub const SIGCHLD: usize = 1;
pub const SIGWINCH: usize = 2;
pub const SIGTERM: usize = 3;

/// A lock-free record of pending signals: a handler (real or simulated)
/// sets a flag and bumps a counter; the VM's dispatch loop drains it
/// between opcodes (spec §5) rather than acting on it mid-instruction.
#[derive(Debug)]
pub struct SignalRecord {
    pending: [AtomicBool; SIGNAL_COUNT],
    counts: [AtomicU32; SIGNAL_COUNT],
}

impl Default for SignalRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalRecord {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: std::array::from_fn(|_| AtomicBool::new(false)),
            counts: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Records one occurrence of `signal`. Safe to call from a signal
    /// handler context: only atomic stores, no allocation.
    pub fn record(&self, signal: usize) {
        self.pending[signal].store(true, Ordering::SeqCst);
        self.counts[signal].fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn any_pending(&self) -> bool {
        self.pending.iter().any(|p| p.load(Ordering::SeqCst))
    }

    /// Drains and returns the indices of every signal recorded since the
    /// last drain, resetting their pending flags (spec §5 "drained between
    /// opcode dispatches").
    pub fn drain(&self) -> Vec<usize> {
        let mut drained = Vec::new();
        for (i, flag) in self.pending.iter().enumerate() {
            if flag.swap(false, Ordering::SeqCst) {
                drained.push(i);
            }
        }
        drained
    }

    #[must_use]
    pub fn count(&self, signal: usize) -> u32 {
        self.counts[signal].load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_resets_pending_but_keeps_count() {
        let record = SignalRecord::new();
        record.record(SIGINT);
        record.record(SIGINT);
        assert!(record.any_pending());
        let drained = record.drain();
        assert_eq!(drained, vec![SIGINT]);
        assert!(!record.any_pending());
        assert_eq!(record.count(SIGINT), 2);
    }
}
