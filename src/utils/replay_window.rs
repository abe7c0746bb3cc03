//! Sliding-window replay protection for secure-channel sequence numbers.
//!
//! Tracks the highest accepted sequence and a 64-bit mask where bit `i` means
//! `highest - i` was already accepted. Sequences 64 or more behind the highest
//! are rejected outright. The width and shift semantics must match the peer.

use tracing::warn;

/// Number of sequences tracked behind the highest one.
pub const REPLAY_WINDOW_SIZE: u64 = 64;

/// 64-entry anti-replay window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayWindow {
    highest: u64,
    mask: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest sequence accepted so far.
    pub fn highest(&self) -> u64 {
        self.highest
    }

    /// Raw acceptance bitmask.
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// Returns true if `seq` has not been seen and is inside the window.
    pub fn is_valid(&self, seq: u64) -> bool {
        if seq > self.highest {
            return true;
        }

        let delta = self.highest - seq;
        if delta >= REPLAY_WINDOW_SIZE {
            return false;
        }

        self.mask & (1u64 << delta) == 0
    }

    /// Marks `seq` as accepted, sliding the window forward when it is newer.
    pub fn update(&mut self, seq: u64) {
        if seq > self.highest {
            let shift = seq - self.highest;
            self.mask = if shift >= REPLAY_WINDOW_SIZE {
                0
            } else {
                self.mask << shift
            };
            self.mask |= 1;
            self.highest = seq;
        } else {
            let delta = self.highest - seq;
            if delta < REPLAY_WINDOW_SIZE {
                self.mask |= 1u64 << delta;
            }
        }
    }

    /// Checks and records in one step. Returns false on replay.
    pub fn check_and_update(&mut self, seq: u64) -> bool {
        if !self.is_valid(seq) {
            warn!(
                security = true,
                seq,
                highest = self.highest,
                "replayed or expired sequence rejected"
            );
            return false;
        }
        self.update(seq);
        true
    }

    pub fn reset(&mut self) {
        self.highest = 0;
        self.mask = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_at(highest: u64) -> ReplayWindow {
        let mut w = ReplayWindow::new();
        w.update(highest);
        w
    }

    #[test]
    fn test_sequence_accepted_once() {
        let mut w = window_at(99);
        assert!(w.is_valid(100));
        w.update(100);
        assert!(!w.is_valid(100));
    }

    #[test]
    fn test_horizon_rejects_old_sequences() {
        let w = window_at(100);
        assert!(!w.is_valid(36));
        assert!(w.is_valid(37));
        assert!(!w.is_valid(0));
    }

    #[test]
    fn test_large_jump_resets_window() {
        let mut w = window_at(100);
        for seq in 90..100 {
            w.update(seq);
        }
        w.update(200);
        assert_eq!(w.highest(), 200);
        assert_eq!(w.mask(), 1);
        assert!(!w.is_valid(200));
        assert!(w.is_valid(199));
        assert!(w.is_valid(150));
    }

    #[test]
    fn test_out_of_order_inside_window() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(10));
        assert!(w.check_and_update(8));
        assert!(w.check_and_update(9));
        assert!(!w.check_and_update(8));
        assert!(w.check_and_update(11));
        assert_eq!(w.mask() & 0b1111, 0b1111);
    }

    #[test]
    fn test_shift_preserves_seen_bits() {
        let mut w = window_at(5);
        w.update(3);
        w.update(10);
        assert!(!w.is_valid(5));
        assert!(!w.is_valid(3));
        assert!(w.is_valid(4));
    }

    #[test]
    fn test_zero_accepted_once_from_fresh_state() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(0));
        assert!(!w.check_and_update(0));
    }
}
