//! The routing-plane status word.
//!
//! Written only by the [`crate::topology`] analyzer and the orchestrator's
//! role-bit updates; read lock-free by external routing readers. Modeled as
//! a `bitflags`-typed `u64` stored in an `AtomicU64` with release/acquire
//! ordering, the way `spineldb`'s `CommandFlags` types its bit sets and
//! `pgdog`'s `backend::pool::health::TargetHealth` exposes a lock-free
//! health snapshot on the hot read path.

use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusBits: u64 {
        const MASTER                = 1 << 0;
        const SLAVE                 = 1 << 1;
        const SLAVE_OF_EXT_MASTER   = 1 << 2;
        const RELAY_MASTER          = 1 << 3;
        const AUTH_ERROR            = 1 << 4;
        const DISK_SPACE_EXHAUSTED  = 1 << 5;
        const MAINTENANCE           = 1 << 6;
        const RUNNING               = 1 << 7;
    }
}

/// A single word, updated with release semantics and read with acquire,
/// avoiding a lock on the hot read path.
#[derive(Debug, Default)]
pub struct StatusWord(AtomicU64);

impl StatusWord {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn load(&self) -> StatusBits {
        StatusBits::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, bits: StatusBits) {
        self.0.store(bits.bits(), Ordering::Release);
    }

    /// Replace the role bits (MASTER/SLAVE/SLAVE_OF_EXT_MASTER/RELAY_MASTER/
    /// AUTH_ERROR/DISK_SPACE_EXHAUSTED) while preserving MAINTENANCE across
    /// ticks.
    pub fn set_role_bits(&self, mut new_bits: StatusBits) {
        if self.load().contains(StatusBits::MAINTENANCE) {
            new_bits |= StatusBits::MAINTENANCE;
        }
        self.store(new_bits);
    }

    pub fn set_maintenance(&self, on: bool) {
        let mut bits = self.load();
        bits.set(StatusBits::MAINTENANCE, on);
        self.store(bits);
    }

    /// Remove `bits` from the current word, e.g. clearing `MASTER` at the
    /// start of a demote.
    pub fn clear(&self, bits: StatusBits) {
        let mut cur = self.load();
        cur.remove(bits);
        self.store(cur);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintenance_survives_role_bit_replacement() {
        let word = StatusWord::new();
        word.set_maintenance(true);
        word.set_role_bits(StatusBits::MASTER);

        let bits = word.load();
        assert!(bits.contains(StatusBits::MASTER));
        assert!(bits.contains(StatusBits::MAINTENANCE));
    }
}
