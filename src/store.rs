//! the single current reading. no history is kept.

use crate::domain::Reading;

/// holds the latest snapshot, overwritten in place on every refresh.
///
/// the store has no lock of its own: it lives inside [`crate::context::NodeContext`],
/// whose mutex also guards the client registry, so a reader can never see a
/// half-written snapshot.
#[derive(Debug, Default)]
pub struct ReadingStore {
    current: Reading,
}

impl ReadingStore {
    /// copy of the current snapshot
    pub fn get(&self) -> Reading {
        self.current
    }

    /// replace the snapshot. range invariants are enforced here so no
    /// producer can store an out-of-range pH or negative turbidity.
    pub fn set(&mut self, reading: Reading) {
        self.current = reading.sanitized();
    }
}
