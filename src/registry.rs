//! ==============================================================================
//! registry.rs - fixed-capacity table of push subscribers
//! ==============================================================================
//!
//! purpose:
//!     tracks at most `capacity` live event-stream subscribers.
//!
//! rules:
//!     - admission takes the first slot that is free or whose connection has
//!       gone away. a full table refuses the newcomer; there is no queue.
//!     - slots are never evicted explicitly. a slot returns to the free pool
//!       only when admit() finds it dead or the broadcaster fails to write.
//!     - the registry never opens connections. it only tracks liveness and
//!       force-closes connections it drops.
//!
//! relationships:
//!     - used by: context.rs (owned by NodeContext)
//!     - used by: broadcast.rs (fan-out walks the slots)
//!     - used by: server.rs (/events admission)
//!
//! ==============================================================================

use crate::push::PushSink;

/// reference capacity: five concurrent dashboards
pub const MAX_CLIENTS: usize = 5;

/// one entry of the slot arena
#[derive(Debug)]
pub enum Slot<S> {
    Free,
    Live(S),
}

impl<S> Slot<S> {
    pub fn is_live(&self) -> bool {
        matches!(self, Slot::Live(_))
    }
}

/// error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// every slot holds a live subscriber
    Full { capacity: usize },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Full { capacity } => {
                write!(f, "subscriber table full ({} clients)", capacity)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Debug)]
pub struct ClientRegistry<S> {
    slots: Vec<Slot<S>>,
}

impl<S: PushSink> ClientRegistry<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::Free).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// number of slots currently marked live (some may be dead but not yet reaped)
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_live()).count()
    }

    /// install a new subscriber, returning its slot index.
    ///
    /// a live slot whose connection has already closed is reused; the stale
    /// connection is closed before it is replaced.
    pub fn admit(&mut self, sink: S) -> Result<usize, RegistryError> {
        let index = self
            .slots
            .iter()
            .position(|slot| match slot {
                Slot::Free => true,
                Slot::Live(existing) => !existing.is_open(),
            })
            .ok_or(RegistryError::Full { capacity: self.capacity() })?;

        if let Slot::Live(stale) = &mut self.slots[index] {
            stale.close();
            tracing::debug!(slot = index, "reclaiming slot held by closed connection");
        }
        self.slots[index] = Slot::Live(sink);

        tracing::info!(slot = index, clients = self.live_count(), "subscriber admitted");
        Ok(index)
    }

    #[cfg(test)]
    pub fn get(&self, index: usize) -> Option<&S> {
        match self.slots.get(index) {
            Some(Slot::Live(sink)) => Some(sink),
            _ => None,
        }
    }

    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = (usize, &mut Slot<S>)> {
        self.slots.iter_mut().enumerate()
    }
}

// ==============================================================================
// test support
// ==============================================================================

/// scripted sink for registry and broadcaster tests
#[cfg(test)]
pub(crate) mod mock {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::push::{Frame, PushSink, SinkError};

    #[derive(Debug, Default)]
    pub struct Shared {
        pub open: bool,
        pub lagging: bool,
        pub closed_by_server: bool,
        pub received: Vec<Frame>,
    }

    /// a mock connection. the test keeps a handle to flip it dead or lagging.
    #[derive(Debug, Clone)]
    pub struct MockSink {
        pub id: u32,
        pub state: Rc<RefCell<Shared>>,
    }

    impl MockSink {
        pub fn new(id: u32) -> Self {
            Self {
                id,
                state: Rc::new(RefCell::new(Shared { open: true, ..Default::default() })),
            }
        }

        pub fn disconnect(&self) {
            self.state.borrow_mut().open = false;
        }

        pub fn set_lagging(&self, lagging: bool) {
            self.state.borrow_mut().lagging = lagging;
        }

        pub fn received(&self) -> usize {
            self.state.borrow().received.len()
        }

        pub fn was_closed(&self) -> bool {
            self.state.borrow().closed_by_server
        }
    }

    impl PushSink for MockSink {
        fn push(&mut self, frame: &Frame) -> Result<(), SinkError> {
            let mut s = self.state.borrow_mut();
            if !s.open {
                return Err(SinkError::Closed);
            }
            if s.lagging {
                return Err(SinkError::Lagged);
            }
            s.received.push(frame.clone());
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.state.borrow().open
        }

        fn close(&mut self) {
            let mut s = self.state.borrow_mut();
            s.open = false;
            s.closed_by_server = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockSink;
    use super::*;

    #[test]
    fn test_admit_fills_slots_in_order() {
        let mut registry = ClientRegistry::new(MAX_CLIENTS);
        for i in 0..MAX_CLIENTS {
            assert_eq!(registry.admit(MockSink::new(i as u32)), Ok(i));
        }
        assert_eq!(registry.live_count(), MAX_CLIENTS);
    }

    #[test]
    fn test_admit_beyond_capacity_fails_without_overwrite() {
        let mut registry = ClientRegistry::new(MAX_CLIENTS);
        for i in 0..MAX_CLIENTS {
            registry.admit(MockSink::new(i as u32)).unwrap();
        }

        let refused = registry.admit(MockSink::new(99));
        assert_eq!(refused, Err(RegistryError::Full { capacity: MAX_CLIENTS }));

        for i in 0..MAX_CLIENTS {
            assert_eq!(registry.get(i).map(|s| s.id), Some(i as u32));
        }
    }

    #[test]
    fn test_admit_reuses_slot_of_closed_connection() {
        let mut registry = ClientRegistry::new(2);
        let first = MockSink::new(1);
        registry.admit(first.clone()).unwrap();
        registry.admit(MockSink::new(2)).unwrap();

        first.disconnect();
        assert_eq!(registry.admit(MockSink::new(3)), Ok(0));
        assert_eq!(registry.get(0).map(|s| s.id), Some(3));
        assert!(first.was_closed());
    }

    #[test]
    fn test_zero_capacity_refuses_everyone() {
        let mut registry: ClientRegistry<MockSink> = ClientRegistry::new(0);
        assert!(registry.admit(MockSink::new(1)).is_err());
    }
}
