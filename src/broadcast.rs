//! ==============================================================================
//! broadcast.rs - fan a reading out to every live subscriber
//! ==============================================================================
//!
//! purpose:
//!     serialize the snapshot once, then walk the registry and write the same
//!     frame to every live slot.
//!
//! failure handling:
//!     - write reports Closed -> close the connection, free the slot
//!     - write reports Lagged -> this subscriber misses the frame, stays live
//!     no retry and no backlog: delivery is at most once per cycle.
//!
//!     ┌──────────┐   Frame (Bytes)   ┌──────┬──────┬──────┬──────┬──────┐
//!     │ Reading  │ ────────────────► │ live │ free │ live │ dead │ free │
//!     └──────────┘   encoded once    └──┬───┴──────┴──┬───┴──┬───┴──────┘
//!                                       ▼             ▼      ▼
//!                                     push          push   close + free
//!
//! ==============================================================================

use crate::domain::Reading;
use crate::push::{Frame, PushSink, SinkError};
use crate::registry::{ClientRegistry, Slot};

/// outcome of one fan-out pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub lagged: usize,
    pub pruned: usize,
}

/// write `reading` to every live subscriber in `registry`
pub fn publish<S: PushSink>(
    reading: &Reading,
    registry: &mut ClientRegistry<S>,
) -> Result<PublishReport, serde_json::Error> {
    let frame = Frame::from_reading(reading)?;
    Ok(publish_frame(&frame, registry))
}

/// fan out an already-encoded frame
pub fn publish_frame<S: PushSink>(frame: &Frame, registry: &mut ClientRegistry<S>) -> PublishReport {
    let mut report = PublishReport::default();

    for (index, slot) in registry.slots_mut() {
        let Slot::Live(sink) = &mut *slot else { continue };

        match sink.push(frame) {
            Ok(()) => report.delivered += 1,
            Err(SinkError::Lagged) => {
                report.lagged += 1;
                tracing::debug!(slot = index, "subscriber lagging, frame dropped");
            }
            Err(SinkError::Closed) => {
                sink.close();
                *slot = Slot::Free;
                report.pruned += 1;
                tracing::debug!(slot = index, "subscriber gone, slot freed");
            }
        }
    }

    report
}
