//! ==============================================================================
//! context.rs - the node's shared state
//! ==============================================================================
//!
//! purpose:
//!     one explicit context object owns the reading store and the subscriber
//!     registry. it is shared between:
//!     - the update scheduler (writes readings, fans them out)
//!     - the web server (admits subscribers, serves snapshots)
//!
//!     both live behind the SAME mutex, so a refresh (store + fan-out) is
//!     atomic with respect to admission and snapshot reads, and nobody ever
//!     sees a torn reading.
//!
//! ==============================================================================

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::broadcast::{self, PublishReport};
use crate::config::ProducerMode;
use crate::domain::{Reading, Validity};
use crate::push::{self, Frame, PushSink, SseSink};
use crate::registry::{ClientRegistry, RegistryError};
use crate::store::ReadingStore;

pub type SharedContext = Arc<Mutex<NodeContext>>;

#[derive(Debug)]
pub struct NodeContext {
    store: ReadingStore,
    registry: ClientRegistry<SseSink>,
    mode: ProducerMode,
    client_buffer: usize,
    /// unix timestamp (ms) of the last completed refresh
    last_update_ms: Option<u64>,
}

/// node health as reported by /api/status
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeStatus {
    pub mode: ProducerMode,
    pub clients: usize,
    pub max_clients: usize,
    pub last_update_ms: Option<u64>,
    pub valid: Validity,
}

impl NodeContext {
    pub fn new(mode: ProducerMode, max_clients: usize, client_buffer: usize) -> Self {
        Self {
            store: ReadingStore::default(),
            registry: ClientRegistry::new(max_clients),
            mode,
            client_buffer,
            last_update_ms: None,
        }
    }

    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    pub fn reading(&self) -> Reading {
        self.store.get()
    }

    /// store a new reading and push it to every subscriber
    pub fn refresh(&mut self, reading: Reading) -> PublishReport {
        self.store.set(reading);
        self.last_update_ms = Some(timestamp_ms());

        // publish what the store now holds, after sanitising
        let current = self.store.get();
        match broadcast::publish(&current, &mut self.registry) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("failed to encode reading: {}", e);
                PublishReport::default()
            }
        }
    }

    /// admit a new event-stream subscriber.
    ///
    /// the subscriber's channel is primed with the current snapshot, so a
    /// fresh dashboard shows data before the next refresh.
    pub fn subscribe(&mut self) -> Result<(usize, mpsc::Receiver<Bytes>), RegistryError> {
        let (mut sink, rx) = push::sse_channel(self.client_buffer);
        match Frame::from_reading(&self.store.get()) {
            Ok(frame) => {
                if let Err(e) = sink.push(&frame) {
                    tracing::debug!("initial frame not queued: {}", e);
                }
            }
            Err(e) => tracing::error!("failed to encode initial frame: {}", e),
        }
        let slot = self.registry.admit(sink)?;
        Ok((slot, rx))
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            mode: self.mode,
            clients: self.registry.live_count(),
            max_clients: self.registry.capacity(),
            last_update_ms: self.last_update_ms,
            valid: self.store.get().validity(),
        }
    }
}

/// current time in milliseconds (unix epoch)
pub fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(max_clients: usize) -> NodeContext {
        NodeContext::new(ProducerMode::Demo, max_clients, 4)
    }

    #[tokio::test]
    async fn test_subscriber_gets_initial_snapshot_then_updates() {
        let mut ctx = context(5);
        ctx.refresh(Reading::new(20.0, 7.0, 1.0, 10.0));

        let (slot, mut rx) = ctx.subscribe().unwrap();
        assert_eq!(slot, 0);
        let initial = rx.recv().await.unwrap();
        assert!(initial.starts_with(b"data: {\"temperature\":20.00"));

        let report = ctx.refresh(Reading::new(23.5, 7.1, 12.0, 18.0));
        assert_eq!(report.delivered, 1);
        let update = rx.recv().await.unwrap();
        assert_eq!(
            &update[..],
            b"data: {\"temperature\":23.50,\"pH\":7.10,\"turbidity\":12.00,\"waterLevel\":18.00}\n\n"
        );
    }

    #[test]
    fn test_capacity_and_reclaim_through_refresh() {
        let mut ctx = context(5);
        let mut receivers: Vec<_> = (0..5).map(|_| ctx.subscribe().unwrap().1).collect();

        assert!(matches!(ctx.subscribe(), Err(RegistryError::Full { capacity: 5 })));

        // third dashboard goes away; the next fan-out notices
        drop(receivers.remove(2));
        let report = ctx.refresh(Reading::default());
        assert_eq!(report.pruned, 1);
        assert_eq!(ctx.status().clients, 4);

        let (slot, _rx) = ctx.subscribe().unwrap();
        assert_eq!(slot, 2);
        assert_eq!(ctx.status().clients, 5);
    }

    #[test]
    fn test_refresh_publishes_sanitized_reading() {
        let mut ctx = context(1);
        ctx.refresh(Reading::new(20.0, 18.0, -2.0, 10.0));
        assert_eq!(ctx.reading().ph, 14.0);
        assert_eq!(ctx.reading().turbidity, 0.0);
    }

    #[test]
    fn test_status() {
        let mut ctx = context(3);
        let status = ctx.status();
        assert_eq!(status.max_clients, 3);
        assert_eq!(status.clients, 0);
        assert!(status.last_update_ms.is_none());

        ctx.refresh(Reading::new(-127.0, 7.0, 1.0, -1.0));
        let status = ctx.status();
        assert!(status.last_update_ms.is_some());
        assert!(!status.valid.temperature);
        assert!(!status.valid.water_level);
        assert!(status.valid.ph);
    }
}
