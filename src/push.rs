//! ==============================================================================
//! push.rs - event-stream frames and subscriber sinks
//! ==============================================================================
//!
//! purpose:
//!     a push frame is one text/event-stream event carrying a full reading:
//!
//!         data: {"temperature":23.50,"pH":7.10,"turbidity":12.00,"waterLevel":18.00}\n\n
//!
//!     frames are encoded once into `bytes::Bytes`; every subscriber gets a
//!     reference-counted clone, never a copy of the payload.
//!
//! relationships:
//!     - used by: registry.rs (slots hold a PushSink)
//!     - used by: broadcast.rs (writes frames to sinks)
//!     - used by: server.rs (SseSink feeds the /events response body)
//!
//! ==============================================================================

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::domain::Reading;

/// one encoded event-stream frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    pub fn from_reading(reading: &Reading) -> Result<Self, serde_json::Error> {
        let payload = reading.to_json()?;
        Ok(Self(Bytes::from(format!("data: {}\n\n", payload))))
    }

    pub fn bytes(&self) -> Bytes {
        self.0.clone()
    }

    /// the json carried by this frame, without the event-stream framing
    #[cfg(test)]
    pub fn payload(&self) -> &[u8] {
        let raw = &self.0[..];
        let raw = raw.strip_prefix(b"data: ").unwrap_or(raw);
        raw.strip_suffix(b"\n\n").unwrap_or(raw)
    }
}

/// why a write to a subscriber did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// the connection is gone; the slot must be reclaimed
    Closed,
    /// the connection is open but its outbound buffer is full
    Lagged,
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Closed => write!(f, "subscriber connection closed"),
            SinkError::Lagged => write!(f, "subscriber buffer full"),
        }
    }
}

impl std::error::Error for SinkError {}

/// the write half of one push subscriber.
///
/// writes never block: a subscriber that cannot take a frame right now
/// simply misses it.
pub trait PushSink {
    fn push(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// false once the remote side has gone away
    fn is_open(&self) -> bool;

    /// force the connection closed
    fn close(&mut self);
}

/// sink backed by the channel that feeds one /events response body
#[derive(Debug)]
pub struct SseSink {
    tx: Option<mpsc::Sender<Bytes>>,
}

/// create a connected sink / body-stream pair with room for `buffer` frames
pub fn sse_channel(buffer: usize) -> (SseSink, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (SseSink { tx: Some(tx) }, rx)
}

impl PushSink for SseSink {
    fn push(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        tx.try_send(frame.bytes()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Lagged,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    // dropping the sender ends the body stream, which ends the http response
    fn close(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_encoding() {
        let frame = Frame::from_reading(&Reading::new(23.5, 7.1, 12.0, 18.0)).unwrap();
        assert_eq!(
            &frame.bytes()[..],
            b"data: {\"temperature\":23.50,\"pH\":7.10,\"turbidity\":12.00,\"waterLevel\":18.00}\n\n"
        );
        assert_eq!(
            frame.payload(),
            br#"{"temperature":23.50,"pH":7.10,"turbidity":12.00,"waterLevel":18.00}"#
        );
    }

    #[tokio::test]
    async fn test_sse_sink_delivers_to_receiver() {
        let (mut sink, mut rx) = sse_channel(4);
        let frame = Frame::from_reading(&Reading::default()).unwrap();

        assert!(sink.is_open());
        sink.push(&frame).unwrap();
        assert_eq!(rx.recv().await.unwrap(), frame.bytes());
    }

    #[test]
    fn test_sse_sink_reports_lag_then_close() {
        let (mut sink, rx) = sse_channel(1);
        let frame = Frame::from_reading(&Reading::default()).unwrap();

        sink.push(&frame).unwrap();
        assert_eq!(sink.push(&frame), Err(SinkError::Lagged));
        assert!(sink.is_open());

        drop(rx);
        assert!(!sink.is_open());
        assert_eq!(sink.push(&frame), Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn test_close_ends_the_stream() {
        let (mut sink, mut rx) = sse_channel(2);
        sink.close();
        assert!(!sink.is_open());
        assert!(rx.recv().await.is_none());
    }
}
