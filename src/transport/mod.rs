//! Transport abstraction for pooled connections.
//!
//! The pool never talks to a socket directly. It talks to a [`Transport`]
//! (the write half) and consumes a stream of [`TransportEvent`]s (the read
//! half). The WebSocket endpoint provides both through [`ChannelTransport`].

mod channel;

pub use channel::{ChannelTransport, OutboundFrame};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque message body passed to the transport unmodified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Readiness of the underlying transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

/// Errors raised by a transport write
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,

    #[error("Transport send buffer is full")]
    Backpressure,

    #[error("Transport error: {0}")]
    Other(String),
}

/// Lifecycle and data events coming from the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(Payload),
    Pong,
    Error(String),
    Close,
}

/// Write half of a duplex, message-oriented connection.
///
/// All methods are non-blocking: implementations enqueue work for an I/O
/// task and report failure immediately.
pub trait Transport: Send + Sync + 'static {
    fn ready_state(&self) -> ReadyState;

    fn send(&self, payload: &Payload) -> Result<(), TransportError>;

    fn ping(&self) -> Result<(), TransportError>;

    /// Begin closing. The matching [`TransportEvent::Close`] arrives later on
    /// the event stream.
    fn close(&self);

    fn is_open(&self) -> bool {
        self.ready_state().is_open()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport used by pool and manager tests.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::{Payload, ReadyState, Transport, TransportError, TransportEvent};

    pub struct MockTransport {
        state: Mutex<ReadyState>,
        pub sent: Mutex<Vec<Payload>>,
        pub pings: AtomicUsize,
        pub closes: AtomicUsize,
        fail_sends: AtomicBool,
        fail_pings: AtomicBool,
        /// When set, `close()` acknowledges with a Close event
        events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
        ack_close: AtomicBool,
    }

    impl MockTransport {
        /// Open transport whose `close()` is acknowledged with a Close event
        pub fn open() -> (Arc<Self>, mpsc::Sender<TransportEvent>, mpsc::Receiver<TransportEvent>) {
            let (tx, rx) = mpsc::channel(64);
            let transport = Arc::new(Self {
                state: Mutex::new(ReadyState::Open),
                sent: Mutex::new(Vec::new()),
                pings: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                fail_sends: AtomicBool::new(false),
                fail_pings: AtomicBool::new(false),
                events: Mutex::new(Some(tx.clone())),
                ack_close: AtomicBool::new(true),
            });
            (transport, tx, rx)
        }

        pub fn set_state(&self, state: ReadyState) {
            *self.state.lock() = state;
        }

        pub fn fail_sends(&self, fail: bool) {
            self.fail_sends.store(fail, Ordering::SeqCst);
        }

        pub fn fail_pings(&self, fail: bool) {
            self.fail_pings.store(fail, Ordering::SeqCst);
        }

        /// Never acknowledge `close()`, simulating a peer that hangs
        pub fn ignore_close(&self) {
            self.ack_close.store(false, Ordering::SeqCst);
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    impl Transport for MockTransport {
        fn ready_state(&self) -> ReadyState {
            *self.state.lock()
        }

        fn send(&self, payload: &Payload) -> Result<(), TransportError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(TransportError::Other("send failed".to_string()));
            }
            self.sent.lock().push(payload.clone());
            Ok(())
        }

        fn ping(&self) -> Result<(), TransportError> {
            if self.fail_pings.load(Ordering::SeqCst) {
                return Err(TransportError::Other("ping failed".to_string()));
            }
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            *self.state.lock() = ReadyState::Closed;
            if self.ack_close.load(Ordering::SeqCst) {
                if let Some(tx) = self.events.lock().take() {
                    let _ = tx.try_send(TransportEvent::Close);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_len() {
        assert_eq!(Payload::text("hello").len(), 5);
        assert_eq!(Payload::from(vec![1u8, 2, 3]).len(), 3);
        assert!(Payload::text("").is_empty());
        assert!(Payload::from("x").is_text());
    }

    #[test]
    fn test_ready_state_is_open() {
        assert!(ReadyState::Open.is_open());
        assert!(!ReadyState::Closing.is_open());
        assert!(!ReadyState::Closed.is_open());
        assert!(!ReadyState::Connecting.is_open());
    }
}
