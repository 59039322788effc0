//! Channel-backed transport used by the WebSocket endpoint.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{Payload, ReadyState, Transport, TransportError};

/// Frame handed to the socket writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Payload(Payload),
    Ping,
    Close,
}

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Transport that forwards frames over a bounded mpsc channel.
///
/// The receiving side is owned by the task that writes to the real socket.
/// Closing drops the sender, so the writer always sees end of stream after
/// the frames already buffered, even when the buffer is full. Once the
/// writer drops the receiver the transport reports `Closed`.
pub struct ChannelTransport {
    sender: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
    state: AtomicU8,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender: Mutex::new(Some(sender)),
                state: AtomicU8::new(STATE_OPEN),
            },
            receiver,
        )
    }

    /// Mark the transport closed after the socket has gone away
    pub fn mark_closed(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.sender.lock().take();
    }

    fn push(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(TransportError::Closed);
        };

        sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Backpressure,
            TrySendError::Closed(_) => {
                self.state.store(STATE_CLOSED, Ordering::Release);
                TransportError::Closed
            }
        })
    }
}

impl Transport for ChannelTransport {
    fn ready_state(&self) -> ReadyState {
        let receiver_gone = self
            .sender
            .lock()
            .as_ref()
            .is_some_and(|sender| sender.is_closed());
        if receiver_gone {
            return ReadyState::Closed;
        }

        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => ReadyState::Open,
            STATE_CLOSING => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    fn send(&self, payload: &Payload) -> Result<(), TransportError> {
        self.push(OutboundFrame::Payload(payload.clone()))
    }

    fn ping(&self) -> Result<(), TransportError> {
        self.push(OutboundFrame::Ping)
    }

    fn close(&self) {
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Some(sender) = self.sender.lock().take() {
                // Best effort; dropping the sender ends the writer's stream
                let _ = sender.try_send(OutboundFrame::Close);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    #[test]
    fn test_send_reaches_receiver() {
        let (transport, mut rx) = ChannelTransport::new(4);
        assert!(transport.is_open());

        transport.send(&Payload::text("hello")).unwrap();
        transport.ping().unwrap();

        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Payload(Payload::text("hello")));
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Ping);
    }

    #[test]
    fn test_full_buffer_reports_backpressure() {
        let (transport, _rx) = ChannelTransport::new(1);

        transport.send(&Payload::text("one")).unwrap();
        assert_eq!(
            transport.send(&Payload::text("two")),
            Err(TransportError::Backpressure)
        );
    }

    #[test]
    fn test_dropped_receiver_is_closed() {
        let (transport, rx) = ChannelTransport::new(4);
        drop(rx);

        assert_eq!(transport.ready_state(), ReadyState::Closed);
        assert_eq!(transport.send(&Payload::text("x")), Err(TransportError::Closed));
    }

    #[test]
    fn test_close_moves_to_closing() {
        let (transport, mut rx) = ChannelTransport::new(4);

        transport.close();
        assert_eq!(transport.ready_state(), ReadyState::Closing);
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Close);

        // Second close is a no-op
        transport.close();
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));

        transport.mark_closed();
        assert_eq!(transport.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn test_close_with_full_buffer_ends_stream() {
        let (transport, mut rx) = ChannelTransport::new(1);
        transport.send(&Payload::text("queued")).unwrap();
        assert_eq!(transport.ping(), Err(TransportError::Backpressure));

        transport.close();

        // Buffered frames drain, then the writer sees end of stream
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Payload(Payload::text("queued")));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(transport.send(&Payload::text("late")), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_writer_stops_after_close() {
        let (transport, mut rx) = ChannelTransport::new(2);
        transport.send(&Payload::text("a")).unwrap();
        transport.send(&Payload::text("b")).unwrap();
        transport.close();

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert_eq!(
            frames,
            vec![
                OutboundFrame::Payload(Payload::text("a")),
                OutboundFrame::Payload(Payload::text("b")),
            ]
        );
    }
}
