//! Outbound side of the message channel.
//!
//! The dispatcher only needs "put this message on the wire". Implementations
//! must not call back into the dispatcher synchronously: responses always
//! arrive later through `Dispatcher::on_message_received`.

use std::cell::{Cell, RefCell};

use idbx::{Error, Result};
use idbx_proto::{codec, HostMessage};
use tokio::sync::mpsc;

pub trait MessageSender {
    fn send(&self, message: HostMessage) -> Result<()>;
}

/// Hands typed messages to an in-process backend task.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<HostMessage>,
}

impl ChannelSender {
    pub fn new(tx: mpsc::UnboundedSender<HostMessage>) -> Self {
        Self { tx }
    }

    /// Sender plus the receiving end for the backend.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<HostMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageSender for ChannelSender {
    fn send(&self, message: HostMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::Transport("backend channel closed".into()))
    }
}

/// Encodes every message into a byte frame, for transports that cross a
/// process boundary.
#[derive(Debug, Clone)]
pub struct EncodedSender {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl EncodedSender {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

impl MessageSender for EncodedSender {
    fn send(&self, message: HostMessage) -> Result<()> {
        let frame = codec::encode_host(&message)?;
        self.tx
            .send(frame)
            .map_err(|_| Error::Transport("frame channel closed".into()))
    }
}

/// Keeps every message in memory. Used by tests and diagnostics to inspect
/// exactly what the dispatcher put on the wire.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: RefCell<Vec<HostMessage>>,
    closed: Cell<bool>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later send fail, as if the backend went away.
    pub fn close(&self) {
        self.closed.set(true);
    }

    pub fn len(&self) -> usize {
        self.sent.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.borrow().is_empty()
    }

    pub fn messages(&self) -> Vec<HostMessage> {
        self.sent.borrow().clone()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<HostMessage> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }

    pub fn last(&self) -> Option<HostMessage> {
        self.sent.borrow().last().cloned()
    }
}

impl MessageSender for RecordingSender {
    fn send(&self, message: HostMessage) -> Result<()> {
        if self.closed.get() {
            return Err(Error::Transport("recording sender closed".into()));
        }
        self.sent.borrow_mut().push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idbx_proto::CursorId;

    #[test]
    fn test_channel_sender_reports_closed_backend() {
        let (sender, rx) = ChannelSender::pair();
        drop(rx);
        let result = sender.send(HostMessage::CursorDestroyed {
            cursor: CursorId::from_raw(1),
        });
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[test]
    fn test_encoded_sender_frames_decode() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = EncodedSender::new(tx);
        let message = HostMessage::AckReceivedBlobs {
            uuids: vec!["a".into()],
        };
        sender.send(message.clone()).unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(codec::decode_host(&frame).unwrap(), message);
    }

    #[test]
    fn test_recording_sender_take_clears() {
        let sender = RecordingSender::new();
        sender
            .send(HostMessage::CursorDestroyed {
                cursor: CursorId::from_raw(2),
            })
            .unwrap();
        assert_eq!(sender.take().len(), 1);
        assert!(sender.is_empty());

        sender.close();
        assert!(sender
            .send(HostMessage::CursorDestroyed {
                cursor: CursorId::from_raw(2),
            })
            .is_err());
    }
}
