//! Transport boundary.
//!
//! Encoding network messages to bytes and putting them on a wire is outside
//! this crate. A [`MessageSink`] is the point where built messages leave the
//! publishing path.

use pubsub_protocol::NetworkMessage;
use tokio::sync::mpsc;

use crate::connection::PublishError;

/// Destination of published network messages.
///
/// `send` is called from the publisher's blocking tick context and must not
/// wait on the async runtime.
pub trait MessageSink: Send + Sync {
    /// Whether the transport is currently able to accept messages.
    fn is_connected(&self) -> bool {
        true
    }

    /// Hand one message to the transport.
    fn send(&self, message: &NetworkMessage) -> Result<(), PublishError>;
}

/// Sink forwarding messages into a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<NetworkMessage>,
}

impl ChannelSink {
    /// Create a sink and the receiver a consumer reads published messages from.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NetworkMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl MessageSink for ChannelSink {
    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send(&self, message: &NetworkMessage) -> Result<(), PublishError> {
        self.tx.try_send(message.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                PublishError::Transport("channel sink is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => PublishError::NotConnected,
        })
    }
}
