//! Client socket handle.

use tokio::sync::mpsc;

/// Items queued for delivery to one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Close the socket after flushing what was queued before it.
    Close,
}

/// Cloneable write handle for a connected client.
///
/// Writes go through an unbounded queue drained by the connection task, so
/// senders never wait on a slow socket.
#[derive(Debug, Clone)]
pub struct ClientSocket {
    /// Unique client ID
    pub id: String,
    /// Network origin (IP, or the forwarded address when behind a proxy)
    pub address: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ClientSocket {
    /// Create a handle plus the receiving end the connection task drains.
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = Self {
            id: id.into(),
            address: address.into(),
            tx,
        };
        (socket, rx)
    }

    /// Queue a text frame. Returns false once the socket is gone.
    pub fn send_text(&self, text: String) -> bool {
        self.tx.send(Outbound::Text(text)).is_ok()
    }

    /// Ask the connection task to close the socket.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
