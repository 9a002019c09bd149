//! Transport seam for the event stream.
//!
//! The multiplexer does not own a socket. It asks a [`Connector`] for a
//! [`Connection`]: an outbound sender for text frames and an inbound stream
//! of [`TransportEvent`]s. A real WebSocket client, the in-memory relayer and
//! unit-test fixtures all plug in here.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// What the transport reports to the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is ready for traffic.
    Opened,
    /// One inbound text frame.
    Frame(String),
    /// The transport failed. The multiplexer treats this as permanent.
    Error(String),
    /// The remote closed the connection cleanly.
    Closed,
}

/// Client side of a duplex connection.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Remote side of a [`Connection::pair`].
#[derive(Debug)]
pub struct RemoteEnd {
    /// Frames the client sent.
    pub from_client: mpsc::UnboundedReceiver<String>,
    /// Events delivered to the client.
    pub to_client: mpsc::UnboundedSender<TransportEvent>,
}

impl Connection {
    /// An in-process connection and the handle that drives its far end.
    pub fn pair() -> (Connection, RemoteEnd) {
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        (
            Connection { outbound, inbound },
            RemoteEnd {
                from_client,
                to_client,
            },
        )
    }
}

/// Opens connections to a relayer's event endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Connection>;
}
