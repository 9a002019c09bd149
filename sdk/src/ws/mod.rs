//! Relayer event stream: topics, frames, and the connection multiplexer.

pub mod multiplexer;
pub mod topics;
pub mod transport;

pub use multiplexer::{Callback, CallbackId, TopicMultiplexer, DEFAULT_PRIORITY};
pub use topics::{
    price_report_topic, task_topic, wallet_topic, Exchange, RelayerEvent, MPC_TOPIC,
    NETWORK_TOPIC, ORDER_BOOK_TOPIC,
};
pub use transport::{Connection, Connector, RemoteEnd, TransportEvent};
