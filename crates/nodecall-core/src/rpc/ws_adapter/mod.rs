//! JSON-RPC over a WebSocket.
//!
//! One background task owns the socket. Batches are written as single
//! frames under connection-unique wire ids and their responses are routed
//! back by id. The same socket carries `eth_subscribe` notifications to
//! [`Subscription`] streams.

mod session;
mod subscription;
mod transport;

pub use subscription::Subscription;
pub use transport::{WsTransport, WsTransportBuilder};
