//! JSON-RPC through a gRPC gateway.
//!
//! The gateway exposes a server-streaming `NativeCall` method: the client
//! sends one envelope holding every call of a batch (chain, optional
//! upstream selector, and `{id, method, JSON params}` items) and receives
//! one reply frame per item. [`GrpcConnection`] owns the channel and its
//! lifecycle; [`GrpcTransport`] is the per-chain, per-selector view that
//! implements [`Transport`](super::Transport).

mod channel;
mod connection;
mod proto;
mod selector;
mod transport;

pub use channel::{NativeCallChannel, ReplyStream, TonicChannel};
pub use connection::{GrpcConnection, GrpcConnectionBuilder};
pub use proto::{Chain, NativeCallItem, NativeCallReplyItem, NativeCallRequest, SelectorMessage};
pub use selector::Selector;
pub use transport::GrpcTransport;
