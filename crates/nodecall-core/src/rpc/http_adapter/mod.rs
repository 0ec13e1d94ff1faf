//! JSON-RPC over HTTP.
//!
//! Implements [`Transport`](super::Transport) with `reqwest`: one POST per
//! batch, optional basic auth (explicit or cookie file), and optional
//! request rate limiting.

mod connection;
mod transport;

pub(super) use connection::Credentials;
pub use transport::{HttpTransport, HttpTransportBuilder};
