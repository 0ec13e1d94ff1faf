//! Batched JSON-RPC calls against blockchain nodes.
//!
//! Calls are collected into a [`Batch`], sent in a single exchange by a
//! [`Transport`](rpc::Transport) (JSON-RPC over HTTP or WebSocket, or a
//! gRPC gateway), and each reply is routed back to its [`BatchItem`] by
//! request id.

pub mod batch;
pub mod call;
pub mod client;
pub mod error;
pub mod rpc;
pub mod types;

pub use batch::{Batch, BatchItem};
pub use call::Call;
pub use client::RpcClient;
pub use error::{CoreError, RpcError};
pub use types::{CallRequest, Outcome};
