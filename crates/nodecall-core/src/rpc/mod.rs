//! Transport abstraction for batched JSON-RPC calls.
//!
//! Defines the [`Transport`] trait and its implementations: plain JSON-RPC
//! over HTTP ([`HttpTransport`]) or a WebSocket ([`WsTransport`]), and the
//! binary-framed gateway protocol over gRPC ([`GrpcTransport`]). A test mock
//! lives in `mock::MockTransport`.

mod grpc_adapter;
mod http_adapter;
mod jsonrpc;
#[cfg(test)]
pub mod mock;
mod ws_adapter;

pub use grpc_adapter::{
    Chain, GrpcConnection, GrpcConnectionBuilder, GrpcTransport, NativeCallChannel,
    NativeCallItem, NativeCallReplyItem, NativeCallRequest, ReplyStream, Selector, SelectorMessage,
    TonicChannel,
};
pub use http_adapter::{HttpTransport, HttpTransportBuilder};
pub use ws_adapter::{Subscription, WsTransport, WsTransportBuilder};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RpcError;
use crate::types::{CallRequest, Outcome};

/// Wire-level delivery of one batch.
///
/// Implementations perform exactly one network exchange per `send` and must
/// be safe to share between concurrently executing batches.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send every request in a single exchange and report the outcomes that
    /// came back, keyed by request id and in any order.
    ///
    /// `Err` means the exchange as a whole failed; the batch then fails every
    /// item that is still pending with that error. Ids the server never
    /// answered are simply absent from the returned list.
    async fn send(&self, requests: &[CallRequest]) -> Result<Vec<Outcome>, RpcError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, requests: &[CallRequest]) -> Result<Vec<Outcome>, RpcError> {
        (**self).send(requests).await
    }
}
