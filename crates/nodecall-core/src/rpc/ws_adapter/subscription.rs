use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::RpcError;

use super::super::jsonrpc::parse_jsonrpc_error;
use super::transport::Shared;

/// An active `eth_subscribe` subscription.
///
/// Yields the `result` of every `eth_subscription` notification for this
/// id, in arrival order. The stream ends when the connection goes away.
/// Dropping the subscription stops local delivery without telling the
/// node; use [`unsubscribe`](Self::unsubscribe) for that.
pub struct Subscription {
    id: String,
    kind: String,
    items: mpsc::UnboundedReceiver<Value>,
    shared: Arc<Shared>,
}

impl Subscription {
    pub(super) fn new(
        id: String,
        kind: String,
        items: mpsc::UnboundedReceiver<Value>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            id,
            kind,
            items,
            shared,
        }
    }

    /// Subscription id assigned by the node.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The subscription kind, e.g. `newHeads`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Next notification decoded as `T`. `None` once the stream ended.
    pub async fn next_as<T: DeserializeOwned>(&mut self) -> Option<Result<T, RpcError>> {
        let value = self.next().await?;
        Some(serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string())))
    }

    /// Cancel the subscription on the node with `eth_unsubscribe`. Returns
    /// the node's answer: false if it no longer knew the id.
    pub async fn unsubscribe(self) -> Result<bool, RpcError> {
        let response = self
            .shared
            .request("eth_unsubscribe", vec![Value::String(self.id.clone())], None)
            .await?;
        if let Some(err) = response.error {
            return Err(parse_jsonrpc_error(err));
        }
        let removed = match response.result {
            Some(raw) => serde_json::from_str::<bool>(raw.get())
                .map_err(|e| RpcError::Decode(e.to_string()))?,
            None => false,
        };
        debug!(subscription = %self.id, removed, "unsubscribed");
        Ok(removed)
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.items.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.forget(self.id.clone());
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
