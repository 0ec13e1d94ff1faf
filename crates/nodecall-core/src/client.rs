//! Caller-facing entry point: run one call, or run a batch and read its
//! outcomes as a list or as a stream.

use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use tracing::debug;

use crate::batch::Batch;
use crate::call::Call;
use crate::error::RpcError;
use crate::rpc::Transport;
use crate::types::Outcome;

/// Runs calls and batches against one shared [`Transport`].
///
/// Cloning is cheap and every clone uses the same transport, so batches may
/// be executed concurrently from several tasks.
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn Transport>,
}

impl RpcClient {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// An empty batch. Items are added by the caller and the batch is run
    /// with [`execute_all`](Self::execute_all) or
    /// [`execute_stream`](Self::execute_stream).
    pub fn batch(&self) -> Batch {
        Batch::new()
    }

    /// Run a single call in its own one-item batch and return its value.
    pub async fn execute<T>(&self, call: Call<T>) -> Result<T, RpcError>
    where
        T: Send + Sync + 'static,
    {
        debug!(rpc.method = call.method(), "executing single call");
        let mut batch = Batch::new();
        let item = batch.add(call);
        // The returned outcomes share the decoded value; drop them before
        // taking it out of the item.
        drop(batch.execute(self.transport.as_ref()).await);
        item.into_result().await
    }

    /// Run a batch and return one outcome per item, in submission order.
    /// Partial failure is reported per outcome, never as a whole.
    pub async fn execute_all(&self, batch: Batch) -> Vec<Outcome> {
        batch.execute(self.transport.as_ref()).await
    }

    /// Run a batch lazily: nothing is sent until the stream is first polled,
    /// and outcomes are yielded in submission order once the single
    /// exchange has completed.
    pub fn execute_stream(&self, batch: Batch) -> impl Stream<Item = Outcome> + Send + 'static {
        let transport = Arc::clone(&self.transport);
        stream::once(async move { batch.execute(transport.as_ref()).await }).flat_map(stream::iter)
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::rpc::mock::MockTransport;

    #[tokio::test]
    async fn execute_returns_single_value() {
        let mock = MockTransport::builder().reply(1, "\"Geth/v1.10.0\"").build();
        let client = RpcClient::from_arc(mock.clone());

        let version = client
            .execute(Call::<String>::new("web3_clientVersion", Vec::new()).expect("valid call"))
            .await;

        assert_eq!(version, Ok("Geth/v1.10.0".to_owned()));
        assert_eq!(mock.sends(), 1);
        assert_eq!(
            mock.seen(),
            vec![vec![(1, "web3_clientVersion".to_owned(), Vec::new())]]
        );
    }

    /// Deliberately not `Clone`.
    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct SyncStatus {
        current: u64,
        highest: u64,
    }

    #[tokio::test]
    async fn execute_returns_values_that_are_not_clone() {
        let mock = MockTransport::builder()
            .reply(1, r#"{"current":17,"highest":20}"#)
            .build();
        let client = RpcClient::from_arc(mock);

        let status = client
            .execute(Call::<SyncStatus>::new("eth_syncing", Vec::new()).expect("valid call"))
            .await
            .expect("decoded");
        assert_eq!(status, SyncStatus { current: 17, highest: 20 });
    }

    #[tokio::test]
    async fn execute_surfaces_item_error() {
        let mock = MockTransport::builder()
            .error(1, RpcError::internal("Test error"))
            .build();
        let client = RpcClient::from_arc(mock);

        let err = client
            .execute(Call::<Value>::new("eth_call", vec![json!({})]).expect("valid call"))
            .await
            .expect_err("server failed the call");
        assert_eq!(err, RpcError::internal("Test error"));
    }

    #[tokio::test]
    async fn execute_all_keeps_submission_order() {
        let mock = MockTransport::builder()
            .reply(3, "3")
            .error(2, RpcError::internal("nope"))
            .reply(1, "1")
            .build();
        let client = RpcClient::from_arc(mock);

        let mut batch = client.batch();
        for method in ["a", "b", "c"] {
            batch.add(Call::<u64>::new(method, Vec::new()).expect("valid call"));
        }
        let outcomes = client.execute_all(batch).await;

        let ids: Vec<u32> = outcomes.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(outcomes[0].value::<u64>(), Some(&1));
        assert_eq!(outcomes[1].error(), Some(&RpcError::internal("nope")));
        assert_eq!(outcomes[2].value::<u64>(), Some(&3));
    }

    #[tokio::test]
    async fn execute_stream_is_lazy_and_ordered() {
        let mock = MockTransport::builder().reply(2, "\"b\"").reply(1, "\"a\"").build();
        let client = RpcClient::from_arc(mock.clone());

        let mut batch = client.batch();
        batch.add(Call::<String>::new("first", Vec::new()).expect("valid call"));
        batch.add(Call::<String>::new("second", Vec::new()).expect("valid call"));
        let stream = client.execute_stream(batch);
        assert_eq!(mock.sends(), 0);

        let values: Vec<String> = stream
            .map(|outcome| outcome.value::<String>().cloned().unwrap_or_default())
            .collect()
            .await;
        assert_eq!(values, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(mock.sends(), 1);
    }

    #[tokio::test]
    async fn execute_stream_of_empty_batch_yields_nothing() {
        let mock = MockTransport::builder().build();
        let client = RpcClient::from_arc(mock.clone());

        let outcomes: Vec<Outcome> = client.execute_stream(client.batch()).collect().await;
        assert!(outcomes.is_empty());
        assert_eq!(mock.sends(), 0);
    }
}
