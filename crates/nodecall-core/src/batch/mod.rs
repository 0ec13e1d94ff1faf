//! Batch orchestration: id assignment, one transport exchange per batch, and
//! fan-out of the reported outcomes back onto the items by id.

mod slot;

pub use slot::{BatchItem, DecodedValue};

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::call::Call;
use crate::error::{RpcError, SlotError};
use crate::rpc::Transport;
use crate::types::{CallRequest, Outcome};

use slot::{ErasedSlot, ResultSlot};

/// An ordered group of calls sent together in one transport exchange.
///
/// Ids start at 1 and increase by one per added call. A batch is consumed
/// by [`Batch::execute`]; resending the same calls needs a new batch.
/// Dropping a batch that was never executed cancels its items so that no
/// caller is left waiting on them.
pub struct Batch {
    requests: Vec<CallRequest>,
    slots: Vec<Arc<dyn ErasedSlot>>,
    next_id: u32,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            slots: Vec::new(),
            next_id: 1,
        }
    }

    /// Append a call and return the handle through which its result is awaited.
    pub fn add<T: Send + Sync + 'static>(&mut self, call: Call<T>) -> BatchItem<T> {
        let id = self.next_id;
        self.next_id += 1;

        let slot = Arc::new(ResultSlot::<T>::new(id));
        let item = BatchItem::new(id, call.method().to_owned(), Arc::clone(&slot));
        self.requests.push(CallRequest::new(id, call));
        self.slots.push(slot);
        item
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// The id the next added call will receive.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    pub fn requests(&self) -> &[CallRequest] {
        &self.requests
    }

    /// Cancel every item that has not completed yet.
    pub fn cancel(&self) {
        for slot in &self.slots {
            slot.cancel();
        }
    }

    /// Send all items through `transport` in one exchange and resolve each
    /// of them. Returns one outcome per item, in insertion order.
    ///
    /// Partial failure never fails the batch: each outcome carries its own
    /// result. An item the transport did not answer fails with
    /// [`RpcError::ProtocolViolation`].
    pub async fn execute(self, transport: &dyn Transport) -> Vec<Outcome> {
        if self.requests.is_empty() {
            return Vec::new();
        }

        debug!(rpc.batch_size = self.requests.len(), "executing batch");
        match transport.send(&self.requests).await {
            Ok(outcomes) => self.resolve(outcomes),
            Err(err) => {
                debug!(rpc.batch_size = self.requests.len(), error = %err, "batch exchange failed");
                for (request, slot) in self.requests.iter().zip(&self.slots) {
                    settle(request.id(), slot.as_ref(), slot.fail(err.clone()));
                }
            }
        }

        self.outcomes()
    }

    fn index_of(&self, id: u32) -> Option<usize> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        (index < self.requests.len()).then_some(index)
    }

    fn resolve(&self, outcomes: Vec<Outcome>) {
        let mut by_id: HashMap<u32, Result<DecodedValue, RpcError>> =
            HashMap::with_capacity(outcomes.len());
        for outcome in outcomes {
            if self.index_of(outcome.id).is_none() {
                warn!(rpc.id = outcome.id, "dropping reply for unknown request id");
                continue;
            }
            match by_id.entry(outcome.id) {
                Entry::Vacant(slot) => {
                    slot.insert(outcome.result);
                }
                Entry::Occupied(_) => {
                    warn!(rpc.id = outcome.id, "dropping duplicate reply");
                }
            }
        }

        for (request, slot) in self.requests.iter().zip(&self.slots) {
            let id = request.id();
            let completion = match by_id.remove(&id) {
                Some(Ok(value)) => slot.resolve_any(value),
                Some(Err(err)) => slot.fail(err),
                None => {
                    warn!(rpc.id = id, rpc.method = request.method(), "no reply for request");
                    slot.fail(RpcError::ProtocolViolation { id })
                }
            };
            settle(id, slot.as_ref(), completion);
        }
    }

    fn outcomes(&self) -> Vec<Outcome> {
        self.requests
            .iter()
            .zip(&self.slots)
            .map(|(request, slot)| {
                let id = request.id();
                Outcome {
                    id,
                    result: slot
                        .outcome()
                        .unwrap_or(Err(RpcError::ProtocolViolation { id })),
                }
            })
            .collect()
    }
}

/// Check the result of completing a slot. Cancelled items legitimately
/// reject their late reply; anything else is a correlation bug.
fn settle(id: u32, slot: &dyn ErasedSlot, completion: Result<(), SlotError>) {
    let Err(err) = completion else {
        return;
    };
    if slot.is_cancelled() {
        trace!(rpc.id = id, "item was cancelled before its reply arrived");
        return;
    }
    error!(rpc.id = id, error = %err, "batch item completed twice");
    debug_assert!(false, "{err}");
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        for slot in &self.slots {
            if slot.is_pending() {
                slot.cancel();
            }
        }
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("requests", &self.requests)
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::rpc::mock::MockTransport;

    fn client_version() -> Call<String> {
        Call::new("web3_clientVersion", Vec::new()).expect("valid call")
    }

    #[test]
    fn add_assigns_sequential_ids_from_one() {
        let mut batch = Batch::new();
        let first = batch.add(client_version());
        let second = batch.add(client_version());

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(first.method(), "web3_clientVersion");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.next_id(), 3);
    }

    #[tokio::test]
    async fn empty_batch_skips_transport() {
        let transport = MockTransport::builder().build();
        let outcomes = Batch::new().execute(transport.as_ref()).await;

        assert!(outcomes.is_empty());
        assert_eq!(transport.sends(), 0);
    }

    #[tokio::test]
    async fn blank_method_never_reaches_the_transport() {
        let transport = MockTransport::builder().reply(1, "\"Geth/v1.10.0\"").build();
        let mut batch = Batch::new();
        for blank in ["", "   "] {
            let err = Call::<Value>::new(blank, Vec::new()).expect_err("blank method");
            assert!(matches!(err, RpcError::InvalidCall(_)));
        }
        let version = batch.add(client_version());

        batch.execute(transport.as_ref()).await;

        assert_eq!(
            transport.seen(),
            vec![vec![(1, "web3_clientVersion".to_owned(), Vec::new())]]
        );
        assert_eq!(version.result().await.expect("resolved"), "Geth/v1.10.0");
    }

    #[tokio::test]
    async fn replies_are_correlated_by_id_and_reported_in_order() {
        let transport = MockTransport::builder()
            .reply(2, "\"Parity/v2.5.0\"")
            .reply(1, "\"Geth/v1.10.0\"")
            .build();
        let mut batch = Batch::new();
        let geth = batch.add(client_version());
        let parity = batch.add(client_version());

        let outcomes = batch.execute(transport.as_ref()).await;

        assert_eq!(transport.sends(), 1);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].id, 1);
        assert_eq!(outcomes[0].value::<String>().map(String::as_str), Some("Geth/v1.10.0"));
        assert_eq!(outcomes[1].id, 2);
        assert_eq!(outcomes[1].value::<String>().map(String::as_str), Some("Parity/v2.5.0"));
        assert_eq!(geth.result().await.expect("resolved"), "Geth/v1.10.0");
        assert_eq!(parity.result().await.expect("resolved"), "Parity/v2.5.0");
    }

    #[tokio::test]
    async fn transport_sees_every_item_once() {
        let transport = MockTransport::builder()
            .reply(1, "null")
            .reply(2, "null")
            .build();
        let mut batch = Batch::new();
        batch.add(Call::<Value>::new("eth_test", Vec::new()).expect("valid call"));
        batch.add(
            Call::<Value>::new("eth_test2", vec![json!("test"), json!(14)]).expect("valid call"),
        );

        batch.execute(transport.as_ref()).await;

        let seen = transport.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            vec![
                (1, "eth_test".to_owned(), Vec::new()),
                (2, "eth_test2".to_owned(), vec![json!("test"), json!(14)]),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_reply_ids_are_ignored() {
        let transport = MockTransport::builder()
            .reply(1, "\"Geth\"")
            .reply(99, "\"stray\"")
            .build();
        let mut batch = Batch::new();
        let item = batch.add(client_version());

        let outcomes = batch.execute(transport.as_ref()).await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_ok());
        assert_eq!(item.result().await.expect("resolved"), "Geth");
    }

    #[tokio::test]
    async fn unanswered_item_fails_with_protocol_violation() {
        let transport = MockTransport::builder().reply(1, "\"Geth\"").build();
        let mut batch = Batch::new();
        let answered = batch.add(client_version());
        let missing = batch.add(client_version());

        let outcomes = batch.execute(transport.as_ref()).await;

        assert!(outcomes[0].is_ok());
        assert_eq!(
            outcomes[1].error(),
            Some(&RpcError::ProtocolViolation { id: 2 })
        );
        assert!(answered.result().await.is_ok());
        assert_eq!(
            missing.result().await,
            Err(RpcError::ProtocolViolation { id: 2 })
        );
    }

    #[tokio::test]
    async fn transport_failure_is_broadcast_to_every_item() {
        let failure = RpcError::Transport("server returned error response: 500".into());
        let transport = MockTransport::builder().fail_with(failure.clone()).build();
        let mut batch = Batch::new();
        let items = [batch.add(client_version()), batch.add(client_version())];

        let outcomes = batch.execute(transport.as_ref()).await;

        assert_eq!(outcomes.len(), 2);
        for (outcome, item) in outcomes.iter().zip(&items) {
            assert_eq!(outcome.error(), Some(&failure));
            assert_eq!(item.result().await, Err(failure.clone()));
        }
    }

    #[tokio::test]
    async fn item_errors_do_not_affect_siblings() {
        let transport = MockTransport::builder()
            .reply(1, "{\"unexpected\":true}")
            .error(
                2,
                RpcError::Remote {
                    code: -32602,
                    message: "Invalid params".into(),
                },
            )
            .reply(3, "\"Geth\"")
            .build();
        let mut batch = Batch::new();
        let bad_shape = batch.add(client_version());
        let remote = batch.add(client_version());
        let good = batch.add(client_version());

        batch.execute(transport.as_ref()).await;

        assert!(matches!(bad_shape.result().await, Err(RpcError::Decode(_))));
        assert!(matches!(
            remote.result().await,
            Err(RpcError::Remote { code: -32602, .. })
        ));
        assert_eq!(good.result().await.expect("resolved"), "Geth");
    }

    #[tokio::test]
    async fn cancelled_item_keeps_cancelled_state() {
        let transport = MockTransport::builder()
            .reply(1, "\"Geth\"")
            .reply(2, "\"Parity\"")
            .build();
        let mut batch = Batch::new();
        let cancelled = batch.add(client_version());
        let other = batch.add(client_version());
        assert!(cancelled.cancel());

        let outcomes = batch.execute(transport.as_ref()).await;

        assert_eq!(transport.sends(), 1);
        assert_eq!(outcomes[0].error(), Some(&RpcError::Cancelled));
        assert_eq!(cancelled.result().await, Err(RpcError::Cancelled));
        assert_eq!(other.result().await.expect("resolved"), "Parity");
    }

    #[tokio::test]
    async fn duplicate_replies_keep_the_first() {
        let transport = MockTransport::builder()
            .reply(1, "\"first\"")
            .reply(1, "\"second\"")
            .build();
        let mut batch = Batch::new();
        let item = batch.add(client_version());

        batch.execute(transport.as_ref()).await;

        assert_eq!(item.result().await.expect("resolved"), "first");
    }

    #[tokio::test]
    async fn dropping_unexecuted_batch_cancels_items() {
        let mut batch = Batch::new();
        let item = batch.add(client_version());
        drop(batch);

        assert_eq!(item.result().await, Err(RpcError::Cancelled));
    }

    #[tokio::test]
    async fn mixed_result_types_resolve_independently() {
        let transport = MockTransport::builder()
            .reply(1, "\"Geth\"")
            .reply(2, "17")
            .build();
        let mut batch = Batch::new();
        let version = batch.add(client_version());
        let height = batch.add(
            Call::<u64>::new("eth_blockNumber", Vec::new()).expect("valid call"),
        );

        let outcomes = batch.execute(transport.as_ref()).await;

        assert_eq!(outcomes[1].value::<u64>(), Some(&17));
        assert_eq!(version.result().await.expect("resolved"), "Geth");
        assert_eq!(height.result().await.expect("resolved"), 17);
    }
}
