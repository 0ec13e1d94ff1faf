//! Single-assignment result slots and the caller-facing [`BatchItem`] handle.
//!
//! A slot starts `Pending` and moves exactly once to `Resolved` or `Failed`.
//! The batch drives the transition; callers only observe it. Completing a
//! slot twice is rejected with [`SlotError`] instead of overwriting.

use std::any::{type_name, Any};
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{RpcError, SlotError};

/// A decoded result with its concrete type erased, as produced by a
/// transport for one request id.
pub type DecodedValue = Arc<dyn Any + Send + Sync>;

enum SlotState<T> {
    Pending,
    Resolved(Arc<T>),
    Failed(RpcError),
}

impl<T> SlotState<T> {
    fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    fn to_result(&self) -> Option<Result<Arc<T>, RpcError>> {
        match self {
            Self::Pending => None,
            Self::Resolved(value) => Some(Ok(Arc::clone(value))),
            Self::Failed(err) => Some(Err(err.clone())),
        }
    }
}

pub(crate) struct ResultSlot<T> {
    id: u32,
    state: watch::Sender<SlotState<T>>,
}

impl<T: Send + Sync + 'static> ResultSlot<T> {
    pub(crate) fn new(id: u32) -> Self {
        let (state, _) = watch::channel(SlotState::Pending);
        Self { id, state }
    }

    fn complete(&self, next: SlotState<T>) -> Result<(), SlotError> {
        let accepted = self.state.send_if_modified(|current| {
            if current.is_pending() {
                *current = next;
                true
            } else {
                false
            }
        });
        if accepted {
            Ok(())
        } else {
            Err(SlotError::AlreadyCompleted { id: self.id })
        }
    }

    pub(crate) fn resolve(&self, value: Arc<T>) -> Result<(), SlotError> {
        self.complete(SlotState::Resolved(value))
    }

    pub(crate) fn fail(&self, error: RpcError) -> Result<(), SlotError> {
        self.complete(SlotState::Failed(error))
    }

    /// Force the slot to `Cancelled`. Returns false if it was already complete.
    pub(crate) fn cancel(&self) -> bool {
        self.fail(RpcError::Cancelled).is_ok()
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state.borrow().is_pending()
    }

    pub(crate) fn snapshot(&self) -> Option<Result<Arc<T>, RpcError>> {
        self.state.borrow().to_result()
    }

    /// Move the completed state out of a slot nobody else can observe.
    fn take(self) -> Option<Result<Arc<T>, RpcError>> {
        self.state.send_replace(SlotState::Pending).to_result()
    }

    pub(crate) async fn wait(&self) -> Result<Arc<T>, RpcError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| !state.is_pending())
            .await
            .map_err(|_| RpcError::Cancelled)?;
        state.to_result().unwrap_or(Err(RpcError::Cancelled))
    }
}

/// Type-erased view of a slot, used by the batch to resolve items of
/// different result types uniformly.
pub(crate) trait ErasedSlot: Send + Sync {
    fn resolve_any(&self, value: DecodedValue) -> Result<(), SlotError>;
    fn fail(&self, error: RpcError) -> Result<(), SlotError>;
    fn cancel(&self) -> bool;
    fn is_pending(&self) -> bool;
    fn is_cancelled(&self) -> bool;
    fn outcome(&self) -> Option<Result<DecodedValue, RpcError>>;
}

impl<T: Send + Sync + 'static> ErasedSlot for ResultSlot<T> {
    fn resolve_any(&self, value: DecodedValue) -> Result<(), SlotError> {
        match value.downcast::<T>() {
            Ok(value) => self.resolve(value),
            Err(_) => ResultSlot::fail(
                self,
                RpcError::Decode(format!("result is not a `{}`", type_name::<T>())),
            ),
        }
    }

    fn fail(&self, error: RpcError) -> Result<(), SlotError> {
        ResultSlot::fail(self, error)
    }

    fn cancel(&self) -> bool {
        ResultSlot::cancel(self)
    }

    fn is_pending(&self) -> bool {
        ResultSlot::is_pending(self)
    }

    fn is_cancelled(&self) -> bool {
        matches!(&*self.state.borrow(), SlotState::Failed(RpcError::Cancelled))
    }

    fn outcome(&self) -> Option<Result<DecodedValue, RpcError>> {
        self.snapshot()
            .map(|result| result.map(|value| value as DecodedValue))
    }
}

/// Handle to one call inside a [`Batch`](super::Batch).
///
/// The result can be awaited independently of the other items and of how
/// the batch completes. Handles are cheap to clone; all clones observe the
/// same slot.
pub struct BatchItem<T> {
    id: u32,
    method: String,
    slot: Arc<ResultSlot<T>>,
}

impl<T: Send + Sync + 'static> BatchItem<T> {
    pub(crate) fn new(id: u32, method: String, slot: Arc<ResultSlot<T>>) -> Self {
        Self { id, method, slot }
    }

    /// Correlation id, unique within the owning batch.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_completed(&self) -> bool {
        !self.slot.is_pending()
    }

    /// Force the item into the terminal `Cancelled` state, waking any task
    /// awaiting it. Has no effect (and returns false) once the item completed.
    /// The network exchange of the batch is not aborted.
    pub fn cancel(&self) -> bool {
        self.slot.cancel()
    }

    /// Wait for the item to complete and return a shared reference to the value.
    pub async fn shared_result(&self) -> Result<Arc<T>, RpcError> {
        self.slot.wait().await
    }

    /// Wait for the item to complete and take ownership of the value.
    ///
    /// Needs no `Clone` bound. Fails with an internal error if a clone of
    /// this handle, or an `Arc` from [`shared_result`](Self::shared_result),
    /// still shares the value.
    pub async fn into_result(self) -> Result<T, RpcError> {
        self.slot.wait().await?;
        let shared = || RpcError::internal(format!("result of item {} is still shared", self.id));
        let slot = Arc::try_unwrap(self.slot).map_err(|_| shared())?;
        match slot.take() {
            Some(Ok(value)) => Arc::try_unwrap(value).map_err(|_| shared()),
            Some(Err(err)) => Err(err),
            None => Err(RpcError::Cancelled),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> BatchItem<T> {
    /// Wait for the item to complete.
    pub async fn result(&self) -> Result<T, RpcError> {
        self.slot.wait().await.map(|value| T::clone(&value))
    }

    /// The result if the item already completed, without waiting.
    pub fn try_result(&self) -> Option<Result<T, RpcError>> {
        self.slot
            .snapshot()
            .map(|result| result.map(|value| T::clone(&value)))
    }
}

impl<T> Clone for BatchItem<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            method: self.method.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> std::fmt::Debug for BatchItem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchItem")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn item(id: u32) -> (Arc<ResultSlot<String>>, BatchItem<String>) {
        let slot = Arc::new(ResultSlot::new(id));
        let item = BatchItem::new(id, "web3_clientVersion".into(), Arc::clone(&slot));
        (slot, item)
    }

    #[tokio::test]
    async fn resolved_value_is_returned_to_every_clone() {
        let (slot, item) = item(1);
        let other = item.clone();
        assert!(!item.is_completed());

        slot.resolve(Arc::new("Geth".to_owned())).expect("first completion");

        assert!(item.is_completed());
        assert_eq!(item.result().await.expect("resolved"), "Geth");
        assert_eq!(other.result().await.expect("resolved"), "Geth");
    }

    #[tokio::test]
    async fn failure_is_reported_on_await() {
        let (slot, item) = item(2);
        slot.fail(RpcError::internal("Test error")).expect("first completion");

        let err = item.result().await.expect_err("must fail");
        assert_eq!(err, RpcError::internal("Test error"));
    }

    #[test]
    fn second_completion_is_rejected() {
        let (slot, item) = item(3);
        slot.resolve(Arc::new("first".to_owned())).expect("first completion");

        let err = slot
            .resolve(Arc::new("second".to_owned()))
            .expect_err("double resolve must be reported");
        assert_eq!(err, SlotError::AlreadyCompleted { id: 3 });
        let err = slot
            .fail(RpcError::Transport("late".into()))
            .expect_err("fail after resolve must be reported");
        assert_eq!(err, SlotError::AlreadyCompleted { id: 3 });

        assert_eq!(
            item.try_result().expect("completed").expect("still resolved"),
            "first"
        );
    }

    #[tokio::test]
    async fn cancel_wakes_waiting_task() {
        let (_slot, item) = item(4);
        let waiter = {
            let item = item.clone();
            tokio::spawn(async move { item.result().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(item.cancel());
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter must wake")
            .expect("task must not panic");
        assert_eq!(result, Err(RpcError::Cancelled));
    }

    #[test]
    fn cancel_after_completion_is_noop() {
        let (slot, item) = item(5);
        slot.resolve(Arc::new("done".to_owned())).expect("first completion");
        assert!(!item.cancel());
        assert!(!ErasedSlot::is_cancelled(slot.as_ref()));
    }

    #[test]
    fn erased_resolve_rejects_wrong_type() {
        let (slot, item) = item(6);
        let wrong: DecodedValue = Arc::new(42_u64);
        slot.resolve_any(wrong).expect("first completion");

        let err = item.try_result().expect("completed").expect_err("type mismatch");
        assert!(matches!(err, RpcError::Decode(_)));
    }

    #[tokio::test]
    async fn into_result_moves_value_out() {
        let (slot, item) = item(6);
        slot.resolve(Arc::new("Erigon".to_owned())).expect("first completion");
        drop(slot);

        assert_eq!(item.into_result().await, Ok("Erigon".to_owned()));
    }

    #[tokio::test]
    async fn into_result_reports_failure() {
        let (slot, item) = item(7);
        slot.fail(RpcError::internal("Test error")).expect("first completion");
        drop(slot);

        assert_eq!(item.into_result().await, Err(RpcError::internal("Test error")));
    }

    #[tokio::test]
    async fn into_result_refuses_while_value_is_shared() {
        let (slot, item) = item(8);
        slot.resolve(Arc::new("Geth".to_owned())).expect("first completion");
        drop(slot);
        let other = item.clone();

        let err = item.into_result().await.expect_err("clone still holds the slot");
        assert_eq!(err.code(), crate::error::CODE_INTERNAL_ERROR);
        assert_eq!(other.into_result().await, Ok("Geth".to_owned()));
    }
}
