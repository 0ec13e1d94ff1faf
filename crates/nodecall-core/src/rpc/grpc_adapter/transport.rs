use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tonic::Status;
use tracing::{debug, trace, warn};

use crate::error::RpcError;
use crate::types::{CallRequest, Outcome};

use super::super::Transport;
use super::channel::NativeCallChannel;
use super::connection::Shared;
use super::proto::{Chain, NativeCallItem, NativeCallReplyItem, NativeCallRequest};
use super::selector::Selector;

/// JSON-RPC calls tunnelled through the gateway's `NativeCall` stream.
///
/// Each batch becomes one request envelope and the gateway answers with one
/// reply frame per item. Transports are cheap configuration copies: clones,
/// [`for_chain`](Self::for_chain) and [`with_selector`](Self::with_selector)
/// all share the connection of the [`GrpcConnection`](super::GrpcConnection)
/// they came from.
#[derive(Clone)]
pub struct GrpcTransport {
    shared: Arc<Shared>,
    chain: Chain,
    selector: Option<Selector>,
}

impl GrpcTransport {
    pub(super) fn new(shared: Arc<Shared>, chain: Chain, selector: Option<Selector>) -> Self {
        Self {
            shared,
            chain,
            selector,
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    /// Copy targeting another chain over the same connection.
    pub fn for_chain(&self, chain: Chain) -> Self {
        Self {
            chain,
            ..self.clone()
        }
    }

    /// Copy with a different upstream selector (or none) over the same connection.
    pub fn with_selector(&self, selector: Option<Selector>) -> Self {
        Self {
            selector,
            ..self.clone()
        }
    }

    /// Build the request envelope for a batch. Params are carried as the
    /// JSON encoding of the positional array; an item that cannot be
    /// encoded fails the whole batch.
    pub fn convert(&self, requests: &[CallRequest]) -> Result<NativeCallRequest, RpcError> {
        let items = requests
            .iter()
            .map(|request| {
                let payload = serde_json::to_vec(request.params()).map_err(|e| {
                    RpcError::Encode(format!("request {}: {e}", request.id()))
                })?;
                Ok(NativeCallItem {
                    id: request.id(),
                    method: request.method().to_owned(),
                    payload,
                })
            })
            .collect::<Result<Vec<_>, RpcError>>()?;

        Ok(NativeCallRequest {
            chain: self.chain.into(),
            items,
            selector: self.selector.as_ref().map(Selector::to_message),
        })
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, requests: &[CallRequest]) -> Result<Vec<Outcome>, RpcError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let channel = self.shared.channel().ok_or(RpcError::Closed)?;
        let envelope = self.convert(requests)?;

        debug!(
            rpc.batch_size = requests.len(),
            chain = %self.chain,
            selector = self.selector.is_some(),
            "rpc call"
        );
        let exchange = self
            .shared
            .exchanges
            .track_future(exchange(channel, envelope, requests));
        tokio::select! {
            outcomes = exchange => outcomes,
            () = self.shared.shutdown.cancelled() => {
                debug!(rpc.batch_size = requests.len(), "exchange terminated by close");
                Err(RpcError::Transport("gateway connection closed during exchange".to_owned()))
            }
        }
    }
}

impl std::fmt::Debug for GrpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcTransport")
            .field("chain", &self.chain)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

/// Perform one `NativeCall` and collect an outcome per answered item.
async fn exchange(
    channel: Arc<dyn NativeCallChannel>,
    envelope: NativeCallRequest,
    requests: &[CallRequest],
) -> Result<Vec<Outcome>, RpcError> {
    let by_id: HashMap<u32, &CallRequest> = requests.iter().map(|r| (r.id(), r)).collect();
    let mut stream = channel.native_call(envelope).await.map_err(status_error)?;

    let mut outcomes = Vec::with_capacity(requests.len());
    let mut answered = HashSet::with_capacity(requests.len());
    let mut frames = 0usize;
    while let Some(frame) = stream.next().await {
        let reply = match frame {
            Ok(reply) => reply,
            Err(status) if frames == 0 => return Err(status_error(status)),
            Err(status) => {
                let err = status_error(status);
                warn!(
                    rpc.received = frames,
                    rpc.batch_size = requests.len(),
                    error = %err,
                    "reply stream failed part way"
                );
                outcomes.extend(
                    requests
                        .iter()
                        .filter(|r| !answered.contains(&r.id()))
                        .map(|r| Outcome::failure(r.id(), err.clone())),
                );
                return Ok(outcomes);
            }
        };
        frames += 1;

        let Some(request) = by_id.get(&reply.id) else {
            warn!(rpc.id = reply.id, "dropping reply frame with unknown id");
            continue;
        };
        trace!(rpc.id = reply.id, succeed = reply.succeed, "reply frame");
        answered.insert(reply.id);
        outcomes.push(convert_reply(request, reply));
    }

    debug!(rpc.received = frames, "reply stream complete");
    Ok(outcomes)
}

fn convert_reply(request: &CallRequest, reply: NativeCallReplyItem) -> Outcome {
    if reply.succeed {
        request.decode_outcome(&reply.payload)
    } else {
        Outcome::failure(request.id(), RpcError::internal(reply.error_message))
    }
}

fn status_error(status: Status) -> RpcError {
    RpcError::Transport(format!(
        "gateway call failed: {:?}: {}",
        status.code(),
        status.message()
    ))
}
