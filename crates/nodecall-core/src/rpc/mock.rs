use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RpcError;
use crate::types::{CallRequest, Outcome};

use super::Transport;

/// A scripted reply for one request id.
#[derive(Clone)]
pub enum MockReply {
    /// Raw JSON result, decoded with the request's declared type.
    Json(String),
    Error(RpcError),
}

/// A request as observed by the mock: `(id, method, params)`.
pub type SeenRequest = (u32, String, Vec<Value>);

/// A mock transport for testing. Answers with canned replies keyed by
/// request id, populated via the builder pattern, and records every
/// exchange it was asked to perform.
pub struct MockTransport {
    replies: Vec<(u32, MockReply)>,
    failure: Option<RpcError>,
    sends: AtomicUsize,
    seen: Mutex<Vec<Vec<SeenRequest>>>,
}

impl MockTransport {
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder {
            replies: Vec::new(),
            failure: None,
        }
    }

    /// Number of exchanges performed so far.
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    /// Requests received by each exchange, in order.
    pub fn seen(&self) -> Vec<Vec<SeenRequest>> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

pub struct MockTransportBuilder {
    replies: Vec<(u32, MockReply)>,
    failure: Option<RpcError>,
}

impl MockTransportBuilder {
    pub fn reply(mut self, id: u32, json: &str) -> Self {
        self.replies.push((id, MockReply::Json(json.to_owned())));
        self
    }

    pub fn error(mut self, id: u32, error: RpcError) -> Self {
        self.replies.push((id, MockReply::Error(error)));
        self
    }

    /// Fail the whole exchange instead of replying.
    pub fn fail_with(mut self, error: RpcError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn build(self) -> Arc<MockTransport> {
        Arc::new(MockTransport {
            replies: self.replies,
            failure: self.failure,
            sends: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, requests: &[CallRequest]) -> Result<Vec<Outcome>, RpcError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(
                requests
                    .iter()
                    .map(|r| (r.id(), r.method().to_owned(), r.params().to_vec()))
                    .collect(),
            );
        }

        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let outcomes = self
            .replies
            .iter()
            .map(|(id, reply)| {
                let request = requests.iter().find(|r| r.id() == *id);
                match (request, reply) {
                    (Some(request), MockReply::Json(json)) => request.decode_outcome(json.as_bytes()),
                    // Reply for an id the batch never sent.
                    (None, MockReply::Json(_)) => Outcome::success(*id, Arc::new(Value::Null)),
                    (_, MockReply::Error(err)) => Outcome::failure(*id, err.clone()),
                }
            })
            .collect();
        Ok(outcomes)
    }
}
