use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{CoreError, RpcError};
use crate::types::{CallRequest, Outcome};

use super::super::http_adapter::Credentials;
use super::super::jsonrpc::{
    convert_response, encode_requests, parse_jsonrpc_error, JsonRpcRequest, JsonRpcResponse,
};
use super::super::Transport;
use super::session::{self, subscription_key, Command, Pending};
use super::subscription::Subscription;

const DEFAULT_URL: &str = "ws://127.0.0.1:8546";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(60);

/// State shared by the transport and the subscriptions it opened.
pub(super) struct Shared {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    timeout: Duration,
}

fn connection_lost() -> RpcError {
    RpcError::Transport("websocket connection closed".to_owned())
}

impl Shared {
    /// Wire ids are unique per connection, so concurrent batches that all
    /// number their items from 1 never collide on the socket.
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn submit(&self, frame: String, pending: Vec<(u64, Pending)>) -> Result<(), RpcError> {
        if self.shutdown.is_cancelled() {
            return Err(RpcError::Closed);
        }
        self.commands
            .send(Command::Send { frame, pending })
            .map_err(|_| connection_lost())
    }

    fn abandon(&self, ids: Vec<u64>) {
        if !ids.is_empty() {
            let _ = self.commands.send(Command::Abandon(ids));
        }
    }

    pub(super) fn forget(&self, subscription: String) {
        let _ = self.commands.send(Command::Forget(subscription));
    }

    /// One standalone request outside any batch.
    pub(super) async fn request(
        &self,
        method: &str,
        params: Vec<Value>,
        notifications: Option<mpsc::UnboundedSender<Value>>,
    ) -> Result<JsonRpcResponse, RpcError> {
        let id = self.next_id();
        let frame = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params: &params,
        })
        .map_err(|e| RpcError::Encode(e.to_string()))?;

        let (reply, response) = oneshot::channel();
        self.submit(frame, vec![(id, Pending { reply, notifications })])?;
        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(connection_lost()),
            Err(_) => {
                self.abandon(vec![id]);
                Err(RpcError::Transport(format!(
                    "no response to {method} within {:?}",
                    self.timeout
                )))
            }
        }
    }
}

/// JSON-RPC transport over one WebSocket connection.
///
/// A batch is written as one text frame (a bare object for one call, an
/// array otherwise) and its responses are matched by wire id as they
/// arrive. The same connection carries `eth_subscribe` notifications, see
/// [`subscribe`](Self::subscribe). There is no reconnect: once the socket
/// is gone every send fails with `Transport`, and after
/// [`close`](Self::close) with `Closed`.
pub struct WsTransport {
    shared: Arc<Shared>,
    url: String,
    session: TaskTracker,
    close_timeout: Duration,
}

impl WsTransport {
    pub fn builder() -> WsTransportBuilder {
        WsTransportBuilder {
            url: DEFAULT_URL.to_owned(),
            user: None,
            pass: None,
            origin: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: DEFAULT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the socket is gone, either closed locally or dropped by the
    /// server.
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled() || self.shared.commands.is_closed()
    }

    /// Subscribe with `eth_subscribe` to `kind` (`newHeads`, `logs`,
    /// `newPendingTransactions`, ...). `params` follow the kind, e.g. a log
    /// filter object.
    pub async fn subscribe(
        &self,
        kind: &str,
        params: Vec<Value>,
    ) -> Result<Subscription, RpcError> {
        let (notifications, items) = mpsc::unbounded_channel();
        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(Value::String(kind.to_owned()));
        all.extend(params);

        let response = self
            .shared
            .request("eth_subscribe", all, Some(notifications))
            .await?;
        if let Some(err) = response.error {
            return Err(parse_jsonrpc_error(err));
        }
        let id = response
            .result
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw.get()).ok())
            .filter(|id| !id.is_null())
            .ok_or_else(|| {
                RpcError::Decode("eth_subscribe returned no subscription id".to_owned())
            })?;

        debug!(subscription = %id, kind, "subscribed");
        Ok(Subscription::new(
            subscription_key(&id),
            kind.to_owned(),
            items,
            Arc::clone(&self.shared),
        ))
    }

    /// Close the socket and wait, bounded by the close timeout, for the
    /// session to end. Exchanges still waiting fail with `Transport`.
    pub async fn close(&self) -> Result<(), CoreError> {
        self.shared.shutdown.cancel();
        match tokio::time::timeout(self.close_timeout, self.session.wait()).await {
            Ok(()) => {
                info!(url = %self.url, "websocket connection closed");
                Ok(())
            }
            Err(_) => {
                warn!(timeout = ?self.close_timeout, "websocket session did not shut down in time");
                Err(CoreError::CloseTimeout(self.close_timeout))
            }
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.url)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, requests: &[CallRequest]) -> Result<Vec<Outcome>, RpcError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let mut wire = Vec::with_capacity(requests.len());
        let mut pending = Vec::with_capacity(requests.len());
        let mut waiting = FuturesUnordered::new();
        for request in requests {
            let id = self.shared.next_id();
            let (reply, response) = oneshot::channel();
            wire.push(JsonRpcRequest::with_id(id, request));
            pending.push((id, Pending { reply, notifications: None }));
            waiting.push(async move { (id, request, response.await) });
        }
        let frame = String::from_utf8(encode_requests(&wire)?)
            .map_err(|e| RpcError::Encode(e.to_string()))?;
        debug!(rpc.batch_size = requests.len(), url = %self.url, "websocket call");
        self.shared.submit(frame, pending)?;

        let mut outcomes = Vec::with_capacity(requests.len());
        let mut answered = HashSet::with_capacity(requests.len());
        let deadline = tokio::time::sleep(self.shared.timeout);
        tokio::pin!(deadline);
        let mut failure = None;
        loop {
            tokio::select! {
                next = waiting.next() => match next {
                    Some((id, request, Ok(response))) => {
                        answered.insert(id);
                        outcomes.push(convert_response(request, response));
                    }
                    // Keep draining: replies routed before the socket died are still valid.
                    Some((_, _, Err(_))) => {
                        if failure.is_none() {
                            failure = Some(connection_lost());
                        }
                    }
                    None => break,
                },
                () = &mut deadline => {
                    failure = Some(RpcError::Transport(format!(
                        "no response within {:?}",
                        self.shared.timeout
                    )));
                    break;
                }
            }
        }

        let Some(failure) = failure else {
            return Ok(outcomes);
        };
        if outcomes.is_empty() {
            warn!(error = %failure, "websocket exchange failed");
            self.shared.abandon(wire.iter().map(|request| request.id).collect());
            return Err(failure);
        }

        // Keep what arrived; fail the rest with the reason the wait ended.
        let mut abandoned = Vec::new();
        for (request, sent) in requests.iter().zip(&wire) {
            if !answered.contains(&sent.id) {
                abandoned.push(sent.id);
                outcomes.push(Outcome::failure(request.id(), failure.clone()));
            }
        }
        warn!(
            unanswered = abandoned.len(),
            error = %failure,
            "websocket exchange ended early"
        );
        self.shared.abandon(abandoned);
        Ok(outcomes)
    }
}

/// Configuration for [`WsTransport`].
pub struct WsTransportBuilder {
    url: String,
    user: Option<String>,
    pass: Option<String>,
    origin: Option<String>,
    connect_timeout: Duration,
    timeout: Duration,
    close_timeout: Duration,
}

impl WsTransportBuilder {
    /// Node URL. Defaults to `ws://127.0.0.1:8546`.
    pub fn connect_to(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// HTTP basic auth sent with the upgrade request.
    pub fn basic_auth(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.pass = Some(pass.into());
        self
    }

    /// `Origin` header for the upgrade request, e.g. `http://localhost`.
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Bound on the TCP connect plus the WebSocket handshake.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// How long one exchange or subscribe waits for its responses.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Upper bound on how long [`WsTransport::close`] waits. Defaults to 60s.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Open the connection. Unlike the HTTP and gateway transports this
    /// dials eagerly, so a bad address fails here.
    pub async fn connect(self) -> Result<WsTransport, CoreError> {
        let url = validate_ws_url(&self.url)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| CoreError::InvalidConfig(format!("websocket url `{url}`: {e}")))?;

        let headers = request.headers_mut();
        if let Some(origin) = &self.origin {
            let origin = HeaderValue::from_str(origin)
                .map_err(|e| CoreError::InvalidConfig(format!("origin `{origin}`: {e}")))?;
            headers.insert(header::ORIGIN, origin);
        }
        let creds = Credentials::resolve(self.user.as_deref(), self.pass.as_deref(), None)?;
        if let Some(creds) = creds {
            let token = STANDARD.encode(format!("{}:{}", creds.user, creds.pass));
            let value = HeaderValue::from_str(&format!("Basic {token}"))
                .map_err(|e| CoreError::InvalidConfig(format!("basic auth header: {e}")))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let (socket, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    RpcError::Transport(format!(
                        "websocket handshake with {url} timed out after {:?}",
                        self.connect_timeout
                    ))
                })?
                .map_err(|e| RpcError::Transport(format!("connect to {url}: {e}")))?;
        info!(url = %url, status = %response.status(), "websocket connected");

        let (commands, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let session = TaskTracker::new();
        session.spawn(session::run(socket, receiver, shutdown.clone()));
        session.close();

        Ok(WsTransport {
            shared: Arc::new(Shared {
                commands,
                next_id: AtomicU64::new(1),
                shutdown,
                timeout: self.timeout,
            }),
            url,
            session,
            close_timeout: self.close_timeout,
        })
    }
}

/// Accept only absolute ws(s) URLs.
fn validate_ws_url(url: &str) -> Result<String, CoreError> {
    let parsed = Url::parse(url).map_err(|e| {
        CoreError::InvalidConfig(format!("websocket url `{url}` is not a valid URL: {e}"))
    })?;
    if matches!(parsed.scheme(), "ws" | "wss") {
        Ok(url.to_owned())
    } else {
        Err(CoreError::InvalidConfig(format!(
            "websocket url `{url}` uses scheme `{}`; only ws and wss are supported",
            parsed.scheme()
        )))
    }
}
