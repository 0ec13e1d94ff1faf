use std::collections::HashMap;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::super::jsonrpc::{parse_response_body, parse_response_id, JsonRpcResponse};

pub(super) type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A request waiting for its response frame.
pub(super) struct Pending {
    pub(super) reply: oneshot::Sender<JsonRpcResponse>,
    /// Set for `eth_subscribe`: where notifications go once the node
    /// confirms the subscription id.
    pub(super) notifications: Option<mpsc::UnboundedSender<Value>>,
}

pub(super) enum Command {
    /// Register the pending requests, then write `frame`.
    Send {
        frame: String,
        pending: Vec<(u64, Pending)>,
    },
    /// Stop waiting for these wire ids.
    Abandon(Vec<u64>),
    /// Stop routing notifications for this subscription.
    Forget(String),
}

#[derive(Deserialize)]
struct Notification {
    method: String,
    params: NotificationParams,
}

#[derive(Deserialize)]
struct NotificationParams {
    subscription: Value,
    result: Value,
}

/// Subscription ids are hex strings on every node we know of; anything
/// else is keyed by its JSON text.
pub(super) fn subscription_key(id: &Value) -> String {
    match id {
        Value::String(id) => id.clone(),
        other => other.to_string(),
    }
}

#[derive(Default)]
struct Routes {
    pending: HashMap<u64, Pending>,
    subscriptions: HashMap<String, mpsc::UnboundedSender<Value>>,
}

impl Routes {
    fn dispatch(&mut self, text: &str) {
        if let Ok(notification) = serde_json::from_str::<Notification>(text) {
            if notification.method == "eth_subscription" {
                self.notify(notification.params);
            } else {
                trace!(method = %notification.method, "ignoring server request");
            }
            return;
        }

        let responses = match parse_response_body(text.as_bytes()) {
            Ok(responses) => responses,
            Err(err) => {
                warn!(error = %err, "dropping unreadable websocket frame");
                return;
            }
        };
        for response in responses {
            let Some(pending) =
                parse_response_id(&response.id).and_then(|id| self.pending.remove(&id))
            else {
                warn!(rpc.id = %response.id, "dropping response with unknown id");
                continue;
            };
            if let Some(notifications) = pending.notifications {
                self.register(&response, notifications);
            }
            // The caller may have given up already.
            let _ = pending.reply.send(response);
        }
    }

    fn register(
        &mut self,
        response: &JsonRpcResponse,
        notifications: mpsc::UnboundedSender<Value>,
    ) {
        let id = response
            .result
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw.get()).ok())
            .filter(|id| !id.is_null());
        if let Some(id) = id {
            debug!(subscription = %id, "subscription registered");
            self.subscriptions.insert(subscription_key(&id), notifications);
        }
    }

    fn notify(&mut self, params: NotificationParams) {
        let key = subscription_key(&params.subscription);
        let Some(notifications) = self.subscriptions.get(&key) else {
            trace!(subscription = %key, "notification for unknown subscription");
            return;
        };
        if notifications.send(params.result).is_err() {
            self.subscriptions.remove(&key);
        }
    }
}

/// Own the socket until it fails, the server closes it, or `shutdown`
/// fires. Requests still pending when this returns fail on the caller side
/// because their reply senders are dropped.
pub(super) async fn run(
    socket: Socket,
    mut commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
) {
    let (mut sink, mut stream) = socket.split();
    let mut routes = Routes::default();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                if let Err(err) = sink.send(Message::Close(None)).await {
                    debug!(error = %err, "websocket close frame not sent");
                }
                break;
            }
            command = commands.recv() => match command {
                None => break,
                Some(Command::Send { frame, pending }) => {
                    routes.pending.extend(pending);
                    trace!(frame = %frame, "websocket send");
                    if let Err(err) = sink.send(Message::Text(frame)).await {
                        warn!(error = %err, "websocket send failed");
                        break;
                    }
                }
                Some(Command::Abandon(ids)) => {
                    for id in ids {
                        routes.pending.remove(&id);
                    }
                }
                Some(Command::Forget(id)) => {
                    routes.subscriptions.remove(&id);
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => routes.dispatch(text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "websocket closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "websocket receive failed");
                    break;
                }
                None => break,
            },
        }
    }

    debug!(
        pending = routes.pending.len(),
        subscriptions = routes.subscriptions.len(),
        "websocket session ended"
    );
}
