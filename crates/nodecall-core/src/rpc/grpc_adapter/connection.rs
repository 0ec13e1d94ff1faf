use std::net::Ipv6Addr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::{ClientTlsConfig, Endpoint};
use tracing::{debug, info, warn};

use crate::error::CoreError;

use super::channel::{NativeCallChannel, TonicChannel};
use super::proto::Chain;
use super::transport::GrpcTransport;

const DEFAULT_PORT: u16 = 9001;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(60);

/// State shared by a connection and every transport derived from it.
pub(super) struct Shared {
    channel: RwLock<Option<Arc<dyn NativeCallChannel>>>,
    pub(super) shutdown: CancellationToken,
    pub(super) exchanges: TaskTracker,
}

impl Shared {
    /// The live channel, or `None` once the connection was closed.
    pub(super) fn channel(&self) -> Option<Arc<dyn NativeCallChannel>> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        self.channel.read().ok().and_then(|guard| guard.clone())
    }
}

/// Owner of a gateway connection.
///
/// Hands out [`GrpcTransport`]s that share the connection. Only the owner
/// can close it: closing fails new sends with `Closed`, terminates exchanges
/// still in flight and waits for them to wind down.
pub struct GrpcConnection {
    shared: Arc<Shared>,
    chain: Chain,
    close_timeout: Duration,
}

impl GrpcConnection {
    pub fn builder() -> GrpcConnectionBuilder {
        GrpcConnectionBuilder {
            target: None,
            chain: Chain::Unspecified,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            channel: None,
        }
    }

    /// A transport for the configured chain with no selector.
    pub fn transport(&self) -> GrpcTransport {
        GrpcTransport::new(Arc::clone(&self.shared), self.chain, None)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Shut the connection down and wait, bounded by the close timeout, for
    /// in-flight exchanges to finish.
    pub async fn close(self) -> Result<(), CoreError> {
        debug!(in_flight = self.shared.exchanges.len(), "closing gateway connection");
        self.shared.shutdown.cancel();
        if let Ok(mut channel) = self.shared.channel.write() {
            channel.take();
        }
        self.shared.exchanges.close();

        match tokio::time::timeout(self.close_timeout, self.shared.exchanges.wait()).await {
            Ok(()) => {
                info!("gateway connection closed");
                Ok(())
            }
            Err(_) => {
                warn!(timeout = ?self.close_timeout, "gateway connection did not shut down in time");
                Err(CoreError::CloseTimeout(self.close_timeout))
            }
        }
    }
}

impl std::fmt::Debug for GrpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcConnection")
            .field("chain", &self.chain)
            .field("closed", &self.is_closed())
            .field("close_timeout", &self.close_timeout)
            .finish()
    }
}

/// Configuration for [`GrpcConnection`].
pub struct GrpcConnectionBuilder {
    target: Option<String>,
    chain: Chain,
    connect_timeout: Duration,
    close_timeout: Duration,
    channel: Option<Arc<dyn NativeCallChannel>>,
}

impl GrpcConnectionBuilder {
    /// Gateway address as `host[:port]` (port defaults to 9001) or a full
    /// `http://`/`https://` URI.
    pub fn connect_to(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Chain used by transports obtained from [`GrpcConnection::transport`].
    pub fn chain(mut self, chain: Chain) -> Self {
        self.chain = chain;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Upper bound on how long [`GrpcConnection::close`] waits. Defaults to 60s.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Use an existing channel instead of dialing `connect_to`.
    pub fn channel(mut self, channel: Arc<dyn NativeCallChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Build the connection. Dialing is lazy: the first exchange connects.
    ///
    /// Must run inside a Tokio runtime unless a channel was injected.
    pub fn build(self) -> Result<GrpcConnection, CoreError> {
        let channel = match (self.channel, self.target) {
            (Some(channel), _) => channel,
            (None, Some(target)) => {
                let uri = parse_target(&target)?;
                let invalid = |e: tonic::transport::Error| {
                    CoreError::InvalidConfig(format!("invalid gateway address `{uri}`: {e}"))
                };
                let mut endpoint = Endpoint::from_shared(uri.clone())
                    .map_err(invalid)?
                    .connect_timeout(self.connect_timeout);
                if uri.starts_with("https://") {
                    endpoint = endpoint
                        .tls_config(ClientTlsConfig::new().with_webpki_roots())
                        .map_err(invalid)?;
                }
                debug!(gateway = %uri, "configured gateway channel");
                Arc::new(TonicChannel::new(endpoint.connect_lazy()))
            }
            (None, None) => {
                return Err(CoreError::InvalidConfig(
                    "gateway address or channel is required".to_owned(),
                ))
            }
        };

        Ok(GrpcConnection {
            shared: Arc::new(Shared {
                channel: RwLock::new(Some(channel)),
                shutdown: CancellationToken::new(),
                exchanges: TaskTracker::new(),
            }),
            chain: self.chain,
            close_timeout: self.close_timeout,
        })
    }
}

/// Normalize a gateway address into an `http(s)://host:port` URI.
fn parse_target(target: &str) -> Result<String, CoreError> {
    let target = target.trim();
    if target.contains("://") {
        return match target.split_once("://") {
            Some(("http" | "https", rest)) if !rest.is_empty() => Ok(target.to_owned()),
            _ => Err(CoreError::InvalidConfig(format!(
                "unsupported gateway address `{target}`; expected host[:port] or http(s) URI"
            ))),
        };
    }

    // A bare IPv6 address has several colons and no brackets.
    if !target.starts_with('[') && target.matches(':').count() > 1 {
        return match target.parse::<Ipv6Addr>() {
            Ok(addr) => Ok(format!("http://[{addr}]:{DEFAULT_PORT}")),
            Err(_) => Err(CoreError::InvalidConfig(format!(
                "invalid gateway host in `{target}`; bracket IPv6 addresses that carry a port"
            ))),
        };
    }

    let (host, port) = match target.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => (host, Some(port)),
        _ => (target, None),
    };
    if host.is_empty() || host.contains('/') {
        return Err(CoreError::InvalidConfig(format!(
            "invalid gateway host in `{target}`"
        )));
    }

    let port = port.map_or(DEFAULT_PORT.to_string(), str::to_owned);
    Ok(format!("http://{host}:{port}"))
}
