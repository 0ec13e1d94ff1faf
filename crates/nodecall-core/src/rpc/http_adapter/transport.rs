use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header;
use tracing::{debug, trace, warn};

use crate::error::{CoreError, RpcError};
use crate::types::{CallRequest, Outcome};

use super::super::jsonrpc::{
    convert_response, encode_request_body, parse_response_body, parse_response_id,
};
use super::super::Transport;
use super::connection::{validate_url, Credentials};

const DEFAULT_URL: &str = "http://127.0.0.1:8545";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// JSON-RPC transport over HTTP(S).
///
/// Each batch is one POST request: a single call is sent as a bare JSON-RPC
/// object, two or more as an array. The underlying `reqwest::Client` pools
/// connections and is shared by concurrently executing batches.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    auth: Option<Credentials>,
    limiter: Option<DirectRateLimiter>,
}

impl HttpTransport {
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder {
            url: DEFAULT_URL.to_owned(),
            user: None,
            pass: None,
            cookie_file: None,
            requests_per_second: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: DEFAULT_TIMEOUT,
            client: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn post(&self, body: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(creds) = &self.auth {
            builder = builder.basic_auth(&creds.user, Some(&creds.pass));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            debug!(%status, "rpc request rejected");
            return Err(RpcError::Transport(format!(
                "server returned error response: {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        debug!(%status, body_len = body.len(), "rpc response");
        trace!(body = %String::from_utf8_lossy(&body), "rpc response body");
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, requests: &[CallRequest]) -> Result<Vec<Outcome>, RpcError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let by_id: HashMap<u32, &CallRequest> = requests.iter().map(|r| (r.id(), r)).collect();
        let body = encode_request_body(requests)?;

        self.wait_for_rate_limit().await;
        debug!(
            rpc.batch_size = requests.len(),
            body_len = body.len(),
            url = %self.url,
            "rpc call"
        );
        let body = self.post(body).await?;

        let outcomes = parse_response_body(&body)?
            .into_iter()
            .filter_map(|response| {
                let Some(request) = parse_response_id(&response.id)
                    .and_then(|id| u32::try_from(id).ok())
                    .and_then(|id| by_id.get(&id))
                else {
                    warn!(rpc.id = %response.id, "dropping response with unknown id");
                    return None;
                };
                Some(convert_response(request, response))
            })
            .collect();
        Ok(outcomes)
    }
}

/// Configuration for [`HttpTransport`].
pub struct HttpTransportBuilder {
    url: String,
    user: Option<String>,
    pass: Option<String>,
    cookie_file: Option<PathBuf>,
    requests_per_second: Option<u32>,
    connect_timeout: Duration,
    timeout: Duration,
    client: Option<reqwest::Client>,
}

impl HttpTransportBuilder {
    /// Node URL. Defaults to `http://127.0.0.1:8545`.
    pub fn connect_to(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// HTTP basic auth credentials. Take precedence over a cookie file.
    pub fn basic_auth(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.pass = Some(pass.into());
        self
    }

    /// Read `username:password` credentials from the first line of a file.
    pub fn cookie_file(mut self, path: impl AsRef<Path>) -> Self {
        self.cookie_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Limit outbound HTTP requests. A batch counts as one request.
    pub fn requests_per_second(mut self, limit: u32) -> Self {
        self.requests_per_second = Some(limit);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a preconfigured client instead of building one. Timeouts set on
    /// this builder are ignored in that case.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Result<HttpTransport, CoreError> {
        let url = validate_url(&self.url)?;
        let auth = Credentials::resolve(
            self.user.as_deref(),
            self.pass.as_deref(),
            self.cookie_file.as_deref(),
        )?;

        let limiter = match self.requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::InvalidConfig("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        let client = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .connect_timeout(self.connect_timeout)
                .timeout(self.timeout)
                .pool_max_idle_per_host(32)
                .tcp_nodelay(true)
                .build()
                .map_err(|e| CoreError::InvalidConfig(format!("build HTTP client: {e}")))?,
        };

        Ok(HttpTransport {
            client,
            url,
            auth,
            limiter,
        })
    }
}
