//! The fetch entry point.

use std::sync::Arc;
use std::time::Duration;

use h2::Reason;
use tokio::time::Instant;
use tracing::debug;

use crate::body::RequestBody;
use crate::config::ClientConfig;
use crate::error::{FetchError, Result};
use crate::header::Headers;
use crate::lifecycle::{self, PendingRequest};
use crate::origin::{IntoUrl, Origin, path_and_query};
use crate::pool::SessionPool;
use crate::response::Response;
use crate::transport::{Connector, H2Connector};

/// Keep-alive choice for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeepAlive {
    /// Pool the session and ping it at the configured cadence.
    #[default]
    Enabled,
    /// Destroy the stream and release the session once the body ends.
    Disabled,
    /// Pool the session and ping at this cadence. Zero pools without pings.
    Interval(Duration),
}

impl KeepAlive {
    fn cadence(self, default: Duration) -> Option<Duration> {
        match self {
            KeepAlive::Enabled => Some(default),
            KeepAlive::Disabled => None,
            KeepAlive::Interval(every) => Some(every),
        }
    }
}

impl From<bool> for KeepAlive {
    fn from(enabled: bool) -> Self {
        if enabled {
            KeepAlive::Enabled
        } else {
            KeepAlive::Disabled
        }
    }
}

impl From<Duration> for KeepAlive {
    fn from(every: Duration) -> Self {
        KeepAlive::Interval(every)
    }
}

/// Per-request options for [`FetchClient::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    method: Option<String>,
    headers: Headers,
    body: Option<RequestBody>,
    keep_alive: KeepAlive,
    timeout: Option<Duration>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request method; `GET` when unset.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Append a header value. Repeat the call for multi-valued headers.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Accepts a [`KeepAlive`], a `bool` or a ping cadence `Duration`.
    pub fn keep_alive(mut self, keep_alive: impl Into<KeepAlive>) -> Self {
        self.keep_alive = keep_alive.into();
        self
    }

    /// Bound on waiting for response headers, session acquisition included.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP/2 client backed by a [`SessionPool`].
///
/// Each client owns its pool; clones share it. Sessions and their background
/// tasks live on the tokio runtime that created them.
#[derive(Debug, Clone)]
pub struct FetchClient {
    pool: SessionPool,
    config: Arc<ClientConfig>,
}

impl FetchClient {
    /// Client with default configuration over TCP/TLS.
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let connector = H2Connector::new(&config).map_err(FetchError::Network)?;
        Ok(Self::with_connector(Arc::new(connector), config))
    }

    /// Client over a caller-supplied transport.
    pub fn with_connector(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        Self {
            pool: SessionPool::new(connector, &config),
            config: Arc::new(config),
        }
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Close every pooled session.
    pub fn shutdown(&self) {
        self.pool.close_all();
    }

    /// `GET` with default options.
    pub async fn get(&self, url: impl IntoUrl) -> Result<Response> {
        self.fetch(url, FetchOptions::default()).await
    }

    /// Send a request and wait for its response headers.
    ///
    /// Fails with [`FetchError::Network`] when no session can be opened,
    /// [`FetchError::Timeout`] when the timeout elapses first, and
    /// [`FetchError::Protocol`] for a malformed status.
    pub async fn fetch(&self, url: impl IntoUrl, options: FetchOptions) -> Result<Response> {
        let url = url.into_url()?;
        let origin = Origin::from_url(&url)?;
        let FetchOptions {
            method,
            mut headers,
            body,
            keep_alive,
            timeout,
        } = options;

        let deadline = timeout.map(|after| Instant::now() + after);
        let cadence = keep_alive.cadence(self.config.keep_alive_interval);
        let acquire = self.pool.acquire(&origin, cadence);
        let session = match timeout.zip(deadline) {
            Some((after, at)) => tokio::time::timeout_at(at, acquire)
                .await
                .map_err(|_| FetchError::Timeout {
                    after,
                    code: Reason::CANCEL,
                })??,
            None => acquire.await?,
        };

        if let Some(user_agent) = &self.config.user_agent {
            if !headers.contains("user-agent") {
                headers.insert("user-agent", user_agent.clone());
            }
        }

        let request = PendingRequest {
            method: method.unwrap_or_else(|| "GET".to_string()),
            path: path_and_query(&url),
            headers,
            body,
            timeout,
            deadline,
        };
        let mut parts = lifecycle::send(&session, request).await?;

        if keep_alive == KeepAlive::Disabled {
            parts.body.release_on_end(self.pool.clone(), self.config.eviction);
        }

        debug!(
            url = %url,
            session_id = session.id(),
            status = parts.status,
            "fetch settled"
        );
        Ok(Response::new(parts, url, self.pool.clone()))
    }
}
