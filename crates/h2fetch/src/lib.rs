//! h2fetch — a fetch-style HTTP/2 client.
//!
//! Requests go through three layers:
//!
//! - **[`FetchClient`]**: parses the URL, maps [`FetchOptions`] onto a
//!   request and wraps the settled headers in a [`Response`].
//! - **[`SessionPool`]**: keeps one multiplexed session per origin, pings it
//!   on a keep-alive cadence and tears it down when the transport reports
//!   close, goaway, error, frame error or timeout.
//! - **[`lifecycle::send`]**: opens a stream on the session, writes the
//!   request and waits for response headers under an optional watchdog.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use h2fetch::{FetchClient, FetchOptions};
//!
//! # async fn run() -> h2fetch::Result<()> {
//! let client = FetchClient::new()?;
//! let mut res = client
//!     .fetch(
//!         "https://example.com/json",
//!         FetchOptions::new().timeout(Duration::from_secs(5)),
//!     )
//!     .await?;
//! assert!(res.ok());
//! let value: serde_json::Value = res.json().await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod client;
pub mod config;
pub mod error;
pub mod header;
pub mod lifecycle;
pub mod origin;
pub mod pool;
pub mod response;
pub mod transport;

pub use body::{Body, BodyState, RequestBody};
pub use client::{FetchClient, FetchOptions, KeepAlive};
pub use config::{ClientConfig, EvictionPolicy};
pub use error::{FetchError, Result, TransportError};
pub use header::{Header, Headers};
pub use lifecycle::{PendingRequest, ResponseParts};
pub use origin::{IntoUrl, Origin, Scheme};
pub use pool::{Session, SessionPool};
pub use response::Response;
pub use transport::{Connector, H2Connector, SessionEvent, TlsConfig};

/// Stream close codes, as carried by [`FetchError::Timeout`].
pub use h2::Reason;
pub use url::Url;
