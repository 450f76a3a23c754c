use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use url::Url;

use crate::body::Body;
use crate::error::Result;
use crate::header::Headers;
use crate::lifecycle::ResponseParts;
use crate::pool::{Session, SessionPool};

/// A settled HTTP/2 response.
///
/// Status and headers are available immediately. The body is read once,
/// through one of [`buffer`](Response::buffer),
/// [`array_buffer`](Response::array_buffer), [`text`](Response::text),
/// [`json`](Response::json), or incrementally via [`body_mut`](Response::body_mut).
#[derive(Debug)]
pub struct Response {
    status: u16,
    ok: bool,
    headers: Headers,
    url: Url,
    body: Body,
    pool: SessionPool,
}

impl Response {
    pub(crate) fn new(parts: ResponseParts, url: Url, pool: SessionPool) -> Self {
        Self {
            ok: (200..=299).contains(&parts.status),
            status: parts.status,
            headers: parts.headers,
            url,
            body: parts.body,
            pool,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// `true` for a 2xx status.
    pub fn ok(&self) -> bool {
        self.ok
    }

    /// Canonical reason phrase for the status, or `"Unknown"`.
    pub fn status_text(&self) -> &'static str {
        http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unknown")
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The requested URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn session(&self) -> &Arc<Session> {
        self.body.session()
    }

    pub async fn buffer(&mut self) -> Result<Bytes> {
        self.body.buffer().await
    }

    pub async fn array_buffer(&mut self) -> Result<Vec<u8>> {
        Ok(self.body.buffer().await?.to_vec())
    }

    /// The body decoded as UTF-8. Invalid sequences are an error.
    pub async fn text(&mut self) -> Result<String> {
        let bytes = self.body.buffer().await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    /// The body parsed as JSON.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.body.buffer().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Close the stream without destroying it. The session stays pooled.
    pub fn close(&mut self) {
        self.body.close();
    }

    /// Destroy the stream and evict its session from the pool.
    pub fn destroy(&mut self) {
        self.body.destroy();
        self.pool.evict(self.body.session());
    }
}
