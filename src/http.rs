//! HTTP transport seam.
//!
//! The Azure driver only needs "send a request, get status, headers and a
//! byte body back". [`HttpSend`] captures exactly that so the driver can be
//! exercised against an in-process fake service; [`ReqwestHttpSend`] is the
//! pooled production transport.

use bytes::Bytes;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Future returned by [`HttpSend::http_send`].
pub type HttpFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<http::Response<Bytes>>> + Send + 'a>>;

/// Sends a fully built request and buffers the response body.
pub trait HttpSend: Debug + Send + Sync + 'static {
    /// Send `req` and return the response. Non-2xx statuses are returned
    /// as responses, not errors.
    fn http_send(&self, req: http::Request<Bytes>) -> HttpFuture<'_>;
}

/// [`HttpSend`] backed by a shared `reqwest::Client` connection pool.
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpSend {
    client: reqwest::Client,
}

impl ReqwestHttpSend {
    /// Wrap an existing client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build a client with the given per-request timeout.
    pub fn with_timeout(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

impl HttpSend for ReqwestHttpSend {
    fn http_send(&self, req: http::Request<Bytes>) -> HttpFuture<'_> {
        Box::pin(async move {
            let req = reqwest::Request::try_from(req)?;
            let resp = self.client.execute(req).await?;

            let mut builder = http::Response::builder().status(resp.status());
            if let Some(headers) = builder.headers_mut() {
                *headers = resp.headers().clone();
            }
            let body = resp.bytes().await?;
            Ok(builder.body(body)?)
        })
    }
}
