//! Signed request plumbing for the Blob service.
//!
//! [`BlobClient`] turns a [`RequestDescriptor`] into a fully signed
//! `http::Request`, sends it through the configured [`HttpSend`] and hands
//! back the raw response.  Status interpretation is left to callers since
//! what a 404 means differs per operation.

use bytes::Bytes;
use http::{Method, StatusCode, Uri};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

use super::path::{encode_component, encode_path};
use super::signer::RequestSigner;
use crate::http::HttpSend;
use crate::metrics;

/// One Blob service call before signing.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Unencoded blob name inside the container. Empty for container calls.
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Bytes,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.insert(name.to_string(), value.into());
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }
}

/// Blob service client bound to one container.
#[derive(Debug)]
pub struct BlobClient {
    transport: Arc<dyn HttpSend>,
    signer: RequestSigner,
    /// `scheme://authority` plus any endpoint path, no trailing slash.
    base_url: String,
    /// Endpoint path component, empty for the default endpoint.
    base_path: String,
    container: String,
    api_version: String,
}

impl BlobClient {
    pub fn new(
        transport: Arc<dyn HttpSend>,
        signer: RequestSigner,
        endpoint: &str,
        container: impl Into<String>,
        api_version: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let uri: Uri = endpoint
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid endpoint '{}': {}", endpoint, e))?;
        let base_path = uri.path().trim_end_matches('/').to_string();

        Ok(Self {
            transport,
            signer,
            base_url: endpoint.trim_end_matches('/').to_string(),
            base_path,
            container: container.into(),
            api_version: api_version.into(),
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Encoded URL path of `blob`, or of the container when `blob` is empty.
    pub fn url_path(&self, blob: &str) -> String {
        if blob.is_empty() {
            format!("{}/{}", self.base_path, self.container)
        } else {
            format!("{}/{}/{}", self.base_path, self.container, encode_path(blob))
        }
    }

    /// Absolute URL of `blob`.
    pub fn blob_url(&self, blob: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.container, encode_path(blob))
    }

    /// Add the version, date and length headers, sign, and send.
    pub async fn send(&self, mut desc: RequestDescriptor) -> anyhow::Result<http::Response<Bytes>> {
        desc.headers
            .insert("x-ms-version".to_string(), self.api_version.clone());
        desc.headers.insert(
            "x-ms-date".to_string(),
            httpdate::fmt_http_date(SystemTime::now()),
        );
        desc.headers
            .insert("content-length".to_string(), desc.body.len().to_string());

        let path = self.url_path(&desc.path);
        let authorization = self
            .signer
            .authorization(&desc.method, &path, &desc.headers, &desc.query);

        let mut url = format!("{}/{}", self.base_url, self.container);
        if !desc.path.is_empty() {
            url.push('/');
            url.push_str(&encode_path(&desc.path));
        }
        if !desc.query.is_empty() {
            let query = desc
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", k, encode_component(v)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query);
        }

        let mut builder = http::Request::builder()
            .method(desc.method.clone())
            .uri(&url);
        for (name, value) in &desc.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let req = builder
            .header(http::header::AUTHORIZATION, authorization)
            .body(desc.body)
            .map_err(|e| anyhow::anyhow!("Failed to build request for {}: {}", url, e))?;

        let resp = self
            .transport
            .http_send(req)
            .await
            .map_err(|e| anyhow::anyhow!("Azure {} {} failed: {:#}", desc.method, url, e))?;

        debug!(
            "Azure {} {} -> {}",
            desc.method,
            path,
            resp.status().as_u16()
        );
        metrics::record_request(&desc.method, resp.status().as_u16());

        Ok(resp)
    }
}

/// Map an Azure HTTP error to an anyhow error with context.
pub fn status_error(context: &str, resp: &http::Response<Bytes>) -> anyhow::Error {
    anyhow::anyhow!(
        "Azure {}: HTTP {} - {}",
        context,
        resp.status(),
        String::from_utf8_lossy(resp.body())
    )
}

pub fn is_not_found(resp: &http::Response<Bytes>) -> bool {
    resp.status() == StatusCode::NOT_FOUND
}

/// Header value as a string, if present and valid UTF-8.
pub fn header_str<'a>(resp: &'a http::Response<Bytes>, name: &str) -> Option<&'a str> {
    resp.headers().get(name).and_then(|v| v.to_str().ok())
}
