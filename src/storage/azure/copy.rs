//! Server-side copy with status polling.
//!
//! `Copy Blob` may complete synchronously or return `x-ms-copy-status:
//! pending`, in which case the destination is polled with `HEAD` until the
//! copy settles or the attempt budget runs out.

use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::client::{header_str, BlobClient, RequestDescriptor};
use super::signer::COPY_SOURCE_HEADER;
use crate::errors::CopyFailure;
use crate::metrics;

const COPY_STATUS_HEADER: &str = "x-ms-copy-status";
const COPY_DESCRIPTION_HEADER: &str = "x-ms-copy-status-description";

/// Lifecycle of a server-side copy.
///
/// `Initiated` and `TimedOut` are local states; the others are reported by
/// `x-ms-copy-status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStatus {
    Initiated,
    Pending,
    Success,
    Failed(String),
    Aborted(String),
    TimedOut,
}

impl CopyStatus {
    /// Interpret the copy status headers of `resp`. A response without a
    /// status header describes a copy that finished synchronously.
    pub fn from_response(resp: &http::Response<bytes::Bytes>) -> Result<Self, CopyFailure> {
        let description = header_str(resp, COPY_DESCRIPTION_HEADER)
            .unwrap_or_default()
            .to_string();

        match header_str(resp, COPY_STATUS_HEADER).map(str::to_ascii_lowercase) {
            None => Ok(CopyStatus::Success),
            Some(status) => match status.as_str() {
                "success" => Ok(CopyStatus::Success),
                "pending" => Ok(CopyStatus::Pending),
                "failed" => Ok(CopyStatus::Failed(description)),
                "aborted" => Ok(CopyStatus::Aborted(description)),
                other => Err(CopyFailure::UnexpectedStatus {
                    status: resp.status().as_u16(),
                    body: format!("unknown copy status '{}'", other),
                }),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CopyStatus::Initiated | CopyStatus::Pending)
    }
}

/// One copy from `source` to `destination`, tracked until it settles.
///
/// Once terminal, later transitions are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOperation {
    source: String,
    destination: String,
    status: CopyStatus,
    polls: u32,
}

impl CopyOperation {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            status: CopyStatus::Initiated,
            polls: 0,
        }
    }

    /// Apply the status returned by the copy request itself.
    pub fn accepted(&mut self, status: CopyStatus) {
        if self.status == CopyStatus::Initiated {
            self.status = status;
        }
    }

    /// Record the result of one status check.
    pub fn observe(&mut self, status: CopyStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.polls += 1;
        self.status = status;
    }

    /// Give up on a copy that has not settled.
    pub fn expire(&mut self) {
        if !self.status.is_terminal() {
            self.status = CopyStatus::TimedOut;
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn status(&self) -> &CopyStatus {
        &self.status
    }

    /// Description reported with a failed or aborted copy.
    pub fn description(&self) -> Option<&str> {
        match &self.status {
            CopyStatus::Failed(d) | CopyStatus::Aborted(d) => Some(d),
            _ => None,
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Terminal outcome. A copy that never settled counts as timed out.
    pub fn outcome(self) -> Result<(), CopyFailure> {
        match self.status {
            CopyStatus::Success => Ok(()),
            CopyStatus::Failed(description) => Err(CopyFailure::Failed { description }),
            CopyStatus::Aborted(description) => Err(CopyFailure::Aborted { description }),
            CopyStatus::Initiated | CopyStatus::Pending | CopyStatus::TimedOut => {
                Err(CopyFailure::TimedOut {
                    attempts: self.polls,
                })
            }
        }
    }
}

/// Issues server-side copies and waits for them to settle.
#[derive(Debug, Clone)]
pub struct CopyOrchestrator {
    client: Arc<BlobClient>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl CopyOrchestrator {
    pub fn new(client: Arc<BlobClient>, poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            client,
            poll_interval,
            max_attempts,
        }
    }

    /// Copy blob `source` over blob `destination` in the same container.
    pub async fn copy(&self, source: &str, destination: &str) -> Result<(), CopyFailure> {
        let source_url = self.client.blob_url(source);
        let desc = RequestDescriptor::new(Method::PUT, destination)
            .header(COPY_SOURCE_HEADER, source_url);

        let resp = self
            .client
            .send(desc)
            .await
            .map_err(CopyFailure::Transport)?;
        if !matches!(
            resp.status(),
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED
        ) {
            return Err(CopyFailure::UnexpectedStatus {
                status: resp.status().as_u16(),
                body: String::from_utf8_lossy(resp.body()).to_string(),
            });
        }

        let mut operation = CopyOperation::new(source, destination);
        operation.accepted(CopyStatus::from_response(&resp)?);
        debug!(
            "Azure copy {} -> {} started: {:?}",
            operation.source(),
            operation.destination(),
            operation.status()
        );

        while !operation.status().is_terminal() && operation.polls() < self.max_attempts {
            tokio::time::sleep(self.poll_interval).await;
            metrics::record_copy_poll();
            match self.poll(destination).await {
                Ok(status) => operation.observe(status),
                Err(e) => {
                    warn!(
                        "Azure copy {} -> {} status check failed: {}",
                        source, destination, e
                    );
                    return Err(e);
                }
            }
        }
        operation.expire();

        debug!(
            "Azure copy {} -> {} finished after {} checks: {:?}",
            operation.source(),
            operation.destination(),
            operation.polls(),
            operation.status()
        );
        operation.outcome()
    }

    async fn poll(&self, destination: &str) -> Result<CopyStatus, CopyFailure> {
        let resp = self
            .client
            .send(RequestDescriptor::new(Method::HEAD, destination))
            .await
            .map_err(CopyFailure::Transport)?;
        if !resp.status().is_success() {
            return Err(CopyFailure::UnexpectedStatus {
                status: resp.status().as_u16(),
                body: String::from_utf8_lossy(resp.body()).to_string(),
            });
        }
        CopyStatus::from_response(&resp)
    }
}
