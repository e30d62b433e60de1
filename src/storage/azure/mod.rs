//! Azure Blob Storage filesystem driver.
//!
//! Maps the [`Filesystem`] operations onto the Blob service REST API of a
//! single container.  Requests are authenticated with Shared Key; temporary
//! URLs are service SAS tokens.  Directories do not exist in the service:
//! they are emulated by prefixes plus an optional marker blob whose name
//! ends in `/`.
//!
//! Every logical path is stored under the configured prefix, so several
//! filesystems can share one container.

pub mod client;
pub mod copy;
pub mod credential;
pub mod listing;
pub mod path;
pub mod sas;
pub mod signer;

#[cfg(test)]
pub(crate) mod mock;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use http::Method;
use md5::{Digest, Md5};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use self::client::{header_str, is_not_found, status_error, BlobClient, RequestDescriptor};
use self::copy::CopyOrchestrator;
use self::credential::Credentials;
use self::listing::{parse_http_date, ListingPaginator};
use self::path::encode_path;
use self::sas::SasTokenGenerator;
use self::signer::RequestSigner;
use super::backend::{
    names_directory, ByteReader, FileAttributes, Filesystem, FsFuture, ListingStream,
    ResponseOverrides, Visibility, WriteOptions,
};
use crate::config::AzureConfig;
use crate::errors::{FsError, FsResult, MetadataFailure};
use crate::http::{HttpSend, ReqwestHttpSend};
use crate::metrics;
use crate::mime;

/// Body of the marker blob that materializes an empty directory.
const DIRECTORY_MARKER_BODY: &[u8] = b" ";

/// Filesystem backed by one Azure Blob Storage container.
#[derive(Debug)]
pub struct AzureBlobFilesystem {
    client: Arc<BlobClient>,
    sas: SasTokenGenerator,
    copier: CopyOrchestrator,
    /// Prefix inside the container, empty or ending in `/`.
    root: String,
    /// Base URL for `get_url`, without a trailing slash.
    public_url: Option<String>,
    truncate_listing_on_error: bool,
}

impl AzureBlobFilesystem {
    /// Create a driver talking to the service over HTTPS.
    pub fn new(config: &AzureConfig) -> FsResult<Self> {
        let transport =
            ReqwestHttpSend::with_timeout(Duration::from_secs(config.request_timeout_secs))
                .map_err(|e| FsError::config(format!("{:#}", e)))?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a driver that sends its requests through `transport`.
    pub fn with_transport(config: &AzureConfig, transport: Arc<dyn HttpSend>) -> FsResult<Self> {
        if config.container.is_empty() {
            return Err(FsError::config("storage.azure.container is required"));
        }
        let credentials = Credentials::new(config.account.clone(), &config.key)?;
        let endpoint = config.endpoint_url();

        let client = BlobClient::new(
            transport,
            RequestSigner::new(credentials.clone()),
            &endpoint,
            config.container.clone(),
            config.api_version.clone(),
        )
        .map_err(|e| FsError::config(format!("{:#}", e)))?;
        let client = Arc::new(client);

        let copier = CopyOrchestrator::new(
            client.clone(),
            Duration::from_millis(config.copy_poll_interval_ms),
            config.copy_poll_attempts,
        );

        let prefix = config.prefix.trim_matches('/');
        let root = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };
        let public_url = Some(config.public_url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .map(str::to_string);

        info!(
            "Azure filesystem: container={} endpoint={} prefix='{}'",
            config.container, endpoint, root
        );

        Ok(Self {
            client,
            sas: SasTokenGenerator::new(credentials, config.api_version.clone()),
            copier,
            root,
            public_url,
            truncate_listing_on_error: config.truncate_listing_on_error,
        })
    }

    /// Blob name for a logical file path.
    fn blob_name(&self, path: &str) -> String {
        format!("{}{}", self.root, path.trim_start_matches('/'))
    }

    /// Marker blob name for a logical directory path.
    fn directory_marker(&self, path: &str) -> String {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            self.root.clone()
        } else {
            format!("{}{}/", self.root, trimmed)
        }
    }

    fn paginator(&self, path: &str, recursive: bool) -> ListingPaginator {
        ListingPaginator::new(self.client.clone(), self.root.clone(), path, recursive)
    }

    // ── Blob primitives ────────────────────────────────────────────

    async fn azure_exists(&self, blob: &str) -> anyhow::Result<bool> {
        let resp = self
            .client
            .send(RequestDescriptor::new(Method::HEAD, blob))
            .await?;
        if resp.status().is_success() {
            Ok(true)
        } else if is_not_found(&resp) {
            Ok(false)
        } else {
            Err(status_error("head blob", &resp))
        }
    }

    /// `None` when the blob does not exist.
    async fn azure_download(&self, blob: &str) -> anyhow::Result<Option<Bytes>> {
        let resp = self
            .client
            .send(RequestDescriptor::new(Method::GET, blob))
            .await?;
        if is_not_found(&resp) {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(status_error("get blob", &resp));
        }
        let data = resp.into_body();
        metrics::record_bytes_read(data.len());
        Ok(Some(data))
    }

    async fn azure_upload(
        &self,
        blob: &str,
        data: Bytes,
        content_type: &str,
        cache_control: Option<&str>,
    ) -> anyhow::Result<()> {
        let content_md5 = BASE64_STANDARD.encode(Md5::digest(&data));
        let len = data.len();

        let mut desc = RequestDescriptor::new(Method::PUT, blob)
            .header("x-ms-blob-type", "BlockBlob")
            .header("content-type", content_type)
            .header("content-md5", content_md5)
            .body(data);
        if let Some(cache_control) = cache_control {
            desc = desc.header("x-ms-blob-cache-control", cache_control);
        }

        let resp = self.client.send(desc).await?;
        if !resp.status().is_success() {
            return Err(status_error("put blob", &resp));
        }
        metrics::record_bytes_written(len);
        Ok(())
    }

    /// Delete `blob`, treating a missing blob as already deleted.
    async fn azure_delete(&self, blob: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .send(RequestDescriptor::new(Method::DELETE, blob))
            .await?;
        if resp.status().is_success() || is_not_found(&resp) {
            Ok(())
        } else {
            Err(status_error("delete blob", &resp))
        }
    }

    /// `None` when the blob does not exist.
    async fn azure_properties(&self, path: &str) -> anyhow::Result<Option<FileAttributes>> {
        let resp = self
            .client
            .send(RequestDescriptor::new(Method::HEAD, self.blob_name(path)))
            .await?;
        if is_not_found(&resp) {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(status_error("get blob properties", &resp));
        }

        Ok(Some(FileAttributes {
            path: path.to_string(),
            file_size: header_str(&resp, "content-length").and_then(|v| v.parse().ok()),
            mime_type: header_str(&resp, "content-type")
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            last_modified: header_str(&resp, "last-modified").and_then(parse_http_date),
        }))
    }

    async fn azure_directory_exists(&self, path: &str) -> anyhow::Result<bool> {
        let page = self
            .paginator(path, true)
            .page_size(1)
            .fetch_page(None)
            .await?;
        Ok(!page.items.is_empty())
    }

    // ── Filesystem operations ──────────────────────────────────────

    async fn do_write(&self, path: &str, contents: Bytes, options: &WriteOptions) -> FsResult<()> {
        let blob = self.blob_name(path);
        let content_type = options
            .mime_type
            .clone()
            .or_else(|| mime::detect(path, &contents))
            .unwrap_or_else(|| mime::DEFAULT_MIME_TYPE.to_string());

        debug!(
            "Azure write: container={} blob={} bytes={} type={}",
            self.client.container(),
            blob,
            contents.len(),
            content_type
        );

        self.azure_upload(&blob, contents, &content_type, options.cache_control.as_deref())
            .await
            .map_err(|source| FsError::Write {
                path: path.to_string(),
                source,
            })
    }

    async fn do_read(&self, path: &str) -> FsResult<Bytes> {
        let blob = self.blob_name(path);
        debug!("Azure read: container={} blob={}", self.client.container(), blob);

        match self.azure_download(&blob).await {
            Ok(Some(data)) => Ok(data),
            Ok(None) => Err(FsError::ReadNotFound {
                path: path.to_string(),
            }),
            Err(source) => Err(FsError::Read {
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn do_copy(&self, source: &str, destination: &str) -> FsResult<()> {
        let (source_blob, destination_blob) = (self.blob_name(source), self.blob_name(destination));
        debug!(
            "Azure copy: container={} {} -> {}",
            self.client.container(),
            source_blob,
            destination_blob
        );

        self.copier
            .copy(&source_blob, &destination_blob)
            .await
            .map_err(|reason| FsError::Copy {
                source_path: source.to_string(),
                destination: destination.to_string(),
                reason,
            })
    }

    async fn do_move(&self, source: &str, destination: &str) -> FsResult<()> {
        let wrap = |err: FsError| FsError::Move {
            source_path: source.to_string(),
            destination: destination.to_string(),
            source: Box::new(err),
        };

        self.do_copy(source, destination).await.map_err(wrap)?;
        self.azure_delete(&self.blob_name(source))
            .await
            .map_err(|e| {
                wrap(FsError::Delete {
                    path: source.to_string(),
                    source: e,
                })
            })
    }

    async fn do_delete_directory(&self, path: &str) -> FsResult<()> {
        let directory_error = |source: anyhow::Error| FsError::Directory {
            operation: "delete",
            path: path.to_string(),
            source,
        };

        let mut entries = self.paginator(path, true).into_stream();
        let mut deleted = 0usize;
        while let Some(entry) = entries.next().await {
            let entry = entry.map_err(|e| directory_error(anyhow::Error::new(e)))?;
            let blob = if entry.is_dir() {
                self.directory_marker(&entry.path)
            } else {
                self.blob_name(&entry.path)
            };
            self.azure_delete(&blob).await.map_err(directory_error)?;
            deleted += 1;
        }

        // The root of an unprefixed container has no marker blob.
        let marker = self.directory_marker(path);
        if !marker.is_empty() {
            self.azure_delete(&marker).await.map_err(directory_error)?;
        }

        debug!(
            "Azure delete directory: container={} path={} objects={}",
            self.client.container(),
            path,
            deleted
        );
        Ok(())
    }

    async fn attributes(&self, path: &str, attribute: &'static str) -> FsResult<FileAttributes> {
        let metadata_error = |reason: MetadataFailure| FsError::Metadata {
            path: path.to_string(),
            attribute,
            reason,
        };

        let properties = if names_directory(path) {
            Ok(None)
        } else {
            self.azure_properties(path).await
        };
        match properties {
            Ok(Some(attributes)) => Ok(attributes),
            Ok(None) => match self.azure_directory_exists(path).await {
                Ok(true) => Err(metadata_error(MetadataFailure::IsDirectory)),
                Ok(false) => Err(metadata_error(MetadataFailure::NotFound)),
                Err(e) => Err(metadata_error(MetadataFailure::Transport(e))),
            },
            Err(e) => Err(metadata_error(MetadataFailure::Transport(e))),
        }
    }
}

impl Filesystem for AzureBlobFilesystem {
    fn exists<'a>(&'a self, path: &'a str) -> FsFuture<'a, bool> {
        Box::pin(async move {
            let blob = self.blob_name(path);
            debug!("Azure exists: container={} blob={}", self.client.container(), blob);

            let result = if names_directory(path) {
                Ok(false)
            } else {
                self.azure_exists(&blob)
                    .await
                    .map_err(|source| FsError::ExistenceCheck {
                        path: path.to_string(),
                        source,
                    })
            };
            metrics::record_operation("exists", &result);
            result
        })
    }

    fn read<'a>(&'a self, path: &'a str) -> FsFuture<'a, Bytes> {
        Box::pin(async move {
            let result = self.do_read(path).await;
            metrics::record_operation("read", &result);
            result
        })
    }

    fn read_stream<'a>(&'a self, path: &'a str) -> FsFuture<'a, ByteReader> {
        Box::pin(async move {
            let result = self.do_read(path).await;
            metrics::record_operation("read_stream", &result);
            let data = result?;
            Ok(Box::pin(std::io::Cursor::new(data)) as ByteReader)
        })
    }

    fn write<'a>(
        &'a self,
        path: &'a str,
        contents: Bytes,
        options: &'a WriteOptions,
    ) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let result = self.do_write(path, contents, options).await;
            metrics::record_operation("write", &result);
            result
        })
    }

    fn write_stream<'a>(
        &'a self,
        path: &'a str,
        mut reader: ByteReader,
        options: &'a WriteOptions,
    ) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let mut buf = Vec::new();
            let result = match reader.read_to_end(&mut buf).await {
                Ok(_) => self.do_write(path, Bytes::from(buf), options).await,
                Err(e) => Err(FsError::Write {
                    path: path.to_string(),
                    source: e.into(),
                }),
            };
            metrics::record_operation("write_stream", &result);
            result
        })
    }

    fn delete<'a>(&'a self, path: &'a str) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let blob = self.blob_name(path);
            debug!("Azure delete: container={} blob={}", self.client.container(), blob);

            let result = self
                .azure_delete(&blob)
                .await
                .map_err(|source| FsError::Delete {
                    path: path.to_string(),
                    source,
                });
            metrics::record_operation("delete", &result);
            result
        })
    }

    fn copy<'a>(&'a self, source: &'a str, destination: &'a str) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let result = self.do_copy(source, destination).await;
            metrics::record_operation("copy", &result);
            result
        })
    }

    fn move_file<'a>(&'a self, source: &'a str, destination: &'a str) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let result = self.do_move(source, destination).await;
            metrics::record_operation("move", &result);
            result
        })
    }

    fn create_directory<'a>(&'a self, path: &'a str) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let marker = self.directory_marker(path);
            debug!(
                "Azure create directory: container={} marker={}",
                self.client.container(),
                marker
            );

            if marker.is_empty() {
                return Ok(());
            }

            let result = self
                .azure_upload(
                    &marker,
                    Bytes::from_static(DIRECTORY_MARKER_BODY),
                    mime::DEFAULT_MIME_TYPE,
                    None,
                )
                .await
                .map_err(|source| FsError::Directory {
                    operation: "create",
                    path: path.to_string(),
                    source,
                });
            metrics::record_operation("create_directory", &result);
            result
        })
    }

    fn delete_directory<'a>(&'a self, path: &'a str) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let result = self.do_delete_directory(path).await;
            metrics::record_operation("delete_directory", &result);
            result
        })
    }

    fn directory_exists<'a>(&'a self, path: &'a str) -> FsFuture<'a, bool> {
        Box::pin(async move {
            let result = self
                .azure_directory_exists(path)
                .await
                .map_err(|source| FsError::Directory {
                    operation: "check",
                    path: path.to_string(),
                    source,
                });
            metrics::record_operation("directory_exists", &result);
            result
        })
    }

    fn list_contents(&self, path: &str, recursive: bool) -> ListingStream {
        debug!(
            "Azure list: container={} path={} recursive={}",
            self.client.container(),
            path,
            recursive
        );
        self.paginator(path, recursive)
            .truncate_on_error(self.truncate_listing_on_error)
            .into_stream()
    }

    fn file_size<'a>(&'a self, path: &'a str) -> FsFuture<'a, FileAttributes> {
        Box::pin(async move {
            let result = self.attributes(path, "file size").await;
            metrics::record_operation("file_size", &result);
            result
        })
    }

    fn mime_type<'a>(&'a self, path: &'a str) -> FsFuture<'a, FileAttributes> {
        Box::pin(async move {
            let result = self.attributes(path, "mime type").await;
            metrics::record_operation("mime_type", &result);
            result
        })
    }

    fn last_modified<'a>(&'a self, path: &'a str) -> FsFuture<'a, FileAttributes> {
        Box::pin(async move {
            let result = self.attributes(path, "last modified").await;
            metrics::record_operation("last_modified", &result);
            result
        })
    }

    fn get_url(&self, path: &str) -> FsResult<String> {
        let blob = self.blob_name(path);
        Ok(match &self.public_url {
            Some(base) => format!("{}/{}", base, encode_path(&blob)),
            None => self.client.blob_url(&blob),
        })
    }

    fn temporary_url(
        &self,
        path: &str,
        expires_at: DateTime<Utc>,
        overrides: &ResponseOverrides,
    ) -> FsResult<String> {
        let blob = self.blob_name(path);
        let resource = format!("/{}/{}", self.client.container(), blob);
        let token = self.sas.token(&resource, expires_at, overrides);
        debug!(
            "Azure temporary url: container={} blob={} expires={}",
            self.client.container(),
            blob,
            expires_at
        );
        Ok(format!("{}?{}", self.client.blob_url(&blob), token))
    }

    fn visibility<'a>(&'a self, _path: &'a str) -> FsFuture<'a, Visibility> {
        Box::pin(async {
            Err(FsError::Unsupported {
                capability: "visibility",
            })
        })
    }

    fn set_visibility<'a>(&'a self, _path: &'a str, _visibility: Visibility) -> FsFuture<'a, ()> {
        Box::pin(async {
            Err(FsError::Unsupported {
                capability: "visibility",
            })
        })
    }
}
