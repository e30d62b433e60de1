//! Abstract filesystem trait.
//!
//! Every storage driver must implement [`Filesystem`].  The trait works in
//! terms of slash-separated logical paths and whole byte buffers (plus
//! `AsyncRead` adapters for streaming callers) so callers do not need to
//! know the underlying medium.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::errors::FsResult;

/// Boxed future returned by every asynchronous [`Filesystem`] operation.
pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = FsResult<T>> + Send + 'a>>;

/// Lazy, finite sequence of listing entries.
pub type ListingStream = Pin<Box<dyn Stream<Item = FsResult<ListingEntry>> + Send>>;

/// Readable byte stream handed to `write_stream` or returned by `read_stream`.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// A path ending in `/`, or the root, can only name a directory.
pub fn names_directory(path: &str) -> bool {
    path.ends_with('/') || path.trim_start_matches('/').is_empty()
}

/// Whether a listing entry is a stored object or a virtual directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One item produced by [`Filesystem::list_contents`].
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    /// Logical path, without a trailing slash for directories.
    pub path: String,
    pub kind: EntryKind,
    /// Size in bytes. Always `None` for directories.
    pub file_size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
}

impl ListingEntry {
    /// A stored object.
    pub fn file(
        path: impl Into<String>,
        file_size: u64,
        last_modified: Option<DateTime<Utc>>,
        mime_type: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            file_size: Some(file_size),
            last_modified,
            mime_type,
        }
    }

    /// A virtual directory.
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            file_size: None,
            last_modified: None,
            mime_type: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Attributes of a single stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttributes {
    pub path: String,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Per-write settings.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Explicit content type. Detected from path and content when absent.
    pub mime_type: Option<String>,
    /// Cache-Control value stored with the object.
    pub cache_control: Option<String>,
}

impl WriteOptions {
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Response headers a temporary URL forces the service to return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseOverrides {
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_type: Option<String>,
}

/// Object visibility as understood by the filesystem contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// Async filesystem contract.
pub trait Filesystem: Send + Sync + 'static {
    /// Check whether a file exists at `path`.
    fn exists<'a>(&'a self, path: &'a str) -> FsFuture<'a, bool>;

    /// Read the full object at `path`.
    fn read<'a>(&'a self, path: &'a str) -> FsFuture<'a, Bytes>;

    /// Open the object at `path` as a byte stream.
    fn read_stream<'a>(&'a self, path: &'a str) -> FsFuture<'a, ByteReader>;

    /// Create or overwrite the object at `path` with `contents`.
    fn write<'a>(
        &'a self,
        path: &'a str,
        contents: Bytes,
        options: &'a WriteOptions,
    ) -> FsFuture<'a, ()>;

    /// Drain `reader` and store the result at `path`.
    fn write_stream<'a>(
        &'a self,
        path: &'a str,
        reader: ByteReader,
        options: &'a WriteOptions,
    ) -> FsFuture<'a, ()>;

    /// Delete the object at `path`. Deleting a missing object succeeds.
    fn delete<'a>(&'a self, path: &'a str) -> FsFuture<'a, ()>;

    /// Copy `source` to `destination`, overwriting it.
    fn copy<'a>(&'a self, source: &'a str, destination: &'a str) -> FsFuture<'a, ()>;

    /// Copy `source` to `destination`, then delete `source`.
    fn move_file<'a>(&'a self, source: &'a str, destination: &'a str) -> FsFuture<'a, ()>;

    /// Make `path` exist as a directory.
    fn create_directory<'a>(&'a self, path: &'a str) -> FsFuture<'a, ()>;

    /// Delete every object below `path`.
    fn delete_directory<'a>(&'a self, path: &'a str) -> FsFuture<'a, ()>;

    /// Check whether anything is stored below `path`.
    fn directory_exists<'a>(&'a self, path: &'a str) -> FsFuture<'a, bool>;

    /// List entries below `path`, either one level deep or recursively.
    fn list_contents(&self, path: &str, recursive: bool) -> ListingStream;

    fn file_size<'a>(&'a self, path: &'a str) -> FsFuture<'a, FileAttributes>;

    fn mime_type<'a>(&'a self, path: &'a str) -> FsFuture<'a, FileAttributes>;

    fn last_modified<'a>(&'a self, path: &'a str) -> FsFuture<'a, FileAttributes>;

    /// Public URL of `path`.
    fn get_url(&self, path: &str) -> FsResult<String>;

    /// Time-limited, read-only URL of `path`.
    fn temporary_url(
        &self,
        path: &str,
        expires_at: DateTime<Utc>,
        overrides: &ResponseOverrides,
    ) -> FsResult<String>;

    fn visibility<'a>(&'a self, path: &'a str) -> FsFuture<'a, Visibility>;

    fn set_visibility<'a>(&'a self, path: &'a str, visibility: Visibility) -> FsFuture<'a, ()>;
}
