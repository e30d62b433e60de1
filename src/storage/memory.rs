//! In-memory filesystem driver.
//!
//! Objects live in a `tokio::sync::RwLock<BTreeMap<...>>` keyed by logical
//! path.  Directories follow the same rules as the blob driver: they are
//! implied by the paths below them, and `create_directory` stores a marker
//! object whose key ends in `/`.  Nothing is persisted.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use super::backend::{
    names_directory, ByteReader, FileAttributes, Filesystem, FsFuture, ListingEntry,
    ListingStream, ResponseOverrides, Visibility, WriteOptions,
};
use crate::errors::{CopyFailure, FsError, FsResult, MetadataFailure};
use crate::mime;

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    mime_type: String,
    last_modified: DateTime<Utc>,
}

/// Filesystem held entirely in process memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryFilesystem {
    objects: Arc<tokio::sync::RwLock<BTreeMap<String, MemoryObject>>>,
}

fn key(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

/// `""` for the root, otherwise `dir/`.
fn directory_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

fn list_objects(
    objects: &BTreeMap<String, MemoryObject>,
    prefix: &str,
    recursive: bool,
) -> Vec<ListingEntry> {
    let mut entries = Vec::new();
    let mut seen_dirs = HashSet::new();

    for (name, object) in objects.range(prefix.to_string()..) {
        let Some(rest) = name.strip_prefix(prefix) else {
            break;
        };
        if rest.is_empty() {
            continue;
        }

        let nested = rest.trim_end_matches('/').find('/');
        let directory = match (recursive, nested) {
            (false, Some(end)) => Some(format!("{}{}", prefix, &rest[..end])),
            _ if name.ends_with('/') => Some(name.trim_end_matches('/').to_string()),
            _ => None,
        };

        match directory {
            Some(dir) => {
                if seen_dirs.insert(dir.clone()) {
                    entries.push(ListingEntry::directory(dir));
                }
            }
            None => entries.push(ListingEntry::file(
                name.clone(),
                object.data.len() as u64,
                Some(object.last_modified),
                Some(object.mime_type.clone()),
            )),
        }
    }

    entries
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    async fn store(&self, path: &str, data: Bytes, options: &WriteOptions) {
        let mime_type = options
            .mime_type
            .clone()
            .or_else(|| mime::detect(path, &data))
            .unwrap_or_else(|| mime::DEFAULT_MIME_TYPE.to_string());

        self.objects.write().await.insert(
            key(path),
            MemoryObject {
                data,
                mime_type,
                last_modified: Utc::now(),
            },
        );
    }

    async fn has_directory(&self, path: &str) -> bool {
        let prefix = directory_prefix(path);
        let objects = self.objects.read().await;
        let found = objects
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(name, _)| name.starts_with(&prefix));
        found
    }

    async fn do_copy(&self, source: &str, destination: &str) -> FsResult<()> {
        let mut objects = self.objects.write().await;
        let Some(object) = objects.get(&key(source)).cloned() else {
            return Err(FsError::Copy {
                source_path: source.to_string(),
                destination: destination.to_string(),
                reason: CopyFailure::Failed {
                    description: "source does not exist".to_string(),
                },
            });
        };
        objects.insert(
            key(destination),
            MemoryObject {
                last_modified: Utc::now(),
                ..object
            },
        );
        Ok(())
    }

    async fn attributes(&self, path: &str, attribute: &'static str) -> FsResult<FileAttributes> {
        let object = if names_directory(path) {
            None
        } else {
            self.objects.read().await.get(&key(path)).cloned()
        };
        if let Some(object) = object {
            return Ok(FileAttributes {
                path: path.to_string(),
                file_size: Some(object.data.len() as u64),
                mime_type: Some(object.mime_type),
                last_modified: Some(object.last_modified),
            });
        }

        let reason = if self.has_directory(path).await {
            MetadataFailure::IsDirectory
        } else {
            MetadataFailure::NotFound
        };
        Err(FsError::Metadata {
            path: path.to_string(),
            attribute,
            reason,
        })
    }
}

impl Filesystem for MemoryFilesystem {
    fn exists<'a>(&'a self, path: &'a str) -> FsFuture<'a, bool> {
        Box::pin(async move {
            Ok(!names_directory(path) && self.objects.read().await.contains_key(&key(path)))
        })
    }

    fn read<'a>(&'a self, path: &'a str) -> FsFuture<'a, Bytes> {
        Box::pin(async move {
            self.objects
                .read()
                .await
                .get(&key(path))
                .map(|object| object.data.clone())
                .ok_or_else(|| FsError::ReadNotFound {
                    path: path.to_string(),
                })
        })
    }

    fn read_stream<'a>(&'a self, path: &'a str) -> FsFuture<'a, ByteReader> {
        Box::pin(async move {
            let data = self.read(path).await?;
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
            self.store(path, contents, options).await;
            Ok(())
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
            reader
                .read_to_end(&mut buf)
                .await
                .map_err(|e| FsError::Write {
                    path: path.to_string(),
                    source: e.into(),
                })?;
            self.store(path, Bytes::from(buf), options).await;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, path: &'a str) -> FsFuture<'a, ()> {
        Box::pin(async move {
            self.objects.write().await.remove(&key(path));
            Ok(())
        })
    }

    fn copy<'a>(&'a self, source: &'a str, destination: &'a str) -> FsFuture<'a, ()> {
        Box::pin(async move { self.do_copy(source, destination).await })
    }

    fn move_file<'a>(&'a self, source: &'a str, destination: &'a str) -> FsFuture<'a, ()> {
        Box::pin(async move {
            self.do_copy(source, destination)
                .await
                .map_err(|e| FsError::Move {
                    source_path: source.to_string(),
                    destination: destination.to_string(),
                    source: Box::new(e),
                })?;
            self.objects.write().await.remove(&key(source));
            Ok(())
        })
    }

    fn create_directory<'a>(&'a self, path: &'a str) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let marker = directory_prefix(path);
            if marker.is_empty() {
                return Ok(());
            }
            self.store(&marker, Bytes::from_static(b" "), &WriteOptions::default())
                .await;
            Ok(())
        })
    }

    fn delete_directory<'a>(&'a self, path: &'a str) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let prefix = directory_prefix(path);
            self.objects
                .write()
                .await
                .retain(|name, _| !name.starts_with(&prefix));
            Ok(())
        })
    }

    fn directory_exists<'a>(&'a self, path: &'a str) -> FsFuture<'a, bool> {
        Box::pin(async move { Ok(self.has_directory(path).await) })
    }

    fn list_contents(&self, path: &str, recursive: bool) -> ListingStream {
        let objects = self.objects.clone();
        let prefix = directory_prefix(path);

        let entries = async move {
            let objects = objects.read().await;
            list_objects(&objects, &prefix, recursive)
        };
        Box::pin(
            stream::once(entries)
                .flat_map(|entries| stream::iter(entries.into_iter().map(Ok::<_, FsError>))),
        )
    }

    fn file_size<'a>(&'a self, path: &'a str) -> FsFuture<'a, FileAttributes> {
        Box::pin(self.attributes(path, "file size"))
    }

    fn mime_type<'a>(&'a self, path: &'a str) -> FsFuture<'a, FileAttributes> {
        Box::pin(self.attributes(path, "mime type"))
    }

    fn last_modified<'a>(&'a self, path: &'a str) -> FsFuture<'a, FileAttributes> {
        Box::pin(self.attributes(path, "last modified"))
    }

    fn get_url(&self, _path: &str) -> FsResult<String> {
        Err(FsError::Unsupported {
            capability: "public urls",
        })
    }

    fn temporary_url(
        &self,
        _path: &str,
        _expires_at: DateTime<Utc>,
        _overrides: &ResponseOverrides,
    ) -> FsResult<String> {
        Err(FsError::Unsupported {
            capability: "temporary urls",
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    async fn put(fs: &MemoryFilesystem, path: &str, data: &'static [u8]) {
        fs.write(path, Bytes::from_static(data), &WriteOptions::default())
            .await
            .unwrap();
    }

    async fn list(fs: &MemoryFilesystem, path: &str, recursive: bool) -> Vec<ListingEntry> {
        fs.list_contents(path, recursive)
            .map(|entry| entry.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_write_and_read_roundtrip() {
        let fs = MemoryFilesystem::new();
        put(&fs, "a.txt", b"hello").await;
        put(&fs, "empty", b"").await;

        assert_eq!(fs.read("a.txt").await.unwrap(), Bytes::from_static(b"hello"));
        assert!(fs.read("empty").await.unwrap().is_empty());
        assert!(fs.exists("a.txt").await.unwrap());
        assert!(matches!(
            fs.read("missing").await,
            Err(FsError::ReadNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let fs = MemoryFilesystem::new();
        put(&fs, "a.txt", b"x").await;
        fs.delete("a.txt").await.unwrap();
        fs.delete("a.txt").await.unwrap();
        assert!(!fs.exists("a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_listing_scope() {
        let fs = MemoryFilesystem::new();
        put(&fs, "dir/a", b"1").await;
        put(&fs, "dir/b", b"2").await;
        put(&fs, "dir/sub/c", b"3").await;
        put(&fs, "dirx", b"4").await;

        let shallow = list(&fs, "dir", false).await;
        assert_eq!(
            shallow,
            vec![
                ListingEntry::file(
                    "dir/a",
                    1,
                    shallow[0].last_modified,
                    Some("application/octet-stream".to_string())
                ),
                ListingEntry::file(
                    "dir/b",
                    1,
                    shallow[1].last_modified,
                    Some("application/octet-stream".to_string())
                ),
                ListingEntry::directory("dir/sub"),
            ]
        );

        let deep: Vec<String> = list(&fs, "dir", true)
            .await
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(deep, vec!["dir/a", "dir/b", "dir/sub/c"]);
    }

    #[tokio::test]
    async fn test_directories() {
        let fs = MemoryFilesystem::new();
        fs.create_directory("x").await.unwrap();
        assert!(fs.directory_exists("x").await.unwrap());
        assert!(!fs.exists("x").await.unwrap());
        assert!(list(&fs, "x", false).await.is_empty());

        put(&fs, "x/y/z", b"1").await;
        let err = fs.file_size("x").await.unwrap_err();
        assert!(matches!(
            err,
            FsError::Metadata {
                reason: MetadataFailure::IsDirectory,
                ..
            }
        ));

        assert!(matches!(
            fs.mime_type("x/").await.unwrap_err(),
            FsError::Metadata {
                reason: MetadataFailure::IsDirectory,
                ..
            }
        ));
        assert!(!fs.exists("x/").await.unwrap());

        fs.delete_directory("x").await.unwrap();
        assert!(!fs.directory_exists("x").await.unwrap());
        assert!(fs.file_size("x").await.unwrap_err().is_not_found());
        assert!(fs.file_size("x/").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_copy_and_move() {
        let fs = MemoryFilesystem::new();
        put(&fs, "a.txt", b"payload").await;
        fs.copy("a.txt", "b.txt").await.unwrap();
        fs.move_file("b.txt", "c.txt").await.unwrap();

        assert!(fs.exists("a.txt").await.unwrap());
        assert!(!fs.exists("b.txt").await.unwrap());
        assert_eq!(fs.read("c.txt").await.unwrap(), Bytes::from_static(b"payload"));
        assert!(matches!(
            fs.move_file("nope", "d").await,
            Err(FsError::Move { .. })
        ));
    }

    #[tokio::test]
    async fn test_metadata_and_streams() {
        let fs = MemoryFilesystem::new();
        let reader: ByteReader = Box::pin(std::io::Cursor::new(b"{}".to_vec()));
        fs.write_stream("data.json", reader, &WriteOptions::default())
            .await
            .unwrap();

        let attrs = fs.mime_type("data.json").await.unwrap();
        assert_eq!(attrs.mime_type.as_deref(), Some("application/json"));
        assert_eq!(attrs.file_size, Some(2));

        let mut out = Vec::new();
        fs.read_stream("data.json")
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, b"{}");
    }

    #[tokio::test]
    async fn test_unsupported_capabilities() {
        let fs = MemoryFilesystem::new();
        assert!(fs.get_url("a").is_err());
        assert!(fs
            .temporary_url("a", Utc::now(), &ResponseOverrides::default())
            .is_err());
        assert!(fs.visibility("a").await.is_err());
    }
}
