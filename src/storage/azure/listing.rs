//! Paginated container listing.
//!
//! [`ListingPaginator`] walks `List Blobs` pages lazily, following the
//! `NextMarker` continuation token, and converts each page into
//! [`ListingEntry`] values.  A page is only requested once the consumer has
//! drained the entries of the previous one.

use chrono::{DateTime, Utc};
use futures::stream;
use http::Method;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use super::client::{status_error, BlobClient, RequestDescriptor};
use crate::errors::FsError;
use crate::metrics;
use crate::storage::backend::{ListingEntry, ListingStream};

/// One item of a `List Blobs` page, in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum PageItem {
    Blob(BlobItem),
    /// Common prefix rolled up by the delimiter, trailing `/` included.
    Prefix(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobItem {
    pub name: String,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// A parsed `EnumerationResults` document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    pub items: Vec<PageItem>,
    /// Continuation token. `None` on the last page.
    pub next_marker: Option<String>,
}

/// Parse the XML body of a `List Blobs` response.
pub fn parse_page(body: &[u8]) -> anyhow::Result<ListingPage> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut page = ListingPage::default();
    let mut stack: Vec<String> = Vec::new();
    let mut blob: Option<BlobItem> = None;
    let mut prefix: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag.as_str() {
                    "Blob" => blob = Some(BlobItem::default()),
                    "BlobPrefix" => prefix = Some(String::new()),
                    _ => {}
                }
                stack.push(tag);
            }
            Ok(Event::End(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag.as_str() {
                    "Blob" => {
                        if let Some(item) = blob.take() {
                            page.items.push(PageItem::Blob(item));
                        }
                    }
                    "BlobPrefix" => {
                        if let Some(name) = prefix.take() {
                            page.items.push(PageItem::Prefix(name));
                        }
                    }
                    _ => {}
                }
                stack.pop();
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| anyhow::anyhow!("Malformed listing XML: {}", err))?
                    .to_string();
                let current = stack.last().map(String::as_str).unwrap_or("");
                let parent = stack
                    .len()
                    .checked_sub(2)
                    .map(|i| stack[i].as_str())
                    .unwrap_or("");

                match (parent, current) {
                    ("Blob", "Name") => {
                        if let Some(item) = blob.as_mut() {
                            item.name = text;
                        }
                    }
                    ("BlobPrefix", "Name") => prefix = Some(text),
                    ("Properties", "Content-Length") => {
                        if let Some(item) = blob.as_mut() {
                            item.content_length = text.parse().map_err(|_| {
                                anyhow::anyhow!("Invalid Content-Length in listing: {}", text)
                            })?;
                        }
                    }
                    ("Properties", "Content-Type") => {
                        if let Some(item) = blob.as_mut() {
                            item.content_type = Some(text);
                        }
                    }
                    ("Properties", "Last-Modified") => {
                        if let Some(item) = blob.as_mut() {
                            item.last_modified = parse_http_date(&text);
                        }
                    }
                    ("EnumerationResults", "NextMarker") => page.next_marker = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("Malformed listing XML: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(page)
}

/// RFC 1123 date as used by `Last-Modified`.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    httpdate::parse_http_date(value).ok().map(DateTime::<Utc>::from)
}

/// Lazily walks the blobs below one directory.
#[derive(Debug, Clone)]
pub struct ListingPaginator {
    client: Arc<BlobClient>,
    /// Blob-space prefix requested from the service, `""` or ending in `/`.
    list_prefix: String,
    /// Filesystem root inside the container, stripped from every name.
    root: String,
    /// Logical path being listed, for error reporting.
    path: String,
    recursive: bool,
    truncate_on_error: bool,
    page_size: Option<u32>,
}

impl ListingPaginator {
    pub fn new(
        client: Arc<BlobClient>,
        root: impl Into<String>,
        path: impl Into<String>,
        recursive: bool,
    ) -> Self {
        let root = root.into();
        let path = path.into();
        let trimmed = path.trim_matches('/');
        let list_prefix = if trimmed.is_empty() {
            root.clone()
        } else {
            format!("{}{}/", root, trimmed)
        };

        Self {
            client,
            list_prefix,
            root,
            path,
            recursive,
            truncate_on_error: false,
            page_size: None,
        }
    }

    /// End the listing quietly when a page fails instead of yielding the error.
    pub fn truncate_on_error(mut self, truncate: bool) -> Self {
        self.truncate_on_error = truncate;
        self
    }

    /// Ask the service for at most `size` items per page.
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Fetch one page starting at `marker`.
    pub async fn fetch_page(&self, marker: Option<&str>) -> anyhow::Result<ListingPage> {
        let mut desc = RequestDescriptor::new(Method::GET, "")
            .query("restype", "container")
            .query("comp", "list");
        if !self.list_prefix.is_empty() {
            desc = desc.query("prefix", self.list_prefix.as_str());
        }
        if !self.recursive {
            desc = desc.query("delimiter", "/");
        }
        if let Some(marker) = marker {
            desc = desc.query("marker", marker);
        }
        if let Some(size) = self.page_size {
            desc = desc.query("maxresults", size.to_string());
        }

        let resp = self.client.send(desc).await?;
        if !resp.status().is_success() {
            return Err(status_error("list blobs", &resp));
        }
        metrics::record_listing_page();

        parse_page(resp.body())
    }

    /// Convert one page into entries. `seen_dirs` carries directory names
    /// across pages so each directory is reported once.
    pub fn page_entries(&self, page: &ListingPage, seen_dirs: &mut HashSet<String>) -> Vec<ListingEntry> {
        let mut entries = Vec::new();

        for item in &page.items {
            match item {
                PageItem::Prefix(name) => {
                    if let Some(dir) = self.logical_dir(name) {
                        if seen_dirs.insert(dir.clone()) {
                            entries.push(ListingEntry::directory(dir));
                        }
                    }
                }
                PageItem::Blob(blob) => {
                    let Some(rest) = blob.name.strip_prefix(&self.list_prefix) else {
                        continue;
                    };
                    // The directory's own marker object.
                    if rest.is_empty() {
                        continue;
                    }
                    if blob.name.ends_with('/') {
                        if !self.recursive && rest.trim_end_matches('/').contains('/') {
                            continue;
                        }
                        if let Some(dir) = self.logical_dir(&blob.name) {
                            if seen_dirs.insert(dir.clone()) {
                                entries.push(ListingEntry::directory(dir));
                            }
                        }
                        continue;
                    }
                    if !self.recursive && rest.contains('/') {
                        continue;
                    }
                    let Some(path) = blob.name.strip_prefix(&self.root) else {
                        continue;
                    };
                    entries.push(ListingEntry::file(
                        path,
                        blob.content_length,
                        blob.last_modified,
                        blob.content_type.clone().filter(|t| !t.is_empty()),
                    ));
                }
            }
        }

        entries
    }

    fn logical_dir(&self, name: &str) -> Option<String> {
        let path = name.strip_prefix(&self.root)?.trim_end_matches('/');
        if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        }
    }

    /// Consume the paginator as a lazy stream of entries.
    pub fn into_stream(self) -> ListingStream {
        let state = ListingState {
            paginator: self,
            marker: None,
            buffer: VecDeque::new(),
            seen_dirs: HashSet::new(),
            finished: false,
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            loop {
                if let Some(entry) = state.buffer.pop_front() {
                    return Some((Ok(entry), state));
                }
                if state.finished {
                    return None;
                }

                let sent = state.marker.take();
                let result = state
                    .paginator
                    .fetch_page(sent.as_deref())
                    .await
                    .and_then(|page| {
                        if sent.is_some() && page.next_marker == sent {
                            Err(anyhow::anyhow!(
                                "service returned the same continuation marker twice"
                            ))
                        } else {
                            Ok(page)
                        }
                    });

                match result {
                    Ok(page) => {
                        debug!(
                            "Listed {} items under '{}' (more: {})",
                            page.items.len(),
                            state.paginator.list_prefix,
                            page.next_marker.is_some()
                        );
                        let entries = state.paginator.page_entries(&page, &mut state.seen_dirs);
                        state.buffer.extend(entries);
                        match page.next_marker.filter(|m| !m.is_empty()) {
                            Some(marker) => state.marker = Some(marker),
                            None => state.finished = true,
                        }
                    }
                    Err(e) => {
                        state.finished = true;
                        if state.paginator.truncate_on_error {
                            warn!(
                                "Listing of '{}' stopped early: {:#}",
                                state.paginator.path, e
                            );
                            return None;
                        }
                        let err = FsError::Listing {
                            path: state.paginator.path.clone(),
                            source: e,
                        };
                        return Some((Err(err), state));
                    }
                }
            }
        }))
    }
}

struct ListingState {
    paginator: ListingPaginator,
    marker: Option<String>,
    buffer: VecDeque<ListingEntry>,
    seen_dirs: HashSet<String>,
    finished: bool,
}
