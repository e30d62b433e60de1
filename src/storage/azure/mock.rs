//! In-process fake of the Blob service REST surface.
//!
//! Implements [`HttpSend`] so the real request building, signing, listing
//! and copy code runs unchanged against it.  Every request's Shared Key
//! signature is recomputed and checked; mismatches get a 403.

use bytes::Bytes;
use http::{Method, StatusCode, Uri};
use percent_encoding::percent_decode_str;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::Mutex;
use std::time::SystemTime;

use super::credential::Credentials;
use super::path::decode_path;
use super::signer::{RequestSigner, COPY_SOURCE_HEADER};
use crate::http::{HttpFuture, HttpSend};

/// Final state of a scripted asynchronous copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Success,
    Failed,
    Aborted,
}

impl CopyOutcome {
    fn header(self) -> &'static str {
        match self {
            CopyOutcome::Success => "success",
            CopyOutcome::Failed => "failed",
            CopyOutcome::Aborted => "aborted",
        }
    }
}

/// How `Copy Blob` calls behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyScript {
    /// Complete synchronously with `success`.
    #[default]
    Immediate,
    /// Report `pending` until the destination has been checked `polls`
    /// times, then settle on `outcome`.
    PendingThen { polls: u32, outcome: CopyOutcome },
    PendingForever,
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_md5: Option<String>,
    pub last_modified: SystemTime,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    /// Decoded blob name, empty for container requests.
    pub blob: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

#[derive(Debug)]
struct PendingCopy {
    remaining: Option<u32>,
    outcome: CopyOutcome,
    source: StoredBlob,
}

#[derive(Debug)]
struct FakeState {
    blobs: BTreeMap<String, StoredBlob>,
    requests: Vec<RecordedRequest>,
    page_size: usize,
    list_calls: usize,
    fail_list_call: Option<usize>,
    repeat_marker: bool,
    copy_script: CopyScript,
    pending_copies: HashMap<String, PendingCopy>,
    failing_deletes: HashSet<String>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            blobs: BTreeMap::new(),
            requests: Vec::new(),
            page_size: 5000,
            list_calls: 0,
            fail_list_call: None,
            repeat_marker: false,
            copy_script: CopyScript::default(),
            pending_copies: HashMap::new(),
            failing_deletes: HashSet::new(),
        }
    }
}

#[derive(Debug)]
pub struct FakeBlobService {
    account: String,
    container: String,
    signer: RequestSigner,
    state: Mutex<FakeState>,
}

impl FakeBlobService {
    pub fn new(account: &str, key: &str, container: &str) -> Self {
        let credentials = Credentials::new(account, key).expect("valid test credentials");
        Self {
            account: account.to_string(),
            container: container.to_string(),
            signer: RequestSigner::new(credentials),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn insert_blob(&self, name: &str, data: Bytes) {
        self.state.lock().unwrap().blobs.insert(
            name.to_string(),
            StoredBlob {
                data,
                content_type: None,
                cache_control: None,
                content_md5: None,
                last_modified: SystemTime::now(),
            },
        );
    }

    pub fn blob(&self, name: &str) -> Option<StoredBlob> {
        self.state.lock().unwrap().blobs.get(name).cloned()
    }

    pub fn blob_names(&self) -> Vec<String> {
        self.state.lock().unwrap().blobs.keys().cloned().collect()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    /// Return at most `size` items per listing page.
    pub fn set_page_size(&self, size: usize) {
        self.state.lock().unwrap().page_size = size;
    }

    /// Answer the `n`th listing request (1-based) with a 500.
    pub fn fail_list_call(&self, n: usize) {
        self.state.lock().unwrap().fail_list_call = Some(n);
    }

    /// Always hand out the same continuation marker.
    pub fn repeat_marker(&self) {
        self.state.lock().unwrap().repeat_marker = true;
    }

    pub fn set_copy_script(&self, script: CopyScript) {
        self.state.lock().unwrap().copy_script = script;
    }

    /// Answer deletes of `name` with a 500.
    pub fn fail_delete(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(name.to_string());
    }

    fn handle(&self, req: http::Request<Bytes>) -> http::Response<Bytes> {
        let (parts, body) = req.into_parts();
        let uri_path = parts.uri.path().to_string();
        let query = parse_query(&parts.uri);

        let mut headers = BTreeMap::new();
        for (name, value) in &parts.headers {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        let authorization = headers.remove("authorization").unwrap_or_default();

        let container_root = format!("/{}", self.container);
        let blob = match uri_path.strip_prefix(&container_root) {
            Some("") => String::new(),
            Some(rest) => match rest.strip_prefix('/') {
                Some(encoded) => decode_path(encoded),
                None => return error(StatusCode::BAD_REQUEST, "InvalidUri"),
            },
            None => return error(StatusCode::NOT_FOUND, "ContainerNotFound"),
        };

        let mut state = self.state.lock().unwrap();
        state.requests.push(RecordedRequest {
            method: parts.method.clone(),
            blob: blob.clone(),
            query: query.clone(),
            headers: {
                let mut recorded = headers.clone();
                recorded.insert("authorization".to_string(), authorization.clone());
                recorded
            },
            body: body.clone(),
        });

        let expected = self
            .signer
            .authorization(&parts.method, &uri_path, &headers, &query);
        if authorization != expected {
            return error(StatusCode::FORBIDDEN, "AuthenticationFailed");
        }
        if !authorization.starts_with(&format!("SharedKey {}:", self.account)) {
            return error(StatusCode::FORBIDDEN, "AuthenticationFailed");
        }

        let is_list = query.get("restype").map(String::as_str) == Some("container")
            && query.get("comp").map(String::as_str) == Some("list");

        match parts.method {
            Method::GET if is_list => self.list(&mut state, &query),
            Method::PUT if headers.contains_key(COPY_SOURCE_HEADER) => {
                self.copy(&mut state, &headers[COPY_SOURCE_HEADER], &blob)
            }
            Method::PUT => put_blob(&mut state, &blob, &headers, body),
            Method::GET => match state.blobs.get(&blob) {
                Some(stored) => blob_response(StatusCode::OK, stored, stored.data.clone()),
                None => error(StatusCode::NOT_FOUND, "BlobNotFound"),
            },
            Method::HEAD => head_blob(&mut state, &blob),
            Method::DELETE => {
                if state.failing_deletes.contains(&blob) {
                    return error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError");
                }
                match state.blobs.remove(&blob) {
                    Some(_) => empty(StatusCode::ACCEPTED),
                    None => error(StatusCode::NOT_FOUND, "BlobNotFound"),
                }
            }
            _ => error(StatusCode::METHOD_NOT_ALLOWED, "UnsupportedHttpVerb"),
        }
    }

    fn copy(&self, state: &mut FakeState, source_url: &str, destination: &str) -> http::Response<Bytes> {
        let Ok(uri) = source_url.parse::<Uri>() else {
            return error(StatusCode::BAD_REQUEST, "InvalidHeaderValue");
        };
        let source_name = uri
            .path()
            .strip_prefix(&format!("/{}/", self.container))
            .map(decode_path)
            .unwrap_or_default();
        let Some(source) = state.blobs.get(&source_name).cloned() else {
            return error(StatusCode::NOT_FOUND, "CannotVerifyCopySource");
        };

        let (remaining, outcome) = match state.copy_script {
            CopyScript::Immediate => {
                state.blobs.insert(destination.to_string(), source);
                return with_copy_status(empty(StatusCode::ACCEPTED), "success");
            }
            CopyScript::PendingThen { polls, outcome } => (Some(polls), outcome),
            CopyScript::PendingForever => (None, CopyOutcome::Success),
        };

        state.pending_copies.insert(
            destination.to_string(),
            PendingCopy {
                remaining,
                outcome,
                source,
            },
        );
        with_copy_status(empty(StatusCode::ACCEPTED), "pending")
    }

    fn list(&self, state: &mut FakeState, query: &BTreeMap<String, String>) -> http::Response<Bytes> {
        state.list_calls += 1;
        if state.fail_list_call == Some(state.list_calls) {
            return error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError");
        }

        let prefix = query.get("prefix").cloned().unwrap_or_default();
        let delimiter = query.get("delimiter").cloned();
        let marker = query.get("marker").cloned();
        let max_results = query
            .get("maxresults")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(usize::MAX)
            .min(state.page_size);

        // (sort key, prefix name or blob name, is_prefix)
        let mut items: Vec<(String, bool)> = Vec::new();
        for name in state.blobs.keys().filter(|n| n.starts_with(&prefix)) {
            let rest = &name[prefix.len()..];
            match delimiter.as_deref().and_then(|d| rest.find(d).map(|i| i + d.len())) {
                Some(end) => {
                    let rolled = format!("{}{}", prefix, &rest[..end]);
                    if items.last().map(|(n, _)| n) != Some(&rolled) {
                        items.push((rolled, true));
                    }
                }
                None => items.push((name.clone(), false)),
            }
        }

        let start = if state.repeat_marker {
            0
        } else {
            match &marker {
                Some(m) => items.iter().position(|(n, _)| n >= m).unwrap_or(items.len()),
                None => 0,
            }
        };
        let end = start.saturating_add(max_results).min(items.len());
        let next_marker = if state.repeat_marker {
            Some("stuck".to_string())
        } else {
            items.get(end).map(|(n, _)| n.clone())
        };

        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .expect("xml decl");
        let mut root = BytesStart::new("EnumerationResults");
        root.push_attribute(("ContainerName", self.container.as_str()));
        writer.write_event(Event::Start(root)).expect("xml start");
        write_text(&mut writer, "Prefix", &prefix);
        writer
            .write_event(Event::Start(BytesStart::new("Blobs")))
            .expect("xml start");
        for (name, is_prefix) in &items[start..end] {
            if *is_prefix {
                writer
                    .write_event(Event::Start(BytesStart::new("BlobPrefix")))
                    .expect("xml start");
                write_text(&mut writer, "Name", name);
                writer
                    .write_event(Event::End(BytesEnd::new("BlobPrefix")))
                    .expect("xml end");
                continue;
            }
            let stored = &state.blobs[name];
            writer
                .write_event(Event::Start(BytesStart::new("Blob")))
                .expect("xml start");
            write_text(&mut writer, "Name", name);
            writer
                .write_event(Event::Start(BytesStart::new("Properties")))
                .expect("xml start");
            write_text(
                &mut writer,
                "Last-Modified",
                &httpdate::fmt_http_date(stored.last_modified),
            );
            write_text(&mut writer, "Content-Length", &stored.data.len().to_string());
            write_text(
                &mut writer,
                "Content-Type",
                stored.content_type.as_deref().unwrap_or(""),
            );
            writer
                .write_event(Event::End(BytesEnd::new("Properties")))
                .expect("xml end");
            writer
                .write_event(Event::End(BytesEnd::new("Blob")))
                .expect("xml end");
        }
        writer
            .write_event(Event::End(BytesEnd::new("Blobs")))
            .expect("xml end");
        write_text(&mut writer, "NextMarker", next_marker.as_deref().unwrap_or(""));
        writer
            .write_event(Event::End(BytesEnd::new("EnumerationResults")))
            .expect("xml end");

        let body = writer.into_inner().into_inner();
        http::Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/xml")
            .body(Bytes::from(body))
            .expect("response")
    }
}

impl HttpSend for FakeBlobService {
    fn http_send(&self, req: http::Request<Bytes>) -> HttpFuture<'_> {
        let resp = self.handle(req);
        Box::pin(async move { Ok(resp) })
    }
}

fn put_blob(
    state: &mut FakeState,
    blob: &str,
    headers: &BTreeMap<String, String>,
    body: Bytes,
) -> http::Response<Bytes> {
    if headers.get("x-ms-blob-type").map(String::as_str) != Some("BlockBlob") {
        return error(StatusCode::BAD_REQUEST, "MissingRequiredHeader");
    }
    if headers.get("content-length") != Some(&body.len().to_string()) {
        return error(StatusCode::BAD_REQUEST, "InvalidHeaderValue");
    }
    if let Some(md5) = headers.get("content-md5") {
        use base64::Engine;
        use md5::{Digest, Md5};
        let actual = base64::engine::general_purpose::STANDARD.encode(Md5::digest(&body));
        if &actual != md5 {
            return error(StatusCode::BAD_REQUEST, "Md5Mismatch");
        }
    }

    state.pending_copies.remove(blob);
    state.blobs.insert(
        blob.to_string(),
        StoredBlob {
            data: body,
            content_type: headers.get("content-type").cloned(),
            cache_control: headers.get("x-ms-blob-cache-control").cloned(),
            content_md5: headers.get("content-md5").cloned(),
            last_modified: SystemTime::now(),
        },
    );
    empty(StatusCode::CREATED)
}

fn head_blob(state: &mut FakeState, blob: &str) -> http::Response<Bytes> {
    if let Some(pending) = state.pending_copies.get_mut(blob) {
        if let Some(remaining) = pending.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                let settled = state
                    .pending_copies
                    .remove(blob)
                    .expect("pending copy present");
                let resp = if settled.outcome == CopyOutcome::Success {
                    let resp = blob_response(StatusCode::OK, &settled.source, Bytes::new());
                    state.blobs.insert(blob.to_string(), settled.source);
                    resp
                } else {
                    empty(StatusCode::OK)
                };
                let mut resp = with_copy_status(resp, settled.outcome.header());
                if settled.outcome != CopyOutcome::Success {
                    resp.headers_mut().insert(
                        "x-ms-copy-status-description",
                        http::HeaderValue::from_static("500 InternalError"),
                    );
                }
                return resp;
            }
        }
        return with_copy_status(empty(StatusCode::OK), "pending");
    }

    match state.blobs.get(blob) {
        Some(stored) => blob_response(StatusCode::OK, stored, Bytes::new()),
        None => empty(StatusCode::NOT_FOUND),
    }
}

fn parse_query(uri: &Uri) -> BTreeMap<String, String> {
    uri.query()
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (
                k.to_string(),
                percent_decode_str(v).decode_utf8_lossy().into_owned(),
            )
        })
        .collect()
}

fn write_text(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("xml start");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("xml text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("xml end");
}

fn blob_response(status: StatusCode, stored: &StoredBlob, body: Bytes) -> http::Response<Bytes> {
    let mut builder = http::Response::builder()
        .status(status)
        .header("content-length", stored.data.len().to_string())
        .header("last-modified", httpdate::fmt_http_date(stored.last_modified))
        .header("x-ms-blob-type", "BlockBlob");
    if let Some(content_type) = &stored.content_type {
        builder = builder.header("content-type", content_type.as_str());
    }
    if let Some(cache_control) = &stored.cache_control {
        builder = builder.header("cache-control", cache_control.as_str());
    }
    builder.body(body).expect("response")
}

fn with_copy_status(mut resp: http::Response<Bytes>, status: &'static str) -> http::Response<Bytes> {
    resp.headers_mut()
        .insert("x-ms-copy-status", http::HeaderValue::from_static(status));
    resp
}

fn empty(status: StatusCode) -> http::Response<Bytes> {
    http::Response::builder()
        .status(status)
        .body(Bytes::new())
        .expect("response")
}

fn error(status: StatusCode, code: &str) -> http::Response<Bytes> {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><Error><Code>{}</Code><Message>{}</Message></Error>",
        code, code
    );
    http::Response::builder()
        .status(status)
        .header("x-ms-error-code", code)
        .body(Bytes::from(body))
        .expect("response")
}
