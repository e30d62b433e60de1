//! Blob path encoding.
//!
//! Blob names are encoded one segment at a time so `/` stays a separator
//! while everything outside the RFC 3986 unreserved set is escaped inside
//! each segment.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Encode everything except unreserved characters.
pub(crate) const STRICT_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode each `/`-separated segment of `path`.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_component)
        .collect::<Vec<_>>()
        .join("/")
}

/// Inverse of [`encode_path`].
pub fn decode_path(encoded: &str) -> String {
    encoded
        .split('/')
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-encode a single query value or path segment (space as `%20`).
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, &STRICT_ENCODE_SET).to_string()
}
