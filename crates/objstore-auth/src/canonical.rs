//! Canonical request construction for AWS Signature Version 4.
//!
//! The canonical request is the normalized form of an outgoing request that
//! both the client and the service hash before signing:
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```
//!
//! The client in this workspace always builds its URLs with [`uri_encode_path`]
//! and [`encode_query`], so the path and query it sends are already in
//! canonical encoding. Only ordering has to be normalized here.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters that must be percent-encoded in URI components.
///
/// Everything except the RFC 3986 unreserved set (`A-Z a-z 0-9 - _ . ~`).
pub(crate) const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a single URI component (query key, query value, or path segment).
///
/// # Examples
///
/// ```
/// use objstore_auth::canonical::uri_encode;
///
/// assert_eq!(uri_encode("a b/c"), "a%20b%2Fc");
/// assert_eq!(uri_encode("safe-._~"), "safe-._~");
/// ```
#[must_use]
pub fn uri_encode(input: &str) -> String {
    utf8_percent_encode(input, URI_ENCODE_SET).to_string()
}

/// Percent-encode an object key for use in a URL path, preserving `/` separators.
///
/// # Examples
///
/// ```
/// use objstore_auth::canonical::uri_encode_path;
///
/// assert_eq!(uri_encode_path("backups/nightly run.tar"), "backups/nightly%20run.tar");
/// ```
#[must_use]
pub fn uri_encode_path(path: &str) -> String {
    path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

/// Encode query parameters into a query string, preserving the given order.
///
/// Both keys and values are percent-encoded with [`uri_encode`]. A parameter
/// with an empty value is written as `key=`.
#[must_use]
pub fn encode_query(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the full canonical request string from its components.
///
/// `uri` is the already-encoded request path and `query_string` the
/// already-encoded query (without the leading `?`).
///
/// # Examples
///
/// ```
/// use objstore_auth::canonical::build_canonical_request;
///
/// let canonical = build_canonical_request(
///     "GET",
///     "/test.txt",
///     "",
///     &[("host", "examplebucket.s3.amazonaws.com")],
///     &["host"],
///     "UNSIGNED-PAYLOAD",
/// );
/// assert!(canonical.starts_with("GET\n/test.txt\n\n"));
/// ```
#[must_use]
pub fn build_canonical_request(
    method: &str,
    uri: &str,
    query_string: &str,
    headers: &[(&str, &str)],
    signed_headers: &[&str],
    payload_hash: &str,
) -> String {
    let canonical_uri = build_canonical_uri(uri);
    let canonical_query = build_canonical_query_string(query_string);
    let canonical_headers = build_canonical_headers(headers, signed_headers);
    let signed_headers_str = build_signed_headers_string(signed_headers);

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n\n{signed_headers_str}\n{payload_hash}"
    )
}

/// Build the canonical URI from an encoded request path.
///
/// S3 signs the path exactly as sent (no segment normalization, no double
/// encoding). An empty path is signed as `/`.
#[must_use]
pub fn build_canonical_uri(path: &str) -> String {
    if path.is_empty() {
        "/".to_owned()
    } else {
        path.to_owned()
    }
}

/// Build the canonical query string by sorting the encoded parameters.
///
/// Parameters are sorted by encoded key, then by encoded value. A bare key
/// (`uploads`) is canonicalized as `uploads=`.
///
/// # Examples
///
/// ```
/// use objstore_auth::canonical::build_canonical_query_string;
///
/// assert_eq!(build_canonical_query_string("prefix=a&list-type=2"), "list-type=2&prefix=a");
/// assert_eq!(build_canonical_query_string("uploads"), "uploads=");
/// ```
#[must_use]
pub fn build_canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(&str, &str)> = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|param| param.split_once('=').unwrap_or((param, "")))
        .collect();

    params.sort_unstable();

    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the canonical headers block for the given signed header names.
///
/// Header names are lowercased, values trimmed with inner whitespace runs
/// collapsed, repeated headers joined with commas, and the result sorted by
/// name. No trailing newline is included.
#[must_use]
pub fn build_canonical_headers(headers: &[(&str, &str)], signed_headers: &[&str]) -> String {
    let mut header_map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let trimmed_value = collapse_whitespace(value.trim());
        header_map
            .entry(name.to_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&trimmed_value);
            })
            .or_insert(trimmed_value);
    }

    let mut sorted_signed: Vec<&str> = signed_headers.to_vec();
    sorted_signed.sort_unstable();

    sorted_signed
        .iter()
        .filter_map(|name| header_map.get(*name).map(|value| format!("{name}:{value}")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the `SignedHeaders` value: sorted lowercase names joined with `;`.
///
/// # Examples
///
/// ```
/// use objstore_auth::canonical::build_signed_headers_string;
///
/// assert_eq!(build_signed_headers_string(&["x-amz-date", "host"]), "host;x-amz-date");
/// ```
#[must_use]
pub fn build_signed_headers_string(signed_headers: &[&str]) -> String {
    let mut sorted: Vec<&str> = signed_headers.to_vec();
    sorted.sort_unstable();
    sorted.join(";")
}

fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(ch);
            prev_was_space = false;
        }
    }
    result
}
