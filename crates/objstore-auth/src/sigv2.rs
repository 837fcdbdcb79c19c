//! Legacy HMAC-SHA1 query-string presigning.
//!
//! Some S3-compatible systems do not implement SigV4 correctly. For those,
//! a store configured with signature version `"1"` presigns with the older
//! query-string scheme, where the URL carries `AWSAccessKeyId`, `Expires`
//! and `Signature` and:
//!
//! ```text
//! Signature    = URL-Encode(Base64(HMAC-SHA1(SecretKey, StringToSign)))
//! StringToSign = HTTP-Verb + "\n" +
//!                Content-MD5 + "\n" +
//!                Content-Type + "\n" +
//!                Expires + "\n" +
//!                CanonicalizedAmzHeaders +
//!                CanonicalizedResource
//! ```
//!
//! Content-MD5 and Content-Type are always empty for a presigned GET.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use sha1::Sha1;
use tracing::debug;

use crate::canonical::uri_encode;
use crate::credentials::Credentials;
use crate::error::SigningError;
use crate::presigned::expires_in_secs;
use crate::sigv4::SECURITY_TOKEN_HEADER;

type HmacSha1 = Hmac<Sha1>;

/// S3 sub-resources that are part of the canonicalized resource.
const SUB_RESOURCES: &[&str] = &[
    "acl",
    "cors",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partNumber",
    "policy",
    "requestPayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "restore",
    "tagging",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
];

/// Generate a legacy query-string presigned URL.
///
/// `virtual_host_bucket` names the bucket when it is carried in the host
/// (virtual-hosted addressing) rather than the path, so that it can be put
/// back into the canonicalized resource. `amz_headers` are `x-amz-*` headers
/// the caller will send with the request; they are bound into the signature.
///
/// # Errors
///
/// Returns [`SigningError::ExpiresOutOfRange`] if `expires` is zero or longer
/// than [`MAX_EXPIRES_SECS`](crate::presigned::MAX_EXPIRES_SECS). A partial
/// second counts as a full one.
pub fn presign_v2(
    method: &str,
    uri: &http::Uri,
    virtual_host_bucket: Option<&str>,
    amz_headers: &[(&str, &str)],
    expires: Duration,
    credentials: &Credentials,
    now: DateTime<Utc>,
) -> Result<String, SigningError> {
    let expires_secs = expires_in_secs(expires)?;
    let expires_at = now.timestamp().saturating_add_unsigned(expires_secs);

    let mut headers: Vec<(&str, &str)> = amz_headers.to_vec();
    if let Some(token) = credentials.session_token() {
        headers.push((SECURITY_TOKEN_HEADER, token));
    }

    let string_to_sign = format!(
        "{method}\n\n\n{expires_at}\n{}{}",
        build_canonicalized_amz_headers(&headers),
        build_canonicalized_resource(uri, virtual_host_bucket),
    );

    debug!(string_to_sign, "Built legacy string to sign");

    let signature = compute_sigv2_signature(credentials.secret_access_key(), &string_to_sign);

    let mut query = uri.query().map(str::to_owned).unwrap_or_default();
    if !query.is_empty() {
        query.push('&');
    }
    query.push_str(&format!(
        "AWSAccessKeyId={}&Expires={expires_at}&Signature={}",
        uri_encode(credentials.access_key_id()),
        uri_encode(&signature),
    ));
    if let Some(token) = credentials.session_token() {
        query.push_str(&format!("&{SECURITY_TOKEN_HEADER}={}", uri_encode(token)));
    }

    let scheme = uri.scheme_str().unwrap_or("https");
    let authority = uri
        .authority()
        .map(http::uri::Authority::as_str)
        .ok_or_else(|| SigningError::MissingHost(uri.to_string()))?;

    Ok(format!("{scheme}://{authority}{}?{query}", uri.path()))
}

/// Build the CanonicalizedAmzHeaders string.
///
/// All x-amz-* headers are lowercased, sorted, and emitted as `name:value\n`
/// with repeated headers joined by commas.
fn build_canonicalized_amz_headers(headers: &[(&str, &str)]) -> String {
    let mut amz_headers: BTreeMap<String, Vec<&str>> = BTreeMap::new();

    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        if name.starts_with("x-amz-") {
            amz_headers.entry(name).or_default().push(value.trim());
        }
    }

    let mut result = String::new();
    for (name, values) in &amz_headers {
        result.push_str(name);
        result.push(':');
        result.push_str(&values.join(","));
        result.push('\n');
    }

    result
}

/// Build the CanonicalizedResource string.
///
/// This is `/bucket` plus the URI path (the bucket is taken from
/// `virtual_host_bucket` when it is not in the path), followed by any
/// sub-resource query parameters, sorted.
fn build_canonicalized_resource(uri: &http::Uri, virtual_host_bucket: Option<&str>) -> String {
    let path = match virtual_host_bucket {
        Some(bucket) => format!("/{bucket}{}", uri.path()),
        None => uri.path().to_owned(),
    };

    let mut sub_params: Vec<(&str, Option<String>)> = uri
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|param| !param.is_empty())
        .filter_map(|param| {
            let (key, value) = param.split_once('=').map_or((param, None), |(k, v)| {
                let decoded = percent_encoding::percent_decode_str(v)
                    .decode_utf8_lossy()
                    .into_owned();
                (k, (!decoded.is_empty()).then_some(decoded))
            });
            SUB_RESOURCES.contains(&key).then_some((key, value))
        })
        .collect();

    if sub_params.is_empty() {
        return path;
    }

    sub_params.sort_by(|a, b| a.0.cmp(b.0));
    let params_str: Vec<String> = sub_params
        .iter()
        .map(|(k, v)| match v {
            Some(val) => format!("{k}={val}"),
            None => (*k).to_owned(),
        })
        .collect();
    format!("{path}?{}", params_str.join("&"))
}

/// Compute the legacy signature: Base64(HMAC-SHA1(secret, string_to_sign)).
fn compute_sigv2_signature(secret_key: &str, string_to_sign: &str) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret_key.as_bytes()).expect("HMAC can accept any key length");
    mac.update(string_to_sign.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}
