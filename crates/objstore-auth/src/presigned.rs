//! Presigned URL generation for AWS Signature Version 4.
//!
//! Presigned URLs carry authentication information in query parameters rather
//! than HTTP headers:
//!
//! - `X-Amz-Algorithm` - Always `AWS4-HMAC-SHA256`
//! - `X-Amz-Credential` - `AKID/date/region/service/aws4_request`
//! - `X-Amz-Date` - ISO 8601 basic format timestamp (`YYYYMMDDTHHMMSSZ`)
//! - `X-Amz-Expires` - Validity duration in seconds
//! - `X-Amz-SignedHeaders` - Semicolon-separated signed header names
//! - `X-Amz-Security-Token` - Session token, for temporary credentials only
//! - `X-Amz-Signature` - The hex-encoded signature
//!
//! The payload hash is always `UNSIGNED-PAYLOAD`. Headers passed as
//! `extra_signed_headers` are bound into the signature; whoever uses the URL
//! must send them verbatim.

use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::canonical::{build_canonical_request, encode_query};
use crate::error::SigningError;
use crate::sigv4::{
    ALGORITHM, SigningParams, UNSIGNED_PAYLOAD, build_string_to_sign, compute_signature,
    host_header_value,
};

/// Longest validity S3 accepts for a SigV4 presigned URL (7 days).
pub const MAX_EXPIRES_SECS: u64 = 604_800;

/// Whole seconds of validity, with a partial second rounded up.
pub(crate) fn expires_in_secs(expires: Duration) -> Result<u64, SigningError> {
    let secs = expires
        .as_secs()
        .saturating_add(u64::from(expires.subsec_nanos() > 0));
    if secs == 0 || secs > MAX_EXPIRES_SECS {
        return Err(SigningError::ExpiresOutOfRange(secs));
    }
    Ok(secs)
}

/// Generate a SigV4 presigned URL for `method` on `uri`.
///
/// # Errors
///
/// Returns [`SigningError::ExpiresOutOfRange`] if `expires` is zero or longer
/// than [`MAX_EXPIRES_SECS`], and [`SigningError::MissingHost`] if `uri` is
/// not absolute. A partial second counts as a full one.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use chrono::TimeZone;
/// use objstore_auth::credentials::Credentials;
/// use objstore_auth::presigned::presign_v4;
/// use objstore_auth::sigv4::SigningParams;
///
/// let credentials = Credentials::new("AKID", "secret", None);
/// let time = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let params = SigningParams::new(&credentials, "us-west-2", time);
/// let uri: http::Uri = "https://bucket.s3.us-west-2.amazonaws.com/key".parse().unwrap();
///
/// let url = presign_v4("GET", &uri, &[], Duration::from_secs(600), &params).unwrap();
/// assert!(url.starts_with("https://bucket.s3.us-west-2.amazonaws.com/key?X-Amz-Algorithm="));
/// assert!(url.contains("X-Amz-Expires=600"));
/// ```
pub fn presign_v4(
    method: &str,
    uri: &http::Uri,
    extra_signed_headers: &[(&str, &str)],
    expires: Duration,
    params: &SigningParams<'_>,
) -> Result<String, SigningError> {
    let expires_secs = expires_in_secs(expires)?;

    let host = host_header_value(uri)?;

    let lowered: Vec<(String, &str)> = extra_signed_headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), *value))
        .collect();
    let mut headers: Vec<(&str, &str)> = vec![("host", host.as_str())];
    headers.extend(lowered.iter().map(|(name, value)| (name.as_str(), *value)));

    let mut signed_headers: Vec<&str> = headers.iter().map(|(name, _)| *name).collect();
    signed_headers.sort_unstable();
    signed_headers.dedup();
    let signed_headers_str = signed_headers.join(";");

    let timestamp = params.timestamp();
    let credential_scope = params.credential_scope();
    let credential = format!(
        "{}/{credential_scope}",
        params.credentials.access_key_id()
    );
    let expires_str = expires_secs.to_string();

    let mut auth_params: Vec<(&str, &str)> = vec![
        ("X-Amz-Algorithm", ALGORITHM),
        ("X-Amz-Credential", credential.as_str()),
        ("X-Amz-Date", timestamp.as_str()),
        ("X-Amz-Expires", expires_str.as_str()),
        ("X-Amz-SignedHeaders", signed_headers_str.as_str()),
    ];
    if let Some(token) = params.credentials.session_token() {
        auth_params.push(("X-Amz-Security-Token", token));
    }

    let mut query = uri.query().map(str::to_owned).unwrap_or_default();
    if !query.is_empty() {
        query.push('&');
    }
    query.push_str(&encode_query(&auth_params));

    let canonical_request = build_canonical_request(
        method,
        uri.path(),
        &query,
        &headers,
        &signed_headers,
        UNSIGNED_PAYLOAD,
    );

    debug!(canonical_request, "Built presign canonical request");

    let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    let string_to_sign = build_string_to_sign(&timestamp, &credential_scope, &canonical_hash);
    let signature = compute_signature(&params.signing_key(), &string_to_sign);

    let scheme = uri.scheme_str().unwrap_or("https");
    let authority = uri
        .authority()
        .map(http::uri::Authority::as_str)
        .unwrap_or(host.as_str());

    Ok(format!(
        "{scheme}://{authority}{}?{query}&X-Amz-Signature={signature}",
        uri.path()
    ))
}
