//! AWS Signature Version 4 header signing.
//!
//! Signing an outgoing request follows the SigV4 flow:
//!
//! 1. Add `host`, `x-amz-date`, `x-amz-content-sha256` (and
//!    `x-amz-security-token` for temporary credentials) to the request.
//! 2. Build the canonical request over the signable headers.
//! 3. Build the string to sign from the timestamp, credential scope, and
//!    canonical request hash.
//! 4. Derive the signing key with the HMAC-SHA256 chain and compute the signature.
//! 5. Attach the `Authorization` header.
//!
//! The main entry point is [`sign_request`].

use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use http::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::canonical::build_canonical_request;
use crate::credentials::Credentials;
use crate::error::SigningError;

/// The SigV4 signing algorithm identifier.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Payload hash marker used when the body is not hashed (presigned URLs, streamed bodies).
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Header carrying the session token of temporary credentials.
pub const SECURITY_TOKEN_HEADER: &str = "x-amz-security-token";

type HmacSha256 = Hmac<Sha256>;

/// Everything needed to sign one request besides the request itself.
#[derive(Debug, Clone, Copy)]
pub struct SigningParams<'a> {
    /// Credentials to sign with.
    pub credentials: &'a Credentials,
    /// Region of the credential scope.
    pub region: &'a str,
    /// Service of the credential scope (always `s3` for this workspace).
    pub service: &'a str,
    /// Signing time.
    pub time: DateTime<Utc>,
}

impl<'a> SigningParams<'a> {
    /// Signing parameters for the `s3` service.
    #[must_use]
    pub fn new(credentials: &'a Credentials, region: &'a str, time: DateTime<Utc>) -> Self {
        Self {
            credentials,
            region,
            service: "s3",
            time,
        }
    }

    /// The `YYYYMMDD` date of the credential scope.
    #[must_use]
    pub fn date(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    /// The ISO 8601 basic timestamp (`YYYYMMDDTHHMMSSZ`).
    #[must_use]
    pub fn timestamp(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    /// The credential scope: `date/region/service/aws4_request`.
    #[must_use]
    pub fn credential_scope(&self) -> String {
        format!("{}/{}/{}/aws4_request", self.date(), self.region, self.service)
    }

    pub(crate) fn signing_key(&self) -> Vec<u8> {
        derive_signing_key(
            self.credentials.secret_access_key(),
            &self.date(),
            self.region,
            self.service,
        )
    }
}

/// Sign an outgoing request in place by adding the SigV4 headers.
///
/// `payload_hash` is the hex SHA-256 of the body, or [`UNSIGNED_PAYLOAD`].
/// Signed headers are `host`, `content-md5`, `content-type`, `range`, and
/// every `x-amz-*` header present on the request.
///
/// # Errors
///
/// Returns [`SigningError::MissingHost`] if the URI is not absolute, or
/// [`SigningError::InvalidHeaderValue`] if a signable header is not visible ASCII.
pub fn sign_request(
    parts: &mut http::request::Parts,
    payload_hash: &str,
    params: &SigningParams<'_>,
) -> Result<(), SigningError> {
    let host = host_header_value(&parts.uri)?;
    let timestamp = params.timestamp();

    set_header(&mut parts.headers, "host", &host)?;
    set_header(&mut parts.headers, "x-amz-date", &timestamp)?;
    set_header(&mut parts.headers, "x-amz-content-sha256", payload_hash)?;
    if let Some(token) = params.credentials.session_token() {
        set_header(&mut parts.headers, SECURITY_TOKEN_HEADER, token)?;
    }

    let mut signed_headers: Vec<&str> = parts
        .headers
        .keys()
        .map(HeaderName::as_str)
        .filter(|name| is_signable(name))
        .collect();
    signed_headers.sort_unstable();
    signed_headers.dedup();

    let mut header_pairs = Vec::new();
    for &name in &signed_headers {
        for value in parts.headers.get_all(name) {
            let value = value
                .to_str()
                .map_err(|_| SigningError::InvalidHeaderValue(name.to_owned()))?;
            header_pairs.push((name, value));
        }
    }

    let canonical_request = build_canonical_request(
        parts.method.as_str(),
        parts.uri.path(),
        parts.uri.query().unwrap_or(""),
        &header_pairs,
        &signed_headers,
        payload_hash,
    );

    debug!(canonical_request, "Built canonical request");

    let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    let credential_scope = params.credential_scope();
    let string_to_sign = build_string_to_sign(&timestamp, &credential_scope, &canonical_hash);

    debug!(string_to_sign, "Built string to sign");

    let signature = compute_signature(&params.signing_key(), &string_to_sign);
    let authorization = format!(
        "{ALGORITHM} Credential={}/{credential_scope},SignedHeaders={},Signature={signature}",
        params.credentials.access_key_id(),
        signed_headers.join(";"),
    );

    let value = HeaderValue::from_str(&authorization)
        .map_err(|_| SigningError::InvalidHeaderValue(AUTHORIZATION.to_string()))?;
    parts.headers.insert(AUTHORIZATION, value);

    Ok(())
}

/// Build the SigV4 string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256\n
/// <ISO8601 timestamp>\n
/// <credential_scope>\n
/// <hex(SHA256(canonical_request))>
/// ```
#[must_use]
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request_hash: &str,
) -> String {
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{canonical_request_hash}")
}

/// Derive the SigV4 signing key using the HMAC-SHA256 chain.
///
/// ```text
/// DateKey              = HMAC-SHA256("AWS4" + secret_key, date)
/// DateRegionKey        = HMAC-SHA256(DateKey, region)
/// DateRegionServiceKey = HMAC-SHA256(DateRegionKey, service)
/// SigningKey           = HMAC-SHA256(DateRegionServiceKey, "aws4_request")
/// ```
#[must_use]
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let date_region_key = hmac_sha256(&date_key, region.as_bytes());
    let date_region_service_key = hmac_sha256(&date_region_key, service.as_bytes());
    hmac_sha256(&date_region_service_key, b"aws4_request")
}

/// Compute the hex-encoded HMAC-SHA256 signature of `data`.
#[must_use]
pub fn compute_signature(signing_key: &[u8], data: &str) -> String {
    hex::encode(hmac_sha256(signing_key, data.as_bytes()))
}

/// Compute the hex SHA-256 of a payload, for the `x-amz-content-sha256` header.
///
/// # Examples
///
/// ```
/// use objstore_auth::sigv4::hash_payload;
///
/// assert_eq!(
///     hash_payload(b""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// The value of the `host` header for a URI: the host, plus the port when it
/// is not the scheme default.
pub(crate) fn host_header_value(uri: &http::Uri) -> Result<String, SigningError> {
    let authority = uri
        .authority()
        .ok_or_else(|| SigningError::MissingHost(uri.to_string()))?;
    let host = authority.host();
    let default_port = match uri.scheme_str() {
        Some("http") => Some(80),
        Some("https") => Some(443),
        _ => None,
    };
    match authority.port_u16() {
        Some(port) if Some(port) != default_port => Ok(format!("{host}:{port}")),
        _ => Ok(host.to_owned()),
    }
}

fn is_signable(name: &str) -> bool {
    matches!(name, "host" | "content-md5" | "content-type" | "range") || name.starts_with("x-amz-")
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), SigningError> {
    let value =
        HeaderValue::from_str(value).map_err(|_| SigningError::InvalidHeaderValue(name.to_owned()))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
