//! Error types for the object store.
//!
//! Three layers, from the inside out:
//!
//! - [`ConfigError`]: the configuration map or a session setting is unusable.
//!   Always raised during initialization, never retried.
//! - [`ApiError`]: one S3 call failed, either at the transport or because the
//!   service answered with an error.
//! - [`StoreError`]: what [`crate::ObjectStore`] returns. Every request error
//!   carries the operation and the object key it was issued for.

use std::io;
use std::path::PathBuf;

use http::StatusCode;
use objstore_auth::SigningError;
use objstore_xml::XmlError;

/// A configuration map or session setting that cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The map contains a key outside the recognized option set.
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    /// A boolean option holds something other than a boolean literal.
    #[error("could not parse {key} (expected bool): {value:?}")]
    InvalidBool {
        /// Option name.
        key: &'static str,
        /// Offending value.
        value: String,
    },

    /// The signature version is neither `1` nor `4`.
    #[error("invalid signature version: {0}")]
    InvalidSignatureVersion(String),

    /// An endpoint option is not an absolute `http` or `https` URL.
    #[error("invalid {key} {value:?}: URL must be absolute and start with http:// or https://")]
    InvalidUrl {
        /// Option name.
        key: &'static str,
        /// Offending value.
        value: String,
    },

    /// The customer encryption key file could not be read.
    #[error("failed to read customer encryption key file {}: {source}", path.display())]
    CustomerKeyRead {
        /// Path of the key file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The customer encryption key file does not hold valid base64.
    #[error("failed to decode customer encryption key from {}: {source}", path.display())]
    CustomerKeyDecode {
        /// Path of the key file.
        path: PathBuf,
        /// Underlying decode error.
        source: base64::DecodeError,
    },

    /// The CA bundle holds no usable PEM certificate.
    #[error("invalid CA certificate bundle: {0}")]
    InvalidCaBundle(String),

    /// The HTTP transport could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// The credential chain could not be set up.
    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

/// A failed S3 call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The service answered with an error status.
    #[error("{code}: {message} (status {status})")]
    Service {
        /// HTTP status of the response.
        status: StatusCode,
        /// S3 error code, e.g. `NoSuchKey`. Synthesized from the status
        /// reason phrase when the response has no body.
        code: String,
        /// Human-readable message.
        message: String,
        /// Request identifier assigned by the service.
        request_id: Option<String>,
    },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A response body could not be decoded, or a request body encoded.
    #[error("malformed XML: {0}")]
    Xml(#[from] XmlError),

    /// The request could not be signed.
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),

    /// Reading the caller's body failed.
    #[error("failed to read body: {0}")]
    Body(#[from] io::Error),

    /// The request could not be formed from its inputs.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A response lacked a header the call depends on.
    #[error("response is missing the {0} header")]
    MissingHeader(&'static str),

    /// A background part upload panicked or was cancelled.
    #[error("upload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    /// Build a service error from a status with no response body, deriving
    /// the code from the reason phrase: `404 Not Found` becomes `NotFound`.
    #[must_use]
    pub fn from_status(status: StatusCode, request_id: Option<String>) -> Self {
        let reason = status.canonical_reason().unwrap_or("Unknown");
        Self::Service {
            status,
            code: reason.replace(' ', ""),
            message: status.to_string(),
            request_id,
        }
    }

    /// The S3 error code, when the service produced one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    /// The HTTP status, when the service answered.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Service { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors returned by [`crate::ObjectStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The configuration map was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The region of the bucket could not be determined.
    #[error("failed to determine region of bucket {bucket:?}: {source}")]
    RegionDiscovery {
        /// Bucket whose region was looked up.
        bucket: String,
        /// Underlying failure.
        source: ApiError,
    },

    /// A client session could not be built for an endpoint.
    #[error("failed to create session for {endpoint}: {source}")]
    Session {
        /// Endpoint the session targets.
        endpoint: String,
        /// Underlying failure.
        source: ConfigError,
    },

    /// An S3 call made on behalf of an operation failed.
    #[error("error {operation} {key}: {source}")]
    Request {
        /// What the store was doing, e.g. `putting object`.
        operation: &'static str,
        /// Object key or prefix the call was for.
        key: String,
        /// Underlying failure.
        source: ApiError,
    },
}

impl StoreError {
    pub(crate) fn request(operation: &'static str, key: &str) -> impl FnOnce(ApiError) -> Self {
        let key = key.to_owned();
        move |source| Self::Request {
            operation,
            key,
            source,
        }
    }
}
