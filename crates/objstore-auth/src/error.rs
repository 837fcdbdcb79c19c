//! Error types for request signing.

/// Errors that can occur while signing or presigning a request.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The request URI has no host component, so the `host` header cannot be signed.
    #[error("request URI has no host: {0}")]
    MissingHost(String),

    /// A header value could not be represented as visible ASCII.
    #[error("invalid value for header {0}")]
    InvalidHeaderValue(String),

    /// The requested presign validity is outside the range accepted by the protocol.
    #[error("presign expiry of {0} seconds is out of range (1..={max})", max = crate::presigned::MAX_EXPIRES_SECS)]
    ExpiresOutOfRange(u64),

    /// The credential chain could not produce credentials.
    #[error("credentials unavailable: {0}")]
    CredentialsUnavailable(String),
}
