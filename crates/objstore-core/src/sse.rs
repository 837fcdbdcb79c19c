//! Server-side encryption.
//!
//! [`EncryptionPolicy`] holds the encryption settings of a store and decides,
//! per request, which [`ServerSideEncryption`] parameters to send:
//!
//! | Configured                    | Writes                  | Reads, existence checks |
//! |-------------------------------|-------------------------|-------------------------|
//! | KMS key id                    | `aws:kms` with the key  | nothing                 |
//! | algorithm and customer key    | SSE-C headers           | the same SSE-C headers  |
//! | algorithm only                | the algorithm           | nothing                 |
//! | nothing                       | nothing                 | nothing                 |
//!
//! The KMS key id wins when both KMS and customer-key settings are present.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};

use crate::error::ConfigError;

/// `x-amz-server-side-encryption`
pub const SSE_HEADER: &str = "x-amz-server-side-encryption";
/// `x-amz-server-side-encryption-aws-kms-key-id`
pub const SSE_KMS_KEY_ID_HEADER: &str = "x-amz-server-side-encryption-aws-kms-key-id";
/// `x-amz-server-side-encryption-customer-algorithm`
pub const SSE_CUSTOMER_ALGORITHM_HEADER: &str = "x-amz-server-side-encryption-customer-algorithm";
/// `x-amz-server-side-encryption-customer-key`
pub const SSE_CUSTOMER_KEY_HEADER: &str = "x-amz-server-side-encryption-customer-key";
/// `x-amz-server-side-encryption-customer-key-md5`
pub const SSE_CUSTOMER_KEY_MD5_HEADER: &str = "x-amz-server-side-encryption-customer-key-md5";

/// A customer-supplied encryption key.
///
/// The raw bytes and the base64 text come from a single decode and are only
/// ever constructed together.
#[derive(Clone, PartialEq, Eq)]
pub struct CustomerKey {
    raw: Vec<u8>,
    base64: String,
}

impl CustomerKey {
    /// Decode a key from its base64 text. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns the decode error if the text is not padded standard base64.
    pub fn from_base64(text: &str) -> Result<Self, base64::DecodeError> {
        let base64 = text.trim().to_owned();
        let raw = BASE64.decode(&base64)?;
        Ok(Self { raw, base64 })
    }

    /// Read and decode a key file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::CustomerKeyRead {
            path: path.to_owned(),
            source,
        })?;
        Self::from_base64(&text).map_err(|source| ConfigError::CustomerKeyDecode {
            path: path.to_owned(),
            source,
        })
    }

    /// The raw key bytes.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The key as base64 text, as it is sent on the wire.
    #[must_use]
    pub fn base64(&self) -> &str {
        &self.base64
    }

    /// Base64 of the MD5 digest of the raw key.
    #[must_use]
    pub fn md5_base64(&self) -> String {
        BASE64.encode(Md5::digest(&self.raw))
    }
}

impl fmt::Debug for CustomerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomerKey")
            .field("len", &self.raw.len())
            .field("md5", &self.md5_base64())
            .finish()
    }
}

/// Encryption parameters attached to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerSideEncryption {
    /// KMS-managed encryption with the given key.
    Kms {
        /// KMS key id or ARN.
        key_id: String,
    },
    /// Encryption with a customer-supplied key.
    CustomerKey {
        /// Algorithm name, normally `AES256`.
        algorithm: String,
        /// The key.
        key: CustomerKey,
    },
    /// Provider-managed encryption with the named algorithm.
    Algorithm(String),
}

impl ServerSideEncryption {
    /// The request headers carrying these parameters.
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Kms { key_id } => vec![
                (SSE_HEADER, "aws:kms".to_owned()),
                (SSE_KMS_KEY_ID_HEADER, key_id.clone()),
            ],
            Self::CustomerKey { algorithm, key } => vec![
                (SSE_CUSTOMER_ALGORITHM_HEADER, algorithm.clone()),
                (SSE_CUSTOMER_KEY_HEADER, key.base64().to_owned()),
                (SSE_CUSTOMER_KEY_MD5_HEADER, key.md5_base64()),
            ],
            Self::Algorithm(algorithm) => vec![(SSE_HEADER, algorithm.clone())],
        }
    }

    /// Whether this is customer-key encryption.
    #[must_use]
    pub fn is_customer_key(&self) -> bool {
        matches!(self, Self::CustomerKey { .. })
    }
}

/// The encryption settings of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionPolicy {
    kms_key_id: Option<String>,
    algorithm: Option<String>,
    customer_key: Option<CustomerKey>,
}

impl EncryptionPolicy {
    /// Create a policy. Empty strings count as unset.
    #[must_use]
    pub fn new(
        kms_key_id: Option<String>,
        algorithm: Option<String>,
        customer_key: Option<CustomerKey>,
    ) -> Self {
        Self {
            kms_key_id: kms_key_id.filter(|s| !s.is_empty()),
            algorithm: algorithm.filter(|s| !s.is_empty()),
            customer_key,
        }
    }

    /// Parameters for a write.
    #[must_use]
    pub fn for_write(&self) -> Option<ServerSideEncryption> {
        if let Some(key_id) = &self.kms_key_id {
            return Some(ServerSideEncryption::Kms {
                key_id: key_id.clone(),
            });
        }
        self.customer_key_encryption()
            .or_else(|| self.algorithm.clone().map(ServerSideEncryption::Algorithm))
    }

    /// Parameters for a read or an existence check.
    #[must_use]
    pub fn for_read(&self) -> Option<ServerSideEncryption> {
        self.customer_key_encryption()
    }

    /// The headers a caller of a presigned URL must send, keyed by lowercase
    /// header name. Empty unless customer-key encryption is configured.
    #[must_use]
    pub fn presign_headers(&self) -> HashMap<String, String> {
        self.customer_key_encryption()
            .map(|sse| {
                sse.headers()
                    .into_iter()
                    .map(|(name, value)| (name.to_owned(), value))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn customer_key_encryption(&self) -> Option<ServerSideEncryption> {
        match (&self.algorithm, &self.customer_key) {
            (Some(algorithm), Some(key)) => Some(ServerSideEncryption::CustomerKey {
                algorithm: algorithm.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }
}
