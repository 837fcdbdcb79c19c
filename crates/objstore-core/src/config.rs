//! Store configuration.
//!
//! A store is configured from a flat map of option names to strings, as
//! handed over by the backup host. [`StoreConfig::from_map`] validates the
//! whole map up front: unknown keys, malformed booleans, bad signature
//! versions and bad endpoint URLs are all rejected before anything touches
//! the network.
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `region` | Bucket region; discovered from AWS when empty and `s3Url` is unset |
//! | `s3Url` | Endpoint of an S3-compatible service |
//! | `publicUrl` | Endpoint used only for presigned URLs |
//! | `kmsKeyId` | KMS key for server-side encryption |
//! | `s3ForcePathStyle` | Always use path-style addressing |
//! | `bucket` | Bucket name |
//! | `signatureVersion` | `1` (legacy presigning) or `4` |
//! | `profile` | Named profile of the shared credentials files |
//! | `serverSideEncryption` | Server-side encryption algorithm, e.g. `AES256` |
//! | `customerEncryptionKeyFile` | File holding a base64 customer key |
//! | `insecureSkipTLSVerify` | Disable server certificate verification |
//! | `caCert` | PEM bundle of additional trusted CAs |

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use typed_builder::TypedBuilder;
use url::Url;

use crate::error::ConfigError;
use crate::sse::{CustomerKey, EncryptionPolicy};

/// `region`
pub const REGION_KEY: &str = "region";
/// `s3Url`
pub const S3_URL_KEY: &str = "s3Url";
/// `publicUrl`
pub const PUBLIC_URL_KEY: &str = "publicUrl";
/// `kmsKeyId`
pub const KMS_KEY_ID_KEY: &str = "kmsKeyId";
/// `s3ForcePathStyle`
pub const S3_FORCE_PATH_STYLE_KEY: &str = "s3ForcePathStyle";
/// `bucket`
pub const BUCKET_KEY: &str = "bucket";
/// `prefix`. Set by the host for locations with a key prefix; accepted and
/// otherwise ignored.
pub const PREFIX_KEY: &str = "prefix";
/// `signatureVersion`
pub const SIGNATURE_VERSION_KEY: &str = "signatureVersion";
/// `profile`
pub const PROFILE_KEY: &str = "profile";
/// `serverSideEncryption`
pub const SERVER_SIDE_ENCRYPTION_KEY: &str = "serverSideEncryption";
/// `customerEncryptionKeyFile`
pub const CUSTOMER_ENCRYPTION_KEY_FILE_KEY: &str = "customerEncryptionKeyFile";
/// `insecureSkipTLSVerify`
pub const INSECURE_SKIP_TLS_VERIFY_KEY: &str = "insecureSkipTLSVerify";
/// `caCert`
pub const CA_CERT_KEY: &str = "caCert";

const ALLOWED_KEYS: &[&str] = &[
    REGION_KEY,
    S3_URL_KEY,
    PUBLIC_URL_KEY,
    KMS_KEY_ID_KEY,
    S3_FORCE_PATH_STYLE_KEY,
    BUCKET_KEY,
    PREFIX_KEY,
    SIGNATURE_VERSION_KEY,
    PROFILE_KEY,
    SERVER_SIDE_ENCRYPTION_KEY,
    CUSTOMER_ENCRYPTION_KEY_FILE_KEY,
    INSECURE_SKIP_TLS_VERIFY_KEY,
    CA_CERT_KEY,
];

/// How presigned URLs are signed.
///
/// Data-plane requests are always signed with SigV4; `V1` only swaps the
/// presigner for S3-compatible services that mis-implement SigV4.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SignatureVersion {
    /// Legacy HMAC-SHA1 query-string signing.
    V1,
    /// AWS Signature Version 4.
    #[default]
    V4,
}

impl FromStr for SignatureVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(Self::V1),
            "4" => Ok(Self::V4),
            other => Err(ConfigError::InvalidSignatureVersion(other.to_owned())),
        }
    }
}

impl fmt::Display for SignatureVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => f.write_str("1"),
            Self::V4 => f.write_str("4"),
        }
    }
}

/// Validated store configuration.
///
/// # Examples
///
/// ```
/// use objstore_core::config::{SignatureVersion, StoreConfig};
///
/// let config = StoreConfig::builder()
///     .bucket("velero")
///     .region("eu-west-1")
///     .build();
/// assert_eq!(config.signature_version, SignatureVersion::V4);
/// assert!(!config.needs_region_discovery());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, TypedBuilder)]
pub struct StoreConfig {
    /// Bucket name.
    #[builder(default, setter(into))]
    pub bucket: String,

    /// Bucket region.
    #[builder(default, setter(strip_option, into))]
    pub region: Option<String>,

    /// Endpoint of an S3-compatible service.
    #[builder(default, setter(strip_option))]
    pub s3_url: Option<Url>,

    /// Endpoint used only for presigned URLs.
    #[builder(default, setter(strip_option))]
    pub public_url: Option<Url>,

    /// KMS key for server-side encryption.
    #[builder(default, setter(strip_option, into))]
    pub kms_key_id: Option<String>,

    /// Always use path-style addressing.
    #[builder(default)]
    pub s3_force_path_style: bool,

    /// How presigned URLs are signed.
    #[builder(default)]
    pub signature_version: SignatureVersion,

    /// Named credentials profile.
    #[builder(default, setter(strip_option, into))]
    pub profile: Option<String>,

    /// Server-side encryption algorithm.
    #[builder(default, setter(strip_option, into))]
    pub server_side_encryption: Option<String>,

    /// Customer-supplied encryption key.
    #[builder(default, setter(strip_option))]
    pub customer_key: Option<CustomerKey>,

    /// Disable server certificate verification.
    #[builder(default)]
    pub insecure_skip_tls_verify: bool,

    /// PEM bundle of additional trusted CAs.
    #[builder(default, setter(strip_option, into))]
    pub ca_cert: Option<String>,
}

impl StoreConfig {
    /// Validate a configuration map.
    ///
    /// Absent and empty values both mean "use the default". The customer key
    /// file, when named, is read and decoded here.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first offending option.
    pub fn from_map(config: &HashMap<String, String>) -> Result<Self, ConfigError> {
        validate_keys(config)?;

        let get = |key: &str| {
            config
                .get(key)
                .map(String::as_str)
                .filter(|value| !value.is_empty())
        };

        let s3_force_path_style = get(S3_FORCE_PATH_STYLE_KEY)
            .map(|value| parse_bool(S3_FORCE_PATH_STYLE_KEY, value))
            .transpose()?
            .unwrap_or(false);
        let insecure_skip_tls_verify = get(INSECURE_SKIP_TLS_VERIFY_KEY)
            .map(|value| parse_bool(INSECURE_SKIP_TLS_VERIFY_KEY, value))
            .transpose()?
            .unwrap_or(false);
        let signature_version = get(SIGNATURE_VERSION_KEY)
            .map(SignatureVersion::from_str)
            .transpose()?
            .unwrap_or_default();
        let s3_url = get(S3_URL_KEY)
            .map(|value| parse_url(S3_URL_KEY, value))
            .transpose()?;
        let public_url = get(PUBLIC_URL_KEY)
            .map(|value| parse_url(PUBLIC_URL_KEY, value))
            .transpose()?;
        let customer_key = get(CUSTOMER_ENCRYPTION_KEY_FILE_KEY)
            .map(|path| CustomerKey::from_file(Path::new(path)))
            .transpose()?;

        Ok(Self {
            bucket: get(BUCKET_KEY).unwrap_or_default().to_owned(),
            region: get(REGION_KEY).map(str::to_owned),
            s3_url,
            public_url,
            kms_key_id: get(KMS_KEY_ID_KEY).map(str::to_owned),
            s3_force_path_style,
            signature_version,
            profile: get(PROFILE_KEY).map(str::to_owned),
            server_side_encryption: get(SERVER_SIDE_ENCRYPTION_KEY).map(str::to_owned),
            customer_key,
            insecure_skip_tls_verify,
            ca_cert: get(CA_CERT_KEY).map(str::to_owned),
        })
    }

    /// Whether the bucket region has to be looked up: talking to AWS itself
    /// without an explicit region.
    #[must_use]
    pub fn needs_region_discovery(&self) -> bool {
        self.s3_url.is_none() && self.region.is_none()
    }

    /// The encryption policy these settings describe.
    #[must_use]
    pub fn encryption_policy(&self) -> EncryptionPolicy {
        EncryptionPolicy::new(
            self.kms_key_id.clone(),
            self.server_side_encryption.clone(),
            self.customer_key.clone(),
        )
    }
}

/// Reject keys outside the recognized option set, reporting the
/// lexicographically first one.
fn validate_keys(config: &HashMap<String, String>) -> Result<(), ConfigError> {
    let unknown = config
        .keys()
        .filter(|key| !ALLOWED_KEYS.contains(&key.as_str()))
        .min();
    match unknown {
        Some(key) => Err(ConfigError::UnknownKey(key.clone())),
        None => Ok(()),
    }
}

/// Parse a boolean option strictly: `1 t T TRUE true True` or
/// `0 f F FALSE false False`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBool`] naming `key` for anything else.
///
/// # Examples
///
/// ```
/// use objstore_core::config::parse_bool;
///
/// assert!(parse_bool("s3ForcePathStyle", "True").unwrap());
/// assert!(!parse_bool("s3ForcePathStyle", "0").unwrap());
/// assert!(parse_bool("s3ForcePathStyle", "yes").is_err());
/// ```
pub fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key,
            value: value.to_owned(),
        }),
    }
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    let invalid = || ConfigError::InvalidUrl {
        key,
        value: value.to_owned(),
    };
    let url = Url::parse(value).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(url)
}
