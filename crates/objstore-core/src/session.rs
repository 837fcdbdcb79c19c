//! S3 sessions: an endpoint, a transport and a credential source bound
//! together into an [`S3Api`].
//!
//! [`SessionFactory`] is the seam the store is built through, so tests can
//! hand out in-memory clients instead of [`HttpS3Client`]s.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use objstore_auth::{CredentialProvider, Credentials, SigningError};
use tracing::{debug, warn};
use typed_builder::TypedBuilder;
use url::Url;

use crate::client::S3Api;
use crate::config::{REGION_KEY, SignatureVersion};
use crate::error::ConfigError;
use crate::http_client::HttpS3Client;

/// Everything needed to open one session.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct SessionOptions {
    /// Region requests are signed for.
    #[builder(setter(into))]
    pub region: String,
    /// Custom endpoint. The AWS endpoint of `region` when unset.
    #[builder(default, setter(strip_option))]
    pub endpoint: Option<Url>,
    /// Always use path-style addressing.
    #[builder(default)]
    pub force_path_style: bool,
    /// Disable server certificate verification.
    #[builder(default)]
    pub insecure_skip_tls_verify: bool,
    /// PEM bundle of additional trusted CAs.
    #[builder(default, setter(strip_option, into))]
    pub ca_bundle: Option<String>,
    /// Named credentials profile.
    #[builder(default, setter(strip_option, into))]
    pub profile: Option<String>,
    /// How presigned URLs are signed.
    #[builder(default)]
    pub signature_version: SignatureVersion,
}

impl SessionOptions {
    /// The endpoint requests go to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if no endpoint is set and the
    /// region cannot form a host name.
    pub fn resolved_endpoint(&self) -> Result<Url, ConfigError> {
        resolve_endpoint(&self.region, self.endpoint.as_ref())
    }

    /// The same options pointed at another endpoint.
    #[must_use]
    pub fn with_endpoint(&self, endpoint: Url) -> Self {
        Self {
            endpoint: Some(endpoint),
            ..self.clone()
        }
    }
}

/// The endpoint for `region`, or `custom` when one is given.
///
/// # Examples
///
/// ```
/// use objstore_core::session::resolve_endpoint;
///
/// let url = resolve_endpoint("eu-central-1", None).unwrap();
/// assert_eq!(url.as_str(), "https://s3.eu-central-1.amazonaws.com/");
///
/// let url = resolve_endpoint("cn-north-1", None).unwrap();
/// assert_eq!(url.as_str(), "https://s3.cn-north-1.amazonaws.com.cn/");
/// ```
pub fn resolve_endpoint(region: &str, custom: Option<&Url>) -> Result<Url, ConfigError> {
    if let Some(url) = custom {
        return Ok(url.clone());
    }
    let suffix = if region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    };
    let url = format!("https://s3.{region}.{suffix}");
    match Url::parse(&url) {
        Ok(url) if url.host_str().is_some_and(|h| h.starts_with("s3.")) => Ok(url),
        _ => Err(ConfigError::InvalidUrl {
            key: REGION_KEY,
            value: region.to_owned(),
        }),
    }
}

/// Build the transport for a session.
///
/// Redirects are never followed. A CA bundle is added on top of the
/// built-in roots.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidCaBundle`] if the bundle holds no
/// certificate, or [`ConfigError::HttpClient`] if the client cannot be built.
pub fn build_http_client(options: &SessionOptions) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());

    if options.insecure_skip_tls_verify {
        warn!(
            endpoint = ?options.endpoint.as_ref().map(Url::as_str),
            "TLS certificate verification is disabled"
        );
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(bundle) = &options.ca_bundle {
        let certificates = reqwest::Certificate::from_pem_bundle(bundle.as_bytes())
            .map_err(|e| ConfigError::InvalidCaBundle(e.to_string()))?;
        if certificates.is_empty() {
            return Err(ConfigError::InvalidCaBundle(
                "no PEM certificates found".to_owned(),
            ));
        }
        debug!(count = certificates.len(), "Adding custom CA certificates");
        for certificate in certificates {
            builder = builder.add_root_certificate(certificate);
        }
    }

    builder.build().map_err(ConfigError::HttpClient)
}

/// Credentials from the standard AWS chain: environment, shared files
/// (optionally a named profile), web identity, container and instance
/// metadata.
#[derive(Debug, Clone)]
pub struct AwsChainCredentialProvider {
    inner: SharedCredentialsProvider,
}

impl AwsChainCredentialProvider {
    /// Set up the chain for `region`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Credentials`] if the chain has no provider.
    pub async fn load(region: &str, profile: Option<&str>) -> Result<Self, ConfigError> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_owned()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;
        let inner = config.credentials_provider().ok_or_else(|| {
            ConfigError::Credentials("no credentials provider in the default chain".to_owned())
        })?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl CredentialProvider for AwsChainCredentialProvider {
    async fn credentials(&self) -> Result<Credentials, SigningError> {
        let resolved = self
            .inner
            .provide_credentials()
            .await
            .map_err(|e| SigningError::CredentialsUnavailable(e.to_string()))?;
        Ok(Credentials::new(
            resolved.access_key_id(),
            resolved.secret_access_key(),
            resolved.session_token().map(str::to_owned),
        ))
    }
}

/// Opens sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync + fmt::Debug {
    /// Open a session with `options`.
    async fn create_session(&self, options: &SessionOptions)
    -> Result<Arc<dyn S3Api>, ConfigError>;
}

/// Opens [`HttpS3Client`] sessions.
///
/// Credentials come from the AWS chain unless a provider is supplied.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use objstore_auth::{Credentials, StaticCredentialProvider};
/// use objstore_core::session::{HttpSessionFactory, SessionFactory, SessionOptions};
///
/// # tokio_test::block_on(async {
/// let credentials = StaticCredentialProvider::new(Credentials::new("AKID", "secret", None));
/// let factory = HttpSessionFactory::with_credentials(Arc::new(credentials));
/// let options = SessionOptions::builder().region("eu-west-1").build();
/// let _session = factory.create_session(&options).await.unwrap();
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct HttpSessionFactory {
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl HttpSessionFactory {
    /// A factory using the AWS credential chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory signing with `credentials` instead of the AWS chain.
    #[must_use]
    pub fn with_credentials(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            credentials: Some(credentials),
        }
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn create_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn S3Api>, ConfigError> {
        let endpoint = options.resolved_endpoint()?;
        let http = build_http_client(options)?;
        let credentials: Arc<dyn CredentialProvider> = match &self.credentials {
            Some(credentials) => Arc::clone(credentials),
            None => Arc::new(
                AwsChainCredentialProvider::load(&options.region, options.profile.as_deref())
                    .await?,
            ),
        };

        debug!(
            endpoint = %endpoint,
            region = %options.region,
            force_path_style = options.force_path_style,
            "Opened S3 session"
        );

        Ok(Arc::new(
            HttpS3Client::builder()
                .http(http)
                .endpoint(endpoint)
                .region(options.region.clone())
                .force_path_style(options.force_path_style)
                .signature_version(options.signature_version)
                .credentials(credentials)
                .build(),
        ))
    }
}
