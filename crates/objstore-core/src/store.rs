//! The object store façade.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use objstore_xml::ListBucketResult;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::client::{ByteStream, ListObjectsV2Input, ObjectTarget, S3Api};
use crate::config::StoreConfig;
use crate::error::{ApiError, StoreError};
use crate::region::{HttpRegionResolver, RegionResolver};
use crate::session::{HttpSessionFactory, SessionFactory, SessionOptions};
use crate::sse::EncryptionPolicy;
use crate::upload::Uploader;

/// Region signed for when a custom endpoint is configured without one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Error code of a `HEAD` for a missing object.
const NOT_FOUND_CODE: &str = "NotFound";

/// A presigned download URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    /// The URL.
    pub url: String,
    /// Headers the downloader must send with the `GET`, keyed by lowercase
    /// name. They are covered by the signature.
    pub headers: HashMap<String, String>,
}

/// Backup artifact storage in one S3-compatible service.
///
/// Built once by [`ObjectStore::init`] and immutable afterwards; every
/// operation is a fresh round trip and the store can be shared freely
/// between tasks.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    client: Arc<dyn S3Api>,
    presign_client: Arc<dyn S3Api>,
    encryption: EncryptionPolicy,
    uploader: Uploader,
}

impl ObjectStore {
    /// Build a store from a configuration map, talking to S3 over HTTP with
    /// credentials from the AWS chain.
    ///
    /// # Errors
    ///
    /// Fails if the map is invalid, the bucket region cannot be discovered,
    /// or a session cannot be opened.
    pub async fn init(config: &HashMap<String, String>) -> Result<Self, StoreError> {
        let resolver = HttpRegionResolver::new()?;
        Self::init_with(config, &resolver, &HttpSessionFactory::new()).await
    }

    /// Build a store with the given collaborators.
    ///
    /// The map is validated completely before `resolver` or `factory` is
    /// used, so a bad map causes no network traffic.
    ///
    /// # Errors
    ///
    /// See [`ObjectStore::init`].
    pub async fn init_with(
        config: &HashMap<String, String>,
        resolver: &dyn RegionResolver,
        factory: &dyn SessionFactory,
    ) -> Result<Self, StoreError> {
        let config = StoreConfig::from_map(config)?;

        let region = match &config.region {
            Some(region) => region.clone(),
            None if config.needs_region_discovery() => resolver
                .bucket_region(&config.bucket)
                .await
                .map_err(|source| StoreError::RegionDiscovery {
                    bucket: config.bucket.clone(),
                    source,
                })?,
            None => DEFAULT_REGION.to_owned(),
        };

        let options = SessionOptions {
            region,
            endpoint: config.s3_url.clone(),
            force_path_style: config.s3_force_path_style,
            insecure_skip_tls_verify: config.insecure_skip_tls_verify,
            ca_bundle: config.ca_cert.clone(),
            profile: config.profile.clone(),
            signature_version: config.signature_version,
        };

        let client = open_session(factory, &options).await?;
        let presign_client = match &config.public_url {
            Some(public_url) => {
                open_session(factory, &options.with_endpoint(public_url.clone())).await?
            }
            None => Arc::clone(&client),
        };

        info!(
            bucket = %config.bucket,
            region = %options.region,
            endpoint = ?config.s3_url.as_ref().map(url::Url::as_str),
            public_url = ?config.public_url.as_ref().map(url::Url::as_str),
            force_path_style = options.force_path_style,
            signature_version = %options.signature_version,
            "Initialized object store"
        );

        Ok(Self {
            client,
            presign_client,
            encryption: config.encryption_policy(),
            uploader: Uploader::new(),
        })
    }

    /// Build a store from already opened clients.
    #[must_use]
    pub fn from_clients(
        client: Arc<dyn S3Api>,
        presign_client: Option<Arc<dyn S3Api>>,
        encryption: EncryptionPolicy,
    ) -> Self {
        let presign_client = presign_client.unwrap_or_else(|| Arc::clone(&client));
        Self {
            client,
            presign_client,
            encryption,
            uploader: Uploader::new(),
        }
    }

    /// Replace the uploader used by [`ObjectStore::put_object`].
    #[must_use]
    pub fn with_uploader(mut self, uploader: Uploader) -> Self {
        self.uploader = uploader;
        self
    }

    /// Upload everything `body` yields to `bucket`/`key`.
    pub async fn put_object<R>(&self, bucket: &str, key: &str, body: R) -> Result<(), StoreError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.uploader
            .upload(&self.client, bucket, key, body, self.encryption.for_write())
            .await
            .map_err(StoreError::request("putting object", key))
    }

    /// Whether `bucket`/`key` exists.
    ///
    /// A `NotFound` answer is `Ok(false)`; any other failure is an error.
    pub async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let target = ObjectTarget::new(bucket, key).with_encryption(self.encryption.for_read());

        debug!(bucket, key, "Checking if object exists");
        match self.client.head_object(&target).await {
            Ok(_) => {
                debug!(bucket, key, "Object exists");
                Ok(true)
            }
            Err(err) if err.code() == Some(NOT_FOUND_CODE) => {
                debug!(bucket, key, "Object does not exist");
                Ok(false)
            }
            Err(err) => Err(StoreError::request("checking object", key)(err)),
        }
    }

    /// Stream the body of `bucket`/`key`.
    ///
    /// The stream does not borrow the store.
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, StoreError> {
        let target = ObjectTarget::new(bucket, key).with_encryption(self.encryption.for_read());
        let output = self
            .client
            .get_object(&target)
            .await
            .map_err(StoreError::request("getting object", key))?;
        Ok(output.body)
    }

    /// All keys under `prefix`, in reverse lexicographic order.
    ///
    /// Some providers keep a marker object for a folder under the folder's
    /// own prefix. Reverse order puts the objects inside a folder before its
    /// marker, so a caller deleting in listed order removes the marker last.
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        self.list_pages(bucket, prefix, None, |page| {
            keys.extend(page.contents.into_iter().map(|object| object.key));
        })
        .await
        .map_err(StoreError::request("listing objects under", prefix))?;

        keys.sort_unstable_by(|a, b| b.cmp(a));
        Ok(keys)
    }

    /// The first-level prefixes under `prefix` ending in `delimiter`, in the
    /// order the provider returns them.
    pub async fn list_common_prefixes(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut prefixes = Vec::new();
        self.list_pages(bucket, prefix, Some(delimiter), |page| {
            prefixes.extend(page.common_prefixes);
        })
        .await
        .map_err(StoreError::request("listing common prefixes under", prefix))?;
        Ok(prefixes)
    }

    /// Delete `bucket`/`key`.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object(bucket, key)
            .await
            .map_err(StoreError::request("deleting object", key))
    }

    /// A URL granting anonymous `GET` access to `bucket`/`key` for `ttl`.
    ///
    /// With customer-key encryption configured the key headers are signed
    /// into the URL and returned in [`SignedUrl::headers`]; the downloader
    /// has to send exactly those.
    pub async fn create_signed_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<SignedUrl, StoreError> {
        info!(bucket, key, ttl_secs = ttl.as_secs(), "Creating signed URL");

        let target = ObjectTarget::new(bucket, key).with_encryption(self.encryption.for_read());
        let url = self
            .presign_client
            .presign_get_object(&target, ttl)
            .await
            .map_err(StoreError::request("presigning object", key))?;

        Ok(SignedUrl {
            url,
            headers: self.encryption.presign_headers(),
        })
    }

    /// Fetch every listing page under `prefix`, handing each to `on_page`.
    async fn list_pages(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        mut on_page: impl FnMut(ListBucketResult) + Send,
    ) -> Result<(), ApiError> {
        let mut input = ListObjectsV2Input {
            bucket: bucket.to_owned(),
            prefix: Some(prefix.to_owned()).filter(|p| !p.is_empty()),
            delimiter: delimiter.map(str::to_owned).filter(|d| !d.is_empty()),
            continuation_token: None,
        };

        loop {
            let page = self.client.list_objects_v2(&input).await?;
            let next = if page.is_truncated {
                page.next_continuation_token.clone()
            } else {
                None
            };
            on_page(page);

            match next {
                Some(token) => {
                    debug!(bucket, prefix, "Fetching next listing page");
                    input.continuation_token = Some(token);
                }
                None => return Ok(()),
            }
        }
    }
}

async fn open_session(
    factory: &dyn SessionFactory,
    options: &SessionOptions,
) -> Result<Arc<dyn S3Api>, StoreError> {
    factory
        .create_session(options)
        .await
        .map_err(|source| StoreError::Session {
            endpoint: options
                .endpoint
                .as_ref()
                .map_or_else(|| format!("region {}", options.region), ToString::to_string),
            source,
        })
}
