//! Bucket region discovery.
//!
//! S3 reports the region of any existing bucket in the
//! `x-amz-bucket-region` header, even on an anonymous request it refuses.

use std::fmt;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::{ApiError, ConfigError};
use crate::http_client::request_url;

/// The endpoint discovery requests are sent to.
pub const GLOBAL_ENDPOINT: &str = "https://s3.amazonaws.com";

/// Header carrying the region of a bucket.
pub const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

/// Looks up the region a bucket lives in.
#[async_trait]
pub trait RegionResolver: Send + Sync + fmt::Debug {
    /// The region of `bucket`.
    async fn bucket_region(&self, bucket: &str) -> Result<String, ApiError>;
}

/// Discovers regions with an unsigned `HEAD` of the bucket.
#[derive(Debug, Clone)]
pub struct HttpRegionResolver {
    http: reqwest::Client,
    endpoint: Url,
    force_path_style: bool,
}

impl HttpRegionResolver {
    /// A resolver asking the global AWS endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HttpClient`] if the transport cannot be built.
    pub fn new() -> Result<Self, ConfigError> {
        let endpoint = Url::parse(GLOBAL_ENDPOINT).map_err(|_| ConfigError::InvalidUrl {
            key: "endpoint",
            value: GLOBAL_ENDPOINT.to_owned(),
        })?;
        Self::with_endpoint(endpoint, false)
    }

    /// A resolver asking `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HttpClient`] if the transport cannot be built.
    pub fn with_endpoint(endpoint: Url, force_path_style: bool) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ConfigError::HttpClient)?;
        Ok(Self {
            http,
            endpoint,
            force_path_style,
        })
    }
}

#[async_trait]
impl RegionResolver for HttpRegionResolver {
    async fn bucket_region(&self, bucket: &str) -> Result<String, ApiError> {
        let url = request_url(&self.endpoint, self.force_path_style, bucket, None, "")?;
        let response = self.http.head(&url.url).send().await?;
        let status = response.status();

        let region = response
            .headers()
            .get(BUCKET_REGION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());
        if let Some(region) = region {
            debug!(bucket, region, %status, "Discovered bucket region");
            return Ok(region.to_owned());
        }

        if status.is_success() {
            Err(ApiError::MissingHeader(BUCKET_REGION_HEADER))
        } else {
            let request_id = response
                .headers()
                .get("x-amz-request-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            Err(ApiError::from_status(status, request_id))
        }
    }
}
