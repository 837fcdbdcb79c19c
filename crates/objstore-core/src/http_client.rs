//! [`S3Api`] over HTTP.
//!
//! Requests are built by hand, signed with SigV4 by `objstore-auth`, and sent
//! with `reqwest`. Redirects are never followed: S3 answers a request sent to
//! the wrong region with `301`, and replaying a signed request elsewhere
//! cannot succeed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use http::header::{CONTENT_LENGTH, ETAG};
use http::{HeaderMap, Method, StatusCode};
use objstore_auth::canonical::{encode_query, uri_encode_path};
use objstore_auth::{
    CredentialProvider, SigningParams, hash_payload, presign_v2, presign_v4, sign_request,
};
use objstore_xml::{
    CompleteMultipartUpload, CompleteMultipartUploadResult, ErrorResponse,
    InitiateMultipartUploadResult, ListBucketResult, from_xml, root_element, to_xml,
};
use tracing::debug;
use typed_builder::TypedBuilder;
use url::Url;

use crate::client::{
    ByteStream, CompleteMultipartUploadInput, CreateMultipartUploadInput, GetObjectOutput,
    HeadObjectOutput, ListObjectsV2Input, ObjectTarget, PutObjectInput, S3Api, UploadPartInput,
};
use crate::config::SignatureVersion;
use crate::error::ApiError;
use crate::sse::ServerSideEncryption;

const REQUEST_ID_HEADER: &str = "x-amz-request-id";

/// Whether `bucket` can be addressed as a subdomain of the endpoint.
///
/// The name must be a valid DNS label sequence (lowercase letters, digits,
/// hyphens and single dots, 3 to 63 characters, not an IPv4 address). Over
/// `https` the name must not contain dots, since the wildcard certificate
/// only covers one level.
///
/// # Examples
///
/// ```
/// use objstore_core::http_client::is_virtual_hostable;
///
/// assert!(is_virtual_hostable("velero-backups", "https"));
/// assert!(!is_virtual_hostable("velero.backups", "https"));
/// assert!(is_virtual_hostable("velero.backups", "http"));
/// assert!(!is_virtual_hostable("Velero_Backups", "http"));
/// ```
#[must_use]
pub fn is_virtual_hostable(bucket: &str, scheme: &str) -> bool {
    let bytes = bucket.as_bytes();
    if !(3..=63).contains(&bytes.len()) {
        return false;
    }
    let is_edge = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !is_edge(bytes[0]) || !is_edge(bytes[bytes.len() - 1]) {
        return false;
    }
    if !bytes
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return false;
    }
    if bucket.contains("..") || bucket.parse::<std::net::Ipv4Addr>().is_ok() {
        return false;
    }
    !(scheme == "https" && bucket.contains('.'))
}

/// A request URL and, for virtual-hosted addressing, the bucket carried in
/// the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestUrl {
    pub(crate) url: String,
    pub(crate) virtual_host_bucket: Option<String>,
}

/// Build the URL of a bucket or object on `endpoint`.
///
/// `query` must already be encoded. Keys with `.` or `..` segments are
/// rejected: URL parsers collapse them, so the request would reach a path
/// other than the one signed.
pub(crate) fn request_url(
    endpoint: &Url,
    force_path_style: bool,
    bucket: &str,
    key: Option<&str>,
    query: &str,
) -> Result<RequestUrl, ApiError> {
    if let Some(key) = key.filter(|k| has_dot_segment(k)) {
        return Err(ApiError::InvalidRequest(format!(
            "object key {key:?} contains a \".\" or \"..\" path segment"
        )));
    }

    let scheme = endpoint.scheme();
    let host = endpoint.host_str().unwrap_or_default();
    let port = endpoint.port().map(|p| format!(":{p}")).unwrap_or_default();
    let base_path = endpoint.path().trim_end_matches('/');
    let key_path = key
        .map(|k| format!("/{}", uri_encode_path(k)))
        .unwrap_or_default();

    let virtual_host = !force_path_style && is_virtual_hostable(bucket, scheme);
    let mut url = if virtual_host {
        let path = if key_path.is_empty() { "/" } else { key_path.as_str() };
        format!("{scheme}://{bucket}.{host}{port}{base_path}{path}")
    } else {
        format!("{scheme}://{host}{port}{base_path}/{bucket}{key_path}")
    };
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }

    Ok(RequestUrl {
        url,
        virtual_host_bucket: virtual_host.then(|| bucket.to_owned()),
    })
}

fn has_dot_segment(key: &str) -> bool {
    key.split('/').any(|segment| segment == "." || segment == "..")
}

/// An S3 client speaking HTTP to one endpoint.
#[derive(Debug, Clone, TypedBuilder)]
pub struct HttpS3Client {
    /// Transport.
    http: reqwest::Client,
    /// Endpoint every request is sent to.
    endpoint: Url,
    /// Region requests are signed for.
    #[builder(setter(into))]
    region: String,
    /// Always use path-style addressing.
    #[builder(default)]
    force_path_style: bool,
    /// How presigned URLs are signed.
    #[builder(default)]
    signature_version: SignatureVersion,
    /// Source of signing credentials.
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpS3Client {
    /// The endpoint requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The signing region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn url(&self, bucket: &str, key: Option<&str>, query: &str) -> Result<RequestUrl, ApiError> {
        request_url(&self.endpoint, self.force_path_style, bucket, key, query)
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        headers: Vec<(&'static str, String)>,
        body: Bytes,
    ) -> Result<reqwest::Response, ApiError> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e| ApiError::InvalidRequest(format!("{url}: {e}")))?;

        let mut builder = http::Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        let (mut parts, ()) = builder
            .body(())
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?
            .into_parts();

        let credentials = self.credentials.credentials().await?;
        let params = SigningParams::new(&credentials, &self.region, Utc::now());
        sign_request(&mut parts, &hash_payload(&body), &params)?;

        debug!(method = %parts.method, url, "Sending S3 request");

        let has_body = parts.method == Method::PUT || parts.method == Method::POST;
        let mut request = self.http.request(parts.method, url).headers(parts.headers);
        if has_body {
            request = request.body(body);
        }
        let response = request.send().await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

/// Decode the error of a failed response.
async fn error_from_response(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let request_id = request_id(response.headers());
    match response.bytes().await {
        Ok(body) => service_error(status, request_id, &body),
        Err(e) => ApiError::Transport(e),
    }
}

/// Build a service error from a status and an optional `<Error>` body.
///
/// Responses without a usable body (every `HEAD`) get a code derived from
/// the status.
pub(crate) fn service_error(
    status: StatusCode,
    request_id: Option<String>,
    body: &[u8],
) -> ApiError {
    if !body.is_empty() {
        if let Ok(error) = from_xml::<ErrorResponse>(body) {
            if !error.code.is_empty() {
                return ApiError::Service {
                    status,
                    code: error.code,
                    message: error.message,
                    request_id: error.request_id.or(request_id),
                };
            }
        }
    }
    ApiError::from_status(status, request_id)
}

fn request_id(headers: &HeaderMap) -> Option<String> {
    header_string(headers, REQUEST_ID_HEADER)
}

fn header_string(headers: &HeaderMap, name: impl http::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn encryption_headers(encryption: Option<&ServerSideEncryption>) -> Vec<(&'static str, String)> {
    encryption.map(ServerSideEncryption::headers).unwrap_or_default()
}

#[async_trait]
impl S3Api for HttpS3Client {
    async fn head_object(&self, target: &ObjectTarget) -> Result<HeadObjectOutput, ApiError> {
        let url = self.url(&target.bucket, Some(&target.key), "")?;
        let response = self
            .send(
                Method::HEAD,
                url.url,
                encryption_headers(target.encryption.as_ref()),
                Bytes::new(),
            )
            .await?;

        Ok(HeadObjectOutput {
            content_length: content_length(response.headers()),
            etag: header_string(response.headers(), ETAG),
        })
    }

    async fn get_object(&self, target: &ObjectTarget) -> Result<GetObjectOutput, ApiError> {
        let url = self.url(&target.bucket, Some(&target.key), "")?;
        let response = self
            .send(
                Method::GET,
                url.url,
                encryption_headers(target.encryption.as_ref()),
                Bytes::new(),
            )
            .await?;

        let content_length = content_length(response.headers());
        let body = ByteStream::new(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ApiError::from)),
        );
        Ok(GetObjectOutput {
            content_length,
            body,
        })
    }

    async fn list_objects_v2(
        &self,
        input: &ListObjectsV2Input,
    ) -> Result<ListBucketResult, ApiError> {
        let mut params = vec![("list-type", "2")];
        if let Some(prefix) = input.prefix.as_deref() {
            params.push(("prefix", prefix));
        }
        if let Some(delimiter) = input.delimiter.as_deref() {
            params.push(("delimiter", delimiter));
        }
        if let Some(token) = input.continuation_token.as_deref() {
            params.push(("continuation-token", token));
        }

        let url = self.url(&input.bucket, None, &encode_query(&params))?;
        let response = self.send(Method::GET, url.url, Vec::new(), Bytes::new()).await?;
        let body = response.bytes().await?;
        Ok(from_xml(&body)?)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ApiError> {
        let url = self.url(bucket, Some(key), "")?;
        self.send(Method::DELETE, url.url, Vec::new(), Bytes::new())
            .await?;
        Ok(())
    }

    async fn put_object(&self, input: PutObjectInput) -> Result<Option<String>, ApiError> {
        let url = self.url(&input.bucket, Some(&input.key), "")?;
        let response = self
            .send(
                Method::PUT,
                url.url,
                encryption_headers(input.encryption.as_ref()),
                input.body,
            )
            .await?;
        Ok(header_string(response.headers(), ETAG))
    }

    async fn create_multipart_upload(
        &self,
        input: &CreateMultipartUploadInput,
    ) -> Result<String, ApiError> {
        let url = self.url(&input.bucket, Some(&input.key), "uploads")?;
        let response = self
            .send(
                Method::POST,
                url.url,
                encryption_headers(input.encryption.as_ref()),
                Bytes::new(),
            )
            .await?;
        let body = response.bytes().await?;
        let result: InitiateMultipartUploadResult = from_xml(&body)?;
        Ok(result.upload_id)
    }

    async fn upload_part(&self, input: UploadPartInput) -> Result<String, ApiError> {
        let part_number = input.part_number.to_string();
        let query = encode_query(&[
            ("partNumber", part_number.as_str()),
            ("uploadId", input.upload_id.as_str()),
        ]);
        let url = self.url(&input.bucket, Some(&input.key), &query)?;
        let response = self
            .send(
                Method::PUT,
                url.url,
                encryption_headers(input.encryption.as_ref()),
                input.body,
            )
            .await?;
        header_string(response.headers(), ETAG).ok_or(ApiError::MissingHeader("ETag"))
    }

    async fn complete_multipart_upload(
        &self,
        input: &CompleteMultipartUploadInput,
    ) -> Result<(), ApiError> {
        let query = encode_query(&[("uploadId", input.upload_id.as_str())]);
        let url = self.url(&input.bucket, Some(&input.key), &query)?;
        let body = to_xml(
            "CompleteMultipartUpload",
            &CompleteMultipartUpload {
                parts: input.parts.clone(),
            },
        )?;
        let response = self
            .send(
                Method::POST,
                url.url,
                vec![("content-type", "application/xml".to_owned())],
                Bytes::from(body),
            )
            .await?;

        // A completion can fail after the 200 status line has been sent.
        let status = response.status();
        let request_id = request_id(response.headers());
        let body = response.bytes().await?;
        if root_element(&body)? == "Error" {
            return Err(service_error(status, request_id, &body));
        }
        let result: CompleteMultipartUploadResult = from_xml(&body)?;
        debug!(
            bucket = %input.bucket,
            key = %input.key,
            etag = ?result.etag,
            "Completed multipart upload"
        );
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ApiError> {
        let query = encode_query(&[("uploadId", upload_id)]);
        let url = self.url(bucket, Some(key), &query)?;
        self.send(Method::DELETE, url.url, Vec::new(), Bytes::new())
            .await?;
        Ok(())
    }

    async fn presign_get_object(
        &self,
        target: &ObjectTarget,
        expires: Duration,
    ) -> Result<String, ApiError> {
        let url = self.url(&target.bucket, Some(&target.key), "")?;
        let uri: http::Uri = url
            .url
            .parse()
            .map_err(|e| ApiError::InvalidRequest(format!("{}: {e}", url.url)))?;

        let headers = encryption_headers(target.encryption.as_ref());
        let headers: Vec<(&str, &str)> = headers
            .iter()
            .map(|(name, value)| (*name, value.as_str()))
            .collect();

        let credentials = self.credentials.credentials().await?;
        let now = Utc::now();
        let signed = match self.signature_version {
            SignatureVersion::V4 => {
                let params = SigningParams::new(&credentials, &self.region, now);
                presign_v4("GET", &uri, &headers, expires, &params)?
            }
            SignatureVersion::V1 => presign_v2(
                "GET",
                &uri,
                url.virtual_host_bucket.as_deref(),
                &headers,
                expires,
                &credentials,
                now,
            )?,
        };
        Ok(signed)
    }
}
