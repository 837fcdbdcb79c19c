//! The S3 capability interface.
//!
//! [`S3Api`] is the narrow set of S3 calls the store makes. The HTTP
//! implementation lives in [`crate::http_client`]; tests substitute an
//! in-memory bucket.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use objstore_xml::{CompletedPart, ListBucketResult};

use crate::error::ApiError;
use crate::sse::ServerSideEncryption;

/// A streamed object body.
///
/// The stream is independent of the client that produced it; dropping it
/// before the end abandons the rest of the body.
pub struct ByteStream {
    inner: BoxStream<'static, Result<Bytes, ApiError>>,
}

impl ByteStream {
    /// Wrap a stream of chunks.
    pub fn new(stream: impl Stream<Item = Result<Bytes, ApiError>> + Send + 'static) -> Self {
        Self {
            inner: stream.boxed(),
        }
    }

    /// A body that is already in memory.
    #[must_use]
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::new(futures::stream::once(async move { Ok(bytes) }))
    }

    /// Read the whole body into memory.
    pub async fn collect(mut self) -> Result<Bytes, ApiError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}

/// An object addressed by a head, get or presign call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Customer-key parameters needed to access the object.
    pub encryption: Option<ServerSideEncryption>,
}

impl ObjectTarget {
    /// A target without encryption parameters.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            encryption: None,
        }
    }

    /// Attach encryption parameters.
    #[must_use]
    pub fn with_encryption(mut self, encryption: Option<ServerSideEncryption>) -> Self {
        self.encryption = encryption;
        self
    }
}

/// Metadata returned by `HeadObject`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadObjectOutput {
    /// Object size in bytes.
    pub content_length: Option<u64>,
    /// Entity tag.
    pub etag: Option<String>,
}

/// The result of `GetObject`.
#[derive(Debug)]
pub struct GetObjectOutput {
    /// Object size in bytes.
    pub content_length: Option<u64>,
    /// The body.
    pub body: ByteStream,
}

/// One `ListObjectsV2` page request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsV2Input {
    /// Bucket name.
    pub bucket: String,
    /// Restrict the listing to keys with this prefix.
    pub prefix: Option<String>,
    /// Group keys sharing a prefix up to this delimiter.
    pub delimiter: Option<String>,
    /// Token of the page to fetch.
    pub continuation_token: Option<String>,
}

/// A single-request upload.
#[derive(Debug, Clone)]
pub struct PutObjectInput {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// The whole body.
    pub body: Bytes,
    /// Encryption parameters.
    pub encryption: Option<ServerSideEncryption>,
}

/// The start of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateMultipartUploadInput {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Encryption parameters for the assembled object.
    pub encryption: Option<ServerSideEncryption>,
}

/// One part of a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadPartInput {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Upload the part belongs to.
    pub upload_id: String,
    /// 1-based part number.
    pub part_number: i32,
    /// Part body.
    pub body: Bytes,
    /// Customer-key parameters; every part must repeat them.
    pub encryption: Option<ServerSideEncryption>,
}

/// The end of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMultipartUploadInput {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Upload to complete.
    pub upload_id: String,
    /// Uploaded parts, ascending by part number.
    pub parts: Vec<CompletedPart>,
}

/// The S3 calls the store depends on.
#[async_trait]
pub trait S3Api: Send + Sync + fmt::Debug {
    /// `HeadObject`.
    async fn head_object(&self, target: &ObjectTarget) -> Result<HeadObjectOutput, ApiError>;

    /// `GetObject`.
    async fn get_object(&self, target: &ObjectTarget) -> Result<GetObjectOutput, ApiError>;

    /// One page of `ListObjectsV2`.
    async fn list_objects_v2(
        &self,
        input: &ListObjectsV2Input,
    ) -> Result<ListBucketResult, ApiError>;

    /// `DeleteObject`.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ApiError>;

    /// `PutObject`. Returns the entity tag.
    async fn put_object(&self, input: PutObjectInput) -> Result<Option<String>, ApiError>;

    /// `CreateMultipartUpload`. Returns the upload id.
    async fn create_multipart_upload(
        &self,
        input: &CreateMultipartUploadInput,
    ) -> Result<String, ApiError>;

    /// `UploadPart`. Returns the part's entity tag.
    async fn upload_part(&self, input: UploadPartInput) -> Result<String, ApiError>;

    /// `CompleteMultipartUpload`.
    async fn complete_multipart_upload(
        &self,
        input: &CompleteMultipartUploadInput,
    ) -> Result<(), ApiError>;

    /// `AbortMultipartUpload`.
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ApiError>;

    /// A presigned `GetObject` URL valid for `expires`. Encryption headers of
    /// the target are covered by the signature.
    async fn presign_get_object(
        &self,
        target: &ObjectTarget,
        expires: Duration,
    ) -> Result<String, ApiError>;
}
