//! XML document types.

use chrono::{DateTime, Utc};

/// One `<Contents>` entry of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Object key.
    pub key: String,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag, quotes included.
    pub etag: Option<String>,
    /// Object size in bytes.
    pub size: Option<i64>,
}

/// The `<ListBucketResult>` body of a `ListObjectsV2` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListBucketResult {
    /// Bucket name.
    pub name: Option<String>,
    /// Prefix the listing was restricted to.
    pub prefix: Option<String>,
    /// Delimiter used to group keys into common prefixes.
    pub delimiter: Option<String>,
    /// Number of keys and common prefixes on this page.
    pub key_count: Option<i32>,
    /// Page size requested.
    pub max_keys: Option<i32>,
    /// Whether more pages follow.
    pub is_truncated: bool,
    /// Token this page was requested with.
    pub continuation_token: Option<String>,
    /// Token to request the next page with.
    pub next_continuation_token: Option<String>,
    /// Objects on this page.
    pub contents: Vec<ObjectEntry>,
    /// Common prefixes on this page, in provider order.
    pub common_prefixes: Vec<String>,
}

/// The `<InitiateMultipartUploadResult>` body of a `CreateMultipartUpload` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitiateMultipartUploadResult {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Identifier of the new upload.
    pub upload_id: String,
}

/// One `<Part>` of a `CompleteMultipartUpload` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: i32,
    /// Entity tag returned by `UploadPart`.
    pub etag: String,
}

/// The `<CompleteMultipartUpload>` request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompleteMultipartUpload {
    /// Uploaded parts in ascending part-number order.
    pub parts: Vec<CompletedPart>,
}

/// The `<CompleteMultipartUploadResult>` body of a successful completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompleteMultipartUploadResult {
    /// URL of the assembled object.
    pub location: Option<String>,
    /// Bucket name.
    pub bucket: Option<String>,
    /// Object key.
    pub key: Option<String>,
    /// Entity tag of the assembled object.
    pub etag: Option<String>,
}

/// The flat `<Error>` body S3 returns for a failed request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Machine-readable error code, e.g. `NoSuchKey`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Resource the error refers to.
    pub resource: Option<String>,
    /// Request identifier assigned by the service.
    pub request_id: Option<String>,
}
