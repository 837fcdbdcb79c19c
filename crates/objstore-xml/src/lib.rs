//! S3 XML bodies for objstore.
//!
//! The store speaks a small slice of the S3 REST protocol. This crate holds
//! the XML documents of that slice and their wire encoding:
//!
//! - [`ListBucketResult`] from `ListObjectsV2`
//! - [`InitiateMultipartUploadResult`] from `CreateMultipartUpload`
//! - [`CompleteMultipartUpload`] sent to, and [`CompleteMultipartUploadResult`]
//!   returned by, `CompleteMultipartUpload`
//! - [`ErrorResponse`], the flat `<Error>` body of a failed request
//!
//! Every document can be both read ([`S3Deserialize`], [`from_xml`]) and
//! written ([`S3Serialize`], [`to_xml`]), so the same types back the client
//! and the test doubles that stand in for a bucket.
//!
//! # S3 XML conventions
//!
//! - Namespace: `http://s3.amazonaws.com/doc/2006-03-01/`
//! - Booleans: lowercase `true`/`false`
//! - Timestamps: ISO 8601 format (`2006-02-03T16:45:09.000Z`)
//! - XML declaration: `<?xml version="1.0" encoding="UTF-8"?>`

pub mod deserialize;
pub mod error;
pub mod serialize;
pub mod types;

pub use deserialize::{S3Deserialize, from_xml, root_element};
pub use error::XmlError;
pub use serialize::{S3_NAMESPACE, S3Serialize, to_xml};
pub use types::{
    CompleteMultipartUpload, CompleteMultipartUploadResult, CompletedPart, ErrorResponse,
    InitiateMultipartUploadResult, ListBucketResult, ObjectEntry,
};
