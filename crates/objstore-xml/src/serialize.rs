//! S3 XML serialization: converting Rust types to S3 XML.
//!
//! This module provides the [`S3Serialize`] trait and its implementations for
//! the documents in [`crate::types`]. The client only ever sends
//! `CompleteMultipartUpload`; the other documents are written by test doubles
//! that play the part of a bucket.

use std::io::{self, Write};

use quick_xml::Writer;
use quick_xml::events::{BytesText, Event};

use crate::error::XmlError;
use crate::types::{
    CompleteMultipartUpload, CompleteMultipartUploadResult, CompletedPart, ErrorResponse,
    InitiateMultipartUploadResult, ListBucketResult, ObjectEntry,
};

/// The S3 XML namespace.
pub const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Trait for serializing S3 types to XML.
///
/// Implementors write their content as child elements inside the current XML context.
/// The root element name and namespace are handled by the top-level [`to_xml`] function.
///
/// Uses `io::Result` because `quick_xml::Writer` closures require `io::Result<()>`.
pub trait S3Serialize {
    /// Serialize this value as XML child elements into the given writer.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if writing to the underlying writer fails.
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()>;
}

/// Serialize a value as S3 XML with declaration and namespace.
///
/// # Errors
///
/// Returns `XmlError` if serialization fails.
///
/// # Examples
///
/// ```
/// use objstore_xml::{CompleteMultipartUpload, CompletedPart, to_xml};
///
/// let body = CompleteMultipartUpload {
///     parts: vec![CompletedPart { part_number: 1, etag: "\"a\"".to_owned() }],
/// };
/// let xml = String::from_utf8(to_xml("CompleteMultipartUpload", &body).unwrap()).unwrap();
/// assert!(xml.contains("<PartNumber>1</PartNumber>"));
/// ```
pub fn to_xml<T: S3Serialize>(root_element: &str, value: &T) -> Result<Vec<u8>, XmlError> {
    let mut buf = Vec::with_capacity(512);
    let mut writer = Writer::new(&mut buf);

    writer.write_event(Event::Decl(quick_xml::events::BytesDecl::new(
        "1.0",
        Some("UTF-8"),
        None,
    )))?;

    writer
        .create_element(root_element)
        .with_attribute(("xmlns", S3_NAMESPACE))
        .write_inner_content(|w| value.serialize_xml(w))?;

    Ok(buf)
}

// ---------------------------------------------------------------------------
// Helper functions for writing common XML patterns
// ---------------------------------------------------------------------------

/// Write a simple `<tag>text</tag>` element.
fn write_text_element<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> io::Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

/// Write `<tag>text</tag>` only if the value is `Some`.
fn write_optional_text<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: Option<&str>,
) -> io::Result<()> {
    if let Some(v) = value {
        write_text_element(writer, tag, v)?;
    }
    Ok(())
}

/// Write `<tag>value</tag>` for an optional i32.
fn write_optional_i32<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: Option<i32>,
) -> io::Result<()> {
    if let Some(v) = value {
        write_text_element(writer, tag, &v.to_string())?;
    }
    Ok(())
}

/// Format a `DateTime<Utc>` as ISO 8601 with milliseconds and `Z` suffix.
fn format_timestamp(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ---------------------------------------------------------------------------
// S3Serialize implementations
// ---------------------------------------------------------------------------

impl S3Serialize for CompletedPart {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        writer.create_element("Part").write_inner_content(|w| {
            write_text_element(w, "PartNumber", &self.part_number.to_string())?;
            write_text_element(w, "ETag", &self.etag)?;
            Ok(())
        })?;
        Ok(())
    }
}

impl S3Serialize for CompleteMultipartUpload {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        for part in &self.parts {
            part.serialize_xml(writer)?;
        }
        Ok(())
    }
}

impl S3Serialize for ObjectEntry {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        writer.create_element("Contents").write_inner_content(|w| {
            write_text_element(w, "Key", &self.key)?;
            if let Some(ref last_modified) = self.last_modified {
                write_text_element(w, "LastModified", &format_timestamp(last_modified))?;
            }
            write_optional_text(w, "ETag", self.etag.as_deref())?;
            if let Some(size) = self.size {
                write_text_element(w, "Size", &size.to_string())?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

impl S3Serialize for ListBucketResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_optional_text(writer, "Name", self.name.as_deref())?;
        write_optional_text(writer, "Prefix", self.prefix.as_deref())?;
        write_optional_text(writer, "Delimiter", self.delimiter.as_deref())?;
        write_optional_i32(writer, "KeyCount", self.key_count)?;
        write_optional_i32(writer, "MaxKeys", self.max_keys)?;
        write_text_element(
            writer,
            "IsTruncated",
            if self.is_truncated { "true" } else { "false" },
        )?;
        write_optional_text(
            writer,
            "ContinuationToken",
            self.continuation_token.as_deref(),
        )?;
        write_optional_text(
            writer,
            "NextContinuationToken",
            self.next_continuation_token.as_deref(),
        )?;
        for entry in &self.contents {
            entry.serialize_xml(writer)?;
        }
        for prefix in &self.common_prefixes {
            writer
                .create_element("CommonPrefixes")
                .write_inner_content(|w| write_text_element(w, "Prefix", prefix))?;
        }
        Ok(())
    }
}

impl S3Serialize for InitiateMultipartUploadResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Bucket", &self.bucket)?;
        write_text_element(writer, "Key", &self.key)?;
        write_text_element(writer, "UploadId", &self.upload_id)?;
        Ok(())
    }
}

impl S3Serialize for CompleteMultipartUploadResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_optional_text(writer, "Location", self.location.as_deref())?;
        write_optional_text(writer, "Bucket", self.bucket.as_deref())?;
        write_optional_text(writer, "Key", self.key.as_deref())?;
        write_optional_text(writer, "ETag", self.etag.as_deref())?;
        Ok(())
    }
}

impl S3Serialize for ErrorResponse {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Code", &self.code)?;
        write_text_element(writer, "Message", &self.message)?;
        write_optional_text(writer, "Resource", self.resource.as_deref())?;
        write_optional_text(writer, "RequestId", self.request_id.as_deref())?;
        Ok(())
    }
}
