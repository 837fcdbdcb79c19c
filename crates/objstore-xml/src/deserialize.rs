//! S3 XML deserialization: parsing S3 XML bodies into Rust types.
//!
//! This module provides the [`S3Deserialize`] trait and its implementations
//! for the documents in [`crate::types`].

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::XmlError;
use crate::types::{
    CompleteMultipartUpload, CompleteMultipartUploadResult, CompletedPart, ErrorResponse,
    InitiateMultipartUploadResult, ListBucketResult, ObjectEntry,
};

/// Trait for deserializing S3 types from XML.
///
/// Implementors parse XML elements from the reader and populate the struct fields.
/// The root element has already been consumed by the caller; the implementation
/// reads child elements until the matching end tag.
pub trait S3Deserialize: Sized {
    /// Deserialize an instance from the given XML reader.
    ///
    /// The reader is positioned just after the opening tag of this element.
    /// The implementation should read all child content and return when
    /// the matching end tag is consumed.
    ///
    /// # Errors
    ///
    /// Returns `XmlError` if the XML is malformed or required fields are missing.
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError>;
}

/// Deserialize S3 XML into a typed value.
///
/// Finds the root element and delegates to the type's `S3Deserialize` implementation.
///
/// # Errors
///
/// Returns `XmlError` if the XML is malformed or deserialization fails.
pub fn from_xml<T: S3Deserialize>(xml: &[u8]) -> Result<T, XmlError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    // Skip the XML declaration and find the root element.
    loop {
        match reader.read_event()? {
            Event::Start(_) => {
                return T::deserialize_xml(&mut reader);
            }
            Event::Eof => {
                return Err(XmlError::MissingElement("root element".to_string()));
            }
            _ => {}
        }
    }
}

/// Return the name of the root element of an XML document.
///
/// `CompleteMultipartUpload` may answer `200 OK` with an `<Error>` document,
/// so callers inspect the root before picking a type to decode.
///
/// # Errors
///
/// Returns `XmlError` if the document is malformed or has no root element.
///
/// # Examples
///
/// ```
/// use objstore_xml::root_element;
///
/// let xml = br#"<?xml version="1.0" encoding="UTF-8"?><Error><Code>InternalError</Code></Error>"#;
/// assert_eq!(root_element(xml).unwrap(), "Error");
/// ```
pub fn root_element(xml: &[u8]) -> Result<String, XmlError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.local_name();
                let tag_name = std::str::from_utf8(name.as_ref())
                    .map_err(|e| XmlError::ParseError(e.to_string()))?;
                return Ok(tag_name.to_owned());
            }
            Event::Eof => {
                return Err(XmlError::MissingElement("root element".to_string()));
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Helper functions for reading common XML patterns
// ---------------------------------------------------------------------------

/// Read the text content of the current element and consume its end tag.
///
/// Expects the reader to be positioned right after a `Start` event. Reads
/// the text content and consumes through the matching `End` event.
fn read_text_content(reader: &mut Reader<&[u8]>) -> Result<String, XmlError> {
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(e) => {
                let decoded = e
                    .decode()
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                let unescaped = quick_xml::escape::unescape(&decoded)
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                text.push_str(&unescaped);
            }
            // Entity references such as `&quot;` in an ETag arrive as their own events.
            Event::GeneralRef(r) => {
                if let Some(ch) = r.resolve_char_ref()? {
                    text.push(ch);
                } else {
                    let entity = r
                        .decode()
                        .map_err(|err| XmlError::ParseError(err.to_string()))?;
                    let resolved = quick_xml::escape::resolve_predefined_entity(&entity)
                        .ok_or_else(|| {
                            XmlError::ParseError(format!("unknown entity: &{entity};"))
                        })?;
                    text.push_str(resolved);
                }
            }
            Event::End(_) => {
                return Ok(text);
            }
            Event::Eof => {
                return Err(XmlError::UnexpectedElement(
                    "unexpected EOF while reading text content".to_string(),
                ));
            }
            _ => {}
        }
    }
}

/// Skip over an element and all its children.
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<(), XmlError> {
    let mut depth: u32 = 1;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Event::Eof => {
                return Err(XmlError::UnexpectedElement(
                    "unexpected EOF while skipping element".to_string(),
                ));
            }
            _ => {}
        }
    }
}

/// Deserialize a list of items where each item is wrapped in the given element name.
fn deserialize_list<T: S3Deserialize>(
    reader: &mut Reader<&[u8]>,
    item_tag: &str,
) -> Result<Vec<T>, XmlError> {
    let mut items = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let tag_name = std::str::from_utf8(name.as_ref())
                    .map_err(|e| XmlError::ParseError(e.to_string()))?;
                if tag_name == item_tag {
                    items.push(T::deserialize_xml(reader)?);
                } else {
                    skip_element(reader)?;
                }
            }
            Event::End(_) => break,
            Event::Eof => {
                return Err(XmlError::UnexpectedElement(
                    "unexpected EOF in list".to_string(),
                ));
            }
            _ => {}
        }
    }

    Ok(items)
}

/// Parse a boolean from XML text ("true"/"false").
fn parse_bool(s: &str) -> Result<bool, XmlError> {
    match s {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(XmlError::ParseError(format!("invalid boolean: {s}"))),
    }
}

/// Parse an i32 from XML text.
fn parse_i32(s: &str) -> Result<i32, XmlError> {
    s.parse::<i32>()
        .map_err(|e| XmlError::ParseError(format!("invalid i32 '{s}': {e}")))
}

/// Parse an i64 from XML text.
fn parse_i64(s: &str) -> Result<i64, XmlError> {
    s.parse::<i64>()
        .map_err(|e| XmlError::ParseError(format!("invalid i64 '{s}': {e}")))
}

/// Parse an ISO 8601 timestamp from XML text.
fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>, XmlError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .or_else(|_| {
            // S3 format without offset: 2006-02-03T16:45:09.000Z
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| XmlError::ParseError(format!("invalid timestamp '{s}': {e}")))
}

// ---------------------------------------------------------------------------
// S3Deserialize implementations
// ---------------------------------------------------------------------------

impl S3Deserialize for ObjectEntry {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut key = None;
        let mut last_modified = None;
        let mut etag = None;
        let mut size = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = e.name();
                    let tag_name = std::str::from_utf8(name.as_ref())
                        .map_err(|e| XmlError::ParseError(e.to_string()))?;
                    match tag_name {
                        "Key" => key = Some(read_text_content(reader)?),
                        "LastModified" => {
                            let text = read_text_content(reader)?;
                            last_modified = Some(parse_timestamp(&text)?);
                        }
                        "ETag" => etag = Some(read_text_content(reader)?),
                        "Size" => {
                            let text = read_text_content(reader)?;
                            size = Some(parse_i64(&text)?);
                        }
                        _ => skip_element(reader)?,
                    }
                }
                Event::End(_) => break,
                Event::Eof => {
                    return Err(XmlError::UnexpectedElement(
                        "unexpected EOF in Contents".to_string(),
                    ));
                }
                _ => {}
            }
        }

        Ok(ObjectEntry {
            key: key.ok_or_else(|| XmlError::MissingElement("Key".to_string()))?,
            last_modified,
            etag,
            size,
        })
    }
}

/// The `<Prefix>` child of a `<CommonPrefixes>` element.
struct CommonPrefix(String);

impl S3Deserialize for CommonPrefix {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut prefix = String::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    if e.name().as_ref() == b"Prefix" {
                        prefix = read_text_content(reader)?;
                    } else {
                        skip_element(reader)?;
                    }
                }
                Event::End(_) => break,
                Event::Eof => {
                    return Err(XmlError::UnexpectedElement(
                        "unexpected EOF in CommonPrefixes".to_string(),
                    ));
                }
                _ => {}
            }
        }

        Ok(CommonPrefix(prefix))
    }
}

impl S3Deserialize for ListBucketResult {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut result = ListBucketResult::default();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = e.name();
                    let tag_name = std::str::from_utf8(name.as_ref())
                        .map_err(|e| XmlError::ParseError(e.to_string()))?;
                    match tag_name {
                        "Name" => result.name = Some(read_text_content(reader)?),
                        "Prefix" => result.prefix = Some(read_text_content(reader)?),
                        "Delimiter" => result.delimiter = Some(read_text_content(reader)?),
                        "KeyCount" => {
                            let text = read_text_content(reader)?;
                            result.key_count = Some(parse_i32(&text)?);
                        }
                        "MaxKeys" => {
                            let text = read_text_content(reader)?;
                            result.max_keys = Some(parse_i32(&text)?);
                        }
                        "IsTruncated" => {
                            let text = read_text_content(reader)?;
                            result.is_truncated = parse_bool(&text)?;
                        }
                        "ContinuationToken" => {
                            result.continuation_token = Some(read_text_content(reader)?);
                        }
                        "NextContinuationToken" => {
                            result.next_continuation_token = Some(read_text_content(reader)?);
                        }
                        "Contents" => result.contents.push(ObjectEntry::deserialize_xml(reader)?),
                        "CommonPrefixes" => {
                            let CommonPrefix(prefix) = CommonPrefix::deserialize_xml(reader)?;
                            result.common_prefixes.push(prefix);
                        }
                        _ => skip_element(reader)?,
                    }
                }
                Event::End(_) => break,
                Event::Eof => {
                    return Err(XmlError::UnexpectedElement(
                        "unexpected EOF in ListBucketResult".to_string(),
                    ));
                }
                _ => {}
            }
        }

        Ok(result)
    }
}

impl S3Deserialize for InitiateMultipartUploadResult {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut bucket = String::new();
        let mut key = String::new();
        let mut upload_id = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = e.name();
                    let tag_name = std::str::from_utf8(name.as_ref())
                        .map_err(|e| XmlError::ParseError(e.to_string()))?;
                    match tag_name {
                        "Bucket" => bucket = read_text_content(reader)?,
                        "Key" => key = read_text_content(reader)?,
                        "UploadId" => upload_id = Some(read_text_content(reader)?),
                        _ => skip_element(reader)?,
                    }
                }
                Event::End(_) => break,
                Event::Eof => {
                    return Err(XmlError::UnexpectedElement(
                        "unexpected EOF in InitiateMultipartUploadResult".to_string(),
                    ));
                }
                _ => {}
            }
        }

        Ok(InitiateMultipartUploadResult {
            bucket,
            key,
            upload_id: upload_id.ok_or_else(|| XmlError::MissingElement("UploadId".to_string()))?,
        })
    }
}

impl S3Deserialize for CompletedPart {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut part_number = None;
        let mut etag = String::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = e.name();
                    let tag_name = std::str::from_utf8(name.as_ref())
                        .map_err(|e| XmlError::ParseError(e.to_string()))?;
                    match tag_name {
                        "PartNumber" => {
                            let text = read_text_content(reader)?;
                            part_number = Some(parse_i32(&text)?);
                        }
                        "ETag" => etag = read_text_content(reader)?,
                        _ => skip_element(reader)?,
                    }
                }
                Event::End(_) => break,
                Event::Eof => {
                    return Err(XmlError::UnexpectedElement(
                        "unexpected EOF in Part".to_string(),
                    ));
                }
                _ => {}
            }
        }

        Ok(CompletedPart {
            part_number: part_number
                .ok_or_else(|| XmlError::MissingElement("PartNumber".to_string()))?,
            etag,
        })
    }
}

impl S3Deserialize for CompleteMultipartUpload {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let parts = deserialize_list(reader, "Part")?;
        Ok(CompleteMultipartUpload { parts })
    }
}

impl S3Deserialize for CompleteMultipartUploadResult {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut result = CompleteMultipartUploadResult::default();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = e.name();
                    let tag_name = std::str::from_utf8(name.as_ref())
                        .map_err(|e| XmlError::ParseError(e.to_string()))?;
                    match tag_name {
                        "Location" => result.location = Some(read_text_content(reader)?),
                        "Bucket" => result.bucket = Some(read_text_content(reader)?),
                        "Key" => result.key = Some(read_text_content(reader)?),
                        "ETag" => result.etag = Some(read_text_content(reader)?),
                        _ => skip_element(reader)?,
                    }
                }
                Event::End(_) => break,
                Event::Eof => {
                    return Err(XmlError::UnexpectedElement(
                        "unexpected EOF in CompleteMultipartUploadResult".to_string(),
                    ));
                }
                _ => {}
            }
        }

        Ok(result)
    }
}

impl S3Deserialize for ErrorResponse {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut result = ErrorResponse::default();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = e.name();
                    let tag_name = std::str::from_utf8(name.as_ref())
                        .map_err(|e| XmlError::ParseError(e.to_string()))?;
                    match tag_name {
                        "Code" => result.code = read_text_content(reader)?,
                        "Message" => result.message = read_text_content(reader)?,
                        "Resource" => result.resource = Some(read_text_content(reader)?),
                        "RequestId" => result.request_id = Some(read_text_content(reader)?),
                        _ => skip_element(reader)?,
                    }
                }
                Event::End(_) => break,
                Event::Eof => {
                    return Err(XmlError::UnexpectedElement(
                        "unexpected EOF in Error".to_string(),
                    ));
                }
                _ => {}
            }
        }

        Ok(result)
    }
}
