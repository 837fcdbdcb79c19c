//! Streaming uploads.
//!
//! A body that fits in one part goes up as a single `PutObject`. Anything
//! larger becomes a multipart upload whose parts are sent on background
//! tasks, at most `concurrency` at a time, while the next part is read.
//! A failed multipart upload is aborted before the error is returned, so no
//! orphaned parts are left billed in the bucket.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use objstore_xml::CompletedPart;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::client::{
    CompleteMultipartUploadInput, CreateMultipartUploadInput, PutObjectInput, S3Api,
    UploadPartInput,
};
use crate::error::ApiError;
use crate::sse::ServerSideEncryption;

/// Default part size, the S3 minimum for every part but the last.
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default number of parts in flight.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Most parts a multipart upload may have.
pub const MAX_PARTS: i32 = 10_000;

/// Splits a body into parts and uploads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uploader {
    part_size: usize,
    concurrency: usize,
}

impl Default for Uploader {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl Uploader {
    /// An uploader with the default part size and concurrency.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the part size in bytes (at least 1).
    #[must_use]
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Set the number of parts uploaded at once (at least 1).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// The part size in bytes.
    #[must_use]
    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Upload everything `reader` yields to `bucket`/`key`.
    ///
    /// `encryption` applies to the object. Parts only repeat customer-key
    /// parameters; KMS and algorithm settings are given once, when the
    /// upload is created.
    pub async fn upload<R>(
        &self,
        client: &Arc<dyn S3Api>,
        bucket: &str,
        key: &str,
        mut reader: R,
        encryption: Option<ServerSideEncryption>,
    ) -> Result<(), ApiError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let first = read_chunk(&mut reader, self.part_size).await?;
        if first.len() < self.part_size {
            return put_single(client, bucket, key, first, encryption).await;
        }
        let second = read_chunk(&mut reader, self.part_size).await?;
        if second.is_empty() {
            return put_single(client, bucket, key, first, encryption).await;
        }

        let upload_id = client
            .create_multipart_upload(&CreateMultipartUploadInput {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                encryption: encryption.clone(),
            })
            .await?;
        debug!(bucket, key, %upload_id, "Started multipart upload");

        let part_encryption = encryption.filter(ServerSideEncryption::is_customer_key);
        let upload = Upload {
            client,
            bucket,
            key,
            upload_id: &upload_id,
            encryption: part_encryption,
        };

        let result: Result<(), ApiError> = async {
            let parts = self.upload_parts(&upload, [first, second], &mut reader).await?;
            let count = parts.len();
            client
                .complete_multipart_upload(&CompleteMultipartUploadInput {
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                    upload_id: upload_id.clone(),
                    parts,
                })
                .await?;
            debug!(bucket, key, %upload_id, parts = count, "Completed multipart upload");
            Ok(())
        }
        .await;

        if let Err(err) = &result {
            debug!(bucket, key, %upload_id, error = %err, "Aborting multipart upload");
            if let Err(abort_err) = client.abort_multipart_upload(bucket, key, &upload_id).await {
                warn!(
                    bucket,
                    key,
                    %upload_id,
                    error = %abort_err,
                    "failed to abort multipart upload"
                );
            }
        }
        result
    }

    async fn upload_parts<R>(
        &self,
        upload: &Upload<'_>,
        initial: [Bytes; 2],
        reader: &mut R,
    ) -> Result<Vec<CompletedPart>, ApiError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut exhausted = initial[1].len() < self.part_size;
        let mut queued = VecDeque::from(initial);
        let mut tasks = JoinSet::new();
        let mut parts = Vec::new();
        let mut part_number: i32 = 0;

        loop {
            while tasks.len() < self.concurrency {
                if queued.is_empty() && !exhausted {
                    let chunk = read_chunk(reader, self.part_size).await?;
                    exhausted = chunk.len() < self.part_size;
                    if !chunk.is_empty() {
                        queued.push_back(chunk);
                    }
                }
                let Some(body) = queued.pop_front() else {
                    break;
                };

                part_number += 1;
                if part_number > MAX_PARTS {
                    return Err(ApiError::InvalidRequest(format!(
                        "body needs more than {MAX_PARTS} parts of {} bytes",
                        self.part_size
                    )));
                }

                let client = Arc::clone(upload.client);
                let input = upload.part(part_number, body);
                tasks.spawn(async move {
                    let part_number = input.part_number;
                    let etag = client.upload_part(input).await?;
                    Ok::<_, ApiError>(CompletedPart { part_number, etag })
                });
            }

            match tasks.join_next().await {
                Some(joined) => {
                    let part = joined??;
                    debug!(
                        upload_id = upload.upload_id,
                        part_number = part.part_number,
                        "Uploaded part"
                    );
                    parts.push(part);
                }
                None => break,
            }
        }

        parts.sort_by_key(|part| part.part_number);
        Ok(parts)
    }
}

/// The fixed coordinates of one multipart upload.
struct Upload<'a> {
    client: &'a Arc<dyn S3Api>,
    bucket: &'a str,
    key: &'a str,
    upload_id: &'a str,
    encryption: Option<ServerSideEncryption>,
}

impl Upload<'_> {
    fn part(&self, part_number: i32, body: Bytes) -> UploadPartInput {
        UploadPartInput {
            bucket: self.bucket.to_owned(),
            key: self.key.to_owned(),
            upload_id: self.upload_id.to_owned(),
            part_number,
            body,
            encryption: self.encryption.clone(),
        }
    }
}

async fn put_single(
    client: &Arc<dyn S3Api>,
    bucket: &str,
    key: &str,
    body: Bytes,
    encryption: Option<ServerSideEncryption>,
) -> Result<(), ApiError> {
    debug!(bucket, key, size = body.len(), "Uploading object in one request");
    client
        .put_object(PutObjectInput {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            body,
            encryption,
        })
        .await?;
    Ok(())
}

/// Read up to `size` bytes. A short chunk means the reader is exhausted.
async fn read_chunk<R>(reader: &mut R, size: usize) -> Result<Bytes, ApiError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(size.min(DEFAULT_PART_SIZE));
    reader.take(size as u64).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}
