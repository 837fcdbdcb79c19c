//! Test doubles: an in-memory bucket implementing [`S3Api`], recording
//! fakes for the session collaborators, and a loopback HTTP server that
//! puts the in-memory bucket behind the real wire protocol.

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, ETAG};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use objstore_auth::{Credentials, SigningParams, presign_v2, presign_v4};
use objstore_xml::{
    CompleteMultipartUpload, CompleteMultipartUploadResult, ErrorResponse,
    InitiateMultipartUploadResult, ListBucketResult, ObjectEntry, from_xml, to_xml,
};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

use crate::client::{
    ByteStream, CompleteMultipartUploadInput, CreateMultipartUploadInput, GetObjectOutput,
    HeadObjectOutput, ListObjectsV2Input, ObjectTarget, PutObjectInput, S3Api, UploadPartInput,
};
use crate::config::SignatureVersion;
use crate::error::{ApiError, ConfigError};
use crate::http_client::request_url;
use crate::region::{BUCKET_REGION_HEADER, RegionResolver};
use crate::session::{SessionFactory, SessionOptions};
use crate::sse::{
    CustomerKey, SSE_CUSTOMER_ALGORITHM_HEADER, SSE_CUSTOMER_KEY_HEADER,
    SSE_CUSTOMER_KEY_MD5_HEADER, SSE_HEADER, SSE_KMS_KEY_ID_HEADER, ServerSideEncryption,
};

/// Access key the in-memory bucket presigns with.
pub(crate) const ACCESS_KEY: &str = "AKIDMEMORY";
const SECRET_KEY: &str = "memory-secret";
const DEFAULT_PAGE_SIZE: usize = 1000;

/// A call received by [`MemoryS3`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Head {
        key: String,
        encryption: Option<ServerSideEncryption>,
    },
    Get {
        key: String,
        encryption: Option<ServerSideEncryption>,
    },
    List {
        prefix: Option<String>,
        delimiter: Option<String>,
        continuation_token: Option<String>,
    },
    Delete {
        key: String,
    },
    Put {
        key: String,
        encryption: Option<ServerSideEncryption>,
    },
    CreateMultipart {
        key: String,
        encryption: Option<ServerSideEncryption>,
    },
    UploadPart {
        key: String,
        part_number: i32,
        encryption: Option<ServerSideEncryption>,
    },
    Complete {
        upload_id: String,
        parts: usize,
    },
    Abort {
        upload_id: String,
    },
    Presign {
        key: String,
        encryption: Option<ServerSideEncryption>,
    },
}

#[derive(Debug)]
struct StoredObject {
    body: Bytes,
    etag: String,
    encryption: Option<ServerSideEncryption>,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    encryption: Option<ServerSideEncryption>,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<(String, String), StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    next_id: u64,
    calls: Vec<Call>,
    failures: HashMap<&'static str, (StatusCode, String)>,
    failing_part: Option<i32>,
    parts_in_flight: usize,
    max_parts_in_flight: usize,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// An in-memory bucket store.
///
/// Clones made by [`MemoryS3::session`] share the objects and the call log
/// but presign against their own endpoint, region and signature version.
#[derive(Debug, Clone)]
pub(crate) struct MemoryS3 {
    state: Arc<Mutex<State>>,
    page_size: usize,
    region: Option<String>,
    endpoint: Url,
    signing_region: String,
    signature_version: SignatureVersion,
}

impl Default for MemoryS3 {
    fn default() -> Self {
        Self::new()
    }
}

fn service_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError::Service {
        status,
        code: code.to_owned(),
        message: message.to_owned(),
        request_id: None,
    }
}

fn no_such_upload() -> ApiError {
    service_error(
        StatusCode::NOT_FOUND,
        "NoSuchUpload",
        "The specified multipart upload does not exist.",
    )
}

/// Enforce customer-key access rules.
fn check_key(
    stored: Option<&ServerSideEncryption>,
    given: Option<&ServerSideEncryption>,
) -> Result<(), ApiError> {
    let stored_key = match stored {
        Some(ServerSideEncryption::CustomerKey { key, .. }) => Some(key),
        _ => None,
    };
    let given_key = match given {
        Some(ServerSideEncryption::CustomerKey { key, .. }) => Some(key),
        _ => None,
    };
    match (stored_key, given_key) {
        (Some(stored), Some(given)) if stored.raw() == given.raw() => Ok(()),
        (Some(_), Some(_)) => Err(service_error(
            StatusCode::FORBIDDEN,
            "AccessDenied",
            "The calculated MD5 hash of the key did not match the hash that was provided.",
        )),
        (Some(_), None) => Err(service_error(
            StatusCode::BAD_REQUEST,
            "InvalidRequest",
            "The object was stored using a form of Server Side Encryption. \
             The correct parameters must be provided to retrieve the object.",
        )),
        (None, Some(_)) => Err(service_error(
            StatusCode::BAD_REQUEST,
            "InvalidRequest",
            "The encryption parameters are not applicable to this object.",
        )),
        (None, None) => Ok(()),
    }
}

impl MemoryS3 {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::default(),
            page_size: DEFAULT_PAGE_SIZE,
            region: None,
            endpoint: Url::parse("https://s3.memory.test").expect("valid URL"),
            signing_region: "us-east-1".to_owned(),
            signature_version: SignatureVersion::V4,
        }
    }

    /// Limit listing pages to `page_size` entries.
    pub(crate) fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Report `region` to bucket region lookups.
    pub(crate) fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_owned());
        self
    }

    /// A view of the same bucket as opened with `options`.
    pub(crate) fn session(&self, options: &SessionOptions) -> Self {
        Self {
            endpoint: options
                .resolved_endpoint()
                .unwrap_or_else(|_| self.endpoint.clone()),
            signing_region: options.region.clone(),
            signature_version: options.signature_version,
            ..self.clone()
        }
    }

    /// Store an object directly.
    pub(crate) fn insert(&self, bucket: &str, key: &str, body: Bytes) {
        let mut state = self.state.lock();
        let etag = format!("\"{}\"", state.next_id("etag"));
        state.objects.insert(
            (bucket.to_owned(), key.to_owned()),
            StoredObject {
                body,
                etag,
                encryption: None,
            },
        );
    }

    /// The body of a stored object.
    pub(crate) fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state
            .lock()
            .objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|object| object.body.clone())
    }

    /// Every call received so far, in order.
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Fail every call of `operation` with the given status and code.
    pub(crate) fn fail_with(&self, operation: &'static str, status: StatusCode, code: &str) {
        self.state
            .lock()
            .failures
            .insert(operation, (status, code.to_owned()));
    }

    /// Fail the upload of part `part_number` with an internal error.
    pub(crate) fn fail_part(&self, part_number: i32) {
        self.state.lock().failing_part = Some(part_number);
    }

    /// Multipart uploads neither completed nor aborted.
    pub(crate) fn pending_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    /// The most part uploads that were running at once.
    pub(crate) fn max_parts_in_flight(&self) -> usize {
        self.state.lock().max_parts_in_flight
    }

    /// The region reported to lookups.
    pub(crate) fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    fn record(&self, operation: &'static str, call: Call) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        match state.failures.get(operation) {
            Some((status, code)) => Err(service_error(*status, code, "injected failure")),
            None => Ok(()),
        }
    }

    fn store(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        encryption: Option<ServerSideEncryption>,
    ) -> String {
        let mut state = self.state.lock();
        let etag = format!("\"{}\"", state.next_id("etag"));
        state.objects.insert(
            (bucket.to_owned(), key.to_owned()),
            StoredObject {
                body,
                etag: etag.clone(),
                encryption,
            },
        );
        etag
    }

    fn page(&self, input: &ListObjectsV2Input) -> ListBucketResult {
        let state = self.state.lock();
        let prefix = input.prefix.as_deref().unwrap_or_default();
        let delimiter = input.delimiter.as_deref().filter(|d| !d.is_empty());

        // Entries in key order; a common prefix sorts at its first key.
        let mut entries: Vec<(String, Option<&StoredObject>)> = Vec::new();
        for ((bucket, key), object) in &state.objects {
            if *bucket != input.bucket || !key.starts_with(prefix) {
                continue;
            }
            let rest = &key[prefix.len()..];
            match delimiter.and_then(|d| rest.find(d).map(|i| i + d.len())) {
                Some(end) => {
                    let common = format!("{prefix}{}", &rest[..end]);
                    if entries.last().is_none_or(|(last, _)| *last != common) {
                        entries.push((common, None));
                    }
                }
                None => entries.push((key.clone(), Some(object))),
            }
        }

        let start = input.continuation_token.as_deref();
        let mut remaining = entries
            .into_iter()
            .filter(|(name, _)| start.is_none_or(|token| name.as_str() > token))
            .peekable();

        let mut result = ListBucketResult {
            name: Some(input.bucket.clone()),
            prefix: input.prefix.clone(),
            delimiter: input.delimiter.clone(),
            max_keys: i32::try_from(self.page_size).ok(),
            continuation_token: input.continuation_token.clone(),
            ..ListBucketResult::default()
        };
        let mut count = 0;
        let mut last = None;
        while count < self.page_size {
            let Some((name, object)) = remaining.next() else {
                break;
            };
            match object {
                Some(object) => result.contents.push(ObjectEntry {
                    key: name.clone(),
                    last_modified: Some(Utc::now()),
                    etag: Some(object.etag.clone()),
                    size: i64::try_from(object.body.len()).ok(),
                }),
                None => result.common_prefixes.push(name.clone()),
            }
            last = Some(name);
            count += 1;
        }
        result.key_count = i32::try_from(count).ok();
        result.is_truncated = remaining.peek().is_some();
        if result.is_truncated {
            result.next_continuation_token = last;
        }
        result
    }
}

#[async_trait]
impl S3Api for MemoryS3 {
    async fn head_object(&self, target: &ObjectTarget) -> Result<HeadObjectOutput, ApiError> {
        self.record(
            "head_object",
            Call::Head {
                key: target.key.clone(),
                encryption: target.encryption.clone(),
            },
        )?;
        let state = self.state.lock();
        let object = state
            .objects
            .get(&(target.bucket.clone(), target.key.clone()))
            .ok_or_else(|| ApiError::from_status(StatusCode::NOT_FOUND, None))?;
        check_key(object.encryption.as_ref(), target.encryption.as_ref())?;
        Ok(HeadObjectOutput {
            content_length: Some(object.body.len() as u64),
            etag: Some(object.etag.clone()),
        })
    }

    async fn get_object(&self, target: &ObjectTarget) -> Result<GetObjectOutput, ApiError> {
        self.record(
            "get_object",
            Call::Get {
                key: target.key.clone(),
                encryption: target.encryption.clone(),
            },
        )?;
        let state = self.state.lock();
        let object = state
            .objects
            .get(&(target.bucket.clone(), target.key.clone()))
            .ok_or_else(|| {
                service_error(
                    StatusCode::NOT_FOUND,
                    "NoSuchKey",
                    "The specified key does not exist.",
                )
            })?;
        check_key(object.encryption.as_ref(), target.encryption.as_ref())?;
        Ok(GetObjectOutput {
            content_length: Some(object.body.len() as u64),
            body: ByteStream::from_bytes(object.body.clone()),
        })
    }

    async fn list_objects_v2(
        &self,
        input: &ListObjectsV2Input,
    ) -> Result<ListBucketResult, ApiError> {
        self.record(
            "list_objects_v2",
            Call::List {
                prefix: input.prefix.clone(),
                delimiter: input.delimiter.clone(),
                continuation_token: input.continuation_token.clone(),
            },
        )?;
        Ok(self.page(input))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ApiError> {
        self.record(
            "delete_object",
            Call::Delete {
                key: key.to_owned(),
            },
        )?;
        self.state
            .lock()
            .objects
            .remove(&(bucket.to_owned(), key.to_owned()));
        Ok(())
    }

    async fn put_object(&self, input: PutObjectInput) -> Result<Option<String>, ApiError> {
        self.record(
            "put_object",
            Call::Put {
                key: input.key.clone(),
                encryption: input.encryption.clone(),
            },
        )?;
        let etag = self.store(&input.bucket, &input.key, input.body, input.encryption);
        Ok(Some(etag))
    }

    async fn create_multipart_upload(
        &self,
        input: &CreateMultipartUploadInput,
    ) -> Result<String, ApiError> {
        self.record(
            "create_multipart_upload",
            Call::CreateMultipart {
                key: input.key.clone(),
                encryption: input.encryption.clone(),
            },
        )?;
        let mut state = self.state.lock();
        let upload_id = state.next_id("upload");
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: input.bucket.clone(),
                key: input.key.clone(),
                encryption: input.encryption.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(&self, input: UploadPartInput) -> Result<String, ApiError> {
        self.record(
            "upload_part",
            Call::UploadPart {
                key: input.key.clone(),
                part_number: input.part_number,
                encryption: input.encryption.clone(),
            },
        )?;
        {
            let mut state = self.state.lock();
            state.parts_in_flight += 1;
            state.max_parts_in_flight = state.max_parts_in_flight.max(state.parts_in_flight);
        }
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        let mut state = self.state.lock();
        state.parts_in_flight -= 1;
        if state.failing_part == Some(input.part_number) {
            return Err(service_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalError",
                "We encountered an internal error. Please try again.",
            ));
        }
        let etag = format!("\"{}\"", state.next_id("part"));
        let upload = state
            .uploads
            .get_mut(&input.upload_id)
            .ok_or_else(no_such_upload)?;
        let upload_sse = upload.encryption.as_ref().filter(|sse| sse.is_customer_key());
        if upload_sse != input.encryption.as_ref() {
            return Err(service_error(
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                "The customer key parameters of the part do not match the upload.",
            ));
        }
        upload
            .parts
            .insert(input.part_number, (etag.clone(), input.body));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        input: &CompleteMultipartUploadInput,
    ) -> Result<(), ApiError> {
        self.record(
            "complete_multipart_upload",
            Call::Complete {
                upload_id: input.upload_id.clone(),
                parts: input.parts.len(),
            },
        )?;
        let upload = self
            .state
            .lock()
            .uploads
            .remove(&input.upload_id)
            .ok_or_else(no_such_upload)?;

        let mut body = BytesMut::new();
        for part in &input.parts {
            match upload.parts.get(&part.part_number) {
                Some((etag, bytes)) if *etag == part.etag => body.extend_from_slice(bytes),
                _ => {
                    return Err(service_error(
                        StatusCode::BAD_REQUEST,
                        "InvalidPart",
                        "One or more of the specified parts could not be found.",
                    ));
                }
            }
        }
        self.store(&upload.bucket, &upload.key, body.freeze(), upload.encryption);
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), ApiError> {
        self.record(
            "abort_multipart_upload",
            Call::Abort {
                upload_id: upload_id.to_owned(),
            },
        )?;
        self.state
            .lock()
            .uploads
            .remove(upload_id)
            .map(drop)
            .ok_or_else(no_such_upload)
    }

    async fn presign_get_object(
        &self,
        target: &ObjectTarget,
        expires: Duration,
    ) -> Result<String, ApiError> {
        self.record(
            "presign_get_object",
            Call::Presign {
                key: target.key.clone(),
                encryption: target.encryption.clone(),
            },
        )?;
        let url = request_url(&self.endpoint, true, &target.bucket, Some(&target.key), "")?;
        let uri: http::Uri = url
            .url
            .parse()
            .map_err(|e| ApiError::InvalidRequest(format!("{e}")))?;
        let headers = target
            .encryption
            .as_ref()
            .map(ServerSideEncryption::headers)
            .unwrap_or_default();
        let headers: Vec<(&str, &str)> = headers.iter().map(|(n, v)| (*n, v.as_str())).collect();

        let credentials = Credentials::new(ACCESS_KEY, SECRET_KEY, None);
        let now = Utc::now();
        let signed = match self.signature_version {
            SignatureVersion::V4 => {
                let params = SigningParams::new(&credentials, &self.signing_region, now);
                presign_v4("GET", &uri, &headers, expires, &params)?
            }
            SignatureVersion::V1 => {
                presign_v2("GET", &uri, None, &headers, expires, &credentials, now)?
            }
        };
        Ok(signed)
    }
}

/// A [`SessionFactory`] handing out views of one [`MemoryS3`].
#[derive(Debug)]
pub(crate) struct FakeSessionFactory {
    memory: MemoryS3,
    sessions: Mutex<Vec<SessionOptions>>,
    fail: bool,
}

impl FakeSessionFactory {
    pub(crate) fn new(memory: &MemoryS3) -> Self {
        Self {
            memory: memory.clone(),
            sessions: Mutex::default(),
            fail: false,
        }
    }

    /// A factory whose sessions cannot be opened.
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&MemoryS3::new())
        }
    }

    /// Options of every session opened so far.
    pub(crate) fn sessions(&self) -> Vec<SessionOptions> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn create_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn S3Api>, ConfigError> {
        self.sessions.lock().push(options.clone());
        if self.fail {
            return Err(ConfigError::Credentials("no credentials".to_owned()));
        }
        Ok(Arc::new(self.memory.session(options)))
    }
}

/// A [`RegionResolver`] with a fixed answer.
#[derive(Debug)]
pub(crate) struct FakeRegionResolver {
    region: Option<String>,
    lookups: Mutex<Vec<String>>,
}

impl FakeRegionResolver {
    pub(crate) fn new(region: &str) -> Self {
        Self {
            region: Some(region.to_owned()),
            lookups: Mutex::default(),
        }
    }

    /// A resolver that cannot find any bucket.
    pub(crate) fn failing() -> Self {
        Self {
            region: None,
            lookups: Mutex::default(),
        }
    }

    /// Buckets looked up so far.
    pub(crate) fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

#[async_trait]
impl RegionResolver for FakeRegionResolver {
    async fn bucket_region(&self, bucket: &str) -> Result<String, ApiError> {
        self.lookups.lock().push(bucket.to_owned());
        self.region
            .clone()
            .ok_or_else(|| ApiError::from_status(StatusCode::FORBIDDEN, None))
    }
}

/// A request received by [`TestServer`].
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: HeaderMap,
}

impl RecordedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }
}

/// A loopback S3 endpoint serving a [`MemoryS3`] with path-style addressing.
///
/// Requests must carry an `Authorization` header; the signature itself is
/// not checked. Bucket `HEAD`s are answered anonymously with the region of
/// the bucket, as S3 does.
#[derive(Debug)]
pub(crate) struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub(crate) async fn start(memory: Arc<MemoryS3>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener address");
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();

        let handle = tokio::spawn({
            let requests = Arc::clone(&requests);
            async move {
                let http = HttpConnBuilder::new(TokioExecutor::new());
                while let Ok((stream, _)) = listener.accept().await {
                    let memory = Arc::clone(&memory);
                    let requests = Arc::clone(&requests);
                    let svc = service_fn(move |req| {
                        handle(Arc::clone(&memory), Arc::clone(&requests), req)
                    });
                    let conn = http.serve_connection(TokioIo::new(stream), svc).into_owned();
                    tokio::spawn(async move {
                        let _ = conn.await;
                    });
                }
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type ServerResponse = Response<Full<Bytes>>;

async fn handle(
    memory: Arc<MemoryS3>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    req: Request<Incoming>,
) -> Result<ServerResponse, Infallible> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .unwrap_or_default();
    requests.lock().push(RecordedRequest {
        method: parts.method.clone(),
        path: parts.uri.path().to_owned(),
        query: parts.uri.query().map(str::to_owned),
        headers: parts.headers.clone(),
    });

    let response = match route(&memory, &parts, body).await {
        Ok(response) => response,
        Err(err) => error_response(&parts.method, &err),
    };
    Ok(response)
}

fn decode(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (decode(name), decode(value)),
            None => (decode(pair), String::new()),
        })
        .collect()
}

fn encryption_from_headers(headers: &HeaderMap) -> Result<Option<ServerSideEncryption>, ApiError> {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let (Some(algorithm), Some(key)) = (
        get(SSE_CUSTOMER_ALGORITHM_HEADER),
        get(SSE_CUSTOMER_KEY_HEADER),
    ) {
        let key = CustomerKey::from_base64(key).map_err(|_| {
            service_error(StatusCode::BAD_REQUEST, "InvalidArgument", "invalid customer key")
        })?;
        if get(SSE_CUSTOMER_KEY_MD5_HEADER) != Some(key.md5_base64().as_str()) {
            return Err(service_error(
                StatusCode::BAD_REQUEST,
                "InvalidArgument",
                "The calculated MD5 hash of the key did not match the hash that was provided.",
            ));
        }
        return Ok(Some(ServerSideEncryption::CustomerKey {
            algorithm: algorithm.to_owned(),
            key,
        }));
    }

    Ok(get(SSE_HEADER).map(|algorithm| match algorithm {
        "aws:kms" => ServerSideEncryption::Kms {
            key_id: get(SSE_KMS_KEY_ID_HEADER).unwrap_or_default().to_owned(),
        },
        other => ServerSideEncryption::Algorithm(other.to_owned()),
    }))
}

fn xml_response(body: Vec<u8>) -> ServerResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/xml"),
    );
    response
}

fn empty_response(status: StatusCode) -> ServerResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn with_header(
    mut response: ServerResponse,
    name: http::HeaderName,
    value: &str,
) -> ServerResponse {
    if let Ok(value) = http::HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
    response
}

fn error_response(method: &Method, err: &ApiError) -> ServerResponse {
    let (status, code, message) = match err {
        ApiError::Service {
            status,
            code,
            message,
            ..
        } => (*status, code.clone(), message.clone()),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "InternalError".to_owned(),
            other.to_string(),
        ),
    };
    if *method == Method::HEAD {
        return empty_response(status);
    }
    let body = to_xml(
        "Error",
        &ErrorResponse {
            code,
            message,
            resource: None,
            request_id: Some("memory-request".to_owned()),
        },
    )
    .unwrap_or_default();
    let mut response = xml_response(body);
    *response.status_mut() = status;
    response
}

async fn route(
    memory: &MemoryS3,
    parts: &http::request::Parts,
    body: Bytes,
) -> Result<ServerResponse, ApiError> {
    let path = decode(parts.uri.path());
    let path = path.trim_start_matches('/');
    let (bucket, key) = match path.split_once('/') {
        Some((bucket, key)) => (bucket.to_owned(), Some(key.to_owned())),
        None => (path.to_owned(), None),
    };
    let query = parse_query(parts.uri.query());
    let upload_id = query.get("uploadId").cloned();

    if key.is_none() && parts.method == Method::HEAD {
        return Ok(match memory.region() {
            Some(region) => with_header(
                empty_response(StatusCode::MOVED_PERMANENTLY),
                http::HeaderName::from_static(BUCKET_REGION_HEADER),
                region,
            ),
            None => empty_response(StatusCode::NOT_FOUND),
        });
    }

    if !parts.headers.contains_key(AUTHORIZATION) {
        return Err(service_error(
            StatusCode::FORBIDDEN,
            "AccessDenied",
            "Access Denied",
        ));
    }
    let encryption = encryption_from_headers(&parts.headers)?;

    let method = &parts.method;
    let Some(key) = key else {
        if *method != Method::GET {
            return Err(service_error(
                StatusCode::METHOD_NOT_ALLOWED,
                "MethodNotAllowed",
                "The specified method is not allowed against this resource.",
            ));
        }
        let input = ListObjectsV2Input {
            bucket,
            prefix: query.get("prefix").cloned(),
            delimiter: query.get("delimiter").cloned(),
            continuation_token: query.get("continuation-token").cloned(),
        };
        let page = memory.list_objects_v2(&input).await?;
        return Ok(xml_response(to_xml("ListBucketResult", &page)?));
    };

    let target = ObjectTarget::new(bucket.clone(), key.clone()).with_encryption(encryption.clone());
    match *method {
        Method::HEAD => {
            let head = memory.head_object(&target).await?;
            let mut response = empty_response(StatusCode::OK);
            if let Some(length) = head.content_length {
                response = with_header(response, CONTENT_LENGTH, &length.to_string());
            }
            Ok(with_header(response, ETAG, &head.etag.unwrap_or_default()))
        }
        Method::GET => {
            let output = memory.get_object(&target).await?;
            let body = output.body.collect().await?;
            Ok(Response::new(Full::new(body)))
        }
        Method::PUT if query.contains_key("partNumber") => {
            let part_number = query
                .get("partNumber")
                .and_then(|n| n.parse().ok())
                .unwrap_or_default();
            let etag = memory
                .upload_part(UploadPartInput {
                    bucket,
                    key,
                    upload_id: upload_id.unwrap_or_default(),
                    part_number,
                    body,
                    encryption,
                })
                .await?;
            Ok(with_header(empty_response(StatusCode::OK), ETAG, &etag))
        }
        Method::PUT => {
            let etag = memory
                .put_object(PutObjectInput {
                    bucket,
                    key,
                    body,
                    encryption,
                })
                .await?;
            Ok(with_header(
                empty_response(StatusCode::OK),
                ETAG,
                &etag.unwrap_or_default(),
            ))
        }
        Method::POST if query.contains_key("uploads") => {
            let upload_id = memory
                .create_multipart_upload(&CreateMultipartUploadInput {
                    bucket: bucket.clone(),
                    key: key.clone(),
                    encryption,
                })
                .await?;
            let result = InitiateMultipartUploadResult {
                bucket,
                key,
                upload_id,
            };
            Ok(xml_response(to_xml("InitiateMultipartUploadResult", &result)?))
        }
        Method::POST if upload_id.is_some() => {
            let request: CompleteMultipartUpload = from_xml(&body)?;
            memory
                .complete_multipart_upload(&CompleteMultipartUploadInput {
                    bucket: bucket.clone(),
                    key: key.clone(),
                    upload_id: upload_id.unwrap_or_default(),
                    parts: request.parts,
                })
                .await?;
            let result = CompleteMultipartUploadResult {
                location: None,
                bucket: Some(bucket),
                key: Some(key),
                etag: None,
            };
            Ok(xml_response(to_xml("CompleteMultipartUploadResult", &result)?))
        }
        Method::DELETE => {
            match upload_id {
                Some(upload_id) => {
                    memory
                        .abort_multipart_upload(&bucket, &key, &upload_id)
                        .await?;
                }
                None => memory.delete_object(&bucket, &key).await?,
            }
            Ok(empty_response(StatusCode::NO_CONTENT))
        }
        _ => Err(service_error(
            StatusCode::METHOD_NOT_ALLOWED,
            "MethodNotAllowed",
            "The specified method is not allowed against this resource.",
        )),
    }
}
