//! S3 object storage for backup artifacts.
//!
//! [`ObjectStore`] stores, fetches, lists and deletes backup artifacts in an
//! S3 bucket or an S3-compatible service, and hands out presigned download
//! URLs for them. A store is built once from a flat configuration map and
//! never changes afterwards.
//!
//! # Overview
//!
//! ```text
//! config map ─► StoreConfig ─► region discovery ─► SessionOptions ─► S3Api
//!                (validate)     (AWS, no region)     (primary, public)
//! ```
//!
//! - [`config`]: option names, validation, [`StoreConfig`]
//! - [`region`]: bucket region discovery
//! - [`session`]: endpoint resolution, TLS, the AWS credential chain
//! - [`sse`]: customer keys and the per-request encryption decision
//! - [`client`]: the [`S3Api`] capability trait
//! - [`http_client`]: [`S3Api`] over HTTP with SigV4 signing
//! - [`upload`]: single-request and multipart uploads
//! - [`store`]: the [`ObjectStore`] façade
//!
//! # Usage
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! use objstore_core::ObjectStore;
//!
//! # async fn example() -> Result<(), objstore_core::StoreError> {
//! let config = HashMap::from([
//!     ("bucket".to_owned(), "velero".to_owned()),
//!     ("region".to_owned(), "eu-west-1".to_owned()),
//! ]);
//! let store = ObjectStore::init(&config).await?;
//!
//! store.put_object("velero", "backups/b1/b1.tar.gz", &b"..."[..]).await?;
//! let url = store
//!     .create_signed_url("velero", "backups/b1/b1.tar.gz", Duration::from_secs(600))
//!     .await?;
//! println!("{}", url.url);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod http_client;
pub mod region;
pub mod session;
pub mod sse;
pub mod store;
pub mod upload;

#[cfg(test)]
mod testing;

pub use client::{ByteStream, ObjectTarget, S3Api};
pub use config::{SignatureVersion, StoreConfig};
pub use error::{ApiError, ConfigError, StoreError};
pub use http_client::HttpS3Client;
pub use region::{HttpRegionResolver, RegionResolver};
pub use session::{HttpSessionFactory, SessionFactory, SessionOptions};
pub use sse::{CustomerKey, EncryptionPolicy, ServerSideEncryption};
pub use store::{ObjectStore, SignedUrl};
pub use upload::Uploader;
