//! azblob-failover -- Azure Blob Storage client with credential failover.
//!
//! This crate provides a blob storage service over two storage account
//! credentials: every operation is tried with the primary credential and
//! retried once with the secondary. It covers upload, download (to memory,
//! stream or disk), delete, existence checks, marker-paginated listing,
//! concurrent batch deletes and existence checks, and read-only shared
//! access (SAS) URLs.
//!
//! ```no_run
//! # async fn run() -> azblob_failover::Result<()> {
//! use std::sync::Arc;
//! use std::time::Duration;
//! use azblob_failover::{AzureTransport, BlobStorageService};
//!
//! let transport = AzureTransport::new(Duration::from_secs(300)).expect("http client");
//! let service = BlobStorageService::new(
//!     Some("DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=...;EndpointSuffix=core.windows.net"),
//!     None,
//!     Arc::new(transport),
//! );
//! let url = service.upload_file("docs", "2024/report.txt", "hello").await?;
//! let shared = service.download_file_to_access_shared_url(&url, 15).await?;
//! # let _ = shared;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod client;
pub mod config;
pub mod credentials;
pub mod disk;
pub mod errors;
pub mod fanout;
pub mod metrics;
pub mod sas;
pub mod service;
pub mod transport;
pub mod xml;

pub use address::BlobAddress;
pub use credentials::{AccountCredential, CredentialPair, CredentialResolver};
pub use errors::{CredentialError, CredentialSlot, Result, StorageError};
pub use fanout::BatchResult;
pub use sas::{SasUrlGenerator, SharedAccessPolicy};
pub use service::BlobStorageService;
pub use transport::azure::AzureTransport;
pub use transport::memory::MemoryTransport;
