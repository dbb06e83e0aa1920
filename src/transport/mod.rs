//! Blob storage transports.
//!
//! The [`backend::BlobTransport`] and [`backend::AccountClient`] traits
//! abstract over where blobs live. [`azure::AzureTransport`] talks to the
//! Azure Blob REST API; [`memory::MemoryTransport`] keeps everything in
//! process for tests and local development.

pub mod azure;
pub mod backend;
pub mod memory;

pub use backend::{AccountClient, BackendFuture, BlobTransport, ByteStream, ListPage};
