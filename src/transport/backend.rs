//! Abstract blob transport traits.
//!
//! A [`BlobTransport`] turns an account name and one credential into an
//! [`AccountClient`]. Connecting is where a bad key is detected, so its
//! errors are [`CredentialError`]s and drive the primary/secondary
//! fallback. Everything after that is a plain backend call returning
//! `anyhow::Result`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::credentials::AccountCredential;
use crate::errors::CredentialError;

/// A blob's content as a stream of chunks.
pub type ByteStream = BoxStream<'static, anyhow::Result<Bytes>>;

/// Boxed future returned by [`AccountClient`] methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// One page of a listing plus the marker for the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Container names or blob names, in backend order.
    pub items: Vec<String>,
    /// Marker for the next page; `None` on the last page.
    pub next_marker: Option<String>,
}

impl ListPage {
    pub fn new(items: Vec<String>, next_marker: Option<String>) -> Self {
        Self {
            items,
            // An empty marker also ends the listing.
            next_marker: next_marker.filter(|m| !m.is_empty()),
        }
    }
}

/// Builds account-scoped clients from credentials.
pub trait BlobTransport: Send + Sync + 'static {
    /// Build a client for `account` using `credential`'s key material.
    fn connect(
        &self,
        account: &str,
        credential: &AccountCredential,
    ) -> Result<Arc<dyn AccountClient>, CredentialError>;
}

/// Async blob operations against one storage account.
pub trait AccountClient: Send + Sync + 'static {
    /// The storage account this client is bound to.
    fn account(&self) -> &str;

    /// Canonical URL of `container/name`.
    fn blob_url(&self, container: &str, name: &str) -> String;

    /// Write `data` to `container/name`, replacing any existing blob.
    fn put_blob(&self, container: &str, name: &str, data: Bytes) -> BackendFuture<'_, ()>;

    /// Read the full blob.
    fn get_blob(&self, container: &str, name: &str) -> BackendFuture<'_, Bytes>;

    /// Open the blob as a chunk stream.
    fn open_blob(&self, container: &str, name: &str) -> BackendFuture<'_, ByteStream>;

    /// Delete the blob. Returns `false` if it did not exist.
    fn delete_blob_if_exists(&self, container: &str, name: &str) -> BackendFuture<'_, bool>;

    /// Check whether the blob exists.
    fn blob_exists(&self, container: &str, name: &str) -> BackendFuture<'_, bool>;

    /// List one page of container names, starting at `marker`.
    fn list_containers_page(&self, marker: Option<&str>) -> BackendFuture<'_, ListPage>;

    /// List one page of blob names in `container` under `prefix`.
    fn list_blobs_page(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> BackendFuture<'_, ListPage>;
}
