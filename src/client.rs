//! Account-, container- and blob-scoped client handles.
//!
//! [`BlobClientFactory`] resolves an [`AccountClient`] through the
//! [`CredentialResolver`] (primary first, secondary on failure) and wraps
//! it in a typed handle. Handles convert transport errors into
//! [`StorageError::Backend`] so callers only ever see `StorageError`.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::address::BlobAddress;
use crate::credentials::CredentialResolver;
use crate::errors::{Result, StorageError};
use crate::transport::{AccountClient, BlobTransport, ByteStream, ListPage};

/// Builds client handles with credential fallback.
#[derive(Clone)]
pub struct BlobClientFactory {
    resolver: CredentialResolver,
    transport: Arc<dyn BlobTransport>,
}

impl BlobClientFactory {
    pub fn new(resolver: CredentialResolver, transport: Arc<dyn BlobTransport>) -> Self {
        Self {
            resolver,
            transport,
        }
    }

    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    /// Client for `account`, or for the credential's own account when `None`.
    pub fn account_client(&self, account: Option<&str>) -> Result<ServiceClient> {
        let client = self
            .resolver
            .resolve_client(self.transport.as_ref(), account)?;
        debug!("Resolved client for account {}", client.account());
        Ok(ServiceClient { client })
    }

    pub fn container_client(&self, account: Option<&str>, container: &str) -> Result<ContainerClient> {
        Ok(self.account_client(account)?.container(container))
    }

    pub fn blob_client(&self, address: &BlobAddress) -> Result<BlobClient> {
        Ok(self
            .container_client(Some(&address.account), &address.container)?
            .blob(&address.name))
    }
}

/// Handle bound to one storage account.
#[derive(Clone)]
pub struct ServiceClient {
    client: Arc<dyn AccountClient>,
}

impl ServiceClient {
    pub fn account(&self) -> &str {
        self.client.account()
    }

    pub fn container(&self, container: &str) -> ContainerClient {
        ContainerClient {
            client: Arc::clone(&self.client),
            container: container.to_string(),
        }
    }

    /// Every container name in the account, following markers to the end.
    pub async fn list_containers(&self) -> Result<Vec<String>> {
        let client = &self.client;
        drain_pages("list_containers", |marker| {
            client.list_containers_page(marker.as_deref())
        })
        .await
    }
}

/// Handle bound to one container.
#[derive(Clone)]
pub struct ContainerClient {
    client: Arc<dyn AccountClient>,
    container: String,
}

impl ContainerClient {
    pub fn name(&self) -> &str {
        &self.container
    }

    pub fn blob(&self, name: &str) -> BlobClient {
        BlobClient {
            client: Arc::clone(&self.client),
            container: self.container.clone(),
            name: name.to_string(),
        }
    }

    /// Every blob name under `prefix`, following markers to the end.
    pub async fn list_blobs(&self, prefix: &str) -> Result<Vec<String>> {
        let client = &self.client;
        let container = self.container.as_str();
        drain_pages("list_blobs", |marker| {
            client.list_blobs_page(container, prefix, marker.as_deref())
        })
        .await
    }
}

/// Handle bound to one blob.
#[derive(Clone)]
pub struct BlobClient {
    client: Arc<dyn AccountClient>,
    container: String,
    name: String,
}

impl BlobClient {
    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> String {
        self.client.blob_url(&self.container, &self.name)
    }

    /// Upload `data`, replacing any existing blob.
    pub async fn upload(&self, data: Bytes) -> Result<()> {
        self.client
            .put_blob(&self.container, &self.name, data)
            .await
            .map_err(|e| StorageError::backend("upload", e))
    }

    pub async fn download(&self) -> Result<Bytes> {
        self.client
            .get_blob(&self.container, &self.name)
            .await
            .map_err(|e| StorageError::backend("download", e))
    }

    pub async fn open(&self) -> Result<ByteStream> {
        self.client
            .open_blob(&self.container, &self.name)
            .await
            .map_err(|e| StorageError::backend("open", e))
    }

    /// Delete the blob; `false` if there was nothing to delete.
    pub async fn delete_if_exists(&self) -> Result<bool> {
        self.client
            .delete_blob_if_exists(&self.container, &self.name)
            .await
            .map_err(|e| StorageError::backend("delete", e))
    }

    pub async fn exists(&self) -> Result<bool> {
        self.client
            .blob_exists(&self.container, &self.name)
            .await
            .map_err(|e| StorageError::backend("exists", e))
    }
}

/// Fetch pages one after another until the backend stops returning a
/// marker, concatenating the items in page order.
pub(crate) async fn drain_pages<F, Fut>(operation: &'static str, mut fetch: F) -> Result<Vec<String>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = anyhow::Result<ListPage>>,
{
    let mut items = Vec::new();
    let mut marker: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = fetch(marker.take())
            .await
            .map_err(|e| StorageError::backend(operation, e))?;
        pages += 1;
        items.extend(page.items);
        match page.next_marker {
            Some(next) => marker = Some(next),
            None => break,
        }
    }

    debug!("{}: {} item(s) over {} page(s)", operation, items.len(), pages);
    Ok(items)
}
