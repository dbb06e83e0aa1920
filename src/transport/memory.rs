//! In-memory blob transport.
//!
//! Accounts, containers and blobs live in `tokio::sync::RwLock`-protected
//! ordered maps, so listings come back sorted by name like the real
//! service. Accounts are registered with a base64 key and `connect()`
//! rejects any other key, which makes the credential fallback observable
//! without a network. Listing pages are cut at a configurable size and
//! failures can be injected per blob.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::StreamExt;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use super::backend::{AccountClient, BackendFuture, BlobTransport, ByteStream, ListPage};
use crate::address::{encode_path, BLOB_HOST_SUFFIX};
use crate::credentials::AccountCredential;
use crate::errors::CredentialError;

/// Default number of entries per listing page.
const DEFAULT_PAGE_SIZE: usize = 5000;

/// Chunk size used by `open_blob` streams.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

type Blobs = BTreeMap<String, Bytes>;

#[derive(Default)]
struct AccountState {
    /// Decoded key accepted by `connect()`.
    key: Vec<u8>,
    /// container -> blob name -> data.
    containers: RwLock<BTreeMap<String, Blobs>>,
    /// "container/name" keys whose operations fail.
    failing: RwLock<HashSet<String>>,
}

/// In-process transport. Cloning shares the same storage.
#[derive(Clone)]
pub struct MemoryTransport {
    accounts: Arc<HashMap<String, Arc<AccountState>>>,
    page_size: usize,
}

/// Builder for [`MemoryTransport`].
#[derive(Default)]
pub struct MemoryTransportBuilder {
    accounts: HashMap<String, Vec<u8>>,
    page_size: Option<usize>,
}

impl MemoryTransportBuilder {
    /// Register `account` with a base64 `key`.
    pub fn account(mut self, account: &str, key: &str) -> anyhow::Result<Self> {
        let key_bytes = BASE64_STANDARD
            .decode(key)
            .map_err(|e| anyhow::anyhow!("Invalid key for account {}: {}", account, e))?;
        self.accounts.insert(account.to_string(), key_bytes);
        Ok(self)
    }

    /// Cut listings into pages of `page_size` entries.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    pub fn build(self) -> MemoryTransport {
        let accounts = self
            .accounts
            .into_iter()
            .map(|(name, key)| {
                let state = AccountState {
                    key,
                    ..AccountState::default()
                };
                (name, Arc::new(state))
            })
            .collect();
        MemoryTransport {
            accounts: Arc::new(accounts),
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }
}

impl MemoryTransport {
    pub fn builder() -> MemoryTransportBuilder {
        MemoryTransportBuilder::default()
    }

    fn state(&self, account: &str) -> anyhow::Result<&Arc<AccountState>> {
        self.accounts
            .get(account)
            .ok_or_else(|| anyhow::anyhow!("Unknown storage account: {}", account))
    }

    /// Create an empty container. Idempotent.
    pub async fn create_container(&self, account: &str, container: &str) -> anyhow::Result<()> {
        let state = self.state(account)?;
        state
            .containers
            .write()
            .await
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    /// Make every operation on `container/name` fail.
    pub async fn fail_blob(&self, account: &str, container: &str, name: &str) -> anyhow::Result<()> {
        let state = self.state(account)?;
        state
            .failing
            .write()
            .await
            .insert(format!("{}/{}", container, name));
        Ok(())
    }
}

impl BlobTransport for MemoryTransport {
    fn connect(
        &self,
        account: &str,
        credential: &AccountCredential,
    ) -> Result<Arc<dyn AccountClient>, CredentialError> {
        let key = credential.key_bytes()?;
        let rejected = |reason: &str| CredentialError::Rejected {
            slot: credential.slot(),
            account: account.to_string(),
            reason: reason.to_string(),
        };

        let state = self
            .accounts
            .get(account)
            .ok_or_else(|| rejected("unknown account"))?;
        let matches = key.len() == state.key.len() && bool::from(key.ct_eq(&state.key));
        if !matches {
            return Err(rejected("account key does not match"));
        }

        Ok(Arc::new(MemoryAccountClient {
            account: account.to_string(),
            state: Arc::clone(state),
            page_size: self.page_size,
        }))
    }
}

/// Client bound to one in-memory account.
pub struct MemoryAccountClient {
    account: String,
    state: Arc<AccountState>,
    page_size: usize,
}

impl MemoryAccountClient {
    async fn check_fault(&self, container: &str, name: &str) -> anyhow::Result<()> {
        let key = format!("{}/{}", container, name);
        if self.state.failing.read().await.contains(&key) {
            anyhow::bail!("Injected failure for blob {}", key);
        }
        Ok(())
    }

    async fn read_blob(&self, container: &str, name: &str) -> anyhow::Result<Bytes> {
        self.check_fault(container, name).await?;
        let containers = self.state.containers.read().await;
        let blobs = containers
            .get(container)
            .ok_or_else(|| anyhow::anyhow!("Container not found: {}", container))?;
        blobs
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Blob not found: {}/{}", container, name))
    }

    /// Cut `names` (already sorted and filtered) into one page after `marker`.
    fn page<'a>(&self, names: impl Iterator<Item = &'a String>) -> ListPage {
        let mut items: Vec<String> = names.take(self.page_size + 1).cloned().collect();
        let next_marker = if items.len() > self.page_size {
            items.pop()
        } else {
            None
        };
        ListPage::new(items, next_marker)
    }
}

/// Range of keys starting at `marker` (inclusive), or everything.
fn from_marker(marker: Option<&str>) -> (Bound<String>, Bound<String>) {
    match marker {
        Some(m) => (Bound::Included(m.to_string()), Bound::Unbounded),
        None => (Bound::Unbounded, Bound::Unbounded),
    }
}

impl AccountClient for MemoryAccountClient {
    fn account(&self) -> &str {
        &self.account
    }

    fn blob_url(&self, container: &str, name: &str) -> String {
        format!(
            "https://{}.{}/{}/{}",
            self.account,
            BLOB_HOST_SUFFIX,
            container,
            encode_path(name)
        )
    }

    fn put_blob(&self, container: &str, name: &str, data: Bytes) -> BackendFuture<'_, ()> {
        let container = container.to_string();
        let name = name.to_string();
        Box::pin(async move {
            self.check_fault(&container, &name).await?;
            let mut containers = self.state.containers.write().await;
            let blobs = containers
                .get_mut(&container)
                .ok_or_else(|| anyhow::anyhow!("Container not found: {}", container))?;
            blobs.insert(name, data);
            Ok(())
        })
    }

    fn get_blob(&self, container: &str, name: &str) -> BackendFuture<'_, Bytes> {
        let container = container.to_string();
        let name = name.to_string();
        Box::pin(async move { self.read_blob(&container, &name).await })
    }

    fn open_blob(&self, container: &str, name: &str) -> BackendFuture<'_, ByteStream> {
        let container = container.to_string();
        let name = name.to_string();
        Box::pin(async move {
            let data = self.read_blob(&container, &name).await?;
            let chunks: Vec<anyhow::Result<Bytes>> = (0..data.len())
                .step_by(STREAM_CHUNK_SIZE)
                .map(|start| {
                    let end = (start + STREAM_CHUNK_SIZE).min(data.len());
                    Ok(data.slice(start..end))
                })
                .collect();
            Ok(futures::stream::iter(chunks).boxed())
        })
    }

    fn delete_blob_if_exists(&self, container: &str, name: &str) -> BackendFuture<'_, bool> {
        let container = container.to_string();
        let name = name.to_string();
        Box::pin(async move {
            self.check_fault(&container, &name).await?;
            let mut containers = self.state.containers.write().await;
            Ok(containers
                .get_mut(&container)
                .map(|blobs| blobs.remove(&name).is_some())
                .unwrap_or(false))
        })
    }

    fn blob_exists(&self, container: &str, name: &str) -> BackendFuture<'_, bool> {
        let container = container.to_string();
        let name = name.to_string();
        Box::pin(async move {
            self.check_fault(&container, &name).await?;
            let containers = self.state.containers.read().await;
            Ok(containers
                .get(&container)
                .map(|blobs| blobs.contains_key(&name))
                .unwrap_or(false))
        })
    }

    fn list_containers_page(&self, marker: Option<&str>) -> BackendFuture<'_, ListPage> {
        let range = from_marker(marker);
        Box::pin(async move {
            let containers = self.state.containers.read().await;
            Ok(self.page(containers.range(range).map(|(name, _)| name)))
        })
    }

    fn list_blobs_page(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> BackendFuture<'_, ListPage> {
        let container = container.to_string();
        let prefix = prefix.to_string();
        let range = from_marker(marker);
        Box::pin(async move {
            let containers = self.state.containers.read().await;
            let blobs = containers
                .get(&container)
                .ok_or_else(|| anyhow::anyhow!("Container not found: {}", container))?;
            let names = blobs
                .range(range)
                .map(|(name, _)| name)
                .filter(|name| name.starts_with(&prefix));
            Ok(self.page(names))
        })
    }
}
