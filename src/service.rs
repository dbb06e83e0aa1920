//! The blob storage service façade.
//!
//! [`BlobStorageService`] is the public entry point. Blob URLs are parsed
//! into addresses, clients are resolved with credential fallback on every
//! call, batch operations fan out one task per URL and listings walk every
//! page in order.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Local;
use futures::StreamExt;
use tracing::{debug, info};

use crate::address::BlobAddress;
use crate::client::{BlobClient, BlobClientFactory};
use crate::config::Config;
use crate::credentials::CredentialResolver;
use crate::disk;
use crate::errors::Result;
use crate::fanout::{fan_out, BatchResult};
use crate::metrics::{self, OperationTimer};
use crate::sas::SasUrlGenerator;
use crate::transport::azure::AzureTransport;
use crate::transport::{BlobTransport, ByteStream};

/// Upload, download, delete, list and share blobs across two credentials.
#[derive(Clone)]
pub struct BlobStorageService {
    factory: BlobClientFactory,
    sas: SasUrlGenerator,
    download_dir: PathBuf,
}

impl BlobStorageService {
    /// Build a service from the primary and secondary connection strings.
    /// Either may be absent; only using the service reveals a bad one.
    pub fn new(
        primary_connection_string: Option<&str>,
        secondary_connection_string: Option<&str>,
        transport: Arc<dyn BlobTransport>,
    ) -> Self {
        let resolver = CredentialResolver::from_connection_strings(
            primary_connection_string,
            secondary_connection_string,
        );
        Self {
            factory: BlobClientFactory::new(resolver.clone(), transport),
            sas: SasUrlGenerator::new(resolver),
            download_dir: disk::default_download_dir(),
        }
    }

    /// Build a service over the Azure REST transport from `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = AzureTransport::new(config.transfer.timeout())?;
        let service = Self::new(
            config.credentials.primary_connection_string.as_deref(),
            config.credentials.secondary_connection_string.as_deref(),
            Arc::new(transport),
        );
        Ok(match &config.transfer.download_dir {
            Some(dir) => service.with_download_dir(dir),
            None => service,
        })
    }

    /// Write `download_file_to_disk` output to `dir` instead of the default.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn blob(&self, url: &str) -> Result<BlobClient> {
        let address = BlobAddress::parse(url)?;
        self.factory.blob_client(&address)
    }

    // -- Downloads -------------------------------------------------------

    /// Read the whole blob at `url` into memory.
    pub async fn download_file_to_bytes(&self, url: &str) -> Result<Bytes> {
        instrumented("download_bytes", async {
            let data = self.blob(url)?.download().await?;
            metrics::record_bytes_downloaded(data.len());
            debug!("Downloaded {} bytes from {}", data.len(), url);
            Ok(data)
        })
        .await
    }

    /// Open the blob at `url` as a stream of chunks.
    pub async fn download_file_to_stream(&self, url: &str) -> Result<ByteStream> {
        instrumented("download_stream", async {
            let stream = self.blob(url)?.open().await?;
            let counted = stream.inspect(|chunk| {
                if let Ok(chunk) = chunk {
                    metrics::record_bytes_downloaded(chunk.len());
                }
            });
            Ok(counted.boxed())
        })
        .await
    }

    /// Stream the blob at `url` into a new file in the download directory
    /// and return its path.
    pub async fn download_file_to_disk(&self, url: &str) -> Result<PathBuf> {
        instrumented("download_disk", async {
            let blob = self.blob(url)?;
            let stream = blob.open().await?;
            let file_name = disk::local_file_name(blob.container(), blob.name(), Local::now());
            let path = self.download_dir.join(file_name);

            let written = disk::write_stream(&path, stream).await?;
            metrics::record_bytes_downloaded(written as usize);
            info!("Downloaded {} ({} bytes) to {}", url, written, path.display());
            Ok(path)
        })
        .await
    }

    /// Signed read-only URL for the blob at `url`, valid for
    /// `lifetime_minutes` from now.
    pub async fn download_file_to_access_shared_url(
        &self,
        url: &str,
        lifetime_minutes: i64,
    ) -> Result<String> {
        instrumented("shared_url", async {
            let address = BlobAddress::parse(url)?;
            self.sas.generate(&address, lifetime_minutes)
        })
        .await
    }

    // -- Uploads ---------------------------------------------------------

    /// Upload `data` to `container/name` in the credential's own account,
    /// replacing any existing blob. Returns the blob's URL.
    pub async fn upload_file(
        &self,
        container: &str,
        name: &str,
        data: impl Into<Bytes>,
    ) -> Result<String> {
        let data = data.into();
        instrumented("upload", async {
            let blob = self.factory.container_client(None, container)?.blob(name);
            let size = data.len();
            blob.upload(data).await?;
            metrics::record_bytes_uploaded(size);
            let url = blob.url();
            info!("Uploaded {} bytes to {}", size, url);
            Ok(url)
        })
        .await
    }

    // -- Deletes and existence checks ------------------------------------

    /// Delete the blob at `url`. Returns `false` if it did not exist.
    pub async fn delete_file(&self, url: &str) -> Result<bool> {
        instrumented("delete", async {
            let deleted = self.blob(url)?.delete_if_exists().await?;
            debug!("Delete {}: deleted={}", url, deleted);
            Ok(deleted)
        })
        .await
    }

    /// Delete every blob in `urls` concurrently. The result maps each
    /// distinct URL to whether a blob was removed.
    pub async fn delete_files<I, S>(&self, urls: I) -> Result<BatchResult<bool>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = urls.into_iter().map(Into::into);
        instrumented(
            "delete_batch",
            fan_out("delete_files", keys, |url| {
                let service = self.clone();
                async move { service.delete_file(&url).await }
            }),
        )
        .await
    }

    pub async fn check_if_file_exists(&self, url: &str) -> Result<bool> {
        instrumented("exists", async { self.blob(url)?.exists().await }).await
    }

    /// Check every blob in `urls` concurrently.
    pub async fn check_if_files_exists<I, S>(&self, urls: I) -> Result<BatchResult<bool>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = urls.into_iter().map(Into::into);
        instrumented(
            "exists_batch",
            fan_out("check_if_files_exists", keys, |url| {
                let service = self.clone();
                async move { service.check_if_file_exists(&url).await }
            }),
        )
        .await
    }

    // -- Listing ---------------------------------------------------------

    /// Every container in the credential's own account.
    pub async fn list_all_containers(&self) -> Result<Vec<String>> {
        instrumented("list_containers", async {
            self.factory.account_client(None)?.list_containers().await
        })
        .await
    }

    /// Every blob name in `container`, optionally restricted to names
    /// starting with `sub_directory`. A blank `sub_directory` lists the
    /// whole container. An entry named exactly `sub_directory` is left out.
    pub async fn list_all_files_from_container(
        &self,
        container: &str,
        sub_directory: Option<&str>,
    ) -> Result<Vec<String>> {
        let prefix = sub_directory
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_default();
        instrumented("list_files", async {
            let names = self
                .factory
                .container_client(None, container)?
                .list_blobs(prefix)
                .await?;
            Ok(names
                .into_iter()
                .filter(|name| prefix.is_empty() || name != prefix)
                .collect())
        })
        .await
    }
}

/// Await `fut`, recording its outcome and duration under `operation`.
async fn instrumented<T>(operation: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    let timer = OperationTimer::start(operation);
    let result = fut.await;
    if let Err(e) = &result {
        debug!("{} failed ({}): {}", operation, e.kind(), e);
    }
    timer.finish(result)
}
