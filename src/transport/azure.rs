//! Azure Blob Storage transport.
//!
//! Talks to the Azure Blob REST API using `reqwest`, signing every request
//! with Shared Key authorization:
//! `Authorization: SharedKey {account}:{signature}`.
//!
//! Operation mapping:
//!   `put_blob()`              -> Put Blob (BlockBlob, overwrites)
//!   `get_blob()/open_blob()`  -> Get Blob
//!   `delete_blob_if_exists()` -> Delete Blob (404 -> `false`)
//!   `blob_exists()`           -> HEAD Get Blob Properties (404 -> `false`)
//!   `list_containers_page()`  -> List Containers (`comp=list`)
//!   `list_blobs_page()`       -> List Blobs (`restype=container&comp=list`)

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use md5::{Digest, Md5};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use tracing::{debug, info};

use super::backend::{AccountClient, BackendFuture, BlobTransport, ByteStream, ListPage};
use crate::address::{encode_path, encode_query_value};
use crate::credentials::AccountCredential;
use crate::errors::CredentialError;
use crate::sas::sign_base64;
use crate::xml::{parse_blob_list, parse_container_list};

/// Azure REST API version used for all requests.
pub const AZURE_API_VERSION: &str = "2023-11-03";

/// Default HTTP timeout for a single request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Builds [`AzureAccountClient`]s sharing one HTTP connection pool.
pub struct AzureTransport {
    client: reqwest::Client,
}

impl AzureTransport {
    /// Create a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        info!(
            "Azure transport initialized: api_version={} timeout={:?}",
            AZURE_API_VERSION, timeout
        );

        Ok(Self { client })
    }
}

impl BlobTransport for AzureTransport {
    fn connect(
        &self,
        account: &str,
        credential: &AccountCredential,
    ) -> Result<Arc<dyn AccountClient>, CredentialError> {
        let key_bytes = credential.key_bytes()?;
        let base_url = credential.blob_endpoint(account);
        let base_path = Url::parse(&base_url)
            .map_err(|e| CredentialError::Rejected {
                slot: credential.slot(),
                account: account.to_string(),
                reason: format!("invalid blob endpoint '{}': {}", base_url, e),
            })?
            .path()
            .trim_end_matches('/')
            .to_string();

        debug!(
            "Azure client bound: account={} endpoint={} credential={}",
            account,
            base_url,
            credential.slot()
        );

        Ok(Arc::new(AzureAccountClient {
            client: self.client.clone(),
            account: account.to_string(),
            base_url,
            base_path,
            key_bytes,
        }))
    }
}

/// Target of a REST call.
enum Resource<'a> {
    Service,
    Container(&'a str),
    Blob(&'a str, &'a str),
}

impl Resource<'_> {
    /// Path as sent on the wire (blob names percent-encoded). Shared Key
    /// signs this same encoded path.
    fn url_path(&self) -> String {
        match self {
            Resource::Service => "/".to_string(),
            Resource::Container(container) => format!("/{}", container),
            Resource::Blob(container, name) => format!("/{}/{}", container, encode_path(name)),
        }
    }
}

/// Shared Key authenticated client for one storage account.
pub struct AzureAccountClient {
    /// HTTP client for Azure Blob REST API calls.
    client: reqwest::Client,
    /// Azure storage account name.
    account: String,
    /// Blob service endpoint, without a trailing slash.
    base_url: String,
    /// Path component of `base_url` (non-empty for emulator endpoints).
    base_path: String,
    /// Decoded account key.
    key_bytes: Vec<u8>,
}

impl AzureAccountClient {
    /// Get the current UTC date in RFC 1123 format for Azure headers.
    fn rfc1123_date() -> String {
        httpdate::fmt_http_date(SystemTime::now())
    }

    /// Check if a status code indicates "not found" (404).
    fn is_not_found(status: StatusCode) -> bool {
        status == StatusCode::NOT_FOUND
    }

    /// Map an Azure HTTP error to an anyhow error with context.
    fn map_azure_error(context: &str, status: StatusCode, body: &str) -> anyhow::Error {
        anyhow::anyhow!("Azure {}: HTTP {} - {}", context, status, body)
    }

    /// Base64 MD5 digest for the `Content-MD5` header.
    fn content_md5(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        BASE64_STANDARD.encode(hasher.finalize())
    }

    /// `/{account}{base path}{path}` where `path` is the encoded request path.
    fn canonicalized_resource(&self, path: &str) -> String {
        format!("/{}{}{}", self.account, self.base_path, path)
    }

    /// Build a signed request for `resource`.
    fn signed_request(
        &self,
        method: Method,
        resource: Resource<'_>,
        query: &[(&str, String)],
        body: Option<Bytes>,
        extra_headers: &[(&str, String)],
    ) -> RequestBuilder {
        let date = Self::rfc1123_date();
        let request_id = uuid::Uuid::new_v4().to_string();

        let path = resource.url_path();
        let mut url = format!("{}{}", self.base_url, path);
        if !query.is_empty() {
            let query_string = query
                .iter()
                .map(|(k, v)| format!("{}={}", k, encode_query_value(v)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query_string);
        }

        let mut ms_headers: Vec<(String, String)> = vec![
            ("x-ms-client-request-id".to_string(), request_id.clone()),
            ("x-ms-date".to_string(), date.clone()),
            ("x-ms-version".to_string(), AZURE_API_VERSION.to_string()),
        ];
        for (k, v) in extra_headers {
            ms_headers.push((k.to_lowercase(), v.clone()));
        }

        let (content_length, content_md5, content_type) = match &body {
            Some(data) => (
                data.len(),
                Self::content_md5(data),
                "application/octet-stream",
            ),
            None => (0, String::new(), ""),
        };

        let canonicalized_resource = self.canonicalized_resource(&path);
        let string_to_sign = shared_key_string_to_sign(
            method.as_str(),
            content_length,
            &content_md5,
            content_type,
            &ms_headers,
            &canonicalized_resource,
            query,
        );
        let signature = sign_base64(&self.key_bytes, &string_to_sign);

        debug!("Azure {} {} request_id={}", method, path, request_id);

        let mut req = self.client.request(method, url);
        for (k, v) in &ms_headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(data) = body {
            req = req
                .header("Content-Type", content_type)
                .header("Content-MD5", content_md5)
                .body(data);
        }
        req.header(
            "Authorization",
            format!("SharedKey {}:{}", self.account, signature),
        )
    }

    async fn azure_upload(&self, container: &str, name: &str, data: Bytes) -> anyhow::Result<()> {
        let extra_headers = [("x-ms-blob-type", "BlockBlob".to_string())];
        let resp = self
            .signed_request(
                Method::PUT,
                Resource::Blob(container, name),
                &[],
                Some(data),
                &extra_headers,
            )
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Azure upload request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_azure_error("upload", status, &body));
        }

        Ok(())
    }

    async fn azure_download(&self, container: &str, name: &str) -> anyhow::Result<reqwest::Response> {
        let resp = self
            .signed_request(Method::GET, Resource::Blob(container, name), &[], None, &[])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Azure download request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            if Self::is_not_found(status) {
                return Err(anyhow::anyhow!("Blob not found: {}/{}", container, name));
            }
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_azure_error("download", status, &body));
        }

        Ok(resp)
    }

    async fn azure_delete(&self, container: &str, name: &str) -> anyhow::Result<bool> {
        let resp = self
            .signed_request(Method::DELETE, Resource::Blob(container, name), &[], None, &[])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Azure delete request failed: {}", e))?;

        let status = resp.status();
        if status.is_success() {
            Ok(true)
        } else if Self::is_not_found(status) {
            Ok(false)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(Self::map_azure_error("delete", status, &body))
        }
    }

    async fn azure_exists(&self, container: &str, name: &str) -> anyhow::Result<bool> {
        let resp = self
            .signed_request(Method::HEAD, Resource::Blob(container, name), &[], None, &[])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Azure exists check failed: {}", e))?;

        if resp.status().is_success() {
            Ok(true)
        } else if Self::is_not_found(resp.status()) {
            Ok(false)
        } else {
            let status = resp.status();
            Err(Self::map_azure_error("exists", status, ""))
        }
    }

    async fn azure_list(
        &self,
        context: &str,
        resource: Resource<'_>,
        query: Vec<(&str, String)>,
    ) -> anyhow::Result<String> {
        let resp = self
            .signed_request(Method::GET, resource, &query, None, &[])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Azure {} request failed: {}", context, e))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::map_azure_error(context, status, &body));
        }
        Ok(body)
    }
}

impl AccountClient for AzureAccountClient {
    fn account(&self) -> &str {
        &self.account
    }

    fn blob_url(&self, container: &str, name: &str) -> String {
        format!("{}/{}/{}", self.base_url, container, encode_path(name))
    }

    fn put_blob(&self, container: &str, name: &str, data: Bytes) -> BackendFuture<'_, ()> {
        let container = container.to_string();
        let name = name.to_string();
        Box::pin(async move {
            debug!("Azure put: container={} blob={} bytes={}", container, name, data.len());
            self.azure_upload(&container, &name, data).await
        })
    }

    fn get_blob(&self, container: &str, name: &str) -> BackendFuture<'_, Bytes> {
        let container = container.to_string();
        let name = name.to_string();
        Box::pin(async move {
            debug!("Azure get: container={} blob={}", container, name);
            let resp = self.azure_download(&container, &name).await?;
            resp.bytes()
                .await
                .map_err(|e| anyhow::anyhow!("Azure download body read failed: {}", e))
        })
    }

    fn open_blob(&self, container: &str, name: &str) -> BackendFuture<'_, ByteStream> {
        let container = container.to_string();
        let name = name.to_string();
        Box::pin(async move {
            debug!("Azure open: container={} blob={}", container, name);
            let resp = self.azure_download(&container, &name).await?;
            let stream = resp
                .bytes_stream()
                .map_err(|e| anyhow::anyhow!("Azure download stream failed: {}", e));
            Ok(stream.boxed())
        })
    }

    fn delete_blob_if_exists(&self, container: &str, name: &str) -> BackendFuture<'_, bool> {
        let container = container.to_string();
        let name = name.to_string();
        Box::pin(async move {
            debug!("Azure delete: container={} blob={}", container, name);
            self.azure_delete(&container, &name).await
        })
    }

    fn blob_exists(&self, container: &str, name: &str) -> BackendFuture<'_, bool> {
        let container = container.to_string();
        let name = name.to_string();
        Box::pin(async move {
            debug!("Azure exists: container={} blob={}", container, name);
            self.azure_exists(&container, &name).await
        })
    }

    fn list_containers_page(&self, marker: Option<&str>) -> BackendFuture<'_, ListPage> {
        let marker = marker.map(str::to_string);
        Box::pin(async move {
            let mut query = vec![("comp", "list".to_string())];
            if let Some(m) = marker {
                query.push(("marker", m));
            }
            let body = self
                .azure_list("list_containers", Resource::Service, query)
                .await?;
            parse_container_list(&body)
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
        let marker = marker.map(str::to_string);
        Box::pin(async move {
            let mut query = vec![
                ("restype", "container".to_string()),
                ("comp", "list".to_string()),
            ];
            if !prefix.is_empty() {
                query.push(("prefix", prefix));
            }
            if let Some(m) = marker {
                query.push(("marker", m));
            }
            let body = self
                .azure_list("list_blobs", Resource::Container(&container), query)
                .await?;
            parse_blob_list(&body)
        })
    }
}

/// Build the Shared Key string-to-sign.
///
/// ```text
/// VERB\n
/// Content-Encoding\n
/// Content-Language\n
/// Content-Length\n
/// Content-MD5\n
/// Content-Type\n
/// Date\n
/// If-Modified-Since\n
/// If-Match\n
/// If-None-Match\n
/// If-Unmodified-Since\n
/// Range\n
/// CanonicalizedHeaders\n
/// CanonicalizedResource
/// ```
///
/// `Date` stays empty because `x-ms-date` is always sent. A zero content
/// length is written as an empty string.
fn shared_key_string_to_sign(
    method: &str,
    content_length: usize,
    content_md5: &str,
    content_type: &str,
    ms_headers: &[(String, String)],
    canonicalized_resource: &str,
    query: &[(&str, String)],
) -> String {
    let content_length_str = match content_length {
        0 => String::new(),
        len => len.to_string(),
    };

    let mut headers = ms_headers.to_vec();
    headers.sort_by(|a, b| a.0.cmp(&b.0));
    let canonicalized_headers = headers
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let mut resource = canonicalized_resource.to_string();
    let mut sorted_params: Vec<(String, &str)> = query
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.as_str()))
        .collect();
    sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
    for (k, v) in &sorted_params {
        resource.push_str(&format!("\n{}:{}", k, v));
    }

    format!(
        "{}\n\n\n{}\n{}\n{}\n\n\n\n\n\n\n{}\n{}",
        method,
        content_length_str,
        content_md5,
        content_type,
        canonicalized_headers,
        resource
    )
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CredentialSlot;

    fn transport() -> AzureTransport {
        AzureTransport::new(Duration::from_secs(5)).unwrap()
    }

    fn credential(conn_str: &str) -> AccountCredential {
        AccountCredential::parse(CredentialSlot::Primary, Some(conn_str))
    }

    #[test]
    fn test_is_not_found() {
        assert!(AzureAccountClient::is_not_found(StatusCode::NOT_FOUND));
        assert!(!AzureAccountClient::is_not_found(StatusCode::OK));
        assert!(!AzureAccountClient::is_not_found(StatusCode::FORBIDDEN));
        assert!(!AzureAccountClient::is_not_found(
            StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[test]
    fn test_azure_api_version() {
        assert_eq!(AZURE_API_VERSION, "2023-11-03");
    }

    #[test]
    fn test_rfc1123_date_format() {
        let date = AzureAccountClient::rfc1123_date();
        // RFC 1123 dates look like: "Mon, 24 Feb 2026 12:34:56 GMT"
        assert!(date.ends_with("GMT"));
        assert!(date.contains(','));
    }

    #[test]
    fn test_content_md5_empty() {
        // MD5 of the empty string, base64 encoded.
        assert_eq!(AzureAccountClient::content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn test_string_to_sign_for_upload() {
        let headers = vec![
            ("x-ms-version".to_string(), AZURE_API_VERSION.to_string()),
            ("x-ms-blob-type".to_string(), "BlockBlob".to_string()),
            ("x-ms-date".to_string(), "Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
        ];
        let sts = shared_key_string_to_sign(
            "PUT",
            11,
            "md5==",
            "application/octet-stream",
            &headers,
            "/acct/c/a/b.txt",
            &[],
        );
        let lines: Vec<&str> = sts.split('\n').collect();
        assert_eq!(lines[0], "PUT");
        assert_eq!(lines[3], "11");
        assert_eq!(lines[4], "md5==");
        assert_eq!(lines[5], "application/octet-stream");
        assert_eq!(lines[12], "x-ms-blob-type:BlockBlob");
        assert_eq!(lines[13], "x-ms-date:Mon, 01 Jan 2024 00:00:00 GMT");
        assert_eq!(lines[14], "x-ms-version:2023-11-03");
        assert_eq!(lines[15], "/acct/c/a/b.txt");
        assert_eq!(lines.len(), 16);
    }

    #[test]
    fn test_string_to_sign_sorts_query_parameters() {
        let query = [
            ("restype", "container".to_string()),
            ("comp", "list".to_string()),
            ("prefix", "2024/".to_string()),
        ];
        let sts = shared_key_string_to_sign("GET", 0, "", "", &[], "/acct/c", &query);
        assert!(sts.ends_with("/acct/c\ncomp:list\nprefix:2024/\nrestype:container"));
        // Zero content length is signed as an empty line.
        assert_eq!(sts.split('\n').nth(3), Some(""));
    }

    #[test]
    fn test_connect_rejects_bad_key() {
        let cred = credential("DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=%%%");
        let err = transport().connect("acct", &cred).err().expect("connect should fail");
        assert!(matches!(err, CredentialError::InvalidKey { .. }));
    }

    #[test]
    fn test_connect_builds_urls() {
        let cred = credential("DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=a2V5");
        let client = transport().connect("acct", &cred).unwrap();
        assert_eq!(client.account(), "acct");
        assert_eq!(
            client.blob_url("docs", "2024/key with spaces.txt"),
            "https://acct.blob.core.windows.net/docs/2024/key%20with%20spaces.txt"
        );
    }

    #[test]
    fn test_emulator_endpoint_keeps_account_path() {
        let cred = credential(
            "DefaultEndpointsProtocol=http;AccountName=devstoreaccount1;AccountKey=a2V5;BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1",
        );
        let client = transport().connect("devstoreaccount1", &cred).unwrap();
        assert_eq!(
            client.blob_url("c", "a/b"),
            "http://127.0.0.1:10000/devstoreaccount1/c/a/b"
        );
    }

    #[test]
    fn test_resource_paths() {
        let blob = Resource::Blob("c", "dir/a b.txt");
        assert_eq!(blob.url_path(), "/c/dir/a%20b.txt");
        assert_eq!(Resource::Service.url_path(), "/");
        assert_eq!(Resource::Container("c").url_path(), "/c");
    }

    fn account_client(base_url: &str, base_path: &str) -> AzureAccountClient {
        AzureAccountClient {
            client: reqwest::Client::new(),
            account: "acct".to_string(),
            base_url: base_url.to_string(),
            base_path: base_path.to_string(),
            key_bytes: b"key".to_vec(),
        }
    }

    #[test]
    fn test_signed_resource_matches_wire_path() {
        let client = account_client("https://acct.blob.core.windows.net", "");
        let request = client
            .signed_request(
                Method::GET,
                Resource::Blob("c", "dir/a b+c(1)ü.txt"),
                &[],
                None,
                &[],
            )
            .build()
            .unwrap();

        let wire_path = request.url().path().to_string();
        assert_eq!(wire_path, "/c/dir/a%20b%2Bc%281%29%C3%BC.txt");
        assert_eq!(
            client.canonicalized_resource(&wire_path),
            "/acct/c/dir/a%20b%2Bc%281%29%C3%BC.txt"
        );
        assert_eq!(
            client.canonicalized_resource(&Resource::Blob("c", "dir/a b+c(1)ü.txt").url_path()),
            format!("/acct{}", wire_path)
        );
    }

    #[test]
    fn test_signed_resource_keeps_emulator_account_path() {
        let client = account_client("http://127.0.0.1:10000/devstoreaccount1", "/devstoreaccount1");
        let path = Resource::Blob("c", "a b/x").url_path();
        assert_eq!(
            client.canonicalized_resource(&path),
            "/acct/devstoreaccount1/c/a%20b/x"
        );
    }
}
