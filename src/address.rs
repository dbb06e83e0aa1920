//! Blob address parsing and URL construction.
//!
//! A blob URL has the shape
//! `scheme://{account}.{host suffix}/{container}/{seg1}/{seg2}[?query]`
//! and the blob name is always `seg1/seg2`. Deeper names are not
//! representable: segments after the sixth are ignored.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;

use crate::errors::{Result, StorageError};

/// Host suffix of the public Azure Blob endpoint.
pub const BLOB_HOST_SUFFIX: &str = "blob.core.windows.net";

/// Percent-encoding set for blob paths: encode everything except
/// unreserved characters and '/'.
pub(crate) const BLOB_PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Query values are encoded like `Uri.EscapeDataString`: everything but
/// unreserved characters.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Account, container and name of one blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobAddress {
    pub account: String,
    pub container: String,
    pub name: String,
}

impl BlobAddress {
    /// Build an address from its parts without validation.
    pub fn new(
        account: impl Into<String>,
        container: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            name: name.into(),
        }
    }

    /// Parse a blob URL into its address.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason| StorageError::AddressParse {
            url: url.to_string(),
            reason,
        };

        let path = url.split(['?', '#']).next().unwrap_or_default();
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 6 {
            return Err(invalid("Blob container or Blob name not found"));
        }
        if parts.len() > 6 {
            debug!(
                "Ignoring {} trailing path segment(s) in blob URL {}",
                parts.len() - 6,
                url
            );
        }

        let account = parts[2].split('.').next().unwrap_or_default();
        let account = decode_segment(account);
        let container = decode_segment(parts[3]);
        let first = decode_segment(parts[4]);
        let second = decode_segment(parts[5]);

        if is_blank(&account) {
            return Err(invalid("Blob account not found"));
        }
        if is_blank(&container) {
            return Err(invalid("Blob container not found"));
        }
        if is_blank(&first) || is_blank(&second) {
            return Err(invalid("Blob name not found"));
        }

        Ok(Self {
            account,
            container,
            name: format!("{}/{}", first, second),
        })
    }

    /// Canonical `https` URL of this blob, without any query.
    pub fn url(&self) -> String {
        format!(
            "https://{}.{}/{}/{}",
            self.account,
            BLOB_HOST_SUFFIX,
            self.container,
            encode_path(&self.name)
        )
    }
}

impl fmt::Display for BlobAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account, self.container, self.name)
    }
}

/// Build a shared-access URL: the canonical blob URL with `sas_query`
/// appended as its query string.
pub fn compose_sas_url(account: &str, container: &str, name: &str, sas_query: &str) -> String {
    format!(
        "https://{}.{}/{}/{}?{}",
        account,
        BLOB_HOST_SUFFIX,
        container,
        encode_path(name),
        sas_query.trim_start_matches('?')
    )
}

/// Percent-encode a blob path, keeping '/' separators.
pub(crate) fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, BLOB_PATH_ENCODE_SET).to_string()
}

/// Percent-encode a single query parameter value.
pub(crate) fn encode_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ENCODE_SET).to_string()
}

fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}
