//! Azure listing response decoding.
//!
//! `List Containers` and `List Blobs` both answer with an
//! `<EnumerationResults>` document; only the entry names and the
//! `<NextMarker>` matter here. Decoding uses `quick-xml`'s serde support.
//!
//! ```xml
//! <?xml version="1.0" encoding="utf-8"?>
//! <EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="docs">
//!   <Prefix>2024/</Prefix>
//!   <Blobs>
//!     <Blob><Name>2024/report.pdf</Name><Properties>...</Properties></Blob>
//!   </Blobs>
//!   <NextMarker />
//! </EnumerationResults>
//! ```

use serde::Deserialize;

use crate::transport::ListPage;

#[derive(Debug, Deserialize)]
struct EnumerationResults {
    #[serde(rename = "Containers", default)]
    containers: Option<ContainerList>,
    #[serde(rename = "Blobs", default)]
    blobs: Option<BlobList>,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerList {
    #[serde(rename = "Container", default)]
    items: Vec<NamedEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<NamedEntry>,
}

#[derive(Debug, Deserialize)]
struct NamedEntry {
    #[serde(rename = "Name")]
    name: String,
}

fn parse_enumeration(body: &str) -> anyhow::Result<EnumerationResults> {
    // Azure prefixes its XML bodies with a UTF-8 byte order mark.
    let body = body.trim_start_matches('\u{feff}');
    quick_xml::de::from_str(body)
        .map_err(|e| anyhow::anyhow!("Malformed listing response: {}", e))
}

/// Decode a `List Containers` response into a page of container names.
pub fn parse_container_list(body: &str) -> anyhow::Result<ListPage> {
    let results = parse_enumeration(body)?;
    let names = results
        .containers
        .unwrap_or_default()
        .items
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    Ok(ListPage::new(names, results.next_marker))
}

/// Decode a `List Blobs` response into a page of blob names.
pub fn parse_blob_list(body: &str) -> anyhow::Result<ListPage> {
    let results = parse_enumeration(body)?;
    let names = results
        .blobs
        .unwrap_or_default()
        .items
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    Ok(ListPage::new(names, results.next_marker))
}
