//! Shared Access Signature (SAS) generation.
//!
//! Produces read-only, single-blob Service SAS URLs. The signature is an
//! HMAC-SHA256 over the service SAS string-to-sign (layout for signed
//! versions 2020-12-06 and later), keyed with the decoded account key:
//!
//! ```text
//! signedPermissions \n signedStart \n signedExpiry \n canonicalizedResource \n
//! signedIdentifier \n signedIP \n signedProtocol \n signedVersion \n
//! signedResource \n signedSnapshotTime \n signedEncryptionScope \n
//! rscc \n rscd \n rsce \n rscl \n rsct
//! ```

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::address::{compose_sas_url, encode_query_value, BlobAddress};
use crate::credentials::{AccountCredential, CredentialResolver};
use crate::errors::{CredentialError, Result, StorageError};

type HmacSha256 = Hmac<Sha256>;

/// Signed version (`sv`) for generated tokens.
pub const SAS_VERSION: &str = "2023-11-03";

/// Signed resource (`sr`): a single blob.
const RESOURCE_BLOB: &str = "b";

/// Signed permissions (`sp`): read only.
const PERMISSION_READ: &str = "r";

/// Timestamp layout for `st` / `se`.
const SAS_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// ── Policy ──────────────────────────────────────────────────────────

/// Read-only access to one blob over a time window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedAccessPolicy {
    pub container: String,
    pub blob: String,
    pub starts_on: DateTime<Utc>,
    pub expires_on: DateTime<Utc>,
}

impl SharedAccessPolicy {
    /// Policy starting now and lasting `lifetime_minutes`.
    pub fn read_only(container: &str, blob: &str, lifetime_minutes: i64) -> Result<Self> {
        Self::read_only_from(container, blob, Utc::now(), lifetime_minutes)
    }

    /// Policy starting at `start`. Zero or negative lifetimes are allowed
    /// and give a token that is already expired.
    pub fn read_only_from(
        container: &str,
        blob: &str,
        start: DateTime<Utc>,
        lifetime_minutes: i64,
    ) -> Result<Self> {
        let expires_on = TimeDelta::try_minutes(lifetime_minutes)
            .and_then(|lifetime| start.checked_add_signed(lifetime))
            .ok_or(StorageError::InvalidLifetime {
                minutes: lifetime_minutes,
            })?;
        Ok(Self {
            container: container.to_string(),
            blob: blob.to_string(),
            starts_on: start,
            expires_on,
        })
    }

    pub fn permissions(&self) -> &'static str {
        PERMISSION_READ
    }

    pub fn resource(&self) -> &'static str {
        RESOURCE_BLOB
    }

    fn signed_start(&self) -> String {
        self.starts_on.format(SAS_TIME_FORMAT).to_string()
    }

    fn signed_expiry(&self) -> String {
        self.expires_on.format(SAS_TIME_FORMAT).to_string()
    }

    /// Build the string-to-sign for `account`.
    pub fn string_to_sign(&self, account: &str) -> String {
        let canonicalized_resource = format!("/blob/{}/{}/{}", account, self.container, self.blob);
        let signed_start = self.signed_start();
        let signed_expiry = self.signed_expiry();
        let fields: [&str; 16] = [
            PERMISSION_READ,
            &signed_start,
            &signed_expiry,
            &canonicalized_resource,
            "", // signedIdentifier
            "", // signedIP
            "", // signedProtocol
            SAS_VERSION,
            RESOURCE_BLOB,
            "", // signedSnapshotTime
            "", // signedEncryptionScope
            "", // rscc
            "", // rscd
            "", // rsce
            "", // rscl
            "", // rsct
        ];
        fields.join("\n")
    }

    /// Sign with `credential` and return the SAS query string (no `?`).
    pub fn sign(
        &self,
        account: &str,
        credential: &AccountCredential,
    ) -> Result<String, CredentialError> {
        let key = credential.key_bytes()?;
        let signature = sign_base64(&key, &self.string_to_sign(account));

        Ok(format!(
            "sv={}&st={}&se={}&sr={}&sp={}&sig={}",
            encode_query_value(SAS_VERSION),
            encode_query_value(&self.signed_start()),
            encode_query_value(&self.signed_expiry()),
            RESOURCE_BLOB,
            PERMISSION_READ,
            encode_query_value(&signature)
        ))
    }
}

// ── Signing helpers ─────────────────────────────────────────────────

/// Compute HMAC-SHA256.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Base64 HMAC-SHA256 of `string_to_sign`, as used by both SAS tokens and
/// Shared Key request authorization.
pub(crate) fn sign_base64(key: &[u8], string_to_sign: &str) -> String {
    BASE64_STANDARD.encode(hmac_sha256(key, string_to_sign.as_bytes()))
}

// ── URL generation ──────────────────────────────────────────────────

/// Builds signed read URLs, signing through the credential fallback.
#[derive(Debug, Clone)]
pub struct SasUrlGenerator {
    resolver: CredentialResolver,
}

impl SasUrlGenerator {
    pub fn new(resolver: CredentialResolver) -> Self {
        Self { resolver }
    }

    /// Signed URL granting read access to `address` for `lifetime_minutes`.
    pub fn generate(&self, address: &BlobAddress, lifetime_minutes: i64) -> Result<String> {
        let policy = SharedAccessPolicy::read_only(
            &address.container,
            &address.name,
            lifetime_minutes,
        )?;
        self.generate_for(address, &policy)
    }

    /// Signed URL for an explicit policy.
    pub fn generate_for(&self, address: &BlobAddress, policy: &SharedAccessPolicy) -> Result<String> {
        let token = self.resolver.sign(policy, &address.account)?;
        debug!(
            "Generated SAS URL for {} expiring {}",
            address,
            policy.signed_expiry()
        );
        Ok(compose_sas_url(
            &address.account,
            &address.container,
            &address.name,
            &token,
        ))
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CredentialSlot;
    use chrono::TimeZone;
    use std::collections::HashMap;

    // base64("primary-key") and base64("secondary-key")
    const PRIMARY_KEY: &str = "cHJpbWFyeS1rZXk=";
    const SECONDARY_KEY: &str = "c2Vjb25kYXJ5LWtleQ==";

    fn fixed_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn connection_string(key: &str) -> String {
        format!(
            "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey={};EndpointSuffix=core.windows.net",
            key
        )
    }

    fn query_params(url: &str) -> HashMap<String, String> {
        let query = url.split_once('?').expect("query").1;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| {
                (
                    k.to_string(),
                    percent_encoding::percent_decode_str(v)
                        .decode_utf8_lossy()
                        .into_owned(),
                )
            })
            .collect()
    }

    #[test]
    fn test_string_to_sign_layout() {
        let policy = SharedAccessPolicy::read_only_from("c", "a/b.txt", fixed_start(), 1).unwrap();
        let sts = policy.string_to_sign("acct");
        let lines: Vec<&str> = sts.split('\n').collect();
        assert_eq!(lines.len(), 16);
        assert_eq!(lines[0], "r");
        assert_eq!(lines[1], "2024-05-01T12:00:00Z");
        assert_eq!(lines[2], "2024-05-01T12:01:00Z");
        assert_eq!(lines[3], "/blob/acct/c/a/b.txt");
        assert_eq!(lines[7], SAS_VERSION);
        assert_eq!(lines[8], "b");
    }

    #[test]
    fn test_expiry_is_exactly_lifetime_after_start() {
        let policy = SharedAccessPolicy::read_only("c", "a/b", 1).unwrap();
        assert_eq!(policy.expires_on - policy.starts_on, TimeDelta::minutes(1));
    }

    #[test]
    fn test_non_positive_lifetime_is_already_expired() {
        let zero = SharedAccessPolicy::read_only_from("c", "a/b", fixed_start(), 0).unwrap();
        assert_eq!(zero.expires_on, zero.starts_on);

        let negative = SharedAccessPolicy::read_only_from("c", "a/b", fixed_start(), -5).unwrap();
        assert!(negative.expires_on < negative.starts_on);
    }

    #[test]
    fn test_overflowing_lifetime_is_rejected() {
        let err = SharedAccessPolicy::read_only_from("c", "a/b", fixed_start(), i64::MAX).unwrap_err();
        assert!(matches!(err, StorageError::InvalidLifetime { .. }));
    }

    #[test]
    fn test_sign_query_parameters() {
        let policy = SharedAccessPolicy::read_only_from("c", "a/b", fixed_start(), 30).unwrap();
        let cred = AccountCredential::from_key(CredentialSlot::Primary, "acct", PRIMARY_KEY);
        let token = policy.sign("acct", &cred).unwrap();
        let params = query_params(&format!("?{}", token));

        assert_eq!(params["sv"], SAS_VERSION);
        assert_eq!(params["st"], "2024-05-01T12:00:00Z");
        assert_eq!(params["se"], "2024-05-01T12:30:00Z");
        assert_eq!(params["sr"], "b");
        assert_eq!(params["sp"], "r");
        assert_eq!(
            params["sig"],
            sign_base64(b"primary-key", &policy.string_to_sign("acct"))
        );
        // Colons in timestamps are escaped.
        assert!(token.contains("st=2024-05-01T12%3A00%3A00Z"));
    }

    #[test]
    fn test_generate_url_shape_and_lifetime() {
        let resolver = CredentialResolver::from_connection_strings(
            Some(&connection_string(PRIMARY_KEY)),
            Some(&connection_string(SECONDARY_KEY)),
        );
        let generator = SasUrlGenerator::new(resolver);
        let address = BlobAddress::new("acct", "docs", "2024/report.pdf");
        let url = generator.generate(&address, 1).unwrap();

        assert!(url.starts_with("https://acct.blob.core.windows.net/docs/2024/report.pdf?"));
        assert_eq!(BlobAddress::parse(&url).unwrap(), address);

        let params = query_params(&url);
        let start = DateTime::parse_from_rfc3339(&params["st"]).unwrap();
        let expiry = DateTime::parse_from_rfc3339(&params["se"]).unwrap();
        assert_eq!(expiry - start, TimeDelta::minutes(1));
    }

    #[test]
    fn test_sign_falls_back_to_secondary_key() {
        let resolver = CredentialResolver::from_connection_strings(
            Some(&connection_string("not base64!!")),
            Some(&connection_string(SECONDARY_KEY)),
        );
        let generator = SasUrlGenerator::new(resolver);
        let address = BlobAddress::new("acct", "c", "a/b");
        let policy = SharedAccessPolicy::read_only_from("c", "a/b", fixed_start(), 5).unwrap();

        let url = generator.generate_for(&address, &policy).unwrap();
        let params = query_params(&url);
        assert_eq!(
            params["sig"],
            sign_base64(b"secondary-key", &policy.string_to_sign("acct"))
        );
    }

    #[test]
    fn test_sign_fails_with_secondary_error_when_both_invalid() {
        let resolver = CredentialResolver::from_connection_strings(
            Some(&connection_string("not base64!!")),
            None,
        );
        let generator = SasUrlGenerator::new(resolver);
        let err = generator
            .generate(&BlobAddress::new("acct", "c", "a/b"), 5)
            .unwrap_err();
        match err {
            StorageError::Credential(CredentialError::MissingKey { slot }) => {
                assert_eq!(slot, CredentialSlot::Secondary)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
