//! Dual-credential resolution.
//!
//! The service is built from two connection strings. Every operation that
//! needs key material (client construction and SAS signing) first tries
//! the primary credential and, on any error, retries exactly once with the
//! secondary. If the secondary attempt fails too, its error is returned
//! as-is and the primary error is dropped.
//!
//! Connection strings have the usual `key=value;key=value;...` shape:
//!
//! ```text
//! DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=base64==;EndpointSuffix=core.windows.net
//! ```
//!
//! The account key is taken positionally from the third field (everything
//! after its first `=`), so keys containing `=` padding survive intact.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use tracing::{debug, warn};

use crate::errors::{CredentialError, CredentialSlot};
use crate::metrics;
use crate::sas::SharedAccessPolicy;
use crate::transport::{AccountClient, BlobTransport};

/// Base64 account key material. `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountKey(String);

impl AccountKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as written in the connection string.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Decode the key into raw HMAC key bytes.
    pub fn decode(&self, slot: CredentialSlot) -> Result<Vec<u8>, CredentialError> {
        let bytes = BASE64_STANDARD
            .decode(self.0.trim())
            .map_err(|e| CredentialError::InvalidKey {
                slot,
                reason: format!("not valid base64: {}", e),
            })?;
        if bytes.is_empty() {
            return Err(CredentialError::InvalidKey {
                slot,
                reason: "key is empty".to_string(),
            });
        }
        Ok(bytes)
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountKey(<redacted>)")
    }
}

/// One parsed connection string.
#[derive(Debug, Clone)]
pub struct AccountCredential {
    slot: CredentialSlot,
    account_name: Option<String>,
    account_key: Option<AccountKey>,
    blob_endpoint: Option<String>,
    protocol: Option<String>,
    endpoint_suffix: Option<String>,
}

impl AccountCredential {
    /// Parse `connection_string` for `slot`. Absent or blank input gives a
    /// credential with no key.
    pub fn parse(slot: CredentialSlot, connection_string: Option<&str>) -> Self {
        let mut credential = Self {
            slot,
            account_name: None,
            account_key: None,
            blob_endpoint: None,
            protocol: None,
            endpoint_suffix: None,
        };

        let Some(conn_str) = connection_string.filter(|s| !s.trim().is_empty()) else {
            debug!("No {} connection string configured", slot);
            return credential;
        };

        let fields: Vec<&str> = conn_str.split(';').collect();
        match fields.get(2).copied() {
            Some(field) => {
                let key = field.split_once('=').map(|(_, v)| v).unwrap_or(field);
                if !key.is_empty() {
                    credential.account_key = Some(AccountKey::new(key));
                }
            }
            None => warn!(
                "{} connection string has {} field(s); no account key in the third field",
                slot,
                fields.len()
            ),
        }

        for field in &fields {
            let Some((name, value)) = field.split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match name.trim() {
                "AccountName" => credential.account_name = Some(value.to_string()),
                "BlobEndpoint" => {
                    credential.blob_endpoint = Some(value.trim_end_matches('/').to_string())
                }
                "DefaultEndpointsProtocol" => credential.protocol = Some(value.to_string()),
                "EndpointSuffix" => credential.endpoint_suffix = Some(value.to_string()),
                _ => {}
            }
        }

        credential
    }

    /// Build a credential directly from an account name and key.
    pub fn from_key(slot: CredentialSlot, account: &str, key: &str) -> Self {
        Self {
            slot,
            account_name: Some(account.to_string()),
            account_key: Some(AccountKey::new(key)),
            blob_endpoint: None,
            protocol: None,
            endpoint_suffix: None,
        }
    }

    pub fn slot(&self) -> CredentialSlot {
        self.slot
    }

    pub fn account_name(&self) -> Option<&str> {
        self.account_name.as_deref()
    }

    pub fn account_key(&self) -> Option<&AccountKey> {
        self.account_key.as_ref()
    }

    /// The key, or `MissingKey` for this slot.
    pub fn require_key(&self) -> Result<&AccountKey, CredentialError> {
        self.account_key
            .as_ref()
            .ok_or(CredentialError::MissingKey { slot: self.slot })
    }

    /// Decoded key bytes, ready for HMAC.
    pub fn key_bytes(&self) -> Result<Vec<u8>, CredentialError> {
        self.require_key()?.decode(self.slot)
    }

    /// The blob service endpoint for `account`, without a trailing slash.
    ///
    /// An explicit `BlobEndpoint` (e.g. a local emulator) wins; otherwise
    /// `{protocol}://{account}.blob.{suffix}`.
    pub fn blob_endpoint(&self, account: &str) -> String {
        if let Some(endpoint) = &self.blob_endpoint {
            return endpoint.clone();
        }
        format!(
            "{}://{}.blob.{}",
            self.protocol.as_deref().unwrap_or("https"),
            account,
            self.endpoint_suffix.as_deref().unwrap_or("core.windows.net")
        )
    }
}

/// The primary and secondary credentials, fixed for the service lifetime.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    pub primary: AccountCredential,
    pub secondary: AccountCredential,
}

impl CredentialPair {
    pub fn from_connection_strings(primary: Option<&str>, secondary: Option<&str>) -> Self {
        Self {
            primary: AccountCredential::parse(CredentialSlot::Primary, primary),
            secondary: AccountCredential::parse(CredentialSlot::Secondary, secondary),
        }
    }
}

/// Runs credentialed operations with primary-then-secondary fallback.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    pair: Arc<CredentialPair>,
}

impl CredentialResolver {
    pub fn new(pair: CredentialPair) -> Self {
        Self {
            pair: Arc::new(pair),
        }
    }

    pub fn from_connection_strings(primary: Option<&str>, secondary: Option<&str>) -> Self {
        Self::new(CredentialPair::from_connection_strings(primary, secondary))
    }

    pub fn credentials(&self) -> &CredentialPair {
        &self.pair
    }

    /// Run `f` with the primary credential, then once with the secondary if
    /// the primary attempt failed.
    pub fn attempt<T, F>(&self, operation: &'static str, f: F) -> Result<T, CredentialError>
    where
        F: Fn(&AccountCredential) -> Result<T, CredentialError>,
    {
        match f(&self.pair.primary) {
            Ok(value) => Ok(value),
            Err(primary_err) => {
                warn!(
                    "{} with primary credential failed, retrying with secondary: {}",
                    operation, primary_err
                );
                metrics::record_credential_fallback(operation);
                f(&self.pair.secondary)
            }
        }
    }

    /// Build an account client. `account` defaults to the credential's own
    /// `AccountName` when not given.
    pub fn resolve_client(
        &self,
        transport: &dyn BlobTransport,
        account: Option<&str>,
    ) -> Result<Arc<dyn AccountClient>, CredentialError> {
        self.attempt("connect", |credential| {
            // A credential without key material fails as such, whatever the account.
            credential.require_key()?;
            let account = match account {
                Some(account) => account,
                None => credential
                    .account_name()
                    .ok_or(CredentialError::MissingAccount {
                        slot: credential.slot(),
                    })?,
            };
            transport.connect(account, credential)
        })
    }

    /// Sign `policy` for `account`, returning the SAS query string.
    pub fn sign(
        &self,
        policy: &SharedAccessPolicy,
        account: &str,
    ) -> Result<String, CredentialError> {
        self.attempt("sign", |credential| policy.sign(account, credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PRIMARY: &str = "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=cHJpbWFyeS1rZXk=;EndpointSuffix=core.windows.net";
    const SECONDARY: &str = "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=c2Vjb25kYXJ5LWtleQ==;EndpointSuffix=core.windows.net";

    #[test]
    fn test_parse_extracts_third_field_key() {
        let cred = AccountCredential::parse(CredentialSlot::Primary, Some(PRIMARY));
        assert_eq!(cred.account_key().unwrap().expose(), "cHJpbWFyeS1rZXk=");
        assert_eq!(cred.account_name(), Some("acct"));
        assert_eq!(cred.key_bytes().unwrap(), b"primary-key");
    }

    #[test]
    fn test_parse_key_keeps_padding() {
        let cred = AccountCredential::parse(CredentialSlot::Secondary, Some(SECONDARY));
        assert_eq!(cred.account_key().unwrap().expose(), "c2Vjb25kYXJ5LWtleQ==");
    }

    #[test]
    fn test_parse_key_is_positional() {
        // The third field is used whatever its name is.
        let cred = AccountCredential::parse(
            CredentialSlot::Primary,
            Some("AccountName=acct;DefaultEndpointsProtocol=https;SharedKey=a2V5"),
        );
        assert_eq!(cred.account_key().unwrap().expose(), "a2V5");
    }

    #[test]
    fn test_parse_absent_connection_string() {
        for input in [None, Some(""), Some("   ")] {
            let cred = AccountCredential::parse(CredentialSlot::Secondary, input);
            assert!(cred.account_key().is_none());
            assert!(matches!(
                cred.require_key(),
                Err(CredentialError::MissingKey {
                    slot: CredentialSlot::Secondary
                })
            ));
        }
    }

    #[test]
    fn test_parse_short_connection_string_has_no_key() {
        let cred = AccountCredential::parse(CredentialSlot::Primary, Some("AccountName=acct"));
        assert!(cred.account_key().is_none());
        assert_eq!(cred.account_name(), Some("acct"));
    }

    #[test]
    fn test_invalid_base64_key() {
        let cred = AccountCredential::from_key(CredentialSlot::Primary, "acct", "not base64!!");
        assert!(matches!(
            cred.key_bytes(),
            Err(CredentialError::InvalidKey {
                slot: CredentialSlot::Primary,
                ..
            })
        ));
    }

    #[test]
    fn test_blob_endpoint_defaults_and_override() {
        let cred = AccountCredential::parse(CredentialSlot::Primary, Some(PRIMARY));
        assert_eq!(
            cred.blob_endpoint("acct"),
            "https://acct.blob.core.windows.net"
        );

        let emulator = AccountCredential::parse(
            CredentialSlot::Primary,
            Some("DefaultEndpointsProtocol=http;AccountName=devstoreaccount1;AccountKey=a2V5;BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1/"),
        );
        assert_eq!(
            emulator.blob_endpoint("devstoreaccount1"),
            "http://127.0.0.1:10000/devstoreaccount1"
        );
    }

    #[test]
    fn test_account_key_debug_is_redacted() {
        let key = AccountKey::new("super-secret");
        assert!(!format!("{:?}", key).contains("super-secret"));
    }

    #[test]
    fn test_attempt_uses_primary_when_it_succeeds() {
        let resolver = CredentialResolver::from_connection_strings(Some(PRIMARY), Some(SECONDARY));
        let calls = AtomicUsize::new(0);
        let slot = resolver
            .attempt("test", |cred| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(cred.slot())
            })
            .unwrap();
        assert_eq!(slot, CredentialSlot::Primary);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_attempt_falls_back_to_secondary() {
        let resolver = CredentialResolver::from_connection_strings(None, Some(SECONDARY));
        let key = resolver
            .attempt("test", |cred| Ok(cred.require_key()?.expose().to_string()))
            .unwrap();
        assert_eq!(key, "c2Vjb25kYXJ5LWtleQ==");
    }

    #[test]
    fn test_resolve_client_reports_missing_key_before_account() {
        let transport = crate::transport::memory::MemoryTransport::builder().build();
        let resolver =
            CredentialResolver::from_connection_strings(Some("garbage"), Some("also;garbage"));
        let err = resolver.resolve_client(&transport, None).err().expect("should fail");
        assert!(matches!(
            err,
            CredentialError::MissingKey {
                slot: CredentialSlot::Secondary
            }
        ));
    }

    #[test]
    fn test_resolve_client_reports_missing_account() {
        let transport = crate::transport::memory::MemoryTransport::builder().build();
        let keyed_without_name = "DefaultEndpointsProtocol=https;EndpointSuffix=core.windows.net;AccountKey=c2Vjb25kYXJ5LWtleQ==";
        let resolver = CredentialResolver::from_connection_strings(None, Some(keyed_without_name));
        let err = resolver.resolve_client(&transport, None).err().expect("should fail");
        assert!(matches!(
            err,
            CredentialError::MissingAccount {
                slot: CredentialSlot::Secondary
            }
        ));
    }

    #[test]
    fn test_attempt_returns_secondary_error() {
        let resolver = CredentialResolver::from_connection_strings(Some(PRIMARY), Some(SECONDARY));
        let calls = AtomicUsize::new(0);
        let err = resolver
            .attempt::<(), _>("test", |cred| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CredentialError::Rejected {
                    slot: cred.slot(),
                    account: "acct".to_string(),
                    reason: format!("{} refused", cred.slot()),
                })
            })
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.slot(), CredentialSlot::Secondary);
        assert!(err.to_string().contains("secondary refused"));
        assert!(!err.to_string().contains("primary refused"));
    }
}
