//! Error types for blob storage operations.
//!
//! [`StorageError`] is what every public service operation returns.
//! [`CredentialError`] describes a single failed attempt with one of the
//! two configured credentials; it only reaches the caller when both the
//! primary and the secondary attempt failed.

use std::fmt;

use thiserror::Error;

/// Which of the two configured credentials an attempt used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialSlot {
    Primary,
    Secondary,
}

impl CredentialSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSlot::Primary => "primary",
            CredentialSlot::Secondary => "secondary",
        }
    }
}

impl fmt::Display for CredentialSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one credential attempt (client construction or signing).
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The connection string was absent or had no key in its third field.
    #[error("{slot} credential has no account key")]
    MissingKey { slot: CredentialSlot },

    /// The account key is not usable key material.
    #[error("{slot} credential has an invalid account key: {reason}")]
    InvalidKey { slot: CredentialSlot, reason: String },

    /// No account name was given and the connection string has none.
    #[error("{slot} credential has no account name")]
    MissingAccount { slot: CredentialSlot },

    /// The transport refused to build a client with this credential.
    #[error("{slot} credential rejected for account '{account}': {reason}")]
    Rejected {
        slot: CredentialSlot,
        account: String,
        reason: String,
    },
}

impl CredentialError {
    /// The credential slot the failed attempt used.
    pub fn slot(&self) -> CredentialSlot {
        match self {
            CredentialError::MissingKey { slot }
            | CredentialError::InvalidKey { slot, .. }
            | CredentialError::MissingAccount { slot }
            | CredentialError::Rejected { slot, .. } => *slot,
        }
    }
}

/// Errors surfaced by [`crate::service::BlobStorageService`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// The blob URL is malformed or names no container/blob.
    #[error("Error to parse blob file URL '{url}': {reason}")]
    AddressParse { url: String, reason: &'static str },

    /// Both credential attempts failed. Carries the secondary's error.
    #[error("credential resolution failed: {0}")]
    Credential(#[from] CredentialError),

    /// The storage backend returned an error.
    #[error("backend {operation} failed: {source:#}")]
    Backend {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// One unit of a fan-out batch failed; the whole batch is discarded.
    #[error("batch operation failed for '{key}': {source}")]
    Batch {
        key: String,
        #[source]
        source: Box<StorageError>,
    },

    /// The shared access lifetime does not fit in a timestamp.
    #[error("shared access lifetime of {minutes} minutes is out of range")]
    InvalidLifetime { minutes: i64 },

    /// Local filesystem failure while writing a download to disk.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Wrap a transport error for `operation`.
    pub fn backend(operation: &'static str, source: anyhow::Error) -> Self {
        StorageError::Backend { operation, source }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::AddressParse { .. } => "address_parse",
            StorageError::Credential(_) => "credential",
            StorageError::Backend { .. } => "backend",
            StorageError::Batch { .. } => "batch",
            StorageError::InvalidLifetime { .. } => "invalid_lifetime",
            StorageError::Io(_) => "io",
        }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_error_reports_slot() {
        let err = CredentialError::InvalidKey {
            slot: CredentialSlot::Secondary,
            reason: "bad base64".to_string(),
        };
        assert_eq!(err.slot(), CredentialSlot::Secondary);
        assert_eq!(
            err.to_string(),
            "secondary credential has an invalid account key: bad base64"
        );
    }

    #[test]
    fn test_credential_error_converts_to_storage_error() {
        let err: StorageError = CredentialError::MissingKey {
            slot: CredentialSlot::Primary,
        }
        .into();
        assert_eq!(err.kind(), "credential");
        assert!(err.to_string().contains("primary credential has no account key"));
    }

    #[test]
    fn test_backend_error_keeps_source() {
        let err = StorageError::backend("download", anyhow::anyhow!("HTTP 404"));
        assert_eq!(err.kind(), "backend");
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "HTTP 404");
    }

    #[test]
    fn test_batch_error_names_key() {
        let err = StorageError::Batch {
            key: "https://acct.blob.core.windows.net/c/a/b".to_string(),
            source: Box::new(StorageError::backend("exists", anyhow::anyhow!("boom"))),
        };
        assert!(err
            .to_string()
            .starts_with("batch operation failed for 'https://acct.blob.core.windows.net/c/a/b'"));
    }
}
