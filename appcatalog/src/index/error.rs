//! Error types for index updates.

use thiserror::Error;

/// Result type for index operations.
pub type UpdateResult<T> = Result<T, UpdateError>;

/// Why an index failed the trust checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningFailure {
    /// The designated entry has no code signer.
    NoSignature,
    /// More than one code signer covers the designated entry.
    MultipleSigners,
    /// The signer carries a certificate chain instead of a single leaf.
    CertificateChain,
    /// The signature does not verify against the signer's certificate.
    BadSignature,
    /// The certificate differs from the one pinned for the repository.
    CertificateMismatch,
}

impl SigningFailure {
    fn message(&self) -> &'static str {
        match self {
            SigningFailure::NoSignature => "No signature found in index",
            SigningFailure::MultipleSigners => "index.jar must be signed by a single code signer!",
            SigningFailure::CertificateChain => {
                "index.jar code signers must only have a single certificate!"
            }
            SigningFailure::BadSignature => "signature on index entry does not verify",
            SigningFailure::CertificateMismatch => "Signing certificate does not match!",
        }
    }
}

/// A trust failure. Always fatal to the current sync attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} was not signed correctly: {}", .repo.as_deref().unwrap_or("Repository"), .failure.message())]
pub struct SigningError {
    /// Repository name, set when the failure is attributed to a repository.
    pub repo: Option<String>,
    pub failure: SigningFailure,
}

impl SigningError {
    pub fn new(failure: SigningFailure) -> Self {
        Self {
            repo: None,
            failure,
        }
    }

    pub fn for_repo(failure: SigningFailure, repo: impl Into<String>) -> Self {
        Self {
            repo: Some(repo.into()),
            failure,
        }
    }
}

/// Errors from a single repository update.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Index archive is unreadable: {0}")]
    Archive(String),

    #[error("Index archive has no {0} entry")]
    MissingEntry(String),

    #[error("Failed to parse index: {0}")]
    Parse(String),

    #[error("index.jar is older than current index! {new} < {stored}")]
    IndexOlder { new: u64, stored: u64 },

    #[error("Failed to commit index: {0}")]
    Catalog(#[from] crate::catalog::CatalogError),
}

impl UpdateError {
    /// Whether this is a trust failure.
    pub fn is_signing(&self) -> bool {
        matches!(self, UpdateError::Signing(_))
    }
}
