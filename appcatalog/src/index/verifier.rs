//! Trust checks for a downloaded index.
//!
//! Verification is pure: it decides whether an archive is acceptable for a
//! repository and reports the certificate to pin, but never persists it.
//! The caller pins only after the rest of the update has succeeded.

use tracing::{debug, warn};

use super::archive::{fingerprint, SignedArchive};
use super::error::{SigningError, SigningFailure, UpdateResult};
use crate::repo::Repository;

/// An index that passed every trust check.
#[derive(Debug, Clone)]
pub struct VerifiedIndex {
    /// Bytes of the designated entry.
    pub entry: Vec<u8>,
    /// Hex-encoded certificate of the sole signer.
    pub certificate: String,
    /// Fingerprint of that certificate.
    pub fingerprint: String,
    /// True when the repository had no pinned certificate.
    pub newly_pinned: bool,
    /// Size of the downloaded archive.
    pub archive_len: usize,
}

/// Validates signed index archives against a repository's pinned identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexVerifier;

impl IndexVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Verify `archive` for `repo`.
    ///
    /// Checks run in order: a signer exists, exactly one signer, exactly one
    /// certificate, the signature verifies, and the certificate matches the
    /// pinned one (or the expected fingerprint on first use).
    pub fn verify(&self, archive: &[u8], repo: &Repository) -> UpdateResult<VerifiedIndex> {
        let signed = SignedArchive::read(archive)?;

        let signers = signed.entry_signers();
        let signer = match signers.as_slice() {
            [] => return Err(SigningError::new(SigningFailure::NoSignature).into()),
            [signer] => *signer,
            _ => return Err(SigningError::new(SigningFailure::MultipleSigners).into()),
        };

        let certificate = match signer.certificates.as_slice() {
            [] => return Err(SigningError::new(SigningFailure::NoSignature).into()),
            [certificate] => certificate.clone(),
            _ => return Err(SigningError::new(SigningFailure::CertificateChain).into()),
        };

        if !signer.verifies(signed.entry()) {
            warn!(repo = %repo.address, signer = %signer.alias, "Index signature does not verify");
            return Err(SigningError::new(SigningFailure::BadSignature).into());
        }

        let certificate_hex = hex::encode(&certificate);
        let observed = fingerprint(&certificate);

        let newly_pinned = match &repo.signing_certificate {
            Some(pinned) => {
                if !pinned.eq_ignore_ascii_case(&certificate_hex) {
                    warn!(repo = %repo.address, fingerprint = %observed, "Signing certificate does not match pin");
                    return Err(mismatch(repo).into());
                }
                false
            }
            None => {
                if let Some(expected) = &repo.fingerprint {
                    if !expected.eq_ignore_ascii_case(&observed) {
                        warn!(
                            repo = %repo.address,
                            expected = %expected,
                            observed = %observed,
                            "Certificate fingerprint does not match expected"
                        );
                        return Err(mismatch(repo).into());
                    }
                }
                debug!(repo = %repo.address, fingerprint = %observed, "Trusting certificate on first use");
                true
            }
        };

        Ok(VerifiedIndex {
            entry: signed.into_entry(),
            certificate: certificate_hex,
            fingerprint: observed,
            newly_pinned,
            archive_len: archive.len(),
        })
    }
}

fn mismatch(repo: &Repository) -> SigningError {
    SigningError::for_repo(SigningFailure::CertificateMismatch, repo.name.clone())
}
