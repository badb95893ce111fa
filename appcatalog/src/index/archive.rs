//! Signed index container.
//!
//! An `index.jar` is a ZIP archive holding the designated index entry and
//! one signer block per code signer:
//!
//! ```text
//! index.jar
//! ├── index-v1.json          designated entry
//! └── META-INF/
//!     ├── RELEASE.SIG        {"entry", "certificates": [hex DER], "signature": hex}
//!     └── ...
//! ```
//!
//! A signer block covers the entry it names. Signatures are RSA PKCS#1 v1.5
//! over SHA-256 of the entry bytes, checked against the public key of the
//! block's first certificate (DER SubjectPublicKeyInfo).
//!
//! [`ArchiveWriter`] produces the same layout for repository publishers.

use std::io::{Cursor, Read, Write};

use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::sha2::{Digest, Sha256};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::error::{UpdateError, UpdateResult};

/// Name of the signed entry inside `index.jar`.
pub const INDEX_ENTRY: &str = "index-v1.json";

const SIGNER_PREFIX: &str = "META-INF/";
const SIGNER_SUFFIX: &str = ".SIG";

/// On-disk form of a signer block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerBlock {
    /// Entry covered by this signature.
    pub entry: String,
    /// Hex-encoded DER certificates, leaf first.
    pub certificates: Vec<String>,
    /// Hex-encoded signature.
    pub signature: String,
}

/// A decoded code signer.
#[derive(Debug, Clone)]
pub struct CodeSigner {
    pub alias: String,
    pub entry: String,
    pub certificates: Vec<Vec<u8>>,
    pub signature: Vec<u8>,
}

impl CodeSigner {
    /// Check the signature over `data` with the leaf certificate.
    pub fn verifies(&self, data: &[u8]) -> bool {
        let Some(leaf) = self.certificates.first() else {
            return false;
        };
        let Ok(key) = RsaPublicKey::from_public_key_der(leaf) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(self.signature.as_slice()) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(key)
            .verify(data, &signature)
            .is_ok()
    }
}

/// A parsed `index.jar`.
#[derive(Debug)]
pub struct SignedArchive {
    entry: Vec<u8>,
    signers: Vec<CodeSigner>,
}

impl SignedArchive {
    /// Read the container and decode every signer block.
    ///
    /// # Errors
    ///
    /// Fails when the bytes are not a ZIP archive, a signer block is
    /// malformed, or the designated entry is missing.
    pub fn read(bytes: &[u8]) -> UpdateResult<Self> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| UpdateError::Archive(e.to_string()))?;

        let mut entry = None;
        let mut signers = Vec::new();

        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| UpdateError::Archive(e.to_string()))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut content = Vec::new();
            file.read_to_end(&mut content)
                .map_err(|e| UpdateError::Archive(format!("{}: {}", name, e)))?;

            if name == INDEX_ENTRY {
                entry = Some(content);
            } else if let Some(alias) = signer_alias(&name) {
                signers.push(decode_signer(alias, &content)?);
            }
        }

        let entry = entry.ok_or_else(|| UpdateError::MissingEntry(INDEX_ENTRY.to_string()))?;
        Ok(Self { entry, signers })
    }

    /// Bytes of the designated entry.
    pub fn entry(&self) -> &[u8] {
        &self.entry
    }

    pub fn into_entry(self) -> Vec<u8> {
        self.entry
    }

    /// Signers that cover the designated entry.
    pub fn entry_signers(&self) -> Vec<&CodeSigner> {
        self.signers
            .iter()
            .filter(|s| s.entry == INDEX_ENTRY)
            .collect()
    }
}

fn signer_alias(name: &str) -> Option<&str> {
    name.strip_prefix(SIGNER_PREFIX)?
        .strip_suffix(SIGNER_SUFFIX)
        .filter(|alias| !alias.is_empty() && !alias.contains('/'))
}

fn decode_signer(alias: &str, content: &[u8]) -> UpdateResult<CodeSigner> {
    let block: SignerBlock = serde_json::from_slice(content)
        .map_err(|e| UpdateError::Archive(format!("signer {}: {}", alias, e)))?;
    let certificates = block
        .certificates
        .iter()
        .map(hex::decode)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| UpdateError::Archive(format!("signer {} certificate: {}", alias, e)))?;
    let signature = hex::decode(&block.signature)
        .map_err(|e| UpdateError::Archive(format!("signer {} signature: {}", alias, e)))?;
    Ok(CodeSigner {
        alias: alias.to_string(),
        entry: block.entry,
        certificates,
        signature,
    })
}

/// DER certificate bytes for a public key.
pub fn certificate_der(key: &RsaPublicKey) -> UpdateResult<Vec<u8>> {
    key.to_public_key_der()
        .map(|der| der.as_bytes().to_vec())
        .map_err(|e| UpdateError::Archive(format!("encode certificate: {}", e)))
}

/// Lowercase hex SHA-256 of certificate bytes.
pub fn fingerprint(certificate: &[u8]) -> String {
    hex::encode(Sha256::digest(certificate))
}

/// Builds a signed `index.jar`.
#[derive(Debug)]
pub struct ArchiveWriter {
    entry: Vec<u8>,
    signers: Vec<(String, SignerBlock)>,
}

impl ArchiveWriter {
    pub fn new(entry: impl Into<Vec<u8>>) -> Self {
        Self {
            entry: entry.into(),
            signers: Vec::new(),
        }
    }

    /// Sign the entry with `key`, using its public key as the certificate.
    pub fn sign(mut self, alias: &str, key: &RsaPrivateKey) -> UpdateResult<Self> {
        let certificate = certificate_der(&RsaPublicKey::from(key))?;
        let signature = SigningKey::<Sha256>::new(key.clone()).sign(&self.entry);
        self.signers.push((
            alias.to_string(),
            SignerBlock {
                entry: INDEX_ENTRY.to_string(),
                certificates: vec![hex::encode(certificate)],
                signature: hex::encode(signature.to_vec()),
            },
        ));
        Ok(self)
    }

    /// Add a pre-built signer block.
    pub fn with_signer_block(mut self, alias: &str, block: SignerBlock) -> Self {
        self.signers.push((alias.to_string(), block));
        self
    }

    /// Write the container.
    pub fn finish(self) -> UpdateResult<Vec<u8>> {
        let archive_err = |e: zip::result::ZipError| UpdateError::Archive(e.to_string());
        let io_err = |e: std::io::Error| UpdateError::Archive(e.to_string());

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        writer.start_file(INDEX_ENTRY, options).map_err(archive_err)?;
        writer.write_all(&self.entry).map_err(io_err)?;

        for (alias, block) in &self.signers {
            let content = serde_json::to_vec(block)
                .map_err(|e| UpdateError::Archive(format!("signer {}: {}", alias, e)))?;
            writer
                .start_file(format!("{}{}{}", SIGNER_PREFIX, alias, SIGNER_SUFFIX), options)
                .map_err(archive_err)?;
            writer.write_all(&content).map_err(io_err)?;
        }

        Ok(writer.finish().map_err(archive_err)?.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::OnceLock;

    /// Small keys cached per test binary; generation dominates test time.
    pub(crate) fn test_key(slot: usize) -> &'static RsaPrivateKey {
        static KEYS: OnceLock<Vec<RsaPrivateKey>> = OnceLock::new();
        &KEYS.get_or_init(|| {
            let mut rng = rsa::rand_core::OsRng;
            (0..2)
                .map(|_| RsaPrivateKey::new(&mut rng, 1024).unwrap())
                .collect()
        })[slot]
    }

    #[test]
    fn test_signed_archive_round_trip() {
        let bytes = ArchiveWriter::new(b"{}".to_vec())
            .sign("RELEASE", test_key(0))
            .unwrap()
            .finish()
            .unwrap();

        let archive = SignedArchive::read(&bytes).unwrap();
        assert_eq!(archive.entry(), b"{}");

        let signers = archive.entry_signers();
        assert_eq!(signers.len(), 1);
        assert_eq!(signers[0].alias, "RELEASE");
        assert!(signers[0].verifies(archive.entry()));
        assert!(!signers[0].verifies(b"{\"tampered\":true}"));
    }

    #[test]
    fn test_unsigned_archive_has_no_signers() {
        let bytes = ArchiveWriter::new(b"{}".to_vec()).finish().unwrap();
        let archive = SignedArchive::read(&bytes).unwrap();
        assert!(archive.entry_signers().is_empty());
    }

    #[test]
    fn test_signer_for_other_entry_is_ignored() {
        let block = SignerBlock {
            entry: "other.json".to_string(),
            certificates: vec!["00".to_string()],
            signature: "00".to_string(),
        };
        let bytes = ArchiveWriter::new(b"{}".to_vec())
            .with_signer_block("OTHER", block)
            .finish()
            .unwrap();

        let archive = SignedArchive::read(&bytes).unwrap();
        assert!(archive.entry_signers().is_empty());
    }

    #[test]
    fn test_not_a_zip() {
        let err = SignedArchive::read(b"definitely not a zip").unwrap_err();
        assert!(matches!(err, UpdateError::Archive(_)));
    }

    #[test]
    fn test_missing_entry() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("README", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"hello").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let err = SignedArchive::read(&bytes).unwrap_err();
        assert!(matches!(err, UpdateError::MissingEntry(_)));
    }

    #[test]
    fn test_signer_alias() {
        assert_eq!(signer_alias("META-INF/RELEASE.SIG"), Some("RELEASE"));
        assert_eq!(signer_alias("META-INF/.SIG"), None);
        assert_eq!(signer_alias("META-INF/a/b.SIG"), None);
        assert_eq!(signer_alias("index-v1.json"), None);
    }

    #[test]
    fn test_fingerprint_is_lowercase_sha256() {
        assert_eq!(
            fingerprint(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
