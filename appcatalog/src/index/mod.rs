//! Signed repository indexes.
//!
//! - [`IndexVerifier`] enforces the single-signer, single-certificate trust
//!   model and certificate pinning.
//! - [`IndexUpdater`] downloads, verifies, parses and commits one
//!   repository's index.
//! - [`IndexFetcher`] and [`IndexParser`] are the download and parsing
//!   collaborators, with HTTP and index-v1 JSON implementations.

pub(crate) mod archive;
mod error;
mod fetch;
mod parser;
mod updater;
mod verifier;

pub use archive::{
    certificate_der, fingerprint, ArchiveWriter, CodeSigner, SignedArchive, SignerBlock,
    INDEX_ENTRY,
};
pub use error::{SigningError, SigningFailure, UpdateError, UpdateResult};
pub use fetch::{FetchProgress, FetchedIndex, HttpIndexFetcher, IndexFetcher};
pub use parser::{IndexHeader, IndexParser, JsonIndexParser, ParseProgress, ParsedIndex};
pub use updater::{index_url, IndexUpdater, UpdateProgress, UpdateProgressFn, INDEX_FILE};
pub use verifier::{IndexVerifier, VerifiedIndex};
