//! Persistent catalog of repositories, apps and installed packages.
//!
//! [`CatalogStore`] and [`InstalledPackages`] are the seams the rest of the
//! crate depends on; [`JsonCatalog`] implements both on a single JSON file
//! with atomic replacement.

mod error;
mod json;
mod model;
mod traits;

pub use error::{CatalogError, CatalogResult};
pub use json::JsonCatalog;
pub(crate) use json::write_json_atomic;
pub use model::{
    AppPrefs, AppRecord, ExpansionFile, ExpansionKind, InstalledPackage, PackageVersion,
    UpdatableApp,
};
pub use traits::{CatalogStore, IndexCommit, InstalledPackages, PinnedCertificate};
