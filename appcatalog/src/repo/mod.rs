//! Repository identity and mirror selection.
//!
//! - [`Repository`] is the catalog's record of one signed package repository.
//! - [`MirrorSelector`] picks the next mirror and timeout after a transfer
//!   failure, escalating through fixed timeout tiers.

mod mirror;
mod model;

pub use mirror::{MirrorChoice, MirrorError, MirrorSelector, MirrorState, TIMEOUT_TIERS_MS};
pub use model::{normalize_address, RepoId, Repository};
