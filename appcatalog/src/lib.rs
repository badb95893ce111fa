//! AppCatalog - trust-and-delivery core of an application catalog client.
//!
//! This library fetches signed repository indexes, verifies them against
//! pinned certificates, reconciles them into the local catalog, and drives
//! package downloads and installs with mirror failover and crash-safe
//! resumption.
//!
//! # Architecture
//!
//! ```text
//! RepoSyncCoordinator ──► IndexUpdater ──► IndexVerifier
//!         │                    │
//!         │                    └──► CatalogStore (atomic commit)
//!         │
//!         └──(auto-download)──► InstallOrchestrator ──► TransferService
//!                                   │        │
//!                                   │        └──► Installer
//!                                   ├──► MirrorSelector (on connection failure)
//!                                   └──► StatusRegistry (read by UI)
//! ```

pub mod catalog;
pub mod config;
pub mod index;
pub mod install;
pub mod logging;
pub mod repo;
pub mod status;
pub mod sync;
