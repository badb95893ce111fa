//! Catalog records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::repo::RepoId;

/// Expansion file slot. A package has at most one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpansionKind {
    Main,
    Patch,
}

impl ExpansionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpansionKind::Main => "main",
            ExpansionKind::Patch => "patch",
        }
    }
}

impl fmt::Display for ExpansionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A large auxiliary data file shipped alongside a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionFile {
    pub kind: ExpansionKind,
    /// File name relative to the repository address.
    pub file_name: String,
    /// Lowercase hex SHA-256.
    pub sha256: String,
}

/// One downloadable version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub package_name: String,
    pub version_code: u64,
    pub version_name: String,
    /// File name relative to the repository address.
    pub file_name: String,
    /// Lowercase hex SHA-256 of the package file.
    pub hash: String,
    pub size: u64,
    pub repo_id: RepoId,
    pub repo_address: String,
    #[serde(default)]
    pub expansions: Vec<ExpansionFile>,
}

impl PackageVersion {
    /// Full download URL of the package file on the primary address.
    ///
    /// This is the identity of an install job.
    pub fn canonical_url(&self) -> String {
        format!("{}/{}", self.repo_address, self.file_name)
    }

    /// Download URL of an expansion file.
    pub fn expansion_url(&self, file: &ExpansionFile) -> String {
        format!("{}/{}", self.repo_address, file.file_name)
    }

    pub fn expansion(&self, kind: ExpansionKind) -> Option<&ExpansionFile> {
        self.expansions.iter().find(|e| e.kind == kind)
    }

    /// Canonical URLs of every expansion file.
    pub fn expansion_urls(&self) -> Vec<String> {
        self.expansions
            .iter()
            .map(|e| self.expansion_url(e))
            .collect()
    }
}

/// An application as published by one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub package_name: String,
    pub name: String,
    #[serde(default)]
    pub summary: String,
    /// Version the repository recommends, if it names one.
    #[serde(default)]
    pub suggested_version_code: Option<u64>,
    pub repo_id: RepoId,
    pub versions: Vec<PackageVersion>,
}

impl AppRecord {
    /// The suggested version, falling back to the highest available.
    pub fn suggested(&self) -> Option<&PackageVersion> {
        self.suggested_version_code
            .and_then(|code| self.versions.iter().find(|v| v.version_code == code))
            .or_else(|| self.versions.iter().max_by_key(|v| v.version_code))
    }
}

/// Per-package update preferences.
///
/// Keyed by package name so they survive index commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppPrefs {
    pub ignore_all_updates: bool,
    /// Version code whose update is ignored, if any.
    pub ignore_this_update: Option<u64>,
}

impl AppPrefs {
    /// Whether an update to `version_code` should be offered.
    pub fn allows(&self, version_code: u64) -> bool {
        !self.ignore_all_updates && self.ignore_this_update != Some(version_code)
    }
}

/// A package present on this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub package_name: String,
    pub version_code: u64,
    pub version_name: String,
    /// Installer the package is attributed to.
    #[serde(default)]
    pub installer: Option<String>,
}

/// An installed package with a newer suggested version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatableApp {
    pub package_name: String,
    pub name: String,
    pub installed_version_name: String,
    pub suggested: PackageVersion,
}
