//! Index parsing.
//!
//! Turns the verified index entry into catalog records. The parser is a
//! collaborator so alternative index formats can be plugged in; the
//! built-in [`JsonIndexParser`] reads the index-v1 JSON layout:
//!
//! ```text
//! {
//!   "repo":     { "timestamp", "version", "name", "description", "mirrors" },
//!   "apps":     [ { "packageName", "name", "summary", "suggestedVersionCode" } ],
//!   "packages": { "<packageName>": [ { "versionCode", "versionName", "apkName",
//!                                     "hash", "hashType", "size",
//!                                     "obbMainFile", "obbMainFileSha256",
//!                                     "obbPatchFile", "obbPatchFileSha256" } ] }
//! }
//! ```

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, warn};

use super::error::{UpdateError, UpdateResult};
use crate::catalog::{AppRecord, ExpansionFile, ExpansionKind, PackageVersion};
use crate::repo::Repository;

/// Repository metadata carried by an index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexHeader {
    /// Publication time in milliseconds.
    pub timestamp: u64,
    pub version: u32,
    pub name: Option<String>,
    pub description: Option<String>,
    pub mirrors: Vec<String>,
}

/// Structured content of an index.
#[derive(Debug, Clone)]
pub struct ParsedIndex {
    pub header: IndexHeader,
    pub apps: Vec<AppRecord>,
}

/// Reports (apps processed, total apps).
pub type ParseProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Parses a verified index entry into catalog records.
pub trait IndexParser: Send + Sync {
    /// Read only the repository metadata.
    fn read_header(&self, entry: &[u8]) -> UpdateResult<IndexHeader>;

    /// Read the full index, attributing every record to `repo`.
    fn parse(
        &self,
        entry: &[u8],
        repo: &Repository,
        progress: ParseProgress<'_>,
    ) -> UpdateResult<ParsedIndex>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRepo {
    timestamp: u64,
    #[serde(default)]
    version: u32,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    mirrors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HeaderOnly {
    repo: RawRepo,
}

/// Version codes appear both as numbers and as strings in the wild.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VersionCode {
    Number(u64),
    Text(String),
}

impl VersionCode {
    fn value(&self) -> Option<u64> {
        match self {
            VersionCode::Number(n) => Some(*n),
            VersionCode::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawApp {
    package_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    suggested_version_code: Option<VersionCode>,
}

fn default_hash_type() -> String {
    "sha256".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPackage {
    version_code: u64,
    #[serde(default)]
    version_name: String,
    apk_name: String,
    hash: String,
    #[serde(default = "default_hash_type")]
    hash_type: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    obb_main_file: Option<String>,
    #[serde(default)]
    obb_main_file_sha256: Option<String>,
    #[serde(default)]
    obb_patch_file: Option<String>,
    #[serde(default)]
    obb_patch_file_sha256: Option<String>,
}

impl RawPackage {
    fn expansions(&self) -> Vec<ExpansionFile> {
        [
            (ExpansionKind::Main, &self.obb_main_file, &self.obb_main_file_sha256),
            (ExpansionKind::Patch, &self.obb_patch_file, &self.obb_patch_file_sha256),
        ]
        .into_iter()
        .filter_map(|(kind, file, hash)| match (file, hash) {
            (Some(file), Some(hash)) if !file.is_empty() => Some(ExpansionFile {
                kind,
                file_name: file.clone(),
                sha256: hash.to_lowercase(),
            }),
            _ => None,
        })
        .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawIndex {
    repo: RawRepo,
    #[serde(default)]
    apps: Vec<RawApp>,
    #[serde(default)]
    packages: HashMap<String, Vec<RawPackage>>,
}

fn header_from(raw: RawRepo) -> IndexHeader {
    IndexHeader {
        timestamp: raw.timestamp,
        version: raw.version,
        name: raw.name,
        description: raw.description,
        mirrors: raw.mirrors,
    }
}

/// Parser for the index-v1 JSON layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonIndexParser;

impl JsonIndexParser {
    pub fn new() -> Self {
        Self
    }
}

impl IndexParser for JsonIndexParser {
    fn read_header(&self, entry: &[u8]) -> UpdateResult<IndexHeader> {
        let raw: HeaderOnly =
            serde_json::from_slice(entry).map_err(|e| UpdateError::Parse(e.to_string()))?;
        Ok(header_from(raw.repo))
    }

    fn parse(
        &self,
        entry: &[u8],
        repo: &Repository,
        progress: ParseProgress<'_>,
    ) -> UpdateResult<ParsedIndex> {
        let mut raw: RawIndex =
            serde_json::from_slice(entry).map_err(|e| UpdateError::Parse(e.to_string()))?;

        let total = raw.apps.len() as u64;
        let mut apps = Vec::with_capacity(raw.apps.len());

        for (i, app) in raw.apps.into_iter().enumerate() {
            let packages = raw.packages.remove(&app.package_name).unwrap_or_default();
            let versions: Vec<PackageVersion> = packages
                .into_iter()
                .filter_map(|p| {
                    if !p.hash_type.eq_ignore_ascii_case("sha256") {
                        warn!(
                            package = %app.package_name,
                            version = p.version_code,
                            hash_type = %p.hash_type,
                            "Skipping version with unsupported hash type"
                        );
                        return None;
                    }
                    let expansions = p.expansions();
                    Some(PackageVersion {
                        package_name: app.package_name.clone(),
                        version_code: p.version_code,
                        version_name: p.version_name,
                        file_name: p.apk_name,
                        hash: p.hash.to_lowercase(),
                        size: p.size,
                        repo_id: repo.id,
                        repo_address: repo.address.clone(),
                        expansions,
                    })
                })
                .collect();

            apps.push(AppRecord {
                name: app.name.unwrap_or_else(|| app.package_name.clone()),
                summary: app.summary.unwrap_or_default(),
                suggested_version_code: app.suggested_version_code.and_then(|c| c.value()),
                package_name: app.package_name,
                repo_id: repo.id,
                versions,
            });

            progress(i as u64 + 1, total);
        }

        if !raw.packages.is_empty() {
            debug!(
                repo = %repo.address,
                orphaned = raw.packages.len(),
                "Index lists packages with no app entry"
            );
        }

        Ok(ParsedIndex {
            header: header_from(raw.repo),
            apps,
        })
    }
}
