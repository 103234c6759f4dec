use serde::{Deserialize, Serialize};
use specta::Type;

use crate::errors::{ErrorInfo, Result};

/// One installable part of a release, usually per platform.
#[derive(Debug, Clone, Serialize, Deserialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseContent {
    #[serde(default)]
    pub name: String,
    pub platforms: Vec<String>,
    pub files: Vec<ReleaseFile>,
}

impl ReleaseContent {
    pub fn targets(&self, os: &str) -> bool {
        self.platforms.iter().any(|p| p == os)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseFile {
    pub url: String,
    /// Detached minisign signature of the file at `url`.
    #[serde(default)]
    pub sig_url: Option<String>,
    pub file_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFileType {
    Zip,
}

impl ReleaseFile {
    pub fn release_type(&self) -> Result<ReleaseFileType> {
        match self.file_type.as_str() {
            "zip" => Ok(ReleaseFileType::Zip),
            other => Err(ErrorInfo::UnhandledReleaseFileType {
                release_type: other.to_string(),
            }),
        }
    }
}

/// Files from every content entry that targets `os`, with their types checked.
///
/// Fails on the first unknown type so nothing is fetched for a release that
/// could not be installed anyway.
pub fn plan_files(content: &[ReleaseContent], os: &str) -> Result<Vec<(ReleaseFile, ReleaseFileType)>> {
    content
        .iter()
        .filter(|c| c.targets(os))
        .flat_map(|c| c.files.iter())
        .map(|file| Ok((file.clone(), file.release_type()?)))
        .collect()
}
