use std::{io, path::Path};

use serde::{Deserialize, Serialize};
use specta::Type;

use crate::{
    errors::{ErrorInfo, Result},
    setlist::dirs::TAG_FILE_NAME,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "camelCase")]
pub enum ProfileFolderState {
    /// No tag file yet.
    FirstDownload,
    UpToDate,
    /// A tag exists but names another release.
    UpdateRequired,
    /// The tag file could not be inspected.
    Error,
}

/// Marks `dir` as fully installed at `tag`.
pub async fn write_tag(dir: &Path, tag: &str) -> Result<()> {
    let path = dir.join(TAG_FILE_NAME);
    tokio::fs::write(&path, tag)
        .await
        .map_err(|error| ErrorInfo::WriteTagFileError {
            path: path.clone(),
            error: error.into(),
        })?;

    tracing::info!(path = %path.display(), tag, "Tag file written");
    Ok(())
}

/// Removes the tag so the next run reinstalls. A missing tag is not an error.
pub async fn remove_tag(dir: &Path) -> Result<()> {
    let path = dir.join(TAG_FILE_NAME);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Tag file removed");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(ErrorInfo::FailedToRemoveTagFile {
            path,
            error: error.into(),
        }),
    }
}

pub async fn read_tag(dir: &Path) -> io::Result<Option<String>> {
    match tokio::fs::read_to_string(dir.join(TAG_FILE_NAME)).await {
        Ok(tag) => Ok(Some(tag.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn folder_state(dir: &Path, wanted_tag: &str) -> ProfileFolderState {
    match read_tag(dir).await {
        Ok(None) => ProfileFolderState::FirstDownload,
        Ok(Some(tag)) if tag == wanted_tag.trim() => ProfileFolderState::UpToDate,
        Ok(Some(_)) => ProfileFolderState::UpdateRequired,
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to read tag file");
            ProfileFolderState::Error
        }
    }
}
