use std::{fmt, io, path::PathBuf};

use serde::Serialize;
use specta::Type;

use crate::setlist::progress::InstallPhase;

pub type Result<T, E = ErrorInfo> = std::result::Result<T, E>;

/// A non-I/O failure reduced to what the presentation layer can show and log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct AnyError {
    pub description: String,
    /// `{:?}` of the underlying error. Opaque, only ever displayed or logged.
    pub debug_format: String,
}

impl AnyError {
    pub fn new(description: impl Into<String>, debug_format: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            debug_format: debug_format.into(),
        }
    }

    pub fn from_error<E: fmt::Display + fmt::Debug + ?Sized>(error: &E) -> Self {
        Self::new(error.to_string(), format!("{error:?}"))
    }

    /// For failures detected by this crate rather than reported by a library.
    pub fn message(description: impl Into<String>) -> Self {
        let description = description.into();
        let debug_format = format!("{description:?}");
        Self {
            description,
            debug_format,
        }
    }
}

impl fmt::Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Type)]
pub enum IoErrorKind {
    #[serde(rename = "not found")]
    NotFound,
    #[serde(rename = "permission denied")]
    PermissionDenied,
    #[serde(rename = "already exists")]
    AlreadyExists,
    #[serde(rename = "invalid input")]
    InvalidInput,
    #[serde(rename = "invalid data")]
    InvalidData,
    #[serde(rename = "unexpected end of file")]
    UnexpectedEof,
    #[serde(rename = "interrupted")]
    Interrupted,
    #[serde(rename = "timed out")]
    TimedOut,
    #[serde(rename = "write zero")]
    WriteZero,
    #[serde(rename = "unsupported")]
    Unsupported,
    #[serde(rename = "directory not empty")]
    DirectoryNotEmpty,
    #[serde(rename = "not a directory")]
    NotADirectory,
    #[serde(rename = "is a directory")]
    IsADirectory,
    #[serde(rename = "storage full")]
    StorageFull,
    #[serde(rename = "other")]
    Other,
}

impl From<io::ErrorKind> for IoErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::AlreadyExists => Self::AlreadyExists,
            io::ErrorKind::InvalidInput => Self::InvalidInput,
            io::ErrorKind::InvalidData => Self::InvalidData,
            io::ErrorKind::UnexpectedEof => Self::UnexpectedEof,
            io::ErrorKind::Interrupted => Self::Interrupted,
            io::ErrorKind::TimedOut => Self::TimedOut,
            io::ErrorKind::WriteZero => Self::WriteZero,
            io::ErrorKind::Unsupported => Self::Unsupported,
            io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty,
            io::ErrorKind::NotADirectory => Self::NotADirectory,
            io::ErrorKind::IsADirectory => Self::IsADirectory,
            io::ErrorKind::StorageFull => Self::StorageFull,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct IoError {
    #[serde(flatten)]
    pub base: AnyError,
    pub kind: IoErrorKind,
    /// Kept for diagnostics only.
    pub raw_os_error: Option<i32>,
}

impl From<&io::Error> for IoError {
    fn from(error: &io::Error) -> Self {
        Self {
            base: AnyError::from_error(error),
            kind: error.kind().into(),
            raw_os_error: error.raw_os_error(),
        }
    }
}

impl From<io::Error> for IoError {
    fn from(error: io::Error) -> Self {
        Self::from(&error)
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.base.fmt(f)
    }
}

/// Every way an install, uninstall or launch can fail.
///
/// A variant is built where the failure is detected and travels to the caller
/// untouched. Serialises as `{ "type": "<variant>", ...context }`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Type)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ErrorInfo {
    #[error("Failed to get base directories.")]
    GetBaseDirs,

    #[error("Unhandled release file type.")]
    UnhandledReleaseFileType {
        #[serde(rename = "releaseType")]
        release_type: String,
    },

    #[error("Failed to convert path to string!")]
    ConvertPathToStringError { path: PathBuf },

    #[error("Failed to extract setlist part.")]
    ExtractSetlistPath { error: AnyError },

    #[error("Failed to extract zip.")]
    ExtractZipError { error: AnyError },

    #[error("Invalid signature file! Try reinstalling. If it keeps failing, let us know ASAP!")]
    InvalidSignatureFile { error: AnyError },

    #[error(
        "Failed to verify downloaded zip file! Try reinstalling. If it keeps failing, let us know ASAP!"
    )]
    VerifyFail { error: AnyError },

    #[error("Error while downloading file.")]
    DownloadFail { error: AnyError },

    #[error("Failed to re-create folder.")]
    FailedToRecreateFolder { path: PathBuf, error: IoError },

    #[serde(rename = "createYARCDirectory")]
    #[error("Failed to create YARC directory.")]
    CreateBaseDirectory { path: PathBuf, error: IoError },

    #[error("Failed to create launcher directory.")]
    CreateLauncherDirectory { path: PathBuf, error: IoError },

    #[error("Failed to create temp directory.")]
    CreateTempDirectory { path: PathBuf, error: IoError },

    #[serde(rename = "createYARGDirectory")]
    #[error("Failed to create YARG directory.")]
    CreateInstallDirectory { path: PathBuf, error: IoError },

    #[error("Failed to create setlist directory.")]
    CreateSetlistDirectory { path: PathBuf, error: IoError },

    #[error("Failed to open file while extracting.")]
    ExtractFileOpenError { path: PathBuf, error: IoError },

    #[error("Failed to write tag file.")]
    WriteTagFileError { path: PathBuf, error: IoError },

    #[error("Failed to open zip while verifying.")]
    VerifyOpenZipFail { path: PathBuf, error: IoError },

    #[error("Failed to create download file.")]
    DownloadFileCreateFail { path: PathBuf, error: IoError },

    #[error("Failed to remove tag file.")]
    FailedToRemoveTagFile { path: PathBuf, error: IoError },

    #[error("Failed to initialize download.")]
    DownloadInitFail { url: String, error: AnyError },

    #[error("Error while writing to file.")]
    DownloadWriteError {
        path: PathBuf,
        url: String,
        error: IoError,
    },

    #[error("Failed to launch profile! Is the executable installed?{}", obs_hint(*use_obs_vkapture))]
    FailedToLaunchProfile {
        path: PathBuf,
        arguments: Vec<String>,
        #[serde(rename = "useObsVkapture")]
        use_obs_vkapture: bool,
        error: IoError,
    },

    #[error("Failed to reveal folder. Is it installed?")]
    FailedToRevealFolder { path: PathBuf, error: AnyError },

    #[error("The operation was cancelled.")]
    Cancelled { phase: InstallPhase },

    #[error("Failed to read install manifest.")]
    InvalidManifest { path: PathBuf, error: AnyError },
}

fn obs_hint(use_obs_vkapture: bool) -> &'static str {
    if use_obs_vkapture {
        " Is obs-vkcapture installed and pathed?"
    } else {
        ""
    }
}

/// Coarse grouping used for logging and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input, detected before any I/O.
    Validation,
    Io,
    /// Signature problems. Never retried as if transient.
    Trust,
    Launch,
    Cancelled,
}

impl ErrorInfo {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnhandledReleaseFileType { .. }
            | Self::ConvertPathToStringError { .. }
            | Self::InvalidManifest { .. } => ErrorCategory::Validation,
            Self::InvalidSignatureFile { .. } | Self::VerifyFail { .. } => ErrorCategory::Trust,
            Self::FailedToLaunchProfile { .. } | Self::FailedToRevealFolder { .. } => {
                ErrorCategory::Launch
            }
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::GetBaseDirs
            | Self::ExtractSetlistPath { .. }
            | Self::ExtractZipError { .. }
            | Self::DownloadFail { .. }
            | Self::FailedToRecreateFolder { .. }
            | Self::CreateBaseDirectory { .. }
            | Self::CreateLauncherDirectory { .. }
            | Self::CreateTempDirectory { .. }
            | Self::CreateInstallDirectory { .. }
            | Self::CreateSetlistDirectory { .. }
            | Self::ExtractFileOpenError { .. }
            | Self::WriteTagFileError { .. }
            | Self::VerifyOpenZipFail { .. }
            | Self::DownloadFileCreateFail { .. }
            | Self::FailedToRemoveTagFile { .. }
            | Self::DownloadInitFail { .. }
            | Self::DownloadWriteError { .. } => ErrorCategory::Io,
        }
    }

    /// The I/O classification, for variants that carry an [`IoError`].
    pub fn io_kind(&self) -> Option<IoErrorKind> {
        match self {
            Self::FailedToRecreateFolder { error, .. }
            | Self::CreateBaseDirectory { error, .. }
            | Self::CreateLauncherDirectory { error, .. }
            | Self::CreateTempDirectory { error, .. }
            | Self::CreateInstallDirectory { error, .. }
            | Self::CreateSetlistDirectory { error, .. }
            | Self::ExtractFileOpenError { error, .. }
            | Self::WriteTagFileError { error, .. }
            | Self::VerifyOpenZipFail { error, .. }
            | Self::DownloadFileCreateFail { error, .. }
            | Self::FailedToRemoveTagFile { error, .. }
            | Self::DownloadWriteError { error, .. }
            | Self::FailedToLaunchProfile { error, .. } => Some(error.kind),
            _ => None,
        }
    }
}
