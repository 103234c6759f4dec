//! Where the launcher keeps things on disk.
//!
//! ```text
//! <data_local>/YARC/                 base
//! <data_local>/YARC/Launcher/        launcher state (query cache)
//! <data_local>/YARC/Launcher/Temp/   in-flight downloads
//! <download_location>/YARG Installs/ game profiles
//! <download_location>/Setlists/<id>/ one directory per setlist
//! ```

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use directories::BaseDirs;

use crate::{
    config::LauncherConfig,
    errors::{ErrorInfo, IoError, Result},
};

pub const BASE_DIR_NAME: &str = "YARC";
pub const LAUNCHER_DIR_NAME: &str = "Launcher";
pub const TEMP_DIR_NAME: &str = "Temp";
pub const INSTALLS_DIR_NAME: &str = "YARG Installs";
pub const SETLISTS_DIR_NAME: &str = "Setlists";

pub const INSTALLATION_DIR_NAME: &str = "installation";
pub const TAG_FILE_NAME: &str = "tag.txt";

#[derive(Debug, Clone)]
pub struct ImportantDirs {
    pub base_dir: PathBuf,
    pub launcher_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl ImportantDirs {
    /// Resolves the base directory and creates the whole fixed tree under it.
    pub fn ensure(config: &LauncherConfig) -> Result<Self> {
        let base_dir = match &config.base_dir_override {
            Some(dir) => dir.clone(),
            None => BaseDirs::new()
                .ok_or(ErrorInfo::GetBaseDirs)?
                .data_local_dir()
                .join(BASE_DIR_NAME),
        };
        Self::ensure_at(base_dir)
    }

    pub fn ensure_at(base_dir: PathBuf) -> Result<Self> {
        let launcher_dir = base_dir.join(LAUNCHER_DIR_NAME);
        let temp_dir = launcher_dir.join(TEMP_DIR_NAME);

        fs::create_dir_all(&base_dir).map_err(|error| ErrorInfo::CreateBaseDirectory {
            path: base_dir.clone(),
            error: error.into(),
        })?;
        fs::create_dir_all(&launcher_dir).map_err(|error| ErrorInfo::CreateLauncherDirectory {
            path: launcher_dir.clone(),
            error: error.into(),
        })?;
        fs::create_dir_all(&temp_dir).map_err(|error| ErrorInfo::CreateTempDirectory {
            path: temp_dir.clone(),
            error: error.into(),
        })?;

        tracing::debug!(base = %base_dir.display(), "Launcher directories ready");

        Ok(Self {
            base_dir,
            launcher_dir,
            temp_dir,
        })
    }
}

/// Directories under the user-chosen download location.
#[derive(Debug, Clone)]
pub struct CustomDirs {
    pub installs_dir: PathBuf,
    pub setlists_dir: PathBuf,
}

impl CustomDirs {
    pub fn ensure(download_location: &Path) -> Result<Self> {
        let installs_dir = download_location.join(INSTALLS_DIR_NAME);
        let setlists_dir = download_location.join(SETLISTS_DIR_NAME);

        fs::create_dir_all(&installs_dir).map_err(|error| ErrorInfo::CreateInstallDirectory {
            path: installs_dir.clone(),
            error: error.into(),
        })?;
        fs::create_dir_all(&setlists_dir).map_err(|error| ErrorInfo::CreateSetlistDirectory {
            path: setlists_dir.clone(),
            error: error.into(),
        })?;

        Ok(Self {
            installs_dir,
            setlists_dir,
        })
    }

    pub fn setlist_dir(&self, setlist_id: &str) -> PathBuf {
        self.setlists_dir.join(setlist_id)
    }

    pub fn ensure_setlist_dir(&self, setlist_id: &str) -> Result<PathBuf> {
        let dir = self.setlist_dir(setlist_id);
        fs::create_dir_all(&dir).map_err(|error| ErrorInfo::CreateSetlistDirectory {
            path: dir.clone(),
            error: error.into(),
        })?;
        Ok(dir)
    }
}

/// Paths inside one profile (game install or setlist) directory.
#[derive(Debug, Clone)]
pub struct ProfilePaths {
    pub root: PathBuf,
    pub installation: PathBuf,
    pub tag_file: PathBuf,
}

impl ProfilePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            installation: root.join(INSTALLATION_DIR_NAME),
            tag_file: root.join(TAG_FILE_NAME),
            root,
        }
    }
}

/// Deletes `path` (if present) and creates it again, empty.
///
/// Both halves report [`ErrorInfo::FailedToRecreateFolder`]; callers cannot
/// tell which one failed.
pub fn recreate_folder(path: &Path) -> Result<()> {
    let fail = |error: io::Error| ErrorInfo::FailedToRecreateFolder {
        path: path.to_owned(),
        error: IoError::from(error),
    };

    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(fail(e)),
    }
    fs::create_dir_all(path).map_err(fail)?;

    Ok(())
}
