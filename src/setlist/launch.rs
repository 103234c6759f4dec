use std::{path::Path, process::Stdio};

use crate::{
    errors::{AnyError, ErrorInfo, IoError, Result},
    util::path_to_string,
};

/// Wrapper that hooks the game's Vulkan swapchain for OBS.
pub const OBS_GAMECAPTURE: &str = "obs-gamecapture";

/// Spawns `executable` with `arguments` and returns its pid.
///
/// With `use_obs_vkapture` the process started is `obs-gamecapture <executable>
/// <arguments...>`. The child is detached from our standard streams and is not
/// waited on.
pub async fn launch(executable: &Path, arguments: &[String], use_obs_vkapture: bool) -> Result<Option<u32>> {
    let fail = |error: std::io::Error| ErrorInfo::FailedToLaunchProfile {
        path: executable.to_owned(),
        arguments: arguments.to_vec(),
        use_obs_vkapture,
        error: IoError::from(error),
    };

    // obs-gamecapture happily starts for a missing target; check first so both
    // modes report a missing executable the same way.
    tokio::fs::metadata(executable).await.map_err(fail)?;

    let mut command = if use_obs_vkapture {
        let mut command = tokio::process::Command::new(OBS_GAMECAPTURE);
        command.arg(path_to_string(executable)?);
        command
    } else {
        tokio::process::Command::new(executable)
    };

    let child = command
        .args(arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(fail)?;

    let pid = child.id();
    tracing::info!(
        operation = "launch",
        path = %executable.display(),
        ?arguments,
        use_obs_vkapture,
        ?pid,
        "Profile launched"
    );
    Ok(pid)
}

/// Opens `path` in the platform file browser.
pub fn reveal_folder(path: &Path) -> Result<()> {
    let fail = |error: AnyError| ErrorInfo::FailedToRevealFolder {
        path: path.to_owned(),
        error,
    };

    std::fs::metadata(path).map_err(|e| fail(AnyError::from_error(&e)))?;
    opener::open(path).map_err(|e| fail(AnyError::from_error(&e)))?;

    tracing::debug!(path = %path.display(), "Revealed folder");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::IoErrorKind;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_executable_keeps_full_context() {
        let tmp = tempdir().unwrap();
        let exe = tmp.path().join("opt/launcher/game");
        let arguments = vec!["--profile".to_string(), "p1".to_string()];

        let err = launch(&exe, &arguments, true).await.unwrap_err();

        match err {
            ErrorInfo::FailedToLaunchProfile {
                path,
                arguments: reported,
                use_obs_vkapture,
                error,
            } => {
                assert_eq!(path, exe);
                assert_eq!(reported, arguments);
                assert!(use_obs_vkapture);
                assert_eq!(error.kind, IoErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_executable_without_capture() {
        let err = launch(Path::new("/nonexistent/game"), &[], false)
            .await
            .unwrap_err();
        match err {
            ErrorInfo::FailedToLaunchProfile {
                path,
                use_obs_vkapture,
                error,
                ..
            } => {
                assert_eq!(path, PathBuf::from("/nonexistent/game"));
                assert!(!use_obs_vkapture);
                assert_eq!(error.kind, IoErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launches_existing_executable() {
        let pid = launch(Path::new("/bin/sh"), &["-c".into(), "exit 0".into()], false)
            .await
            .unwrap();
        assert!(pid.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_executable_file() {
        let tmp = tempdir().unwrap();
        let exe = tmp.path().join("game");
        std::fs::write(&exe, b"not a program").unwrap();

        let err = launch(&exe, &[], false).await.unwrap_err();
        assert!(matches!(err, ErrorInfo::FailedToLaunchProfile { .. }));
    }

    #[test]
    fn test_reveal_missing_folder() {
        let err = reveal_folder(Path::new("/nonexistent/installation")).unwrap_err();
        assert!(matches!(err, ErrorInfo::FailedToRevealFolder { .. }));
    }
}
