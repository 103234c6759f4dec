//! Sequences the install stages for one profile directory.
//!
//! A run walks the [`PipelineState`] machine: directories, then for each
//! release file download → verify → extract, then the tag, then (optionally)
//! the launch. The first stage error ends the run and is returned unchanged.

use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use specta::Type;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::{
    config::LauncherConfig,
    errors::{AnyError, ErrorInfo, Result},
    setlist::{
        cache::{CACHE_FILE_NAME, PersistedResultCache, ResultCache},
        dirs::{ImportantDirs, ProfilePaths, recreate_folder},
        download::Downloader,
        extract,
        launch,
        progress::{InstallPhase, InstallReporter, InstallStatus},
        release::{ReleaseContent, ReleaseFile, ReleaseFileType, plan_files},
        state::{PipelineEvent, PipelineRun},
        tag::{self, ProfileFolderState},
        verify::SignatureVerifier,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequest {
    pub profile_path: PathBuf,
    /// Names the temp files of this run.
    pub uuid: String,
    /// Written to the tag file once everything is installed.
    pub tag: String,
    pub content: Vec<ReleaseContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    /// Relative to the profile's `installation/` directory.
    pub exec_path: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default, rename = "useObsVkapture")]
    pub use_obs_vkapture: bool,
}

/// Absolute, lexically normalised form of a profile path. Every spelling of
/// the same directory maps to one lock and one set of cache keys.
fn profile_key(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut key = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                key.pop();
            }
            other => key.push(other),
        }
    }
    key
}

type LockMap = HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>;

/// One async mutex per profile directory. Entries are dropped once nobody
/// holds or waits on them.
#[derive(Default)]
struct DirLocks(Mutex<LockMap>);

impl DirLocks {
    fn map(&self) -> std::sync::MutexGuard<'_, LockMap> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn lock(&self, path: &Path) -> DirGuard<'_> {
        let key = profile_key(path);
        let lock = Arc::clone(self.map().entry(key.clone()).or_default());
        DirGuard {
            locks: self,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

struct DirGuard<'a> {
    locks: &'a DirLocks,
    key: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DirGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.map();
        // Waiters clone the Arc under the map lock, so a count of one means
        // only the map itself still refers to this mutex.
        if map.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(&self.key);
        }
    }
}

pub struct Orchestrator {
    config: LauncherConfig,
    dirs: ImportantDirs,
    downloader: Downloader,
    verifier: SignatureVerifier,
    cache: Arc<dyn ResultCache>,
    locks: DirLocks,
}

impl Orchestrator {
    pub fn new(
        config: LauncherConfig,
        dirs: ImportantDirs,
        verifier: SignatureVerifier,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            downloader: Downloader::new(&config),
            config,
            dirs,
            verifier,
            cache,
            locks: DirLocks::default(),
        }
    }

    /// Creates the launcher directories and wires the embedded key and the
    /// on-disk query cache.
    pub fn from_config(config: LauncherConfig) -> Result<Self> {
        let dirs = ImportantDirs::ensure(&config)?;
        let cache = PersistedResultCache::open(dirs.launcher_dir.join(CACHE_FILE_NAME), config.cache_ttl);
        Ok(Self::new(
            config,
            dirs,
            SignatureVerifier::embedded(),
            Arc::new(cache),
        ))
    }

    pub fn dirs(&self) -> &ImportantDirs {
        &self.dirs
    }

    pub async fn ensure_installed(
        &self,
        request: &InstallRequest,
        cancel_token: &CancellationToken,
        reporter: &InstallReporter,
    ) -> Result<PipelineRun> {
        self.run(request, None, cancel_token, reporter)
            .await
            .into_result()
    }

    pub async fn ensure_installed_and_launch(
        &self,
        request: &InstallRequest,
        launch: &LaunchRequest,
        cancel_token: &CancellationToken,
        reporter: &InstallReporter,
    ) -> Result<PipelineRun> {
        self.run(request, Some(launch), cancel_token, reporter)
            .await
            .into_result()
    }

    /// Runs the pipeline and returns every state it went through, ending in
    /// `Tagged`, `Launched` or `Failed`.
    pub async fn run(
        &self,
        request: &InstallRequest,
        launch: Option<&LaunchRequest>,
        cancel_token: &CancellationToken,
        reporter: &InstallReporter,
    ) -> PipelineRun {
        let mut run = PipelineRun::default();
        let mut phase = InstallPhase::Preparing;

        let _guard = self.locks.lock(&request.profile_path).await;
        tracing::info!(
            profile = %request.profile_path.display(),
            tag = %request.tag,
            "Pipeline started"
        );

        let result = self
            .drive(&mut run, &mut phase, request, launch, cancel_token, reporter)
            .await;
        self.invalidate_folder_state(&request.profile_path);

        if let Err(error) = result {
            tracing::error!(
                profile = %request.profile_path.display(),
                phase = ?phase,
                category = ?error.category(),
                error = %error,
                "Pipeline failed"
            );
            if !matches!(error, ErrorInfo::Cancelled { .. }) {
                reporter.report(
                    phase,
                    InstallStatus::Failed {
                        reason: error.to_string(),
                    },
                );
            }
            step(&mut run, PipelineEvent::Failed(error));
        }

        run
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        phase: &mut InstallPhase,
        request: &InstallRequest,
        launch: Option<&LaunchRequest>,
        cancel_token: &CancellationToken,
        reporter: &InstallReporter,
    ) -> Result<()> {
        // Input validation, before any I/O.
        let plan = plan_files(&request.content, std::env::consts::OS)?;
        if self.config.require_signatures
            && let Some(unsigned) = plan.iter().find(|(file, _)| file.sig_url.is_none())
        {
            return Err(ErrorInfo::VerifyFail {
                error: AnyError::message(format!("release file `{}` has no signature", unsigned.0.url)),
            });
        }

        let paths = ProfilePaths::new(&request.profile_path);
        tokio::fs::create_dir_all(&paths.root)
            .await
            .map_err(|error| ErrorInfo::CreateSetlistDirectory {
                path: paths.root.clone(),
                error: error.into(),
            })?;
        step(run, PipelineEvent::DirectoriesReady);

        if tag::folder_state(&paths.root, &request.tag).await == ProfileFolderState::UpToDate {
            tracing::info!(
                profile = %paths.root.display(),
                tag = %request.tag,
                "Already installed, skipping download"
            );
            step(run, PipelineEvent::TagFound);
        } else {
            self.install(run, phase, &paths, request, &plan, cancel_token, reporter)
                .await?;
        }

        if let Some(launch) = launch {
            *phase = InstallPhase::Launching;
            self.launch(&paths.root, launch).await?;
            step(run, PipelineEvent::Launched);
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn install(
        &self,
        run: &mut PipelineRun,
        phase: &mut InstallPhase,
        paths: &ProfilePaths,
        request: &InstallRequest,
        plan: &[(ReleaseFile, ReleaseFileType)],
        cancel_token: &CancellationToken,
        reporter: &InstallReporter,
    ) -> Result<()> {
        let temp_file = self.dirs.temp_dir.join(format!("{}.temp", request.uuid));
        let sig_file = self.dirs.temp_dir.join(format!("{}.temp_sig", request.uuid));
        remove_temp_file(&temp_file);
        remove_temp_file(&sig_file);
        let _cleanup = scopeguard::guard((temp_file.clone(), sig_file.clone()), |(t, s)| {
            remove_temp_file(&t);
            remove_temp_file(&s);
        });

        reporter.report(
            InstallPhase::Preparing,
            InstallStatus::Started { total_size: None },
        );
        // The tag must never describe a half-written installation.
        tag::remove_tag(&paths.root).await?;
        recreate_folder(&paths.installation)?;
        reporter.report(InstallPhase::Preparing, InstallStatus::Completed);

        let file_count = plan.len();
        for (index, (file, file_type)) in plan.iter().enumerate() {
            tracing::info!(
                phase = "install",
                file = index + 1,
                of = file_count,
                url = %file.url,
                "Installing release file"
            );

            *phase = InstallPhase::Downloading;
            self.downloader
                .download(&file.url, &temp_file, cancel_token, Some(reporter))
                .await?;
            step(run, PipelineEvent::Downloaded);

            *phase = InstallPhase::Verifying;
            match &file.sig_url {
                Some(sig_url) => {
                    reporter.report(
                        InstallPhase::Verifying,
                        InstallStatus::Started { total_size: None },
                    );
                    self.downloader
                        .download(sig_url, &sig_file, cancel_token, None)
                        .await
                        .map_err(|error| match error {
                            ErrorInfo::Cancelled { .. } => ErrorInfo::Cancelled {
                                phase: InstallPhase::Verifying,
                            },
                            other => other,
                        })?;
                    self.verify(&temp_file, &sig_file).await?;
                    reporter.report(InstallPhase::Verifying, InstallStatus::Completed);
                    step(run, PipelineEvent::Verified);
                }
                None => {
                    tracing::warn!(url = %file.url, "Installing unsigned release file");
                    step(run, PipelineEvent::VerificationSkipped);
                }
            }

            *phase = InstallPhase::Extracting;
            match file_type {
                ReleaseFileType::Zip => {
                    extract::extract(&temp_file, &paths.installation, cancel_token, reporter)
                        .await?;
                }
            }
            step(run, PipelineEvent::Extracted);

            remove_temp_file(&temp_file);
            remove_temp_file(&sig_file);
        }

        *phase = InstallPhase::Finalizing;
        reporter.report(
            InstallPhase::Finalizing,
            InstallStatus::Started { total_size: None },
        );
        tag::write_tag(&paths.root, &request.tag).await?;
        reporter.report(InstallPhase::Finalizing, InstallStatus::Completed);
        step(run, PipelineEvent::TagWritten);

        Ok(())
    }

    async fn verify(&self, archive: &Path, signature: &Path) -> Result<()> {
        let verifier = self.verifier.clone();
        let archive = archive.to_path_buf();
        let signature = signature.to_path_buf();
        tokio::task::spawn_blocking(move || verifier.verify(&archive, &signature))
            .await
            .map_err(|error| ErrorInfo::VerifyFail {
                error: AnyError::from_error(&error),
            })?
    }

    /// Starts `<profile>/installation/<exec_path>`.
    pub async fn launch(&self, profile_path: &Path, request: &LaunchRequest) -> Result<Option<u32>> {
        let executable = ProfilePaths::new(profile_path)
            .installation
            .join(&request.exec_path);
        launch::launch(&executable, &request.arguments, request.use_obs_vkapture).await
    }

    /// Empties and removes the installation and the tag, then drops the
    /// profile directory if nothing else is left in it.
    pub async fn uninstall(&self, profile_path: &Path) -> Result<()> {
        let _guard = self.locks.lock(profile_path).await;
        let paths = ProfilePaths::new(profile_path);

        // Tag first: a half-deleted installation must not read as installed.
        tag::remove_tag(&paths.root).await?;
        self.invalidate_folder_state(profile_path);
        recreate_folder(&paths.installation)?;

        if let Err(e) = tokio::fs::remove_dir(&paths.installation).await {
            tracing::warn!(path = %paths.installation.display(), error = %e, "Failed to remove install directory");
        }
        if let Err(e) = tokio::fs::remove_dir(&paths.root).await {
            tracing::warn!(path = %paths.root.display(), error = %e, "Failed to remove profile directory");
        }

        tracing::info!(profile = %profile_path.display(), "Profile uninstalled");
        Ok(())
    }

    /// Install state of a profile. Answers are cached, except for
    /// [`ProfileFolderState::Error`].
    pub async fn folder_state(&self, profile_path: &Path, wanted_tag: &str) -> ProfileFolderState {
        let key = format!("{}{}", folder_state_prefix(profile_path), wanted_tag);
        if let Some(cached) = self.cache.get(&key)
            && let Ok(state) = serde_json::from_value::<ProfileFolderState>(cached)
        {
            return state;
        }

        let state = tag::folder_state(profile_path, wanted_tag).await;
        if state != ProfileFolderState::Error {
            match serde_json::to_value(state) {
                Ok(value) => self.cache.put(&key, value),
                Err(e) => tracing::warn!(error = %e, "Failed to cache folder state"),
            }
        }
        state
    }

    pub fn reveal(&self, profile_path: &Path) -> Result<()> {
        launch::reveal_folder(&ProfilePaths::new(profile_path).installation)
    }

    fn invalidate_folder_state(&self, profile_path: &Path) {
        self.cache
            .invalidate_prefix(&folder_state_prefix(profile_path));
    }
}

fn folder_state_prefix(profile_path: &Path) -> String {
    format!("folder-state:{}:", profile_key(profile_path).display())
}

fn step(run: &mut PipelineRun, event: PipelineEvent) {
    if let Err(e) = run.apply(event) {
        tracing::error!(error = %e, "Pipeline state machine rejected a transition");
        debug_assert!(false, "{e}");
    }
}

fn remove_temp_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
    }
}
