use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use setlist_launcher_lib::{
    ErrorCategory, ErrorInfo, LauncherConfig,
    errors::AnyError,
    init_tracing,
    setlist::{
        InstallRequest, LaunchRequest, Orchestrator,
        dirs::CustomDirs,
        progress::{InstallReporter, TracingProgressSink},
    },
};

#[derive(Debug, Parser)]
#[command(name = "setlist-launcher", version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct App {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create and print the launcher directories.
    Dirs {
        /// Also create the install and setlist directories under this location.
        #[arg(long)]
        download_location: Option<PathBuf>,
        /// Also create the directory of this setlist.
        #[arg(long, requires = "download_location")]
        setlist: Option<String>,
    },
    /// Print whether a profile is installed at `tag`.
    State { profile: PathBuf, tag: String },
    /// Install (and optionally launch) the profile described by a JSON manifest.
    #[command(alias = "i")]
    Install { manifest: PathBuf },
    /// Launch an installed profile.
    Launch {
        profile: PathBuf,
        /// Executable, relative to the profile's installation directory.
        exec: String,
        #[arg(long = "obs")]
        use_obs_vkapture: bool,
        #[arg(last = true)]
        arguments: Vec<String>,
    },
    #[command(alias = "rm")]
    Uninstall { profile: PathBuf },
    /// Open the profile's installation directory in the file browser.
    Reveal { profile: PathBuf },
}

/// An [`InstallRequest`] with an optional launch once it is installed.
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(flatten)]
    install: InstallRequest,
    #[serde(default)]
    launch: Option<LaunchRequest>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let app = App::parse();
    let config = LauncherConfig::from_env();
    init_tracing(config.log_level);

    match run(app.cmd, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            match serde_json::to_string_pretty(&error) {
                Ok(json) => eprintln!("{json}"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize error"),
            }
            ExitCode::from(exit_code(error.category()))
        }
    }
}

fn exit_code(category: ErrorCategory) -> u8 {
    match category {
        ErrorCategory::Validation => 2,
        ErrorCategory::Io => 3,
        ErrorCategory::Trust => 4,
        ErrorCategory::Launch => 5,
        ErrorCategory::Cancelled => 130,
    }
}

async fn run(cmd: Commands, config: LauncherConfig) -> Result<(), ErrorInfo> {
    let throttle = config.progress_throttle;
    let orchestrator = Orchestrator::from_config(config)?;

    match cmd {
        Commands::Dirs {
            download_location,
            setlist,
        } => {
            let dirs = orchestrator.dirs();
            println!("base:     {}", dirs.base_dir.display());
            println!("launcher: {}", dirs.launcher_dir.display());
            println!("temp:     {}", dirs.temp_dir.display());
            if let Some(location) = download_location {
                let custom = CustomDirs::ensure(&location)?;
                println!("installs: {}", custom.installs_dir.display());
                println!("setlists: {}", custom.setlists_dir.display());
                if let Some(id) = setlist {
                    println!("setlist:  {}", custom.ensure_setlist_dir(&id)?.display());
                }
            }
        }
        Commands::State { profile, tag } => {
            let state = orchestrator.folder_state(&profile, &tag).await;
            println!("{}", serde_json::to_string(&state).unwrap_or_else(|_| format!("{state:?}")));
        }
        Commands::Install { manifest } => {
            let manifest = read_manifest(&manifest).await?;
            let cancel_token = CancellationToken::new();
            spawn_ctrl_c_handler(cancel_token.clone());

            let reporter = InstallReporter::new(
                manifest.install.uuid.clone(),
                Arc::new(TracingProgressSink::new(throttle)),
            );
            let run = match &manifest.launch {
                Some(launch) => {
                    orchestrator
                        .ensure_installed_and_launch(&manifest.install, launch, &cancel_token, &reporter)
                        .await?
                }
                None => {
                    orchestrator
                        .ensure_installed(&manifest.install, &cancel_token, &reporter)
                        .await?
                }
            };
            println!("{:?}", run.state());
        }
        Commands::Launch {
            profile,
            exec,
            use_obs_vkapture,
            arguments,
        } => {
            let request = LaunchRequest {
                exec_path: exec,
                arguments,
                use_obs_vkapture,
            };
            if let Some(pid) = orchestrator.launch(&profile, &request).await? {
                println!("{pid}");
            }
        }
        Commands::Uninstall { profile } => orchestrator.uninstall(&profile).await?,
        Commands::Reveal { profile } => orchestrator.reveal(&profile)?,
    }

    Ok(())
}

async fn read_manifest(path: &std::path::Path) -> Result<Manifest, ErrorInfo> {
    let invalid = |error: AnyError| ErrorInfo::InvalidManifest {
        path: path.to_owned(),
        error,
    };
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| invalid(AnyError::from_error(&e)))?;
    serde_json::from_str(&data).map_err(|e| invalid(AnyError::from_error(&e)))
}

fn spawn_ctrl_c_handler(cancel_token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            cancel_token.cancel();
        }
    });
}
