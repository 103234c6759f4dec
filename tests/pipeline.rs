use std::collections::HashMap;
use std::io::{BufRead, BufReader, Cursor, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use minisign::{KeyPair, PublicKey};
use setlist_launcher_lib::{
    ErrorInfo, LauncherConfig,
    setlist::{
        InstallRequest, LaunchRequest, Orchestrator, PipelineState, ProfileFolderState,
        cache::PersistedResultCache,
        dirs::{ImportantDirs, TAG_FILE_NAME},
        progress::{InstallPhase, InstallProgress, InstallReporter, InstallStatus, ProgressSink},
        release::{ReleaseContent, ReleaseFile},
        verify::SignatureVerifier,
    },
};
use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;
use zip::{ZipWriter, write::SimpleFileOptions};

/// Serves fixed bodies by request path and counts every request.
struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    fn start(routes: HashMap<String, Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let routes = Arc::new(Mutex::new(routes));

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                loop {
                    let mut line = String::new();
                    match reader.read_line(&mut line) {
                        Ok(0) | Err(_) => break,
                        Ok(_) if line == "\r\n" => break,
                        Ok(_) => {}
                    }
                }

                let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();
                let body = routes.lock().unwrap().get(&path).cloned();
                let (status, body) = match body {
                    Some(body) => ("200 OK", body),
                    None => ("404 Not Found", b"not found".to_vec()),
                };
                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            hits,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn sign(keys: &KeyPair, data: &[u8]) -> Vec<u8> {
    minisign::sign(Some(&keys.pk), &keys.sk, Cursor::new(data), None, None)
        .unwrap()
        .into_string()
        .into_bytes()
}

fn orchestrator(tmp: &TempDir, public_key: PublicKey, require_signatures: bool) -> Orchestrator {
    let config = LauncherConfig {
        require_signatures,
        ..LauncherConfig::default()
    };
    Orchestrator::new(
        config,
        ImportantDirs::ensure_at(tmp.path().join("base")).unwrap(),
        SignatureVerifier::new(public_key),
        Arc::new(PersistedResultCache::in_memory(Duration::from_secs(3600))),
    )
}

fn request(profile: &Path, tag: &str, files: Vec<ReleaseFile>) -> InstallRequest {
    InstallRequest {
        profile_path: profile.to_path_buf(),
        uuid: "0b6f7c9e".into(),
        tag: tag.into(),
        content: vec![ReleaseContent {
            name: "game".into(),
            platforms: vec![std::env::consts::OS.to_string()],
            files,
        }],
    }
}

fn zip_file(server: &TestServer, name: &str, signed: bool) -> ReleaseFile {
    ReleaseFile {
        url: server.url(&format!("/{name}")),
        sig_url: signed.then(|| server.url(&format!("/{name}.sig"))),
        file_type: "zip".into(),
    }
}

async fn run(orchestrator: &Orchestrator, request: &InstallRequest) -> setlist_launcher_lib::setlist::PipelineRun {
    orchestrator
        .run(
            request,
            None,
            &CancellationToken::new(),
            &InstallReporter::silent("it"),
        )
        .await
}

#[tokio::test]
async fn test_signed_release_installs_and_tags() {
    let keys = KeyPair::generate_unencrypted_keypair().unwrap();
    let game = zip_bytes(&[("YARG", b"#!/bin/sh\n"), ("data/songs.txt", b"song")]);
    let extra = zip_bytes(&[("data/extra.txt", b"extra")]);
    let server = TestServer::start(HashMap::from([
        ("/game.zip".to_string(), game.clone()),
        ("/game.zip.sig".to_string(), sign(&keys, &game)),
        ("/extra.zip".to_string(), extra.clone()),
        ("/extra.zip.sig".to_string(), sign(&keys, &extra)),
    ]));
    let tmp = tempdir().unwrap();
    let profile = tmp.path().join("YARG Installs").join("v0.12.0");
    let orchestrator = orchestrator(&tmp, keys.pk, true);
    let request = request(
        &profile,
        "v0.12.0",
        vec![zip_file(&server, "game.zip", true), zip_file(&server, "extra.zip", true)],
    );

    let run = run(&orchestrator, &request).await;

    assert_eq!(run.state(), &PipelineState::Tagged, "{:?}", run.history());
    let installation = profile.join("installation");
    assert_eq!(std::fs::read(installation.join("data/songs.txt")).unwrap(), b"song");
    assert_eq!(std::fs::read(installation.join("data/extra.txt")).unwrap(), b"extra");
    assert_eq!(std::fs::read_to_string(profile.join(TAG_FILE_NAME)).unwrap(), "v0.12.0");
    assert_eq!(
        orchestrator.folder_state(&profile, "v0.12.0").await,
        ProfileFolderState::UpToDate
    );

    let temp_dir = &orchestrator.dirs().temp_dir;
    assert_eq!(std::fs::read_dir(temp_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn test_installed_tag_skips_network() {
    let keys = KeyPair::generate_unencrypted_keypair().unwrap();
    let game = zip_bytes(&[("YARG", b"bin")]);
    let server = TestServer::start(HashMap::from([
        ("/game.zip".to_string(), game.clone()),
        ("/game.zip.sig".to_string(), sign(&keys, &game)),
    ]));
    let tmp = tempdir().unwrap();
    let profile = tmp.path().join("profile");
    let orchestrator = orchestrator(&tmp, keys.pk, true);
    let request = request(&profile, "v1", vec![zip_file(&server, "game.zip", true)]);

    let first = run(&orchestrator, &request).await;
    assert_eq!(first.state(), &PipelineState::Tagged);
    let hits = server.hits();

    let second = run(&orchestrator, &request).await;
    assert_eq!(second.state(), &PipelineState::Tagged);
    assert!(!second.visited(&PipelineState::Downloaded));
    assert_eq!(server.hits(), hits);
}

#[tokio::test]
async fn test_bad_signature_never_extracts() {
    let keys = KeyPair::generate_unencrypted_keypair().unwrap();
    let other = KeyPair::generate_unencrypted_keypair().unwrap();
    let game = zip_bytes(&[("YARG", b"bin")]);
    let server = TestServer::start(HashMap::from([
        ("/game.zip".to_string(), game.clone()),
        ("/game.zip.sig".to_string(), sign(&other, &game)),
    ]));
    let tmp = tempdir().unwrap();
    let profile = tmp.path().join("profile");
    let orchestrator = orchestrator(&tmp, keys.pk, true);
    let request = request(&profile, "v1", vec![zip_file(&server, "game.zip", true)]);

    let run = run(&orchestrator, &request).await;

    assert!(matches!(run.error(), Some(ErrorInfo::VerifyFail { .. })));
    assert!(run.visited(&PipelineState::Downloaded));
    assert!(!run.visited(&PipelineState::Extracted));
    assert!(!profile.join("installation").join("YARG").exists());
    assert!(!profile.join(TAG_FILE_NAME).exists());
}

#[tokio::test]
async fn test_failure_is_reproducible() {
    let keys = KeyPair::generate_unencrypted_keypair().unwrap();
    let game = zip_bytes(&[("YARG", b"bin")]);
    let server = TestServer::start(HashMap::from([
        ("/game.zip".to_string(), game.clone()),
        ("/game.zip.sig".to_string(), b"garbage".to_vec()),
    ]));
    let tmp = tempdir().unwrap();
    let profile = tmp.path().join("profile");
    let orchestrator = orchestrator(&tmp, keys.pk, true);
    let request = request(&profile, "v1", vec![zip_file(&server, "game.zip", true)]);

    let first = run(&orchestrator, &request).await;
    let second = run(&orchestrator, &request).await;

    assert!(matches!(first.error(), Some(ErrorInfo::InvalidSignatureFile { .. })));
    assert_eq!(first.history(), second.history());
}

#[tokio::test]
async fn test_traversal_entry_is_rejected() {
    let keys = KeyPair::generate_unencrypted_keypair().unwrap();
    let game = zip_bytes(&[("ok.txt", b"ok"), ("../escape.txt", b"gotcha")]);
    let server = TestServer::start(HashMap::from([("/game.zip".to_string(), game)]));
    let tmp = tempdir().unwrap();
    let profile = tmp.path().join("profile");
    let orchestrator = orchestrator(&tmp, keys.pk, false);
    let request = request(&profile, "v1", vec![zip_file(&server, "game.zip", false)]);

    let run = run(&orchestrator, &request).await;

    assert!(matches!(run.error(), Some(ErrorInfo::ExtractSetlistPath { .. })));
    assert!(run.visited(&PipelineState::Verified));
    assert!(!profile.join("escape.txt").exists());
    assert!(!profile.join(TAG_FILE_NAME).exists());
}

#[tokio::test]
async fn test_missing_release_file_is_init_failure() {
    let keys = KeyPair::generate_unencrypted_keypair().unwrap();
    let server = TestServer::start(HashMap::new());
    let tmp = tempdir().unwrap();
    let profile = tmp.path().join("profile");
    let orchestrator = orchestrator(&tmp, keys.pk, false);
    let request = request(&profile, "v1", vec![zip_file(&server, "game.zip", false)]);

    let run = run(&orchestrator, &request).await;

    match run.error() {
        Some(ErrorInfo::DownloadInitFail { url, .. }) => assert_eq!(url, &server.url("/game.zip")),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_unhandled_type_is_rejected_before_any_request() {
    let keys = KeyPair::generate_unencrypted_keypair().unwrap();
    let server = TestServer::start(HashMap::new());
    let tmp = tempdir().unwrap();
    let profile = tmp.path().join("profile");
    let orchestrator = orchestrator(&tmp, keys.pk, false);
    let mut file = zip_file(&server, "game.7z", false);
    file.file_type = "encrypted".into();

    let run = run(&orchestrator, &request(&profile, "v1", vec![file])).await;

    assert!(matches!(run.error(), Some(ErrorInfo::UnhandledReleaseFileType { .. })));
    assert_eq!(server.hits(), 0);
    assert!(!profile.exists());
}

#[tokio::test]
async fn test_cancelled_run_reports_cancellation() {
    let keys = KeyPair::generate_unencrypted_keypair().unwrap();
    let game = zip_bytes(&[("YARG", b"bin")]);
    let server = TestServer::start(HashMap::from([("/game.zip".to_string(), game)]));
    let tmp = tempdir().unwrap();
    let profile = tmp.path().join("profile");
    let orchestrator = orchestrator(&tmp, keys.pk, false);
    let request = request(&profile, "v1", vec![zip_file(&server, "game.zip", false)]);
    let cancel_token = CancellationToken::new();
    cancel_token.cancel();

    let run = orchestrator
        .run(&request, None, &cancel_token, &InstallReporter::silent("it"))
        .await;

    assert!(matches!(run.error(), Some(ErrorInfo::Cancelled { .. })));
    assert!(!profile.join(TAG_FILE_NAME).exists());
}

#[tokio::test]
async fn test_uninstall_removes_profile() {
    let keys = KeyPair::generate_unencrypted_keypair().unwrap();
    let game = zip_bytes(&[("YARG", b"bin")]);
    let server = TestServer::start(HashMap::from([("/game.zip".to_string(), game)]));
    let tmp = tempdir().unwrap();
    let profile = tmp.path().join("profile");
    let orchestrator = orchestrator(&tmp, keys.pk, false);
    let request = request(&profile, "v1", vec![zip_file(&server, "game.zip", false)]);

    assert_eq!(run(&orchestrator, &request).await.state(), &PipelineState::Tagged);
    orchestrator.uninstall(&profile).await.unwrap();

    assert!(!profile.exists());
    assert_eq!(
        orchestrator.folder_state(&profile, "v1").await,
        ProfileFolderState::FirstDownload
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_clean_run_tags_before_launch() {
    let keys = KeyPair::generate_unencrypted_keypair().unwrap();
    let game = zip_bytes(&[("YARG", b"#!/bin/sh\nexit 0\n")]);
    let server = TestServer::start(HashMap::from([
        ("/game.zip".to_string(), game.clone()),
        ("/game.zip.sig".to_string(), sign(&keys, &game)),
    ]));
    let tmp = tempdir().unwrap();
    let profile = tmp.path().join("profile");
    let orchestrator = orchestrator(&tmp, keys.pk, true);
    let request = request(&profile, "v1", vec![zip_file(&server, "game.zip", true)]);
    // Run the extracted script through the system shell so the test does not
    // depend on the archive carrying an executable bit.
    let launch = LaunchRequest {
        exec_path: "/bin/sh".into(),
        arguments: vec![profile.join("installation/YARG").display().to_string()],
        use_obs_vkapture: false,
    };

    let run = orchestrator
        .ensure_installed_and_launch(
            &request,
            &launch,
            &CancellationToken::new(),
            &InstallReporter::silent("it"),
        )
        .await
        .unwrap();

    assert_eq!(
        run.history(),
        &[
            PipelineState::NotStarted,
            PipelineState::DirectoriesReady,
            PipelineState::Downloaded,
            PipelineState::Verified,
            PipelineState::Extracted,
            PipelineState::Tagged,
            PipelineState::Launched,
        ]
    );
    assert_eq!(std::fs::read_to_string(profile.join(TAG_FILE_NAME)).unwrap(), "v1");
}

/// Cancels the token as soon as the archive download completes.
struct CancelAfterDownload(CancellationToken);

impl ProgressSink for CancelAfterDownload {
    fn emit(&self, progress: InstallProgress) {
        if progress.phase == InstallPhase::Downloading
            && matches!(progress.status, InstallStatus::Completed)
        {
            self.0.cancel();
        }
    }
}

#[tokio::test]
async fn test_cancel_while_fetching_signature() {
    let keys = KeyPair::generate_unencrypted_keypair().unwrap();
    let game = zip_bytes(&[("YARG", b"bin")]);
    let server = TestServer::start(HashMap::from([
        ("/game.zip".to_string(), game.clone()),
        ("/game.zip.sig".to_string(), sign(&keys, &game)),
    ]));
    let tmp = tempdir().unwrap();
    let profile = tmp.path().join("profile");
    let orchestrator = orchestrator(&tmp, keys.pk, true);
    let request = request(&profile, "v1", vec![zip_file(&server, "game.zip", true)]);
    let cancel_token = CancellationToken::new();
    let reporter = InstallReporter::new("it", Arc::new(CancelAfterDownload(cancel_token.clone())));

    let run = orchestrator.run(&request, None, &cancel_token, &reporter).await;

    assert_eq!(
        run.error(),
        Some(&ErrorInfo::Cancelled {
            phase: InstallPhase::Verifying
        })
    );
    assert!(run.visited(&PipelineState::Downloaded));
    assert!(!run.visited(&PipelineState::Verified));
}
