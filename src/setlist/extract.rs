use std::{
    fs::File,
    io::{Read, Write},
    num::NonZeroU64,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

use crate::{
    errors::{AnyError, ErrorInfo, Result},
    setlist::progress::{InstallPhase, InstallReporter, InstallStatus},
    util::datetime_to_systemtime,
};

const REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Unpacks `archive` into `target`, creating `target` if needed.
///
/// Every entry name is checked before anything is written: an entry that would
/// land outside `target` fails the whole extraction with
/// [`ErrorInfo::ExtractSetlistPath`]. Files already written when a later
/// entry fails are left where they are.
pub async fn extract(
    archive: &Path,
    target: &Path,
    cancel_token: &CancellationToken,
    reporter: &InstallReporter,
) -> Result<usize> {
    let archive = archive.to_path_buf();
    let target = target.to_path_buf();
    let cancel_token = cancel_token.clone();
    let reporter = reporter.clone();

    tokio::task::spawn_blocking(move || extract_blocking(&archive, &target, &cancel_token, &reporter))
        .await
        .map_err(|error| ErrorInfo::ExtractZipError {
            error: AnyError::from_error(&error),
        })?
}

fn extract_blocking(
    archive_path: &Path,
    target: &Path,
    cancel_token: &CancellationToken,
    reporter: &InstallReporter,
) -> Result<usize> {
    let zip_error = |error: zip::result::ZipError| ErrorInfo::ExtractZipError {
        error: AnyError::from_error(&error),
    };
    let open_error = |path: &Path, error: std::io::Error| ErrorInfo::ExtractFileOpenError {
        path: path.to_owned(),
        error: error.into(),
    };

    let f = File::open(archive_path).map_err(|e| open_error(archive_path, e))?;
    let mut archive = ZipArchive::new(f).map_err(zip_error)?;

    let entries = resolve_entries(&mut archive)?;
    let entry_count = entries.len();

    std::fs::create_dir_all(target).map_err(|e| open_error(target, e))?;

    reporter.report(
        InstallPhase::Extracting,
        InstallStatus::Started {
            total_size: NonZeroU64::new(entry_count as u64),
        },
    );
    let start = Instant::now();
    let mut last_report = start;
    let mut written = 0;

    for (i, relative) in entries.into_iter().enumerate() {
        if cancel_token.is_cancelled() {
            tracing::info!(phase = "extract", written, "Extraction cancelled");
            reporter.report(InstallPhase::Extracting, InstallStatus::Cancelled);
            return Err(ErrorInfo::Cancelled {
                phase: InstallPhase::Extracting,
            });
        }

        let mut file = archive.by_index(i).map_err(zip_error)?;
        let outpath = target.join(&relative);

        if file.is_dir() {
            std::fs::create_dir_all(&outpath).map_err(|e| open_error(&outpath, e))?;
        } else {
            if let Some(p) = outpath.parent() {
                std::fs::create_dir_all(p).map_err(|e| open_error(p, e))?;
            }
            let mut outfile = File::create(&outpath).map_err(|e| open_error(&outpath, e))?;
            copy_entry(&mut file, &mut outfile, &outpath)?;

            if let Some(last_modified) = file.last_modified()
                && let Some(t) = datetime_to_systemtime(&last_modified)
                && let Err(e) = outfile.set_modified(t)
            {
                tracing::warn!(path = %outpath.display(), error = %e, "Failed to restore modification time");
            }
            written += 1;
        }

        if last_report.elapsed() < REPORT_INTERVAL {
            continue;
        }
        let percent = (i + 1) as f64 / entry_count as f64 * 100.0;
        reporter.report(InstallPhase::Extracting, InstallStatus::InProgress { percent });
        last_report = Instant::now();
    }

    tracing::info!(
        phase = "extract",
        archive = %archive_path.display(),
        target = %target.display(),
        files = written,
        elapsed = ?start.elapsed(),
        "Extraction completed"
    );
    reporter.report(InstallPhase::Extracting, InstallStatus::Completed);
    Ok(written)
}

/// Safe relative output path of every entry, in archive order.
fn resolve_entries(archive: &mut ZipArchive<File>) -> Result<Vec<PathBuf>> {
    (0..archive.len())
        .map(|i| {
            let entry = archive
                .by_index_raw(i)
                .map_err(|error| ErrorInfo::ExtractZipError {
                    error: AnyError::from_error(&error),
                })?;
            entry.enclosed_name().ok_or_else(|| {
                tracing::error!(name = entry.name(), "Archive entry escapes the target directory");
                ErrorInfo::ExtractSetlistPath {
                    error: AnyError::message(format!(
                        "archive entry `{}` resolves outside the target directory",
                        entry.name()
                    )),
                }
            })
        })
        .collect()
}

/// Reads and writes are mapped separately: a failed read means the archive is
/// corrupt, a failed write is a problem with the output file.
fn copy_entry(entry: &mut impl Read, out: &mut File, outpath: &Path) -> Result<()> {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match entry.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => {
                return Err(ErrorInfo::ExtractZipError {
                    error: AnyError::from_error(&error),
                });
            }
        };
        out.write_all(&buf[..n])
            .map_err(|error| ErrorInfo::ExtractFileOpenError {
                path: outpath.to_owned(),
                error: error.into(),
            })?;
    }
}
