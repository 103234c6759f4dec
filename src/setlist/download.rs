use std::{num::NonZeroU64, path::Path, time::{Duration, Instant}};

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::{
    config::LauncherConfig,
    errors::{AnyError, ErrorInfo, Result},
    setlist::progress::{InstallPhase, InstallReporter, InstallStatus},
};

/// Streams remote files to disk. Never retries; a failed download is reported
/// as-is and whatever was written stays on disk.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    report_interval: Duration,
}

impl Downloader {
    pub fn new(config: &LauncherConfig) -> Self {
        Self {
            client: build_client(&config.user_agent),
            report_interval: config.progress_throttle,
        }
    }

    /// Downloads `url` into `dst`, returning the number of bytes written.
    ///
    /// The destination is created before the request is sent, so an unwritable
    /// destination is reported even when the network is unreachable.
    pub async fn download(
        &self,
        url: &str,
        dst: &Path,
        cancel_token: &CancellationToken,
        reporter: Option<&InstallReporter>,
    ) -> Result<u64> {
        let f = tokio::fs::File::create(dst)
            .await
            .map_err(|error| ErrorInfo::DownloadFileCreateFail {
                path: dst.to_owned(),
                error: error.into(),
            })?;

        let init_fail = |error: reqwest::Error| ErrorInfo::DownloadInitFail {
            url: url.to_owned(),
            error: AnyError::from_error(&error),
        };

        let res = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                return Err(cancelled(reporter));
            }
            res = self.client.get(url).send() => {
                res.and_then(reqwest::Response::error_for_status).map_err(init_fail)?
            }
        };

        let total_size = res.content_length().unwrap_or_else(|| {
            tracing::warn!(phase = "download", url, "Failed to get content length");
            0
        });

        if let Some(reporter) = reporter {
            reporter.report(
                InstallPhase::Downloading,
                InstallStatus::Started {
                    total_size: NonZeroU64::new(total_size),
                },
            );
        }

        let write_fail = |error: std::io::Error| ErrorInfo::DownloadWriteError {
            path: dst.to_owned(),
            url: url.to_owned(),
            error: error.into(),
        };

        let start = Instant::now();
        let mut stream = res.bytes_stream();
        let mut writer = BufWriter::with_capacity(64 * 1024, f);

        let mut downloaded: u64 = 0;
        let mut last_report = start;

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    tracing::info!(phase = "download", url, downloaded, "Download cancelled");
                    // Keep what was written; the caller owns cleanup.
                    writer.flush().await.ok();
                    return Err(cancelled(reporter));
                }
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            writer.write_all(&bytes).await.map_err(write_fail)?;
                            downloaded += bytes.len() as u64;

                            if last_report.elapsed() < self.report_interval {
                                continue;
                            }
                            if let Some(reporter) = reporter {
                                let percent = if total_size > 0 {
                                    (downloaded.min(total_size)) as f64 / total_size as f64 * 100.0
                                } else {
                                    0.0
                                };
                                reporter.report(InstallPhase::Downloading, InstallStatus::InProgress { percent });
                            }
                            last_report = Instant::now();
                        }
                        Some(Err(e)) => {
                            tracing::error!(phase = "download", url, error = %e, "Error while downloading");
                            if let Some(reporter) = reporter {
                                reporter.report(InstallPhase::Downloading, InstallStatus::Failed { reason: e.to_string() });
                            }
                            writer.flush().await.ok();
                            return Err(ErrorInfo::DownloadFail { error: AnyError::from_error(&e) });
                        }
                        None => {
                            writer.flush().await.map_err(write_fail)?;
                            tracing::info!(
                                phase = "download",
                                url,
                                bytes = downloaded,
                                elapsed = ?start.elapsed(),
                                "Download completed"
                            );
                            if let Some(reporter) = reporter {
                                reporter.report(InstallPhase::Downloading, InstallStatus::Completed);
                            }
                            return Ok(downloaded);
                        }
                    }
                }
            }
        }
    }
}

fn cancelled(reporter: Option<&InstallReporter>) -> ErrorInfo {
    if let Some(reporter) = reporter {
        reporter.report(InstallPhase::Downloading, InstallStatus::Cancelled);
    }
    ErrorInfo::Cancelled {
        phase: InstallPhase::Downloading,
    }
}

fn build_client(user_agent: &str) -> reqwest::Client {
    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(user_agent) {
        Ok(value) => {
            headers.insert(USER_AGENT, value);
        }
        Err(e) => tracing::warn!(user_agent, error = %e, "Invalid user agent, sending none"),
    }

    reqwest::Client::builder()
        .tcp_keepalive(Some(Duration::from_secs(10)))
        .default_headers(headers)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to build configured HTTP client, using defaults");
            reqwest::Client::new()
        })
}
