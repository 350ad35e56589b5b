// HF Download Suite - Model Repository Download Orchestrator
// Copyright (C) 2025 HF Suite Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Resumable single-file HTTP transfer
//!
//! Shared by both hub providers:
//!
//! - Bytes stream into a `.part` sibling which is renamed over the final
//!   path only after the transfer completes, so a finished file on disk is
//!   always whole.
//! - An existing `.part` sets the `Range` offset; a server that ignores the
//!   range (plain 200) restarts the partial from zero.
//! - Pause and cancel signals are observed at every chunk boundary; cancel
//!   during pause is observed within the 250 ms poll interval.
//! - An optional bandwidth cap paces the loop by sleeping whenever the
//!   attempt's average rate runs ahead of the limit.

use crate::error::{Result, SuiteError};
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tracing::debug;

const WRITE_BUF_SZ: usize = 64 * 1024;
const PAUSE_POLL: Duration = Duration::from_millis(250);

/// Pause/cancel receivers a transfer observes at chunk boundaries.
#[derive(Debug, Clone)]
pub struct TransferSignals {
    pub pause: watch::Receiver<bool>,
    pub cancel: watch::Receiver<bool>,
}

impl TransferSignals {
    /// Signals that never fire (standalone fetches, tests). A receiver
    /// whose sender is gone keeps reporting the last value, which is all
    /// we need here.
    pub fn unsignalled() -> Self {
        let (_pause_tx, pause) = watch::channel(false);
        let (_cancel_tx, cancel) = watch::channel(false);
        Self { pause, cancel }
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Temp sibling a transfer streams into before the atomic rename.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".part");
    dest.with_file_name(name)
}

/// Map an upstream HTTP status to the error taxonomy.
pub fn map_http_status(
    status: StatusCode,
    platform: &str,
    repo_id: &str,
    retry_after_seconds: Option<u64>,
) -> SuiteError {
    match status {
        StatusCode::UNAUTHORIZED => SuiteError::AuthRequired {
            platform: platform.to_string(),
            reason: "credential missing or rejected".to_string(),
        },
        StatusCode::FORBIDDEN => SuiteError::Gated {
            repo_id: repo_id.to_string(),
        },
        StatusCode::NOT_FOUND => SuiteError::NotFound {
            repo_id: repo_id.to_string(),
            platform: platform.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => SuiteError::RateLimited {
            retry_after_seconds,
        },
        s if s.is_server_error() => SuiteError::Network {
            message: format!("upstream returned {s}"),
            is_transient: true,
        },
        s => SuiteError::Api {
            message: format!("unexpected status {s} for {repo_id}"),
            status_code: Some(s.as_u16()),
        },
    }
}

fn retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

fn content_range_total(response: &reqwest::Response) -> Option<u64> {
    // Content-Range: bytes 1000-1999/2000
    response
        .headers()
        .get("content-range")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split('/').nth(1))
        .and_then(|s| s.parse().ok())
}

/// Fetch `url` into `dest`, resuming an existing partial. Returns the final
/// size in bytes. Progress reports (bytes so far for this file, file total).
#[allow(clippy::too_many_arguments)]
pub async fn download_to_path(
    client: &Client,
    url: &str,
    token: Option<&str>,
    platform: &str,
    repo_id: &str,
    dest: &Path,
    signals: &TransferSignals,
    progress: Option<&crate::api::ProgressFn>,
    bandwidth_limit: Option<u64>,
) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    let part = part_path(dest);
    let mut offset = match fs::metadata(&part).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    let mut request = client.get(url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    if offset > 0 {
        request = request.header("Range", format!("bytes={offset}-"));
    }

    let response = request.send().await?;
    let status = response.status();

    let total = match status {
        StatusCode::OK => {
            if offset > 0 {
                // Server ignored the range; restart the partial from zero.
                debug!(url, "range not honored, restarting partial");
                offset = 0;
            }
            response.content_length().unwrap_or(0)
        }
        StatusCode::PARTIAL_CONTENT => content_range_total(&response).unwrap_or(0),
        StatusCode::RANGE_NOT_SATISFIABLE => {
            // The partial no longer lines up with the remote file; drop it
            // so the next attempt starts clean.
            let _ = fs::remove_file(&part).await;
            return Err(SuiteError::DownloadInterrupted {
                downloaded: offset,
                total: 0,
            });
        }
        s => {
            return Err(map_http_status(s, platform, repo_id, retry_after(&response)));
        }
    };

    let file = if offset > 0 {
        OpenOptions::new().append(true).open(&part).await?
    } else {
        fs::File::create(&part).await?
    };
    let mut writer = BufWriter::with_capacity(WRITE_BUF_SZ, file);

    let mut written = offset;
    let mut stream = response.bytes_stream();
    let started = Instant::now();
    let attempt_base = offset;

    loop {
        if signals.is_cancelled() {
            writer.flush().await?;
            return Err(SuiteError::Cancelled);
        }
        while signals.is_paused() {
            writer.flush().await?;
            tokio::time::sleep(PAUSE_POLL).await;
            if signals.is_cancelled() {
                return Err(SuiteError::Cancelled);
            }
        }

        let chunk = match stream.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                writer.flush().await?;
                debug!(url, written, error = %e, "stream interrupted");
                return Err(SuiteError::DownloadInterrupted {
                    downloaded: written,
                    total,
                });
            }
            None => break,
        };

        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;

        if let Some(progress) = progress {
            progress(written, total);
        }

        if let Some(limit) = bandwidth_limit.filter(|l| *l > 0) {
            pace(attempt_base, written, limit, started, signals).await?;
        }
    }

    writer.flush().await?;

    if total > 0 && written < total {
        return Err(SuiteError::DownloadInterrupted {
            downloaded: written,
            total,
        });
    }

    fs::rename(&part, dest).await?;
    Ok(written)
}

/// Sleep off any lead over the bandwidth cap, keeping cancel observable.
async fn pace(
    attempt_base: u64,
    written: u64,
    limit: u64,
    started: Instant,
    signals: &TransferSignals,
) -> Result<()> {
    let transferred = written.saturating_sub(attempt_base);
    let expected = Duration::from_secs_f64(transferred as f64 / limit as f64);
    let elapsed = started.elapsed();
    if expected <= elapsed {
        return Ok(());
    }

    let mut remaining = expected - elapsed;
    while remaining > Duration::ZERO {
        if signals.is_cancelled() {
            return Err(SuiteError::Cancelled);
        }
        let step = remaining.min(PAUSE_POLL);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
    Ok(())
}

/// Hex-encoded SHA-256 of a file's contents.
pub async fn file_sha256(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/d/model.safetensors")),
            PathBuf::from("/d/model.safetensors.part")
        );
        assert_eq!(part_path(Path::new("/d/README")), PathBuf::from("/d/README.part"));
    }

    #[test]
    fn test_status_mapping() {
        let err = map_http_status(StatusCode::UNAUTHORIZED, "huggingface", "o/r", None);
        assert!(matches!(err, SuiteError::AuthRequired { .. }));

        let err = map_http_status(StatusCode::FORBIDDEN, "huggingface", "o/r", None);
        assert!(matches!(err, SuiteError::Gated { .. }));

        let err = map_http_status(StatusCode::NOT_FOUND, "modelscope", "o/r", None);
        assert!(matches!(err, SuiteError::NotFound { .. }));

        let err = map_http_status(StatusCode::TOO_MANY_REQUESTS, "huggingface", "o/r", Some(30));
        assert!(err.is_retryable());

        let err = map_http_status(StatusCode::BAD_GATEWAY, "huggingface", "o/r", None);
        assert!(err.is_retryable());

        let err = map_http_status(StatusCode::IM_A_TEAPOT, "huggingface", "o/r", None);
        assert!(matches!(err, SuiteError::Api { status_code: Some(418), .. }));
    }

    #[test]
    fn test_unsignalled_signals() {
        let signals = TransferSignals::unsignalled();
        assert!(!signals.is_paused());
        assert!(!signals.is_cancelled());
    }

    #[tokio::test]
    async fn test_file_sha256() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let digest = file_sha256(&path).await.unwrap();
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
