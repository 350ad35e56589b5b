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


//! Error types for the download suite
//!
//! Errors are grouped by domain (repository API, transfer, persistence,
//! configuration) and each carries enough structure for callers to react
//! programmatically. Two cross-cutting properties drive the retry logic:
//!
//! - [`SuiteError::is_retryable`]: whether the download worker may retry
//!   the failed attempt (rate limiting, transient network faults,
//!   interrupted transfers).
//! - [`SuiteError::suggestion`]: an actionable next step surfaced to the
//!   user alongside the message.
//!
//! Cancellation travels through the same channel as a dedicated variant so
//! that every blocking call can be unwound with `?`; it is mapped to the
//! cancelled outcome at the worker boundary and never reported as a failure.

use thiserror::Error;

/// Result type alias using our SuiteError type
pub type Result<T> = std::result::Result<T, SuiteError>;

/// Main error type for the download suite
#[derive(Error, Debug)]
pub enum SuiteError {
    // ===== Repository API errors =====

    /// Repository does not exist or is not visible to this credential
    #[error("repository not found: {repo_id} on {platform}")]
    NotFound { repo_id: String, platform: String },

    /// Credential missing or rejected by the upstream hub
    #[error("authentication failed for {platform}: {reason}")]
    AuthRequired { platform: String, reason: String },

    /// Repository requires accepting a license before download
    #[error("access denied to gated repository: {repo_id}")]
    Gated { repo_id: String },

    /// Upstream throttling (HTTP 429)
    #[error("rate limit exceeded{}", retry_after_seconds.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after_seconds: Option<u64> },

    /// Uncategorized upstream failure
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code if available
        status_code: Option<u16>,
    },

    // ===== Transfer errors =====

    /// Network connectivity error
    #[error("network error: {message}")]
    Network {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Partial transfer detected; the next attempt resumes from the offset
    #[error("download interrupted at {downloaded} of {total} bytes")]
    DownloadInterrupted { downloaded: u64, total: u64 },

    /// Not enough free bytes on the destination volume
    #[error("insufficient disk space on '{path}': need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        required: u64,
        available: u64,
        path: String,
    },

    /// Fetched bytes do not match the checksum the listing advertised
    #[error("file verification failed: {path} (expected {expected}, got {actual})")]
    FileVerification {
        path: String,
        expected: String,
        actual: String,
    },

    /// Pause/cancel signal observed; unwinds blocking calls, never a failure
    #[error("operation cancelled")]
    Cancelled,

    // ===== Persistence errors =====

    /// Durable write to the store failed
    #[error("persistence failed: {0}")]
    Persist(String),

    /// The database file could not be opened (corrupt or unreadable)
    #[error("failed to open store: {0}")]
    StoreOpen(String),

    // ===== Local errors =====

    /// Generic file I/O error
    #[error("file I/O error: {0}")]
    FileIo(String),

    /// Invalid caller-supplied value
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration file could not be read or written
    #[error("configuration error: {0}")]
    Config(String),
}

impl SuiteError {
    /// Whether the download worker may retry after this error.
    ///
    /// Everything else short-circuits the retry scope: auth, gating, space
    /// and verification failures will not improve on a second attempt, and
    /// cancellation must exit immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SuiteError::RateLimited { .. }
                | SuiteError::Network {
                    is_transient: true,
                    ..
                }
                | SuiteError::DownloadInterrupted { .. }
        )
    }

    /// Actionable next step to surface alongside the message.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            SuiteError::NotFound { repo_id, platform } => Some(format!(
                "Verify the repository id is correct and that '{repo_id}' exists on {platform}; private repositories require a token."
            )),
            SuiteError::AuthRequired { platform, .. } => Some(match platform.as_str() {
                "huggingface" => "Add a HuggingFace token (https://huggingface.co/settings/tokens) with read access, or set HF_TOKEN.".to_string(),
                "modelscope" => "Set MODELSCOPE_API_TOKEN; tokens are issued at https://modelscope.cn/my/myaccesstoken.".to_string(),
                other => format!("Check your {other} credentials."),
            }),
            SuiteError::Gated { repo_id } => Some(format!(
                "Open https://huggingface.co/{repo_id}, accept the license, and retry with a token that has access."
            )),
            SuiteError::RateLimited { .. } => {
                Some("Wait a moment before retrying, or authenticate to raise the limit.".to_string())
            }
            SuiteError::Network { .. } => Some(
                "Check your connection; a mirror endpoint can be configured under network settings.".to_string(),
            ),
            SuiteError::DownloadInterrupted { .. } => {
                Some("Resume the download to continue from the last completed byte.".to_string())
            }
            SuiteError::InsufficientSpace {
                required,
                available,
                ..
            } => Some(format!(
                "Free up at least {} bytes or choose a different download location.",
                required.saturating_sub(*available)
            )),
            SuiteError::FileVerification { .. } => Some(
                "Delete the corrupted file and re-download; persistent mismatches can indicate disk errors.".to_string(),
            ),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for SuiteError {
    fn from(e: sqlx::Error) -> Self {
        SuiteError::Persist(e.to_string())
    }
}

impl From<std::io::Error> for SuiteError {
    fn from(e: std::io::Error) -> Self {
        SuiteError::FileIo(e.to_string())
    }
}

impl From<serde_json::Error> for SuiteError {
    fn from(e: serde_json::Error) -> Self {
        SuiteError::InvalidInput(format!("JSON error: {e}"))
    }
}

impl From<reqwest::Error> for SuiteError {
    fn from(e: reqwest::Error) -> Self {
        // 4xx responses carry a definitive answer; everything else (timeouts,
        // resets, DNS, 5xx) is worth another attempt.
        let is_transient = match e.status() {
            Some(status) => status.is_server_error(),
            None => true,
        };
        SuiteError::Network {
            message: e.to_string(),
            is_transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SuiteError::RateLimited {
            retry_after_seconds: Some(30)
        }
        .is_retryable());
        assert!(SuiteError::Network {
            message: "connection reset".to_string(),
            is_transient: true,
        }
        .is_retryable());
        assert!(SuiteError::DownloadInterrupted {
            downloaded: 10,
            total: 100
        }
        .is_retryable());

        assert!(!SuiteError::NotFound {
            repo_id: "o/r".to_string(),
            platform: "huggingface".to_string(),
        }
        .is_retryable());
        assert!(!SuiteError::Gated {
            repo_id: "o/r".to_string()
        }
        .is_retryable());
        assert!(!SuiteError::InsufficientSpace {
            required: 100,
            available: 10,
            path: "/tmp".to_string(),
        }
        .is_retryable());
        assert!(!SuiteError::Cancelled.is_retryable());
        assert!(!SuiteError::Network {
            message: "404".to_string(),
            is_transient: false,
        }
        .is_retryable());
    }

    #[test]
    fn test_suggestions_present_for_user_facing_kinds() {
        let err = SuiteError::InsufficientSpace {
            required: 1000,
            available: 400,
            path: "/data".to_string(),
        };
        let suggestion = err.suggestion().unwrap();
        assert!(suggestion.contains("600"));

        assert!(SuiteError::Gated {
            repo_id: "meta/llama".to_string()
        }
        .suggestion()
        .unwrap()
        .contains("meta/llama"));

        assert!(SuiteError::Cancelled.suggestion().is_none());
    }
}
