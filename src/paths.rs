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


//! Application paths and filesystem helpers
//!
//! All durable artifacts live under a single per-user data directory:
//!
//! - Windows: `%LOCALAPPDATA%\HFDownloadSuite`
//! - macOS: `~/Library/Application Support/HFDownloadSuite`
//! - Linux/other: `~/.hf_download_suite`
//!
//! Components never reach for these locations themselves; they receive an
//! [`AppPaths`] (or a concrete path derived from it) at construction time so
//! tests can point everything at a temp directory.

use std::path::{Path, PathBuf};

/// Root data directory plus the locations derived from it.
#[derive(Debug, Clone)]
pub struct AppPaths {
    base: PathBuf,
}

impl AppPaths {
    /// Paths rooted at an explicit base directory (tests, portable installs).
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    /// Paths rooted at the platform-default per-user data directory.
    pub fn default_location() -> Self {
        Self {
            base: default_data_dir(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn database_file(&self) -> PathBuf {
        self.base.join("suite.db")
    }

    pub fn resume_state_dir(&self) -> PathBuf {
        self.base.join("resume_states")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.base.join("cache")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base.join("logs")
    }
}

/// Platform-default per-user data directory.
fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let base = std::env::var("LOCALAPPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir());
        base.join("HFDownloadSuite")
    }

    #[cfg(target_os = "macos")]
    {
        home_dir()
            .join("Library")
            .join("Application Support")
            .join("HFDownloadSuite")
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        home_dir().join(".hf_download_suite")
    }
}

fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let var = "USERPROFILE";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";

    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Free bytes on the volume containing `path`.
///
/// The path may not exist yet (downloads create their destination during
/// pre-flight), so parents are walked until an existing directory is found
/// and the disk with the longest matching mount point wins. Returns `None`
/// when no disk can be matched, which callers treat as "check unavailable",
/// not as zero space.
pub fn available_disk_space(path: &Path) -> Option<u64> {
    let mut probe = path;
    while !probe.exists() {
        probe = probe.parent()?;
    }
    let probe = probe.canonicalize().ok()?;

    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| probe.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}

/// Sanitize a filename for all supported filesystems.
pub fn safe_filename(name: &str) -> String {
    const MAX_LENGTH: usize = 200;
    let invalid = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

    let mut safe: String = name
        .chars()
        .map(|c| {
            if invalid.contains(&c) || (c as u32) < 0x20 {
                '_'
            } else {
                c
            }
        })
        .collect();
    safe = safe.trim_matches(|c| c == '.' || c == ' ').to_string();

    if safe.len() > MAX_LENGTH {
        safe.truncate(MAX_LENGTH);
    }
    if safe.is_empty() {
        safe = "unnamed".to_string();
    }
    safe
}

/// Format bytes as a human-readable string (e.g. "1.5 GB").
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} EB")
}

/// Format a duration in seconds as a human-readable string (e.g. "2h 15m").
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{}m {}s", minutes, seconds % 60);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h {}m", hours, minutes % 60);
    }
    format!("{}d {}h", hours / 24, hours % 24)
}
