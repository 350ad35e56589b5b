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


//! Logging init: file sink under the app data dir, stderr as fallback.

use crate::error::{Result, SuiteError};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,hf_suite=debug";

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize structured logging to `<log_dir>/suite.log`.
///
/// Errors when the directory or file cannot be set up, so the caller can
/// fall back to [`init_stderr`]. Every event re-clones the open handle;
/// should a clone ever fail mid-run, that event lands on stderr rather
/// than being dropped.
pub fn init_file(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)?;
    let log_file_path = log_dir.join("suite.log");
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)?;

    let writer = move || -> Box<dyn Write> {
        match file.try_clone() {
            Ok(handle) => Box::new(handle),
            Err(_) => Box::new(io::stderr()),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| SuiteError::Config(format!("failed to install logger: {e}")))?;

    tracing::info!("logging initialized at {}", log_file_path.display());
    Ok(())
}

/// Stderr-only logging for when the file sink is unavailable.
pub fn init_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}
