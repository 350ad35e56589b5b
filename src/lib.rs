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


//! Concurrent, resumable download orchestrator for model repositories
//! (HuggingFace Hub, ModelScope).
//!
//! The pieces compose bottom-up: a durable [`storage::Store`] holds tasks
//! and history, [`api::RepoApi`] providers talk to the hubs, and the
//! [`download::Scheduler`] runs a bounded pool of workers that execute
//! tasks with pause/resume/cancel, retry with backoff, and crash-safe
//! resume sidecars. Lifecycle events fan out through [`events::EventBus`].
//!
//! There is no ambient global state: callers construct the handles at
//! startup and pass them in, which is also how the tests get fresh
//! instances.

pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod logging;
pub mod paths;
pub mod scan;
pub mod storage;
pub mod workflow;

// Re-export commonly used types for convenience
pub use config::Config;
pub use error::{Result, SuiteError};
pub use events::EventBus;
pub use paths::AppPaths;
