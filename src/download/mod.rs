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


//! Download engine: scheduler, workers, progress, and resume state

pub mod progress;
pub mod resume;
pub mod scheduler;
pub mod worker;

pub use progress::{ProgressInfo, ProgressTracker, SpeedTracker};
pub use resume::{ResumeState, ResumeStore};
pub use scheduler::{Scheduler, SchedulerStatus};
pub use worker::{control_channel, DownloadWorker, WorkerContext, WorkerControl};
