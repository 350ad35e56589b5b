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


//! Download progress tracking and reporting
//!
//! A per-task sampler turns byte positions into instantaneous speeds
//! (bytes delta over time delta), keeps the last ten samples, and publishes
//! the average. Emission is throttled to one snapshot per half second per
//! task; intermediate snapshots are droppable by design, terminal ones are
//! not (the worker forces a final snapshot).

use crate::paths::{format_bytes, format_duration};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How many instantaneous speed samples feed the average.
const SPEED_SAMPLES: usize = 10;

/// Minimum interval between published snapshots.
const EMIT_INTERVAL: Duration = Duration::from_millis(500);

/// Progress snapshot published on the event bus and persisted (throttled)
/// to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressInfo {
    pub task_id: i64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub speed_bps: f64,
    pub eta_seconds: Option<u64>,
    pub current_file: Option<String>,
    pub files_completed: usize,
    pub files_total: usize,
}

impl ProgressInfo {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64) * 100.0
    }

    /// "2.5 MB/s"
    pub fn speed_display(&self) -> String {
        format!("{}/s", format_bytes(self.speed_bps as u64))
    }

    /// "5m 30s", or "unknown" while the speed is still settling
    pub fn eta_display(&self) -> String {
        match self.eta_seconds {
            Some(eta) => format_duration(eta),
            None => "unknown".to_string(),
        }
    }
}

/// Sliding-window speed sampler.
#[derive(Debug)]
pub struct SpeedTracker {
    samples: VecDeque<f64>,
    last_point: Option<(Instant, u64)>,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(SPEED_SAMPLES),
            last_point: None,
        }
    }

    /// Record the current byte position.
    pub fn add_position(&mut self, position: u64) {
        let now = Instant::now();

        if let Some((prev_time, prev_position)) = self.last_point {
            let elapsed = now.duration_since(prev_time).as_secs_f64();
            if elapsed > 0.0 {
                let delta = position.saturating_sub(prev_position);
                self.samples.push_back(delta as f64 / elapsed);
                while self.samples.len() > SPEED_SAMPLES {
                    self.samples.pop_front();
                }
            }
        }

        self.last_point = Some((now, position));
    }

    /// Average of the retained samples, in bytes per second.
    pub fn average_speed(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Drop history (used across pause boundaries so stale samples don't
    /// skew the average).
    pub fn reset(&mut self) {
        self.samples.clear();
        self.last_point = None;
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Combines the sampler with throttled snapshot production for one task.
#[derive(Debug)]
pub struct ProgressTracker {
    task_id: i64,
    total_bytes: u64,
    downloaded_bytes: u64,
    files_completed: usize,
    files_total: usize,
    current_file: Option<String>,
    speed: SpeedTracker,
    last_emit: Option<Instant>,
}

impl ProgressTracker {
    pub fn new(task_id: i64, total_bytes: u64) -> Self {
        Self {
            task_id,
            total_bytes,
            downloaded_bytes: 0,
            files_completed: 0,
            files_total: 0,
            current_file: None,
            speed: SpeedTracker::new(),
            last_emit: None,
        }
    }

    pub fn set_total(&mut self, total_bytes: u64) {
        self.total_bytes = total_bytes;
    }

    pub fn set_files(&mut self, completed: usize, total: usize) {
        self.files_completed = completed;
        self.files_total = total;
    }

    pub fn set_current_file(&mut self, file: Option<String>) {
        self.current_file = file;
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded_bytes
    }

    pub fn reset_speed(&mut self) {
        self.speed.reset();
    }

    /// Record a new absolute byte position; returns a snapshot when the
    /// half-second emission window has passed.
    pub fn update(&mut self, downloaded_bytes: u64) -> Option<ProgressInfo> {
        self.downloaded_bytes = downloaded_bytes;
        self.speed.add_position(downloaded_bytes);

        let now = Instant::now();
        let due = self
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= EMIT_INTERVAL);
        if !due {
            return None;
        }

        self.last_emit = Some(now);
        Some(self.snapshot())
    }

    /// Snapshot regardless of throttling (terminal updates).
    pub fn force_snapshot(&mut self) -> ProgressInfo {
        self.last_emit = Some(Instant::now());
        self.snapshot()
    }

    fn snapshot(&self) -> ProgressInfo {
        let speed = self.speed.average_speed();
        let eta_seconds = if speed > 0.0 && self.total_bytes > self.downloaded_bytes {
            Some(((self.total_bytes - self.downloaded_bytes) as f64 / speed) as u64)
        } else {
            None
        };

        ProgressInfo {
            task_id: self.task_id,
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            speed_bps: speed,
            eta_seconds,
            current_file: self.current_file.clone(),
            files_completed: self.files_completed,
            files_total: self.files_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_speed_tracker_average() {
        let mut tracker = SpeedTracker::new();
        assert_eq!(tracker.average_speed(), 0.0);

        tracker.add_position(0);
        thread::sleep(Duration::from_millis(100));
        tracker.add_position(100_000); // ~1 MB/s

        let speed = tracker.average_speed();
        assert!(speed > 500_000.0 && speed < 2_000_000.0, "speed was {speed}");
    }

    #[test]
    fn test_speed_tracker_window_is_bounded() {
        let mut tracker = SpeedTracker::new();
        for i in 0..50 {
            tracker.add_position(i * 1000);
            thread::sleep(Duration::from_millis(1));
        }
        assert!(tracker.samples.len() <= SPEED_SAMPLES);
    }

    #[test]
    fn test_progress_throttling() {
        let mut tracker = ProgressTracker::new(1, 1000);

        // First update emits, immediate follow-ups are throttled.
        assert!(tracker.update(100).is_some());
        assert!(tracker.update(200).is_none());
        assert!(tracker.update(300).is_none());

        // But the position is still tracked.
        assert_eq!(tracker.downloaded(), 300);

        // A forced snapshot always comes through.
        let snapshot = tracker.force_snapshot();
        assert_eq!(snapshot.downloaded_bytes, 300);
        assert_eq!(snapshot.total_bytes, 1000);
    }

    #[test]
    fn test_eta_absent_without_speed() {
        let mut tracker = ProgressTracker::new(1, 1000);
        let snapshot = tracker.update(0).unwrap();
        assert_eq!(snapshot.eta_seconds, None);
        assert_eq!(snapshot.eta_display(), "unknown");
    }

    #[test]
    fn test_percent() {
        let info = ProgressInfo {
            task_id: 1,
            downloaded_bytes: 250,
            total_bytes: 1000,
            speed_bps: 0.0,
            eta_seconds: None,
            current_file: None,
            files_completed: 1,
            files_total: 4,
        };
        assert_eq!(info.percent(), 25.0);

        let unknown_total = ProgressInfo {
            total_bytes: 0,
            ..info
        };
        assert_eq!(unknown_total.percent(), 0.0);
    }
}
